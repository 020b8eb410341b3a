//! Configuration handling for the plugin's command-line harness.
//!
//! The plugin itself is configured by a JSON object (see
//! [`ConnectionConfig`](crate::models::ConnectionConfig)). The harness builds
//! that object from an optional JSON file, overlaid with CLI arguments and
//! environment variables.

use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CREDENTIAL_TTL_SECS: u32 = 3600;
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_GENERATED_PASSWORD_LENGTH: usize = 24;

/// Operation run by the harness.
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Initialize with connection verification and print the masked DSN
    Verify,

    /// Initialize and create one user from the given creation statements
    CreateUser {
        /// Creation statement; may be repeated, and may hold several
        /// `;`-separated queries, a JSON array or base64
        #[arg(short, long = "statement", value_name = "SQL", required = true)]
        statements: Vec<String>,

        /// Display name fed to the username template
        #[arg(long, default_value = "")]
        display_name: String,

        /// Role name fed to the username template
        #[arg(long, default_value = "")]
        role_name: String,

        /// Password for the new user (random when omitted)
        #[arg(long, env = "YB_PLUGIN_NEW_USER_PASSWORD")]
        password: Option<String>,

        /// Credential lifetime in seconds, used for `{{expiration}}`
        #[arg(long, default_value_t = DEFAULT_CREDENTIAL_TTL_SECS)]
        ttl: u32,
    },
}

/// Configuration for the YugabyteDB plugin harness.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "yugabyte-dbplugin",
    about = "Dynamic credential plugin for YugabyteDB - verifies connections and provisions users",
    version,
    author
)]
pub struct Config {
    /// JSON file with the plugin configuration object
    #[arg(short = 'c', long = "config", value_name = "FILE", env = "YB_PLUGIN_CONFIG")]
    pub config_file: Option<PathBuf>,

    /// Database host
    #[arg(long, env = "YB_PLUGIN_HOST")]
    pub host: Option<String>,

    /// Database port (YSQL default: 5433)
    #[arg(long, env = "YB_PLUGIN_PORT")]
    pub port: Option<u16>,

    /// Administrative username
    #[arg(short, long, env = "YB_PLUGIN_USERNAME")]
    pub username: Option<String>,

    /// Administrative password (sensitive - not logged)
    #[arg(short, long, env = "YB_PLUGIN_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Database name
    #[arg(long, env = "YB_PLUGIN_DB")]
    pub db: Option<String>,

    /// TLS mode (disable, allow, prefer, require, verify-ca, verify-full)
    #[arg(long, env = "YB_PLUGIN_SSLMODE")]
    pub sslmode: Option<String>,

    /// Username template overriding the built-in one
    #[arg(long, env = "YB_PLUGIN_USERNAME_TEMPLATE")]
    pub username_template: Option<String>,

    /// Deadline for the whole operation in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_OPERATION_TIMEOUT_SECS,
        env = "YB_PLUGIN_TIMEOUT"
    )]
    pub timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = DEFAULT_LOG_LEVEL, env = "YB_PLUGIN_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "YB_PLUGIN_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Build the plugin configuration object.
    ///
    /// Keys from the config file come first; any CLI argument that is set
    /// replaces the file's value.
    pub fn plugin_config(&self) -> Result<Map<String, Value>, String> {
        let mut map = match &self.config_file {
            Some(path) => load_config_file(path)?,
            None => Map::new(),
        };

        let overrides = [
            ("host", self.host.clone().map(Value::from)),
            ("port", self.port.map(Value::from)),
            ("username", self.username.clone().map(Value::from)),
            ("password", self.password.clone().map(Value::from)),
            ("db", self.db.clone().map(Value::from)),
            ("sslmode", self.sslmode.clone().map(Value::from)),
            (
                "username_template",
                self.username_template.clone().map(Value::from),
            ),
        ];
        for (key, value) in overrides {
            if let Some(value) = value {
                map.insert(key.to_string(), value);
            }
        }
        Ok(map)
    }

    /// Get the operation timeout as a Duration.
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

fn load_config_file(path: &PathBuf) -> Result<Map<String, Value>, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(format!(
            "Config file {} must contain a JSON object",
            path.display()
        )),
        Err(e) => Err(format!("Invalid JSON in {}: {e}", path.display())),
    }
}
