//! Connection-related data models.
//!
//! This module defines the typed plugin connection configuration decoded from the
//! untyped key/value map handed over by the host, and the helpers that turn it
//! into driver options and a libpq-style connection string.

use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use std::str::FromStr;

/// Default YSQL port.
pub const DEFAULT_PORT: u16 = 5433;
/// Transport security is disabled unless the configuration asks for it.
pub const DEFAULT_SSL_MODE: &str = "disable";
pub const DEFAULT_MAX_OPEN_CONNECTIONS: u32 = 4;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Typed connection configuration.
///
/// Decoded with weak typing: numbers may arrive as strings and strings as
/// numbers, matching what the host platform sends for loosely typed fields.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default, deserialize_with = "weak::string")]
    pub host: String,
    #[serde(default, deserialize_with = "weak::opt_u16")]
    pub port: Option<u16>,
    #[serde(default, deserialize_with = "weak::string")]
    pub username: String,
    /// Contains sensitive data - never log
    #[serde(default, skip_serializing, deserialize_with = "weak::string")]
    pub password: String,
    #[serde(rename = "db", default, deserialize_with = "weak::string")]
    pub database: String,
    #[serde(default = "default_ssl_mode", deserialize_with = "weak::string")]
    pub sslmode: String,
    #[serde(default, deserialize_with = "weak::opt_u32")]
    pub max_open_connections: Option<u32>,
    /// Seconds to wait when establishing a connection.
    #[serde(default, deserialize_with = "weak::opt_u64")]
    pub connect_timeout: Option<u64>,
}

fn default_ssl_mode() -> String {
    DEFAULT_SSL_MODE.to_string()
}

impl ConnectionConfig {
    /// Decode a configuration from the raw map supplied at initialization.
    ///
    /// Unknown keys (such as `username_template`) are ignored here.
    pub fn from_map(raw: &Map<String, Value>) -> DbResult<Self> {
        serde_json::from_value(Value::Object(raw.clone()))
            .map_err(|e| DbError::config(format!("failed to decode configuration: {e}")))
    }

    /// Check that every field required to reach the database is present.
    pub fn validate(&self) -> DbResult<()> {
        if self.host.is_empty() {
            return Err(DbError::config("host cannot be empty"));
        }
        if self.username.is_empty() {
            return Err(DbError::config("username cannot be empty"));
        }
        if self.password.is_empty() {
            return Err(DbError::config("password cannot be empty"));
        }
        self.ssl_mode()?;
        if self.max_open_connections == Some(0) {
            return Err(DbError::config(
                "max_open_connections must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Port, falling back to the YSQL default when unset or zero.
    pub fn port_or_default(&self) -> u16 {
        match self.port {
            Some(port) if port != 0 => port,
            _ => DEFAULT_PORT,
        }
    }

    pub fn max_open_connections_or_default(&self) -> u32 {
        self.max_open_connections
            .unwrap_or(DEFAULT_MAX_OPEN_CONNECTIONS)
    }

    pub fn connect_timeout_or_default(&self) -> u64 {
        self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS)
    }

    /// Parse the configured sslmode.
    pub fn ssl_mode(&self) -> DbResult<PgSslMode> {
        let mode = if self.sslmode.is_empty() {
            DEFAULT_SSL_MODE
        } else {
            self.sslmode.as_str()
        };
        PgSslMode::from_str(mode)
            .map_err(|_| DbError::config(format!("unsupported sslmode: {mode}")))
    }

    /// Get a display-safe version of the connection string (password masked).
    ///
    /// The driver is configured through [`connect_options`](Self::connect_options),
    /// so the real password is never rendered into a string.
    pub fn masked_connection_string(&self) -> String {
        let sslmode = if self.sslmode.is_empty() {
            DEFAULT_SSL_MODE
        } else {
            self.sslmode.as_str()
        };
        format!(
            "host={} port={} user={} password=*** dbname={} sslmode={}",
            self.host,
            self.port_or_default(),
            self.username,
            self.database,
            sslmode
        )
    }

    /// Build driver connect options. No network I/O happens here.
    pub fn connect_options(&self) -> DbResult<PgConnectOptions> {
        let mut options = PgConnectOptions::new_without_pgpass()
            .host(&self.host)
            .port(self.port_or_default())
            .username(&self.username)
            .password(&self.password)
            .ssl_mode(self.ssl_mode()?)
            .application_name("yugabyte-dbplugin");
        if !self.database.is_empty() {
            options = options.database(&self.database);
        }
        Ok(options)
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("database", &self.database)
            .field("sslmode", &self.sslmode)
            .field("max_open_connections", &self.max_open_connections)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Weakly typed field decoders.
mod weak {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(String::new()),
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(D::Error::custom(format!(
                "expected a string, got {other}"
            ))),
        }
    }

    pub fn opt_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(None),
            Value::Number(n) => n
                .as_u64()
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("expected an unsigned integer, got {n}"))),
            Value::String(s) if s.trim().is_empty() => Ok(None),
            Value::String(s) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| D::Error::custom(format!("cannot parse '{s}' as an integer"))),
            other => Err(D::Error::custom(format!(
                "expected an integer, got {other}"
            ))),
        }
    }

    pub fn opt_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
        opt_u64(deserializer)?
            .map(|v| u32::try_from(v).map_err(|_| D::Error::custom(format!("{v} is out of range"))))
            .transpose()
    }

    pub fn opt_u16<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u16>, D::Error> {
        opt_u64(deserializer)?
            .map(|v| u16::try_from(v).map_err(|_| D::Error::custom(format!("{v} is out of range"))))
            .transpose()
    }
}
