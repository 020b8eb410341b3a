//! YugabyteDB plugin harness - Main entry point.
//!
//! Drives the plugin core from the command line: verify a connection
//! configuration, or provision one user from creation statements.

use chrono::Utc;
use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use yugabyte_dbplugin::config::{Command, Config, DEFAULT_GENERATED_PASSWORD_LENGTH};
use yugabyte_dbplugin::db::RequestContext;
use yugabyte_dbplugin::models::{InitializeRequest, NewUserRequest, Statements, UsernameMetadata};
use yugabyte_dbplugin::{DbError, DbResult, YugabyteDb};

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr so stdout only carries command output.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn generate_password() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(DEFAULT_GENERATED_PASSWORD_LENGTH)
        .map(char::from)
        .collect()
}

async fn run(config: &Config, plugin: &YugabyteDb, ctx: &RequestContext) -> DbResult<()> {
    let plugin_config = config
        .plugin_config()
        .map_err(DbError::config)?;

    match &config.command {
        Command::Verify => {
            plugin
                .initialize(
                    ctx,
                    InitializeRequest {
                        config: plugin_config,
                        verify_connection: true,
                    },
                )
                .await?;
            let dsn = plugin
                .producer()
                .config()
                .await
                .map(|c| c.masked_connection_string())
                .unwrap_or_default();
            println!("connection verified: {dsn}");
        }
        Command::CreateUser {
            statements,
            display_name,
            role_name,
            password,
            ttl,
        } => {
            plugin
                .initialize(
                    ctx,
                    InitializeRequest {
                        config: plugin_config,
                        verify_connection: false,
                    },
                )
                .await?;

            let ttl = chrono::Duration::seconds(i64::from(*ttl));
            let request = NewUserRequest {
                username_config: UsernameMetadata::new(display_name.clone(), role_name.clone()),
                statements: Statements::new(statements.iter().cloned()),
                password: password.clone().unwrap_or_else(generate_password),
                expiration: Utc::now() + ttl,
            };
            let response = plugin.new_user(ctx, request).await?;
            println!("{}", response.username);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    // Initialize logging
    init_tracing(&config);

    info!(
        timeout_secs = config.timeout,
        "Starting yugabyte-dbplugin v{}",
        env!("CARGO_PKG_VERSION")
    );

    let plugin = YugabyteDb::new();
    let ctx = RequestContext::with_timeout(config.timeout_duration());

    let result = run(&config, &plugin, &ctx).await;

    if let Err(e) = plugin.producer().close().await {
        error!(error = %e, "Failed to close database handle");
    }

    if let Err(e) = result {
        let message = plugin.redact(&e.to_string()).await;
        error!(error = %message, "Operation failed");
        if let Some(suggestion) = e.suggestion() {
            eprintln!("Error: {message}\nSuggestion: {suggestion}");
        } else {
            eprintln!("Error: {message}");
        }
        std::process::exit(1);
    }

    Ok(())
}
