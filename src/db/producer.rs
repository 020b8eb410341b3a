//! Connection lifecycle management.
//!
//! The producer owns the plugin's connection configuration and a single, lazily
//! created database handle. Callers always get either a handle that just passed
//! a liveness probe or a clear error.
//!
//! # Concurrency
//!
//! One `tokio::sync::Mutex` guards the configuration, the initialized flag and
//! the cached handle. It is held for the whole decide-reuse-or-reopen sequence
//! in [`ConnectionProducer::connection`], and never while callers run queries:
//! the returned handle is a clone of a pool that supports concurrent
//! transactions on its own.
//!
//! A failed probe triggers exactly one reopen for that call. There is no retry
//! loop and no background refresh.

use crate::db::context::RequestContext;
use crate::error::{DbError, DbResult};
use crate::models::ConnectionConfig;
use serde_json::{Map, Value};
use sqlx::Connection;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Opens, probes and closes database handles.
///
/// The production implementation is [`PgConnector`]; the trait exists so the
/// lifecycle policy can be driven without a live server.
pub trait Connector: Clone + Send + Sync + 'static {
    type Handle: Clone + Send + Sync + 'static;

    /// Create a handle for `config`. Must not perform network I/O.
    fn open(&self, config: &ConnectionConfig) -> DbResult<Self::Handle>;

    /// Liveness probe.
    fn ping(&self, handle: &Self::Handle) -> impl Future<Output = DbResult<()>> + Send;

    /// Release the handle's resources.
    fn close(&self, handle: Self::Handle) -> impl Future<Output = ()> + Send;
}

/// Connector backed by a lazily connecting `PgPool`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnector;

impl Connector for PgConnector {
    type Handle = PgPool;

    fn open(&self, config: &ConnectionConfig) -> DbResult<PgPool> {
        let options = config.connect_options()?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_open_connections_or_default())
            .acquire_timeout(Duration::from_secs(config.connect_timeout_or_default()))
            .test_before_acquire(true)
            .connect_lazy_with(options);
        Ok(pool)
    }

    async fn ping(&self, pool: &PgPool) -> DbResult<()> {
        let mut conn = pool
            .acquire()
            .await
            .map_err(|e| DbError::from_pool(e, pool.options().get_acquire_timeout()))?;
        conn.ping().await?;
        Ok(())
    }

    async fn close(&self, pool: PgPool) {
        pool.close().await;
    }
}

struct ConnectionState<H> {
    initialized: bool,
    config: Option<ConnectionConfig>,
    raw_config: Map<String, Value>,
    handle: Option<H>,
}

/// Lazily connects, health-checks and reuses a single database handle.
pub struct ConnectionProducer<C: Connector = PgConnector> {
    connector: C,
    state: Mutex<ConnectionState<C::Handle>>,
}

impl ConnectionProducer<PgConnector> {
    pub fn new() -> Self {
        Self::with_connector(PgConnector)
    }
}

impl Default for ConnectionProducer<PgConnector> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connector> ConnectionProducer<C> {
    pub fn with_connector(connector: C) -> Self {
        Self {
            connector,
            state: Mutex::new(ConnectionState {
                initialized: false,
                config: None,
                raw_config: Map::new(),
                handle: None,
            }),
        }
    }

    /// Decode and validate `raw`, then mark the producer initialized.
    ///
    /// Initialization does not touch the network unless `verify_connection` is
    /// set, in which case a connection is acquired and pinged. On a validation
    /// failure the previous state is left untouched. Returns the raw
    /// configuration echo.
    pub async fn initialize(
        &self,
        ctx: &RequestContext,
        raw: &Map<String, Value>,
        verify_connection: bool,
    ) -> DbResult<Map<String, Value>> {
        let mut state = self.state.lock().await;

        let config = ConnectionConfig::from_map(raw)?;
        config.validate()?;

        // A handle opened for a different configuration must not be reused.
        if state.config.as_ref() != Some(&config) {
            if let Some(stale) = state.handle.take() {
                debug!("Configuration changed, discarding existing handle");
                self.discard(stale);
            }
        }

        state.raw_config = raw.clone();
        state.config = Some(config);
        // The connection can be established later; all required fields are set.
        state.initialized = true;

        info!(
            dsn = %state.config.as_ref().map(|c| c.masked_connection_string()).unwrap_or_default(),
            verify_connection,
            "Connection producer initialized"
        );

        if verify_connection {
            let handle = self
                .connection_locked(&mut state, ctx)
                .await
                .map_err(|e| e.context("error verifying connection"))?;
            ctx.run("ping", self.connector.ping(&handle))
                .await
                .map_err(|e| e.context("error verifying connection"))?;
            info!("Connection verified");
        }

        Ok(state.raw_config.clone())
    }

    /// Get a live handle, reusing the cached one when it answers a ping.
    pub async fn connection(&self, ctx: &RequestContext) -> DbResult<C::Handle> {
        let mut state = self.state.lock().await;
        self.connection_locked(&mut state, ctx).await
    }

    async fn connection_locked(
        &self,
        state: &mut ConnectionState<C::Handle>,
        ctx: &RequestContext,
    ) -> DbResult<C::Handle> {
        if !state.initialized {
            return Err(DbError::NotInitialized);
        }

        if let Some(handle) = state.handle.clone() {
            match ctx.run("ping", self.connector.ping(&handle)).await {
                Ok(()) => {
                    debug!("Reusing cached database handle");
                    return Ok(handle);
                }
                // The caller ran out of time; the handle is not known to be dead.
                Err(e) if ctx.is_expired() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "Cached database handle failed health check, reopening");
                    state.handle = None;
                    self.discard(handle);
                }
            }
        }

        let config = state.config.as_ref().ok_or(DbError::NotInitialized)?;
        let handle = self
            .connector
            .open(config)
            .map_err(|e| e.context("failed to open database handle"))?;
        info!(dsn = %config.masked_connection_string(), "Opened database handle");

        state.handle = Some(handle.clone());
        Ok(handle)
    }

    /// Close a replaced handle in the background, ignoring the outcome.
    ///
    /// Closing a pool waits for checked-out connections, so it must not run
    /// while the state lock is held.
    fn discard(&self, handle: C::Handle) {
        let connector = self.connector.clone();
        tokio::spawn(async move { connector.close(handle).await });
    }

    /// Close the cached handle, if any. Calling this more than once is fine.
    ///
    /// The handle is detached under the lock and closed after releasing it, so
    /// callers waiting for a connection are not stalled by in-flight work.
    pub async fn close(&self) -> DbResult<()> {
        let handle = self.state.lock().await.handle.take();
        if let Some(handle) = handle {
            self.connector.close(handle).await;
            info!("Database handle closed");
        }
        Ok(())
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.initialized
    }

    /// Current typed configuration, if initialized.
    pub async fn config(&self) -> Option<ConnectionConfig> {
        self.state.lock().await.config.clone()
    }

    /// The raw configuration last accepted by `initialize`.
    pub async fn raw_config(&self) -> Map<String, Value> {
        self.state.lock().await.raw_config.clone()
    }

    /// Literal values that must be scrubbed from outgoing error text.
    pub async fn secret_values(&self) -> HashMap<String, String> {
        let state = self.state.lock().await;
        let mut secrets = HashMap::new();
        if let Some(config) = &state.config {
            if !config.password.is_empty() {
                secrets.insert(config.password.clone(), "[password]".to_string());
            }
            if !config.username.is_empty() {
                secrets.insert(config.username.clone(), "[username]".to_string());
            }
        }
        secrets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn test_connection_before_initialize() {
        let producer = ConnectionProducer::new();
        let result = producer.connection(&RequestContext::background()).await;
        assert!(matches!(result, Err(DbError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_initialize_without_verify_is_offline() {
        let producer = ConnectionProducer::new();
        let conf = raw(json!({
            "host": "127.0.0.1", "port": 1, "username": "u", "password": "p"
        }));
        let echo = producer
            .initialize(&RequestContext::background(), &conf, false)
            .await
            .unwrap();
        assert_eq!(echo, conf);
        assert!(producer.is_initialized().await);
    }

    #[tokio::test]
    async fn test_secret_values() {
        let producer = ConnectionProducer::new();
        let conf = raw(json!({"host": "h", "username": "admin", "password": "s3cret"}));
        producer
            .initialize(&RequestContext::background(), &conf, false)
            .await
            .unwrap();
        let secrets = producer.secret_values().await;
        assert_eq!(secrets.get("s3cret").map(String::as_str), Some("[password]"));
        assert_eq!(secrets.get("admin").map(String::as_str), Some("[username]"));
    }

    #[tokio::test]
    async fn test_close_without_handle() {
        let producer = ConnectionProducer::new();
        assert!(producer.close().await.is_ok());
        assert!(producer.close().await.is_ok());
    }
}
