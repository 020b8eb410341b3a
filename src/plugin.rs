//! Database plugin entry point.
//!
//! [`YugabyteDb`] is what the hosting harness talks to. It composes a
//! [`ConnectionProducer`] for the shared handle and a [`UsernameTemplate`] for
//! identifiers, and runs the provisioning pipeline for each new user. The
//! producer's lock is never exposed here.
//!
//! Lifecycle: uninitialized → initialized. Only user creation is implemented;
//! updating and deleting users and closing the adapter fail with
//! [`DbError::Unimplemented`] so no caller can mistake them for a success.
//! The shared handle is released through [`ConnectionProducer::close`].

use crate::db::{
    ConnectionProducer, Connector, PgConnector, RequestContext, create_user, remove_empty,
};
use crate::error::{DbError, DbResult};
use crate::models::{
    ConnectionConfig, DeleteUserRequest, DeleteUserResponse, InitializeRequest, InitializeResponse, NewUserRequest,
    NewUserResponse, UpdateUserRequest, UpdateUserResponse, UsernameMetadata,
};
use crate::template::{DEFAULT_USERNAME_TEMPLATE, UsernameTemplate};
use serde_json::{Map, Value};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Identifier reported by [`YugabyteDb::db_type`].
pub const YUGABYTE_DB_TYPE: &str = "yugabyte";

/// Configuration key holding the username template.
pub const USERNAME_TEMPLATE_KEY: &str = "username_template";

pub struct YugabyteDb<C: Connector = PgConnector> {
    producer: ConnectionProducer<C>,
    /// Serializes `initialize` so the template and the producer config are
    /// always swapped as a pair.
    init_lock: Mutex<()>,
    /// Uses std::sync::RwLock (not tokio): never held across await points.
    username_producer: RwLock<Option<UsernameTemplate>>,
}

impl YugabyteDb<PgConnector> {
    pub fn new() -> Self {
        Self::with_connector(PgConnector)
    }
}

impl Default for YugabyteDb<PgConnector> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connector> YugabyteDb<C> {
    pub fn with_connector(connector: C) -> Self {
        Self {
            producer: ConnectionProducer::with_connector(connector),
            init_lock: Mutex::new(()),
            username_producer: RwLock::new(None),
        }
    }

    /// Compile the username template, then initialize the connection producer.
    ///
    /// The template is test-generated once so a broken template blocks
    /// initialization instead of failing the first real request.
    pub async fn initialize(
        &self,
        ctx: &RequestContext,
        req: InitializeRequest,
    ) -> DbResult<InitializeResponse> {
        let _init = self.init_lock.lock().await;
        let template_source = username_template_from(&req.config)?;
        debug!(template = %template_source, "Initializing username template");

        let template = UsernameTemplate::compile_validated(&template_source)?;
        // Reject a bad connection config before replacing anything.
        ConnectionConfig::from_map(&req.config)?.validate()?;
        {
            let mut slot = self
                .username_producer
                .write()
                .map_err(|_| DbError::internal("username template lock poisoned"))?;
            *slot = Some(template);
        }

        self.producer
            .initialize(ctx, &req.config, req.verify_connection)
            .await?;

        info!(
            verify_connection = req.verify_connection,
            "YugabyteDB plugin initialized"
        );
        Ok(InitializeResponse { config: req.config })
    }

    /// Source text of the active username template.
    pub fn username_template_source(&self) -> Option<String> {
        self.username_producer
            .read()
            .ok()
            .and_then(|slot| slot.as_ref().map(|t| t.source().to_string()))
    }

    fn generate_username(&self, metadata: &UsernameMetadata) -> DbResult<String> {
        let slot = self
            .username_producer
            .read()
            .map_err(|_| DbError::internal("username template lock poisoned"))?;
        let template = slot.as_ref().ok_or(DbError::NotInitialized)?;
        template
            .generate(metadata)
            .map_err(|e| e.context("failed to generate username"))
    }

    /// Credential rotation is not supported.
    pub async fn update_user(
        &self,
        _ctx: &RequestContext,
        req: UpdateUserRequest,
    ) -> DbResult<UpdateUserResponse> {
        debug!(username = %req.username, "Rejecting update_user");
        Err(DbError::unimplemented("UpdateUser"))
    }

    /// User revocation is not supported.
    pub async fn delete_user(
        &self,
        _ctx: &RequestContext,
        req: DeleteUserRequest,
    ) -> DbResult<DeleteUserResponse> {
        debug!(username = %req.username, "Rejecting delete_user");
        Err(DbError::unimplemented("DeleteUser"))
    }

    pub fn db_type(&self) -> &'static str {
        YUGABYTE_DB_TYPE
    }

    /// Closing the adapter is not supported. Release the shared handle
    /// through [`producer`](Self::producer) instead.
    pub async fn close(&self) -> DbResult<()> {
        debug!("Rejecting close");
        Err(DbError::unimplemented("Close"))
    }

    /// Literal secrets to scrub from error text, mapped to their replacement.
    pub async fn secret_values(&self) -> HashMap<String, String> {
        self.producer.secret_values().await
    }

    /// Replace every known secret in `message`.
    pub async fn redact(&self, message: &str) -> String {
        redact(message, &self.secret_values().await)
    }

    pub async fn is_initialized(&self) -> bool {
        self.producer.is_initialized().await
    }

    /// Access the underlying producer, e.g. to reuse the shared handle.
    pub fn producer(&self) -> &ConnectionProducer<C> {
        &self.producer
    }
}

impl<C: Connector<Handle = PgPool>> YugabyteDb<C> {
    /// Create a database user from the role's creation statements.
    ///
    /// Blank statements are dropped first; if nothing remains the request fails
    /// with [`DbError::EmptyStatement`] before any connection is touched.
    pub async fn new_user(
        &self,
        ctx: &RequestContext,
        req: NewUserRequest,
    ) -> DbResult<NewUserResponse> {
        let statements = remove_empty(&req.statements.commands);
        if statements.is_empty() {
            return Err(DbError::EmptyStatement);
        }

        let username = self.generate_username(&req.username_config)?;

        let pool = self
            .producer
            .connection(ctx)
            .await
            .map_err(|e| e.context("failed to get connection"))?;

        create_user(
            ctx,
            &pool,
            &username,
            &req.password,
            req.expiration,
            &statements,
        )
        .await?;

        info!(
            username = %username,
            role = %req.username_config.role_name,
            expiration = %req.expiration,
            "Created database user"
        );
        Ok(NewUserResponse { username })
    }
}

/// Read `username_template`, falling back to the built-in template.
fn username_template_from(config: &Map<String, Value>) -> DbResult<String> {
    match config.get(USERNAME_TEMPLATE_KEY) {
        None | Some(Value::Null) => Ok(DEFAULT_USERNAME_TEMPLATE.to_string()),
        Some(Value::String(s)) if s.is_empty() => Ok(DEFAULT_USERNAME_TEMPLATE.to_string()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(DbError::config(format!(
            "failed to retrieve {USERNAME_TEMPLATE_KEY}: expected a string, got {other}"
        ))),
    }
}

/// Replace each secret occurring in `message` with its placeholder.
///
/// Longer secrets are replaced first so a secret that contains another one is
/// not left half-masked.
pub fn redact(message: &str, secrets: &HashMap<String, String>) -> String {
    let mut ordered: Vec<(&String, &String)> =
        secrets.iter().filter(|(k, _)| !k.is_empty()).collect();
    ordered.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    ordered
        .into_iter()
        .fold(message.to_string(), |acc, (secret, placeholder)| {
            acc.replace(secret.as_str(), placeholder)
        })
}
