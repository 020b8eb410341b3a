//! Request and response types for the plugin operations.
//!
//! These mirror the call contract of the hosting harness: plain data in,
//! plain data out, with no knowledge of how the calls are transported.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Input for `initialize`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitializeRequest {
    /// Untyped configuration (host, port, username, password, db, username_template, ...)
    pub config: Map<String, Value>,
    /// If true, open a connection and ping it before returning.
    #[serde(default)]
    pub verify_connection: bool,
}

/// Output from `initialize`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitializeResponse {
    /// The configuration as it should be persisted by the host.
    pub config: Map<String, Value>,
}

/// Per-request metadata fed into the username template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsernameMetadata {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub role_name: String,
}

impl UsernameMetadata {
    pub fn new(display_name: impl Into<String>, role_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            role_name: role_name.into(),
        }
    }
}

/// SQL statement templates supplied by a role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Statements {
    /// Each entry may hold several `;`-separated statements.
    #[serde(default)]
    pub commands: Vec<String>,
}

impl Statements {
    pub fn new<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            commands: commands.into_iter().map(Into::into).collect(),
        }
    }
}

/// Input for `new_user`.
#[derive(Clone, Serialize, Deserialize)]
pub struct NewUserRequest {
    pub username_config: UsernameMetadata,
    pub statements: Statements,
    /// Password for the new account. Sensitive - never log
    pub password: String,
    /// When the account stops being valid.
    pub expiration: DateTime<Utc>,
}

impl std::fmt::Debug for NewUserRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewUserRequest")
            .field("username_config", &self.username_config)
            .field("statements", &self.statements)
            .field("password", &"***")
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Output from `new_user`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUserResponse {
    pub username: String,
}

/// Input for `update_user`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateUserRequest {
    pub username: String,
    #[serde(default)]
    pub expiration: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateUserResponse {}

/// Input for `delete_user`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteUserRequest {
    pub username: String,
    #[serde(default)]
    pub statements: Statements,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteUserResponse {}
