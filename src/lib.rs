//! YugabyteDB dynamic credential plugin library.
//!
//! This library provisions short-lived database users for a secrets-management
//! platform: it generates a unique username from a template and creates the
//! account by running a role's SQL statements in a single transaction, over a
//! shared, health-checked connection.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod plugin;
pub mod template;

pub use config::Config;
pub use error::{DbError, DbResult};
pub use plugin::YugabyteDb;
