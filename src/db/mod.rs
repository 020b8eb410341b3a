//! Database layer.
//!
//! This module provides database access functionality:
//! - Connection lifecycle management (lazy, health-checked, self-healing handle)
//! - Deadline propagation for every network call
//! - Statement template splitting and substitution
//! - Transactional user provisioning

pub mod context;
pub mod producer;
pub mod provision;
pub mod statement;

pub use context::RequestContext;
pub use producer::{ConnectionProducer, Connector, PgConnector};
pub use provision::create_user;
pub use statement::{EXPIRATION_FORMAT, StatementContext, format_expiration, remove_empty};
