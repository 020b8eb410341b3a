//! Data models for the YugabyteDB plugin.
//!
//! This module re-exports all model types used throughout the application.

pub mod connection;
pub mod request;

// Re-export commonly used types
pub use connection::{
    ConnectionConfig, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_MAX_OPEN_CONNECTIONS, DEFAULT_PORT,
    DEFAULT_SSL_MODE,
};
pub use request::{
    DeleteUserRequest, DeleteUserResponse, InitializeRequest, InitializeResponse, NewUserRequest,
    NewUserResponse, Statements, UpdateUserRequest, UpdateUserResponse, UsernameMetadata,
};
