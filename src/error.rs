//! Error types for the dispatch engine.

use uuid::Uuid;

use crate::lifecycle::ExecutionStatus;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Usage tracking error: {0}")]
    Usage(#[from] UsageError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Completion provider errors.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("No provider registered under name {name}")]
    Unavailable { name: String },

    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("All providers failed: {last_error}")]
    AllFailed { last_error: String },
}

/// Worker selection errors.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("No active worker satisfies capabilities [{required}]")]
    NoWorkerAvailable { required: String },
}

/// Execution lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Execution {id} not found")]
    NotFound { id: Uuid },

    #[error("Execution {id} cannot transition from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: ExecutionStatus,
        to: ExecutionStatus,
    },
}

/// Usage tracking errors.
#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("Usage tracking failed: {0}")]
    Failed(String),
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
