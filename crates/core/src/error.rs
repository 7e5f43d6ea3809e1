//! Error types for the docuchat domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.
//!
//! Budget rejections are deliberately NOT represented here: declining to add
//! a document to the selection set is a normal outcome surfaced to the user,
//! not a failure (see `docuchat-context`).

use thiserror::Error;

/// The top-level error type for all docuchat operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Persistence errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Ingestion errors ---
    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    // --- Session errors ---
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("File is not valid UTF-8 text: {0}")]
    NotText(String),

    #[error("Empty upload: {0}")]
    EmptyUpload(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("A send is already in flight for this chat")]
    Busy,

    #[error("Unknown document in selection: {0}")]
    UnknownDocument(String),

    #[error("Selection exceeds the context budget ({total} > {budget})")]
    OverBudget { total: usize, budget: usize },

    #[error("Empty message")]
    EmptyMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn session_error_displays_correctly() {
        let err = Error::Session(SessionError::OverBudget {
            total: 110,
            budget: 100,
        });
        assert!(err.to_string().contains("110"));
        assert!(err.to_string().contains("100"));
    }

    #[test]
    fn store_not_found_displays_id() {
        let err = Error::Store(StoreError::NotFound("chat_42".into()));
        assert!(err.to_string().contains("chat_42"));
    }
}
