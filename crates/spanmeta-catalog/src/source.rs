//! Metadata source trait for extracting catalog rows

use spanmeta_core::{ErrorDetail, ErrorKind, MetadataRow, Target};
use std::time::Duration;

/// Errors that can occur when extracting metadata from one target
///
/// Every variant is scoped to a single target; none of them should stop a run.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExtractError {
    #[error("Connection failed: {0}")]
    ConnectionError(String),

    #[error("Query failed on {view}: {message}")]
    QueryError { view: String, message: String },

    #[error("Extraction timed out after {0:?}")]
    Timeout(Duration),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ExtractError {
    /// Build a query error for a view
    pub fn query(view: impl Into<String>, message: impl Into<String>) -> Self {
        Self::QueryError {
            view: view.into(),
            message: message.into(),
        }
    }

    /// Report category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectionError(_) => ErrorKind::Connection,
            Self::QueryError { .. } => ErrorKind::Query,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::ConfigError(_) => ErrorKind::Config,
        }
    }

    /// Whether another attempt may succeed
    ///
    /// Permission problems on catalog views and configuration errors are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionError(msg) => !is_permanent_connection_failure(msg),
            Self::Timeout(_) => true,
            Self::QueryError { message, .. } => {
                message.contains("Unavailable") || message.contains("Aborted")
            }
            Self::ConfigError(_) => false,
        }
    }

    /// Convert into the report representation
    pub fn to_detail(&self) -> ErrorDetail {
        ErrorDetail {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

fn is_permanent_connection_failure(message: &str) -> bool {
    ["NotFound", "not found", "PermissionDenied", "Permission denied", "Unauthenticated"]
        .iter()
        .any(|needle| message.contains(needle))
}

/// Trait for sources that can extract catalog metadata from a target database
#[async_trait::async_trait]
pub trait MetadataSource: Send + Sync {
    /// Get the source name (e.g., "Spanner", "Mock")
    fn name(&self) -> &'static str;

    /// Extract every configured catalog view from the target
    ///
    /// Opens one session, runs the query set against one consistent snapshot
    /// and releases the session on every exit path. Rows come back grouped by
    /// view in query-set order.
    async fn extract(&self, target: &Target) -> Result<Vec<MetadataRow>, ExtractError>;
}
