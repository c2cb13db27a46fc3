//! Cloud Spanner metadata source using INFORMATION_SCHEMA
//!
//! This source reads Spanner's INFORMATION_SCHEMA views (TABLES, COLUMNS,
//! INDEXES, INDEX_COLUMNS, TABLE_CONSTRAINTS). It requires:
//! - spanner.databases.beginReadOnlyTransaction
//! - spanner.databases.select
//! - spanner.sessions.create / spanner.sessions.delete
//!
//! ## Authentication
//!
//! Application Default Credentials:
//! - GOOGLE_APPLICATION_CREDENTIALS environment variable
//! - gcloud CLI default credentials
//! - GCE/GKE metadata service
//!
//! When `SPANNER_EMULATOR_HOST` is set the emulator is used without credentials.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let source = SpannerSource::new(QuerySet::default());
//! let rows = source.extract(&Target::new("my-project", "my-instance", "my-db")).await?;
//! ```
//!
//! Reference: https://cloud.google.com/spanner/docs/information-schema

use crate::source::{ExtractError, MetadataSource};
use spanmeta_core::{CatalogView, MetadataRow, QuerySet, Target};

#[cfg(feature = "spanner")]
use google_cloud_spanner::{
    client::{Client, ClientConfig},
    row::Row,
    statement::Statement,
};

#[cfg(feature = "spanner")]
use spanmeta_core::{FieldKind, FieldValue};

#[cfg(feature = "spanner")]
use crate::session::SessionGuard;

/// Cloud Spanner metadata source
pub struct SpannerSource {
    /// Queries run against every target
    query_set: QuerySet,

    /// Placeholder for when feature is disabled
    #[cfg(not(feature = "spanner"))]
    _phantom: std::marker::PhantomData<()>,
}

impl SpannerSource {
    /// Create a source that runs the given query set
    pub fn new(query_set: QuerySet) -> Self {
        Self {
            query_set,
            #[cfg(not(feature = "spanner"))]
            _phantom: std::marker::PhantomData,
        }
    }

    pub fn query_set(&self) -> &QuerySet {
        &self.query_set
    }

    /// Map a failed RPC on `view` to the extraction taxonomy
    ///
    /// A database or instance that disappears, rejects credentials or cannot be
    /// reached is a connection failure even when it surfaces on the first query.
    pub fn classify_failure(view: &str, message: String) -> ExtractError {
        let connection_markers = [
            "NotFound",
            "Unauthenticated",
            "Unavailable",
            "transport error",
            "Database not found",
            "Instance not found",
            // No session could be created in time, usually a database that
            // rejected or never answered session creation
            "session get time out",
        ];

        if connection_markers.iter().any(|m| message.contains(m)) {
            ExtractError::ConnectionError(message)
        } else {
            ExtractError::query(view, message)
        }
    }

    /// Pool settings for one short-lived catalog session
    ///
    /// With a single channel `Client::new` creates the session eagerly, so a
    /// missing or unauthorized database fails here rather than in a background
    /// task. Spreading `min_opened = 1` over several channels opens none.
    #[cfg(feature = "spanner")]
    pub fn single_session(mut config: ClientConfig) -> ClientConfig {
        config.channel_config.num_channels = 1;
        config.session_config.min_opened = 1;
        config.session_config.max_opened = 1;
        config
    }

    #[cfg(feature = "spanner")]
    async fn open(&self, target: &Target) -> Result<Client, ExtractError> {
        let config = if std::env::var("SPANNER_EMULATOR_HOST").is_ok() {
            ClientConfig::default()
        } else {
            ClientConfig::default().with_auth().await.map_err(|e| {
                ExtractError::ConnectionError(format!(
                    "Failed to authenticate with ADC: {}. \
                     Ensure GOOGLE_APPLICATION_CREDENTIALS is set or run 'gcloud auth application-default login'",
                    e
                ))
            })?
        };

        Client::new(target.database_path(), Self::single_session(config))
            .await
            .map_err(|e| {
                ExtractError::ConnectionError(format!("Failed to open session on {}: {}", target, e))
            })
    }

    #[cfg(feature = "spanner")]
    async fn run_queries(&self, client: &Client) -> Result<Vec<MetadataRow>, ExtractError> {
        let mut tx = client
            .read_only_transaction()
            .await
            .map_err(|e| Self::classify_failure("snapshot", e.to_string()))?;

        let mut rows = Vec::new();
        for (view, sql) in self.query_set.queries() {
            let view_name = view.information_schema_name();
            let mut iter = tx
                .query(Statement::new(sql))
                .await
                .map_err(|e| Self::classify_failure(view_name, e.to_string()))?;

            let before = rows.len();
            while let Some(row) = iter
                .next()
                .await
                .map_err(|e| Self::classify_failure(view_name, e.to_string()))?
            {
                rows.push(Self::read_row(view, &row)?);
            }
            tracing::debug!(view = view_name, rows = rows.len() - before, "read catalog view");
        }

        Ok(rows)
    }

    /// Read one result row; columns arrive in the view's declared order
    #[cfg(feature = "spanner")]
    fn read_row(view: CatalogView, row: &Row) -> Result<MetadataRow, ExtractError> {
        let view_name = view.information_schema_name();
        let mut raw = Vec::with_capacity(view.columns().len());

        for (index, column) in view.columns().iter().enumerate() {
            let value = match column.kind {
                FieldKind::String => row.column::<Option<String>>(index).map(FieldValue::from),
                FieldKind::Int64 => row.column::<Option<i64>>(index).map(FieldValue::from),
                FieldKind::Bool => row.column::<Option<bool>>(index).map(FieldValue::from),
            }
            .map_err(|e| {
                ExtractError::query(view_name, format!("Failed to read {}: {}", column.source, e))
            })?;

            raw.push((column.source, value));
        }

        MetadataRow::normalize(view, raw).map_err(|e| ExtractError::query(view_name, e))
    }
}

impl Default for SpannerSource {
    fn default() -> Self {
        Self::new(QuerySet::default())
    }
}

#[async_trait::async_trait]
impl MetadataSource for SpannerSource {
    fn name(&self) -> &'static str {
        "Spanner"
    }

    #[cfg(feature = "spanner")]
    async fn extract(&self, target: &Target) -> Result<Vec<MetadataRow>, ExtractError> {
        tracing::debug!(
            database = %target,
            views = %describe_views(self.query_set.views()),
            "opening Spanner session"
        );
        let session = SessionGuard::new(self.open(target).await?, |client: Client| async move {
            client.close().await;
        });

        let result = match session.get() {
            Some(client) => self.run_queries(client).await,
            None => Err(ExtractError::ConnectionError(format!(
                "Session on {} was already released",
                target
            ))),
        };

        session.release().await;
        result
    }

    #[cfg(not(feature = "spanner"))]
    async fn extract(&self, _target: &Target) -> Result<Vec<MetadataRow>, ExtractError> {
        Err(ExtractError::ConfigError(
            "Spanner support not compiled. Rebuild with: cargo build --features spanner".to_string()
        ))
    }
}

/// Views harvested by a source, for log lines
pub fn describe_views(views: &[CatalogView]) -> String {
    views
        .iter()
        .map(|v| v.information_schema_name())
        .collect::<Vec<_>>()
        .join(", ")
}
