//! Mock metadata source for testing
//!
//! This source returns predefined catalog rows without connecting to Spanner.
//! It's useful for:
//! - Unit testing the harvest pipeline
//! - Demos without real credentials
//! - Simulating unreachable databases, denied catalog queries and slow targets
//!
//! ## Usage
//!
//! ```rust,ignore
//! use spanmeta_catalog::{MockSource, MetadataSource};
//! use spanmeta_core::Target;
//!
//! let target = Target::new("my-project", "my-instance", "orders");
//! let source = MockSourceBuilder::new()
//!     .with_tables(target.clone(), &["Singers", "Albums"])
//!     .build();
//!
//! let rows = source.extract(&target).await?;
//! ```
//!
//! ## Simulating Failures
//!
//! ```rust,ignore
//! // Unreachable database
//! source.add_error(target, ExtractError::ConnectionError("unreachable".into())).await;
//!
//! // Fails twice, then succeeds
//! source.fail_first(target, 2, ExtractError::ConnectionError("reset".into())).await;
//! ```

use crate::source::{ExtractError, MetadataSource};
use spanmeta_core::{CatalogView, FieldValue, MetadataRow, Target};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Per-target failure injected for a number of attempts
#[derive(Debug, Clone)]
struct TransientFailure {
    remaining: usize,
    error: ExtractError,
}

/// Mock metadata source for testing
///
/// Stores catalog rows in memory keyed by the target's database path.
/// Targets with no rows registered fail like a missing database.
pub struct MockSource {
    /// Predefined rows by database path
    rows: Arc<RwLock<HashMap<String, Vec<MetadataRow>>>>,

    /// Errors returned on every attempt
    errors: Arc<RwLock<HashMap<String, ExtractError>>>,

    /// Errors returned for the first N attempts
    transient: Arc<RwLock<HashMap<String, TransientFailure>>>,

    /// Extraction attempts by database path
    calls: Arc<RwLock<HashMap<String, usize>>>,

    /// Latency by database path (milliseconds)
    latency: Arc<RwLock<HashMap<String, u64>>>,

    /// Latency applied to every target (milliseconds)
    default_latency_ms: u64,
}

impl MockSource {
    /// Create a new mock source with no predefined rows
    pub fn new() -> Self {
        Self {
            rows: Arc::new(RwLock::new(HashMap::new())),
            errors: Arc::new(RwLock::new(HashMap::new())),
            transient: Arc::new(RwLock::new(HashMap::new())),
            calls: Arc::new(RwLock::new(HashMap::new())),
            latency: Arc::new(RwLock::new(HashMap::new())),
            default_latency_ms: 0,
        }
    }

    /// Register rows returned for a target
    pub async fn add_rows(&self, target: &Target, rows: Vec<MetadataRow>) {
        self.rows
            .write()
            .await
            .entry(target.database_path())
            .or_default()
            .extend(rows);
    }

    /// Register an error returned for every extraction of a target
    pub async fn add_error(&self, target: &Target, error: ExtractError) {
        self.errors.write().await.insert(target.database_path(), error);
    }

    /// Fail the first `attempts` extractions of a target, then behave normally
    pub async fn fail_first(&self, target: &Target, attempts: usize, error: ExtractError) {
        self.transient.write().await.insert(
            target.database_path(),
            TransientFailure { remaining: attempts, error },
        );
    }

    /// Delay extraction of one target
    pub async fn set_latency(&self, target: &Target, latency_ms: u64) {
        self.latency.write().await.insert(target.database_path(), latency_ms);
    }

    /// Configure simulated latency for all targets
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.default_latency_ms = latency_ms;
        self
    }

    /// Number of extraction attempts made against a target
    pub async fn call_count(&self, target: &Target) -> usize {
        self.calls
            .read()
            .await
            .get(&target.database_path())
            .copied()
            .unwrap_or(0)
    }

    /// Number of targets with rows registered
    pub async fn target_count(&self) -> usize {
        self.rows.read().await.len()
    }

    async fn simulate_latency(&self, target: &Target) {
        let latency_ms = self
            .latency
            .read()
            .await
            .get(&target.database_path())
            .copied()
            .unwrap_or(self.default_latency_ms);

        if latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(latency_ms)).await;
        }
    }
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MockSource {
    fn clone(&self) -> Self {
        Self {
            rows: Arc::clone(&self.rows),
            errors: Arc::clone(&self.errors),
            transient: Arc::clone(&self.transient),
            calls: Arc::clone(&self.calls),
            latency: Arc::clone(&self.latency),
            default_latency_ms: self.default_latency_ms,
        }
    }
}

#[async_trait::async_trait]
impl MetadataSource for MockSource {
    fn name(&self) -> &'static str {
        "Mock"
    }

    async fn extract(&self, target: &Target) -> Result<Vec<MetadataRow>, ExtractError> {
        let key = target.database_path();
        *self.calls.write().await.entry(key.clone()).or_insert(0) += 1;

        self.simulate_latency(target).await;

        if let Some(error) = self.errors.read().await.get(&key) {
            return Err(error.clone());
        }

        {
            let mut transient = self.transient.write().await;
            if let Some(failure) = transient.get_mut(&key) {
                if failure.remaining > 0 {
                    failure.remaining -= 1;
                    return Err(failure.error.clone());
                }
            }
        }

        self.rows
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or_else(|| ExtractError::ConnectionError(format!("Database not found: {}", key)))
    }
}

/// Builder for creating MockSource with predefined catalogs
///
/// ```rust,ignore
/// let source = MockSourceBuilder::new()
///     .with_tables(target_a, &["Singers", "Albums"])
///     .with_error(target_b, ExtractError::ConnectionError("unreachable".into()))
///     .build();
/// ```
pub struct MockSourceBuilder {
    rows: HashMap<String, Vec<MetadataRow>>,
    errors: HashMap<String, ExtractError>,
    latency_ms: u64,
}

impl MockSourceBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            rows: HashMap::new(),
            errors: HashMap::new(),
            latency_ms: 0,
        }
    }

    /// Add rows for a target
    pub fn with_rows(mut self, target: Target, rows: Vec<MetadataRow>) -> Self {
        self.rows.entry(target.database_path()).or_default().extend(rows);
        self
    }

    /// Add one TABLES row and one COLUMNS row (`id`, INT64, NOT NULL) per table
    pub fn with_tables(self, target: Target, tables: &[&str]) -> Self {
        let rows = tables
            .iter()
            .flat_map(|table| sample_table_rows(table))
            .collect();
        self.with_rows(target, rows)
    }

    /// Add an error for a target
    pub fn with_error(mut self, target: Target, error: ExtractError) -> Self {
        self.errors.insert(target.database_path(), error);
        self
    }

    /// Configure latency
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Build the MockSource
    pub fn build(self) -> MockSource {
        MockSource {
            rows: Arc::new(RwLock::new(self.rows)),
            errors: Arc::new(RwLock::new(self.errors)),
            transient: Arc::new(RwLock::new(HashMap::new())),
            calls: Arc::new(RwLock::new(HashMap::new())),
            latency: Arc::new(RwLock::new(HashMap::new())),
            default_latency_ms: self.latency_ms,
        }
    }
}

impl Default for MockSourceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// TABLES and COLUMNS rows describing a table with a single `id` key column
pub fn sample_table_rows(table: &str) -> Vec<MetadataRow> {
    let tables = MetadataRow::normalize(
        CatalogView::Tables,
        vec![
            ("table_catalog", FieldValue::from("")),
            ("table_schema", FieldValue::from("")),
            ("table_name", FieldValue::from(table)),
            ("table_type", FieldValue::from("BASE TABLE")),
            ("spanner_state", FieldValue::from("COMMITTED")),
        ],
    );
    let columns = MetadataRow::normalize(
        CatalogView::Columns,
        vec![
            ("table_catalog", FieldValue::from("")),
            ("table_schema", FieldValue::from("")),
            ("table_name", FieldValue::from(table)),
            ("column_name", FieldValue::from("id")),
            ("ordinal_position", FieldValue::Int64(1)),
            ("is_nullable", FieldValue::from("NO")),
            ("spanner_type", FieldValue::from("INT64")),
            ("is_generated", FieldValue::from("NEVER")),
            ("spanner_state", FieldValue::from("COMMITTED")),
        ],
    );

    // Both rows only use declared columns with matching kinds
    [tables, columns].into_iter().flatten().collect()
}
