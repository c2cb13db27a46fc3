//! Configuration schema (spanmeta.toml)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::catalog::{CatalogView, QuerySet, SchemaFilter};
use crate::target::{Target, TargetRegistry};

/// Destination write mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    /// Truncate the destination tables, then write this run's rows
    #[default]
    Replace,

    /// Add this run's rows as a new snapshot
    Append,
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Replace => write!(f, "replace"),
            Self::Append => write!(f, "append"),
        }
    }
}

impl FromStr for Disposition {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "replace" | "truncate" | "write_truncate" => Ok(Self::Replace),
            "append" | "write_append" => Ok(Self::Append),
            other => Err(ConfigError::Invalid(format!(
                "Unknown disposition '{}'. Expected 'replace' or 'append'",
                other
            ))),
        }
    }
}

/// Destination backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DestinationKind {
    /// Google BigQuery dataset
    #[default]
    BigQuery,

    /// Local newline-delimited JSON files
    Jsonl,
}

/// Where consolidated rows are written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// Destination type
    #[serde(rename = "type", default)]
    pub kind: DestinationKind,

    /// BigQuery project that owns the dataset
    #[serde(default)]
    pub project_id: Option<String>,

    /// BigQuery dataset
    #[serde(default = "default_dataset_id")]
    pub dataset_id: String,

    /// Destination tables are named `{table_prefix}{view}`
    #[serde(default = "default_table_prefix")]
    pub table_prefix: String,

    /// Dataset location used when the dataset is created
    #[serde(default)]
    pub location: Option<String>,

    /// Service account key file; Application Default Credentials when unset
    #[serde(default)]
    pub credentials: Option<PathBuf>,

    /// Output directory for the jsonl destination
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

fn default_dataset_id() -> String {
    "spanner_metadata".to_string()
}

fn default_table_prefix() -> String {
    "spanner_is_".to_string()
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            kind: DestinationKind::default(),
            project_id: None,
            dataset_id: default_dataset_id(),
            table_prefix: default_table_prefix(),
            location: None,
            credentials: None,
            output_dir: None,
        }
    }
}

impl DestinationConfig {
    /// Destination table name for a view
    pub fn table_for(&self, view: CatalogView) -> String {
        format!("{}{}", self.table_prefix, view.as_str())
    }
}

/// Bounded retry with exponential backoff around extraction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per target, including the first (1 = no retry)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound for the delay between attempts
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    1
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Harvest behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Write disposition
    #[serde(default)]
    pub disposition: Disposition,

    /// Catalog views to harvest
    #[serde(default = "default_views")]
    pub views: Vec<CatalogView>,

    /// Harvest named schemas too, not only the default schema
    #[serde(default)]
    pub include_named_schemas: bool,

    /// Per-target extraction timeout
    #[serde(default = "default_target_timeout_secs")]
    pub target_timeout_secs: u64,

    /// Targets extracted at once (1 = sequential)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Retry policy
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_views() -> Vec<CatalogView> {
    CatalogView::ALL.to_vec()
}

fn default_target_timeout_secs() -> u64 {
    300
}

fn default_concurrency() -> usize {
    1
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            disposition: Disposition::default(),
            views: default_views(),
            include_named_schemas: false,
            target_timeout_secs: default_target_timeout_secs(),
            concurrency: default_concurrency(),
            retry: RetryConfig::default(),
        }
    }
}

impl HarvestConfig {
    /// Query set described by this configuration
    pub fn query_set(&self) -> QuerySet {
        QuerySet::new(&self.views, SchemaFilter::from_include_named(self.include_named_schemas))
    }
}

/// Separate targets file (`targets_file = "targets.toml"`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct TargetsFile {
    #[serde(default)]
    targets: Vec<Target>,
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Destination settings
    #[serde(default)]
    pub destination: DestinationConfig,

    /// Harvest settings
    #[serde(default)]
    pub harvest: HarvestConfig,

    /// Inline target list
    #[serde(default)]
    pub targets: Vec<Target>,

    /// Additional targets loaded from another TOML file, relative to the config file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets_file: Option<PathBuf>,

    /// Project root path (for resolving relative paths)
    #[serde(skip)]
    pub project_root: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            destination: DestinationConfig::default(),
            harvest: HarvestConfig::default(),
            targets: Vec::new(),
            targets_file: None,
            project_root: std::env::current_dir().unwrap_or_default(),
        }
    }
}

impl Config {
    /// Load config from TOML file, including any referenced targets file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        // Set project root to parent of config file
        if let Some(parent) = path.parent() {
            config.project_root = parent.to_path_buf();
        }

        config.load_targets_file()?;
        Ok(config)
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save config to TOML file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, toml)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    fn load_targets_file(&mut self) -> Result<(), ConfigError> {
        let Some(relative) = &self.targets_file else {
            return Ok(());
        };

        let path = self.project_root.join(relative);
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;
        let file: TargetsFile = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))?;

        self.targets.extend(file.targets);
        Ok(())
    }

    /// Apply environment overrides
    ///
    /// - `BQ_PROJECT_ID` sets the destination project
    /// - `SPANMETA_DISPOSITION` sets the write disposition
    /// - `SPANMETA_DATASET_ID` sets the destination dataset
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(project) = lookup("BQ_PROJECT_ID").filter(|v| !v.is_empty()) {
            self.destination.project_id = Some(project);
        }
        if let Some(dataset) = lookup("SPANMETA_DATASET_ID").filter(|v| !v.is_empty()) {
            self.destination.dataset_id = dataset;
        }
        if let Some(disposition) = lookup("SPANMETA_DISPOSITION").filter(|v| !v.is_empty()) {
            self.harvest.disposition = disposition.parse()?;
        }
        Ok(())
    }

    /// Validated target registry
    pub fn registry(&self) -> Result<TargetRegistry, ConfigError> {
        TargetRegistry::new(self.targets.clone())
    }

    /// Check settings that cannot be expressed in the TOML schema
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.harvest.views.is_empty() {
            return Err(ConfigError::Invalid("harvest.views must not be empty".into()));
        }
        if self.harvest.concurrency == 0 {
            return Err(ConfigError::Invalid("harvest.concurrency must be at least 1".into()));
        }
        if self.harvest.target_timeout_secs == 0 {
            return Err(ConfigError::Invalid("harvest.target_timeout_secs must be positive".into()));
        }
        if self.harvest.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("harvest.retry.max_attempts must be at least 1".into()));
        }

        let identifier = regex::Regex::new(r"^[A-Za-z0-9_]+$")
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if !identifier.is_match(&self.destination.dataset_id) {
            return Err(ConfigError::Invalid(format!(
                "destination.dataset_id '{}' may only contain letters, digits and underscores",
                self.destination.dataset_id
            )));
        }
        if !self.destination.table_prefix.is_empty() && !identifier.is_match(&self.destination.table_prefix) {
            return Err(ConfigError::Invalid(format!(
                "destination.table_prefix '{}' may only contain letters, digits and underscores",
                self.destination.table_prefix
            )));
        }

        match self.destination.kind {
            DestinationKind::BigQuery if self.destination.project_id.is_none() => {
                Err(ConfigError::Invalid(
                    "destination.project_id is required for BigQuery (or set BQ_PROJECT_ID)".into(),
                ))
            }
            DestinationKind::Jsonl if self.destination.output_dir.is_none() => Err(
                ConfigError::Invalid("destination.output_dir is required for jsonl".into()),
            ),
            _ => Ok(()),
        }
    }

    /// Starter configuration written by `spanmeta init`
    pub fn starter_toml() -> &'static str {
        STARTER_TOML
    }
}

const STARTER_TOML: &str = r#"# spanmeta configuration

[destination]
type = "bigquery"
project_id = "my-analytics-project"
dataset_id = "spanner_metadata"
table_prefix = "spanner_is_"
# location = "US"
# credentials = "/path/to/service-account.json"

[harvest]
disposition = "replace"
views = ["tables", "columns", "indexes", "index_columns", "table_constraints"]
include_named_schemas = false
target_timeout_secs = 300
concurrency = 1

[harvest.retry]
max_attempts = 1
initial_backoff_ms = 500
max_backoff_ms = 10000

[[targets]]
project_id = "my-project"
instance_id = "my-instance"
database_id = "my-database"
"#;

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Duplicate target: {0}")]
    DuplicateTarget(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
