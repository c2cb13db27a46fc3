//! Spanmeta Core
//!
//! Shared domain model for harvesting Spanner INFORMATION_SCHEMA metadata:
//! targets, catalog views and rows, run reports and configuration.
//! Destination column names and report fields are part of the public contract.

pub mod target;
pub mod catalog;
pub mod report;
pub mod config;

pub use target::{Target, TargetRegistry};
pub use catalog::{
    AnnotatedRow, CatalogColumn, CatalogView, FieldKind, FieldValue, MetadataRow, QuerySet,
    SchemaFilter, PROVENANCE_FIELDS, QUERY_SET_VERSION,
};
pub use report::{
    ErrorDetail, ErrorKind, ReportSummary, ReportVersion, RowsWritten, RunReport, RunResult,
    SinkOutcome, TargetStatus,
};
pub use config::{
    Config, ConfigError, DestinationConfig, DestinationKind, Disposition, HarvestConfig,
    RetryConfig,
};
