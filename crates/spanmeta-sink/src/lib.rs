//! Consolidation sinks for harvested catalog rows
//!
//! A sink receives every annotated row of a run at once and commits them to
//! one destination table per catalog view, named `{table_prefix}{view}`.
//! Every destination table starts with the provenance columns
//! (`source_project`, `source_instance`, `source_database`, `extracted_at`).
//!
//! ## Features
//!
//! - `bigquery` - BigQuery destination (gcp-bigquery-client)
//!
//! ## Example
//!
//! ```rust,ignore
//! use spanmeta_sink::{JsonlSink, MetadataSink, TableLayout};
//! use spanmeta_core::Disposition;
//!
//! let sink = JsonlSink::new("out/", TableLayout::default());
//! let written = sink.write(rows, Disposition::Replace).await?;
//! ```

pub mod sink;
pub mod bigquery;
pub mod jsonl;
pub mod memory;

pub use sink::{
    destination_columns, partition_rows, DestinationColumn, MetadataSink, TableLayout, WriteError,
};
pub use bigquery::BigQuerySink;
pub use jsonl::JsonlSink;
pub use memory::MemorySink;
