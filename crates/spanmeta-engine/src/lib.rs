//! spanmeta engine - harvest pipeline
//!
//! This crate wires sources and sinks into a run:
//! - Row annotation with provenance
//! - Retry wrapper for sources
//! - Run orchestration and reporting

pub mod annotator;
pub mod harvester;
pub mod retry;

pub use annotator::annotate;
pub use harvester::{HarvestContext, HarvestOptions, Harvester};
pub use retry::{RetryPolicy, RetryingSource};
