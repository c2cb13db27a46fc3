//! Metadata sources for Spanner catalog harvesting
//!
//! A source opens one session against a target database, runs the fixed
//! query set over its INFORMATION_SCHEMA views and returns normalized rows.
//!
//! ## Features
//!
//! Enable database support via Cargo features:
//! - `spanner` - Cloud Spanner support (google-cloud-spanner)
//!
//! ## Example
//!
//! ```rust,ignore
//! use spanmeta_catalog::{MetadataSource, SpannerSource};
//! use spanmeta_core::{QuerySet, Target};
//!
//! let source = SpannerSource::new(QuerySet::default());
//! let target = Target::new("my-project", "my-instance", "my-database");
//! let rows = source.extract(&target).await?;
//! ```

pub mod source;
pub mod spanner;
pub mod mock;
pub mod session;

pub use source::{MetadataSource, ExtractError};
pub use spanner::SpannerSource;
pub use mock::{MockSource, MockSourceBuilder};
pub use session::SessionGuard;
