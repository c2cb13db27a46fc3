//! Row annotation

use chrono::{DateTime, Utc};
use spanmeta_core::{AnnotatedRow, MetadataRow, Target};

/// Tag every row with the target it came from and the run timestamp
///
/// Order and count are preserved.
pub fn annotate(target: &Target, rows: Vec<MetadataRow>, run_timestamp: DateTime<Utc>) -> Vec<AnnotatedRow> {
    rows.into_iter()
        .map(|row| AnnotatedRow::new(target, run_timestamp, row))
        .collect()
}
