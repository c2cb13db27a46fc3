//! Sink trait and the row checks shared by every destination

use spanmeta_core::{
    AnnotatedRow, CatalogView, DestinationConfig, Disposition, FieldKind, FieldValue, QuerySet,
    RowsWritten,
};
use std::collections::BTreeMap;

/// Errors that can occur when consolidating rows
///
/// These are run-scoped: when a write fails nothing from the run is committed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WriteError {
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Malformed row: {0}")]
    MalformedRow(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl WriteError {
    /// Classify a destination error message
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.contains("Access Denied") || message.contains("Permission") {
            Self::PermissionDenied(message)
        } else if message.contains("quota") || message.contains("Quota") || message.contains("rateLimitExceeded") {
            Self::QuotaExceeded(message)
        } else if message.contains("No such field") || message.contains("Invalid schema") {
            Self::SchemaMismatch(message)
        } else {
            Self::RequestFailed(message)
        }
    }
}

/// Trait for destinations that accept the consolidated rows of a run
#[async_trait::async_trait]
pub trait MetadataSink: Send + Sync {
    /// Get the sink name (e.g., "BigQuery", "Jsonl")
    fn name(&self) -> &'static str;

    /// Write every row of a run in one step
    ///
    /// With `Replace` the destination tables end up holding exactly `rows`;
    /// with `Append` they are added after the existing contents. On error
    /// the destination keeps its prior contents.
    async fn write(
        &self,
        rows: Vec<AnnotatedRow>,
        disposition: Disposition,
    ) -> Result<RowsWritten, WriteError>;

    /// Check that the destination is reachable and writable
    async fn test_connection(&self) -> Result<(), WriteError>;
}

/// Destination table naming and the set of views a sink manages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    table_prefix: String,
    views: Vec<CatalogView>,
}

impl TableLayout {
    pub fn new(table_prefix: impl Into<String>, views: &[CatalogView]) -> Self {
        let mut views = views.to_vec();
        views.sort();
        views.dedup();
        Self {
            table_prefix: table_prefix.into(),
            views,
        }
    }

    pub fn from_config(destination: &DestinationConfig, query_set: &QuerySet) -> Self {
        Self::new(destination.table_prefix.clone(), query_set.views())
    }

    pub fn views(&self) -> &[CatalogView] {
        &self.views
    }

    pub fn table_for(&self, view: CatalogView) -> String {
        format!("{}{}", self.table_prefix, view.as_str())
    }

    pub fn manages(&self, view: CatalogView) -> bool {
        self.views.contains(&view)
    }
}

impl Default for TableLayout {
    fn default() -> Self {
        Self::new("spanner_is_", &CatalogView::ALL)
    }
}

/// A destination column: name, BigQuery type and whether it is REQUIRED
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestinationColumn {
    pub name: &'static str,
    pub bigquery_type: &'static str,
    pub required: bool,
}

/// Provenance columns first, then the view's declared columns
pub fn destination_columns(view: CatalogView) -> Vec<DestinationColumn> {
    let provenance = [
        ("source_project", "STRING"),
        ("source_instance", "STRING"),
        ("source_database", "STRING"),
        ("extracted_at", "TIMESTAMP"),
    ]
    .into_iter()
    .map(|(name, bigquery_type)| DestinationColumn {
        name,
        bigquery_type,
        required: true,
    });

    let declared = view.columns().iter().map(|c| DestinationColumn {
        name: c.name,
        bigquery_type: c.kind.bigquery_type(),
        required: false,
    });

    provenance.chain(declared).collect()
}

fn value_fits(value: &FieldValue, kind: FieldKind) -> bool {
    matches!(
        (value, kind),
        (FieldValue::Null, _)
            | (FieldValue::String(_), FieldKind::String)
            | (FieldValue::Int64(_), FieldKind::Int64)
            | (FieldValue::Bool(_), FieldKind::Bool)
    )
}

/// Check every row and group them by managed view
///
/// Each managed view gets an entry, possibly empty, so that `Replace` also
/// clears tables the run produced no rows for.
pub fn partition_rows<'a>(
    rows: &'a [AnnotatedRow],
    layout: &TableLayout,
) -> Result<BTreeMap<CatalogView, Vec<&'a AnnotatedRow>>, WriteError> {
    let mut groups: BTreeMap<CatalogView, Vec<&AnnotatedRow>> =
        layout.views().iter().map(|v| (*v, Vec::new())).collect();

    for (index, row) in rows.iter().enumerate() {
        if !row.has_provenance() {
            return Err(WriteError::MalformedRow(format!(
                "row {} ({}) is missing provenance",
                index,
                row.view()
            )));
        }

        let view = row.view();
        let Some(group) = groups.get_mut(&view) else {
            return Err(WriteError::SchemaMismatch(format!(
                "row {} belongs to view '{}' which has no destination table",
                index, view
            )));
        };

        for (name, value) in &row.row.fields {
            let column = view.column(name).ok_or_else(|| {
                WriteError::SchemaMismatch(format!(
                    "row {}: '{}' is not a column of {}",
                    index,
                    name,
                    layout.table_for(view)
                ))
            })?;
            if !value_fits(value, column.kind) {
                return Err(WriteError::SchemaMismatch(format!(
                    "row {}: {}.{} expects {}, got {:?}",
                    index,
                    layout.table_for(view),
                    name,
                    column.kind.bigquery_type(),
                    value
                )));
            }
        }

        group.push(row);
    }

    Ok(groups)
}

/// Row counts per destination table, including tables that received none
pub fn rows_written(
    groups: &BTreeMap<CatalogView, Vec<&AnnotatedRow>>,
    layout: &TableLayout,
) -> RowsWritten {
    let mut written = RowsWritten::default();
    for (view, rows) in groups {
        written.add(layout.table_for(*view), rows.len());
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use spanmeta_core::{MetadataRow, Target};

    fn annotated(view: CatalogView, fields: Vec<(&str, FieldValue)>) -> AnnotatedRow {
        let target = Target::new("project-one", "i1", "d1");
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        AnnotatedRow::new(&target, ts, MetadataRow::normalize(view, fields).unwrap())
    }

    #[test]
    fn classifies_destination_errors() {
        assert!(matches!(
            WriteError::from_message("Access Denied: Table p:d.t"),
            WriteError::PermissionDenied(_)
        ));
        assert!(matches!(
            WriteError::from_message("Exceeded rate limits: rateLimitExceeded"),
            WriteError::QuotaExceeded(_)
        ));
        assert!(matches!(
            WriteError::from_message("no such host"),
            WriteError::RequestFailed(_)
        ));
    }

    #[test]
    fn provenance_columns_come_first() {
        let columns = destination_columns(CatalogView::Columns);
        let names: Vec<_> = columns.iter().take(5).map(|c| c.name).collect();
        assert_eq!(
            names,
            vec!["source_project", "source_instance", "source_database", "extracted_at", "table_catalog"]
        );
        assert!(columns[3].required);
        assert_eq!(columns[3].bigquery_type, "TIMESTAMP");
        assert!(!columns[4].required);
    }

    #[test]
    fn partition_includes_every_managed_view() {
        let layout = TableLayout::new("spanner_is_", &[CatalogView::Tables, CatalogView::Columns]);
        let rows = vec![annotated(CatalogView::Tables, vec![("table_name", "Singers".into())])];

        let groups = partition_rows(&rows, &layout).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[&CatalogView::Tables].len(), 1);
        assert!(groups[&CatalogView::Columns].is_empty());

        let written = rows_written(&groups, &layout);
        assert_eq!(written.total, 1);
        assert_eq!(written.tables["spanner_is_columns"], 0);
    }

    #[test]
    fn rejects_rows_without_provenance() {
        let layout = TableLayout::default();
        let mut row = annotated(CatalogView::Tables, vec![("table_name", "Singers".into())]);
        row.source_database.clear();

        let err = partition_rows(&[row], &layout).unwrap_err();
        assert!(matches!(err, WriteError::MalformedRow(_)));
    }

    #[test]
    fn rejects_unmanaged_view_and_undeclared_fields() {
        let layout = TableLayout::new("spanner_is_", &[CatalogView::Tables]);
        let row = annotated(CatalogView::Columns, vec![("column_name", "id".into())]);
        assert!(matches!(
            partition_rows(&[row], &layout),
            Err(WriteError::SchemaMismatch(_))
        ));

        let mut row = annotated(CatalogView::Tables, vec![("table_name", "Singers".into())]);
        row.row.fields.insert("shard".into(), FieldValue::Int64(3));
        assert!(matches!(
            partition_rows(&[row], &TableLayout::default()),
            Err(WriteError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn rejects_values_of_the_wrong_kind() {
        let mut row = annotated(CatalogView::Columns, vec![("column_name", "id".into())]);
        row.row.fields.insert("ordinal_position".into(), FieldValue::from("first"));

        let err = partition_rows(&[row], &TableLayout::default()).unwrap_err();
        assert!(err.to_string().contains("ordinal_position"));
    }
}
