//! Catalog views, metadata rows and the versioned query set
//!
//! Every harvested INFORMATION_SCHEMA view has a fixed, normalized column list.
//! Rows from any database are coerced into that shape so rows from different
//! targets can be unioned into one destination table per view.
//!
//! Reference: https://cloud.google.com/spanner/docs/information-schema

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::target::Target;

/// Version of the harvested query set. Bump whenever a query or a column changes.
pub const QUERY_SET_VERSION: u32 = 1;

/// Provenance columns added to every destination row
///
/// Catalog columns must never use these names.
pub const PROVENANCE_FIELDS: [&str; 4] = [
    "source_project",
    "source_instance",
    "source_database",
    "extracted_at",
];

/// Scalar type of a normalized catalog column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Int64,
    Bool,
}

impl FieldKind {
    /// BigQuery standard SQL type name
    pub fn bigquery_type(&self) -> &'static str {
        match self {
            Self::String => "STRING",
            Self::Int64 => "INTEGER",
            Self::Bool => "BOOLEAN",
        }
    }
}

/// A column of a catalog view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogColumn {
    /// Column name in the Spanner view
    pub source: &'static str,

    /// Normalized column name in the destination table
    pub name: &'static str,

    /// Normalized type
    pub kind: FieldKind,
}

const fn col(name: &'static str, kind: FieldKind) -> CatalogColumn {
    CatalogColumn { source: name, name, kind }
}

const fn renamed(source: &'static str, name: &'static str, kind: FieldKind) -> CatalogColumn {
    CatalogColumn { source, name, kind }
}

use self::FieldKind::{Bool, Int64, String as Str};

const TABLES_COLUMNS: &[CatalogColumn] = &[
    col("table_catalog", Str),
    col("table_schema", Str),
    col("table_name", Str),
    col("table_type", Str),
    col("parent_table_name", Str),
    col("on_delete_action", Str),
    col("spanner_state", Str),
    col("row_deletion_policy_expression", Str),
];

const COLUMNS_COLUMNS: &[CatalogColumn] = &[
    col("table_catalog", Str),
    col("table_schema", Str),
    col("table_name", Str),
    col("column_name", Str),
    col("ordinal_position", Int64),
    col("column_default", Str),
    col("is_nullable", Str),
    renamed("spanner_type", "spanner_data_type", Str),
    col("is_generated", Str),
    col("generation_expression", Str),
    col("is_stored", Str),
    col("spanner_state", Str),
];

const INDEXES_COLUMNS: &[CatalogColumn] = &[
    col("table_catalog", Str),
    col("table_schema", Str),
    col("table_name", Str),
    col("index_name", Str),
    col("index_type", Str),
    col("parent_table_name", Str),
    col("is_unique", Bool),
    col("is_null_filtered", Bool),
    col("index_state", Str),
    col("spanner_is_managed", Bool),
];

const INDEX_COLUMNS_COLUMNS: &[CatalogColumn] = &[
    col("table_catalog", Str),
    col("table_schema", Str),
    col("table_name", Str),
    col("index_name", Str),
    col("index_type", Str),
    col("column_name", Str),
    col("ordinal_position", Int64),
    col("column_ordering", Str),
    col("is_nullable", Str),
    renamed("spanner_type", "spanner_data_type", Str),
];

const TABLE_CONSTRAINTS_COLUMNS: &[CatalogColumn] = &[
    col("constraint_catalog", Str),
    col("constraint_schema", Str),
    col("constraint_name", Str),
    col("table_catalog", Str),
    col("table_schema", Str),
    col("table_name", Str),
    col("constraint_type", Str),
    col("is_deferrable", Str),
    col("initially_deferred", Str),
    col("enforced", Str),
];

/// Harvested INFORMATION_SCHEMA view
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogView {
    Tables,
    Columns,
    Indexes,
    IndexColumns,
    TableConstraints,
}

impl CatalogView {
    /// Every view in query-set order
    pub const ALL: [CatalogView; 5] = [
        Self::Tables,
        Self::Columns,
        Self::Indexes,
        Self::IndexColumns,
        Self::TableConstraints,
    ];

    /// Stable lowercase name, also used as destination table suffix
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tables => "tables",
            Self::Columns => "columns",
            Self::Indexes => "indexes",
            Self::IndexColumns => "index_columns",
            Self::TableConstraints => "table_constraints",
        }
    }

    /// INFORMATION_SCHEMA view name
    pub fn information_schema_name(&self) -> &'static str {
        match self {
            Self::Tables => "TABLES",
            Self::Columns => "COLUMNS",
            Self::Indexes => "INDEXES",
            Self::IndexColumns => "INDEX_COLUMNS",
            Self::TableConstraints => "TABLE_CONSTRAINTS",
        }
    }

    /// Normalized columns, in destination order
    pub fn columns(&self) -> &'static [CatalogColumn] {
        match self {
            Self::Tables => TABLES_COLUMNS,
            Self::Columns => COLUMNS_COLUMNS,
            Self::Indexes => INDEXES_COLUMNS,
            Self::IndexColumns => INDEX_COLUMNS_COLUMNS,
            Self::TableConstraints => TABLE_CONSTRAINTS_COLUMNS,
        }
    }

    /// Find a column by its normalized name
    pub fn column(&self, name: &str) -> Option<&'static CatalogColumn> {
        self.columns().iter().find(|c| c.name == name)
    }

    fn order_by(&self) -> &'static str {
        match self {
            Self::Tables => "table_schema, table_name",
            Self::Columns => "table_schema, table_name, ordinal_position",
            Self::Indexes => "table_schema, table_name, index_name",
            Self::IndexColumns => "table_schema, table_name, index_name, ordinal_position",
            Self::TableConstraints => "table_schema, table_name, constraint_name",
        }
    }

    /// Render the SELECT statement for this view
    pub fn query(&self, filter: SchemaFilter) -> String {
        let select_list = self
            .columns()
            .iter()
            .map(|c| c.source)
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "SELECT {} FROM INFORMATION_SCHEMA.{} WHERE {} ORDER BY {}",
            select_list,
            self.information_schema_name(),
            filter.predicate(),
            self.order_by()
        )
    }
}

impl fmt::Display for CatalogView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CatalogView {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|v| v.as_str() == normalized || v.information_schema_name().eq_ignore_ascii_case(&normalized))
            .ok_or_else(|| format!("Unknown catalog view '{}'", s))
    }
}

/// Which schemas of a database are harvested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaFilter {
    /// Only the default (unnamed) schema
    #[default]
    DefaultSchema,

    /// Every user schema, excluding system schemas
    AllUserSchemas,
}

impl SchemaFilter {
    pub fn from_include_named(include_named_schemas: bool) -> Self {
        if include_named_schemas {
            Self::AllUserSchemas
        } else {
            Self::DefaultSchema
        }
    }

    fn predicate(&self) -> &'static str {
        match self {
            Self::DefaultSchema => "table_schema = ''",
            Self::AllUserSchemas => "table_schema NOT IN ('INFORMATION_SCHEMA', 'SPANNER_SYS')",
        }
    }
}

/// The fixed set of queries run against every target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySet {
    views: Vec<CatalogView>,
    filter: SchemaFilter,
}

impl QuerySet {
    /// Build a query set for the given views; duplicates are dropped and order is canonical
    pub fn new(views: &[CatalogView], filter: SchemaFilter) -> Self {
        let mut views = views.to_vec();
        views.sort();
        views.dedup();
        Self { views, filter }
    }

    pub fn views(&self) -> &[CatalogView] {
        &self.views
    }

    pub fn filter(&self) -> SchemaFilter {
        self.filter
    }

    /// (view, SQL) pairs
    pub fn queries(&self) -> Vec<(CatalogView, String)> {
        self.views.iter().map(|v| (*v, v.query(self.filter))).collect()
    }

    /// SHA-256 over the version and rendered SQL, hex encoded
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("v{}\n", QUERY_SET_VERSION).as_bytes());
        for (_, sql) in self.queries() {
            hasher.update(sql.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }
}

impl Default for QuerySet {
    fn default() -> Self {
        Self::new(&CatalogView::ALL, SchemaFilter::default())
    }
}

/// A single catalog value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int64(i64),
    String(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Coerce into the declared kind; `None` when the value cannot be represented
    pub fn coerce(self, kind: FieldKind) -> Option<FieldValue> {
        match (self, kind) {
            (Self::Null, _) => Some(Self::Null),
            (v @ Self::String(_), FieldKind::String) => Some(v),
            (v @ Self::Int64(_), FieldKind::Int64) => Some(v),
            (v @ Self::Bool(_), FieldKind::Bool) => Some(v),
            (Self::Int64(i), FieldKind::String) => Some(Self::String(i.to_string())),
            (Self::Bool(b), FieldKind::String) => Some(Self::String(b.to_string())),
            (Self::String(s), FieldKind::Int64) => s.trim().parse().ok().map(Self::Int64),
            (Self::String(s), FieldKind::Bool) => match s.trim().to_uppercase().as_str() {
                "TRUE" | "YES" => Some(Self::Bool(true)),
                "FALSE" | "NO" => Some(Self::Bool(false)),
                _ => None,
            },
            (Self::Bool(b), FieldKind::Int64) => Some(Self::Int64(i64::from(b))),
            (Self::Int64(_), FieldKind::Bool) => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int64(i) => serde_json::Value::from(*i),
            Self::String(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

/// One row read from a catalog view, in normalized shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRow {
    /// View the row was read from
    pub view: CatalogView,

    /// Normalized column name to value; always holds every declared column
    pub fields: BTreeMap<String, FieldValue>,
}

impl MetadataRow {
    /// Normalize raw catalog fields into the view's shape
    ///
    /// Names are matched case-insensitively against either the Spanner column
    /// name or the normalized name. Undeclared fields are dropped, missing
    /// declared columns become `Null`, and values are coerced to the declared kind.
    pub fn normalize<I, K>(view: CatalogView, raw: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = (K, FieldValue)>,
        K: AsRef<str>,
    {
        let mut fields: BTreeMap<String, FieldValue> = view
            .columns()
            .iter()
            .map(|c| (c.name.to_string(), FieldValue::Null))
            .collect();

        for (key, value) in raw {
            let key = key.as_ref().to_lowercase();
            let Some(column) = view
                .columns()
                .iter()
                .find(|c| c.source == key || c.name == key)
            else {
                continue;
            };

            let coerced = value.clone().coerce(column.kind).ok_or_else(|| {
                format!(
                    "{}.{}: value {:?} is not a valid {:?}",
                    view.information_schema_name(),
                    column.source,
                    value,
                    column.kind
                )
            })?;
            fields.insert(column.name.to_string(), coerced);
        }

        Ok(Self { view, fields })
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Field names that are not declared columns of the row's view
    pub fn undeclared_fields(&self) -> Vec<&str> {
        self.fields
            .keys()
            .filter(|k| self.view.column(k).is_none())
            .map(|k| k.as_str())
            .collect()
    }
}

/// A metadata row tagged with the target and run that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedRow {
    pub source_project: String,
    pub source_instance: String,
    pub source_database: String,
    pub extracted_at: DateTime<Utc>,
    pub row: MetadataRow,
}

impl AnnotatedRow {
    pub fn new(target: &Target, extracted_at: DateTime<Utc>, row: MetadataRow) -> Self {
        Self {
            source_project: target.project_id.clone(),
            source_instance: target.instance_id.clone(),
            source_database: target.database_id.clone(),
            extracted_at,
            row,
        }
    }

    pub fn view(&self) -> CatalogView {
        self.row.view
    }

    /// True when every provenance string is non-empty
    pub fn has_provenance(&self) -> bool {
        !self.source_project.is_empty()
            && !self.source_instance.is_empty()
            && !self.source_database.is_empty()
    }

    /// Provenance columns followed by catalog columns, as one flat JSON object
    pub fn to_json(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        object.insert("source_project".into(), self.source_project.clone().into());
        object.insert("source_instance".into(), self.source_instance.clone().into());
        object.insert("source_database".into(), self.source_database.clone().into());
        object.insert(
            "extracted_at".into(),
            self.extracted_at.to_rfc3339_opts(SecondsFormat::Micros, true).into(),
        );
        for (name, value) in &self.row.fields {
            object.insert(name.clone(), value.to_json());
        }
        serde_json::Value::Object(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn catalog_columns_never_collide_with_provenance() {
        for view in CatalogView::ALL {
            for column in view.columns() {
                assert!(
                    !PROVENANCE_FIELDS.contains(&column.name),
                    "{}.{} collides with a provenance field",
                    view,
                    column.name
                );
            }
        }
    }

    #[test]
    fn column_query_matches_default_schema() {
        let sql = CatalogView::Columns.query(SchemaFilter::DefaultSchema);
        assert!(sql.starts_with("SELECT table_catalog, table_schema, table_name, column_name"));
        assert!(sql.contains("spanner_type"));
        assert!(sql.contains("FROM INFORMATION_SCHEMA.COLUMNS WHERE table_schema = ''"));
        assert!(sql.ends_with("ORDER BY table_schema, table_name, ordinal_position"));
    }

    #[test]
    fn named_schema_filter_excludes_system_schemas() {
        let sql = CatalogView::Tables.query(SchemaFilter::AllUserSchemas);
        assert!(sql.contains("NOT IN ('INFORMATION_SCHEMA', 'SPANNER_SYS')"));
    }

    #[test]
    fn view_parsing() {
        assert_eq!("columns".parse::<CatalogView>().unwrap(), CatalogView::Columns);
        assert_eq!("INDEX_COLUMNS".parse::<CatalogView>().unwrap(), CatalogView::IndexColumns);
        assert_eq!("table-constraints".parse::<CatalogView>().unwrap(), CatalogView::TableConstraints);
        assert!("views".parse::<CatalogView>().is_err());
    }

    #[test]
    fn query_set_is_canonical() {
        let a = QuerySet::new(&[CatalogView::Columns, CatalogView::Tables], SchemaFilter::DefaultSchema);
        let b = QuerySet::new(
            &[CatalogView::Tables, CatalogView::Columns, CatalogView::Tables],
            SchemaFilter::DefaultSchema,
        );
        assert_eq!(a.views(), &[CatalogView::Tables, CatalogView::Columns]);
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);
    }

    #[test]
    fn query_set_digest_depends_on_filter() {
        let a = QuerySet::new(&CatalogView::ALL, SchemaFilter::DefaultSchema);
        let b = QuerySet::new(&CatalogView::ALL, SchemaFilter::AllUserSchemas);
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn normalize_renames_and_fills_missing() {
        let row = MetadataRow::normalize(
            CatalogView::Columns,
            vec![
                ("TABLE_NAME", FieldValue::from("Singers")),
                ("column_name", FieldValue::from("SingerId")),
                ("ordinal_position", FieldValue::Int64(1)),
                ("spanner_type", FieldValue::from("INT64")),
                ("not_a_column", FieldValue::from("ignored")),
            ],
        )
        .unwrap();

        assert_eq!(row.fields.len(), CatalogView::Columns.columns().len());
        assert_eq!(row.get("table_name"), Some(&FieldValue::from("Singers")));
        assert_eq!(row.get("spanner_data_type"), Some(&FieldValue::from("INT64")));
        assert_eq!(row.get("is_nullable"), Some(&FieldValue::Null));
        assert!(row.get("spanner_type").is_none());
        assert!(row.get("not_a_column").is_none());
        assert!(row.undeclared_fields().is_empty());
    }

    #[test]
    fn normalize_coerces_types() {
        let row = MetadataRow::normalize(
            CatalogView::Indexes,
            vec![
                ("is_unique", FieldValue::from("YES")),
                ("is_null_filtered", FieldValue::from(false)),
            ],
        )
        .unwrap();
        assert_eq!(row.get("is_unique"), Some(&FieldValue::Bool(true)));

        let err = MetadataRow::normalize(
            CatalogView::Columns,
            vec![("ordinal_position", FieldValue::from("first"))],
        )
        .unwrap_err();
        assert!(err.contains("COLUMNS.ordinal_position"));
    }

    #[test]
    fn annotated_row_json_is_flat() {
        let target = Target::new("my-project", "prod", "orders");
        let extracted_at = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let row = MetadataRow::normalize(
            CatalogView::Tables,
            vec![("table_name", FieldValue::from("Albums"))],
        )
        .unwrap();

        let json = AnnotatedRow::new(&target, extracted_at, row).to_json();
        assert_eq!(json["source_project"], "my-project");
        assert_eq!(json["source_instance"], "prod");
        assert_eq!(json["source_database"], "orders");
        assert_eq!(json["extracted_at"], "2024-05-01T12:00:00.000000Z");
        assert_eq!(json["table_name"], "Albums");
        assert!(json["parent_table_name"].is_null());
    }

    #[test]
    fn field_value_serde_is_untagged() {
        let values = vec![
            FieldValue::Null,
            FieldValue::Bool(true),
            FieldValue::Int64(7),
            FieldValue::from("x"),
        ];
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(json, r#"[null,true,7,"x"]"#);
        let parsed: Vec<FieldValue> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, values);
    }
}
