//! Test fixtures for metadata source integration tests
//!
//! Raw catalog rows as Spanner returns them for a small music database:
//! `Singers`, `Albums` interleaved in `Singers`, and `Songs` interleaved in
//! `Albums`, plus one secondary index.

#![allow(dead_code)]

use spanmeta_core::{CatalogView, FieldValue, MetadataRow, Target};

pub fn music_target() -> Target {
    Target::new("analytics-prod", "music-instance", "music")
}

pub fn unreachable_target() -> Target {
    Target::new("analytics-prod", "music-instance", "archive")
}

fn row(view: CatalogView, fields: Vec<(&str, FieldValue)>) -> MetadataRow {
    MetadataRow::normalize(view, fields).unwrap()
}

fn table_row(name: &str, parent: Option<&str>) -> MetadataRow {
    row(
        CatalogView::Tables,
        vec![
            ("TABLE_CATALOG", "".into()),
            ("TABLE_SCHEMA", "".into()),
            ("TABLE_NAME", name.into()),
            ("TABLE_TYPE", "BASE TABLE".into()),
            ("PARENT_TABLE_NAME", parent.into()),
            ("ON_DELETE_ACTION", parent.map(|_| "CASCADE").into()),
            ("SPANNER_STATE", "COMMITTED".into()),
        ],
    )
}

fn column_row(table: &str, column: &str, position: i64, nullable: bool, ty: &str) -> MetadataRow {
    row(
        CatalogView::Columns,
        vec![
            ("TABLE_CATALOG", "".into()),
            ("TABLE_SCHEMA", "".into()),
            ("TABLE_NAME", table.into()),
            ("COLUMN_NAME", column.into()),
            ("ORDINAL_POSITION", position.into()),
            ("IS_NULLABLE", if nullable { "YES" } else { "NO" }.into()),
            ("SPANNER_TYPE", ty.into()),
            ("IS_GENERATED", "NEVER".into()),
            ("SPANNER_STATE", "COMMITTED".into()),
        ],
    )
}

/// TABLES rows for the music database
pub fn music_tables() -> Vec<MetadataRow> {
    vec![
        table_row("Albums", Some("Singers")),
        table_row("Singers", None),
        table_row("Songs", Some("Albums")),
    ]
}

/// COLUMNS rows for the music database
pub fn music_columns() -> Vec<MetadataRow> {
    vec![
        column_row("Albums", "SingerId", 1, false, "INT64"),
        column_row("Albums", "AlbumId", 2, false, "INT64"),
        column_row("Albums", "AlbumTitle", 3, true, "STRING(MAX)"),
        column_row("Singers", "SingerId", 1, false, "INT64"),
        column_row("Singers", "FirstName", 2, true, "STRING(1024)"),
        column_row("Singers", "LastName", 3, true, "STRING(1024)"),
        column_row("Songs", "SingerId", 1, false, "INT64"),
        column_row("Songs", "AlbumId", 2, false, "INT64"),
        column_row("Songs", "TrackId", 3, false, "INT64"),
        column_row("Songs", "SongName", 4, true, "STRING(MAX)"),
    ]
}

/// INDEXES rows for the music database
pub fn music_indexes() -> Vec<MetadataRow> {
    vec![row(
        CatalogView::Indexes,
        vec![
            ("TABLE_CATALOG", "".into()),
            ("TABLE_SCHEMA", "".into()),
            ("TABLE_NAME", "Albums".into()),
            ("INDEX_NAME", "AlbumsByAlbumTitle".into()),
            ("INDEX_TYPE", "INDEX".into()),
            ("PARENT_TABLE_NAME", "".into()),
            ("IS_UNIQUE", false.into()),
            ("IS_NULL_FILTERED", false.into()),
            ("INDEX_STATE", "READ_WRITE".into()),
            ("SPANNER_IS_MANAGED", false.into()),
        ],
    )]
}

/// Every catalog row for the music database
pub fn music_catalog() -> Vec<MetadataRow> {
    let mut rows = music_tables();
    rows.extend(music_columns());
    rows.extend(music_indexes());
    rows
}
