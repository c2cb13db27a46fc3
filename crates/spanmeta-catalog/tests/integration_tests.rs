//! Integration tests for metadata sources
//!
//! The mock source tests run without credentials. Tests against a real
//! Spanner database are marked with `#[ignore]` and can be run with
//! `cargo test -- --ignored`.
//!
//! ## Running Tests
//!
//! ```bash
//! # Run all non-ignored tests (no credentials required)
//! cargo test -p spanmeta-catalog --test integration_tests
//!
//! # Run Spanner integration tests
//! GOOGLE_APPLICATION_CREDENTIALS=/path/to/key.json \
//! SPANMETA_SPANNER_PROJECT=my-project \
//! SPANMETA_SPANNER_INSTANCE=my-instance \
//! SPANMETA_SPANNER_DATABASE=my-database \
//! cargo test -p spanmeta-catalog --features spanner --test integration_tests -- --ignored
//! ```

mod fixtures;

use spanmeta_catalog::{ExtractError, MetadataSource, MockSource, MockSourceBuilder, SpannerSource};
use spanmeta_core::{CatalogView, ErrorKind, FieldValue, QuerySet, SchemaFilter, Target};

// =============================================================================
// Helper Functions
// =============================================================================

/// Target from the environment, if one is configured
fn spanner_target_from_env() -> Option<Target> {
    Some(Target::new(
        std::env::var("SPANMETA_SPANNER_PROJECT").ok()?,
        std::env::var("SPANMETA_SPANNER_INSTANCE").ok()?,
        std::env::var("SPANMETA_SPANNER_DATABASE").ok()?,
    ))
}

// =============================================================================
// Mock Source Tests (No credentials required)
// =============================================================================

#[tokio::test]
async fn test_mock_source_returns_fixture_catalog() {
    let source = MockSourceBuilder::new()
        .with_rows(fixtures::music_target(), fixtures::music_catalog())
        .build();

    let rows = source.extract(&fixtures::music_target()).await.unwrap();
    assert_eq!(rows.len(), 14);

    let tables: Vec<_> = rows
        .iter()
        .filter(|r| r.view == CatalogView::Tables)
        .filter_map(|r| r.get("table_name").and_then(FieldValue::as_str))
        .collect();
    assert_eq!(tables, vec!["Albums", "Singers", "Songs"]);
}

#[tokio::test]
async fn test_fixture_rows_are_in_declared_shape() {
    for row in fixtures::music_catalog() {
        assert!(row.undeclared_fields().is_empty());
        assert_eq!(row.fields.len(), row.view.columns().len());
    }

    let columns = fixtures::music_columns();
    let first = &columns[0];
    assert_eq!(first.get("ordinal_position"), Some(&FieldValue::Int64(1)));
    assert_eq!(first.get("spanner_data_type"), Some(&FieldValue::from("INT64")));
    assert_eq!(first.get("column_default"), Some(&FieldValue::Null));
}

#[tokio::test]
async fn test_unreachable_target_is_connection_failure() {
    let source = MockSourceBuilder::new()
        .with_rows(fixtures::music_target(), fixtures::music_catalog())
        .with_error(
            fixtures::unreachable_target(),
            ExtractError::ConnectionError("status: Unavailable, transport error".into()),
        )
        .build();

    let err = source.extract(&fixtures::unreachable_target()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(err.is_transient());

    // The reachable target is unaffected
    assert!(source.extract(&fixtures::music_target()).await.is_ok());
}

#[tokio::test]
async fn test_denied_catalog_view_is_query_failure() {
    let source = MockSource::new();
    source.add_rows(&fixtures::music_target(), fixtures::music_catalog()).await;
    source
        .add_error(
            &fixtures::music_target(),
            SpannerSource::classify_failure(
                "TABLE_CONSTRAINTS",
                "status: PermissionDenied, message: \"Caller is missing IAM permission\"".into(),
            ),
        )
        .await;

    let err = source.extract(&fixtures::music_target()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Query);
    assert!(!err.is_transient());
    assert!(err.to_string().contains("TABLE_CONSTRAINTS"));
}

#[tokio::test]
async fn test_mock_source_counts_attempts_per_target() {
    let source = MockSourceBuilder::new()
        .with_rows(fixtures::music_target(), fixtures::music_catalog())
        .build();

    source
        .fail_first(
            &fixtures::music_target(),
            1,
            ExtractError::ConnectionError("connection reset".into()),
        )
        .await;

    assert!(source.extract(&fixtures::music_target()).await.is_err());
    assert!(source.extract(&fixtures::music_target()).await.is_ok());
    assert_eq!(source.call_count(&fixtures::music_target()).await, 2);
    assert_eq!(source.call_count(&fixtures::unreachable_target()).await, 0);
}

#[tokio::test]
async fn test_per_target_latency() {
    let source = MockSourceBuilder::new()
        .with_rows(fixtures::music_target(), fixtures::music_catalog())
        .build();
    source.set_latency(&fixtures::music_target(), 30).await;

    let start = std::time::Instant::now();
    source.extract(&fixtures::music_target()).await.unwrap();
    assert!(start.elapsed().as_millis() >= 30);
}

#[test]
fn test_query_set_restricts_harvested_views() {
    let set = QuerySet::new(
        &[CatalogView::Columns, CatalogView::Tables],
        SchemaFilter::DefaultSchema,
    );
    let source = SpannerSource::new(set);

    let views: Vec<_> = source.query_set().queries().into_iter().map(|(v, _)| v).collect();
    assert_eq!(views, vec![CatalogView::Tables, CatalogView::Columns]);
}

// =============================================================================
// Spanner Tests (Requires credentials)
// =============================================================================

#[tokio::test]
#[ignore] // Run with: cargo test --features spanner -- --ignored
async fn test_spanner_extract() {
    let Some(target) = spanner_target_from_env() else {
        eprintln!("Skipping Spanner test: no target configured");
        eprintln!("Set SPANMETA_SPANNER_PROJECT, SPANMETA_SPANNER_INSTANCE and SPANMETA_SPANNER_DATABASE");
        return;
    };

    let source = SpannerSource::default();
    match source.extract(&target).await {
        Ok(rows) => {
            println!("Extracted {} catalog rows from {}", rows.len(), target);
            assert!(rows.iter().all(|r| r.undeclared_fields().is_empty()));
        }
        Err(ExtractError::ConfigError(msg)) => {
            eprintln!("Spanner feature not enabled: {}", msg);
        }
        Err(e) => panic!("Spanner extraction failed: {}", e),
    }
}
