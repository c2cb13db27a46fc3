//! In-memory sink for testing
//!
//! Holds destination tables in memory. A write builds the next state of
//! every table aside and swaps it in only when the whole write succeeded,
//! so injected failures leave the previous contents in place.

use crate::sink::{partition_rows, rows_written, MetadataSink, TableLayout, WriteError};
use spanmeta_core::{AnnotatedRow, Disposition, RowsWritten};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory destination
pub struct MemorySink {
    layout: TableLayout,

    /// Committed rows by destination table
    tables: Arc<RwLock<BTreeMap<String, Vec<AnnotatedRow>>>>,

    /// Error returned by the next write, after staging
    fail_next: Arc<RwLock<Option<WriteError>>>,

    /// Error returned by every connection check
    connection_error: Arc<RwLock<Option<WriteError>>>,

    /// Number of write calls
    writes: Arc<RwLock<usize>>,
}

impl MemorySink {
    pub fn new(layout: TableLayout) -> Self {
        Self {
            layout,
            tables: Arc::new(RwLock::new(BTreeMap::new())),
            fail_next: Arc::new(RwLock::new(None)),
            connection_error: Arc::new(RwLock::new(None)),
            writes: Arc::new(RwLock::new(0)),
        }
    }

    pub fn layout(&self) -> &TableLayout {
        &self.layout
    }

    /// Make the next write fail once its rows have been staged
    pub async fn fail_next_write(&self, error: WriteError) {
        *self.fail_next.write().await = Some(error);
    }

    /// Make connection checks fail
    pub async fn set_connection_error(&self, error: Option<WriteError>) {
        *self.connection_error.write().await = error;
    }

    /// Committed rows of a destination table
    pub async fn rows(&self, table: &str) -> Vec<AnnotatedRow> {
        self.tables.read().await.get(table).cloned().unwrap_or_default()
    }

    /// Committed rows across every table
    pub async fn total_rows(&self) -> usize {
        self.tables.read().await.values().map(Vec::len).sum()
    }

    /// Names of tables that have been written
    pub async fn table_names(&self) -> Vec<String> {
        self.tables.read().await.keys().cloned().collect()
    }

    /// Number of write calls, including failed ones
    pub async fn write_count(&self) -> usize {
        *self.writes.read().await
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new(TableLayout::default())
    }
}

impl Clone for MemorySink {
    fn clone(&self) -> Self {
        Self {
            layout: self.layout.clone(),
            tables: Arc::clone(&self.tables),
            fail_next: Arc::clone(&self.fail_next),
            connection_error: Arc::clone(&self.connection_error),
            writes: Arc::clone(&self.writes),
        }
    }
}

#[async_trait::async_trait]
impl MetadataSink for MemorySink {
    fn name(&self) -> &'static str {
        "Memory"
    }

    async fn write(
        &self,
        rows: Vec<AnnotatedRow>,
        disposition: Disposition,
    ) -> Result<RowsWritten, WriteError> {
        *self.writes.write().await += 1;

        let groups = partition_rows(&rows, &self.layout)?;
        let written = rows_written(&groups, &self.layout);

        // Holding the write lock serializes concurrent writers
        let mut tables = self.tables.write().await;
        let mut staged = tables.clone();
        for (view, group) in &groups {
            let table = staged.entry(self.layout.table_for(*view)).or_default();
            if disposition == Disposition::Replace {
                table.clear();
            }
            table.extend(group.iter().map(|row| (*row).clone()));
        }

        if let Some(error) = self.fail_next.write().await.take() {
            return Err(error);
        }

        *tables = staged;
        Ok(written)
    }

    async fn test_connection(&self) -> Result<(), WriteError> {
        match self.connection_error.read().await.as_ref() {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}
