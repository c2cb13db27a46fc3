//! Newline-delimited JSON sink
//!
//! Writes one `{table}.jsonl` file per catalog view into a local directory.
//! Each line is a flat object with the provenance columns followed by the
//! view's columns, the same shape as the BigQuery rows.
//!
//! `Replace` writes every file to a temporary sibling first and renames the
//! files into place only after all of them were written. Each rename is atomic
//! on its own, but the set is not: if a rename fails, tables renamed before it
//! already hold the new rows while the rest keep their previous contents.
//! `Append` adds lines to the existing files.

use crate::sink::{partition_rows, rows_written, MetadataSink, TableLayout, WriteError};
use spanmeta_core::{AnnotatedRow, Disposition, RowsWritten};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Local directory destination
pub struct JsonlSink {
    dir: PathBuf,
    layout: TableLayout,
}

impl JsonlSink {
    pub fn new(dir: impl Into<PathBuf>, layout: TableLayout) -> Self {
        Self {
            dir: dir.into(),
            layout,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing a destination table
    pub fn path_for(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", table))
    }

    fn staging_path_for(&self, table: &str) -> PathBuf {
        self.dir.join(format!(".{}.jsonl.tmp", table))
    }

    fn render(rows: &[&AnnotatedRow]) -> Result<String, WriteError> {
        let mut out = String::new();
        for row in rows {
            let line = serde_json::to_string(&row.to_json())
                .map_err(|e| WriteError::MalformedRow(format!("Failed to serialize row: {}", e)))?;
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out)
    }

    async fn replace(&self, files: Vec<(String, String)>) -> Result<(), WriteError> {
        let mut staged = Vec::with_capacity(files.len());

        for (table, contents) in files {
            let staging = self.staging_path_for(&table);
            if let Err(e) = tokio::fs::write(&staging, contents).await {
                self.discard(&staged).await;
                let _ = tokio::fs::remove_file(&staging).await;
                return Err(io_error(&staging, e));
            }
            staged.push((staging, self.path_for(&table)));
        }

        for (index, (staging, path)) in staged.iter().enumerate() {
            if let Err(e) = tokio::fs::rename(staging, path).await {
                tracing::warn!(
                    table = %path.display(),
                    renamed = index,
                    "replace stopped part way; earlier tables already hold the new rows"
                );
                self.discard(&staged[index..]).await;
                return Err(io_error(path, e));
            }
        }

        Ok(())
    }

    async fn append(&self, files: Vec<(String, String)>) -> Result<(), WriteError> {
        for (table, contents) in files {
            if contents.is_empty() {
                continue;
            }

            let path = self.path_for(&table);
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|e| io_error(&path, e))?;

            file.write_all(contents.as_bytes())
                .await
                .map_err(|e| io_error(&path, e))?;
            file.flush().await.map_err(|e| io_error(&path, e))?;
        }

        Ok(())
    }

    async fn discard(&self, staged: &[(PathBuf, PathBuf)]) {
        for (staging, _) in staged {
            let _ = tokio::fs::remove_file(staging).await;
        }
    }
}

fn io_error(path: &Path, e: std::io::Error) -> WriteError {
    match e.kind() {
        std::io::ErrorKind::PermissionDenied => {
            WriteError::PermissionDenied(format!("{}: {}", path.display(), e))
        }
        _ => WriteError::RequestFailed(format!("{}: {}", path.display(), e)),
    }
}

#[async_trait::async_trait]
impl MetadataSink for JsonlSink {
    fn name(&self) -> &'static str {
        "Jsonl"
    }

    async fn write(
        &self,
        rows: Vec<AnnotatedRow>,
        disposition: Disposition,
    ) -> Result<RowsWritten, WriteError> {
        let groups = partition_rows(&rows, &self.layout)?;

        let mut files = Vec::with_capacity(groups.len());
        for (view, group) in &groups {
            files.push((self.layout.table_for(*view), Self::render(group)?));
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;

        match disposition {
            Disposition::Replace => self.replace(files).await?,
            Disposition::Append => self.append(files).await?,
        }

        let written = rows_written(&groups, &self.layout);
        tracing::info!(
            dir = %self.dir.display(),
            rows = written.total,
            disposition = %disposition,
            "wrote jsonl tables"
        );
        Ok(written)
    }

    async fn test_connection(&self) -> Result<(), WriteError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;

        let marker = self.dir.join(".spanmeta-write-check");
        tokio::fs::write(&marker, b"")
            .await
            .map_err(|e| io_error(&marker, e))?;
        tokio::fs::remove_file(&marker)
            .await
            .map_err(|e| io_error(&marker, e))
    }
}
