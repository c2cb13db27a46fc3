//! BigQuery sink with an all-or-nothing commit
//!
//! Rows land in per-run staging tables first (streaming inserts), then every
//! destination table is updated by one multi-statement transaction:
//!
//! ```sql
//! BEGIN TRANSACTION;
//! DELETE FROM `p.d.spanner_is_columns` WHERE TRUE;          -- Replace only
//! INSERT INTO `p.d.spanner_is_columns` (...) SELECT ... FROM `p.d._spanner_is_columns_staging_...`;
//! COMMIT TRANSACTION;
//! ```
//!
//! If anything fails before `COMMIT` BigQuery rolls the transaction back and
//! the destination tables keep their previous contents. Staging tables are
//! dropped afterwards in either case.
//!
//! Required IAM permissions:
//! - bigquery.datasets.get / bigquery.datasets.create
//! - bigquery.tables.get / create / delete / updateData / getData
//! - bigquery.jobs.create
//!
//! ## Authentication
//!
//! 1. Service account JSON file (`destination.credentials`)
//! 2. Application Default Credentials (ADC)

use crate::sink::{destination_columns, MetadataSink, TableLayout, WriteError};
use spanmeta_core::{AnnotatedRow, CatalogView, DestinationConfig, Disposition, RowsWritten};

#[cfg(feature = "bigquery")]
use crate::sink::{partition_rows, rows_written};

#[cfg(feature = "bigquery")]
use gcp_bigquery_client::{
    model::{
        dataset::Dataset, query_request::QueryRequest, table::Table,
        table_data_insert_all_request::TableDataInsertAllRequest,
        table_field_schema::TableFieldSchema, table_schema::TableSchema,
    },
    Client as BigQueryClient,
};

/// Rows per streaming insert request
#[cfg(feature = "bigquery")]
const INSERT_BATCH_SIZE: usize = 500;

/// How long to wait for the commit job before polling
#[cfg(feature = "bigquery")]
const QUERY_TIMEOUT_MS: i32 = 60_000;

/// BigQuery destination
pub struct BigQuerySink {
    project_id: String,
    dataset_id: String,
    location: Option<String>,
    layout: TableLayout,

    /// BigQuery client (only available with bigquery feature)
    #[cfg(feature = "bigquery")]
    client: BigQueryClient,
}

impl BigQuerySink {
    /// Connect using the destination's credentials file, or ADC when unset
    #[cfg(feature = "bigquery")]
    pub async fn connect(
        destination: &DestinationConfig,
        layout: TableLayout,
    ) -> Result<Self, WriteError> {
        let project_id = destination.project_id.clone().ok_or_else(|| {
            WriteError::ConfigError(
                "destination.project_id is required for BigQuery (or set BQ_PROJECT_ID)".to_string(),
            )
        })?;

        let client = match &destination.credentials {
            Some(key_path) => {
                let key_path_str = key_path.to_string_lossy().to_string();
                BigQueryClient::from_service_account_key_file(&key_path_str)
                    .await
                    .map_err(|e| WriteError::ConfigError(format!(
                        "Failed to read service account key file '{}': {}",
                        key_path_str, e
                    )))?
            }
            None => BigQueryClient::from_application_default_credentials()
                .await
                .map_err(|e| WriteError::ConfigError(format!(
                    "Failed to authenticate with ADC: {}. \
                     Ensure GOOGLE_APPLICATION_CREDENTIALS is set or run 'gcloud auth application-default login'",
                    e
                )))?,
        };

        Ok(Self {
            project_id,
            dataset_id: destination.dataset_id.clone(),
            location: destination.location.clone(),
            layout,
            client,
        })
    }

    /// Create sink without bigquery feature (returns error)
    #[cfg(not(feature = "bigquery"))]
    pub async fn connect(
        destination: &DestinationConfig,
        layout: TableLayout,
    ) -> Result<Self, WriteError> {
        let _ = (destination, layout);
        Err(WriteError::ConfigError(
            "BigQuery support not compiled. Rebuild with: cargo build --features bigquery".to_string()
        ))
    }

    pub fn dataset(&self) -> String {
        format!("{}.{}", self.project_id, self.dataset_id)
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn layout(&self) -> &TableLayout {
        &self.layout
    }

    /// Fully qualified, quoted table reference
    #[cfg(feature = "bigquery")]
    fn table_ref(&self, table: &str) -> String {
        qualified(&self.project_id, &self.dataset_id, table)
    }

    /// The commit transaction for one write
    #[cfg(feature = "bigquery")]
    fn commit_script(&self, staged: &[(CatalogView, String)], disposition: Disposition) -> String {
        commit_script(&self.project_id, &self.dataset_id, &self.layout, staged, disposition)
    }

    #[cfg(feature = "bigquery")]
    async fn ensure_dataset(&self) -> Result<(), WriteError> {
        match self.client.dataset().get(&self.project_id, &self.dataset_id).await {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("Not found") => {
                tracing::info!(dataset = %self.dataset(), "creating dataset");
                let mut dataset = Dataset::new(&self.project_id, &self.dataset_id);
                if let Some(location) = &self.location {
                    dataset = dataset.location(location);
                }
                self.client
                    .dataset()
                    .create(dataset)
                    .await
                    .map(|_| ())
                    .map_err(|e| WriteError::from_message(e.to_string()))
            }
            Err(e) => Err(WriteError::from_message(e.to_string())),
        }
    }

    #[cfg(feature = "bigquery")]
    async fn ensure_table(&self, table: &str, view: CatalogView) -> Result<(), WriteError> {
        match self.client.table().get(&self.project_id, &self.dataset_id, table, None).await {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("Not found") => self.create_table(table, view).await,
            Err(e) => Err(WriteError::from_message(e.to_string())),
        }
    }

    #[cfg(feature = "bigquery")]
    async fn create_table(&self, table: &str, view: CatalogView) -> Result<(), WriteError> {
        let fields = destination_columns(view)
            .into_iter()
            .map(|column| {
                let mut field = match column.bigquery_type {
                    "INTEGER" => TableFieldSchema::integer(column.name),
                    "BOOLEAN" => TableFieldSchema::bool(column.name),
                    "TIMESTAMP" => TableFieldSchema::timestamp(column.name),
                    _ => TableFieldSchema::string(column.name),
                };
                if column.required {
                    field.mode = Some("REQUIRED".to_string());
                }
                field
            })
            .collect();

        tracing::debug!(table = %self.table_ref(table), "creating table");
        self.client
            .table()
            .create(Table::new(&self.project_id, &self.dataset_id, table, TableSchema::new(fields)))
            .await
            .map(|_| ())
            .map_err(|e| WriteError::from_message(e.to_string()))
    }

    #[cfg(feature = "bigquery")]
    async fn stream_rows(&self, table: &str, rows: &[&AnnotatedRow], run: &str) -> Result<(), WriteError> {
        for (chunk_index, chunk) in rows.chunks(INSERT_BATCH_SIZE).enumerate() {
            let mut request = TableDataInsertAllRequest::new();
            for (offset, row) in chunk.iter().enumerate() {
                let insert_id = format!("{}-{}-{}", run, chunk_index, offset);
                request
                    .add_row(Some(insert_id), row.to_json())
                    .map_err(|e| WriteError::MalformedRow(e.to_string()))?;
            }

            let response = self
                .client
                .tabledata()
                .insert_all(&self.project_id, &self.dataset_id, table, request)
                .await
                .map_err(|e| WriteError::from_message(e.to_string()))?;

            if let Some(errors) = response.insert_errors {
                if !errors.is_empty() {
                    return Err(WriteError::SchemaMismatch(format!(
                        "{} rows rejected by {}: {:?}",
                        errors.len(),
                        self.table_ref(table),
                        errors.first()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Run a script and wait for its job to finish
    #[cfg(feature = "bigquery")]
    async fn run_script(&self, sql: String) -> Result<(), WriteError> {
        let mut request = QueryRequest::new(sql);
        request.timeout_ms = Some(QUERY_TIMEOUT_MS);
        request.location = self.location.clone();

        let response = self
            .client
            .job()
            .query(&self.project_id, request)
            .await
            .map_err(|e| WriteError::from_message(e.to_string()))?;

        if response.job_complete.unwrap_or(true) {
            return Ok(());
        }

        let job_id = response
            .job_reference
            .and_then(|r| r.job_id)
            .ok_or_else(|| WriteError::RequestFailed("commit job has no job id".to_string()))?;

        loop {
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;

            let job = self
                .client
                .job()
                .get_job(&self.project_id, &job_id, self.location.as_deref())
                .await
                .map_err(|e| WriteError::from_message(e.to_string()))?;

            let Some(status) = job.status else { continue };
            if let Some(error) = status.error_result {
                return Err(WriteError::from_message(
                    error.message.unwrap_or_else(|| format!("job {} failed", job_id)),
                ));
            }
            if status.state.as_deref() == Some("DONE") {
                return Ok(());
            }
        }
    }

    #[cfg(feature = "bigquery")]
    async fn drop_staging(&self, staged: &[(CatalogView, String)]) {
        for (_, table) in staged {
            if let Err(e) = self.client.table().delete(&self.project_id, &self.dataset_id, table).await {
                tracing::warn!(table = %self.table_ref(table), error = %e, "failed to drop staging table");
            }
        }
    }

    #[cfg(feature = "bigquery")]
    async fn stage_and_commit(
        &self,
        groups: &std::collections::BTreeMap<CatalogView, Vec<&AnnotatedRow>>,
        disposition: Disposition,
        staged: &mut Vec<(CatalogView, String)>,
    ) -> Result<(), WriteError> {
        self.ensure_dataset().await?;

        let run = chrono::Utc::now().format("%Y%m%d%H%M%S%3f").to_string();
        for (view, rows) in groups {
            let table = self.layout.table_for(*view);
            self.ensure_table(&table, *view).await?;

            if rows.is_empty() {
                continue;
            }

            let staging = staging_table(&table, &run);
            self.create_table(&staging, *view).await?;
            staged.push((*view, staging.clone()));
            self.stream_rows(&staging, rows, &run).await?;
        }

        self.run_script(self.commit_script(staged, disposition)).await
    }
}

/// Backtick-quoted `project.dataset.table`
pub fn qualified(project_id: &str, dataset_id: &str, table: &str) -> String {
    format!("`{}.{}.{}`", project_id, dataset_id, table)
}

/// Staging table name for a destination table and run
pub fn staging_table(table: &str, run: &str) -> String {
    format!("_{}_staging_{}", table, run)
}

/// Build the transaction that moves staged rows into the destination tables
///
/// With `Replace` every managed table is cleared, including those with no
/// staged rows.
pub fn commit_script(
    project_id: &str,
    dataset_id: &str,
    layout: &TableLayout,
    staged: &[(CatalogView, String)],
    disposition: Disposition,
) -> String {
    let mut statements = vec!["BEGIN TRANSACTION;".to_string()];

    if disposition == Disposition::Replace {
        for view in layout.views() {
            statements.push(format!(
                "DELETE FROM {} WHERE TRUE;",
                qualified(project_id, dataset_id, &layout.table_for(*view))
            ));
        }
    }

    for (view, staging) in staged {
        let columns = destination_columns(*view)
            .iter()
            .map(|c| format!("`{}`", c.name))
            .collect::<Vec<_>>()
            .join(", ");
        statements.push(format!(
            "INSERT INTO {} ({}) SELECT {} FROM {};",
            qualified(project_id, dataset_id, &layout.table_for(*view)),
            columns,
            columns,
            qualified(project_id, dataset_id, staging)
        ));
    }

    statements.push("COMMIT TRANSACTION;".to_string());
    statements.join("\n")
}

#[async_trait::async_trait]
impl MetadataSink for BigQuerySink {
    fn name(&self) -> &'static str {
        "BigQuery"
    }

    #[cfg(feature = "bigquery")]
    async fn write(
        &self,
        rows: Vec<AnnotatedRow>,
        disposition: Disposition,
    ) -> Result<RowsWritten, WriteError> {
        let groups = partition_rows(&rows, &self.layout)?;

        let mut staged = Vec::new();
        let result = self.stage_and_commit(&groups, disposition, &mut staged).await;
        self.drop_staging(&staged).await;
        result?;

        let written = rows_written(&groups, &self.layout);
        tracing::info!(
            dataset = %self.dataset(),
            rows = written.total,
            disposition = %disposition,
            "committed rows to BigQuery"
        );
        Ok(written)
    }

    #[cfg(not(feature = "bigquery"))]
    async fn write(
        &self,
        _rows: Vec<AnnotatedRow>,
        _disposition: Disposition,
    ) -> Result<RowsWritten, WriteError> {
        Err(WriteError::ConfigError(
            "BigQuery support not compiled. Rebuild with: cargo build --features bigquery".to_string()
        ))
    }

    #[cfg(feature = "bigquery")]
    async fn test_connection(&self) -> Result<(), WriteError> {
        let request = QueryRequest::new("SELECT 1".to_string());

        self.client
            .job()
            .query(&self.project_id, request)
            .await
            .map_err(|e| WriteError::from_message(format!("Connection test failed: {}", e)))?;

        match self.client.dataset().get(&self.project_id, &self.dataset_id).await {
            Ok(_) => Ok(()),
            // Created on first write
            Err(e) if e.to_string().contains("Not found") => Ok(()),
            Err(e) => Err(WriteError::from_message(e.to_string())),
        }
    }

    #[cfg(not(feature = "bigquery"))]
    async fn test_connection(&self) -> Result<(), WriteError> {
        Err(WriteError::ConfigError(
            "BigQuery support not compiled. Rebuild with: cargo build --features bigquery".to_string()
        ))
    }
}
