//! Run orchestration: extract every target, annotate, consolidate once
//!
//! A run walks the target registry, extracting each target under a timeout.
//! Failures become `Failed` results and never stop the run. Rows of
//! successful targets are buffered and handed to the sink in a single write
//! once every target has been visited.

use crate::annotator::annotate;

use chrono::{DateTime, Utc};
use spanmeta_catalog::{ExtractError, MetadataSource};
use spanmeta_core::{
    AnnotatedRow, Disposition, ErrorDetail, ErrorKind, HarvestConfig, QuerySet, RunReport,
    RunResult, SinkOutcome, Target, TargetRegistry, QUERY_SET_VERSION,
};
use spanmeta_sink::MetadataSink;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Per-run settings
#[derive(Debug, Clone)]
pub struct HarvestOptions {
    pub disposition: Disposition,
    pub target_timeout: Duration,
    /// Targets extracted at once (1 = sequential)
    pub concurrency: usize,
    pub query_set_version: u32,
    pub query_set_digest: String,
}

impl HarvestOptions {
    pub fn from_config(config: &HarvestConfig) -> Self {
        Self {
            disposition: config.disposition,
            target_timeout: Duration::from_secs(config.target_timeout_secs),
            concurrency: config.concurrency.max(1),
            query_set_version: QUERY_SET_VERSION,
            query_set_digest: config.query_set().digest(),
        }
    }
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            disposition: Disposition::default(),
            target_timeout: Duration::from_secs(300),
            concurrency: 1,
            query_set_version: QUERY_SET_VERSION,
            query_set_digest: QuerySet::default().digest(),
        }
    }
}

/// Everything a run needs, built once by the caller
pub struct HarvestContext {
    pub source: Arc<dyn MetadataSource>,
    pub sink: Arc<dyn MetadataSink>,
    pub options: HarvestOptions,
}

/// Outcome of one target: its result and the rows it contributed
struct TargetHarvest {
    result: RunResult,
    rows: Vec<AnnotatedRow>,
}

/// Run orchestrator
pub struct Harvester {
    context: HarvestContext,
}

impl Harvester {
    pub fn new(context: HarvestContext) -> Self {
        Self { context }
    }

    pub fn options(&self) -> &HarvestOptions {
        &self.context.options
    }

    /// Harvest every target in the registry, stamped with the current time
    pub async fn run(&self, registry: &TargetRegistry) -> RunReport {
        self.run_at(registry, Utc::now()).await
    }

    /// Harvest every target, using `started_at` as the run timestamp
    pub async fn run_at(&self, registry: &TargetRegistry, started_at: DateTime<Utc>) -> RunReport {
        let options = &self.context.options;
        let mut report = RunReport::new(
            started_at,
            options.disposition,
            options.query_set_version,
            options.query_set_digest.clone(),
        );

        tracing::info!(
            run_id = %report.run_id,
            targets = registry.len(),
            source = self.context.source.name(),
            sink = self.context.sink.name(),
            "starting harvest"
        );

        let harvests = if options.concurrency <= 1 {
            self.harvest_sequential(registry, started_at).await
        } else {
            self.harvest_concurrent(registry, started_at).await
        };

        let mut buffer = Vec::new();
        for harvest in harvests {
            report.add_result(harvest.result);
            buffer.extend(harvest.rows);
        }

        let outcome = self.consolidate(buffer, report.summary.succeeded).await;
        report.finish(outcome, Utc::now());

        tracing::info!(
            run_id = %report.run_id,
            succeeded = report.summary.succeeded,
            failed = report.summary.failed,
            rows_written = report.summary.rows_written,
            "harvest finished"
        );
        report
    }

    async fn harvest_sequential(
        &self,
        registry: &TargetRegistry,
        started_at: DateTime<Utc>,
    ) -> Vec<TargetHarvest> {
        let mut harvests = Vec::with_capacity(registry.len());
        for (position, target) in registry.iter().enumerate() {
            harvests.push(
                harvest_target(
                    self.context.source.as_ref(),
                    target,
                    &self.context.options,
                    started_at,
                    position,
                )
                .await,
            );
        }
        harvests
    }

    /// Bounded pool; results are collected back in registry order
    async fn harvest_concurrent(
        &self,
        registry: &TargetRegistry,
        started_at: DateTime<Utc>,
    ) -> Vec<TargetHarvest> {
        let semaphore = Arc::new(Semaphore::new(self.context.options.concurrency));
        let options = Arc::new(self.context.options.clone());

        let handles: Vec<_> = registry
            .iter()
            .enumerate()
            .map(|(position, target)| {
                let semaphore = Arc::clone(&semaphore);
                let source = Arc::clone(&self.context.source);
                let options = Arc::clone(&options);
                let target = target.clone();

                tokio::spawn(async move {
                    // The semaphore is never closed
                    let _permit = semaphore.acquire_owned().await.ok();
                    harvest_target(source.as_ref(), &target, &options, started_at, position).await
                })
            })
            .collect();

        let mut harvests = Vec::with_capacity(handles.len());
        for (handle, target) in handles.into_iter().zip(registry.iter()) {
            let harvest = match handle.await {
                Ok(harvest) => harvest,
                Err(e) => {
                    let message = if e.is_panic() {
                        format!("Extraction task panicked: {}", e)
                    } else {
                        format!("Extraction task cancelled: {}", e)
                    };
                    tracing::error!(database = %target, error = %e, "extraction task did not complete");
                    TargetHarvest {
                        result: RunResult::failed(
                            target.clone(),
                            ErrorDetail {
                                kind: ErrorKind::Internal,
                                message,
                            },
                            0,
                        ),
                        rows: Vec::new(),
                    }
                }
            };
            harvests.push(harvest);
        }
        harvests
    }

    async fn consolidate(&self, rows: Vec<AnnotatedRow>, succeeded: usize) -> SinkOutcome {
        if succeeded == 0 {
            tracing::warn!("no target succeeded, skipping sink");
            return SinkOutcome::Skipped {
                reason: "no target succeeded".to_string(),
            };
        }

        let disposition = self.context.options.disposition;
        let row_count = rows.len();
        tracing::info!(rows = row_count, disposition = %disposition, "writing to sink");

        match self.context.sink.write(rows, disposition).await {
            Ok(written) => SinkOutcome::Written { rows: written },
            Err(e) => {
                tracing::error!(error = %e, rows = row_count, "sink write failed");
                SinkOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}

async fn harvest_target(
    source: &dyn MetadataSource,
    target: &Target,
    options: &HarvestOptions,
    started_at: DateTime<Utc>,
    position: usize,
) -> TargetHarvest {
    tracing::info!(position, database = %target, "extracting");
    let start = Instant::now();

    let result = match tokio::time::timeout(options.target_timeout, source.extract(target)).await {
        Ok(result) => result,
        Err(_) => Err(ExtractError::Timeout(options.target_timeout)),
    };
    let duration_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(rows) => {
            tracing::info!(
                position,
                database = %target,
                rows = rows.len(),
                duration_ms,
                "extracted"
            );
            TargetHarvest {
                result: RunResult::succeeded(target.clone(), rows.len(), duration_ms),
                rows: annotate(target, rows, started_at),
            }
        }
        Err(e) => {
            tracing::warn!(
                position,
                database = %target,
                kind = %e.kind(),
                error = %e,
                "extraction failed"
            );
            TargetHarvest {
                result: RunResult::failed(target.clone(), e.to_detail(), duration_ms),
                rows: Vec::new(),
            }
        }
    }
}
