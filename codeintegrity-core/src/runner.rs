//! Concurrent multi-repository runs.
//!
//! Each repository is an isolated unit of work: a failure to clone, load, or
//! store one repository is logged and counted, and never stops the others.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::acquire::{Acquirer, LocalOnly};
use crate::pipeline::{IntegrityPipeline, RepoTarget, RunContext};
use crate::progress::{NoopReporter, ProgressReporter};
use crate::report::IntegrityReport;

/// Receives every successfully analyzed report.
#[async_trait::async_trait]
pub trait ReportSink: Send + Sync {
    async fn store(&self, report: IntegrityReport) -> crate::error::Result<()>;
}

/// Keeps reports in memory, in completion order.
#[derive(Debug, Default)]
pub struct CollectSink {
    reports: Mutex<Vec<IntegrityReport>>,
}

impl CollectSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collected reports sorted by `owner/repo`.
    pub async fn reports(&self) -> Vec<IntegrityReport> {
        let mut reports = self.reports.lock().await.clone();
        reports.sort_by(|a, b| (&a.owner, &a.repo).cmp(&(&b.owner, &b.repo)));
        reports
    }
}

#[async_trait::async_trait]
impl ReportSink for CollectSink {
    async fn store(&self, report: IntegrityReport) -> crate::error::Result<()> {
        self.reports.lock().await.push(report);
        Ok(())
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Runs the pipeline over many repositories with bounded concurrency.
#[derive(Debug, Clone)]
pub struct Runner {
    pipeline: Arc<IntegrityPipeline>,
    acquirer: Arc<dyn Acquirer>,
    progress: Arc<dyn ProgressReporter>,
    max_concurrent: usize,
}

impl Runner {
    /// Runner over already-cloned targets, with the concurrency limit from
    /// `[pipeline] max_concurrent_repos`.
    pub fn new(pipeline: Arc<IntegrityPipeline>) -> Self {
        let max_concurrent = pipeline.config().pipeline.max_concurrent_repos;
        Self {
            pipeline,
            acquirer: Arc::new(LocalOnly),
            progress: Arc::new(NoopReporter),
            max_concurrent: max_concurrent.max(1),
        }
    }

    #[must_use]
    pub fn with_acquirer(mut self, acquirer: Arc<dyn Acquirer>) -> Self {
        self.acquirer = acquirer;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Analyze every target and hand each report to `sink`.
    pub async fn run(&self, targets: Vec<RepoTarget>, sink: Arc<dyn ReportSink>) -> RunSummary {
        let start = Instant::now();
        let total = targets.len();
        info!(repos = total, max_concurrent = self.max_concurrent, "Starting run");
        self.progress
            .start("Analyzing repositories", u64::try_from(total).ok());

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let failed = Arc::new(AtomicUsize::new(0));
        let mut workers = JoinSet::new();

        for target in targets {
            let semaphore = Arc::clone(&semaphore);
            let pipeline = Arc::clone(&self.pipeline);
            let acquirer = Arc::clone(&self.acquirer);
            let progress = Arc::clone(&self.progress);
            let sink = Arc::clone(&sink);
            let failed = Arc::clone(&failed);

            workers.spawn(async move {
                let repo = target.repo.clone();
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    warn!(repo = %repo, "Worker pool closed");
                    failed.fetch_add(1, Ordering::Relaxed);
                    return;
                };

                let ctx = RunContext::new(&repo, Arc::clone(&progress));
                let outcome = tokio::task::spawn_blocking(move || {
                    if let Err(e) = ctx.span().in_scope(|| acquirer.acquire(&target)) {
                        ctx.progress().advance(1);
                        return Err(e.into());
                    }
                    pipeline.run(&target, &ctx)
                })
                .await;

                match outcome {
                    Ok(Ok(report)) => {
                        if let Err(e) = sink.store(report).await {
                            warn!(repo = %repo, error = %e, "Failed to store report");
                            progress.message(&format!("{repo}: {e}"));
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    Ok(Err(e)) => {
                        warn!(repo = %repo, error = %e, "Repository failed");
                        progress.message(&format!("{repo}: {e}"));
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        warn!(repo = %repo, error = %e, "Repository worker panicked");
                        progress.message(&format!("{repo}: worker panicked"));
                        progress.advance(1);
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Worker task aborted");
                failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.progress.finish();

        let failed = failed.load(Ordering::Relaxed).min(total);
        let summary = RunSummary {
            succeeded: total - failed,
            failed,
            elapsed: start.elapsed(),
        };
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            elapsed = ?summary.elapsed,
            "Execution finished"
        );
        summary
    }
}

/// Analyze already-cloned `targets`, at most `max_concurrent` at a time.
pub async fn run_all(
    pipeline: Arc<IntegrityPipeline>,
    targets: Vec<RepoTarget>,
    max_concurrent: usize,
    sink: Arc<dyn ReportSink>,
) -> RunSummary {
    Runner::new(pipeline)
        .with_max_concurrent(max_concurrent)
        .run(targets, sink)
        .await
}
