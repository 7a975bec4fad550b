//! Per-repository analysis: load → classify → detect → score → assemble.
//!
//! The repository is read once, by the loader. Every later stage works on the
//! in-memory [`CommitGraph`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{Span, debug, info, info_span};

use crate::anomaly::{DetectorConfig, detect, implicated_commits};
use crate::config::IntegrityConfig;
use crate::graph::{CommitGraph, load_commit_graph};
use crate::progress::{NoopReporter, ProgressReporter};
use crate::report::{IntegrityReport, assemble};
use crate::score::score;
use crate::signature::{SignatureVerifier, classify, verifier_from_config};
use crate::types::RepoId;

/// One repository to analyze.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoTarget {
    pub repo: RepoId,
    /// Local clone.
    pub path: PathBuf,
    /// Ref to analyze. Empty falls back to `[analysis] reference`.
    pub reference: String,
}

impl RepoTarget {
    pub fn new(repo: RepoId, path: impl Into<PathBuf>) -> Self {
        Self {
            repo,
            path: path.into(),
            reference: String::new(),
        }
    }

    #[must_use]
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }
}

/// Logging context for one repository run: a span tagged with the
/// repository plus the reporter that counts finished repositories.
#[derive(Debug, Clone)]
pub struct RunContext {
    span: Span,
    progress: Arc<dyn ProgressReporter>,
}

impl RunContext {
    pub fn new(repo: &RepoId, progress: Arc<dyn ProgressReporter>) -> Self {
        Self {
            span: info_span!("repo", owner = %repo.owner, name = %repo.name),
            progress,
        }
    }

    /// Context without progress output.
    pub fn quiet(repo: &RepoId) -> Self {
        Self::new(repo, Arc::new(NoopReporter))
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn progress(&self) -> &dyn ProgressReporter {
        &*self.progress
    }
}

/// Runs the analysis stages for a single repository.
#[derive(Debug, Clone)]
pub struct IntegrityPipeline {
    config: IntegrityConfig,
    verifier: Arc<dyn SignatureVerifier>,
}

impl IntegrityPipeline {
    pub fn new(config: IntegrityConfig, verifier: Arc<dyn SignatureVerifier>) -> Self {
        Self { config, verifier }
    }

    /// Pipeline using the verifier selected by `[verification] backend`.
    pub fn from_config(config: IntegrityConfig) -> Self {
        let verifier = verifier_from_config(&config.verification);
        Self::new(config, verifier)
    }

    pub fn config(&self) -> &IntegrityConfig {
        &self.config
    }

    /// Load `target` and analyze it. Advances `ctx`'s progress by one
    /// whether or not the run succeeds.
    pub fn run(&self, target: &RepoTarget, ctx: &RunContext) -> crate::error::Result<IntegrityReport> {
        let _entered = ctx.span().enter();
        let result = self.run_inner(target);
        ctx.progress().advance(1);
        result
    }

    fn run_inner(&self, target: &RepoTarget) -> crate::error::Result<IntegrityReport> {
        let start = Instant::now();
        let reference = if target.reference.is_empty() {
            self.config.analysis.reference.as_str()
        } else {
            target.reference.as_str()
        };

        debug!(path = %target.path.display(), reference, "Loading history");
        let graph = load_commit_graph(&target.path, reference)?;
        let report = self.analyze(&target.repo, &graph);

        info!(
            score = report.score,
            commits = report.total_commits,
            anomalies = report.anomalies.len(),
            implicated = implicated_commits(&report.anomalies).len(),
            shallow = report.shallow,
            duration = ?start.elapsed(),
            "Repository analyzed"
        );
        Ok(report)
    }

    /// Classify, detect, score, and assemble an already-loaded history.
    pub fn analyze(&self, repo: &RepoId, graph: &CommitGraph) -> IntegrityReport {
        let verdicts = classify(graph, &*self.verifier, self.config.verification.concurrency);
        let counts = verdicts.counts();

        let detector = DetectorConfig {
            timestamp_tolerance_secs: self.config.analysis.timestamp_tolerance_secs,
        };
        let anomalies = detect(graph, &verdicts, &detector);

        let total = u64::try_from(graph.len()).unwrap_or(u64::MAX);
        let breakdown = score(total, &counts, &anomalies, &self.config.scoring);
        debug!(
            base = breakdown.base_score,
            penalty = breakdown.penalty,
            score = breakdown.score,
            "Scored"
        );

        assemble(repo, graph, counts, anomalies, breakdown)
    }
}
