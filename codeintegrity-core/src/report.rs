use serde::{Deserialize, Serialize};

use crate::graph::CommitGraph;
use crate::score::ScoreBreakdown;
use crate::types::{Anomaly, CommitId, RepoId, VerdictCounts};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakdownRecord {
    pub base_score: f64,
    pub penalty: u64,
}

/// Final per-repository artifact handed to persistence. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub owner: String,
    pub repo: String,
    pub total_commits: u64,
    pub verdict_counts: VerdictCounts,
    pub anomalies: Vec<Anomaly>,
    pub score: u8,
    pub breakdown: BreakdownRecord,
    /// Whether the analyzed clone was shallow (dangling parents expected).
    pub shallow: bool,
    /// Commit the analyzed ref resolved to.
    pub head: CommitId,
}

impl IntegrityReport {
    /// `<owner><repo>-result.json`.
    pub fn file_name(&self) -> String {
        format!("{}{}-result.json", self.owner, self.repo)
    }
}

/// Package pipeline outputs into the report. Structural only.
pub fn assemble(
    repo: &RepoId,
    graph: &CommitGraph,
    counts: VerdictCounts,
    anomalies: Vec<Anomaly>,
    breakdown: ScoreBreakdown,
) -> IntegrityReport {
    IntegrityReport {
        owner: repo.owner.clone(),
        repo: repo.name.clone(),
        total_commits: u64::try_from(graph.len()).unwrap_or(u64::MAX),
        verdict_counts: counts,
        anomalies,
        score: breakdown.score,
        breakdown: BreakdownRecord {
            base_score: breakdown.base_score,
            penalty: breakdown.penalty,
        },
        shallow: graph.is_shallow(),
        head: graph.tip().clone(),
    }
}
