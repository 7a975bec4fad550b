// Integrity scoring: verified share of history minus anomaly penalties.
//
// Score arithmetic intentionally casts int→float and back.
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

use serde::{Deserialize, Serialize};

use crate::types::{Anomaly, SeverityWeights, VerdictCounts};

/// How the final score was reached.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    /// `100 × verified / total`, before penalties.
    pub base_score: f64,
    /// Sum of anomaly weights, uncapped.
    pub penalty: u64,
    /// `round(clamp(base − penalty, 0, 100))`.
    pub score: u8,
}

/// Reduce commit counts and anomalies to a score in `[0, 100]`.
///
/// Total: an empty history scores 0, and no amount of penalty pushes the
/// score below 0.
pub fn score(
    total_commits: u64,
    counts: &VerdictCounts,
    anomalies: &[Anomaly],
    weights: &SeverityWeights,
) -> ScoreBreakdown {
    let base_score = if total_commits == 0 {
        0.0
    } else {
        100.0 * counts.signed_verified.min(total_commits) as f64 / total_commits as f64
    };

    let penalty: u64 = anomalies.iter().map(|a| u64::from(weights.weight(a))).sum();
    let applied = (penalty as f64).min(base_score);
    let score = (base_score - applied).clamp(0.0, 100.0).round() as u8;

    ScoreBreakdown {
        base_score,
        penalty,
        score,
    }
}
