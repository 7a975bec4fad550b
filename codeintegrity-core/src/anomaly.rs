//! Provenance anomaly detection over a loaded commit graph.
//!
//! Each pass scans the graph independently and tags its findings with the
//! position of the commit they are anchored on. The merged output is sorted
//! by that position (oldest first) and then by pass order, so the result is
//! the same for the same graph and verdicts no matter how the passes run.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::graph::CommitGraph;
use crate::signature::Verdicts;
use crate::types::{Anomaly, AnomalyKind, CommitId, SignatureVerdict};

/// Detector tuning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectorConfig {
    /// Backwards clock skew allowed before a timestamp counts as regressed.
    pub timestamp_tolerance_secs: i64,
}

/// A finding plus the position it sorts under.
pub type Anchored = (usize, Anomaly);

/// Run every detection pass and merge the findings.
pub fn detect(graph: &CommitGraph, verdicts: &Verdicts, config: &DetectorConfig) -> Vec<Anomaly> {
    debug_assert_eq!(graph.len(), verdicts.len(), "one verdict per commit");

    let passes: [Vec<Anchored>; 5] = [
        dangling_parents(graph),
        multiple_roots(graph),
        non_monotonic_timestamps(graph, config.timestamp_tolerance_secs),
        unsigned_identity_mismatches(graph, verdicts),
        verification_downgrades(graph, verdicts),
    ];

    let mut anchored: Vec<(usize, usize, Anomaly)> = passes
        .into_iter()
        .enumerate()
        .flat_map(|(pass, found)| found.into_iter().map(move |(pos, a)| (pos, pass, a)))
        .collect();
    // Stable: findings of one pass at one position keep their emission order.
    anchored.sort_by_key(|(pos, pass, _)| (*pos, *pass));

    let anomalies: Vec<Anomaly> = anchored.into_iter().map(|(_, _, a)| a).collect();

    for anomaly in &anomalies {
        debug_assert!(
            anomaly.commits.iter().all(|c| graph.contains(c)),
            "{} references a commit outside the graph: {:?}",
            anomaly.kind,
            anomaly.commits
        );
    }

    debug!(count = anomalies.len(), "Anomaly detection complete");
    anomalies
}

/// Commits that declare a parent absent from the graph.
pub fn dangling_parents(graph: &CommitGraph) -> Vec<Anchored> {
    graph
        .commits()
        .iter()
        .enumerate()
        .filter_map(|(pos, commit)| {
            let missing = graph.dangling_parents(pos);
            if missing.is_empty() {
                return None;
            }
            let missing: Vec<&str> = missing.iter().map(|id| id.as_str()).collect();
            Some((
                pos,
                Anomaly::new(
                    AnomalyKind::DanglingParent,
                    vec![commit.id.clone()],
                    format!("parent(s) not in history: {}", missing.join(", ")),
                ),
            ))
        })
        .collect()
}

/// Every root after the oldest one.
pub fn multiple_roots(graph: &CommitGraph) -> Vec<Anchored> {
    let roots = graph.roots();
    let Some((&first, rest)) = roots.split_first() else {
        return Vec::new();
    };
    let first_id = &graph.commits()[first].id;
    rest.iter()
        .map(|&pos| {
            (
                pos,
                Anomaly::new(
                    AnomalyKind::MultipleRoots,
                    vec![first_id.clone(), graph.commits()[pos].id.clone()],
                    format!("{} roots in history", roots.len()),
                ),
            )
        })
        .collect()
}

/// Latest timestamp among a commit's ancestors and the commit holding it.
#[derive(Clone, Copy)]
struct Latest {
    time: DateTime<Utc>,
    pos: usize,
}

fn later(a: Option<Latest>, b: Option<Latest>) -> Option<Latest> {
    match (a, b) {
        (Some(x), Some(y)) => Some(if y.time > x.time { y } else { x }),
        (x, None) => x,
        (None, y) => y,
    }
}

/// Commits whose author or commit time is earlier than the latest
/// corresponding time of any ancestor, by more than `tolerance_secs`.
pub fn non_monotonic_timestamps(graph: &CommitGraph, tolerance_secs: i64) -> Vec<Anchored> {
    let commits = graph.commits();
    // Latest (author, commit) time over the commit itself and all ancestors.
    // Positions are topological, so parents are always filled in first.
    let mut through: Vec<(Option<Latest>, Option<Latest>)> = Vec::with_capacity(commits.len());
    let mut found = Vec::new();

    for (pos, commit) in commits.iter().enumerate() {
        let mut ancestors_author = None;
        let mut ancestors_commit = None;
        for parent in graph.parent_positions(pos) {
            if let Some(&(a, c)) = through.get(parent) {
                ancestors_author = later(ancestors_author, a);
                ancestors_commit = later(ancestors_commit, c);
            }
        }

        let regressed = |own: DateTime<Utc>, latest: Option<Latest>| {
            latest.filter(|l| (l.time - own).num_seconds() > tolerance_secs)
        };
        let author_regression = regressed(commit.author_time, ancestors_author);
        let commit_regression = regressed(commit.commit_time, ancestors_commit);

        if author_regression.is_some() || commit_regression.is_some() {
            let mut fields = Vec::new();
            if author_regression.is_some() {
                fields.push("author");
            }
            if commit_regression.is_some() {
                fields.push("commit");
            }
            let ancestor = author_regression.or(commit_regression).map_or(pos, |l| l.pos);
            found.push((
                pos,
                Anomaly::new(
                    AnomalyKind::NonMonotonicTimestamp,
                    vec![commit.id.clone(), commits[ancestor].id.clone()],
                    format!("{} time earlier than ancestor", fields.join(" and ")),
                ),
            ));
        }

        let own_author = Some(Latest {
            time: commit.author_time,
            pos,
        });
        let own_commit = Some(Latest {
            time: commit.commit_time,
            pos,
        });
        through.push((
            later(ancestors_author, own_author),
            later(ancestors_commit, own_commit),
        ));
    }

    found
}

/// Unsigned commits recorded by someone other than their author.
pub fn unsigned_identity_mismatches(graph: &CommitGraph, verdicts: &Verdicts) -> Vec<Anchored> {
    graph
        .commits()
        .iter()
        .enumerate()
        .filter(|(pos, commit)| {
            verdicts.get(*pos) == SignatureVerdict::Unsigned
                && !commit.author.same_email(&commit.committer)
        })
        .map(|(pos, commit)| {
            (
                pos,
                Anomaly::new(
                    AnomalyKind::UnsignedIdentityMismatch,
                    vec![commit.id.clone()],
                    format!(
                        "authored by <{}>, committed by <{}>",
                        commit.author.email, commit.committer.email
                    ),
                ),
            )
        })
        .collect()
}

/// Unsigned or invalid commits by authors who have verified commits elsewhere.
pub fn verification_downgrades(graph: &CommitGraph, verdicts: &Verdicts) -> Vec<Anchored> {
    let commits = graph.commits();
    let signers: HashSet<String> = commits
        .iter()
        .enumerate()
        .filter(|(pos, _)| verdicts.get(*pos) == SignatureVerdict::SignedVerified)
        .map(|(_, c)| c.author.email_key())
        .collect();
    if signers.is_empty() {
        return Vec::new();
    }

    commits
        .iter()
        .enumerate()
        .filter(|(pos, commit)| {
            matches!(
                verdicts.get(*pos),
                SignatureVerdict::Unsigned | SignatureVerdict::SignedInvalid
            ) && signers.contains(&commit.author.email_key())
        })
        .map(|(pos, commit)| {
            (
                pos,
                Anomaly::new(
                    AnomalyKind::VerificationDowngrade,
                    vec![commit.id.clone()],
                    format!(
                        "{} commit by <{}>, who signs elsewhere",
                        verdicts.get(pos).as_str(),
                        commit.author.email
                    ),
                ),
            )
        })
        .collect()
}

/// Commit ids implicated by any anomaly, deduplicated, in first-seen order.
pub fn implicated_commits(anomalies: &[Anomaly]) -> Vec<&CommitId> {
    let mut seen = HashSet::new();
    anomalies
        .iter()
        .flat_map(|a| a.commits.iter())
        .filter(|id| seen.insert(*id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Commit, Identity, Severity};
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn commit(id: &str, parents: &[&str], secs: i64) -> Commit {
        Commit {
            id: CommitId::new(id),
            parents: parents.iter().map(|p| CommitId::new(*p)).collect(),
            author: Identity::new("Ann", "ann@example.com"),
            committer: Identity::new("Ann", "ann@example.com"),
            author_time: at(secs),
            commit_time: at(secs),
            signature: None,
            summary: String::new(),
        }
    }

    fn graph(commits: Vec<Commit>) -> CommitGraph {
        CommitGraph::from_commits(commits, false).unwrap()
    }

    fn all(verdict: SignatureVerdict, n: usize) -> Verdicts {
        Verdicts::new(vec![verdict; n])
    }

    fn kinds(anomalies: &[Anomaly]) -> Vec<AnomalyKind> {
        anomalies.iter().map(|a| a.kind).collect()
    }

    #[test]
    fn clean_history_has_no_anomalies() {
        let g = graph(vec![
            commit("a", &[], 0),
            commit("b", &["a"], 10),
            commit("c", &["a"], 20),
            commit("d", &["b", "c"], 30),
        ]);
        let anomalies = detect(&g, &all(SignatureVerdict::Unsigned, 4), &DetectorConfig::default());
        assert!(anomalies.is_empty(), "{anomalies:?}");
    }

    #[test]
    fn dangling_parent_is_reported_once() {
        let g = graph(vec![commit("b", &["missing"], 10), commit("c", &["b"], 20)]);
        let anomalies = detect(&g, &all(SignatureVerdict::Unsigned, 2), &DetectorConfig::default());
        assert_eq!(kinds(&anomalies), [AnomalyKind::DanglingParent]);
        assert_eq!(anomalies[0].severity, Severity::High);
        assert_eq!(anomalies[0].commits, vec![CommitId::new("b")]);
        assert!(anomalies[0].detail.contains("missing"));
    }

    #[test]
    fn second_root_is_flagged_high() {
        let g = graph(vec![
            commit("a", &[], 0),
            commit("x", &[], 5),
            commit("m", &["a", "x"], 10),
        ]);
        let anomalies = detect(&g, &all(SignatureVerdict::Unsigned, 3), &DetectorConfig::default());
        assert_eq!(kinds(&anomalies), [AnomalyKind::MultipleRoots]);
        assert_eq!(anomalies[0].severity, Severity::High);
        assert_eq!(anomalies[0].commits, vec![CommitId::new("a"), CommitId::new("x")]);
    }

    #[test]
    fn three_roots_give_two_findings() {
        let g = graph(vec![commit("a", &[], 0), commit("b", &[], 1), commit("c", &[], 2)]);
        let found = multiple_roots(&g);
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|(_, a)| a.commits[0] == CommitId::new("a")));
    }

    #[test]
    fn timestamp_regression_against_grandparent() {
        // c is newer than its parent b but older than grandparent a.
        let mut b = commit("b", &["a"], 100);
        b.author_time = at(-50);
        b.commit_time = at(-50);
        let mut c = commit("c", &["b"], 0);
        c.author_time = at(-10);
        let g = graph(vec![commit("a", &[], 0), b, c]);

        let found = non_monotonic_timestamps(&g, 0);
        let ids: Vec<Vec<&str>> = found
            .iter()
            .map(|(_, a)| a.commits.iter().map(CommitId::as_str).collect())
            .collect();
        assert_eq!(ids, vec![vec!["b", "a"], vec!["c", "a"]]);
        assert_eq!(found[0].1.detail, "author and commit time earlier than ancestor");
        assert_eq!(found[1].1.detail, "author time earlier than ancestor");
    }

    #[test]
    fn timestamp_tolerance_absorbs_small_skew() {
        let g = graph(vec![commit("a", &[], 100), {
            let mut b = commit("b", &["a"], 100);
            b.author_time = at(40);
            b
        }]);
        assert_eq!(non_monotonic_timestamps(&g, 0).len(), 1);
        assert_eq!(non_monotonic_timestamps(&g, 59).len(), 1);
        assert!(non_monotonic_timestamps(&g, 60).is_empty());
        let found = non_monotonic_timestamps(&g, 0);
        assert_eq!(found[0].1.detail, "author time earlier than ancestor");
        assert_eq!(found[0].1.severity, Severity::Medium);
    }

    #[test]
    fn equal_timestamps_are_not_regressions() {
        let g = graph(vec![commit("a", &[], 0), commit("b", &["a"], 0)]);
        assert!(non_monotonic_timestamps(&g, 0).is_empty());
    }

    #[test]
    fn identity_mismatch_only_when_unsigned() {
        let mut b = commit("b", &["a"], 10);
        b.committer = Identity::new("Bot", "bot@example.com");
        let mut c = commit("c", &["b"], 20);
        c.committer = Identity::new("Ann", "ANN@example.com");
        let g = graph(vec![commit("a", &[], 0), b, c]);

        let unsigned = all(SignatureVerdict::Unsigned, 3);
        let found = unsigned_identity_mismatches(&g, &unsigned);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1.commits, vec![CommitId::new("b")]);

        let signed = Verdicts::new(vec![
            SignatureVerdict::Unsigned,
            SignatureVerdict::SignedUnverifiable,
            SignatureVerdict::Unsigned,
        ]);
        assert!(unsigned_identity_mismatches(&g, &signed).is_empty());
    }

    #[test]
    fn downgrade_requires_a_verified_commit_by_the_same_author() {
        let mut c = commit("c", &["b"], 20);
        c.author = Identity::new("Bob", "bob@example.com");
        c.committer = c.author.clone();
        let g = graph(vec![commit("a", &[], 0), commit("b", &["a"], 10), c, {
            let mut d = commit("d", &["c"], 30);
            d.author.email = "Ann@Example.com".into();
            d.committer.email = "Ann@Example.com".into();
            d
        }]);
        let verdicts = Verdicts::new(vec![
            SignatureVerdict::SignedVerified,
            SignatureVerdict::Unsigned,
            SignatureVerdict::Unsigned,
            SignatureVerdict::SignedInvalid,
        ]);

        let found = verification_downgrades(&g, &verdicts);
        let ids: Vec<&str> = found.iter().map(|(_, a)| a.commits[0].as_str()).collect();
        assert_eq!(ids, ["b", "d"]);
        assert!(found.iter().all(|(_, a)| a.severity == Severity::Low));
        assert!(found[1].1.detail.starts_with("signed_invalid"));

        assert!(verification_downgrades(&g, &all(SignatureVerdict::Unsigned, 4)).is_empty());
    }

    #[test]
    fn unverifiable_is_not_a_downgrade() {
        let g = graph(vec![commit("a", &[], 0), commit("b", &["a"], 10)]);
        let verdicts = Verdicts::new(vec![
            SignatureVerdict::SignedVerified,
            SignatureVerdict::SignedUnverifiable,
        ]);
        assert!(verification_downgrades(&g, &verdicts).is_empty());
    }

    #[test]
    fn output_is_ordered_by_position_then_pass() {
        // b: dangling parent + second root + mismatch + downgrade, all at one position.
        let mut b = commit("b", &["gone"], 10);
        b.committer = Identity::new("Bot", "bot@example.com");
        let g = graph(vec![commit("a", &[], 0), b, commit("c", &["a"], 5)]);
        // History order is a, c, b.
        let verdicts = Verdicts::new(vec![
            SignatureVerdict::SignedVerified,
            SignatureVerdict::SignedVerified,
            SignatureVerdict::Unsigned,
        ]);

        let anomalies = detect(&g, &verdicts, &DetectorConfig::default());
        assert_eq!(
            kinds(&anomalies),
            [
                AnomalyKind::DanglingParent,
                AnomalyKind::MultipleRoots,
                AnomalyKind::UnsignedIdentityMismatch,
                AnomalyKind::VerificationDowngrade,
            ]
        );
        assert!(anomalies.iter().all(|a| a.commits.contains(&CommitId::new("b"))));
    }

    #[test]
    fn detection_is_idempotent() {
        let mut b = commit("b", &["gone"], 10);
        b.committer = Identity::new("Bot", "bot@example.com");
        let g = graph(vec![commit("a", &[], 50), b, commit("c", &["a", "b"], 5)]);
        let verdicts = Verdicts::new(vec![
            SignatureVerdict::SignedVerified,
            SignatureVerdict::Unsigned,
            SignatureVerdict::SignedInvalid,
        ]);
        let config = DetectorConfig::default();

        let first = serde_json::to_string(&detect(&g, &verdicts, &config)).unwrap();
        let second = serde_json::to_string(&detect(&g, &verdicts, &config)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn implicated_commits_are_deduplicated() {
        let anomalies = vec![
            Anomaly::new(AnomalyKind::MultipleRoots, vec![CommitId::new("a"), CommitId::new("b")], ""),
            Anomaly::new(AnomalyKind::VerificationDowngrade, vec![CommitId::new("b")], ""),
        ];
        let ids: Vec<&str> = implicated_commits(&anomalies).into_iter().map(CommitId::as_str).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    /// Commit `i` gets a first parent below it and, when asked, a second one
    /// (a merge). Times grow with `i`, so every edge moves forward in time.
    fn single_root_history(shape: &[(usize, Option<usize>)]) -> Vec<Commit> {
        let names: Vec<String> = (0..=shape.len()).map(|i| format!("c{i:03}")).collect();
        let mut commits = vec![commit(&names[0], &[], 0)];
        for (i, &(first, second)) in shape.iter().enumerate() {
            let pos = i + 1;
            let first = first % pos;
            let mut parents = vec![names[first].as_str()];
            if let Some(second) = second.map(|s| s % pos).filter(|&s| s != first) {
                parents.push(names[second].as_str());
            }
            let secs = i64::try_from(pos).unwrap() * 60;
            commits.push(commit(&names[pos], &parents, secs));
        }
        commits
    }

    fn unverified_verdict() -> impl Strategy<Value = SignatureVerdict> {
        prop_oneof![
            Just(SignatureVerdict::Unsigned),
            Just(SignatureVerdict::SignedUnverifiable),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn forward_single_root_history_is_clean(
            shape in prop::collection::vec((0usize..64, prop::option::of(0usize..64)), 0..40),
            verdicts in prop::collection::vec(unverified_verdict(), 40),
        ) {
            let g = graph(single_root_history(&shape));
            let verdicts = Verdicts::new(verdicts[..g.len()].to_vec());
            let anomalies = detect(&g, &verdicts, &DetectorConfig::default());
            prop_assert!(anomalies.is_empty(), "{:?}", anomalies);
        }

        #[test]
        fn repeated_detection_serializes_identically(
            shape in prop::collection::vec((0usize..64, prop::option::of(0usize..64)), 0..40),
            skew in prop::collection::vec(-120i64..120, 40),
            foreign in prop::collection::vec(any::<bool>(), 40),
            verdicts in prop::collection::vec(
                prop_oneof![
                    Just(SignatureVerdict::Unsigned),
                    Just(SignatureVerdict::SignedVerified),
                    Just(SignatureVerdict::SignedUnverifiable),
                    Just(SignatureVerdict::SignedInvalid),
                ],
                40,
            ),
        ) {
            let mut commits = single_root_history(&shape);
            for (i, c) in commits.iter_mut().enumerate() {
                c.author_time = at(c.author_time.timestamp() - 1_700_000_000 + skew[i]);
                if foreign[i] {
                    c.committer = Identity::new("Bot", "bot@example.com");
                }
            }
            let g = graph(commits);
            let verdicts = Verdicts::new(verdicts[..g.len()].to_vec());
            let config = DetectorConfig::default();

            let first = serde_json::to_string(&detect(&g, &verdicts, &config)).unwrap();
            let second = serde_json::to_string(&detect(&g, &verdicts, &config)).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
