use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, TimeZone, Utc};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::{debug, info, warn};

use crate::error::LoadError;
use crate::signature::extract_signature;
use crate::types::{Commit, CommitId, Identity};

/// Every commit reachable from one ref, in topological order (oldest first),
/// with parent → child adjacency. Read-only once built.
#[derive(Debug)]
pub struct CommitGraph {
    commits: Vec<Commit>,
    index: HashMap<CommitId, usize>,
    /// Node `i` is the commit at position `i`; edges run parent → child.
    dag: DiGraph<(), ()>,
    tip: CommitId,
    is_shallow: bool,
}

impl CommitGraph {
    /// Build a graph from decoded commits. The newest commit in topological
    /// order becomes the tip.
    pub fn from_commits(commits: Vec<Commit>, is_shallow: bool) -> Result<Self, LoadError> {
        let tip = topo_order(&commits)
            .last()
            .map(|&i| commits[i].id.clone())
            .ok_or_else(|| LoadError::EmptyHistory("<commits>".into()))?;
        Ok(Self::build(commits, tip, is_shallow))
    }

    fn build(commits: Vec<Commit>, tip: CommitId, is_shallow: bool) -> Self {
        let mut seen = HashSet::new();
        let mut unique: Vec<Commit> = commits
            .into_iter()
            .filter(|c| seen.insert(c.id.clone()))
            .collect();

        let order = topo_order(&unique);
        let mut slots: Vec<Option<Commit>> = unique.drain(..).map(Some).collect();
        let ordered: Vec<Commit> = order.iter().filter_map(|&i| slots[i].take()).collect();

        let index: HashMap<CommitId, usize> = ordered
            .iter()
            .enumerate()
            .map(|(pos, c)| (c.id.clone(), pos))
            .collect();

        let mut dag = DiGraph::with_capacity(ordered.len(), ordered.len());
        for _ in &ordered {
            dag.add_node(());
        }
        for (pos, commit) in ordered.iter().enumerate() {
            let mut linked = HashSet::new();
            for parent in &commit.parents {
                if let Some(&parent_pos) = index.get(parent) {
                    if linked.insert(parent_pos) {
                        dag.add_edge(NodeIndex::new(parent_pos), NodeIndex::new(pos), ());
                    }
                }
            }
        }

        Self {
            commits: ordered,
            index,
            dag,
            tip,
            is_shallow,
        }
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    /// Commits in topological order, oldest first.
    pub fn commits(&self) -> &[Commit] {
        &self.commits
    }

    pub fn get(&self, id: &CommitId) -> Option<&Commit> {
        self.position(id).map(|pos| &self.commits[pos])
    }

    pub fn contains(&self, id: &CommitId) -> bool {
        self.index.contains_key(id)
    }

    /// Position of a commit in history order.
    pub fn position(&self, id: &CommitId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// The commit the ref resolved to.
    pub fn tip(&self) -> &CommitId {
        &self.tip
    }

    pub fn is_shallow(&self) -> bool {
        self.is_shallow
    }

    /// Positions of the parents present in the graph.
    pub fn parent_positions(&self, pos: usize) -> Vec<usize> {
        let mut parents: Vec<usize> = self
            .dag
            .neighbors_directed(NodeIndex::new(pos), Direction::Incoming)
            .map(NodeIndex::index)
            .collect();
        parents.sort_unstable();
        parents
    }

    /// Positions of the children present in the graph.
    pub fn child_positions(&self, pos: usize) -> Vec<usize> {
        let mut children: Vec<usize> = self
            .dag
            .neighbors_directed(NodeIndex::new(pos), Direction::Outgoing)
            .map(NodeIndex::index)
            .collect();
        children.sort_unstable();
        children
    }

    pub fn children(&self, id: &CommitId) -> Vec<&Commit> {
        self.position(id)
            .map(|pos| {
                self.child_positions(pos)
                    .into_iter()
                    .map(|c| &self.commits[c])
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Declared parents of the commit at `pos` that are absent from the graph.
    pub fn dangling_parents(&self, pos: usize) -> Vec<&CommitId> {
        self.commits[pos]
            .parents
            .iter()
            .filter(|p| !self.index.contains_key(*p))
            .collect()
    }

    /// Positions of commits with no parent present in the graph, oldest first.
    /// Commits whose parents all dangle count as roots.
    pub fn roots(&self) -> Vec<usize> {
        (0..self.commits.len())
            .filter(|&pos| {
                self.dag
                    .neighbors_directed(NodeIndex::new(pos), Direction::Incoming)
                    .next()
                    .is_none()
            })
            .collect()
    }
}

/// Kahn's algorithm over present parents. Ready commits are released oldest
/// commit time first, then by hash, so the order is deterministic.
fn topo_order(commits: &[Commit]) -> Vec<usize> {
    let index: HashMap<&CommitId, usize> =
        commits.iter().enumerate().map(|(i, c)| (&c.id, i)).collect();

    let mut indegree = vec![0usize; commits.len()];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); commits.len()];
    for (i, commit) in commits.iter().enumerate() {
        let present: HashSet<usize> = commit
            .parents
            .iter()
            .filter_map(|p| index.get(p).copied())
            .collect();
        indegree[i] = present.len();
        for p in present {
            children[p].push(i);
        }
    }

    let key = |i: usize| Reverse((commits[i].commit_time, commits[i].id.clone(), i));
    let mut ready: BinaryHeap<_> = (0..commits.len())
        .filter(|&i| indegree[i] == 0)
        .map(key)
        .collect();

    let mut order = Vec::with_capacity(commits.len());
    while let Some(Reverse((_, _, i))) = ready.pop() {
        order.push(i);
        for &child in &children[i] {
            indegree[child] -= 1;
            if indegree[child] == 0 {
                ready.push(key(child));
            }
        }
    }

    if order.len() < commits.len() {
        // Only reachable with hand-built cyclic input.
        warn!(
            missing = commits.len() - order.len(),
            "Commit parent links form a cycle; appending remaining commits by time"
        );
        let placed: HashSet<usize> = order.iter().copied().collect();
        let mut rest: Vec<usize> = (0..commits.len()).filter(|i| !placed.contains(i)).collect();
        rest.sort_by(|&a, &b| {
            (commits[a].commit_time, &commits[a].id).cmp(&(commits[b].commit_time, &commits[b].id))
        });
        order.extend(rest);
    }

    order
}

// ── Loader ─────────────────────────────────────────────────────────

/// Read every commit reachable from `reference` in the repository at `path`.
///
/// An empty `reference` resolves to `HEAD`, the default branch of a clone.
/// Parents whose objects are missing are kept as dangling references rather
/// than failing the load.
pub fn load_commit_graph(path: &Path, reference: &str) -> Result<CommitGraph, LoadError> {
    let start = Instant::now();

    let repo = gix::open(path).map_err(|e| {
        LoadError::CorruptRepository(format!("cannot open {}: {e}", path.display()))
    })?;

    let tip = resolve_tip(&repo, reference)?;
    debug!(tip = %tip, reference, "Resolved tip");

    let mut commits = Vec::new();
    let mut missing = 0usize;
    let mut queued: HashSet<gix::ObjectId> = HashSet::from([tip]);
    let mut queue: VecDeque<gix::ObjectId> = VecDeque::from([tip]);

    while let Some(oid) = queue.pop_front() {
        let Some(object) = repo
            .try_find_object(oid)
            .map_err(|e| LoadError::CorruptRepository(format!("cannot read {oid}: {e}")))?
        else {
            if oid == tip {
                return Err(LoadError::CorruptRepository(format!(
                    "tip commit {oid} is missing"
                )));
            }
            missing += 1;
            continue;
        };

        let commit = object
            .try_into_commit()
            .map_err(|e| LoadError::CorruptRepository(format!("{oid} is not a commit: {e}")))?;
        let decoded = decode_commit(&commit)?;

        for parent in commit.parent_ids() {
            let parent = parent.detach();
            if queued.insert(parent) {
                queue.push_back(parent);
            }
        }
        commits.push(decoded);
    }

    if commits.is_empty() {
        return Err(LoadError::EmptyHistory(display_ref(reference).to_string()));
    }

    let graph = CommitGraph::build(commits, CommitId::from(tip), repo.is_shallow());
    info!(
        commits = graph.len(),
        roots = graph.roots().len(),
        missing_objects = missing,
        shallow = graph.is_shallow(),
        duration = ?start.elapsed(),
        "Commit graph loaded"
    );
    Ok(graph)
}

fn display_ref(reference: &str) -> &str {
    if reference.is_empty() { "HEAD" } else { reference }
}

fn resolve_tip(repo: &gix::Repository, reference: &str) -> Result<gix::ObjectId, LoadError> {
    if reference.is_empty() {
        let head = repo
            .head()
            .map_err(|e| LoadError::CorruptRepository(format!("cannot read HEAD: {e}")))?;
        if head.is_unborn() {
            return Err(LoadError::EmptyHistory("HEAD".into()));
        }
        return head
            .id()
            .map(gix::Id::detach)
            .ok_or_else(|| LoadError::EmptyHistory("HEAD".into()));
    }

    let candidates = [reference.to_string(), format!("origin/{reference}")];
    for spec in &candidates {
        let Ok(id) = repo.rev_parse_single(spec.as_str()) else {
            continue;
        };
        let object = id
            .object()
            .map_err(|e| LoadError::CorruptRepository(format!("cannot read {spec}: {e}")))?;
        return object
            .peel_to_commit()
            .map(|c| c.id)
            .map_err(|_| LoadError::RefNotFound(format!("{reference} does not name a commit")));
    }
    Err(LoadError::RefNotFound(reference.to_string()))
}

fn decode_commit(commit: &gix::Commit<'_>) -> Result<Commit, LoadError> {
    let id = CommitId::from(commit.id);
    let bad = |what: &str, e: String| LoadError::CorruptRepository(format!("{id}: bad {what}: {e}"));

    let author = commit.author().map_err(|e| bad("author", e.to_string()))?;
    let committer = commit
        .committer()
        .map_err(|e| bad("committer", e.to_string()))?;
    let author_time = author
        .time()
        .ok()
        .and_then(|t| gix_time_to_chrono(&t))
        .ok_or_else(|| bad("author time", "unparseable".into()))?;
    let commit_time = committer
        .time()
        .ok()
        .and_then(|t| gix_time_to_chrono(&t))
        .ok_or_else(|| bad("committer time", "unparseable".into()))?;

    let message = commit.message_raw_sloppy().to_string();
    let summary = message.lines().next().unwrap_or_default().trim().to_string();

    Ok(Commit {
        id: id.clone(),
        parents: commit
            .parent_ids()
            .map(|p| CommitId::from(p.detach()))
            .collect(),
        author: Identity::new(author.name.to_string(), author.email.to_string()),
        committer: Identity::new(committer.name.to_string(), committer.email.to_string()),
        author_time,
        commit_time,
        signature: extract_signature(&commit.data),
        summary,
    })
}

fn gix_time_to_chrono(time: &gix::date::Time) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(time.seconds, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SignatureFormat;
    use std::process::Command;

    fn git(dir: &Path, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .env("GIT_AUTHOR_NAME", "Test")
            .env("GIT_AUTHOR_EMAIL", "test@example.com")
            .env("GIT_COMMITTER_NAME", "Test")
            .env("GIT_COMMITTER_EMAIL", "test@example.com")
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .output()
            .expect("git command failed");
        assert!(
            output.status.success(),
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    fn commit(dir: &Path, file: &str, message: &str, date: &str) {
        std::fs::write(dir.join(file), message).unwrap();
        git(dir, &["add", "."]);
        let output = Command::new("git")
            .args(["commit", "-q", "--no-gpg-sign", "-m", message])
            .current_dir(dir)
            .env("GIT_AUTHOR_DATE", date)
            .env("GIT_COMMITTER_DATE", date)
            .output()
            .expect("git commit failed");
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    }

    fn linear_repo(dir: &Path) {
        git(dir, &["init", "-q", "--initial-branch=main"]);
        git(dir, &["config", "user.email", "test@example.com"]);
        git(dir, &["config", "user.name", "Test"]);
        commit(dir, "a.txt", "first", "2024-01-01T00:00:00+00:00");
        commit(dir, "b.txt", "second", "2024-01-02T00:00:00+00:00");
        commit(dir, "c.txt", "third", "2024-01-03T00:00:00+00:00");
    }

    fn make_commit(id: &str, parents: &[&str], secs: i64) -> Commit {
        let time = Utc.timestamp_opt(secs, 0).unwrap();
        Commit {
            id: CommitId::new(id),
            parents: parents.iter().map(|p| CommitId::new(*p)).collect(),
            author: Identity::new("A", "a@example.com"),
            committer: Identity::new("A", "a@example.com"),
            author_time: time,
            commit_time: time,
            signature: None,
            summary: String::new(),
        }
    }

    #[test]
    fn from_commits_orders_parents_first() {
        // Input newest first, as a log would list it.
        let graph = CommitGraph::from_commits(
            vec![
                make_commit("d", &["b", "c"], 40),
                make_commit("c", &["a"], 30),
                make_commit("b", &["a"], 20),
                make_commit("a", &[], 10),
            ],
            false,
        )
        .unwrap();

        let ids: Vec<&str> = graph.commits().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c", "d"]);
        assert_eq!(graph.tip().as_str(), "d");
        assert_eq!(graph.roots(), vec![0]);
        assert_eq!(graph.parent_positions(3), vec![1, 2]);
        assert_eq!(graph.child_positions(0), vec![1, 2]);
        let children: Vec<&str> = graph
            .children(&CommitId::new("a"))
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(children, ["b", "c"]);
    }

    #[test]
    fn parent_order_wins_over_timestamps() {
        // Child carries an older timestamp than its parent.
        let graph = CommitGraph::from_commits(
            vec![make_commit("b", &["a"], 5), make_commit("a", &[], 50)],
            false,
        )
        .unwrap();
        assert_eq!(graph.commits()[0].id.as_str(), "a");
        assert_eq!(graph.commits()[1].id.as_str(), "b");
    }

    #[test]
    fn dangling_parents_become_roots() {
        let graph = CommitGraph::from_commits(
            vec![make_commit("b", &["gone"], 20), make_commit("c", &["b"], 30)],
            true,
        )
        .unwrap();
        assert_eq!(graph.roots(), vec![0]);
        assert_eq!(graph.dangling_parents(0), vec![&CommitId::new("gone")]);
        assert!(graph.dangling_parents(1).is_empty());
        assert!(graph.is_shallow());
    }

    #[test]
    fn duplicate_commits_are_collapsed() {
        let graph = CommitGraph::from_commits(
            vec![make_commit("a", &[], 10), make_commit("a", &[], 10)],
            false,
        )
        .unwrap();
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn from_commits_rejects_empty() {
        let err = CommitGraph::from_commits(Vec::new(), false).unwrap_err();
        assert!(matches!(err, LoadError::EmptyHistory(_)));
    }

    #[test]
    fn loads_default_branch() {
        let tmp = tempfile::tempdir().unwrap();
        linear_repo(tmp.path());

        let graph = load_commit_graph(tmp.path(), "").unwrap();
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.roots().len(), 1);
        let summaries: Vec<&str> = graph.commits().iter().map(|c| c.summary.as_str()).collect();
        assert_eq!(summaries, ["first", "second", "third"]);
        assert_eq!(graph.tip(), &graph.commits()[2].id);
        assert!(!graph.is_shallow());

        let first = &graph.commits()[0];
        assert!(first.parents.is_empty());
        assert_eq!(first.author.email, "test@example.com");
        assert!(first.signature.is_none());
        assert_eq!(first.author_time.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn loads_named_ref() {
        let tmp = tempfile::tempdir().unwrap();
        linear_repo(tmp.path());
        git(tmp.path(), &["checkout", "-q", "-b", "feature"]);
        commit(tmp.path(), "d.txt", "fourth", "2024-01-04T00:00:00+00:00");
        git(tmp.path(), &["checkout", "-q", "main"]);
        git(tmp.path(), &["tag", "v1", "HEAD~1"]);

        assert_eq!(load_commit_graph(tmp.path(), "").unwrap().len(), 3);
        assert_eq!(load_commit_graph(tmp.path(), "feature").unwrap().len(), 4);
        assert_eq!(load_commit_graph(tmp.path(), "v1").unwrap().len(), 2);
    }

    #[test]
    fn missing_ref_is_ref_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        linear_repo(tmp.path());
        let err = load_commit_graph(tmp.path(), "does-not-exist").unwrap_err();
        assert!(matches!(err, LoadError::RefNotFound(_)), "got {err:?}");
    }

    #[test]
    fn empty_repository_is_empty_history() {
        let tmp = tempfile::tempdir().unwrap();
        git(tmp.path(), &["init", "-q", "--initial-branch=main"]);
        let err = load_commit_graph(tmp.path(), "").unwrap_err();
        assert!(matches!(err, LoadError::EmptyHistory(_)), "got {err:?}");
    }

    #[test]
    fn non_repository_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let err = load_commit_graph(&tmp.path().join("nothing-here"), "").unwrap_err();
        assert!(matches!(err, LoadError::CorruptRepository(_)), "got {err:?}");
    }

    #[test]
    fn missing_parent_object_is_dangling_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        linear_repo(tmp.path());
        let root = git(tmp.path(), &["rev-list", "--max-parents=0", "HEAD"]);
        let (dir, file) = root.split_at(2);
        std::fs::remove_file(tmp.path().join(".git/objects").join(dir).join(file)).unwrap();

        let graph = load_commit_graph(tmp.path(), "").unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.roots(), vec![0]);
        assert_eq!(graph.dangling_parents(0), vec![&CommitId::new(root)]);
    }

    #[test]
    fn unrelated_histories_have_two_roots() {
        let tmp = tempfile::tempdir().unwrap();
        linear_repo(tmp.path());
        git(tmp.path(), &["checkout", "-q", "--orphan", "other"]);
        git(tmp.path(), &["rm", "-rq", "--cached", "."]);
        commit(tmp.path(), "z.txt", "orphan", "2024-02-01T00:00:00+00:00");
        git(tmp.path(), &["checkout", "-q", "-f", "main"]);
        git(
            tmp.path(),
            &[
                "-c",
                "commit.gpgsign=false",
                "merge",
                "-q",
                "--allow-unrelated-histories",
                "-m",
                "join",
                "other",
            ],
        );

        let graph = load_commit_graph(tmp.path(), "").unwrap();
        assert_eq!(graph.len(), 5);
        assert_eq!(graph.roots().len(), 2);
        let merge = graph.get(graph.tip()).unwrap();
        assert_eq!(merge.parents.len(), 2);
    }

    #[test]
    fn signature_header_is_extracted() {
        let tmp = tempfile::tempdir().unwrap();
        linear_repo(tmp.path());
        let tree = git(tmp.path(), &["rev-parse", "HEAD^{tree}"]);
        let parent = git(tmp.path(), &["rev-parse", "HEAD"]);
        let raw = format!(
            "tree {tree}\nparent {parent}\n\
             author Test <test@example.com> 1704326400 +0000\n\
             committer Test <test@example.com> 1704326400 +0000\n\
             gpgsig -----BEGIN PGP SIGNATURE-----\n \n iQEzBAAB\n -----END PGP SIGNATURE-----\n\
             \nsigned\n"
        );
        let sig_path = tmp.path().join("raw-commit");
        std::fs::write(&sig_path, &raw).unwrap();
        let oid = git(
            tmp.path(),
            &["hash-object", "-t", "commit", "-w", sig_path.to_str().unwrap()],
        );
        git(tmp.path(), &["update-ref", "refs/heads/signed", &oid]);

        let graph = load_commit_graph(tmp.path(), "signed").unwrap();
        let tip = graph.get(graph.tip()).unwrap();
        let block = tip.signature.as_ref().expect("signature block");
        assert_eq!(block.format, SignatureFormat::OpenPgp);
        assert!(block.armored.starts_with("-----BEGIN PGP SIGNATURE-----\n"));
        assert!(!String::from_utf8_lossy(&block.payload).contains("gpgsig"));
        assert_eq!(graph.len(), 4);
    }
}
