// Integration test utilities and git fixtures for codeintegrity.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use codeintegrity_core::config::IntegrityConfig;
use codeintegrity_core::pipeline::{IntegrityPipeline, RepoTarget};
use codeintegrity_core::report::IntegrityReport;
use codeintegrity_core::runner::{CollectSink, RunSummary, Runner};
use codeintegrity_core::signature::NoopVerifier;
use codeintegrity_core::types::RepoId;

/// Base of fixture timestamps: 2025-01-15T10:00:00Z.
pub const EPOCH: i64 = 1_736_935_200;

pub const ANN: (&str, &str) = ("Ann", "ann@example.com");
pub const DAVE: (&str, &str) = ("Dave", "dave@example.com");
pub const ERIN: (&str, &str) = ("Erin", "erin@example.com");

/// A test fixture with a temporary git repository.
#[derive(Debug)]
pub struct TestRepo {
    pub dir: tempfile::TempDir,
}

impl TestRepo {
    /// An initialized repository with no commits, on branch `main`.
    pub fn empty() -> Self {
        let dir = tempfile::tempdir().expect("create tempdir");
        git(dir.path(), &["init", "--quiet", "--initial-branch=main"], &[]);
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Record an empty commit at `EPOCH + offset_secs` and return its id.
    pub fn commit(
        &self,
        message: &str,
        author: (&str, &str),
        committer: (&str, &str),
        offset_secs: i64,
    ) -> String {
        let date = format!("@{} +0000", EPOCH + offset_secs);
        git(
            self.path(),
            &["commit", "--quiet", "--allow-empty", "-m", message],
            &[
                ("GIT_AUTHOR_NAME", author.0),
                ("GIT_AUTHOR_EMAIL", author.1),
                ("GIT_AUTHOR_DATE", date.as_str()),
                ("GIT_COMMITTER_NAME", committer.0),
                ("GIT_COMMITTER_EMAIL", committer.1),
                ("GIT_COMMITTER_DATE", date.as_str()),
            ],
        );
        self.rev_parse("HEAD")
    }

    pub fn rev_parse(&self, rev: &str) -> String {
        git_output(self.path(), &["rev-parse", rev])
    }

    /// Run a git command as Ann.
    pub fn git(&self, args: &[&str]) {
        git(self.path(), args, &as_ann(None));
    }

    /// `n` commits by Ann, one minute apart.
    pub fn linear(n: usize) -> Self {
        let repo = Self::empty();
        for i in 0..n {
            let offset = i64::try_from(i).expect("small fixture") * 60;
            repo.commit(&format!("commit {i}"), ANN, ANN, offset);
        }
        repo
    }

    /// Three commits by Ann, then one Dave authored and Erin committed.
    pub fn foreign_committer() -> Self {
        let repo = Self::linear(3);
        repo.commit("apply patch", DAVE, ERIN, 600);
        repo
    }

    /// A commit whose timestamps are an hour older than its parent's.
    pub fn backdated() -> Self {
        let repo = Self::linear(2);
        repo.commit("from the past", ANN, ANN, -3600);
        repo
    }

    /// `main` and an unrelated orphan branch, merged: two roots.
    pub fn orphan_merge() -> Self {
        let repo = Self::linear(2);
        repo.git(&["checkout", "--quiet", "--orphan", "side"]);
        repo.commit("side root", ANN, ANN, 300);
        repo.git(&["checkout", "--quiet", "main"]);
        let date = format!("@{} +0000", EPOCH + 900);
        git(
            repo.path(),
            &["merge", "--quiet", "--no-edit", "--allow-unrelated-histories", "side"],
            &as_ann(Some(date.as_str())),
        );
        repo
    }

    /// Three commits whose root object has been deleted from the object store.
    pub fn dangling_root() -> Self {
        let repo = Self::linear(3);
        let root = repo.rev_parse("HEAD~2");
        let object = repo
            .path()
            .join(".git")
            .join("objects")
            .join(&root[..2])
            .join(&root[2..]);
        std::fs::remove_file(&object).expect("remove loose root object");
        repo
    }

    /// Two commits by Ann, then a commit carrying a PGP signature block no
    /// keyring can check.
    pub fn signed_tip() -> Self {
        let repo = Self::linear(2);
        let parent = repo.rev_parse("HEAD");
        let tree = repo.rev_parse("HEAD^{tree}");
        let when = EPOCH + 600;
        let raw = format!(
            "tree {tree}\nparent {parent}\nauthor Ann <ann@example.com> {when} +0000\ncommitter Ann <ann@example.com> {when} +0000\ngpgsig -----BEGIN PGP SIGNATURE-----\n \n iQEzBAABCAAdFiEE\n -----END PGP SIGNATURE-----\n\nsigned change\n"
        );
        let id = repo.write_commit(&raw);
        repo.git(&["update-ref", "refs/heads/main", &id]);
        repo
    }

    /// Store a raw commit object and return its id.
    pub fn write_commit(&self, raw: &str) -> String {
        let object = self.path().join("raw-commit.txt");
        std::fs::write(&object, raw).expect("write raw commit");
        let id = git_output(
            self.path(),
            &["hash-object", "-t", "commit", "-w", "raw-commit.txt"],
        );
        std::fs::remove_file(&object).expect("remove raw commit");
        id
    }

    /// Copy `rev` with an edited message but its original signature header,
    /// and point `refs/heads/<branch>` at the copy.
    pub fn tampered_copy(&self, rev: &str, branch: &str) -> String {
        let raw = git_output(self.path(), &["cat-file", "commit", rev]);
        let (header, message) = raw.split_once("\n\n").expect("commit has a message");
        let id = self.write_commit(&format!("{header}\n\n{message} (edited)\n"));
        self.git(&["update-ref", &format!("refs/heads/{branch}"), &id]);
        id
    }

    pub fn target(&self, owner: &str, name: &str) -> RepoTarget {
        RepoTarget::new(RepoId::new(owner, name), self.path())
    }
}

fn as_ann(date: Option<&str>) -> Vec<(&str, &str)> {
    let mut envs = vec![
        ("GIT_AUTHOR_NAME", ANN.0),
        ("GIT_AUTHOR_EMAIL", ANN.1),
        ("GIT_COMMITTER_NAME", ANN.0),
        ("GIT_COMMITTER_EMAIL", ANN.1),
    ];
    if let Some(date) = date {
        envs.push(("GIT_AUTHOR_DATE", date));
        envs.push(("GIT_COMMITTER_DATE", date));
    }
    envs
}

fn git(dir: &Path, args: &[&str], envs: &[(&str, &str)]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .envs(envs.iter().copied())
        .output()
        .unwrap_or_else(|e| panic!("git {}: {e}", args.join(" ")));
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!("git {} failed: {stderr}", args.join(" "));
    }
}

fn git_output(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap_or_else(|e| panic!("git {}: {e}", args.join(" ")));
    assert!(
        output.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Pipeline with default config and no keyring.
pub fn pipeline() -> IntegrityPipeline {
    IntegrityPipeline::new(IntegrityConfig::default(), Arc::new(NoopVerifier))
}

/// Run `targets` through the runner and return the summary plus every
/// collected report, sorted by `owner/repo`.
pub async fn run_targets(
    targets: Vec<RepoTarget>,
    max_concurrent: usize,
) -> (RunSummary, Vec<IntegrityReport>) {
    let sink = Arc::new(CollectSink::new());
    let summary = Runner::new(Arc::new(pipeline()))
        .with_max_concurrent(max_concurrent)
        .run(targets, sink.clone())
        .await;
    (summary, sink.reports().await)
}

/// A path that is certainly not a repository.
pub fn missing_repo(dir: &Path) -> PathBuf {
    dir.join("does-not-exist")
}
