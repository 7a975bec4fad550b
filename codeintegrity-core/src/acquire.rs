//! Making repositories available on disk before analysis.
//!
//! Cloning shells out to `git`; the pinned `gix` features cover reading
//! repositories only. Credentials go through a throwaway credential helper
//! that reads the token from the child's environment, so the token never
//! appears in a URL, an argument list, or a log line.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use crate::error::AcquireError;
use crate::pipeline::RepoTarget;
use crate::types::RepoId;

const TOKEN_ENV: &str = "CODEINTEGRITY_TOKEN";
const CREDENTIAL_HELPER: &str =
    "!f() { echo username=x-access-token; echo \"password=${CODEINTEGRITY_TOKEN}\"; }; f";

/// Makes `target.path` hold a repository for `target.repo`.
pub trait Acquirer: Send + Sync + std::fmt::Debug {
    fn acquire(&self, target: &RepoTarget) -> Result<(), AcquireError>;
}

/// `<clone_root>/<owner>/<name>`.
pub fn clone_path(clone_root: &Path, repo: &RepoId) -> PathBuf {
    clone_root.join(&repo.owner).join(&repo.name)
}

/// Whether `path` opens as a git repository.
pub fn is_repository(path: &Path) -> bool {
    gix::open(path).is_ok()
}

/// Accepts targets that are already cloned; never touches the network.
#[derive(Debug, Default)]
pub struct LocalOnly;

impl Acquirer for LocalOnly {
    fn acquire(&self, target: &RepoTarget) -> Result<(), AcquireError> {
        if is_repository(&target.path) {
            Ok(())
        } else {
            Err(AcquireError::NotARepository(target.path.display().to_string()))
        }
    }
}

/// Clones missing repositories with `git clone --no-checkout`, reusing
/// clones that already exist.
#[derive(Clone)]
pub struct GitCloner {
    base_url: String,
    token: Option<String>,
}

impl std::fmt::Debug for GitCloner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitCloner")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl GitCloner {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token,
        }
    }

    pub fn clone_url(&self, repo: &RepoId) -> String {
        format!(
            "{}/{}/{}.git",
            self.base_url.trim_end_matches('/'),
            repo.owner,
            repo.name
        )
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("git");
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        if let Some(token) = &self.token {
            // An empty helper resets any configured helpers first.
            cmd.env("GIT_CONFIG_COUNT", "2")
                .env("GIT_CONFIG_KEY_0", "credential.helper")
                .env("GIT_CONFIG_VALUE_0", "")
                .env("GIT_CONFIG_KEY_1", "credential.helper")
                .env("GIT_CONFIG_VALUE_1", CREDENTIAL_HELPER)
                .env(TOKEN_ENV, token);
        }
        cmd
    }
}

impl Acquirer for GitCloner {
    fn acquire(&self, target: &RepoTarget) -> Result<(), AcquireError> {
        let path = &target.path;
        if is_repository(path) {
            debug!(path = %path.display(), "Reusing existing clone");
            return Ok(());
        }
        if path.read_dir().is_ok_and(|mut entries| entries.next().is_some()) {
            return Err(AcquireError::NotARepository(path.display().to_string()));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let url = self.clone_url(&target.repo);
        debug!(%url, path = %path.display(), "Cloning");
        let output = self
            .command()
            .args(["clone", "--quiet", "--no-checkout", &url])
            .arg(path)
            .output()?;

        if !output.status.success() {
            return Err(AcquireError::Clone {
                repo: target.repo.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        info!(path = %path.display(), "Cloned");
        Ok(())
    }
}
