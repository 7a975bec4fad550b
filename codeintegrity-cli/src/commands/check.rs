use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;

use codeintegrity_core::pipeline::{IntegrityPipeline, RepoTarget, RunContext};
use codeintegrity_core::types::RepoId;

use super::{Outcome, StartupError};

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Path to git repository (default: current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Name to report under (default: `<parent dir>/<dir>`)
    #[arg(long, value_name = "OWNER/REPO")]
    pub name: Option<String>,

    /// Ref to analyze (default: the default branch)
    #[arg(long = "ref", value_name = "REF")]
    pub reference: Option<String>,

    /// Config file (TOML)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Also write `<owner><repo>-result.json` into this directory
    #[arg(long, value_name = "DIR")]
    pub out: Option<PathBuf>,
}

/// `<parent dir name>/<dir name>`, or `local/<dir name>` at the filesystem root.
fn derive_name(path: &Path) -> Option<RepoId> {
    let name = path.file_name()?.to_string_lossy().into_owned();
    let owner = path
        .parent()
        .and_then(Path::file_name)
        .map_or_else(|| "local".to_string(), |o| o.to_string_lossy().into_owned());
    Some(RepoId::new(owner, name))
}

pub async fn run(args: CheckArgs) -> anyhow::Result<Outcome> {
    let repo_path = std::fs::canonicalize(&args.path)
        .with_context(|| format!("Cannot resolve path: {}", args.path.display()))?;

    let repo = match &args.name {
        Some(name) => RepoId::parse(name).ok_or_else(|| {
            StartupError(format!("--name must look like owner/repo, got {name:?}"))
        })?,
        None => derive_name(&repo_path).ok_or_else(|| {
            StartupError(format!("Cannot derive a name for {}", repo_path.display()))
        })?,
    };

    let config = super::load_config(args.config.as_deref())?;
    let mut target = RepoTarget::new(repo.clone(), repo_path);
    if let Some(reference) = args.reference {
        target = target.with_reference(reference);
    }

    let pipeline = IntegrityPipeline::from_config(config);
    let report = tokio::task::spawn_blocking(move || {
        let ctx = RunContext::quiet(&target.repo);
        pipeline.run(&target, &ctx)
    })
    .await
    .context("Analysis task failed")?
    .with_context(|| format!("Cannot analyze {repo}"))?;

    if let Some(out) = &args.out {
        let path = crate::persist::store_result(out, &report)
            .await
            .with_context(|| format!("Cannot write result to {}", out.display()))?;
        eprintln!("Wrote {}", path.display());
    }

    let json = serde_json::to_string_pretty(&report).context("Cannot encode report")?;
    println!("{json}");
    Ok(Outcome::Success)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_from_parent_and_dir() {
        assert_eq!(
            derive_name(Path::new("/src/acme/widgets")),
            Some(RepoId::new("acme", "widgets"))
        );
    }

    #[test]
    fn name_at_root_level() {
        assert_eq!(
            derive_name(Path::new("/widgets")),
            Some(RepoId::new("local", "widgets"))
        );
        assert_eq!(derive_name(Path::new("/")), None);
    }
}
