use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use tracing::info;

use codeintegrity_core::acquire::{Acquirer, GitCloner, LocalOnly, clone_path};
use codeintegrity_core::input;
use codeintegrity_core::pipeline::{IntegrityPipeline, RepoTarget};
use codeintegrity_core::progress::{IndicatifReporter, ProgressReporter};
use codeintegrity_core::runner::Runner;

use super::{Outcome, StartupError};
use crate::persist::FileSink;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Repository list: code-search JSON with `data.search.nodes[].nameWithOwner`
    #[arg(long = "in", value_name = "FILE")]
    pub input: PathBuf,

    /// Token used to clone private repositories
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Directory that holds clones, as `<dir>/<owner>/<repo>` (default: system temp dir)
    #[arg(long, value_name = "DIR")]
    pub clone_target: Option<PathBuf>,

    /// Directory for `<owner><repo>-result.json` files
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub out: PathBuf,

    /// Ref to analyze (default: each repository's default branch)
    #[arg(long = "ref", value_name = "REF")]
    pub reference: Option<String>,

    /// Config file (TOML)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Repositories analyzed at once (overrides `pipeline.max_concurrent_repos`)
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Use existing clones under the clone target; never clone
    #[arg(long)]
    pub no_clone: bool,
}

pub async fn run(args: RunArgs, quiet: bool) -> anyhow::Result<Outcome> {
    if !args.input.is_file() {
        return Err(StartupError(format!(
            "Input file not found: {}",
            args.input.display()
        ))
        .into());
    }

    let mut config = super::load_config(args.config.as_deref())?;
    if let Some(n) = args.concurrency {
        if n == 0 {
            return Err(StartupError("--concurrency must be at least 1".into()).into());
        }
        config.pipeline.max_concurrent_repos = n;
    }
    if let Some(reference) = &args.reference {
        config.analysis.reference.clone_from(reference);
    }

    let acquirer: Arc<dyn Acquirer> = if args.no_clone {
        Arc::new(LocalOnly)
    } else {
        let token = args.token.clone().filter(|t| !t.trim().is_empty()).ok_or_else(|| {
            StartupError("Missing token: pass --token or set GITHUB_TOKEN (or use --no-clone)".into())
        })?;
        Arc::new(GitCloner::new(config.acquisition.base_url.clone(), Some(token)))
    };

    let repos = input::load(&args.input)
        .with_context(|| format!("Cannot read repository list: {}", args.input.display()))?;

    let clone_root = args
        .clone_target
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("codeintegrity"));
    let targets: Vec<RepoTarget> = repos
        .into_iter()
        .map(|repo| {
            let path = clone_path(&clone_root, &repo);
            RepoTarget::new(repo, path)
        })
        .collect();

    info!(
        repos = targets.len(),
        clone_root = %clone_root.display(),
        out = %args.out.display(),
        "Starting analysis"
    );

    let progress: Arc<dyn ProgressReporter> = if quiet {
        Arc::new(IndicatifReporter::hidden())
    } else {
        Arc::new(IndicatifReporter::new())
    };
    let max_concurrent = config.pipeline.max_concurrent_repos;
    let pipeline = Arc::new(IntegrityPipeline::from_config(config));
    let summary = Runner::new(pipeline)
        .with_acquirer(acquirer)
        .with_progress(progress)
        .with_max_concurrent(max_concurrent)
        .run(targets, Arc::new(FileSink::new(args.out.clone())))
        .await;

    if !quiet {
        println!("Analyzed {} repositories", summary.total());
        println!();
        println!("  Succeeded: {}", summary.succeeded);
        println!("  Failed:    {}", summary.failed);
        println!("  Results:   {}", args.out.display());
        println!("  Duration:  {:.2?}", summary.elapsed);
    }

    Ok(match (summary.succeeded, summary.failed) {
        (_, 0) => Outcome::Success,
        (0, _) => Outcome::Failed,
        _ => Outcome::Partial,
    })
}
