pub mod check;
pub mod config;
pub mod run;

use std::path::Path;

use anyhow::Context;
use clap::Subcommand;

use codeintegrity_core::config::IntegrityConfig;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Clone and analyze every repository in a code-search result
    Run(run::RunArgs),
    /// Analyze one local repository and print its report
    Check(check::CheckArgs),
    /// Print the effective configuration as TOML
    Config(config::ConfigArgs),
}

/// How a command ended, when it did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Some repositories failed; the rest were written.
    Partial,
    /// Every repository failed.
    Failed,
}

/// Invalid invocation detected before any work starts.
#[derive(thiserror::Error, Debug)]
#[error("{0}")]
pub struct StartupError(pub String);

pub async fn run(cmd: Command, quiet: bool) -> anyhow::Result<Outcome> {
    match cmd {
        Command::Run(args) => run::run(args, quiet).await,
        Command::Check(args) => check::run(args).await,
        Command::Config(args) => config::run(&args),
    }
}

/// Load `path`, or defaults when no config file was given.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<IntegrityConfig> {
    match path {
        Some(path) => IntegrityConfig::load(path)
            .with_context(|| format!("Cannot load config: {}", path.display())),
        None => Ok(IntegrityConfig::default()),
    }
}
