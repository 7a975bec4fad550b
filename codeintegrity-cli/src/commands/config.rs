use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use super::Outcome;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Config file to read (default: built-in defaults)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

pub fn run(args: &ConfigArgs) -> anyhow::Result<Outcome> {
    let config = super::load_config(args.config.as_deref())?;
    let rendered = toml::to_string_pretty(&config).context("Cannot render config")?;
    print!("{rendered}");
    Ok(Outcome::Success)
}
