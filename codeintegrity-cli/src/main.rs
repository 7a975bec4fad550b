use clap::Parser;

use codeintegrity_core::error::{ConfigError, InputError, IntegrityError};

mod commands;
mod persist;

use commands::{Outcome, StartupError};

#[derive(Parser, Debug)]
#[command(
    name = "codeintegrity",
    version,
    about = "Score the commit-history integrity of git repositories"
)]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,
}

/// Map an error to a process exit code.
///
///   0  - success
///   1  - general failure
///   2  - configuration or startup error
///   3  - malformed repository list
///   10 - partial success (some repositories failed)
fn classify_exit_code(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if cause.is::<InputError>() {
            return 3;
        }
        if cause.is::<ConfigError>() || cause.is::<StartupError>() {
            return 2;
        }
        match cause.downcast_ref::<IntegrityError>() {
            Some(IntegrityError::Input(_)) => return 3,
            Some(IntegrityError::Config(_)) => return 2,
            _ => {}
        }
    }
    1
}

/// Default log filter when `RUST_LOG` is unset.
fn default_filter(quiet: bool, verbose: u8) -> &'static str {
    match (quiet, verbose) {
        (true, _) => "error",
        (_, 0) => "warn",
        (_, 1) => "info",
        (_, 2) => "debug",
        _ => "trace",
    }
}

fn main() {
    let cli = Cli::parse();
    let filter = default_filter(cli.quiet, cli.verbose);

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: Failed to create runtime: {e}");
            std::process::exit(1);
        }
    };

    match runtime.block_on(commands::run(cli.command, cli.quiet)) {
        Ok(Outcome::Success) => std::process::exit(0),
        Ok(Outcome::Partial) => std::process::exit(10),
        Ok(Outcome::Failed) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(classify_exit_code(&e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn exit_code_malformed_input() {
        let err = anyhow::Error::new(InputError::Malformed("data.search.nodes[0]".into()))
            .context("Cannot read repository list");
        assert_eq!(classify_exit_code(&err), 3);
    }

    #[test]
    fn exit_code_config() {
        let err: anyhow::Result<()> = Err(ConfigError::Parse("bad toml".into()))
            .context("Cannot load config: codeintegrity.toml");
        assert_eq!(classify_exit_code(&err.unwrap_err()), 2);
    }

    #[test]
    fn exit_code_wrapped_config() {
        let err = anyhow::Error::new(IntegrityError::Config(ConfigError::Invalid("x".into())));
        assert_eq!(classify_exit_code(&err), 2);
    }

    #[test]
    fn exit_code_startup() {
        let err = anyhow::Error::new(StartupError("missing token".into()));
        assert_eq!(classify_exit_code(&err), 2);
    }

    #[test]
    fn exit_code_unreadable_input() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = anyhow::Error::new(InputError::Io(io));
        assert_eq!(classify_exit_code(&err), 3);
    }

    #[test]
    fn verbosity_picks_filter() {
        assert_eq!(default_filter(false, 0), "warn");
        assert_eq!(default_filter(false, 1), "info");
        assert_eq!(default_filter(false, 2), "debug");
        assert_eq!(default_filter(false, 5), "trace");
        assert_eq!(default_filter(true, 3), "error");
    }

    #[test]
    fn exit_code_general() {
        let err = anyhow::anyhow!("Something unexpected happened");
        assert_eq!(classify_exit_code(&err), 1);
    }
}
