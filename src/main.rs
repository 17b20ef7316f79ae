//! linkmux CLI - runs the hub or remote role.
//!
//! See the `linkmux` library for the multiplexing engine.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use linkmux::{Config, Hub, Remote};
use mimalloc::MiMalloc;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "linkmux")]
#[command(version)]
#[command(about = "Multiplex many TCP connections over one link")]
struct Cli {
    /// Path to a JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Write logs to this file instead of stderr (or set LINKMUX_LOG_FILE)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept application connections and carry them over one link
    Hub(RoleArgs),
    /// Accept one link and fan it out to a backend
    Remote(RoleArgs),
}

#[derive(Args)]
struct RoleArgs {
    /// Hub: application listen address. Remote: link listen address
    #[arg(long)]
    listen: Option<String>,
    /// Hub: link address to dial. Remote: backend address
    #[arg(long)]
    forward: Option<String>,
    /// File link: file to read records from
    #[arg(long)]
    input: Option<PathBuf>,
    /// File link: file to write records to
    #[arg(long)]
    output: Option<PathBuf>,
}

impl RoleArgs {
    fn apply(self, config: &mut Config) {
        if let Some(listen) = self.listen {
            config.listen = Some(listen);
        }
        if let Some(forward) = self.forward {
            config.forward = Some(forward);
        }
        if let Some(input) = self.input {
            config.input = Some(input);
        }
        if let Some(output) = self.output {
            config.output = Some(output);
        }
    }
}

fn init_logging(log_file: Option<&PathBuf>) -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();
    if let Some(path) = log_file {
        let file = std::fs::File::options()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_file = cli
        .log_file
        .clone()
        .or_else(|| std::env::var_os("LINKMUX_LOG_FILE").map(PathBuf::from));
    init_logging(log_file.as_ref())?;

    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Hub(args) => {
            args.apply(&mut config);
            let settings = config.hub_settings().context("Preflight check failed")?;
            let hub = Hub::start(settings).await?;
            log::info!("linkmux hub v{} started", env!("CARGO_PKG_VERSION"));
            hub.run().await?;
        }
        Commands::Remote(args) => {
            args.apply(&mut config);
            let settings = config.remote_settings().context("Preflight check failed")?;
            let remote = Remote::bind(settings).await?;
            log::info!("linkmux remote v{} started", env!("CARGO_PKG_VERSION"));
            remote.run().await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_role_args_override_config() {
        let cli = Cli::parse_from([
            "linkmux",
            "hub",
            "--listen",
            "127.0.0.1:3000",
            "--forward",
            "10.0.0.2:9000",
        ]);
        let mut config = Config {
            listen: Some("0.0.0.0:1".to_string()),
            ..Config::default()
        };
        match cli.command {
            Commands::Hub(args) => args.apply(&mut config),
            Commands::Remote(_) => panic!("Expected hub subcommand"),
        }
        assert_eq!(config.listen.as_deref(), Some("127.0.0.1:3000"));
        assert_eq!(config.forward.as_deref(), Some("10.0.0.2:9000"));
    }
}
