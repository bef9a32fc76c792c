use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use cluster_selector_server::app::App;
use cluster_selector_server::config::{load_members, load_server_config, MembersFile, ServerConfig};
use cluster_selector_server::logging::{init_logging, LogOutput};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};

#[derive(Parser, Debug)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Parse and validate the config and members files, then exit
    ValidateConfig,
    /// Apply the members file and select a committee automatically once
    /// per epoch. The process takes no requests; membership changes go
    /// through the members file and a restart.
    Run,
}

#[derive(Parser, Debug, Clone)]
struct CommonArgs {
    /// Path to TOML of selector config
    #[clap(long, env)]
    config: PathBuf,

    /// Path to TOML of initial cluster members
    #[clap(long)]
    members: Option<PathBuf>,

    /// Directory for state.json; state is not persisted if unset
    #[clap(long)]
    state_dir: Option<PathBuf>,

    #[clap(long, value_enum, default_value_t = LogOutput::Console)]
    log_format: LogOutput,

    /// Seconds between automatic selection checks, 0 disables them
    #[clap(long, default_value_t = 1)]
    tick_secs: u64,
}

fn load_config(common_args: &CommonArgs) -> Result<(ServerConfig, Option<MembersFile>)> {
    let config = load_server_config(&common_args.config)?;
    let members = common_args
        .members
        .as_deref()
        .map(load_members)
        .transpose()?;
    Ok((config, members))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let common_args = args.common;
    init_logging(common_args.log_format, Level::INFO)?;

    let config = load_config(&common_args);
    match args.command {
        Commands::ValidateConfig => match config {
            Ok(_) => info!("Configs are OK!"),
            Err(error) => error!("Error found in config: {error:#}"),
        },
        Commands::Run => {
            let (config, members) = config?;
            if let Some(dir) = &common_args.state_dir {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create state dir {dir:?}"))?;
            }

            let cancel = CancellationToken::new();
            let tick = (common_args.tick_secs > 0)
                .then(|| Duration::from_secs(common_args.tick_secs));
            // nothing in the binary sends requests; the tick drives selection
            let (app, _handle) = App::new(
                cancel.clone(),
                config,
                members,
                common_args.state_dir,
                tick,
            )?;

            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Shutting down");
                    cancel.cancel();
                }
            });
            app.run().await?;
        }
    }

    Ok(())
}
