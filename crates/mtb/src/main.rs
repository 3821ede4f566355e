use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use mtb_core::{
    bot::{connect_trackers, Bot},
    config::Config,
};
use mtb_mattermost::MattermostClient;

#[derive(Debug, Parser)]
#[command(
    name = "mtb",
    about = "Mattermost bot answering Trac ticket references",
    version
)]
struct Cli {
    /// YAML configuration file.
    #[arg(long, short, env = "MTB_CONFIG")]
    config: PathBuf,

    /// Log at debug level, HTTP exchanges included.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    mtb_core::logging::init("mtb", cli.debug)?;

    let cfg = Config::load_from_file(&cli.config)?;
    info!(config = %cli.config.display(), tracs = cfg.tracs.len(), channels = cfg.channels.len(), "configuration loaded");

    let registry = Arc::new(connect_trackers(&cfg).await?);

    let platform = Arc::new(
        MattermostClient::new(&cfg.server).context("Error while setting up Mattermost client")?,
    );
    let bot = Bot::start(&cfg, registry, platform)
        .await
        .with_context(|| format!("Error while connecting to {}", cfg.server))?;

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupted, shutting down"),
            Err(e) => {
                error!(error = %e, "cannot listen for ctrl-c");
                return;
            }
        }
        on_signal.cancel();
    });

    bot.run(&shutdown).await.context("event stream failed")?;
    info!("stopped");
    Ok(())
}
