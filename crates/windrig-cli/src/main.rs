//! windrig - operator console for the windrig performance rig

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use windrig_cli::{config::Config, console::Command, Driver};
use windrig_core::{Instrument, RigApi, SessionController};
use windrig_http::HttpRig;

#[derive(Parser)]
#[command(name = "windrig")]
#[command(author, version, about = "Operator console for the windrig performance rig", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path (default: ~/.config/windrig/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Rig server base URL
    #[arg(long)]
    url: Option<String>,

    /// Instrument fitted to the rig (sks or sn)
    #[arg(short, long)]
    instrument: Option<Instrument>,

    /// Tonguing delay in milliseconds
    #[arg(long)]
    delay: Option<u32>,

    /// Music file to select on startup
    #[arg(short, long)]
    file: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a default configuration file
    Init,
    /// Show the configuration file path
    ConfigPath,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Init) => {
            let path = Config::create_default_config_file()?;
            println!("Created default config at: {}", path.display());
            return Ok(());
        }
        Some(Commands::ConfigPath) => {
            let path = Config::config_path()?;
            println!("{}", path.display());
            return Ok(());
        }
        None => {}
    }

    // Load config
    let mut config = if let Some(path) = &cli.config {
        Config::load_from(path).with_context(|| format!("loading {}", path.display()))?
    } else {
        Config::load_or_default()
    };

    // Apply CLI overrides
    if let Some(url) = cli.url {
        config.rig.base_url = url;
    }
    if let Some(instrument) = cli.instrument {
        config.session.instrument = instrument;
    }
    if let Some(delay) = cli.delay {
        config.session.tonguing_delay_ms = delay;
    }
    config.validate()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(run(config, cli.file))
}

async fn run(config: Config, preselect: Option<String>) -> Result<()> {
    let rig = HttpRig::new(config.rig.base_url.clone(), config.rig.request_timeout()?)
        .context("failed to create rig client")?;
    log::info!("Rig server at {}", rig.base_url());

    let api: Arc<dyn RigApi> = Arc::new(rig);
    let controller = SessionController::new(api, config.session_settings()?);
    let mut driver = Driver::new(controller, config.polling.intervals()?);

    if let Some(file) = preselect {
        driver.execute(Command::Select(file)).await;
    }
    driver.run().await?;
    Ok(())
}
