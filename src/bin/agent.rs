//! FlashWave device agent - recovery/update daemon
//!
//! On startup it settles any in-flight update (confirm the freshly
//! booted image or roll back), then periodically checks the release
//! descriptor and stages newer firmware. The agent never applies an
//! update in place; it stages, switches the boot pointer, and asks for
//! a reboot.

use anyhow::{Context, Result};
use clap::Parser;
use flashwave::ota::config::AgentConfig;
use flashwave::ota::fetch::Fetcher;
use flashwave::ota::health::{BootGuard, HealthMarker, HealthVerdict};
use flashwave::ota::machine::{BootOutcome, CycleOutcome, UpdateMachine};
use flashwave::ota::slots::FileSlotBank;
use flashwave::ota::store::HttpBlobStore;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "flashwave-agent")]
#[command(version)]
#[command(about = "FlashWave OTA update agent", long_about = None)]
struct Cli {
    /// Agent configuration file
    #[arg(short, long, default_value = "/etc/flashwave/flashwave.config.json")]
    config: PathBuf,

    /// Run a single update cycle and exit
    #[arg(long)]
    once: bool,

    /// Recovery: reinstall even when the published version is not newer
    /// (implies --once)
    #[arg(long)]
    force: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    run(cli).await
}

async fn run(cli: Cli) -> Result<()> {
    let config = AgentConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let key = config.load_key().context("update key rejected")?;
    std::fs::create_dir_all(&config.data_dir)?;

    let store = HttpBlobStore::with_timeout(
        &config.store_url,
        Duration::from_secs(config.fetch_timeout_secs),
    )
    .context("building HTTP client")?;
    let fetcher = Fetcher::new(store, config.descriptor_id.clone(), key);
    let bank = FileSlotBank::open(config.slots_dir(), config.slot_capacity)?;
    let mut machine = UpdateMachine::new(
        fetcher,
        bank,
        config.state_path(),
        config.factory_version,
        config.max_failed_boots,
    )?;

    // Settle any update that was mid-flight across the reboot.
    match machine.on_boot()? {
        BootOutcome::Steady => {}
        BootOutcome::RolledBack { abandoned } => {
            warn!(%abandoned, "rolled back on boot; reboot to load the previous firmware");
            return Ok(());
        }
        BootOutcome::AwaitingConfirmation { pending } => {
            info!(%pending, window_secs = config.confirm_window_secs, "awaiting boot confirmation");
            HealthMarker::clear(&config.data_dir)?;
            let guard = BootGuard::new(Duration::from_secs(config.confirm_window_secs));
            match guard.await_checkpoint(&config.data_dir).await {
                HealthVerdict::Healthy => {
                    let version = machine.confirm_boot()?;
                    info!(%version, "update confirmed");
                }
                HealthVerdict::TimedOut => {
                    machine.roll_back()?;
                    warn!("health checkpoint missed; reboot to load the previous firmware");
                    return Ok(());
                }
            }
        }
    }

    loop {
        let outcome = if cli.force {
            machine.run_cycle_forced().await?
        } else {
            machine.run_cycle().await?
        };

        match outcome {
            CycleOutcome::StagedForReboot(version) => {
                // Stale markers must not confirm the next image.
                HealthMarker::clear(&config.data_dir)?;
                info!(%version, "update staged; reboot to apply");
                return Ok(());
            }
            CycleOutcome::NoUpdate => info!("firmware is up to date"),
            CycleOutcome::Aborted { reason } => {
                warn!(%reason, "update cycle failed; retrying next interval");
            }
            CycleOutcome::Busy => {}
        }

        if cli.once || cli.force {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_secs(config.check_interval_secs)).await;
    }
}
