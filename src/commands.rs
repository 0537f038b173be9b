// src/commands.rs
//! Command implementations

use anyhow::{Context, Result};
use imagesync::config::{LogConfig, LogFormat, Settings};
use imagesync::openstack::OpenStackCloud;
use imagesync::{Keyring, Scheduler, Shutdown};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber; `RUST_LOG` wins over the configured level
pub fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match config.format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Print the default configuration
pub fn cmd_generate_config() -> Result<()> {
    print!("{}", Settings::default().to_yaml()?);
    Ok(())
}

/// Load the keyring, or run without one (signed catalogs then fail)
fn load_keyring(path: &Path) -> Option<Arc<Keyring>> {
    match Keyring::load(path) {
        Ok(keyring) => {
            info!(
                "Loaded keyring {} ({} key(s))",
                path.display(),
                keyring.fingerprints().len()
            );
            Some(Arc::new(keyring))
        }
        Err(e) => {
            warn!(
                "No usable keyring at {}: {}; signed catalogs will be rejected",
                path.display(),
                e
            );
            None
        }
    }
}

/// Trigger `shutdown` on SIGINT or SIGTERM
///
/// Signals are received on a small tokio runtime owned by a background
/// thread; the engine itself stays blocking.
fn install_signal_handler(shutdown: Shutdown) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start the signal runtime")?;
    std::thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            runtime.block_on(async {
                wait_for_signal().await;
                info!("Shutdown requested, finishing the current item");
                shutdown.trigger();
            })
        })
        .context("Failed to spawn the signal thread")?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Run the synchronizer until shutdown, or a single pass with `once`
pub fn cmd_sync(config: Option<&Path>, once: bool) -> Result<()> {
    let settings = Settings::load(config).context("Invalid configuration")?;
    init_logging(&settings.logging);
    info!(
        "Synchronizing {} mirror(s) as cloud '{}' into {}",
        settings.mirrors.len(),
        settings.cloud_name,
        settings.output_directory.display()
    );

    let keyring = load_keyring(&settings.keyring);
    let cloud = OpenStackCloud::from_env().context("Cannot reach the target cloud")?;

    let shutdown = Shutdown::new();
    install_signal_handler(shutdown.clone())?;
    let mut scheduler = Scheduler::new(settings, &cloud, keyring).with_shutdown(shutdown);

    if once {
        let report = scheduler.run_pass();
        if !report.failed_mirrors.is_empty() {
            anyhow::bail!("{} mirror(s) failed", report.failed_mirrors.len());
        }
        return Ok(());
    }
    scheduler.run()?;
    Ok(())
}
