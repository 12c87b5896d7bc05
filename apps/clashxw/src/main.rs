//! ClashXW tray entry point.

#![cfg_attr(windows, windows_subsystem = "windows")]

mod actions;
mod config;
mod config_files;
#[cfg(windows)]
mod desktop;
#[cfg(any(not(windows), test))]
mod preview;
#[cfg(windows)]
mod window;

use std::sync::Arc;
use std::time::Duration;

use clashxw_controller::Client;
use clashxw_tray::TrayConfig;
use tracing_subscriber::EnvFilter;

use crate::actions::Context;
use crate::config::Settings;

fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting ClashXW");

    let settings = Settings::load()?;
    tracing::info!(
        controller = %settings.controller_url,
        config_dir = %settings.config_dir.display(),
        "settings loaded"
    );

    let client = Client::new(&settings.controller_url, settings.secret.as_deref())?;
    let tray_config = TrayConfig {
        menu_start_id: settings.menu_start_id,
        ..TrayConfig::default()
    };

    let rt = tokio::runtime::Runtime::new()?;
    run(&rt, client, settings, tray_config)?;
    rt.shutdown_timeout(Duration::from_secs(2));

    tracing::info!("ClashXW shut down cleanly");
    Ok(())
}

#[cfg(windows)]
fn run(
    rt: &tokio::runtime::Runtime,
    client: Client,
    settings: Settings,
    tray: TrayConfig,
) -> anyhow::Result<()> {
    let notices = Arc::new(desktop::Notices::default());
    let shell = Arc::new(desktop::WindowsDesktop::new(Arc::clone(&notices)));
    let ctx = Arc::new(Context::new(client, shell, settings, config::settings_path()));
    window::run(rt.handle().clone(), ctx, tray, notices)
}

#[cfg(not(windows))]
fn run(
    rt: &tokio::runtime::Runtime,
    client: Client,
    settings: Settings,
    tray: TrayConfig,
) -> anyhow::Result<()> {
    let shell = Arc::new(preview::HeadlessDesktop);
    let ctx = Arc::new(Context::new(client, shell, settings, config::settings_path()));
    rt.block_on(preview::run(ctx, tray))
}
