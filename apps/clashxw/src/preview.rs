//! Headless preview for hosts without a notification area.
//!
//! Fetches the engine state once, builds the tray menu on the recording
//! backend and logs its layout.

#[cfg(test)]
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clashxw_menu::RecordingBackend;
use clashxw_tray::{TrayConfig, action_channel};

use crate::actions::{Context, Desktop};

/// Desktop without a shell or a system proxy setting.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessDesktop;

impl Desktop for HeadlessDesktop {
    #[cfg(test)]
    fn open(&self, target: &str) -> std::io::Result<()> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            format!("cannot open {target} without a desktop shell"),
        ))
    }

    #[cfg(test)]
    fn edit(&self, path: &Path) -> std::io::Result<()> {
        self.open(&path.to_string_lossy())
    }

    fn system_proxy(&self) -> Option<String> {
        None
    }

    #[cfg(test)]
    fn set_system_proxy(&self, _server: Option<&str>) -> std::io::Result<()> {
        Err(std::io::ErrorKind::Unsupported.into())
    }
}

/// Renders the menu the tray would show right now.
pub fn render(ctx: &Context, config: &TrayConfig, backend: RecordingBackend) -> String {
    let snapshot = ctx.menu_snapshot(ctx.cached());
    let probe = |address: &str| ctx.is_system_proxy(address);
    let (dispatch, _actions) = action_channel();
    let tree = snapshot.build_menu(backend.clone(), config.menu_start_id, &probe, &dispatch);

    match tree.root_handle() {
        Some(root) => backend.render(root),
        None => String::new(),
    }
}

pub async fn run(ctx: Arc<Context>, config: TrayConfig) -> anyhow::Result<()> {
    let timeout = Duration::from_millis(ctx.settings().refresh_timeout_ms);
    match tokio::time::timeout(timeout, ctx.client.snapshot()).await {
        Ok(state) => ctx.store(state),
        Err(_) => tracing::warn!(timeout_ms = timeout.as_millis() as u64, "engine did not answer"),
    }

    let layout = render(&ctx, &config, RecordingBackend::new());
    tracing::info!(
        controller = ctx.client.base_url(),
        settings = %ctx.settings_path().display(),
        "no system tray on this platform, menu preview:\n{layout}"
    );
    Ok(())
}
