//! Carries out tray actions.
//!
//! Actions run on the tokio runtime after the menu has closed. Failures never
//! stop the tray: they are logged and shown to the user as a [`Notice`],
//! together with the completion of long-running actions.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[cfg(any(windows, test))]
use anyhow::{Context as _, bail};
use clashxw_controller::{Client, EngineState};
use clashxw_tray::MenuSnapshot;
#[cfg(any(windows, test))]
use clashxw_tray::TrayAction;

use crate::config::Settings;
use crate::config_files;

/// How a [`Notice`] is presented.
#[cfg(any(windows, test))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

#[cfg(any(windows, test))]
impl NoticeLevel {
    pub fn title(self) -> &'static str {
        match self {
            NoticeLevel::Info => "Success",
            NoticeLevel::Error => "Error",
        }
    }
}

/// Message for the user about a finished action.
#[cfg(any(windows, test))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

#[cfg(any(windows, test))]
impl Notice {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            text: text.into(),
        }
    }
}

/// Desktop integration: shell launches, the OS proxy setting and user
/// notifications.
pub trait Desktop: Send + Sync {
    /// Opens a URL or folder with its default handler.
    #[cfg(any(windows, test))]
    fn open(&self, target: &str) -> std::io::Result<()>;

    /// Opens a file in a text editor.
    #[cfg(any(windows, test))]
    fn edit(&self, path: &Path) -> std::io::Result<()>;

    /// Proxy server the OS currently uses, `None` when disabled.
    fn system_proxy(&self) -> Option<String>;

    /// Points the OS proxy at `server`, or disables it.
    #[cfg(any(windows, test))]
    fn set_system_proxy(&self, server: Option<&str>) -> std::io::Result<()>;

    /// Shows `notice` to the user. May be called from any thread.
    #[cfg(any(windows, test))]
    fn notify(&self, notice: &Notice) {
        match notice.level {
            NoticeLevel::Info => tracing::info!(text = %notice.text, "notice"),
            NoticeLevel::Error => tracing::warn!(text = %notice.text, "notice"),
        }
    }
}

/// State shared between the UI thread and action tasks.
pub struct Context {
    pub client: Client,
    pub desktop: Arc<dyn Desktop>,
    settings: Mutex<Settings>,
    settings_path: PathBuf,
    state: Mutex<EngineState>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Context {
    pub fn new(
        client: Client,
        desktop: Arc<dyn Desktop>,
        settings: Settings,
        settings_path: PathBuf,
    ) -> Self {
        Self {
            client,
            desktop,
            settings: Mutex::new(settings),
            settings_path,
            state: Mutex::new(EngineState::default()),
        }
    }

    pub fn settings(&self) -> Settings {
        lock(&self.settings).clone()
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    /// Last engine state fetched.
    pub fn cached(&self) -> EngineState {
        lock(&self.state).clone()
    }

    pub fn store(&self, state: EngineState) {
        *lock(&self.state) = state;
    }

    /// Whether the OS proxy currently points at `address`.
    pub fn is_system_proxy(&self, address: &str) -> bool {
        self.desktop.system_proxy().as_deref() == Some(address)
    }

    /// Everything the tray menu needs, from `state` and the settings.
    pub fn menu_snapshot(&self, state: EngineState) -> MenuSnapshot {
        let settings = self.settings();
        let config_files = config_files::list(&settings.config_dir);
        MenuSnapshot {
            config: state.config,
            proxies: state.proxies,
            current_config: settings.active_config(&config_files),
            config_files,
        }
    }
}

#[cfg(any(windows, test))]
impl Context {
    /// Address the OS proxy must hold to route through the engine.
    pub fn proxy_address(&self) -> Option<String> {
        lock(&self.state).config.as_ref()?.proxy_address()
    }

    fn active_config(&self) -> Option<PathBuf> {
        let settings = self.settings();
        settings.active_config(&config_files::list(&settings.config_dir))
    }

    fn persist_current_config(&self, path: PathBuf) -> anyhow::Result<()> {
        let mut settings = lock(&self.settings);
        settings.current_config = Some(path);
        settings.save_to(&self.settings_path)
    }

    /// Clears the OS proxy if it still points at the engine.
    pub fn release_system_proxy(&self) {
        let Some(address) = self.proxy_address() else {
            return;
        };
        if self.is_system_proxy(&address) {
            match self.desktop.set_system_proxy(None) {
                Ok(()) => tracing::info!(%address, "system proxy disabled on exit"),
                Err(e) => tracing::warn!(error = %e, "failed to disable system proxy"),
            }
        }
    }
}

/// Runs `action` and tells the user how it went.
///
/// Failures always produce an error notice; latency tests and config reloads
/// also report their completion.
#[cfg(any(windows, test))]
pub async fn perform(ctx: &Context, action: TrayAction) {
    let done = success_text(&action);
    let failed = failure_text(&action);
    let label = format!("{action:?}");

    let notice = match handle(ctx, action).await {
        Ok(()) => done.map(Notice::info),
        Err(e) => {
            tracing::warn!(action = %label, error = %e, "tray action failed");
            Some(Notice::error(format!("{failed}: {e:#}")))
        }
    };
    if let Some(notice) = notice {
        ctx.desktop.notify(&notice);
    }
}

#[cfg(any(windows, test))]
fn success_text(action: &TrayAction) -> Option<String> {
    match action {
        TrayAction::TestGroupLatency(group) => Some(format!("Latency test completed for {group}")),
        TrayAction::TestAllLatency => Some("Latency tests completed".into()),
        TrayAction::ReloadConfig => Some("Configuration reloaded".into()),
        _ => None,
    }
}

#[cfg(any(windows, test))]
fn failure_text(action: &TrayAction) -> String {
    match action {
        TrayAction::SelectMode(_) => "Failed to set mode".into(),
        TrayAction::SelectProxy { .. } => "Failed to set proxy node".into(),
        TrayAction::TestGroupLatency(group) => format!("Failed to test latency for {group}"),
        TrayAction::SetSystemProxy(_) => "Failed to toggle system proxy".into(),
        TrayAction::SetTunMode(_) => "Failed to set TUN mode".into(),
        TrayAction::OpenDashboard => "Failed to open dashboard".into(),
        TrayAction::TestAllLatency => "Failed to run latency tests".into(),
        TrayAction::SelectConfig(_) => "Failed to switch configuration".into(),
        TrayAction::ReloadConfig => "Failed to reload configuration".into(),
        TrayAction::EditConfig => "Failed to open config file".into(),
        TrayAction::OpenConfigFolder => "Failed to open config folder".into(),
        TrayAction::Exit => "Failed to exit".into(),
    }
}

/// Runs one tray action to completion.
#[cfg(any(windows, test))]
pub async fn handle(ctx: &Context, action: TrayAction) -> anyhow::Result<()> {
    tracing::debug!(?action, "handling tray action");
    match action {
        TrayAction::SelectMode(mode) => ctx.client.set_mode(&mode).await?,
        TrayAction::SelectProxy { group, node } => ctx.client.select_proxy(&group, &node).await?,
        TrayAction::TestGroupLatency(group) => {
            let delays = ctx.client.test_group_delay(&group).await;
            if delays.is_empty() {
                bail!("no proxy in {group} answered");
            }
            tracing::info!(%group, measured = delays.len(), "group latency test completed");
        }
        TrayAction::SetSystemProxy(enable) => set_system_proxy(ctx, enable)?,
        TrayAction::SetTunMode(enable) => set_tun(ctx, enable).await?,
        TrayAction::OpenDashboard => {
            let url = ctx.settings().dashboard_url;
            ctx.desktop
                .open(&url)
                .with_context(|| format!("failed to open dashboard {url}"))?;
        }
        TrayAction::TestAllLatency => {
            let Some(proxies) = ctx.cached().proxies else {
                bail!("no proxy data to test");
            };
            ctx.client.test_all_delays(&proxies).await;
        }
        TrayAction::SelectConfig(path) => {
            ctx.client.reload_config(&path.to_string_lossy()).await?;
            ctx.persist_current_config(path)?;
        }
        TrayAction::ReloadConfig => {
            let Some(path) = ctx.active_config() else {
                bail!("no config file to reload");
            };
            ctx.client.reload_config(&path.to_string_lossy()).await?;
        }
        TrayAction::EditConfig => {
            let path = ctx
                .active_config()
                .filter(|p| p.is_file())
                .context("config file not found")?;
            ctx.desktop
                .edit(&path)
                .with_context(|| format!("failed to edit {}", path.display()))?;
        }
        TrayAction::OpenConfigFolder => {
            let dir = ctx.settings().config_dir;
            if !dir.is_dir() {
                bail!("config folder {} does not exist", dir.display());
            }
            ctx.desktop
                .open(&dir.to_string_lossy())
                .with_context(|| format!("failed to open {}", dir.display()))?;
        }
        TrayAction::Exit => ctx.release_system_proxy(),
    }
    Ok(())
}

#[cfg(any(windows, test))]
fn set_system_proxy(ctx: &Context, enable: bool) -> anyhow::Result<()> {
    if !enable {
        ctx.desktop.set_system_proxy(None)?;
        tracing::info!("system proxy disabled");
        return Ok(());
    }
    let address = ctx
        .proxy_address()
        .context("engine has no mixed or SOCKS port")?;
    ctx.desktop.set_system_proxy(Some(&address))?;
    tracing::info!(%address, "system proxy enabled");
    Ok(())
}

/// Toggles TUN and reads the state back, since the engine may refuse
/// silently (e.g. without admin rights).
#[cfg(any(windows, test))]
async fn set_tun(ctx: &Context, enable: bool) -> anyhow::Result<()> {
    ctx.client.set_tun(enable).await?;
    let config = ctx.client.configs().await?;
    let actual = config.tun_enabled();
    {
        let mut state = lock(&ctx.state);
        state.config = Some(config);
    }
    if actual != enable {
        bail!("engine kept TUN mode {}", if actual { "on" } else { "off" });
    }
    Ok(())
}
