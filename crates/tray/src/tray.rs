//! Tray actions and the channel that carries them.
//!
//! Menu items never call into the engine themselves. Each one sends a
//! [`TrayAction`] through the [`Dispatch`] callback; the host decides how to
//! carry it out (usually on its async runtime).

use std::path::PathBuf;
use std::rc::Rc;
use std::sync::mpsc;

/// Callback receiving the action of the chosen menu item.
pub type Dispatch = Rc<dyn Fn(TrayAction)>;

/// Configuration for the tray icon and its menu.
#[derive(Debug, Clone)]
pub struct TrayConfig {
    /// Tooltip shown on the tray icon.
    pub tooltip: String,
    /// First command identifier of every menu tree.
    pub menu_start_id: u32,
}

impl Default for TrayConfig {
    fn default() -> Self {
        Self {
            tooltip: "ClashXW".into(),
            menu_start_id: crate::DEFAULT_START_ID,
        }
    }
}

/// Everything a menu item can ask the host to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrayAction {
    /// Switch the routing mode (`rule`, `direct`, `global`).
    SelectMode(String),
    /// Make `node` the active member of selector `group`.
    SelectProxy { group: String, node: String },
    /// Run a latency test on every member of `group`.
    TestGroupLatency(String),
    /// Point the OS proxy setting at the engine, or clear it.
    SetSystemProxy(bool),
    SetTunMode(bool),
    OpenDashboard,
    /// Run latency tests on all groups and proxies.
    TestAllLatency,
    /// Load another config file.
    SelectConfig(PathBuf),
    ReloadConfig,
    EditConfig,
    OpenConfigFolder,
    Exit,
}

/// Creates a dispatch callback feeding a channel, plus its receiving end.
///
/// The callback lives on the UI thread; the receiver can be moved to the
/// thread that executes actions.
pub fn action_channel() -> (Dispatch, mpsc::Receiver<TrayAction>) {
    let (tx, rx) = mpsc::channel();
    let dispatch: Dispatch = Rc::new(move |action| {
        if let Err(mpsc::SendError(action)) = tx.send(action) {
            tracing::warn!(?action, "tray action dropped, executor is gone");
        }
    });
    (dispatch, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tray_config_default() {
        let config = TrayConfig::default();
        assert_eq!(config.tooltip, "ClashXW");
        assert_eq!(config.menu_start_id, 1000);
    }

    #[test]
    fn channel_delivers_actions_in_order() {
        let (dispatch, rx) = action_channel();
        dispatch(TrayAction::SelectMode("global".into()));
        dispatch(TrayAction::Exit);

        assert_eq!(rx.recv().unwrap(), TrayAction::SelectMode("global".into()));
        assert_eq!(rx.recv().unwrap(), TrayAction::Exit);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dispatch_after_receiver_dropped_does_not_panic() {
        let (dispatch, rx) = action_channel();
        drop(rx);
        dispatch(TrayAction::ReloadConfig);
    }

    #[test]
    fn action_equality() {
        assert_eq!(
            TrayAction::SelectProxy {
                group: "Proxy".into(),
                node: "HK".into()
            },
            TrayAction::SelectProxy {
                group: "Proxy".into(),
                node: "HK".into()
            }
        );
        assert_ne!(TrayAction::SetTunMode(true), TrayAction::SetTunMode(false));
    }
}
