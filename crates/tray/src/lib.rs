//! Tray context menu for the ClashXW proxy controller.
//!
//! Turns a snapshot of the engine state into a native [`MenuTree`]. Every
//! item is bound to a [`TrayAction`] delivered through a single
//! [`Dispatch`] callback once the menu has closed.
//!
//! The projection is pure: it queries nothing but the
//! [`SystemProxyProbe`] it is handed and performs no blocking work.
//!
//! [`MenuTree`]: clashxw_menu::MenuTree

mod menu;
mod tray;

pub use menu::{
    DEFAULT_START_ID, FALLBACK_MODE, MODES, MenuSnapshot, NoSystemProxy, SystemProxyProbe,
};
pub use tray::{Dispatch, TrayAction, TrayConfig, action_channel};
