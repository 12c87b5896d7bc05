//! Seam between the menu tree and the native menu API.

pub mod recording;
#[cfg(windows)]
pub mod win32;

use std::fmt;

use crate::error::MenuError;
use crate::registry::CommandId;

/// Screen coordinates in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// Check and enabled state of a menu item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemState {
    pub checked: bool,
    pub enabled: bool,
}

impl ItemState {
    /// Enabled, unchecked.
    pub const NORMAL: Self = Self {
        checked: false,
        enabled: true,
    };

    /// Enabled, with the given check mark.
    pub const fn checked(checked: bool) -> Self {
        Self {
            checked,
            enabled: true,
        }
    }

    /// Unchecked and greyed out.
    pub const fn disabled() -> Self {
        Self {
            checked: false,
            enabled: false,
        }
    }
}

impl Default for ItemState {
    fn default() -> Self {
        Self::NORMAL
    }
}

/// Native operations needed to build, show and tear down a popup menu.
///
/// Implementations are cheap handles (`Clone`); the display driver keeps a
/// clone inside the shortcut cancel callback.
pub trait MenuBackend: Clone + 'static {
    /// Native menu handle.
    type Menu: Copy + Eq + fmt::Debug;
    /// Native window that owns the popup.
    type Window: Copy + fmt::Debug + 'static;
    /// Installed message filter hook.
    type Hook;

    /// Highest command identifier `track_popup` can report back.
    const MAX_COMMAND_ID: u32 = u32::MAX;

    fn create_popup(&self) -> Result<Self::Menu, MenuError>;

    fn append_item(
        &self,
        menu: Self::Menu,
        id: CommandId,
        label: &str,
        state: ItemState,
    ) -> Result<(), MenuError>;

    fn append_separator(&self, menu: Self::Menu) -> Result<(), MenuError>;

    /// Appends `submenu` to `menu` as a cascading entry.
    fn append_submenu(
        &self,
        menu: Self::Menu,
        submenu: Self::Menu,
        label: &str,
    ) -> Result<(), MenuError>;

    fn destroy(&self, menu: Self::Menu) -> Result<(), MenuError>;

    fn cursor_position(&self) -> Point;

    fn set_foreground(&self, owner: Self::Window);

    /// Installs the message filter hook for the calling thread. Key presses
    /// seen by the popup loop must be passed to
    /// [`interceptor::filter_event`](crate::interceptor::filter_event).
    fn install_filter(&self) -> Result<Self::Hook, MenuError>;

    fn remove_filter(&self, hook: Self::Hook);

    /// Runs the blocking popup loop and returns the chosen command, or `0`
    /// when nothing was chosen.
    fn track_popup(&self, menu: Self::Menu, at: Point, owner: Self::Window) -> u32;

    /// Posts an empty message so the owner reprocesses pending input.
    fn post_null(&self, owner: Self::Window);

    /// Asks the owner to leave menu mode, ending `track_popup` early.
    fn cancel_mode(&self, owner: Self::Window);
}
