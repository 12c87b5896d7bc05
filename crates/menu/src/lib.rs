//! Native popup menu for the ClashXW tray.
//!
//! A [`MenuTree`] is built fresh for every tray click, shown once with
//! [`MenuTree::run`] (or [`MenuTree::show`]) and then thrown away.
//!
//! - [`MenuTree`] / [`MenuNode`] own the native menu handles. The tree holds
//!   the single [`CommandRegistry`] and [`ShortcutTable`]; nodes only index
//!   into it, so an item added to any submenu is reachable from the root.
//! - [`MenuTree::show`] runs the platform's blocking popup loop. While it is
//!   pumping, a message filter hook looks up key presses in the shortcut
//!   table, records the match and cancels the loop (see [`interceptor`]).
//! - [`MenuBackend`] is the seam to the native menu API: [`Win32Backend`] on
//!   Windows, [`RecordingBackend`] for tests and headless previews.
//!
//! # Threading
//! Everything here is `!Send`. Build and show the tree on the thread that
//! pumps the owner window's messages; the shortcut hook is installed for
//! that thread only.

pub mod backend;
mod display;
mod error;
pub mod interceptor;
mod registry;
mod tree;

pub use backend::recording::{
    Entry, FailPoint, MenuHandle, NativeCall, RecordingBackend, TrackScript, WindowId,
};
#[cfg(windows)]
pub use backend::win32::Win32Backend;
pub use backend::{ItemState, MenuBackend, Point};
pub use display::Selection;
pub use error::MenuError;
pub use registry::{Action, Chord, CommandId, CommandRegistry, ShortcutTable, VirtualKey};
pub use tree::{MenuNode, MenuTree, NodeId};
