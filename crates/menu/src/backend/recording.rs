//! In-memory backend that records native calls.
//!
//! Menus are kept as plain entry lists so tests (and the headless preview)
//! can inspect exactly what the native menu would contain. `track_popup`
//! replays a [`TrackScript`]: scripted key presses go through
//! [`filter_event`](crate::interceptor::filter_event) just like the Win32
//! message filter hook would deliver them.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::rc::Rc;

use super::{ItemState, MenuBackend, Point};
use crate::error::MenuError;
use crate::interceptor::{FilterEvent, FilterVerdict, filter_event};
use crate::registry::{Chord, CommandId};

/// Handle of a recorded menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MenuHandle(pub u32);

/// Stand-in for an owner window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(pub u32);

/// One entry of a recorded menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Item {
        id: CommandId,
        label: String,
        state: ItemState,
    },
    Separator,
    Submenu {
        handle: MenuHandle,
        label: String,
    },
}

impl Entry {
    pub fn label(&self) -> Option<&str> {
        match self {
            Entry::Item { label, .. } | Entry::Submenu { label, .. } => Some(label),
            Entry::Separator => None,
        }
    }
}

/// Native calls in the order they were made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeCall {
    CreatePopup(MenuHandle),
    Destroy(MenuHandle),
    SetForeground(WindowId),
    InstallFilter,
    RemoveFilter,
    Track { menu: MenuHandle, at: Point },
    PostNull(WindowId),
    CancelMode(WindowId),
}

/// Native calls that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    CreatePopup,
    AppendItem,
    AppendSeparator,
    AppendSubmenu,
    InstallFilter,
}

/// What the user does while the popup is open.
#[derive(Debug, Clone, Default)]
pub struct TrackScript {
    /// Key presses delivered to the message filter, in order. Delivery stops
    /// once one is handled, since the loop has been cancelled.
    pub keys: Vec<Chord>,
    /// Value the native loop returns (`0` = dismissed).
    pub returns: u32,
    /// Panic from inside the loop after the keys were delivered.
    pub panic: bool,
}

impl TrackScript {
    /// User clicks the item with `id`.
    pub fn click(id: CommandId) -> Self {
        Self {
            returns: id.0,
            ..Self::default()
        }
    }

    /// User presses `chord`, then the loop returns nothing.
    pub fn press(chord: Chord) -> Self {
        Self {
            keys: vec![chord],
            ..Self::default()
        }
    }

    /// User closes the menu without choosing.
    pub fn dismiss() -> Self {
        Self::default()
    }
}

#[derive(Default)]
struct Journal {
    next_handle: u32,
    menus: BTreeMap<MenuHandle, Vec<Entry>>,
    live: HashSet<MenuHandle>,
    calls: Vec<NativeCall>,
    failing: HashSet<FailPoint>,
    script: TrackScript,
    filter_installed: bool,
    cursor: Point,
}

/// Backend recording every call in memory.
#[derive(Clone, Default)]
pub struct RecordingBackend {
    journal: Rc<RefCell<Journal>>,
}

impl fmt::Debug for RecordingBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let j = self.journal.borrow();
        f.debug_struct("RecordingBackend")
            .field("menus", &j.menus.len())
            .field("live", &j.live.len())
            .field("calls", &j.calls.len())
            .finish()
    }
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call of `point` fail (or succeed again).
    pub fn set_failing(&self, point: FailPoint, failing: bool) {
        let mut j = self.journal.borrow_mut();
        if failing {
            j.failing.insert(point);
        } else {
            j.failing.remove(&point);
        }
    }

    /// Sets what happens during the next `track_popup`.
    pub fn script(&self, script: TrackScript) {
        self.journal.borrow_mut().script = script;
    }

    pub fn set_cursor(&self, at: Point) {
        self.journal.borrow_mut().cursor = at;
    }

    /// Entries appended to `menu`, empty if unknown.
    pub fn entries(&self, menu: MenuHandle) -> Vec<Entry> {
        self.journal
            .borrow()
            .menus
            .get(&menu)
            .cloned()
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<NativeCall> {
        self.journal.borrow().calls.clone()
    }

    /// Handles destroyed so far, in order.
    pub fn destroyed(&self) -> Vec<MenuHandle> {
        self.journal
            .borrow()
            .calls
            .iter()
            .filter_map(|c| match c {
                NativeCall::Destroy(h) => Some(*h),
                _ => None,
            })
            .collect()
    }

    /// Handles created so far, in order.
    pub fn created(&self) -> Vec<MenuHandle> {
        self.journal
            .borrow()
            .calls
            .iter()
            .filter_map(|c| match c {
                NativeCall::CreatePopup(h) => Some(*h),
                _ => None,
            })
            .collect()
    }

    /// Number of menus created but not yet destroyed.
    pub fn live_menus(&self) -> usize {
        self.journal.borrow().live.len()
    }

    pub fn filter_installed(&self) -> bool {
        self.journal.borrow().filter_installed
    }

    /// Renders `menu` and its submenus as indented text, one entry per line.
    pub fn render(&self, menu: MenuHandle) -> String {
        let mut out = String::new();
        self.render_into(menu, 0, &mut out);
        out
    }

    fn render_into(&self, menu: MenuHandle, depth: usize, out: &mut String) {
        let indent = "  ".repeat(depth);
        for entry in self.entries(menu) {
            match entry {
                Entry::Separator => out.push_str(&format!("{indent}----\n")),
                Entry::Item { id, label, state } => {
                    let mark = if state.checked { "[x] " } else { "" };
                    let grey = if state.enabled { "" } else { " (disabled)" };
                    let label = label.replace('\t', "    ");
                    out.push_str(&format!("{indent}{mark}{label}{grey} #{id}\n"));
                }
                Entry::Submenu { handle, label } => {
                    let label = label.replace('\t', "    ");
                    out.push_str(&format!("{indent}{label} >\n"));
                    self.render_into(handle, depth + 1, out);
                }
            }
        }
    }

    fn check(&self, point: FailPoint, call: &'static str) -> Result<(), MenuError> {
        if self.journal.borrow().failing.contains(&point) {
            return Err(MenuError::Native {
                call,
                source: std::io::Error::other("injected failure"),
            });
        }
        Ok(())
    }

    fn push(&self, menu: MenuHandle, entry: Entry) -> Result<(), MenuError> {
        let mut j = self.journal.borrow_mut();
        if !j.live.contains(&menu) {
            return Err(MenuError::Native {
                call: "AppendMenuW",
                source: std::io::Error::other(format!("invalid menu handle {menu:?}")),
            });
        }
        j.menus.entry(menu).or_default().push(entry);
        Ok(())
    }
}

impl MenuBackend for RecordingBackend {
    type Menu = MenuHandle;
    type Window = WindowId;
    type Hook = ();

    fn create_popup(&self) -> Result<MenuHandle, MenuError> {
        self.check(FailPoint::CreatePopup, "CreatePopupMenu")?;
        let mut j = self.journal.borrow_mut();
        j.next_handle += 1;
        let handle = MenuHandle(j.next_handle);
        j.menus.insert(handle, Vec::new());
        j.live.insert(handle);
        j.calls.push(NativeCall::CreatePopup(handle));
        Ok(handle)
    }

    fn append_item(
        &self,
        menu: MenuHandle,
        id: CommandId,
        label: &str,
        state: ItemState,
    ) -> Result<(), MenuError> {
        self.check(FailPoint::AppendItem, "AppendMenuW")?;
        self.push(
            menu,
            Entry::Item {
                id,
                label: label.to_string(),
                state,
            },
        )
    }

    fn append_separator(&self, menu: MenuHandle) -> Result<(), MenuError> {
        self.check(FailPoint::AppendSeparator, "AppendMenuW")?;
        self.push(menu, Entry::Separator)
    }

    fn append_submenu(
        &self,
        menu: MenuHandle,
        submenu: MenuHandle,
        label: &str,
    ) -> Result<(), MenuError> {
        self.check(FailPoint::AppendSubmenu, "AppendMenuW")?;
        self.push(
            menu,
            Entry::Submenu {
                handle: submenu,
                label: label.to_string(),
            },
        )
    }

    fn destroy(&self, menu: MenuHandle) -> Result<(), MenuError> {
        let mut j = self.journal.borrow_mut();
        j.calls.push(NativeCall::Destroy(menu));
        if !j.live.remove(&menu) {
            return Err(MenuError::Native {
                call: "DestroyMenu",
                source: std::io::Error::other(format!("menu {menu:?} is not live")),
            });
        }
        Ok(())
    }

    fn cursor_position(&self) -> Point {
        self.journal.borrow().cursor
    }

    fn set_foreground(&self, owner: WindowId) {
        self.journal
            .borrow_mut()
            .calls
            .push(NativeCall::SetForeground(owner));
    }

    fn install_filter(&self) -> Result<(), MenuError> {
        self.check(FailPoint::InstallFilter, "SetWindowsHookExW")?;
        let mut j = self.journal.borrow_mut();
        j.filter_installed = true;
        j.calls.push(NativeCall::InstallFilter);
        Ok(())
    }

    fn remove_filter(&self, _hook: ()) {
        let mut j = self.journal.borrow_mut();
        j.filter_installed = false;
        j.calls.push(NativeCall::RemoveFilter);
    }

    fn track_popup(&self, menu: MenuHandle, at: Point, _owner: WindowId) -> u32 {
        let (script, hooked) = {
            let mut j = self.journal.borrow_mut();
            j.calls.push(NativeCall::Track { menu, at });
            (std::mem::take(&mut j.script), j.filter_installed)
        };

        if hooked {
            for chord in &script.keys {
                if filter_event(FilterEvent::KeyDown(*chord)) == FilterVerdict::Handled {
                    break;
                }
            }
        }

        if script.panic {
            panic!("scripted failure inside the popup loop");
        }
        script.returns
    }

    fn post_null(&self, owner: WindowId) {
        self.journal
            .borrow_mut()
            .calls
            .push(NativeCall::PostNull(owner));
    }

    fn cancel_mode(&self, owner: WindowId) {
        self.journal
            .borrow_mut()
            .calls
            .push(NativeCall::CancelMode(owner));
    }
}
