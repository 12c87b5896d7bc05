//! Command and shortcut registries shared by every node of a menu tree.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Work bound to a menu item, run at most once after the menu closes.
pub type Action = Box<dyn FnOnce()>;

/// Identifier the native menu reports back for a selected item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommandId(pub u32);

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Maps command identifiers to actions and hands out fresh identifiers.
///
/// Identifiers are strictly increasing from the start value and never
/// reused, no matter which node of the tree asked for one. `0` is never
/// handed out: the native menu reports it when nothing was chosen.
pub struct CommandRegistry {
    /// `None` once every identifier up to `last` is taken.
    next: Option<u32>,
    last: u32,
    actions: BTreeMap<CommandId, Action>,
}

impl CommandRegistry {
    /// Creates an empty registry whose first identifier is `start`
    /// (or `1` for a start of `0`).
    pub fn new(start: u32) -> Self {
        Self::with_limit(start, u32::MAX)
    }

    /// Like [`new`](Self::new), but never hands out identifiers above `last`.
    pub fn with_limit(start: u32, last: u32) -> Self {
        let start = start.max(1);
        Self {
            next: (start <= last).then_some(start),
            last,
            actions: BTreeMap::new(),
        }
    }

    /// Registers `action` under the next free identifier.
    ///
    /// Returns `None`, dropping the action, once the identifier range is
    /// used up.
    pub fn register(&mut self, action: Action) -> Option<CommandId> {
        let id = self.next?;
        self.next = id.checked_add(1).filter(|n| *n <= self.last);
        self.actions.insert(CommandId(id), action);
        Some(CommandId(id))
    }

    /// Removes and returns the action bound to `id`.
    pub fn take(&mut self, id: CommandId) -> Option<Action> {
        self.actions.remove(&id)
    }

    pub fn contains(&self, id: CommandId) -> bool {
        self.actions.contains_key(&id)
    }

    /// Identifier the next registration will receive, if any is left.
    pub fn next_id(&self) -> Option<CommandId> {
        self.next.map(CommandId)
    }

    /// Highest identifier this registry may hand out.
    pub fn last_id(&self) -> CommandId {
        CommandId(self.last)
    }

    /// Registered identifiers in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = CommandId> + '_ {
        self.actions.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Drops every action. The identifier counter keeps going.
    pub fn clear(&mut self) {
        self.actions.clear();
    }
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("next", &self.next)
            .field("last", &self.last)
            .field("ids", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A Windows virtual-key code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VirtualKey(pub u16);

impl VirtualKey {
    /// Key for an ASCII letter or digit. Letters map to their upper-case
    /// code, which is what the keyboard reports.
    pub const fn from_ascii(c: u8) -> Self {
        Self(c.to_ascii_uppercase() as u16)
    }
}

impl fmt::Display for VirtualKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            code @ (0x30..=0x39 | 0x41..=0x5A) => write!(f, "{}", code as u8 as char),
            code => write!(f, "0x{code:02X}"),
        }
    }
}

/// A keyboard shortcut: key plus the Ctrl and Alt state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chord {
    pub key: VirtualKey,
    pub ctrl: bool,
    pub alt: bool,
}

impl Chord {
    pub const fn new(key: VirtualKey, ctrl: bool, alt: bool) -> Self {
        Self { key, ctrl, alt }
    }

    /// `Ctrl+<c>`.
    pub const fn ctrl(c: u8) -> Self {
        Self::new(VirtualKey::from_ascii(c), true, false)
    }

    /// `Alt+<c>`.
    pub const fn alt(c: u8) -> Self {
        Self::new(VirtualKey::from_ascii(c), false, true)
    }
}

impl fmt::Display for Chord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ctrl {
            f.write_str("Ctrl+")?;
        }
        if self.alt {
            f.write_str("Alt+")?;
        }
        write!(f, "{}", self.key)
    }
}

/// Maps chords to the command they trigger.
#[derive(Debug, Clone, Default)]
pub struct ShortcutTable {
    bindings: HashMap<Chord, CommandId>,
}

impl ShortcutTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `chord` to `id`, returning the command it was bound to before.
    pub fn bind(&mut self, chord: Chord, id: CommandId) -> Option<CommandId> {
        self.bindings.insert(chord, id)
    }

    pub fn lookup(&self, chord: &Chord) -> Option<CommandId> {
        self.bindings.get(chord).copied()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Chord, &CommandId)> {
        self.bindings.iter()
    }
}
