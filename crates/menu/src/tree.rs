//! Menu tree: native handles plus the registries shared by all nodes.

use crate::backend::{ItemState, MenuBackend};
use crate::registry::{Action, Chord, CommandId, CommandRegistry, ShortcutTable};

/// Index of a node within its [`MenuTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub const ROOT: Self = Self(0);
}

#[derive(Debug)]
struct NodeSlot<M> {
    /// `None` when the native menu could not be created.
    handle: Option<M>,
    parent: Option<NodeId>,
    /// Submenu handles created through this node; destroyed by the tree.
    submenus: Vec<M>,
}

/// A popup menu and all of its submenus.
///
/// The tree owns every native handle it creates plus the single command
/// registry and shortcut table. A tree is single-use: build it, show it once,
/// then dispose of it (dropping does so too).
pub struct MenuTree<B: MenuBackend> {
    pub(crate) backend: B,
    nodes: Vec<NodeSlot<B::Menu>>,
    pub(crate) commands: CommandRegistry,
    pub(crate) shortcuts: ShortcutTable,
    pub(crate) shown: bool,
    disposed: bool,
}

impl<B: MenuBackend> MenuTree<B> {
    /// Creates an empty tree whose first command identifier is `start_id`.
    ///
    /// A failed root allocation is logged; the tree still accepts items but
    /// [`show`](Self::show) will report [`MenuError::NoRootMenu`](crate::MenuError::NoRootMenu).
    /// Identifiers stay within `1..=B::MAX_COMMAND_ID`; items past that
    /// range are dropped.
    pub fn new(backend: B, start_id: u32) -> Self {
        if start_id == 0 || start_id > B::MAX_COMMAND_ID {
            tracing::warn!(
                start_id,
                max = B::MAX_COMMAND_ID,
                "menu start id out of range"
            );
        }
        let handle = match backend.create_popup() {
            Ok(h) => Some(h),
            Err(e) => {
                tracing::warn!(error = %e, "failed to create root popup menu");
                None
            }
        };
        Self {
            backend,
            nodes: vec![NodeSlot {
                handle,
                parent: None,
                submenus: Vec::new(),
            }],
            commands: CommandRegistry::with_limit(start_id, B::MAX_COMMAND_ID),
            shortcuts: ShortcutTable::new(),
            shown: false,
            disposed: false,
        }
    }

    /// Cursor on the root menu.
    pub fn root(&mut self) -> MenuNode<'_, B> {
        self.node(NodeId::ROOT)
    }

    /// Cursor on an existing node.
    ///
    /// # Panics
    /// If `id` does not belong to this tree.
    pub fn node(&mut self, id: NodeId) -> MenuNode<'_, B> {
        assert!(id.0 < self.nodes.len(), "node {id:?} is not part of this tree");
        MenuNode {
            tree: self,
            index: id.0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn root_handle(&self) -> Option<B::Menu> {
        self.nodes.first().and_then(|n| n.handle)
    }

    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    pub fn shortcuts(&self) -> &ShortcutTable {
        &self.shortcuts
    }

    /// Number of nodes, root included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Runs the action bound to `id` right away. Returns `false` for an
    /// unknown or already consumed identifier.
    pub fn execute(&mut self, id: CommandId) -> bool {
        match self.commands.take(id) {
            Some(action) => {
                action();
                true
            }
            None => false,
        }
    }

    /// Destroys every native handle and clears both registries.
    ///
    /// Submenus go first, deepest first, then the root. Each handle is
    /// destroyed exactly once; calling this again does nothing.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        // Children always have a higher index than their parent.
        for node in self.nodes.iter_mut().rev() {
            for handle in node.submenus.drain(..).rev() {
                if let Err(e) = self.backend.destroy(handle) {
                    tracing::warn!(error = %e, "failed to destroy submenu");
                }
            }
        }
        for node in &mut self.nodes {
            node.handle = None;
        }

        if let Some(root) = self.nodes.first_mut().and_then(|n| n.handle.take()) {
            if let Err(e) = self.backend.destroy(root) {
                tracing::warn!(error = %e, "failed to destroy root menu");
            }
        }
        self.commands.clear();
        self.shortcuts.clear();
    }

    fn parent_of(&self, index: usize) -> Option<NodeId> {
        self.nodes[index].parent
    }
}

impl<B: MenuBackend> Drop for MenuTree<B> {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Mutable cursor on one node of a [`MenuTree`].
///
/// Items appended through any node draw identifiers from, and register
/// actions and shortcuts in, the tree-wide registries.
pub struct MenuNode<'t, B: MenuBackend> {
    tree: &'t mut MenuTree<B>,
    index: usize,
}

impl<'t, B: MenuBackend> MenuNode<'t, B> {
    pub fn id(&self) -> NodeId {
        NodeId(self.index)
    }

    pub fn is_submenu(&self) -> bool {
        self.index != 0
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.tree.parent_of(self.index)
    }

    pub fn handle(&self) -> Option<B::Menu> {
        self.tree.nodes[self.index].handle
    }

    /// Appends a selectable item bound to `action`.
    ///
    /// The identifier is allocated even if the native append fails; the item
    /// is then simply missing from the menu. Returns `None` without touching
    /// the native menu once the identifier range is used up.
    pub fn add_item(
        &mut self,
        label: &str,
        state: ItemState,
        action: impl FnOnce() + 'static,
    ) -> Option<CommandId> {
        let Some(id) = self.tree.commands.register(Box::new(action) as Action) else {
            tracing::warn!(label, "command ids exhausted, menu item dropped");
            return None;
        };
        if let Some(menu) = self.handle() {
            if let Err(e) = self.tree.backend.append_item(menu, id, label, state) {
                tracing::warn!(label, error = %e, "menu item dropped");
            }
        }
        Some(id)
    }

    /// Like [`add_item`](Self::add_item), and binds `chord` to the item.
    ///
    /// The chord is shown after a tab in the item text. A disabled item
    /// keeps the hint but its chord is not bound.
    pub fn add_item_with_shortcut(
        &mut self,
        label: &str,
        chord: Chord,
        state: ItemState,
        action: impl FnOnce() + 'static,
    ) -> Option<CommandId> {
        let text = format!("{label}\t{chord}");
        let id = self.add_item(&text, state, action)?;
        if !state.enabled {
            tracing::debug!(%chord, command = %id, "shortcut of disabled item not bound");
            return Some(id);
        }
        if let Some(previous) = self.tree.shortcuts.bind(chord, id) {
            tracing::debug!(%chord, %previous, replaced_by = %id, "shortcut rebound");
        }
        Some(id)
    }

    /// Appends a divider. Consumes no identifier.
    pub fn add_separator(&mut self) {
        if let Some(menu) = self.handle() {
            if let Err(e) = self.tree.backend.append_separator(menu) {
                tracing::warn!(error = %e, "menu separator dropped");
            }
        }
    }

    /// Appends a cascading submenu and returns a cursor on it.
    ///
    /// If the native submenu cannot be created or attached it is missing
    /// from the displayed menu; items added to it still get identifiers.
    pub fn add_submenu(&mut self, label: &str) -> MenuNode<'_, B> {
        let handle = match self.tree.backend.create_popup() {
            Ok(h) => Some(h),
            Err(e) => {
                tracing::warn!(label, error = %e, "failed to create submenu");
                None
            }
        };

        if let Some(sub) = handle {
            // Owned here even when attaching fails, so it is still destroyed.
            self.tree.nodes[self.index].submenus.push(sub);
            if let Some(menu) = self.handle() {
                if let Err(e) = self.tree.backend.append_submenu(menu, sub, label) {
                    tracing::warn!(label, error = %e, "submenu not attached");
                }
            }
        }

        let index = self.tree.nodes.len();
        self.tree.nodes.push(NodeSlot {
            handle,
            parent: Some(NodeId(self.index)),
            submenus: Vec::new(),
        });
        MenuNode {
            tree: &mut *self.tree,
            index,
        }
    }
}
