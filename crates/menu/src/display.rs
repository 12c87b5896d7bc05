//! Modal display of a menu tree.

use std::rc::Rc;

use crate::backend::MenuBackend;
use crate::error::MenuError;
use crate::interceptor::InterceptScope;
use crate::registry::CommandId;
use crate::tree::MenuTree;

/// How a popup ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// An item was clicked (or chosen with the native menu keys).
    Command(CommandId),
    /// An application shortcut fired and cancelled the loop.
    Shortcut(CommandId),
    /// The menu was closed without a choice.
    Dismissed,
}

impl Selection {
    /// The chosen command, whichever way it was chosen.
    pub fn command(&self) -> Option<CommandId> {
        match self {
            Selection::Command(id) | Selection::Shortcut(id) => Some(*id),
            Selection::Dismissed => None,
        }
    }
}

/// Combines the two result slots. Once a shortcut fired the loop was
/// cancelled, so the native value carries no meaning.
fn resolve(shortcut: Option<CommandId>, native: u32) -> Selection {
    match (shortcut, native) {
        (Some(id), _) => Selection::Shortcut(id),
        (None, 0) => Selection::Dismissed,
        (None, id) => Selection::Command(CommandId(id)),
    }
}

/// Removes the message filter when dropped.
struct FilterGuard<'a, B: MenuBackend> {
    backend: &'a B,
    hook: Option<B::Hook>,
}

impl<'a, B: MenuBackend> FilterGuard<'a, B> {
    fn install(backend: &'a B) -> Self {
        let hook = match backend.install_filter() {
            Ok(hook) => Some(hook),
            Err(e) => {
                tracing::warn!(error = %e, "menu shortcuts unavailable for this popup");
                None
            }
        };
        Self { backend, hook }
    }
}

impl<B: MenuBackend> Drop for FilterGuard<'_, B> {
    fn drop(&mut self) {
        if let Some(hook) = self.hook.take() {
            self.backend.remove_filter(hook);
        }
    }
}

impl<B: MenuBackend> MenuTree<B> {
    /// Shows the menu at the pointer and blocks until it closes.
    ///
    /// Must be called on the thread that pumps `owner`'s messages. The
    /// shortcut filter is installed for the duration of the call and removed
    /// on every exit path, including a panic inside the native loop. A tree
    /// can be shown once.
    pub fn show(&mut self, owner: B::Window) -> Result<Selection, MenuError> {
        if self.is_disposed() {
            return Err(MenuError::Disposed);
        }
        if self.shown {
            return Err(MenuError::AlreadyShown);
        }
        let root = self.root_handle().ok_or(MenuError::NoRootMenu)?;

        let cancel: Rc<dyn Fn()> = {
            let backend = self.backend.clone();
            Rc::new(move || backend.cancel_mode(owner))
        };
        let scope = InterceptScope::enter(self.shortcuts.clone(), cancel)?;
        self.shown = true;

        let at = self.backend.cursor_position();
        self.backend.set_foreground(owner);

        let filter = FilterGuard::install(&self.backend);
        let native = self.backend.track_popup(root, at, owner);
        self.backend.post_null(owner);

        let selection = resolve(scope.resolved(), native);
        drop(filter);
        drop(scope);

        tracing::debug!(?selection, "popup menu closed");
        Ok(selection)
    }

    /// Shows the menu, disposes the tree, then runs the chosen action.
    ///
    /// The action runs after every native handle has been released, so a
    /// failing action cannot leak menu state. Returns how the menu ended.
    pub fn run(mut self, owner: B::Window) -> Result<Selection, MenuError> {
        let result = self.show(owner);
        let action = match &result {
            Ok(selection) => selection.command().and_then(|id| {
                let action = self.commands.take(id);
                if action.is_none() {
                    tracing::warn!(command = %id, "no action bound to selected command");
                }
                action
            }),
            Err(_) => None,
        };

        self.dispose();
        drop(self);

        if let Some(action) = action {
            action();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;
    use crate::backend::{ItemState, Point};
    use crate::backend::recording::{
        FailPoint, NativeCall, RecordingBackend, TrackScript, WindowId,
    };
    use crate::interceptor;
    use crate::registry::Chord;

    const OWNER: WindowId = WindowId(7);

    type Log = Rc<RefCell<Vec<&'static str>>>;

    fn logged(log: &Log, name: &'static str) -> impl FnOnce() + 'static {
        let log = Rc::clone(log);
        move || log.borrow_mut().push(name)
    }

    /// Root with "Rule" (Alt+R) in a submenu, "Dashboard" (Ctrl+D) and "Exit".
    fn sample(
        backend: &RecordingBackend,
        log: &Log,
    ) -> (MenuTree<RecordingBackend>, [CommandId; 3]) {
        let mut tree = MenuTree::new(backend.clone(), 1000);
        let ids = {
            let mut root = tree.root();
            let rule = {
                let mut mode = root.add_submenu("Mode");
                mode.add_item_with_shortcut(
                    "Rule",
                    Chord::alt(b'R'),
                    ItemState::NORMAL,
                    logged(log, "rule"),
                )
            };
            root.add_separator();
            let dash = root.add_item_with_shortcut(
                "Open Dashboard",
                Chord::ctrl(b'D'),
                ItemState::NORMAL,
                logged(log, "dashboard"),
            );
            let exit = root.add_item("Exit", ItemState::NORMAL, logged(log, "exit"));
            [rule, dash, exit].map(Option::unwrap)
        };
        (tree, ids)
    }

    #[test]
    fn resolve_priority() {
        assert_eq!(resolve(Some(CommandId(5)), 9), Selection::Shortcut(CommandId(5)));
        assert_eq!(resolve(Some(CommandId(5)), 0), Selection::Shortcut(CommandId(5)));
        assert_eq!(resolve(None, 9), Selection::Command(CommandId(9)));
        assert_eq!(resolve(None, 0), Selection::Dismissed);
    }

    #[test]
    fn click_runs_action_after_disposal() {
        let backend = RecordingBackend::new();
        let log = Log::default();
        let (tree, [_, _, exit]) = sample(&backend, &log);
        backend.script(TrackScript::click(exit));

        let selection = tree.run(OWNER).unwrap();
        assert_eq!(selection, Selection::Command(exit));
        assert_eq!(*log.borrow(), ["exit"]);
        assert_eq!(backend.live_menus(), 0);
    }

    #[test]
    fn shortcut_overrides_native_result() {
        let backend = RecordingBackend::new();
        let log = Log::default();
        let (tree, [rule, _, exit]) = sample(&backend, &log);
        backend.script(TrackScript {
            keys: vec![Chord::alt(b'R')],
            returns: exit.0,
            panic: false,
        });

        let selection = tree.run(OWNER).unwrap();
        assert_eq!(selection, Selection::Shortcut(rule));
        assert_eq!(*log.borrow(), ["rule"]);
        assert!(backend.calls().contains(&NativeCall::CancelMode(OWNER)));
    }

    #[test]
    fn unmatched_keys_do_not_cancel() {
        let backend = RecordingBackend::new();
        let log = Log::default();
        let (tree, [_, dash, _]) = sample(&backend, &log);
        backend.script(TrackScript {
            keys: vec![Chord::alt(b'D'), Chord::ctrl(b'D')],
            returns: 0,
            panic: false,
        });

        assert_eq!(tree.run(OWNER).unwrap(), Selection::Shortcut(dash));
        let cancels = backend
            .calls()
            .iter()
            .filter(|c| matches!(c, NativeCall::CancelMode(_)))
            .count();
        assert_eq!(cancels, 1);
    }

    #[test]
    fn dismiss_runs_nothing() {
        let backend = RecordingBackend::new();
        let log = Log::default();
        let (tree, _) = sample(&backend, &log);
        backend.script(TrackScript::dismiss());

        assert_eq!(tree.run(OWNER).unwrap(), Selection::Dismissed);
        assert!(log.borrow().is_empty());
        assert_eq!(backend.live_menus(), 0);
    }

    #[test]
    fn call_sequence_matches_popup_protocol() {
        let backend = RecordingBackend::new();
        backend.set_cursor(Point { x: 1800, y: 1050 });
        let log = Log::default();
        let (mut tree, _) = sample(&backend, &log);
        let root = tree.root_handle().unwrap();
        backend.script(TrackScript::dismiss());

        tree.show(OWNER).unwrap();
        let calls: Vec<_> = backend
            .calls()
            .into_iter()
            .filter(|c| !matches!(c, NativeCall::CreatePopup(_)))
            .collect();
        assert_eq!(
            calls,
            [
                NativeCall::SetForeground(OWNER),
                NativeCall::InstallFilter,
                NativeCall::Track {
                    menu: root,
                    at: Point { x: 1800, y: 1050 }
                },
                NativeCall::PostNull(OWNER),
                NativeCall::RemoveFilter,
            ]
        );
        assert!(!backend.filter_installed());
        assert!(!interceptor::is_active());
    }

    #[test]
    fn hook_failure_still_allows_clicks() {
        let backend = RecordingBackend::new();
        backend.set_failing(FailPoint::InstallFilter, true);
        let log = Log::default();
        let (tree, [_, _, exit]) = sample(&backend, &log);
        backend.script(TrackScript {
            keys: vec![Chord::ctrl(b'D')],
            returns: exit.0,
            panic: false,
        });

        assert_eq!(tree.run(OWNER).unwrap(), Selection::Command(exit));
        assert_eq!(*log.borrow(), ["exit"]);
        assert!(!backend.calls().contains(&NativeCall::RemoveFilter));
    }

    #[test]
    fn panic_in_loop_still_cleans_up() {
        let backend = RecordingBackend::new();
        let log = Log::default();
        let (tree, _) = sample(&backend, &log);
        backend.script(TrackScript {
            panic: true,
            ..TrackScript::default()
        });

        let result = catch_unwind(AssertUnwindSafe(move || tree.run(OWNER)));
        assert!(result.is_err());
        assert!(!backend.filter_installed());
        assert!(!interceptor::is_active());
        assert_eq!(backend.live_menus(), 0);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn tree_is_single_use() {
        let backend = RecordingBackend::new();
        let log = Log::default();
        let (mut tree, _) = sample(&backend, &log);
        backend.script(TrackScript::dismiss());

        tree.show(OWNER).unwrap();
        assert!(matches!(tree.show(OWNER), Err(MenuError::AlreadyShown)));
        tree.dispose();
        assert!(matches!(tree.show(OWNER), Err(MenuError::Disposed)));
    }

    #[test]
    fn concurrent_show_on_same_thread_is_refused() {
        let outer_backend = RecordingBackend::new();
        let inner_backend = RecordingBackend::new();
        let log = Log::default();
        let (mut outer, _) = sample(&outer_backend, &log);
        let (mut inner, _) = sample(&inner_backend, &log);

        let _scope = InterceptScope::enter(outer.shortcuts.clone(), Rc::new(|| {})).unwrap();
        assert!(matches!(inner.show(OWNER), Err(MenuError::ShowInProgress)));
        // Refused before any native call.
        assert!(!inner_backend
            .calls()
            .iter()
            .any(|c| matches!(c, NativeCall::Track { .. })));
        outer.dispose();
    }

    #[test]
    fn missing_root_is_an_error_and_nothing_runs() {
        let backend = RecordingBackend::new();
        backend.set_failing(FailPoint::CreatePopup, true);
        let log = Log::default();
        let mut tree = MenuTree::new(backend.clone(), 1000);
        tree.root().add_item("x", ItemState::NORMAL, logged(&log, "x"));

        assert!(matches!(tree.run(OWNER), Err(MenuError::NoRootMenu)));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn failing_action_happens_after_teardown() {
        let backend = RecordingBackend::new();
        let mut tree = MenuTree::new(backend.clone(), 1000);
        let probe = backend.clone();
        let live_at_action = Rc::new(Cell::new(usize::MAX));
        let seen = Rc::clone(&live_at_action);
        let id = tree
            .root()
            .add_item("boom", ItemState::NORMAL, move || {
                seen.set(probe.live_menus());
                panic!("action failed");
            })
            .unwrap();
        backend.script(TrackScript::click(id));

        let result = catch_unwind(AssertUnwindSafe(move || tree.run(OWNER)));
        assert!(result.is_err());
        assert_eq!(live_at_action.get(), 0);
        assert_eq!(backend.live_menus(), 0);
        assert!(!interceptor::is_active());
    }
}
