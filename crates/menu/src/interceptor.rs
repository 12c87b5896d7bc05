//! Keyboard shortcuts for the popup loop.
//!
//! The native popup loop owns the thread's message queue and knows nothing
//! about application shortcuts. While [`MenuTree::show`](crate::MenuTree::show)
//! runs, the backend's message filter hook feeds every key press into
//! [`filter_event`]. A press matching the active shortcut table records the
//! command and cancels the loop.
//!
//! The active context lives in a thread-local slot. It is set by an
//! [`InterceptScope`] right before the popup is shown and cleared when the
//! scope drops, on every exit path.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::error::MenuError;
use crate::registry::{Chord, CommandId, ShortcutTable};

/// Input observed by the message filter while the popup loop runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterEvent {
    /// A key went down; modifiers are read from the keyboard state.
    KeyDown(Chord),
    /// Anything else: mouse input, key-up, non-menu filter codes.
    Other,
}

/// What the hook should tell the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    /// Swallow the message.
    Handled,
    /// Pass it down the hook chain.
    Forward,
}

struct InterceptContext {
    shortcuts: ShortcutTable,
    resolved: Option<CommandId>,
    cancel: Rc<dyn Fn()>,
}

thread_local! {
    static ACTIVE: RefCell<Option<InterceptContext>> = const { RefCell::new(None) };
}

/// Guard owning the thread's active interception context.
pub(crate) struct InterceptScope {
    _not_send: PhantomData<*const ()>,
}

impl InterceptScope {
    /// Makes `shortcuts` the active table for this thread. `cancel` is called
    /// once a shortcut matches.
    pub(crate) fn enter(shortcuts: ShortcutTable, cancel: Rc<dyn Fn()>) -> Result<Self, MenuError> {
        ACTIVE.with(|slot| {
            let mut slot = slot.borrow_mut();
            if slot.is_some() {
                return Err(MenuError::ShowInProgress);
            }
            *slot = Some(InterceptContext {
                shortcuts,
                resolved: None,
                cancel,
            });
            Ok(Self {
                _not_send: PhantomData,
            })
        })
    }

    /// Command recorded by a shortcut match, if any.
    pub(crate) fn resolved(&self) -> Option<CommandId> {
        ACTIVE.with(|slot| slot.borrow().as_ref().and_then(|ctx| ctx.resolved))
    }
}

impl Drop for InterceptScope {
    fn drop(&mut self) {
        let _ = ACTIVE.try_with(|slot| {
            if let Ok(mut slot) = slot.try_borrow_mut() {
                slot.take();
            }
        });
    }
}

/// Whether a popup is currently being shown on this thread.
pub fn is_active() -> bool {
    ACTIVE
        .try_with(|slot| slot.try_borrow().map(|s| s.is_some()).unwrap_or(true))
        .unwrap_or(false)
}

/// Matches one filtered event against the active shortcut table.
///
/// Called from hook procedures, so it never panics: with no active context
/// (hook fired during teardown) or on re-entry it simply forwards. Only the
/// first match records a command and cancels the loop; later matches in the
/// same loop are swallowed.
pub fn filter_event(event: FilterEvent) -> FilterVerdict {
    let FilterEvent::KeyDown(chord) = event else {
        return FilterVerdict::Forward;
    };

    let matched = ACTIVE
        .try_with(|slot| {
            let mut slot = slot.try_borrow_mut().ok()?;
            let ctx = slot.as_mut()?;
            let id = ctx.shortcuts.lookup(&chord)?;
            if ctx.resolved.is_some() {
                return Some((id, None));
            }
            ctx.resolved = Some(id);
            Some((id, Some(Rc::clone(&ctx.cancel))))
        })
        .ok()
        .flatten();

    match matched {
        Some((id, cancel)) => {
            if let Some(cancel) = cancel {
                tracing::debug!(%chord, command = %id, "menu shortcut matched");
                // Slot borrow is released; the cancel message may re-enter the hook.
                cancel();
            }
            FilterVerdict::Handled
        }
        None => FilterVerdict::Forward,
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn table(chord: Chord, id: u32) -> ShortcutTable {
        let mut t = ShortcutTable::new();
        t.bind(chord, CommandId(id));
        t
    }

    #[test]
    fn forwards_without_active_scope() {
        assert!(!is_active());
        let verdict = filter_event(FilterEvent::KeyDown(Chord::ctrl(b'S')));
        assert_eq!(verdict, FilterVerdict::Forward);
    }

    #[test]
    fn match_records_command_and_cancels() {
        let cancels = Rc::new(Cell::new(0));
        let counter = Rc::clone(&cancels);
        let scope = InterceptScope::enter(
            table(Chord::ctrl(b'S'), 1007),
            Rc::new(move || counter.set(counter.get() + 1)),
        )
        .unwrap();

        assert_eq!(
            filter_event(FilterEvent::KeyDown(Chord::ctrl(b'S'))),
            FilterVerdict::Handled
        );
        assert_eq!(scope.resolved(), Some(CommandId(1007)));
        assert_eq!(cancels.get(), 1);
    }

    #[test]
    fn non_matching_and_other_events_forward() {
        let scope = InterceptScope::enter(table(Chord::ctrl(b'S'), 1), Rc::new(|| {})).unwrap();

        assert_eq!(
            filter_event(FilterEvent::KeyDown(Chord::alt(b'S'))),
            FilterVerdict::Forward
        );
        assert_eq!(filter_event(FilterEvent::Other), FilterVerdict::Forward);
        assert_eq!(scope.resolved(), None);
    }

    #[test]
    fn first_match_wins() {
        let mut shortcuts = table(Chord::ctrl(b'A'), 1);
        shortcuts.bind(Chord::ctrl(b'B'), CommandId(2));
        let scope = InterceptScope::enter(shortcuts, Rc::new(|| {})).unwrap();

        filter_event(FilterEvent::KeyDown(Chord::ctrl(b'A')));
        assert_eq!(
            filter_event(FilterEvent::KeyDown(Chord::ctrl(b'B'))),
            FilterVerdict::Handled
        );
        assert_eq!(scope.resolved(), Some(CommandId(1)));
    }

    #[test]
    fn scope_drop_clears_slot() {
        let scope = InterceptScope::enter(table(Chord::ctrl(b'S'), 1), Rc::new(|| {})).unwrap();
        assert!(is_active());
        drop(scope);
        assert!(!is_active());
        assert_eq!(
            filter_event(FilterEvent::KeyDown(Chord::ctrl(b'S'))),
            FilterVerdict::Forward
        );
    }

    #[test]
    fn nested_scope_is_refused() {
        let _outer = InterceptScope::enter(ShortcutTable::new(), Rc::new(|| {})).unwrap();
        let inner = InterceptScope::enter(ShortcutTable::new(), Rc::new(|| {}));
        assert!(matches!(inner, Err(MenuError::ShowInProgress)));
        // The refused attempt must not clear the outer scope.
        assert!(is_active());
    }

    #[test]
    fn cancel_may_reenter_filter() {
        let cancels = Rc::new(Cell::new(0));
        let counter = Rc::clone(&cancels);
        let scope = InterceptScope::enter(
            table(Chord::ctrl(b'S'), 3),
            Rc::new(move || {
                counter.set(counter.get() + 1);
                // A synchronous cancel message can loop back into the hook.
                let _ = filter_event(FilterEvent::KeyDown(Chord::ctrl(b'S')));
            }),
        )
        .unwrap();

        assert_eq!(
            filter_event(FilterEvent::KeyDown(Chord::ctrl(b'S'))),
            FilterVerdict::Handled
        );
        assert_eq!(scope.resolved(), Some(CommandId(3)));
        assert_eq!(cancels.get(), 1);
    }
}
