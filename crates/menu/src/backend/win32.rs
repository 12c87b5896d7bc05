//! user32 popup menus and the `WH_MSGFILTER` shortcut hook.

use std::cell::Cell;

use windows_sys::Win32::Foundation::{HWND, LPARAM, LRESULT, POINT, WPARAM};
use windows_sys::Win32::System::Threading::GetCurrentThreadId;
use windows_sys::Win32::UI::Input::KeyboardAndMouse::{GetKeyState, VK_CONTROL, VK_MENU};
use windows_sys::Win32::UI::WindowsAndMessaging::{
    AppendMenuW, CallNextHookEx, CreatePopupMenu, DestroyMenu, GetCursorPos, HHOOK, HMENU,
    MF_CHECKED, MF_GRAYED, MF_POPUP, MF_SEPARATOR, MF_STRING, MSG, MSGF_MENU, PostMessageW,
    SendMessageW, SetForegroundWindow, SetWindowsHookExW, TPM_BOTTOMALIGN, TPM_NONOTIFY,
    TPM_RETURNCMD, TPM_RIGHTBUTTON, TrackPopupMenuEx, UnhookWindowsHookEx, WH_MSGFILTER,
    WM_CANCELMODE, WM_KEYDOWN, WM_NULL, WM_SYSKEYDOWN,
};

use super::{ItemState, MenuBackend, Point};
use crate::error::MenuError;
use crate::interceptor::{FilterEvent, FilterVerdict, filter_event};
use crate::registry::{Chord, CommandId, VirtualKey};

thread_local! {
    // Handle passed on to CallNextHookEx by the filter procedure.
    static FILTER_HOOK: Cell<HHOOK> = const { Cell::new(std::ptr::null_mut()) };
}

/// Native popup menus through user32.
#[derive(Debug, Clone, Copy, Default)]
pub struct Win32Backend;

impl Win32Backend {
    pub fn new() -> Self {
        Self
    }
}

/// `MF_*` flags for a regular item.
pub(crate) fn item_flags(state: ItemState) -> u32 {
    let mut flags = MF_STRING;
    if state.checked {
        flags |= MF_CHECKED;
    }
    if !state.enabled {
        flags |= MF_GRAYED;
    }
    flags
}

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn key_down(vk: u16) -> bool {
    // High bit set (negative) means the key is down.
    unsafe { GetKeyState(vk as i32) < 0 }
}

unsafe extern "system" fn message_filter_proc(code: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    if code == MSGF_MENU as i32 && lparam != 0 {
        let msg = unsafe { &*(lparam as *const MSG) };
        if msg.message == WM_KEYDOWN || msg.message == WM_SYSKEYDOWN {
            let chord = Chord::new(
                VirtualKey(msg.wParam as u16),
                key_down(VK_CONTROL),
                key_down(VK_MENU),
            );
            if filter_event(FilterEvent::KeyDown(chord)) == FilterVerdict::Handled {
                return 1;
            }
        }
    }
    let hook = FILTER_HOOK.try_with(Cell::get).unwrap_or(std::ptr::null_mut());
    unsafe { CallNextHookEx(hook, code, wparam, lparam) }
}

impl MenuBackend for Win32Backend {
    type Menu = HMENU;
    type Window = HWND;
    type Hook = HHOOK;

    // TrackPopupMenuEx returns the command through a BOOL.
    const MAX_COMMAND_ID: u32 = i32::MAX as u32;

    fn create_popup(&self) -> Result<HMENU, MenuError> {
        let menu = unsafe { CreatePopupMenu() };
        if menu.is_null() {
            return Err(MenuError::last_os_error("CreatePopupMenu"));
        }
        Ok(menu)
    }

    fn append_item(
        &self,
        menu: HMENU,
        id: CommandId,
        label: &str,
        state: ItemState,
    ) -> Result<(), MenuError> {
        let text = wide(label);
        let ok = unsafe { AppendMenuW(menu, item_flags(state), id.0 as usize, text.as_ptr()) };
        if ok == 0 {
            return Err(MenuError::last_os_error("AppendMenuW"));
        }
        Ok(())
    }

    fn append_separator(&self, menu: HMENU) -> Result<(), MenuError> {
        let ok = unsafe { AppendMenuW(menu, MF_SEPARATOR, 0, std::ptr::null()) };
        if ok == 0 {
            return Err(MenuError::last_os_error("AppendMenuW"));
        }
        Ok(())
    }

    fn append_submenu(&self, menu: HMENU, submenu: HMENU, label: &str) -> Result<(), MenuError> {
        let text = wide(label);
        let ok =
            unsafe { AppendMenuW(menu, MF_STRING | MF_POPUP, submenu as usize, text.as_ptr()) };
        if ok == 0 {
            return Err(MenuError::last_os_error("AppendMenuW"));
        }
        Ok(())
    }

    fn destroy(&self, menu: HMENU) -> Result<(), MenuError> {
        if unsafe { DestroyMenu(menu) } == 0 {
            return Err(MenuError::last_os_error("DestroyMenu"));
        }
        Ok(())
    }

    fn cursor_position(&self) -> Point {
        let mut pt = POINT { x: 0, y: 0 };
        if unsafe { GetCursorPos(&mut pt) } == 0 {
            tracing::warn!(error = %std::io::Error::last_os_error(), "GetCursorPos failed");
        }
        Point { x: pt.x, y: pt.y }
    }

    fn set_foreground(&self, owner: HWND) {
        if unsafe { SetForegroundWindow(owner) } == 0 {
            tracing::debug!("SetForegroundWindow refused");
        }
    }

    fn install_filter(&self) -> Result<HHOOK, MenuError> {
        let hook = unsafe {
            SetWindowsHookExW(
                WH_MSGFILTER,
                Some(message_filter_proc),
                std::ptr::null_mut(),
                GetCurrentThreadId(),
            )
        };
        if hook.is_null() {
            return Err(MenuError::last_os_error("SetWindowsHookExW"));
        }
        FILTER_HOOK.with(|h| h.set(hook));
        Ok(hook)
    }

    fn remove_filter(&self, hook: HHOOK) {
        if unsafe { UnhookWindowsHookEx(hook) } == 0 {
            tracing::warn!(
                error = %std::io::Error::last_os_error(),
                "UnhookWindowsHookEx failed"
            );
        }
        FILTER_HOOK.with(|h| h.set(std::ptr::null_mut()));
    }

    fn track_popup(&self, menu: HMENU, at: Point, owner: HWND) -> u32 {
        let flags = TPM_RETURNCMD | TPM_NONOTIFY | TPM_RIGHTBUTTON | TPM_BOTTOMALIGN;
        let cmd = unsafe { TrackPopupMenuEx(menu, flags, at.x, at.y, owner, std::ptr::null()) };
        u32::try_from(cmd).unwrap_or(0)
    }

    fn post_null(&self, owner: HWND) {
        unsafe {
            PostMessageW(owner, WM_NULL, 0, 0);
        }
    }

    fn cancel_mode(&self, owner: HWND) {
        unsafe {
            SendMessageW(owner, WM_CANCELMODE, 0, 0);
        }
    }
}
