//! Tray host: a message-only window owning the notification icon.
//!
//! Everything here runs on the main thread, which pumps the window's
//! messages. A click on the icon refreshes the engine state, builds the menu
//! and shows it; the chosen action is then handed to the tokio runtime.
//! Notices the actions leave behind come back as balloons on the icon.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use clashxw_menu::{MenuError, Win32Backend};
use clashxw_tray::{Dispatch, TrayAction, TrayConfig};
use tokio::runtime::Handle;
use windows_sys::Win32::Foundation::{HWND, LPARAM, LRESULT, WPARAM};
use windows_sys::Win32::System::LibraryLoader::GetModuleHandleW;
use windows_sys::Win32::UI::Shell::{
    NIF_ICON, NIF_INFO, NIF_MESSAGE, NIF_TIP, NIIF_ERROR, NIIF_INFO, NIM_ADD, NIM_DELETE,
    NIM_MODIFY, NOTIFYICONDATAW, Shell_NotifyIconW,
};
use windows_sys::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, GetMessageW, HWND_MESSAGE,
    IDI_APPLICATION, LoadIconW, MSG, PostQuitMessage, RegisterClassExW, TranslateMessage, WM_APP,
    WM_LBUTTONUP, WM_RBUTTONUP, WNDCLASSEXW,
};

use crate::actions::{self, Context, Notice, NoticeLevel};
use crate::desktop::{Notices, WM_NOTICE};

/// Callback message of the notification icon.
const WM_TRAY: u32 = WM_APP + 1;
const TRAY_ICON_ID: u32 = 1;
const CLASS_NAME: &str = "ClashXWTrayHost";

thread_local! {
    static HOST: RefCell<Option<Rc<Host>>> = const { RefCell::new(None) };
}

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Copies `s` into a fixed UTF-16 field, truncating and keeping the NUL.
fn fill(field: &mut [u16], s: &str) {
    let units: Vec<u16> = s.encode_utf16().collect();
    let len = units.len().min(field.len().saturating_sub(1));
    field[..len].copy_from_slice(&units[..len]);
    if let Some(end) = field.get_mut(len) {
        *end = 0;
    }
}

struct Host {
    runtime: Handle,
    ctx: Arc<Context>,
    notices: Arc<Notices>,
    menu_start_id: u32,
    refresh_timeout: Duration,
}

impl Host {
    fn on_click(&self, hwnd: HWND) {
        let refreshed = self.runtime.block_on(async {
            tokio::time::timeout(self.refresh_timeout, self.ctx.client.snapshot()).await
        });
        let state = match refreshed {
            Ok(state) => {
                self.ctx.store(state.clone());
                state
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.refresh_timeout.as_millis() as u64,
                    "engine state refresh timed out, using cached state"
                );
                self.ctx.cached()
            }
        };

        let snapshot = self.ctx.menu_snapshot(state);
        let ctx = Arc::clone(&self.ctx);
        let probe = move |address: &str| ctx.is_system_proxy(address);
        let tree = snapshot.build_menu(
            Win32Backend::new(),
            self.menu_start_id,
            &probe,
            &self.dispatch(),
        );

        match tree.run(hwnd) {
            Ok(selection) => tracing::debug!(?selection, "tray menu closed"),
            Err(MenuError::ShowInProgress) => tracing::debug!("tray menu already open"),
            Err(e) => tracing::warn!(error = %e, "tray menu failed"),
        }
    }

    fn dispatch(&self) -> Dispatch {
        let runtime = self.runtime.clone();
        let ctx = Arc::clone(&self.ctx);
        Rc::new(move |action| {
            if action == TrayAction::Exit {
                ctx.release_system_proxy();
                unsafe { PostQuitMessage(0) };
                return;
            }
            let ctx = Arc::clone(&ctx);
            runtime.spawn(async move { actions::perform(&ctx, action).await });
        })
    }

    fn show_notices(&self, hwnd: HWND) {
        for notice in self.notices.drain() {
            show_balloon(hwnd, &notice);
        }
    }
}

fn show_balloon(hwnd: HWND, notice: &Notice) {
    let mut data: NOTIFYICONDATAW = unsafe { std::mem::zeroed() };
    data.cbSize = std::mem::size_of::<NOTIFYICONDATAW>() as u32;
    data.hWnd = hwnd;
    data.uID = TRAY_ICON_ID;
    data.uFlags = NIF_INFO;
    data.dwInfoFlags = match notice.level {
        NoticeLevel::Info => NIIF_INFO,
        NoticeLevel::Error => NIIF_ERROR,
    };
    fill(&mut data.szInfoTitle, notice.level.title());
    fill(&mut data.szInfo, &notice.text);

    if unsafe { Shell_NotifyIconW(NIM_MODIFY, &data) } == 0 {
        tracing::warn!(text = %notice.text, "failed to show balloon");
    }
}

unsafe extern "system" fn window_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    if msg == WM_TRAY {
        let event = (lparam & 0xFFFF) as u32;
        if event == WM_LBUTTONUP || event == WM_RBUTTONUP {
            // Cloned out so the slot is not borrowed while the menu pumps.
            let host = HOST.try_with(|h| h.borrow().clone()).ok().flatten();
            if let Some(host) = host {
                host.on_click(hwnd);
            }
        }
        return 0;
    }
    if msg == WM_NOTICE {
        let host = HOST.try_with(|h| h.borrow().clone()).ok().flatten();
        if let Some(host) = host {
            host.show_notices(hwnd);
        }
        return 0;
    }
    unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) }
}

fn create_window() -> anyhow::Result<HWND> {
    let class_name = wide(CLASS_NAME);
    let instance = unsafe { GetModuleHandleW(std::ptr::null()) };

    let mut class: WNDCLASSEXW = unsafe { std::mem::zeroed() };
    class.cbSize = std::mem::size_of::<WNDCLASSEXW>() as u32;
    class.lpfnWndProc = Some(window_proc);
    class.hInstance = instance;
    class.lpszClassName = class_name.as_ptr();
    if unsafe { RegisterClassExW(&class) } == 0 {
        bail!("RegisterClassExW failed: {}", std::io::Error::last_os_error());
    }

    let title = wide("ClashXW");
    let hwnd = unsafe {
        CreateWindowExW(
            0,
            class_name.as_ptr(),
            title.as_ptr(),
            0,
            0,
            0,
            0,
            0,
            HWND_MESSAGE,
            std::ptr::null_mut(),
            instance,
            std::ptr::null(),
        )
    };
    if hwnd.is_null() {
        bail!("CreateWindowExW failed: {}", std::io::Error::last_os_error());
    }
    Ok(hwnd)
}

/// Notification area icon, removed on drop.
struct NotifyIcon {
    data: NOTIFYICONDATAW,
}

impl NotifyIcon {
    fn add(hwnd: HWND, tooltip: &str) -> anyhow::Result<Self> {
        let mut data: NOTIFYICONDATAW = unsafe { std::mem::zeroed() };
        data.cbSize = std::mem::size_of::<NOTIFYICONDATAW>() as u32;
        data.hWnd = hwnd;
        data.uID = TRAY_ICON_ID;
        data.uFlags = NIF_MESSAGE | NIF_ICON | NIF_TIP;
        data.uCallbackMessage = WM_TRAY;
        data.hIcon = unsafe { LoadIconW(std::ptr::null_mut(), IDI_APPLICATION) };
        fill(&mut data.szTip, tooltip);

        if unsafe { Shell_NotifyIconW(NIM_ADD, &data) } == 0 {
            bail!("Shell_NotifyIconW failed: {}", std::io::Error::last_os_error());
        }
        Ok(Self { data })
    }
}

impl Drop for NotifyIcon {
    fn drop(&mut self) {
        if unsafe { Shell_NotifyIconW(NIM_DELETE, &self.data) } == 0 {
            tracing::warn!("failed to remove tray icon");
        }
    }
}

/// Runs the tray until the user picks Exit.
pub fn run(
    runtime: Handle,
    ctx: Arc<Context>,
    config: TrayConfig,
    notices: Arc<Notices>,
) -> anyhow::Result<()> {
    let hwnd = create_window()?;
    let ctx_settings = ctx.settings_path().to_path_buf();
    let refresh_timeout = Duration::from_millis(ctx.settings().refresh_timeout_ms);

    HOST.with(|h| {
        *h.borrow_mut() = Some(Rc::new(Host {
            runtime,
            ctx,
            notices: Arc::clone(&notices),
            menu_start_id: config.menu_start_id,
            refresh_timeout,
        }))
    });
    let icon = NotifyIcon::add(hwnd, &config.tooltip)?;
    notices.attach(hwnd);
    tracing::info!(settings = %ctx_settings.display(), "tray icon ready");

    let mut msg: MSG = unsafe { std::mem::zeroed() };
    loop {
        let ret = unsafe { GetMessageW(&mut msg, std::ptr::null_mut(), 0, 0) };
        if ret == 0 {
            break;
        }
        if ret == -1 {
            tracing::error!(error = %std::io::Error::last_os_error(), "GetMessageW failed");
            break;
        }
        unsafe {
            TranslateMessage(&msg);
            DispatchMessageW(&msg);
        }
    }

    notices.detach();
    drop(icon);
    HOST.with(|h| h.borrow_mut().take());
    unsafe {
        DestroyWindow(hwnd);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_truncates_and_terminates() {
        let mut field = [0xFFFFu16; 4];
        fill(&mut field, "abcdef");
        assert_eq!(field, [b'a' as u16, b'b' as u16, b'c' as u16, 0]);

        fill(&mut field, "x");
        assert_eq!(field[..2], [b'x' as u16, 0]);
    }
}
