//! Windows desktop integration.
//!
//! The system proxy is the WinINet setting in the current user's registry
//! hive; launches go through `ShellExecuteW`. Notices are queued here and
//! shown by the tray window on the UI thread.

use std::collections::VecDeque;
use std::ffi::c_void;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use windows_sys::Win32::Foundation::{ERROR_FILE_NOT_FOUND, ERROR_SUCCESS, HWND, WIN32_ERROR};
use windows_sys::Win32::Networking::WinInet::{
    INTERNET_OPTION_REFRESH, INTERNET_OPTION_SETTINGS_CHANGED, InternetSetOptionW,
};
use windows_sys::Win32::System::Registry::{
    HKEY, HKEY_CURRENT_USER, KEY_READ, KEY_WRITE, REG_DWORD, REG_SZ, REG_VALUE_TYPE,
    RegCloseKey, RegOpenKeyExW, RegQueryValueExW, RegSetValueExW,
};
use windows_sys::Win32::UI::Shell::ShellExecuteW;
use windows_sys::Win32::UI::WindowsAndMessaging::{PostMessageW, SW_SHOWNORMAL, WM_APP};

use crate::actions::{Desktop, Notice};

/// Posted to the tray window when notices are waiting.
pub const WM_NOTICE: u32 = WM_APP + 2;

const INTERNET_SETTINGS: &str = r"Software\Microsoft\Windows\CurrentVersion\Internet Settings";

/// Hosts that bypass the proxy.
const PROXY_OVERRIDE: &str = "localhost;127.*;10.*;172.16.*;192.168.*;<local>";

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn check(code: WIN32_ERROR) -> io::Result<()> {
    if code == ERROR_SUCCESS {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(code as i32))
    }
}

/// Open registry key, closed on drop.
struct Key(HKEY);

impl Key {
    fn open(access: u32) -> io::Result<Self> {
        let path = wide(INTERNET_SETTINGS);
        let mut key: HKEY = std::ptr::null_mut();
        check(unsafe { RegOpenKeyExW(HKEY_CURRENT_USER, path.as_ptr(), 0, access, &mut key) })?;
        Ok(Self(key))
    }

    fn query(&self, name: &str, kind: REG_VALUE_TYPE) -> io::Result<Option<Vec<u8>>> {
        let name = wide(name);
        let mut ty: REG_VALUE_TYPE = 0;
        let mut len: u32 = 0;
        let code = unsafe {
            RegQueryValueExW(
                self.0,
                name.as_ptr(),
                std::ptr::null(),
                &mut ty,
                std::ptr::null_mut(),
                &mut len,
            )
        };
        if code == ERROR_FILE_NOT_FOUND {
            return Ok(None);
        }
        check(code)?;
        if ty != kind {
            return Ok(None);
        }

        let mut data = vec![0u8; len as usize];
        check(unsafe {
            RegQueryValueExW(
                self.0,
                name.as_ptr(),
                std::ptr::null(),
                &mut ty,
                data.as_mut_ptr(),
                &mut len,
            )
        })?;
        data.truncate(len as usize);
        Ok(Some(data))
    }

    fn dword(&self, name: &str) -> io::Result<Option<u32>> {
        Ok(self.query(name, REG_DWORD)?.and_then(|data| {
            let bytes: [u8; 4] = data.get(..4)?.try_into().ok()?;
            Some(u32::from_le_bytes(bytes))
        }))
    }

    fn string(&self, name: &str) -> io::Result<Option<String>> {
        Ok(self.query(name, REG_SZ)?.map(|data| {
            let units: Vec<u16> = data
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .take_while(|&u| u != 0)
                .collect();
            String::from_utf16_lossy(&units)
        }))
    }

    fn set_dword(&self, name: &str, value: u32) -> io::Result<()> {
        let name = wide(name);
        let bytes = value.to_le_bytes();
        check(unsafe {
            RegSetValueExW(self.0, name.as_ptr(), 0, REG_DWORD, bytes.as_ptr(), 4)
        })
    }

    fn set_string(&self, name: &str, value: &str) -> io::Result<()> {
        let name = wide(name);
        let data = wide(value);
        check(unsafe {
            RegSetValueExW(
                self.0,
                name.as_ptr(),
                0,
                REG_SZ,
                data.as_ptr().cast(),
                (data.len() * 2) as u32,
            )
        })
    }
}

impl Drop for Key {
    fn drop(&mut self) {
        unsafe {
            RegCloseKey(self.0);
        }
    }
}

/// Tells WinINet clients to pick up the new settings.
fn notify_wininet() {
    unsafe {
        InternetSetOptionW(std::ptr::null(), INTERNET_OPTION_SETTINGS_CHANGED, std::ptr::null(), 0);
        InternetSetOptionW(std::ptr::null(), INTERNET_OPTION_REFRESH, std::ptr::null(), 0);
    }
}

/// Proxy server in effect, `None` when the proxy is disabled.
pub fn current() -> io::Result<Option<String>> {
    let key = Key::open(KEY_READ)?;
    if key.dword("ProxyEnable")?.unwrap_or(0) == 0 {
        return Ok(None);
    }
    key.string("ProxyServer")
}

pub fn enable(server: &str) -> io::Result<()> {
    let key = Key::open(KEY_WRITE)?;
    key.set_string("ProxyServer", server)?;
    key.set_string("ProxyOverride", PROXY_OVERRIDE)?;
    key.set_dword("ProxyEnable", 1)?;
    drop(key);
    notify_wininet();
    Ok(())
}

pub fn disable() -> io::Result<()> {
    let key = Key::open(KEY_WRITE)?;
    key.set_dword("ProxyEnable", 0)?;
    drop(key);
    notify_wininet();
    Ok(())
}

fn shell_open(file: &str, params: Option<&str>) -> io::Result<()> {
    let verb = wide("open");
    let file = wide(file);
    let params = params.map(wide);
    let result = unsafe {
        ShellExecuteW(
            std::ptr::null_mut(),
            verb.as_ptr(),
            file.as_ptr(),
            params.as_ref().map_or(std::ptr::null(), |p| p.as_ptr()),
            std::ptr::null(),
            SW_SHOWNORMAL,
        )
    };
    // Values up to 32 are error codes.
    if result as isize <= 32 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Notices waiting for the tray window.
///
/// Filled from action tasks on any thread; the window is woken with
/// [`WM_NOTICE`] and drains the queue on the UI thread.
#[derive(Debug, Default)]
pub struct Notices {
    owner: AtomicPtr<c_void>,
    pending: Mutex<VecDeque<Notice>>,
}

impl Notices {
    /// Starts waking `owner` for new notices, including ones already queued.
    pub fn attach(&self, owner: HWND) {
        self.owner.store(owner, Ordering::Release);
        if !self.is_empty() {
            self.wake();
        }
    }

    pub fn detach(&self) {
        self.owner.store(std::ptr::null_mut(), Ordering::Release);
    }

    fn push(&self, notice: Notice) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(notice);
        self.wake();
    }

    /// Takes every pending notice, oldest first.
    pub fn drain(&self) -> Vec<Notice> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    fn is_empty(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    fn wake(&self) {
        let owner = self.owner.load(Ordering::Acquire);
        if owner.is_null() {
            return;
        }
        if unsafe { PostMessageW(owner, WM_NOTICE, 0, 0) } == 0 {
            tracing::warn!(error = %io::Error::last_os_error(), "failed to post notice");
        }
    }
}

/// Desktop integration through the shell, the registry and tray balloons.
#[derive(Debug, Clone)]
pub struct WindowsDesktop {
    notices: Arc<Notices>,
}

impl WindowsDesktop {
    pub fn new(notices: Arc<Notices>) -> Self {
        Self { notices }
    }
}

impl Desktop for WindowsDesktop {
    fn open(&self, target: &str) -> io::Result<()> {
        shell_open(target, None)
    }

    fn edit(&self, path: &Path) -> io::Result<()> {
        let quoted = format!("\"{}\"", path.display());
        shell_open("notepad.exe", Some(&quoted))
    }

    fn system_proxy(&self) -> Option<String> {
        match current() {
            Ok(server) => server,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read system proxy");
                None
            }
        }
    }

    fn set_system_proxy(&self, server: Option<&str>) -> io::Result<()> {
        match server {
            Some(server) => enable(server),
            None => disable(),
        }
    }

    fn notify(&self, notice: &Notice) {
        tracing::debug!(level = ?notice.level, text = %notice.text, "queueing notice");
        self.notices.push(notice.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_is_nul_terminated() {
        assert_eq!(wide("a"), vec![b'a' as u16, 0]);
    }

    #[test]
    fn notices_queue_until_drained() {
        let notices = Notices::default();
        let desktop = WindowsDesktop::new(Arc::new(Notices::default()));
        desktop.notify(&Notice::error("Failed to set mode: refused"));
        assert_eq!(desktop.notices.drain(), [Notice::error("Failed to set mode: refused")]);

        notices.push(Notice::info("Configuration reloaded"));
        notices.push(Notice::error("Failed to reload configuration"));
        let drained = notices.drain();
        assert_eq!(drained[0], Notice::info("Configuration reloaded"));
        assert_eq!(drained.len(), 2);
        assert!(notices.is_empty());
    }

    #[test]
    fn success_code_is_ok() {
        assert!(check(ERROR_SUCCESS).is_ok());
        assert!(check(ERROR_FILE_NOT_FOUND).is_err());
    }
}
