//! Builds the tray context menu from the current engine state.

use std::path::{Path, PathBuf};

use clashxw_menu::{Chord, ItemState, MenuBackend, MenuNode, MenuTree};
use clashxw_protocol::{ClashConfig, ProxiesResponse, ProxyNode};

use crate::tray::{Dispatch, TrayAction};

/// Routing modes, in menu order, with their shortcut letters.
pub const MODES: [(&str, u8); 3] = [("rule", b'R'), ("direct", b'D'), ("global", b'G')];

/// Mode shown as active when the engine reports none (or an unknown one).
pub const FALLBACK_MODE: &str = "rule";

/// First command identifier of a tray menu.
pub const DEFAULT_START_ID: u32 = 1000;

/// Group whose member list orders the group submenus.
const GLOBAL_GROUP: &str = "GLOBAL";

/// Answers whether the OS proxy setting currently points at `address`.
pub trait SystemProxyProbe {
    fn is_proxy_set_to(&self, address: &str) -> bool;
}

impl<F: Fn(&str) -> bool> SystemProxyProbe for F {
    fn is_proxy_set_to(&self, address: &str) -> bool {
        self(address)
    }
}

/// Probe for hosts without a system proxy setting.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSystemProxy;

impl SystemProxyProbe for NoSystemProxy {
    fn is_proxy_set_to(&self, _address: &str) -> bool {
        false
    }
}

/// Everything the menu shows, captured right before it opens.
#[derive(Debug, Clone, Default)]
pub struct MenuSnapshot {
    /// `GET /configs`, if the engine answered.
    pub config: Option<ClashConfig>,
    /// `GET /proxies`, if the engine answered.
    pub proxies: Option<ProxiesResponse>,
    /// Config files available for switching.
    pub config_files: Vec<PathBuf>,
    /// Config file the engine was started with.
    pub current_config: Option<PathBuf>,
}

fn send(dispatch: &Dispatch, action: TrayAction) -> impl FnOnce() + 'static {
    let dispatch = Dispatch::clone(dispatch);
    move || dispatch(action)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn with_delay(text: String, delay: Option<u32>) -> String {
    match delay {
        Some(ms) => format!("{text}\t{ms}ms"),
        None => text,
    }
}

fn same_path(a: &Path, b: &Path) -> bool {
    a.to_string_lossy()
        .eq_ignore_ascii_case(&b.to_string_lossy())
}

impl MenuSnapshot {
    /// Active mode, lower-cased, or [`FALLBACK_MODE`] if absent or unknown.
    pub fn current_mode(&self) -> &'static str {
        let reported = self.config.as_ref().and_then(|c| c.mode.as_deref());
        reported
            .and_then(|mode| {
                MODES
                    .iter()
                    .map(|(name, _)| *name)
                    .find(|name| name.eq_ignore_ascii_case(mode))
            })
            .unwrap_or(FALLBACK_MODE)
    }

    /// Selector groups in display order, paired with their names.
    ///
    /// If `GLOBAL` lists members, that list is the order and names it
    /// mentions that do not exist are skipped. Otherwise every group is
    /// listed, sorted by name.
    pub fn selector_groups(&self) -> Vec<(&str, &ProxyNode)> {
        let Some(proxies) = &self.proxies else {
            return Vec::new();
        };

        let ordered: Vec<(&str, &ProxyNode)> =
            match proxies.get(GLOBAL_GROUP).and_then(|g| g.all.as_ref()) {
                Some(order) => order
                    .iter()
                    .filter_map(|name| proxies.get(name).map(|node| (name.as_str(), node)))
                    .collect(),
                None => {
                    let mut all: Vec<_> = proxies
                        .proxies
                        .iter()
                        .map(|(name, node)| (name.as_str(), node))
                        .collect();
                    all.sort_by(|a, b| a.0.cmp(b.0));
                    all
                }
            };

        ordered
            .into_iter()
            .filter(|(_, node)| node.is_selector())
            .collect()
    }

    /// Builds the full tray menu on `backend`.
    ///
    /// Nothing here blocks or fails: missing state yields a reduced menu and
    /// native failures drop the affected entries.
    pub fn build_menu<B: MenuBackend>(
        &self,
        backend: B,
        start_id: u32,
        probe: &dyn SystemProxyProbe,
        dispatch: &Dispatch,
    ) -> MenuTree<B> {
        let mut tree = MenuTree::new(backend, start_id);
        let mut root = tree.root();

        self.add_mode_menu(&mut root, dispatch);
        root.add_separator();

        if self.proxies.is_some() {
            for (name, group) in self.selector_groups() {
                self.add_group_menu(&mut root, name, group, dispatch);
            }
            root.add_separator();
        }

        let address = self.config.as_ref().and_then(ClashConfig::proxy_address);
        let proxy_state = match &address {
            Some(addr) => ItemState::checked(probe.is_proxy_set_to(addr)),
            None => ItemState::disabled(),
        };
        root.add_item_with_shortcut(
            "Set System Proxy",
            Chord::ctrl(b'S'),
            proxy_state,
            send(dispatch, TrayAction::SetSystemProxy(!proxy_state.checked)),
        );

        let tun = self.config.as_ref().is_some_and(ClashConfig::tun_enabled);
        root.add_item_with_shortcut(
            "TUN Mode",
            Chord::ctrl(b'E'),
            ItemState::checked(tun),
            send(dispatch, TrayAction::SetTunMode(!tun)),
        );
        root.add_separator();

        root.add_item_with_shortcut(
            "Open Dashboard",
            Chord::ctrl(b'D'),
            ItemState::NORMAL,
            send(dispatch, TrayAction::OpenDashboard),
        );
        root.add_item(
            "Test Latency",
            ItemState::NORMAL,
            send(dispatch, TrayAction::TestAllLatency),
        );

        self.add_config_menu(&mut root, dispatch);
        root.add_separator();

        root.add_item("Exit", ItemState::NORMAL, send(dispatch, TrayAction::Exit));

        tracing::debug!(
            commands = tree.commands().len(),
            shortcuts = tree.shortcuts().len(),
            "tray menu built"
        );
        tree
    }

    fn add_mode_menu<B: MenuBackend>(&self, parent: &mut MenuNode<'_, B>, dispatch: &Dispatch) {
        let current = self.current_mode();
        let mut modes = parent.add_submenu(&format!("Mode ({})", capitalize(current)));
        for (mode, key) in MODES {
            modes.add_item_with_shortcut(
                &capitalize(mode),
                Chord::alt(key),
                ItemState::checked(mode == current),
                send(dispatch, TrayAction::SelectMode(mode.to_string())),
            );
        }
    }

    fn add_group_menu<B: MenuBackend>(
        &self,
        parent: &mut MenuNode<'_, B>,
        name: &str,
        group: &ProxyNode,
        dispatch: &Dispatch,
    ) {
        let active = group.active();
        let header = with_delay(format!("{name} ({active})"), group.latest_delay());
        let mut menu = parent.add_submenu(&header);

        menu.add_item(
            "Test Latency",
            ItemState::NORMAL,
            send(dispatch, TrayAction::TestGroupLatency(name.to_string())),
        );
        menu.add_separator();

        for member in group.members() {
            let delay = self.proxies.as_ref().and_then(|p| p.delay_of(member));
            menu.add_item(
                &with_delay(member.clone(), delay),
                ItemState::checked(member.eq_ignore_ascii_case(active)),
                send(
                    dispatch,
                    TrayAction::SelectProxy {
                        group: name.to_string(),
                        node: member.clone(),
                    },
                ),
            );
        }
    }

    fn add_config_menu<B: MenuBackend>(&self, parent: &mut MenuNode<'_, B>, dispatch: &Dispatch) {
        let mut menu = parent.add_submenu("Configuration");

        for path in &self.config_files {
            let label = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            let current = self
                .current_config
                .as_deref()
                .is_some_and(|c| same_path(c, path));
            menu.add_item(
                &label,
                ItemState::checked(current),
                send(dispatch, TrayAction::SelectConfig(path.clone())),
            );
        }
        menu.add_separator();

        menu.add_item_with_shortcut(
            "Reload Config",
            Chord::ctrl(b'R'),
            ItemState::NORMAL,
            send(dispatch, TrayAction::ReloadConfig),
        );
        menu.add_item(
            "Edit Config",
            ItemState::NORMAL,
            send(dispatch, TrayAction::EditConfig),
        );
        menu.add_item_with_shortcut(
            "Open Config Folder",
            Chord::ctrl(b'O'),
            ItemState::NORMAL,
            send(dispatch, TrayAction::OpenConfigFolder),
        );
    }
}
