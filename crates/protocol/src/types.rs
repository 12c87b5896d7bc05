use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Host the engine's local listeners bind to.
pub const LOOPBACK: &str = "127.0.0.1";

/// Engine configuration as reported by `GET /configs`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClashConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socks_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mixed_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tun: Option<TunConfig>,
}

/// The `tun` section of the engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunConfig {
    #[serde(default)]
    pub enable: bool,
}

impl ClashConfig {
    /// Address the OS proxy setting must hold for the engine to be the
    /// system proxy.
    ///
    /// A mixed port wins over a SOCKS port; with neither configured the
    /// engine cannot act as system proxy and `None` is returned.
    pub fn proxy_address(&self) -> Option<String> {
        match (self.mixed_port, self.socks_port) {
            (Some(mixed), _) if mixed > 0 => Some(format!("{LOOPBACK}:{mixed}")),
            (_, Some(socks)) if socks > 0 => Some(format!("socks={LOOPBACK}:{socks}")),
            _ => None,
        }
    }

    /// Whether TUN mode is on. Absent section means off.
    pub fn tun_enabled(&self) -> bool {
        self.tun.as_ref().is_some_and(|t| t.enable)
    }
}

/// Response body of `GET /proxies`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxiesResponse {
    #[serde(default)]
    pub proxies: HashMap<String, ProxyNode>,
}

/// A proxy or proxy group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxyNode {
    #[serde(default)]
    pub name: String,
    /// Kind reported by the engine: `Selector`, `URLTest`, `Shadowsocks`, ...
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Currently active member (groups only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub now: Option<String>,
    /// Ordered member names (groups only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all: Option<Vec<String>>,
    /// Past latency measurements, most recent last.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<DelayRecord>>,
}

impl ProxyNode {
    /// Whether the group's active member is picked by the user.
    pub fn is_selector(&self) -> bool {
        self.kind.eq_ignore_ascii_case("selector")
    }

    /// Most recent recorded latency in milliseconds.
    pub fn latest_delay(&self) -> Option<u32> {
        self.history.as_ref()?.last().map(|r| r.delay)
    }

    /// Active member name, or an empty string.
    pub fn active(&self) -> &str {
        self.now.as_deref().unwrap_or_default()
    }

    /// Member names in engine order; empty for leaf proxies.
    pub fn members(&self) -> &[String] {
        self.all.as_deref().unwrap_or_default()
    }
}

/// One latency measurement. A delay of `0` means the probe timed out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRecord {
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub delay: u32,
}

impl ProxiesResponse {
    /// Looks up a proxy or group by name.
    pub fn get(&self, name: &str) -> Option<&ProxyNode> {
        self.proxies.get(name)
    }

    /// Latest latency of the named proxy, if it has any history.
    pub fn delay_of(&self, name: &str) -> Option<u32> {
        self.get(name).and_then(ProxyNode::latest_delay)
    }
}
