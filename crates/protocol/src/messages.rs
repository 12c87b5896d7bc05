//! Request bodies sent to the controller.

use serde::{Deserialize, Serialize};

/// `PATCH /configs` body switching the routing mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeUpdate {
    pub mode: String,
}

/// `PATCH /configs` body toggling TUN mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunUpdate {
    pub tun: TunEnable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunEnable {
    pub enable: bool,
}

/// `PUT /proxies/{group}` body choosing a group member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySelection {
    pub name: String,
}

/// `PUT /configs?force=true` body loading a config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigReload {
    pub path: String,
}

impl TunUpdate {
    pub fn new(enable: bool) -> Self {
        Self {
            tun: TunEnable { enable },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tun_update_shape() {
        let json = serde_json::to_string(&TunUpdate::new(true)).unwrap();
        assert_eq!(json, r#"{"tun":{"enable":true}}"#);
    }

    #[test]
    fn mode_and_selection_shape() {
        let mode = serde_json::to_string(&ModeUpdate {
            mode: "global".into(),
        })
        .unwrap();
        assert_eq!(mode, r#"{"mode":"global"}"#);

        let sel = serde_json::to_string(&ProxySelection {
            name: "HK-01".into(),
        })
        .unwrap();
        assert_eq!(sel, r#"{"name":"HK-01"}"#);
    }

    #[test]
    fn config_reload_shape() {
        let body = serde_json::to_string(&ConfigReload {
            path: r"C:\Users\me\.config\clash\config.yaml".into(),
        })
        .unwrap();
        assert!(body.starts_with(r#"{"path":"C:\\Users"#));
    }
}
