//! Data model of the engine's HTTP controller API.
//!
//! These are the snapshots the tray consumes (`GET /configs`, `GET /proxies`)
//! and the payloads it sends back. Field names follow the controller's JSON.

pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use messages::{ConfigReload, ModeUpdate, ProxySelection, TunEnable, TunUpdate};
pub use types::{ClashConfig, DelayRecord, LOOPBACK, ProxiesResponse, ProxyNode, TunConfig};
