//! Connection classification and the network gate.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What kind of connection the host currently has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionClass {
    Unmetered,
    Metered,
    Offline,
}

impl ConnectionClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unmetered => "unmetered",
            Self::Metered => "metered",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for ConnectionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "unmetered" | "wifi" | "ethernet" => Ok(Self::Unmetered),
            "metered" | "cellular" => Ok(Self::Metered),
            "offline" | "none" => Ok(Self::Offline),
            other => Err(format!(
                "invalid connection '{}', expected unmetered/metered/offline",
                other
            )),
        }
    }
}

/// Reports the current connection.
#[async_trait]
pub trait NetworkMonitor: Send + Sync {
    async fn connection(&self) -> ConnectionClass;
}

/// A connection fixed at startup.
#[derive(Debug, Clone, Copy)]
pub struct StaticNetwork(pub ConnectionClass);

#[async_trait]
impl NetworkMonitor for StaticNetwork {
    async fn connection(&self) -> ConnectionClass {
        self.0
    }
}

/// Why a wake skipped fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateReason {
    Disabled,
    Offline,
    Metered,
}

impl fmt::Display for GateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disabled => "disabled",
            Self::Offline => "offline",
            Self::Metered => "metered connection not allowed",
        })
    }
}

/// `None` when the wake may fetch.
pub fn check_gate(
    enabled: bool,
    allow_metered: bool,
    connection: ConnectionClass,
) -> Option<GateReason> {
    if !enabled {
        return Some(GateReason::Disabled);
    }
    match connection {
        ConnectionClass::Offline => Some(GateReason::Offline),
        ConnectionClass::Metered if !allow_metered => Some(GateReason::Metered),
        _ => None,
    }
}
