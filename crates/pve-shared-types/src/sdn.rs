use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SharedTypeError;

/// Lock file on the cluster filesystem backing the global SDN lock.
/// Deleting it by hand is the last resort when a lock cannot be released.
pub const SDN_LOCK_FILE: &str = "/etc/pve/sdn/.lock";

/// Opaque token returned by `POST /cluster/sdn/lock`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SdnLockToken(String);

impl SdnLockToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SdnLockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ZoneType {
    Evpn,
    Faucet,
    #[serde(rename = "qinq")]
    QinQ,
    Simple,
    Vlan,
    Vxlan,
}

impl ZoneType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneType::Evpn => "evpn",
            ZoneType::Faucet => "faucet",
            ZoneType::QinQ => "qinq",
            ZoneType::Simple => "simple",
            ZoneType::Vlan => "vlan",
            ZoneType::Vxlan => "vxlan",
        }
    }
}

impl fmt::Display for ZoneType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ZoneType {
    type Err = SharedTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "evpn" => Ok(ZoneType::Evpn),
            "faucet" => Ok(ZoneType::Faucet),
            "qinq" => Ok(ZoneType::QinQ),
            "simple" => Ok(ZoneType::Simple),
            "vlan" => Ok(ZoneType::Vlan),
            "vxlan" => Ok(ZoneType::Vxlan),
            _ => Err(SharedTypeError::Unsupported(format!("zone type '{s}'"))),
        }
    }
}
