//! DHCP ranges of SDN subnets

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SharedResult, SharedTypeError};

/// An inclusive range of addresses handed out by the SDN DHCP server.
///
/// Module parameters spell the endpoints `start`/`end`, the API uses
/// `start-address`/`end-address`; both are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DhcpRange {
    #[serde(rename = "start-address", alias = "start")]
    pub start: IpAddr,
    #[serde(rename = "end-address", alias = "end")]
    pub end: IpAddr,
}

impl DhcpRange {
    pub fn new(start: IpAddr, end: IpAddr) -> SharedResult<Self> {
        let range = Self { start, end };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> SharedResult<()> {
        if self.start.is_ipv4() != self.end.is_ipv4() {
            return Err(SharedTypeError::InvalidValue {
                field: "dhcp-range",
                value: format!("{self} mixes address families"),
            });
        }

        if self.start > self.end {
            return Err(SharedTypeError::InvalidValue {
                field: "dhcp-range",
                value: format!("{self} starts after it ends"),
            });
        }

        Ok(())
    }

    /// Property string the API expects on write.
    pub fn to_wire(&self) -> String {
        format!("start-address={},end-address={}", self.start, self.end)
    }

    /// Parse a `start-address=..,end-address=..` property string.
    pub fn from_wire(text: &str) -> SharedResult<Self> {
        let mut start = None;
        let mut end = None;

        for part in text.split(',') {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| SharedTypeError::ParseError(format!("malformed range '{text}'")))?;
            let address = parse_address(value.trim())?;
            match key.trim() {
                "start-address" => start = Some(address),
                "end-address" => end = Some(address),
                other => {
                    return Err(SharedTypeError::ParseError(format!(
                        "unknown range key '{other}' in '{text}'"
                    )))
                }
            }
        }

        match (start, end) {
            (Some(start), Some(end)) => Self::new(start, end),
            _ => Err(SharedTypeError::ParseError(format!(
                "range '{text}' needs start-address and end-address"
            ))),
        }
    }

    /// Decode a range from an API response (object or property string).
    pub fn from_value(value: &Value) -> SharedResult<Self> {
        match value {
            Value::String(text) => Self::from_wire(text),
            Value::Object(_) => {
                let range: Self = serde_json::from_value(value.clone())
                    .map_err(|err| SharedTypeError::ParseError(err.to_string()))?;
                range.validate()?;
                Ok(range)
            }
            other => Err(SharedTypeError::UnexpectedShape {
                expected: "dhcp range",
                found: other.to_string(),
            }),
        }
    }

    /// Decode the `dhcp-range` field of a subnet. Missing means no ranges.
    pub fn list_from_value(value: Option<&Value>) -> SharedResult<Vec<Self>> {
        match value {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items.iter().map(Self::from_value).collect(),
            Some(single) => Ok(vec![Self::from_value(single)?]),
        }
    }
}

impl fmt::Display for DhcpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

fn parse_address(text: &str) -> SharedResult<IpAddr> {
    text.parse().map_err(|_| SharedTypeError::InvalidValue {
        field: "dhcp-range",
        value: text.to_string(),
    })
}

/// How requested DHCP ranges are merged with the ranges already configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DhcpRangeUpdateMode {
    /// Add new ranges next to the existing ones.
    #[default]
    Append,
    /// Replace the existing ranges; no ranges at all clears them.
    Overwrite,
}

impl fmt::Display for DhcpRangeUpdateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DhcpRangeUpdateMode::Append => write!(f, "append"),
            DhcpRangeUpdateMode::Overwrite => write!(f, "overwrite"),
        }
    }
}
