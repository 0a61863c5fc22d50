//! Boolean conversion between module parameters and the Proxmox wire format
//!
//! Proxmox encodes booleans as the integers `0` and `1`. These two
//! functions are the only place where that convention is normalized.

use serde_json::Value;

/// `true` -> `1`, `false` -> `0`, unset stays unset.
pub fn ansible_to_proxmox_bool(value: Option<bool>) -> Option<u8> {
    value.map(u8::from)
}

/// `1` -> `true`, anything else -> `false`.
///
/// Integers other than `1` (including `2` or `-1`) map to `false`, as do
/// strings and nulls. A JSON boolean is taken at face value.
pub fn proxmox_to_ansible_bool(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_i64() == Some(1),
        _ => false,
    }
}
