//! Types shared by the Proxmox VE API client and the resource reconcilers.
//!
//! Everything here is a transient value object built from a JSON API
//! response and dropped at the end of a module run.

pub mod boolean;
pub mod dhcp;
pub mod error;
pub mod managed;
pub mod sdn;

#[cfg(test)]
mod tests;

pub use boolean::{ansible_to_proxmox_bool, proxmox_to_ansible_bool};
pub use dhcp::{DhcpRange, DhcpRangeUpdateMode};
pub use error::{SharedResult, SharedTypeError};
pub use managed::{
    list_from_value, object_from_value, sorted_csv, strip_nulls, wire_string, ManagedObject,
};
pub use sdn::{SdnLockToken, ZoneType, SDN_LOCK_FILE};
