//! Proxmox VE SDN reconcilers
//!
//! Zones, vnets and subnets under `/cluster/sdn`. Every write goes through
//! [`SdnTransaction`]; reads and the [`info`] views never take the lock.

pub mod changes;
pub mod info;
pub mod subnet;
pub mod transaction;
pub mod vnet;
pub mod zone;


pub use changes::{ChangesParams, ChangesState};
pub use info::{VnetInfoParams, ZoneInfoParams};
pub use subnet::{SubnetParams, SubnetState};
pub use transaction::{with_lock_token, LockState, SdnTransaction};
pub use vnet::{VnetParams, VnetState};
pub use zone::{validate_zone_id, ZoneParams, ZoneState, ZONE_SCHEMA};
