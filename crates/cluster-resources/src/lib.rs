//! Proxmox VE cluster resource reconcilers
//!
//! Access control, high availability, firewall and authentication realms.
//! None of these resources take part in the SDN lock protocol.

pub mod acl;
pub mod domain;
pub mod firewall;
pub mod ha_group;
pub mod ha_resource;
pub mod ha_rule;

#[cfg(test)]
mod tests;

pub use acl::{AclParams, AclState, AclType};
pub use domain::{
    DomainInfoParams, DomainParams, DomainState, RealmType, SyncOptions, SyncScope, DOMAIN_SCHEMA,
};
pub use firewall::{
    FirewallAlias, FirewallEndpoint, FirewallInfoParams, FirewallLevel, FirewallParams,
    FirewallRule, FirewallState, FirewallTarget, IpSet, IpSetEntry,
};
pub use ha_group::{HaGroupParams, HaGroupState};
pub use ha_resource::{HaResourceParams, HaResourceState, HaState};
pub use ha_rule::{Affinity, HaRuleParams, HaRuleState, HaRuleType};
