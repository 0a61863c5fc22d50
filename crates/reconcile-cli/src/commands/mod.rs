//! Module dispatch

pub mod cluster;
pub mod sdn;

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::de::DeserializeOwned;
use serde_json::Value;

use pve_api_client::{ApiConfig, HttpProxmoxClient, ProxmoxApi};
use pve_reconcile_core::{ExecutionMode, ModuleOutcome};
use pve_shared_types::ManagedObject;

use crate::args::load_args;

/// Resource modules the runner knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModuleKind {
    Acl,
    HaGroup,
    HaResource,
    HaRule,
    Firewall,
    FirewallInfo,
    Domain,
    DomainInfo,
    Zone,
    ZoneInfo,
    Vnet,
    VnetInfo,
    Subnet,
    /// Pending SDN changes and the SDN lock
    Sdn,
}

impl ModuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleKind::Acl => "acl",
            ModuleKind::HaGroup => "ha-group",
            ModuleKind::HaResource => "ha-resource",
            ModuleKind::HaRule => "ha-rule",
            ModuleKind::Firewall => "firewall",
            ModuleKind::FirewallInfo => "firewall-info",
            ModuleKind::Domain => "domain",
            ModuleKind::DomainInfo => "domain-info",
            ModuleKind::Zone => "zone",
            ModuleKind::ZoneInfo => "zone-info",
            ModuleKind::Vnet => "vnet",
            ModuleKind::VnetInfo => "vnet-info",
            ModuleKind::Subnet => "subnet",
            ModuleKind::Sdn => "sdn",
        }
    }

    pub fn is_sdn(&self) -> bool {
        matches!(
            self,
            ModuleKind::Zone
                | ModuleKind::ZoneInfo
                | ModuleKind::Vnet
                | ModuleKind::VnetInfo
                | ModuleKind::Subnet
                | ModuleKind::Sdn
        )
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decode the module specific parameters.
pub(crate) fn parse_params<T: DeserializeOwned>(kind: ModuleKind, params: &ManagedObject) -> Result<T> {
    serde_json::from_value(Value::Object(params.clone()))
        .with_context(|| format!("Invalid arguments for module {kind}"))
}

/// Run one module against `api`.
pub async fn run_module(
    api: &dyn ProxmoxApi,
    kind: ModuleKind,
    params: &ManagedObject,
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    log::debug!("Running module {} in {} mode", kind, mode);

    if kind.is_sdn() {
        sdn::run(api, kind, params, mode).await
    } else {
        cluster::run(api, kind, params, mode).await
    }
}

/// Load the argument file, connect to the cluster and run the module.
pub async fn execute(kind: ModuleKind, args_file: &Path, check: bool) -> Result<ModuleOutcome> {
    let args = load_args(args_file)?.with_check(check);

    let config = ApiConfig::from_module_args(&args.params)
        .context("Invalid connection settings")?;
    let client = HttpProxmoxClient::connect(&config)
        .await
        .with_context(|| format!("Failed to connect to {}", config.base_url()))?;

    run_module(&client, kind, &args.params, args.mode).await
}
