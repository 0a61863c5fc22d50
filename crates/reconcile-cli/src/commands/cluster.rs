//! Access control, HA, firewall and realm modules

use anyhow::{bail, Result};

use pve_api_client::ProxmoxApi;
use pve_cluster_resources::{acl, domain, firewall, ha_group, ha_resource, ha_rule};
use pve_reconcile_core::{ExecutionMode, ModuleOutcome};
use pve_shared_types::ManagedObject;

use super::{parse_params, ModuleKind};

pub async fn run(
    api: &dyn ProxmoxApi,
    kind: ModuleKind,
    params: &ManagedObject,
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    let outcome = match kind {
        ModuleKind::Acl => acl::run(api, parse_params(kind, params)?, mode).await?,
        ModuleKind::HaGroup => ha_group::run(api, parse_params(kind, params)?, mode).await?,
        ModuleKind::HaResource => ha_resource::run(api, parse_params(kind, params)?, mode).await?,
        ModuleKind::HaRule => ha_rule::run(api, parse_params(kind, params)?, mode).await?,
        ModuleKind::Firewall => firewall::run(api, parse_params(kind, params)?, mode).await?,
        ModuleKind::FirewallInfo => firewall::info(api, parse_params(kind, params)?).await?,
        ModuleKind::Domain => domain::run(api, parse_params(kind, params)?, mode).await?,
        ModuleKind::DomainInfo => domain::info(api, parse_params(kind, params)?).await?,
        other => bail!("{other} is not a cluster module"),
    };
    Ok(outcome)
}
