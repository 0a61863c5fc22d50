//! SDN modules

use anyhow::{bail, Result};

use pve_api_client::ProxmoxApi;
use pve_reconcile_core::{ExecutionMode, ModuleOutcome};
use pve_sdn_core::{changes, info, subnet, vnet, zone};
use pve_shared_types::ManagedObject;

use super::{parse_params, ModuleKind};

pub async fn run(
    api: &dyn ProxmoxApi,
    kind: ModuleKind,
    params: &ManagedObject,
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    let outcome = match kind {
        ModuleKind::Zone => zone::run(api, parse_params(kind, params)?, mode).await?,
        ModuleKind::ZoneInfo => info::zone_info(api, parse_params(kind, params)?).await?,
        ModuleKind::Vnet => vnet::run(api, parse_params(kind, params)?, mode).await?,
        ModuleKind::VnetInfo => info::vnet_info(api, parse_params(kind, params)?).await?,
        ModuleKind::Subnet => subnet::run(api, parse_params(kind, params)?, mode).await?,
        ModuleKind::Sdn => changes::run(api, parse_params(kind, params)?, mode).await?,
        other => bail!("{other} is not an SDN module"),
    };
    Ok(outcome)
}
