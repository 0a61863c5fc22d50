//! Read-only SDN views. Nothing here takes the SDN lock.

use serde::Deserialize;
use serde_json::Value;

use pve_api_client::{get_list, segment, ApiParams, ProxmoxApi};
use pve_reconcile_core::{ApiResultExt, ModuleOutcome, Result};
use pve_shared_types::{list_from_value, ManagedObject, ZoneType};

use crate::subnet::list_subnets;
use crate::vnet::list_vnets;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ZoneInfoParams {
    #[serde(default, rename = "type")]
    pub zone_type: Option<ZoneType>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VnetInfoParams {
    #[serde(default)]
    pub vnet: Option<String>,
}

fn objects(items: Vec<ManagedObject>) -> Value {
    Value::Array(items.into_iter().map(Value::Object).collect())
}

pub async fn zone_info(api: &dyn ProxmoxApi, params: ZoneInfoParams) -> Result<ModuleOutcome> {
    let mut query = ApiParams::new();
    if let Some(zone_type) = params.zone_type {
        query.insert("type".to_string(), Value::from(zone_type.as_str()));
    }

    let data = api
        .get("/cluster/sdn/zones", &query)
        .await
        .api_context("Failed to retrieve zone information from cluster")?;
    let zones = list_from_value(data)?;

    Ok(ModuleOutcome::unchanged("Successfully retrieved zone info.").with("zones", objects(zones)))
}

/// Vnets with their subnets and firewall rules attached.
pub async fn vnet_info(api: &dyn ProxmoxApi, params: VnetInfoParams) -> Result<ModuleOutcome> {
    let mut vnets = list_vnets(api).await?;
    if let Some(wanted) = params.vnet.as_deref() {
        vnets.retain(|vnet| vnet.get("vnet").and_then(Value::as_str) == Some(wanted));
    }

    for vnet in &mut vnets {
        let name = vnet.get("vnet").and_then(Value::as_str).unwrap_or_default().to_string();

        let subnets = list_subnets(api, &name).await?;
        let rules = get_list(api, &format!("/cluster/sdn/vnets/{}/firewall/rules", segment(&name)))
            .await
            .with_api_context(|| format!("Failed to retrieve firewall rules of vnet {name}"))?;

        vnet.insert("subnets".to_string(), objects(subnets));
        vnet.insert("firewall_rules".to_string(), objects(rules));
    }

    Ok(ModuleOutcome::unchanged("Successfully retrieved vnet info").with("vnets", objects(vnets)))
}
