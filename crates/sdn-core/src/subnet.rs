//! SDN subnets
//!
//! Subnets are addressed by `{zone}-{network}-{prefix}`. DHCP ranges are
//! merged with the configured ones according to the update mode, the rest
//! of the subnet goes through the list differ.

use std::net::IpAddr;

use ipnet::IpNet;
use serde::Deserialize;
use serde_json::Value;

use pve_api_client::{get_list, get_object, segment, ApiParams, ProxmoxApi};
use pve_reconcile_core::{
    diff, plan_ranges, ApiResultExt, ExecutionMode, ModuleOutcome, RangePlan, ReconcileError,
    Result,
};
use pve_shared_types::{
    ansible_to_proxmox_bool, sorted_csv, DhcpRange, DhcpRangeUpdateMode, ManagedObject,
    SdnLockToken,
};

use crate::transaction::{with_lock_token, SdnTransaction};

/// Compared fields the differ must skip.
const IGNORED_FIELDS: &[&str] = &["digest", "dhcp-range", "lock-token"];

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubnetState {
    #[default]
    Present,
    Absent,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubnetParams {
    #[serde(default)]
    pub state: SubnetState,
    #[serde(default = "default_true")]
    pub update: bool,
    /// Network in CIDR notation.
    pub subnet: String,
    pub vnet: String,
    pub zone: String,
    #[serde(default)]
    pub dhcp_dns_server: Option<IpAddr>,
    #[serde(default)]
    pub dhcp_range_update_mode: DhcpRangeUpdateMode,
    #[serde(default)]
    pub dhcp_range: Option<Vec<DhcpRange>>,
    #[serde(default)]
    pub dnszoneprefix: Option<String>,
    #[serde(default)]
    pub gateway: Option<IpAddr>,
    #[serde(default)]
    pub lock_token: Option<SdnLockToken>,
    #[serde(default)]
    pub snat: bool,
    /// Comma separated fields to clear.
    #[serde(default)]
    pub delete: Option<String>,
}

impl SubnetParams {
    pub fn subnet_id(&self) -> String {
        format!("{}-{}", self.zone, self.subnet.replace('/', "-"))
    }

    /// Check the network, gateway and ranges before touching the cluster.
    pub fn validate(&self) -> Result<IpNet> {
        let network: IpNet = self.subnet.parse().map_err(|_| {
            ReconcileError::validation(format!("invalid subnet '{}', expected CIDR notation", self.subnet))
        })?;

        if network.network() != network.addr() {
            return Err(ReconcileError::validation(format!(
                "subnet {} is not a network address, did you mean {}?",
                self.subnet,
                network.trunc()
            )));
        }

        if let Some(gateway) = self.gateway {
            if !network.contains(&gateway) {
                return Err(ReconcileError::validation(format!(
                    "gateway {gateway} is outside subnet {network}"
                )));
            }
        }

        for range in self.dhcp_range.iter().flatten() {
            range.validate()?;
            if !network.contains(&range.start) || !network.contains(&range.end) {
                return Err(ReconcileError::validation(format!(
                    "DHCP range {range} is outside subnet {network}"
                )));
            }
        }

        Ok(network)
    }

    /// Writable subnet fields shared by create and update.
    fn common_fields(&self) -> ApiParams {
        let mut fields = ApiParams::new();
        if let Some(server) = self.dhcp_dns_server {
            fields.insert("dhcp-dns-server".to_string(), Value::from(server.to_string()));
        }
        if let Some(prefix) = &self.dnszoneprefix {
            fields.insert("dnszoneprefix".to_string(), Value::from(prefix.as_str()));
        }
        if let Some(gateway) = self.gateway {
            fields.insert("gateway".to_string(), Value::from(gateway.to_string()));
        }
        if let Some(snat) = ansible_to_proxmox_bool(Some(self.snat)) {
            fields.insert("snat".to_string(), Value::from(snat));
        }
        fields
    }

    /// The subnet as the API lists it, for the differ.
    fn desired_object(&self, network: &IpNet) -> ManagedObject {
        let id = self.subnet_id();
        let mut object = self.common_fields();
        object.insert("id".to_string(), Value::from(id.as_str()));
        object.insert("subnet".to_string(), Value::from(id));
        object.insert("cidr".to_string(), Value::from(network.to_string()));
        object.insert("network".to_string(), Value::from(network.addr().to_string()));
        object.insert("mask".to_string(), Value::from(network.prefix_len().to_string()));
        object.insert("zone".to_string(), Value::from(self.zone.as_str()));
        object.insert("vnet".to_string(), Value::from(self.vnet.as_str()));
        object.insert("type".to_string(), Value::from("subnet"));
        object
    }
}

fn subnets_path(vnet: &str) -> String {
    format!("/cluster/sdn/vnets/{}/subnets", segment(vnet))
}

fn wire_ranges(ranges: &[DhcpRange]) -> Value {
    Value::from(ranges.iter().map(DhcpRange::to_wire).collect::<Vec<_>>())
}

pub async fn list_subnets(api: &dyn ProxmoxApi, vnet: &str) -> Result<Vec<ManagedObject>> {
    get_list(api, &subnets_path(vnet))
        .await
        .with_api_context(|| format!("Failed to retrieve subnets of vnet {vnet}"))
}

fn find<'s>(subnets: &'s [ManagedObject], id: &str) -> Option<&'s ManagedObject> {
    subnets
        .iter()
        .find(|existing| existing.get("subnet").and_then(Value::as_str) == Some(id))
}

pub async fn run(
    api: &dyn ProxmoxApi,
    params: SubnetParams,
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    let network = params.validate()?;
    let id = params.subnet_id();

    let subnets = list_subnets(api, &params.vnet).await?;
    let existing = find(&subnets, &id);

    let outcome = match (params.state, existing) {
        (SubnetState::Present, None) => create_subnet(api, &params, &id, mode).await?,
        (SubnetState::Present, Some(existing)) => {
            update_subnet(api, &params, &network, &subnets, existing, mode).await?
        }
        (SubnetState::Absent, None) => {
            ModuleOutcome::unchanged(format!("Subnet {id} is already absent"))
        }
        (SubnetState::Absent, Some(_)) => delete_subnet(api, &params, &id, mode).await?,
    };

    Ok(outcome.with("subnet", id))
}

async fn create_subnet(
    api: &dyn ProxmoxApi,
    params: &SubnetParams,
    id: &str,
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    if mode.is_dry_run() {
        return Ok(ModuleOutcome::changed(format!("Would create subnet {id}")));
    }

    let mut payload = params.common_fields();
    payload.insert("subnet".to_string(), Value::from(params.subnet.as_str()));
    payload.insert("type".to_string(), Value::from("subnet"));
    if let Some(ranges) = params.dhcp_range.as_deref().filter(|ranges| !ranges.is_empty()) {
        payload.insert("dhcp-range".to_string(), wire_ranges(ranges));
    }

    let path = subnets_path(&params.vnet);
    let context = format!("Failed to create subnet {id}");
    SdnTransaction::commit(api, params.lock_token.as_ref(), &context, |token| async move {
        api.post(&path, &with_lock_token(payload, &token)).await
    })
    .await?;

    log::info!("Created subnet {} in vnet {}", id, params.vnet);
    Ok(ModuleOutcome::changed(format!("Created new subnet {}", params.subnet)))
}

async fn update_subnet(
    api: &dyn ProxmoxApi,
    params: &SubnetParams,
    network: &IpNet,
    subnets: &[ManagedObject],
    existing: &ManagedObject,
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    let id = params.subnet_id();

    let mut current = subnets.to_vec();
    for subnet in current.iter_mut() {
        subnet.entry("snat".to_string()).or_insert_with(|| Value::from(0));
    }
    let fields_changed = !diff(
        Some(current.as_slice()),
        &[params.desired_object(network)],
        "subnet",
        IGNORED_FIELDS,
    )
    .to_update
    .is_empty();

    let existing_ranges = DhcpRange::list_from_value(existing.get("dhcp-range"))?;
    let (plan, warning) = plan_ranges(
        &existing_ranges,
        params.dhcp_range.as_deref(),
        params.dhcp_range_update_mode,
    )?;

    let mut deletions: Vec<String> = params
        .delete
        .as_deref()
        .map(sorted_csv)
        .filter(|fields| !fields.is_empty())
        .map(|fields| fields.split(',').map(str::to_string).collect())
        .unwrap_or_default();
    if plan == RangePlan::DeleteAll {
        deletions.push("dhcp-range".to_string());
    }

    let outcome = if !fields_changed && plan == RangePlan::Unchanged && deletions.is_empty() {
        ModuleOutcome::unchanged(format!(
            "Subnet {id} is already present with correct parameters"
        ))
    } else if !params.update {
        return Err(ReconcileError::UpdateDisabled {
            resource: format!("Subnet {id}"),
        });
    } else if mode.is_dry_run() {
        ModuleOutcome::changed(format!("Would update subnet {id}"))
    } else {
        apply_update(api, params, &id, plan, deletions).await?
    };

    Ok(outcome.with_warnings(warning))
}

async fn apply_update(
    api: &dyn ProxmoxApi,
    params: &SubnetParams,
    id: &str,
    plan: RangePlan,
    deletions: Vec<String>,
) -> Result<ModuleOutcome> {
    let path = format!("{}/{}", subnets_path(&params.vnet), segment(id));

    let mut transaction = match &params.lock_token {
        Some(token) => SdnTransaction::adopt(api, token.clone()),
        None => SdnTransaction::acquire(api).await?,
    };

    // the digest has to be read under the lock
    let digest = match get_object(api, &path).await {
        Ok(current) => current.get("digest").cloned(),
        Err(err) if err.is_not_found() => {
            if transaction.is_owned() {
                transaction.release_lock(false).await?;
            }
            return Err(ReconcileError::validation(format!(
                "Subnet {id} disappeared while acquiring the SDN lock"
            )));
        }
        Err(err) => {
            let context = format!("Failed to read subnet {id}");
            return Err(transaction.abort(context, err).await.into());
        }
    };

    let mut update = params.common_fields();
    if let Some(digest) = digest {
        update.insert("digest".to_string(), digest);
    }
    if let RangePlan::Replace(ranges) = &plan {
        update.insert("dhcp-range".to_string(), wire_ranges(ranges));
    }
    if !deletions.is_empty() {
        update.insert("delete".to_string(), Value::from(deletions.join(",")));
    }

    let token = transaction.token().clone();
    if let Err(err) = api.put(&path, &with_lock_token(update, &token)).await {
        let context = format!("Failed to update subnet {id}");
        return Err(transaction.abort(context, err).await.into());
    }
    transaction.apply_and_release(true).await?;

    log::info!("Updated subnet {}", id);
    Ok(ModuleOutcome::changed(format!("Updated subnet {id}")))
}

async fn delete_subnet(
    api: &dyn ProxmoxApi,
    params: &SubnetParams,
    id: &str,
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    if mode.is_dry_run() {
        return Ok(ModuleOutcome::changed(format!("Would delete subnet {id}")));
    }

    let path = format!("{}/{}", subnets_path(&params.vnet), segment(id));
    let context = format!("Failed to delete subnet {id}");
    SdnTransaction::commit(api, params.lock_token.as_ref(), &context, |token| async move {
        api.delete(&path, &with_lock_token(ApiParams::new(), &token)).await
    })
    .await?;

    log::info!("Deleted subnet {}", id);
    Ok(ModuleOutcome::changed(format!("Deleted subnet {id}")))
}
