//! SDN zones

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use pve_api_client::{get_list, segment, ApiParams, ProxmoxApi};
use pve_reconcile_core::{
    differs_from, ApiResultExt, ExecutionMode, FieldKind, FieldSpec, ModuleOutcome,
    ReconcileError, ResourceSchema, Result,
};
use pve_shared_types::{ManagedObject, SdnLockToken, ZoneType};

use crate::transaction::{with_lock_token, SdnTransaction};

const ZONES_PATH: &str = "/cluster/sdn/zones";

const ZONE_ID_PATTERN: &str = r"^[a-z][a-z0-9]*[a-z0-9]$";
const ZONE_ID_MAX_LEN: usize = 8;

const EVPN: &[&str] = &["evpn"];
const VXLAN: &[&str] = &["vxlan"];
const QINQ: &[&str] = &["qinq"];
const BRIDGED: &[&str] = &["vlan", "qinq"];

const ZONE_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("advertise_subnets", "advertise-subnets", FieldKind::Bool)
        .only(EVPN)
        .deletable(),
    FieldSpec::new("bridge", "bridge", FieldKind::Str)
        .only(BRIDGED)
        .required(BRIDGED),
    FieldSpec::new("bridge_disable_mac_learning", "bridge-disable-mac-learning", FieldKind::Bool)
        .only(&["vlan"])
        .deletable(),
    FieldSpec::new("controller", "controller", FieldKind::Str)
        .only(EVPN)
        .required(EVPN),
    FieldSpec::new("dhcp", "dhcp", FieldKind::Str).deletable(),
    FieldSpec::new("disable_arp_nd_suppression", "disable-arp-nd-suppression", FieldKind::Bool)
        .only(EVPN)
        .deletable(),
    FieldSpec::new("dns", "dns", FieldKind::Str).deletable(),
    FieldSpec::new("dnszone", "dnszone", FieldKind::Str).deletable(),
    FieldSpec::new("dp_id", "dp-id", FieldKind::Int).only(&["faucet"]),
    FieldSpec::new("exitnodes", "exitnodes", FieldKind::List)
        .only(EVPN)
        .deletable(),
    FieldSpec::new("exitnodes_local_routing", "exitnodes-local-routing", FieldKind::Bool)
        .only(EVPN)
        .deletable(),
    FieldSpec::new("exitnodes_primary", "exitnodes-primary", FieldKind::Str)
        .only(EVPN)
        .deletable(),
    FieldSpec::new("fabric", "fabric", FieldKind::Str)
        .only(VXLAN)
        .required(VXLAN),
    FieldSpec::new("ipam", "ipam", FieldKind::Str).deletable(),
    FieldSpec::new("mac", "mac", FieldKind::Str).only(EVPN).deletable(),
    FieldSpec::new("mtu", "mtu", FieldKind::Int).deletable(),
    FieldSpec::new("nodes", "nodes", FieldKind::List).deletable(),
    FieldSpec::new("peers", "peers", FieldKind::List).only(VXLAN),
    FieldSpec::new("reversedns", "reversedns", FieldKind::Str).deletable(),
    FieldSpec::new("rt_import", "rt-import", FieldKind::List)
        .only(EVPN)
        .deletable(),
    FieldSpec::new("tag", "tag", FieldKind::Int).only(QINQ).required(QINQ),
    FieldSpec::new("vlan_protocol", "vlan-protocol", FieldKind::Str)
        .only(QINQ)
        .required(QINQ),
    FieldSpec::new("vrf_vxlan", "vrf-vxlan", FieldKind::Int)
        .only(EVPN)
        .required(EVPN),
    FieldSpec::new("vxlan_port", "vxlan-port", FieldKind::Int)
        .only(VXLAN)
        .deletable(),
];

pub const ZONE_SCHEMA: ResourceSchema = ResourceSchema {
    resource: "zone",
    fields: ZONE_FIELDS,
};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneState {
    #[default]
    Present,
    Absent,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneParams {
    #[serde(default)]
    pub state: ZoneState,
    #[serde(default = "default_true")]
    pub update: bool,
    pub zone: String,
    #[serde(default, rename = "type")]
    pub zone_type: Option<ZoneType>,
    #[serde(default)]
    pub lock_token: Option<SdnLockToken>,
    /// Fields to clear on update.
    #[serde(default)]
    pub delete: Option<Vec<String>>,
    /// Type specific fields, see [`ZONE_SCHEMA`].
    #[serde(flatten)]
    pub fields: ManagedObject,
}

pub fn validate_zone_id(zone: &str) -> Result<()> {
    let pattern = Regex::new(ZONE_ID_PATTERN)
        .map_err(|err| ReconcileError::validation(format!("invalid zone id pattern: {err}")))?;

    if zone.len() > ZONE_ID_MAX_LEN || !pattern.is_match(zone) {
        return Err(ReconcileError::validation(format!(
            "invalid zone id '{zone}': use at most {ZONE_ID_MAX_LEN} lowercase letters and digits, starting with a letter"
        )));
    }
    Ok(())
}

pub async fn list_zones(api: &dyn ProxmoxApi) -> Result<Vec<ManagedObject>> {
    get_list(api, ZONES_PATH)
        .await
        .api_context("Failed to retrieve zones")
}

fn find<'z>(zones: &'z [ManagedObject], zone: &str) -> Option<&'z ManagedObject> {
    zones
        .iter()
        .find(|existing| existing.get("zone").and_then(Value::as_str) == Some(zone))
}

pub async fn run(
    api: &dyn ProxmoxApi,
    params: ZoneParams,
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    validate_zone_id(&params.zone)?;

    let outcome = match params.state {
        ZoneState::Present => zone_present(api, &params, mode).await?,
        ZoneState::Absent => zone_absent(api, &params, mode).await?,
    };
    Ok(outcome.with("zone", params.zone.as_str()))
}

async fn zone_present(
    api: &dyn ProxmoxApi,
    params: &ZoneParams,
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    let zone = params.zone.as_str();
    let zone_type = params
        .zone_type
        .ok_or_else(|| ReconcileError::MissingParameters {
            resource: format!("zone {zone}"),
            missing: vec!["type".to_string()],
        })?;

    ZONE_SCHEMA.validate_applicable(zone_type.as_str(), &params.fields)?;
    ZONE_SCHEMA.validate_required(zone_type.as_str(), zone, &params.fields)?;
    let payload = ZONE_SCHEMA.build_payload(zone_type.as_str(), &params.fields)?;

    let zones = list_zones(api).await?;
    let Some(existing) = find(&zones, zone) else {
        return create_zone(api, params, zone_type, payload, mode).await;
    };

    if !params.update {
        return Ok(ModuleOutcome::unchanged(format!(
            "Zone {zone} already exists and update is false"
        )));
    }

    let current_type = existing.get("type").and_then(Value::as_str).unwrap_or_default();
    if current_type != zone_type.as_str() {
        return Err(ReconcileError::validation(format!(
            "Zone {zone} exists with type {current_type}, the type of a zone cannot be changed"
        )));
    }

    let deletions: Vec<&str> = ZONE_SCHEMA
        .deletion_list(zone_type.as_str(), params.delete.as_deref().unwrap_or_default())?
        .into_iter()
        .filter(|field| existing.contains_key(*field))
        .collect();

    if !differs_from(existing, &payload, &["digest"]) && deletions.is_empty() {
        return Ok(ModuleOutcome::unchanged(format!("Zone {zone} is up to date")));
    }

    if mode.is_dry_run() {
        return Ok(ModuleOutcome::changed(format!("Would update zone {zone}")));
    }

    let mut update = payload;
    if let Some(digest) = existing.get("digest") {
        update.insert("digest".to_string(), digest.clone());
    }
    if !deletions.is_empty() {
        update.insert("delete".to_string(), Value::from(deletions.join(",")));
    }

    let path = format!("{}/{}", ZONES_PATH, segment(zone));
    let context = format!("Failed to update zone {zone}");
    SdnTransaction::commit(api, params.lock_token.as_ref(), &context, |token| async move {
        api.put(&path, &with_lock_token(update, &token)).await
    })
    .await?;

    log::info!("Updated zone {}", zone);
    Ok(ModuleOutcome::changed(format!("Updated zone {zone}")))
}

async fn create_zone(
    api: &dyn ProxmoxApi,
    params: &ZoneParams,
    zone_type: ZoneType,
    mut payload: ApiParams,
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    let zone = params.zone.as_str();

    if mode.is_dry_run() {
        return Ok(ModuleOutcome::changed(format!(
            "Would create zone {zone} of type {zone_type}"
        )));
    }

    payload.insert("zone".to_string(), Value::from(zone));
    payload.insert("type".to_string(), Value::from(zone_type.as_str()));

    let context = format!("Failed to create zone {zone}");
    SdnTransaction::commit(api, params.lock_token.as_ref(), &context, |token| async move {
        api.post(ZONES_PATH, &with_lock_token(payload, &token)).await
    })
    .await?;

    log::info!("Created zone {} of type {}", zone, zone_type);
    Ok(ModuleOutcome::changed(format!("Created new zone {zone}")))
}

async fn zone_absent(
    api: &dyn ProxmoxApi,
    params: &ZoneParams,
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    let zone = params.zone.as_str();
    let zones = list_zones(api).await?;

    if find(&zones, zone).is_none() {
        return Ok(ModuleOutcome::unchanged(format!("Zone {zone} is absent")));
    }

    if mode.is_dry_run() {
        return Ok(ModuleOutcome::changed(format!("Would delete zone {zone}")));
    }

    let path = format!("{}/{}", ZONES_PATH, segment(zone));
    let context = format!("Failed to delete zone {zone}");
    SdnTransaction::commit(api, params.lock_token.as_ref(), &context, |token| async move {
        api.delete(&path, &with_lock_token(ApiParams::new(), &token)).await
    })
    .await?;

    log::info!("Deleted zone {}", zone);
    Ok(ModuleOutcome::changed(format!("Deleted zone {zone}")))
}
