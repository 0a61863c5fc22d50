//! SDN virtual networks

use serde::Deserialize;
use serde_json::Value;

use pve_api_client::{get_list, segment, ApiParams, ProxmoxApi};
use pve_reconcile_core::{
    differs_from, ApiResultExt, ExecutionMode, ModuleOutcome, ReconcileError, Result,
};
use pve_shared_types::{ansible_to_proxmox_bool, sorted_csv, ManagedObject, SdnLockToken};

use crate::transaction::{with_lock_token, SdnTransaction};

const VNETS_PATH: &str = "/cluster/sdn/vnets";

/// Flags the API leaves out of a vnet when they are off.
const FLAG_FIELDS: &[&str] = &["isolate-ports", "vlanaware"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VnetState {
    #[default]
    Present,
    /// Update in place, create when missing.
    Update,
    Absent,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VnetParams {
    #[serde(default)]
    pub state: VnetState,
    /// Let `present` update an existing vnet.
    #[serde(default)]
    pub force: bool,
    pub vnet: String,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub isolate_ports: bool,
    #[serde(default)]
    pub tag: Option<u32>,
    #[serde(default, rename = "type")]
    pub vnet_type: Option<String>,
    #[serde(default)]
    pub vlanaware: Option<bool>,
    #[serde(default)]
    pub lock_token: Option<SdnLockToken>,
    /// Comma separated fields to clear.
    #[serde(default)]
    pub delete: Option<String>,
}

impl VnetParams {
    /// Vnet fields to write, without the identifier and type.
    fn payload(&self) -> ApiParams {
        let mut payload = ApiParams::new();
        let mut set = |key: &str, value: Option<Value>| {
            if let Some(value) = value {
                payload.insert(key.to_string(), value);
            }
        };

        set("zone", self.zone.clone().map(Value::from));
        set("alias", self.alias.clone().map(Value::from));
        set(
            "isolate-ports",
            ansible_to_proxmox_bool(Some(self.isolate_ports)).map(Value::from),
        );
        set("tag", self.tag.map(Value::from));
        set(
            "vlanaware",
            ansible_to_proxmox_bool(self.vlanaware).map(Value::from),
        );
        payload
    }

    fn deletions(&self) -> Option<String> {
        self.delete
            .as_deref()
            .map(sorted_csv)
            .filter(|fields| !fields.is_empty())
    }
}

pub async fn list_vnets(api: &dyn ProxmoxApi) -> Result<Vec<ManagedObject>> {
    get_list(api, VNETS_PATH)
        .await
        .api_context("Failed to retrieve vnet information from cluster")
}

fn find<'v>(vnets: &'v [ManagedObject], vnet: &str) -> Option<&'v ManagedObject> {
    vnets
        .iter()
        .find(|existing| existing.get("vnet").and_then(Value::as_str) == Some(vnet))
}

/// Existing vnet with absent flags spelled out as `0`.
fn with_flag_defaults(existing: &ManagedObject) -> ManagedObject {
    let mut existing = existing.clone();
    for flag in FLAG_FIELDS {
        existing
            .entry(flag.to_string())
            .or_insert_with(|| Value::from(0));
    }
    existing
}

pub async fn run(
    api: &dyn ProxmoxApi,
    params: VnetParams,
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    let vnets = list_vnets(api).await?;
    let existing = find(&vnets, &params.vnet);

    let outcome = match (params.state, existing) {
        (VnetState::Present, Some(existing)) if params.force => {
            update_vnet(api, &params, existing, mode).await?
        }
        (VnetState::Present, Some(_)) => {
            return Err(ReconcileError::validation(format!(
                "vnet {} already exists and force is false",
                params.vnet
            )))
        }
        (VnetState::Present | VnetState::Update, None) => create_vnet(api, &params, mode).await?,
        (VnetState::Update, Some(existing)) => update_vnet(api, &params, existing, mode).await?,
        (VnetState::Absent, None) => {
            ModuleOutcome::unchanged(format!("vnet {} is absent", params.vnet))
        }
        (VnetState::Absent, Some(_)) => delete_vnet(api, &params, mode).await?,
    };

    Ok(outcome.with("vnet", params.vnet.as_str()))
}

async fn create_vnet(
    api: &dyn ProxmoxApi,
    params: &VnetParams,
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    let vnet = params.vnet.as_str();
    if params.zone.is_none() {
        return Err(ReconcileError::MissingParameters {
            resource: format!("vnet {vnet}"),
            missing: vec!["zone".to_string()],
        });
    }

    if mode.is_dry_run() {
        return Ok(ModuleOutcome::changed(format!("Would create vnet {vnet}")));
    }

    let mut payload = params.payload();
    payload.insert("vnet".to_string(), Value::from(vnet));
    if let Some(vnet_type) = &params.vnet_type {
        payload.insert("type".to_string(), Value::from(vnet_type.as_str()));
    }

    let context = format!("Failed to create vnet {vnet}");
    SdnTransaction::commit(api, params.lock_token.as_ref(), &context, |token| async move {
        api.post(VNETS_PATH, &with_lock_token(payload, &token)).await
    })
    .await?;

    log::info!("Created vnet {}", vnet);
    Ok(ModuleOutcome::changed(format!("Created new vnet {vnet}")))
}

async fn update_vnet(
    api: &dyn ProxmoxApi,
    params: &VnetParams,
    existing: &ManagedObject,
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    let vnet = params.vnet.as_str();
    let payload = params.payload();
    let deletions = params.deletions();

    if !differs_from(&with_flag_defaults(existing), &payload, &["digest"]) && deletions.is_none() {
        return Ok(ModuleOutcome::unchanged(format!("vnet {vnet} is up to date")));
    }

    if mode.is_dry_run() {
        return Ok(ModuleOutcome::changed(format!("Would update vnet {vnet}")));
    }

    let mut update = payload;
    if let Some(digest) = existing.get("digest") {
        update.insert("digest".to_string(), digest.clone());
    }
    if let Some(deletions) = deletions {
        update.insert("delete".to_string(), Value::from(deletions));
    }

    let path = format!("{}/{}", VNETS_PATH, segment(vnet));
    let context = format!("Failed to update vnet {vnet}");
    SdnTransaction::commit(api, params.lock_token.as_ref(), &context, |token| async move {
        api.put(&path, &with_lock_token(update, &token)).await
    })
    .await?;

    log::info!("Updated vnet {}", vnet);
    Ok(ModuleOutcome::changed(format!("Updated vnet {vnet}")))
}

async fn delete_vnet(
    api: &dyn ProxmoxApi,
    params: &VnetParams,
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    let vnet = params.vnet.as_str();

    if mode.is_dry_run() {
        return Ok(ModuleOutcome::changed(format!("Would delete vnet {vnet}")));
    }

    let path = format!("{}/{}", VNETS_PATH, segment(vnet));
    let context = format!("Failed to delete vnet {vnet}");
    SdnTransaction::commit(api, params.lock_token.as_ref(), &context, |token| async move {
        api.delete(&path, &with_lock_token(ApiParams::new(), &token)).await
    })
    .await?;

    log::info!("Deleted vnet {}", vnet);
    Ok(ModuleOutcome::changed(format!("Deleted vnet {vnet}")))
}
