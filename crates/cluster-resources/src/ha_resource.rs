//! HA resources (`/cluster/ha/resources`)
//!
//! A resource is a guest under HA management, identified by its service
//! id (`vm:100`, `ct:200`).

use serde::Deserialize;
use serde_json::Value;

use pve_api_client::{get_list, segment, ApiParams, ProxmoxApi};
use pve_reconcile_core::{diff, ApiResultExt, ExecutionMode, ModuleOutcome, Result};
use pve_shared_types::ManagedObject;

const RESOURCES_PATH: &str = "/cluster/ha/resources";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HaResourceState {
    Present,
    Absent,
}

/// Requested state of the guest under HA.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HaState {
    #[default]
    Started,
    Stopped,
    Disabled,
    Ignored,
}

impl HaState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HaState::Started => "started",
            HaState::Stopped => "stopped",
            HaState::Disabled => "disabled",
            HaState::Ignored => "ignored",
        }
    }
}

fn default_attempts() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct HaResourceParams {
    pub state: HaResourceState,
    /// Service id, e.g. `vm:100`.
    pub name: String,
    #[serde(default)]
    pub comment: String,
    /// HA group; left alone when not given.
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default = "default_attempts")]
    pub max_relocate: u32,
    #[serde(default = "default_attempts")]
    pub max_restart: u32,
    #[serde(default)]
    pub hastate: HaState,
}

impl HaResourceParams {
    fn payload(&self) -> ApiParams {
        let mut payload = ApiParams::new();
        payload.insert("comment".to_string(), Value::from(self.comment.as_str()));
        if let Some(group) = &self.group {
            payload.insert("group".to_string(), Value::from(group.as_str()));
        }
        payload.insert("max_relocate".to_string(), Value::from(self.max_relocate));
        payload.insert("max_restart".to_string(), Value::from(self.max_restart));
        payload.insert("state".to_string(), Value::from(self.hastate.as_str()));
        payload
    }
}

/// Listed resource reduced to the fields in `payload`, with the API
/// defaults filled in.
fn comparable(resource: &ManagedObject, payload: &ApiParams) -> ManagedObject {
    let mut current = ManagedObject::new();
    if let Some(sid) = resource.get("sid") {
        current.insert("sid".to_string(), sid.clone());
    }
    for field in payload.keys() {
        let value = match (resource.get(field), field.as_str()) {
            (Some(value), _) => value.clone(),
            (None, "comment") | (None, "group") => Value::from(""),
            (None, "max_relocate") | (None, "max_restart") => Value::from(1),
            (None, _) => continue,
        };
        current.insert(field.clone(), value);
    }
    current
}

pub async fn list_resources(api: &dyn ProxmoxApi) -> Result<Vec<ManagedObject>> {
    get_list(api, RESOURCES_PATH)
        .await
        .api_context("Failed to retrieve HA resources")
}

pub async fn run(
    api: &dyn ProxmoxApi,
    params: HaResourceParams,
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    let resources = list_resources(api).await?;

    let outcome = match params.state {
        HaResourceState::Present => resource_present(api, &params, &resources, mode).await?,
        HaResourceState::Absent => resource_absent(api, &params, &resources, mode).await?,
    };
    Ok(outcome.with("sid", params.name.as_str()))
}

async fn resource_present(
    api: &dyn ProxmoxApi,
    params: &HaResourceParams,
    resources: &[ManagedObject],
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    let sid = params.name.as_str();
    let payload = params.payload();

    let mut desired = payload.clone();
    desired.insert("sid".to_string(), Value::from(sid));
    let current: Vec<ManagedObject> = resources
        .iter()
        .map(|resource| comparable(resource, &payload))
        .collect();
    let changes = diff(Some(current.as_slice()), &[desired.clone()], "sid", &[]);

    if !changes.to_create.is_empty() {
        if mode.is_dry_run() {
            return Ok(ModuleOutcome::changed(format!("Would add {sid} to HA")));
        }
        api.post(RESOURCES_PATH, &desired)
            .await
            .with_api_context(|| format!("Failed to add {sid} to HA"))?;

        log::info!("Added HA resource {}", sid);
        return Ok(ModuleOutcome::changed(format!("Added {sid} to HA")));
    }

    if changes.to_update.is_empty() {
        return Ok(ModuleOutcome::unchanged(format!("HA resource {sid} is up to date")));
    }
    if mode.is_dry_run() {
        return Ok(ModuleOutcome::changed(format!("Would update HA resource {sid}")));
    }

    let path = format!("{}/{}", RESOURCES_PATH, segment(sid));
    api.put(&path, &payload)
        .await
        .with_api_context(|| format!("Failed to update HA resource {sid}"))?;

    log::info!("Updated HA resource {}", sid);
    Ok(ModuleOutcome::changed(format!("Updated HA resource {sid}")))
}

async fn resource_absent(
    api: &dyn ProxmoxApi,
    params: &HaResourceParams,
    resources: &[ManagedObject],
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    let sid = params.name.as_str();
    let exists = resources
        .iter()
        .any(|resource| resource.get("sid").and_then(Value::as_str) == Some(sid));

    if !exists {
        return Ok(ModuleOutcome::unchanged(format!("{sid} is not managed by HA")));
    }
    if mode.is_dry_run() {
        return Ok(ModuleOutcome::changed(format!("Would remove {sid} from HA")));
    }

    let path = format!("{}/{}", RESOURCES_PATH, segment(sid));
    api.delete(&path, &ApiParams::new())
        .await
        .with_api_context(|| format!("Failed to remove {sid} from HA"))?;

    log::info!("Removed HA resource {}", sid);
    Ok(ModuleOutcome::changed(format!("Removed {sid} from HA")))
}
