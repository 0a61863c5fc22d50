//! HA groups (`/cluster/ha/groups`)

use serde::Deserialize;
use serde_json::Value;

use pve_api_client::{get_list, segment, ApiParams, ProxmoxApi};
use pve_reconcile_core::{diff, ApiResultExt, ExecutionMode, ModuleOutcome, ReconcileError, Result};
use pve_shared_types::{sorted_csv, ManagedObject};

const GROUPS_PATH: &str = "/cluster/ha/groups";
const IGNORED_FIELDS: &[&str] = &["digest", "type"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HaGroupState {
    Present,
    Absent,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HaGroupParams {
    pub state: HaGroupState,
    pub name: String,
    #[serde(default)]
    pub comment: Option<String>,
    /// Node names, optionally with a `:priority` suffix.
    #[serde(default)]
    pub nodes: Option<Vec<String>>,
    #[serde(default)]
    pub nofailback: bool,
    #[serde(default)]
    pub restricted: bool,
}

impl HaGroupParams {
    /// Writable fields, as both the create and the update call take them.
    fn payload(&self, nodes: &[String]) -> ApiParams {
        let mut nodes = nodes.to_vec();
        nodes.sort();

        let mut payload = ApiParams::new();
        payload.insert(
            "comment".to_string(),
            Value::from(self.comment.clone().unwrap_or_default()),
        );
        payload.insert("nodes".to_string(), Value::from(nodes.join(",")));
        payload.insert("nofailback".to_string(), Value::from(u8::from(self.nofailback)));
        payload.insert("restricted".to_string(), Value::from(u8::from(self.restricted)));
        payload
    }
}

/// Group as listed, with the defaults the API omits filled in and the
/// node list in canonical order.
fn normalize_group(group: &ManagedObject) -> ManagedObject {
    let mut group = group.clone();
    let nodes = group
        .get("nodes")
        .and_then(Value::as_str)
        .map(sorted_csv)
        .unwrap_or_default();
    group.insert("nodes".to_string(), Value::from(nodes));
    group
        .entry("comment".to_string())
        .or_insert_with(|| Value::from(""));
    for flag in ["nofailback", "restricted"] {
        group.entry(flag.to_string()).or_insert_with(|| Value::from(0));
    }
    group
}

pub async fn list_groups(api: &dyn ProxmoxApi) -> Result<Vec<ManagedObject>> {
    get_list(api, GROUPS_PATH)
        .await
        .api_context("Failed to retrieve HA groups")
}

pub async fn run(
    api: &dyn ProxmoxApi,
    params: HaGroupParams,
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    let groups = list_groups(api).await?;

    let outcome = match params.state {
        HaGroupState::Present => group_present(api, &params, &groups, mode).await?,
        HaGroupState::Absent => group_absent(api, &params, &groups, mode).await?,
    };
    Ok(outcome.with("group", params.name.as_str()))
}

async fn group_present(
    api: &dyn ProxmoxApi,
    params: &HaGroupParams,
    groups: &[ManagedObject],
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    let name = params.name.as_str();
    let nodes = params
        .nodes
        .as_deref()
        .filter(|nodes| !nodes.is_empty())
        .ok_or_else(|| ReconcileError::MissingParameters {
            resource: format!("HA group {name}"),
            missing: vec!["nodes".to_string()],
        })?;

    let payload = params.payload(nodes);
    let mut desired = payload.clone();
    desired.insert("group".to_string(), Value::from(name));

    let current: Vec<ManagedObject> = groups.iter().map(normalize_group).collect();
    let changes = diff(Some(current.as_slice()), &[desired], "group", IGNORED_FIELDS);

    if !changes.to_create.is_empty() {
        if mode.is_dry_run() {
            return Ok(ModuleOutcome::changed(format!("Would create HA group {name}")));
        }

        let mut create = payload;
        create.insert("group".to_string(), Value::from(name));
        api.post(GROUPS_PATH, &create)
            .await
            .with_api_context(|| format!("Failed to create HA group {name}"))?;

        log::info!("Created HA group {}", name);
        return Ok(ModuleOutcome::changed(format!("Created HA group {name}")));
    }

    if changes.to_update.is_empty() {
        return Ok(ModuleOutcome::unchanged(format!(
            "HA group {name} is up to date"
        )));
    }

    if mode.is_dry_run() {
        return Ok(ModuleOutcome::changed(format!("Would update HA group {name}")));
    }

    let path = format!("{}/{}", GROUPS_PATH, segment(name));
    api.put(&path, &payload)
        .await
        .with_api_context(|| format!("Failed to update HA group {name}"))?;

    log::info!("Updated HA group {}", name);
    Ok(ModuleOutcome::changed(format!("Updated HA group {name}")))
}

async fn group_absent(
    api: &dyn ProxmoxApi,
    params: &HaGroupParams,
    groups: &[ManagedObject],
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    let name = params.name.as_str();
    let exists = groups
        .iter()
        .any(|group| group.get("group").and_then(Value::as_str) == Some(name));

    if !exists {
        return Ok(ModuleOutcome::unchanged(format!("HA group {name} is absent")));
    }

    if mode.is_dry_run() {
        return Ok(ModuleOutcome::changed(format!("Would delete HA group {name}")));
    }

    let path = format!("{}/{}", GROUPS_PATH, segment(name));
    api.delete(&path, &ApiParams::new())
        .await
        .with_api_context(|| format!("Failed to delete HA group {name}"))?;

    log::info!("Deleted HA group {}", name);
    Ok(ModuleOutcome::changed(format!("Deleted HA group {name}")))
}
