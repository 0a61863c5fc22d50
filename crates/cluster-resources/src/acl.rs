//! Access control entries (`/access/acl`)
//!
//! An entry is identified by its `(path, roleid, type, ugid)` tuple. The
//! API has a single write endpoint: `PUT /access/acl` adds entries, the
//! same call with `delete=1` removes them.

use serde::Deserialize;
use serde_json::Value;

use pve_api_client::{get_list, ApiParams, ProxmoxApi};
use pve_reconcile_core::{
    diff_by, ApiResultExt, ExecutionMode, ModuleOutcome, ReconcileError, Result,
};
use pve_shared_types::{proxmox_to_ansible_bool, wire_string, ManagedObject};

const ACL_PATH: &str = "/access/acl";

/// Fields of an entry that take part in the comparison.
const ENTRY_FIELDS: &[&str] = &["path", "roleid", "type", "ugid", "propagate"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AclState {
    Present,
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AclType {
    User,
    Group,
    Token,
}

impl AclType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AclType::User => "user",
            AclType::Group => "group",
            AclType::Token => "token",
        }
    }

    /// Parameter carrying the principal on writes (`users`, `groups`, `tokens`).
    pub fn principal_field(&self) -> String {
        format!("{}s", self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AclParams {
    pub state: AclState,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub roleid: Option<String>,
    #[serde(default, rename = "type")]
    pub acl_type: Option<AclType>,
    #[serde(default)]
    pub ugid: Option<String>,
    /// Defaults to true for `present`; only filters on `absent` when set.
    #[serde(default)]
    pub propagate: Option<bool>,
}

impl AclParams {
    fn missing_for_present(&self) -> Vec<String> {
        let set = [
            ("path", self.path.is_some()),
            ("roleid", self.roleid.is_some()),
            ("type", self.acl_type.is_some()),
            ("ugid", self.ugid.is_some()),
        ];
        set.iter()
            .filter(|(_, present)| !present)
            .map(|(name, _)| name.to_string())
            .collect()
    }
}

/// Entry as compared: only the identifying fields and `propagate`, which
/// the API leaves out when it is on.
fn comparable(entry: &ManagedObject) -> ManagedObject {
    let mut entry: ManagedObject = entry
        .iter()
        .filter(|(key, _)| ENTRY_FIELDS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    entry
        .entry("propagate".to_string())
        .or_insert_with(|| Value::from(1));
    entry
}

fn entry_key(entry: &ManagedObject) -> Option<String> {
    let field = |name: &str| entry.get(name).and_then(wire_string);
    Some(format!(
        "{}|{}|{}|{}",
        field("path")?,
        field("roleid")?,
        field("type")?,
        field("ugid")?
    ))
}

fn propagate_of(entry: &ManagedObject) -> bool {
    entry.get("propagate").map_or(true, proxmox_to_ansible_bool)
}

pub async fn list_acls(api: &dyn ProxmoxApi) -> Result<Vec<ManagedObject>> {
    get_list(api, ACL_PATH)
        .await
        .api_context("Failed to retrieve ACLs")
}

fn as_list(entries: &[ManagedObject]) -> Value {
    Value::Array(entries.iter().cloned().map(Value::Object).collect())
}

pub async fn run(
    api: &dyn ProxmoxApi,
    params: AclParams,
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    if params.state == AclState::Present {
        let mut missing = params.missing_for_present();
        if !missing.is_empty() {
            missing.sort();
            return Err(ReconcileError::MissingParameters {
                resource: "ACL".to_string(),
                missing,
            });
        }
    }

    let acls = list_acls(api).await?;
    let outcome = match params.state {
        AclState::Present => acl_present(api, &params, &acls, mode).await?,
        AclState::Absent => acl_absent(api, &params, &acls, mode).await?,
    };
    let outcome = outcome.with("old_acls", as_list(&acls));

    if outcome.changed && !mode.is_dry_run() {
        let acls = list_acls(api).await?;
        return Ok(outcome.with("new_acls", as_list(&acls)));
    }
    Ok(outcome)
}

async fn acl_present(
    api: &dyn ProxmoxApi,
    params: &AclParams,
    acls: &[ManagedObject],
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    let (Some(path), Some(roleid), Some(acl_type), Some(ugid)) = (
        params.path.as_deref(),
        params.roleid.as_deref(),
        params.acl_type,
        params.ugid.as_deref(),
    ) else {
        return Err(ReconcileError::validation("ACL entry is incomplete"));
    };
    let propagate = params.propagate.unwrap_or(true);

    let mut desired = ManagedObject::new();
    desired.insert("path".to_string(), Value::from(path));
    desired.insert("roleid".to_string(), Value::from(roleid));
    desired.insert("type".to_string(), Value::from(acl_type.as_str()));
    desired.insert("ugid".to_string(), Value::from(ugid));
    desired.insert("propagate".to_string(), Value::from(u8::from(propagate)));

    let current: Vec<ManagedObject> = acls.iter().map(comparable).collect();
    let changes = diff_by(Some(current.as_slice()), &[desired], &[], entry_key);
    if changes.is_empty() {
        return Ok(ModuleOutcome::unchanged(format!(
            "ACL for {} {} on {} with role {} is already present",
            acl_type.as_str(),
            ugid,
            path,
            roleid
        )));
    }

    if mode.is_dry_run() {
        return Ok(ModuleOutcome::changed(format!(
            "Would grant {roleid} on {path} to {ugid}"
        )));
    }

    let mut payload = ApiParams::new();
    payload.insert("path".to_string(), Value::from(path));
    payload.insert("roles".to_string(), Value::from(roleid));
    payload.insert("propagate".to_string(), Value::from(u8::from(propagate)));
    payload.insert(acl_type.principal_field(), Value::from(ugid));

    api.put(ACL_PATH, &payload)
        .await
        .with_api_context(|| format!("Failed to set ACL on {path}"))?;

    log::info!("Granted {} on {} to {}", roleid, path, ugid);
    Ok(ModuleOutcome::changed(format!(
        "Granted {roleid} on {path} to {ugid}"
    )))
}

fn matches_filter(params: &AclParams, path: &str, entry: &ManagedObject) -> bool {
    let field = |name: &str| entry.get(name).and_then(Value::as_str);

    field("path") == Some(path)
        && params.roleid.as_deref().map_or(true, |roleid| field("roleid") == Some(roleid))
        && params
            .acl_type
            .map_or(true, |acl_type| field("type") == Some(acl_type.as_str()))
        && params.ugid.as_deref().map_or(true, |ugid| field("ugid") == Some(ugid))
        && params
            .propagate
            .map_or(true, |propagate| propagate_of(entry) == propagate)
}

async fn acl_absent(
    api: &dyn ProxmoxApi,
    params: &AclParams,
    acls: &[ManagedObject],
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    let path = params
        .path
        .as_deref()
        .ok_or_else(|| ReconcileError::MissingParameters {
            resource: "ACL".to_string(),
            missing: vec!["path".to_string()],
        })?;

    let matching: Vec<&ManagedObject> = acls
        .iter()
        .filter(|entry| matches_filter(params, path, entry))
        .collect();

    if matching.is_empty() {
        return Ok(ModuleOutcome::unchanged(format!(
            "No matching ACL on {path}"
        )));
    }

    if mode.is_dry_run() {
        return Ok(ModuleOutcome::changed(format!(
            "Would remove {} ACL entries on {path}",
            matching.len()
        )));
    }

    for entry in &matching {
        let field = |name: &str| entry.get(name).cloned().unwrap_or(Value::Null);
        let entry_type = entry.get("type").and_then(Value::as_str).unwrap_or("user");

        let mut payload = ApiParams::new();
        payload.insert("path".to_string(), field("path"));
        payload.insert("roles".to_string(), field("roleid"));
        payload.insert(
            "propagate".to_string(),
            Value::from(u8::from(propagate_of(entry))),
        );
        payload.insert(format!("{entry_type}s"), field("ugid"));
        payload.insert("delete".to_string(), Value::from(1));

        api.put(ACL_PATH, &payload)
            .await
            .with_api_context(|| format!("Failed to remove ACL on {path}"))?;
    }

    log::info!("Removed {} ACL entries on {}", matching.len(), path);
    Ok(ModuleOutcome::changed(format!(
        "Removed {} ACL entries on {path}",
        matching.len()
    )))
}
