//! Authentication realms (`/access/domains`)

use serde::Deserialize;
use serde_json::Value;

use pve_api_client::{find_object, get_list, get_object, segment, ApiParams, ProxmoxApi};
use pve_reconcile_core::{
    differs_from, ApiResultExt, ExecutionMode, FieldKind, FieldSpec, ModuleOutcome,
    ReconcileError, ResourceSchema, Result,
};
use pve_shared_types::ManagedObject;

const DOMAINS_PATH: &str = "/access/domains";

const DIRECTORY: &[&str] = &["ad", "ldap"];
const OPENID: &[&str] = &["openid"];

const DOMAIN_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("comment", "comment", FieldKind::Str),
    FieldSpec::new("default", "default", FieldKind::Bool),
    // ldap
    FieldSpec::new("base_dn", "base_dn", FieldKind::Str)
        .only(&["ldap"])
        .required(&["ldap"]),
    FieldSpec::new("user_attr", "user_attr", FieldKind::Str)
        .only(&["ldap"])
        .required(&["ldap"]),
    // ad
    FieldSpec::new("domain", "domain", FieldKind::Str)
        .only(&["ad"])
        .required(&["ad"]),
    FieldSpec::new("case_sensitive", "case-sensitive", FieldKind::Bool).only(&["ad"]),
    // directory sync
    FieldSpec::new("bind_dn", "bind_dn", FieldKind::Str).only(DIRECTORY),
    FieldSpec::new("filter", "filter", FieldKind::Str).only(DIRECTORY),
    FieldSpec::new("group_classes", "group_classes", FieldKind::Str).only(DIRECTORY),
    FieldSpec::new("group_filter", "group_filter", FieldKind::Str).only(DIRECTORY),
    FieldSpec::new("group_name_attr", "group_name_attr", FieldKind::Str).only(DIRECTORY),
    FieldSpec::new("mode", "mode", FieldKind::Str).only(DIRECTORY),
    FieldSpec::new("password", "password", FieldKind::Str).only(DIRECTORY),
    FieldSpec::new("port", "port", FieldKind::Int).only(DIRECTORY),
    FieldSpec::new("server1", "server1", FieldKind::Str)
        .only(DIRECTORY)
        .required(DIRECTORY),
    FieldSpec::new("server2", "server2", FieldKind::Str).only(DIRECTORY),
    FieldSpec::new("user_classes", "user_classes", FieldKind::Str).only(DIRECTORY),
    FieldSpec::new("verify", "verify", FieldKind::Bool).only(DIRECTORY),
    // openid
    FieldSpec::new("acr_values", "acr-values", FieldKind::Str).only(OPENID),
    FieldSpec::new("autocreate", "autocreate", FieldKind::Bool).only(OPENID),
    FieldSpec::new("client_id", "client-id", FieldKind::Str)
        .only(OPENID)
        .required(OPENID),
    FieldSpec::new("client_key", "client-key", FieldKind::Str).only(OPENID),
    FieldSpec::new("groups_autocreate", "groups-autocreate", FieldKind::Bool).only(OPENID),
    FieldSpec::new("groups_claim", "groups-claim", FieldKind::Str).only(OPENID),
    FieldSpec::new("groups_overwrite", "groups-overwrite", FieldKind::Bool).only(OPENID),
    FieldSpec::new("issuer_url", "issuer-url", FieldKind::Str)
        .only(OPENID)
        .required(OPENID),
    FieldSpec::new("prompt", "prompt", FieldKind::Str).only(OPENID),
    FieldSpec::new("query_userinfo", "query-userinfo", FieldKind::Bool).only(OPENID),
    FieldSpec::new("scopes", "scopes", FieldKind::Str).only(OPENID),
    FieldSpec::new("username_claim", "username-claim", FieldKind::Str).only(OPENID),
];

pub const DOMAIN_SCHEMA: ResourceSchema = ResourceSchema {
    resource: "realm",
    fields: DOMAIN_FIELDS,
};

/// Write-only or identifying fields that never take part in a comparison.
const UNCOMPARED: &[&str] = &["password", "realm"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainState {
    Present,
    Absent,
    Sync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RealmType {
    Ad,
    Ldap,
    Openid,
}

impl RealmType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RealmType::Ad => "ad",
            RealmType::Ldap => "ldap",
            RealmType::Openid => "openid",
        }
    }

    fn is_directory(&self) -> bool {
        matches!(self, RealmType::Ad | RealmType::Ldap)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncScope {
    Users,
    Groups,
    Both,
}

impl SyncScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncScope::Users => "users",
            SyncScope::Groups => "groups",
            SyncScope::Both => "both",
        }
    }
}

/// Defaults used by realm synchronisation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SyncOptions {
    #[serde(default)]
    pub enable_new: Option<bool>,
    /// Semicolon separated list of `acl`, `entry`, `properties`.
    #[serde(default)]
    pub remove_vanished: Option<String>,
    #[serde(default)]
    pub scope: Option<SyncScope>,
}

impl SyncOptions {
    /// Property string form, as stored in `sync-defaults-options`.
    pub fn to_property_string(&self) -> String {
        let mut options = Vec::new();
        if self.enable_new == Some(true) {
            options.push("enable-new=1".to_string());
        }
        if let Some(remove_vanished) = &self.remove_vanished {
            options.push(format!("remove-vanished={remove_vanished}"));
        }
        if let Some(scope) = self.scope {
            options.push(format!("scope={}", scope.as_str()));
        }
        options.join(",")
    }

    /// Parameters of a one-off `sync` call.
    pub fn to_sync_params(&self) -> ApiParams {
        let mut params = ApiParams::new();
        if let Some(enable_new) = self.enable_new {
            params.insert("enable-new".to_string(), Value::from(u8::from(enable_new)));
        }
        if let Some(remove_vanished) = &self.remove_vanished {
            params.insert("remove-vanished".to_string(), Value::from(remove_vanished.as_str()));
        }
        if let Some(scope) = self.scope {
            params.insert("scope".to_string(), Value::from(scope.as_str()));
        }
        params
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DomainParams {
    pub state: DomainState,
    pub realm: String,
    #[serde(default, rename = "type")]
    pub realm_type: Option<RealmType>,
    #[serde(default)]
    pub sync_defaults_options: Option<SyncOptions>,
    /// Realm fields, see [`DOMAIN_SCHEMA`].
    #[serde(flatten)]
    pub fields: ManagedObject,
}

impl DomainParams {
    /// Full realm payload for `realm_type`.
    fn payload(&self, realm_type: RealmType) -> Result<ApiParams> {
        let variant = realm_type.as_str();
        let mut fields = self.fields.clone();
        if realm_type == RealmType::Ad {
            fields
                .entry("case_sensitive".to_string())
                .or_insert(Value::Bool(true));
        }

        DOMAIN_SCHEMA.validate_applicable(variant, &fields)?;
        DOMAIN_SCHEMA.validate_required(variant, &self.realm, &fields)?;

        let mut payload = DOMAIN_SCHEMA.build_payload(variant, &fields)?;
        payload.insert("realm".to_string(), Value::from(self.realm.as_str()));
        payload.insert("type".to_string(), Value::from(variant));

        match &self.sync_defaults_options {
            Some(options) if realm_type.is_directory() => {
                payload.insert(
                    "sync-defaults-options".to_string(),
                    Value::from(options.to_property_string()),
                );
            }
            Some(_) => {
                return Err(ReconcileError::validation(format!(
                    "sync_defaults_options is not valid for realm type {variant}"
                )))
            }
            None => {}
        }
        Ok(payload)
    }
}

fn realm_path(realm: &str) -> String {
    format!("{}/{}", DOMAINS_PATH, segment(realm))
}

pub async fn realm_exists(api: &dyn ProxmoxApi, realm: &str) -> Result<bool> {
    let domains = get_list(api, DOMAINS_PATH)
        .await
        .api_context("Failed to retrieve realms")?;
    Ok(domains
        .iter()
        .any(|domain| domain.get("realm").and_then(Value::as_str) == Some(realm)))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DomainInfoParams {
    /// One realm instead of the whole list.
    #[serde(default, alias = "realm", alias = "name")]
    pub domain: Option<String>,
}

/// List realms, or read the configuration of a single one.
pub async fn info(api: &dyn ProxmoxApi, params: DomainInfoParams) -> Result<ModuleOutcome> {
    let domains = match params.domain.as_deref() {
        Some(realm) => {
            let mut domain = find_object(api, &realm_path(realm))
                .await
                .with_api_context(|| format!("Failed to read realm {realm}"))?
                .ok_or_else(|| ReconcileError::validation(format!("Domain '{realm}' does not exist")))?;
            domain.insert("realm".to_string(), Value::from(realm));
            vec![domain]
        }
        None => get_list(api, DOMAINS_PATH)
            .await
            .api_context("Failed to retrieve realms")?,
    };

    let domains = domains.into_iter().map(Value::Object).collect::<Vec<_>>();
    Ok(ModuleOutcome::unchanged("Successfully retrieved realms").with("proxmox_domains", domains))
}

pub async fn run(
    api: &dyn ProxmoxApi,
    params: DomainParams,
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    let outcome = match params.state {
        DomainState::Present => domain_present(api, &params, mode).await?,
        DomainState::Absent => domain_absent(api, &params, mode).await?,
        DomainState::Sync => domain_sync(api, &params, mode).await?,
    };
    Ok(outcome.with("realm", params.realm.as_str()))
}

async fn domain_present(
    api: &dyn ProxmoxApi,
    params: &DomainParams,
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    let realm = params.realm.as_str();
    let realm_type = params
        .realm_type
        .ok_or_else(|| ReconcileError::MissingParameters {
            resource: format!("realm {realm}"),
            missing: vec!["type".to_string()],
        })?;
    let payload = params.payload(realm_type)?;

    if !realm_exists(api, realm).await? {
        if !mode.is_dry_run() {
            api.post(DOMAINS_PATH, &payload)
                .await
                .with_api_context(|| format!("Failed to add domain {realm}"))?;
            log::info!("Added {} realm {}", realm_type.as_str(), realm);
        }
        return Ok(ModuleOutcome::change(
            mode,
            format!("Domain {realm} added."),
            format!("Domain {realm} would be added."),
        ));
    }

    let current: ManagedObject = get_object(api, &realm_path(realm))
        .await
        .with_api_context(|| format!("Failed to read domain {realm}"))?;

    if !differs_from(&current, &payload, UNCOMPARED) {
        return Ok(ModuleOutcome::unchanged(format!("Domain {realm} already exists.")));
    }

    if !mode.is_dry_run() {
        let mut update = payload;
        update.remove("type");
        update.remove("realm");
        api.put(&realm_path(realm), &update)
            .await
            .with_api_context(|| format!("Failed to edit domain {realm}"))?;
        log::info!("Edited realm {}", realm);
    }
    Ok(ModuleOutcome::change(
        mode,
        format!("Domain {realm} edited."),
        format!("Domain {realm} would be edited."),
    ))
}

async fn domain_absent(
    api: &dyn ProxmoxApi,
    params: &DomainParams,
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    let realm = params.realm.as_str();
    if !realm_exists(api, realm).await? {
        return Ok(ModuleOutcome::unchanged("Domain not present."));
    }

    if !mode.is_dry_run() {
        api.delete(&realm_path(realm), &ApiParams::new())
            .await
            .with_api_context(|| format!("Failed to delete domain {realm}"))?;
        log::info!("Deleted realm {}", realm);
    }
    Ok(ModuleOutcome::change(
        mode,
        format!("Domain {realm} deleted."),
        format!("Domain {realm} would be deleted."),
    ))
}

async fn domain_sync(
    api: &dyn ProxmoxApi,
    params: &DomainParams,
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    let realm = params.realm.as_str();
    if !realm_exists(api, realm).await? {
        return Err(ReconcileError::validation(format!("Domain {realm} not present.")));
    }

    if !mode.is_dry_run() {
        let options = params
            .sync_defaults_options
            .as_ref()
            .map(SyncOptions::to_sync_params)
            .unwrap_or_default();
        api.post(&format!("{}/sync", realm_path(realm)), &options)
            .await
            .with_api_context(|| format!("Failed to sync domain {realm}"))?;
        log::info!("Synced realm {}", realm);
    }
    Ok(ModuleOutcome::change(
        mode,
        format!("Domain {realm} synced."),
        format!("Domain {realm} would be synced."),
    ))
}
