//! Firewall rules, aliases, IP sets and security groups
//!
//! Rules and aliases live under a firewall endpoint that depends on the
//! level: the cluster, a node, a guest, an SDN vnet or a security group.
//! IP sets and security groups are cluster wide.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use pve_api_client::{get_list, get_object, segment, ApiParams, ProxmoxApi};
use pve_reconcile_core::{
    diff, values_equal, ApiResultExt, ExecutionMode, ModuleOutcome, ReconcileError, Result,
};
use pve_shared_types::{list_from_value, object_from_value, proxmox_to_ansible_bool, ManagedObject};

const GROUPS_PATH: &str = "/cluster/firewall/groups";
const IPSET_PATH: &str = "/cluster/firewall/ipset";
const IGNORED_FIELDS: &[&str] = &["digest", "ipversion"];

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FirewallState {
    #[default]
    Present,
    Absent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FirewallLevel {
    #[default]
    Cluster,
    Node,
    Vm,
    Vnet,
    Group,
}

impl FirewallLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            FirewallLevel::Cluster => "cluster",
            FirewallLevel::Node => "node",
            FirewallLevel::Vm => "vm",
            FirewallLevel::Vnet => "vnet",
            FirewallLevel::Group => "group",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleDirection {
    In,
    Out,
    Forward,
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Emerg,
    Alert,
    Crit,
    Err,
    Warning,
    Notice,
    Info,
    Debug,
    Nolog,
}

fn flag_as_int<S: Serializer>(flag: &Option<bool>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    match flag {
        Some(flag) => serializer.serialize_u8(u8::from(*flag)),
        None => serializer.serialize_none(),
    }
}

/// One firewall rule as given in the module arguments. Serializes to the
/// API field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirewallRule {
    pub action: String,
    #[serde(rename = "type")]
    pub direction: RuleDirection,
    pub pos: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dport: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "flag_as_int"
    )]
    pub enable: Option<bool>,
    #[serde(default, rename = "icmp-type", alias = "icmp_type", skip_serializing_if = "Option::is_none")]
    pub icmp_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<LogLevel>,
    #[serde(default, rename = "macro", skip_serializing_if = "Option::is_none")]
    pub macro_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proto: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sport: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirewallAlias {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

fn flag_as_u8<S: Serializer>(flag: &bool, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u8(u8::from(*flag))
}

/// One CIDR of an IP set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpSetEntry {
    pub cidr: String,
    /// Exclude this CIDR from the set.
    #[serde(default, serialize_with = "flag_as_u8")]
    pub nomatch: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IpSet {
    pub name: String,
    #[serde(default)]
    pub comment: Option<String>,
    /// On removal, no CIDRs means the whole set.
    #[serde(default)]
    pub cidrs: Option<Vec<IpSetEntry>>,
}

/// Which firewall a module run addresses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FirewallTarget {
    #[serde(default)]
    pub level: FirewallLevel,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub vmid: Option<u32>,
    #[serde(default)]
    pub vnet: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
}

impl FirewallTarget {
    /// Parameters the level needs but are not set.
    fn missing(&self) -> Vec<&'static str> {
        match self.level {
            FirewallLevel::Vm if self.vmid.is_none() => vec!["vmid"],
            FirewallLevel::Node if self.node.is_none() => vec!["node"],
            FirewallLevel::Vnet if self.vnet.is_none() => vec!["vnet"],
            FirewallLevel::Group if self.group.is_none() => vec!["group"],
            _ => Vec::new(),
        }
    }

    fn missing_error(&self, missing: Vec<&str>) -> ReconcileError {
        ReconcileError::MissingParameters {
            resource: format!("firewall at level {}", self.level.as_str()),
            missing: missing.into_iter().map(str::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FirewallParams {
    #[serde(default)]
    pub state: FirewallState,
    #[serde(default = "default_true")]
    pub update: bool,
    #[serde(flatten)]
    pub target: FirewallTarget,
    /// Rule position to remove.
    #[serde(default)]
    pub pos: Option<u32>,
    /// Manage the security group itself.
    #[serde(default)]
    pub group_conf: bool,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub aliases: Option<Vec<FirewallAlias>>,
    #[serde(default)]
    pub rules: Option<Vec<FirewallRule>>,
    #[serde(default)]
    pub ip_sets: Option<Vec<IpSet>>,
}

fn non_empty<T>(items: &Option<Vec<T>>) -> bool {
    items.as_ref().map_or(false, |items| !items.is_empty())
}

impl FirewallParams {
    pub fn validate(&self) -> Result<()> {
        let mut missing = self.target.missing();
        if self.group_conf && self.target.group.is_none() {
            missing.push("group");
        }
        if !missing.is_empty() {
            missing.sort_unstable();
            missing.dedup();
            return Err(self.target.missing_error(missing));
        }

        let given: Vec<&str> = [
            ("aliases", self.aliases.is_some()),
            ("ip_sets", self.ip_sets.is_some()),
            ("rules", self.rules.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, set)| set.then_some(name))
        .collect();
        if given.len() > 1 {
            return Err(ReconcileError::validation(format!(
                "parameters are mutually exclusive: {}",
                given.join("|")
            )));
        }

        let has_aliases = non_empty(&self.aliases);
        let has_ip_sets = non_empty(&self.ip_sets);
        match self.state {
            FirewallState::Present
                if self.group_conf == (non_empty(&self.rules) || has_aliases || has_ip_sets) =>
            {
                Err(ReconcileError::validation(
                    "When state is present either group_conf should be true or rules/aliases/ip_sets must be present but not both",
                ))
            }
            FirewallState::Absent
                if self.group_conf == (self.pos.is_some() || has_aliases || has_ip_sets) =>
            {
                Err(ReconcileError::validation(
                    "When state is absent either group_conf should be true or pos/aliases/ip_sets must be present but not both",
                ))
            }
            FirewallState::Absent if self.pos.is_some() && (has_aliases || has_ip_sets) => Err(
                ReconcileError::validation("pos and aliases/ip_sets cannot be removed in the same run"),
            ),
            _ => Ok(()),
        }
    }
}

/// Resolved endpoints for one level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallEndpoint {
    /// Firewall root; security groups have none.
    pub base: Option<String>,
    pub rules: String,
}

impl FirewallEndpoint {
    fn under(base: String) -> Self {
        Self {
            rules: format!("{base}/rules"),
            base: Some(base),
        }
    }

    fn aliases(&self) -> Option<String> {
        self.base.as_ref().map(|base| format!("{base}/aliases"))
    }
}

/// Find the node and guest type of `vmid` in the cluster resource list.
pub async fn resolve_guest(api: &dyn ProxmoxApi, vmid: u32) -> Result<(String, String)> {
    let mut query = ApiParams::new();
    query.insert("type".to_string(), Value::from("vm"));

    let data = api
        .get("/cluster/resources", &query)
        .await
        .with_api_context(|| format!("Unable to retrieve list of VMs filtered by vmid {vmid}"))?;

    list_from_value(data)?
        .into_iter()
        .find(|guest| guest.get("vmid").and_then(Value::as_u64) == Some(u64::from(vmid)))
        .and_then(|guest| {
            let node = guest.get("node")?.as_str()?.to_string();
            let kind = guest.get("type")?.as_str()?.to_string();
            Some((node, kind))
        })
        .ok_or_else(|| ReconcileError::validation(format!("VM with vmid {vmid} does not exist in cluster")))
}

pub async fn resolve_endpoint(api: &dyn ProxmoxApi, target: &FirewallTarget) -> Result<FirewallEndpoint> {
    let missing = |name: &str| target.missing_error(vec![name]);

    Ok(match target.level {
        FirewallLevel::Cluster => FirewallEndpoint::under("/cluster/firewall".to_string()),
        FirewallLevel::Node => {
            let node = target.node.as_deref().ok_or_else(|| missing("node"))?;
            FirewallEndpoint::under(format!("/nodes/{}/firewall", segment(node)))
        }
        FirewallLevel::Vm => {
            let vmid = target.vmid.ok_or_else(|| missing("vmid"))?;
            let (node, kind) = resolve_guest(api, vmid).await?;
            FirewallEndpoint::under(format!(
                "/nodes/{}/{}/{}/firewall",
                segment(&node),
                segment(&kind),
                vmid
            ))
        }
        FirewallLevel::Vnet => {
            let vnet = target.vnet.as_deref().ok_or_else(|| missing("vnet"))?;
            FirewallEndpoint::under(format!("/cluster/sdn/vnets/{}/firewall", segment(vnet)))
        }
        FirewallLevel::Group => {
            let group = target.group.as_deref().ok_or_else(|| missing("group"))?;
            FirewallEndpoint {
                base: None,
                rules: format!("{}/{}", GROUPS_PATH, segment(group)),
            }
        }
    })
}

fn to_object<T: Serialize>(item: &T) -> Result<ManagedObject> {
    let value = serde_json::to_value(item)
        .map_err(|err| ReconcileError::validation(format!("cannot encode firewall entry: {err}")))?;
    Ok(object_from_value(value)?)
}

pub async fn run(
    api: &dyn ProxmoxApi,
    params: FirewallParams,
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    params.validate()?;

    match params.state {
        FirewallState::Present => {
            if params.group_conf {
                return group_present(api, &params, mode).await;
            }
            if let Some(ip_sets) = &params.ip_sets {
                return ip_sets_present(api, ip_sets, params.update, mode).await;
            }
            let endpoint = resolve_endpoint(api, &params.target).await?;
            match (&params.rules, &params.aliases) {
                (Some(rules), _) => rules_present(api, &endpoint, rules, params.update, mode).await,
                (None, Some(aliases)) => {
                    aliases_present(api, &params, &endpoint, aliases, mode).await
                }
                (None, None) => Ok(ModuleOutcome::unchanged("Nothing to do")),
            }
        }
        FirewallState::Absent => {
            if params.group_conf {
                return group_absent(api, &params, mode).await;
            }
            if let Some(ip_sets) = &params.ip_sets {
                return ip_sets_absent(api, ip_sets, mode).await;
            }
            let endpoint = resolve_endpoint(api, &params.target).await?;
            match (params.pos, &params.aliases) {
                (Some(pos), _) => rule_absent(api, &endpoint, pos, mode).await,
                (None, Some(aliases)) => aliases_absent(api, &endpoint, aliases, mode).await,
                (None, None) => Ok(ModuleOutcome::unchanged("Nothing to do")),
            }
        }
    }
}

pub async fn list_rules(api: &dyn ProxmoxApi, endpoint: &FirewallEndpoint) -> Result<Vec<ManagedObject>> {
    get_list(api, &endpoint.rules)
        .await
        .api_context("Failed to retrieve firewall rules")
}

async fn rule_digest(api: &dyn ProxmoxApi, path: &str) -> Result<Option<Value>> {
    let rule = get_object(api, path)
        .await
        .with_api_context(|| format!("Failed to read firewall rule {path}"))?;
    Ok(rule.get("digest").cloned())
}

fn positions(rules: &[ManagedObject]) -> String {
    rules
        .iter()
        .filter_map(|rule| rule.get("pos"))
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

async fn rules_present(
    api: &dyn ProxmoxApi,
    endpoint: &FirewallEndpoint,
    rules: &[FirewallRule],
    update: bool,
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    let existing = list_rules(api, endpoint).await?;
    let desired = rules.iter().map(to_object).collect::<Result<Vec<_>>>()?;
    let changes = diff(Some(existing.as_slice()), &desired, "pos", IGNORED_FIELDS);

    if changes.is_empty() {
        return Ok(ModuleOutcome::unchanged("No need to create/update any rule"));
    }
    if !changes.to_update.is_empty() && !update {
        return Err(ReconcileError::validation(format!(
            "Need to update rules at pos - [{}] but update is false",
            positions(&changes.to_update)
        )));
    }
    if mode.is_dry_run() {
        return Ok(ModuleOutcome::changed(format!(
            "Would create {} and update {} firewall rules",
            changes.to_create.len(),
            changes.to_update.len()
        )));
    }

    for rule in &changes.to_update {
        let pos = rule.get("pos").map(Value::to_string).unwrap_or_default();
        let path = format!("{}/{}", endpoint.rules, pos);

        let mut rule = rule.clone();
        if let Some(digest) = rule_digest(api, &path).await? {
            rule.insert("digest".to_string(), digest);
        }
        api.put(&path, &rule)
            .await
            .with_api_context(|| format!("Failed to update firewall rule at pos {pos}"))?;
        log::info!("Updated firewall rule at {}", path);
    }

    let mut warnings = Vec::new();
    for rule in &changes.to_create {
        api.post(&endpoint.rules, rule)
            .await
            .with_api_context(|| format!("Failed to create firewall rule {}", Value::Object(rule.clone())))?;
        log::info!("Created firewall rule in {}", endpoint.rules);

        if let Some(warning) = move_to_position(api, endpoint, rule).await? {
            warnings.push(warning);
        }
    }

    Ok(ModuleOutcome::changed("successfully created/updated firewall rules").with_warnings(warnings))
}

/// New rules land at position 0. Move the rule found there to its
/// requested position, unless it is not the rule just created.
async fn move_to_position(
    api: &dyn ProxmoxApi,
    endpoint: &FirewallEndpoint,
    rule: &ManagedObject,
) -> Result<Option<String>> {
    let pos = match rule.get("pos").and_then(Value::as_u64) {
        Some(pos) if pos != 0 => pos,
        _ => return Ok(None),
    };

    let path = format!("{}/0", endpoint.rules);
    let at_zero = get_object(api, &path)
        .await
        .api_context("Rule created but failed to move it to correct pos")?;

    let foreign = at_zero.iter().any(|(param, value)| {
        param != "pos" && rule.get(param).map_or(false, |wanted| !values_equal(value, wanted))
    });
    if foreign {
        let warning = format!(
            "Skipping workaround for rule placement. Verify rule is at correct pos {pos}"
        );
        log::warn!("{}", warning);
        return Ok(Some(warning));
    }

    let mut moveto = ApiParams::new();
    // the rule is placed before the given position
    moveto.insert("moveto".to_string(), Value::from(pos + 1));
    api.put(&path, &moveto)
        .await
        .api_context("Rule created but failed to move it to correct pos")?;
    Ok(None)
}

async fn rule_absent(
    api: &dyn ProxmoxApi,
    endpoint: &FirewallEndpoint,
    pos: u32,
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    let rules = list_rules(api, endpoint).await?;
    let exists = rules
        .iter()
        .any(|rule| rule.get("pos").and_then(Value::as_u64) == Some(u64::from(pos)));

    if !exists {
        return Ok(ModuleOutcome::unchanged("Firewall rule already doesn't exist"));
    }
    if mode.is_dry_run() {
        return Ok(ModuleOutcome::changed(format!("Would delete firewall rule at pos {pos}")));
    }

    let path = format!("{}/{}", endpoint.rules, pos);
    let mut params = ApiParams::new();
    params.insert("pos".to_string(), Value::from(pos));
    if let Some(digest) = rule_digest(api, &path).await? {
        params.insert("digest".to_string(), digest);
    }

    api.delete(&path, &params)
        .await
        .with_api_context(|| format!("Failed to delete firewall rule at pos {pos}"))?;

    log::info!("Deleted firewall rule at {}", path);
    Ok(ModuleOutcome::changed("successfully deleted firewall rules"))
}

async fn list_aliases(api: &dyn ProxmoxApi, endpoint: &FirewallEndpoint) -> Result<Vec<ManagedObject>> {
    match endpoint.aliases() {
        Some(path) => get_list(api, &path)
            .await
            .api_context("Failed to retrieve aliases"),
        None => Ok(Vec::new()),
    }
}

async fn aliases_present(
    api: &dyn ProxmoxApi,
    params: &FirewallParams,
    endpoint: &FirewallEndpoint,
    aliases: &[FirewallAlias],
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    let path = match (params.target.level, endpoint.aliases()) {
        (FirewallLevel::Cluster | FirewallLevel::Vm, Some(path)) => path,
        _ => {
            return Err(ReconcileError::validation(
                "Aliases can only be created at cluster or VM level",
            ))
        }
    };

    let existing = list_aliases(api, endpoint).await?;
    let desired = aliases.iter().map(to_object).collect::<Result<Vec<_>>>()?;
    let changes = diff(Some(existing.as_slice()), &desired, "name", IGNORED_FIELDS);

    if changes.is_empty() {
        return Ok(ModuleOutcome::unchanged("No need to create/update any aliases"));
    }
    if !changes.to_update.is_empty() && !params.update {
        let names: Vec<&str> = changes
            .to_update
            .iter()
            .filter_map(|alias| alias.get("name").and_then(Value::as_str))
            .collect();
        return Err(ReconcileError::validation(format!(
            "Need to update aliases - [{}] but update is false",
            names.join(", ")
        )));
    }
    if mode.is_dry_run() {
        return Ok(ModuleOutcome::changed("Would create/update aliases"));
    }

    for alias in &changes.to_create {
        let name = alias.get("name").and_then(Value::as_str).unwrap_or_default();
        api.post(&path, alias)
            .await
            .with_api_context(|| format!("Failed to create Alias {name}"))?;
        log::info!("Created alias {}", name);
    }
    for alias in &changes.to_update {
        let name = alias.get("name").and_then(Value::as_str).unwrap_or_default();
        api.put(&format!("{}/{}", path, segment(name)), alias)
            .await
            .with_api_context(|| format!("Failed to update Alias {name}"))?;
        log::info!("Updated alias {}", name);
    }

    Ok(ModuleOutcome::changed("Aliases created/updated"))
}

async fn aliases_absent(
    api: &dyn ProxmoxApi,
    endpoint: &FirewallEndpoint,
    aliases: &[FirewallAlias],
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    let existing = list_aliases(api, endpoint).await?;
    let mut doomed: Vec<&str> = aliases
        .iter()
        .map(|alias| alias.name.as_str())
        .filter(|name| {
            existing
                .iter()
                .any(|alias| alias.get("name").and_then(Value::as_str) == Some(*name))
        })
        .collect();
    doomed.sort_unstable();
    doomed.dedup();

    if doomed.is_empty() {
        return Ok(ModuleOutcome::unchanged("No need to delete any alias"));
    }
    if mode.is_dry_run() {
        return Ok(ModuleOutcome::changed(format!("Would delete aliases {}", doomed.join(", "))));
    }

    // list_aliases returned entries, so the endpoint has an alias path
    let path = endpoint.aliases().unwrap_or_default();
    for name in doomed {
        api.delete(&format!("{}/{}", path, segment(name)), &ApiParams::new())
            .await
            .with_api_context(|| format!("Failed to delete alias {name}"))?;
        log::info!("Deleted alias {}", name);
    }

    Ok(ModuleOutcome::changed("Successfully deleted aliases"))
}

pub async fn list_groups(api: &dyn ProxmoxApi) -> Result<Vec<String>> {
    let groups = get_list(api, GROUPS_PATH)
        .await
        .api_context("Failed to retrieve firewall security groups")?;
    Ok(groups
        .iter()
        .filter_map(|group| group.get("group").and_then(Value::as_str))
        .map(str::to_string)
        .collect())
}

async fn group_present(
    api: &dyn ProxmoxApi,
    params: &FirewallParams,
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    let group = params.target.group.as_deref().unwrap_or_default();

    if list_groups(api).await?.iter().any(|name| name == group) {
        return Ok(ModuleOutcome::unchanged(format!("security group {group} already exists"))
            .with("group", group));
    }
    if mode.is_dry_run() {
        return Ok(ModuleOutcome::changed(format!("Would create security group {group}"))
            .with("group", group));
    }

    let mut payload = ApiParams::new();
    payload.insert("group".to_string(), Value::from(group));
    if let Some(comment) = &params.comment {
        payload.insert("comment".to_string(), Value::from(comment.as_str()));
    }
    api.post(GROUPS_PATH, &payload)
        .await
        .api_context("Failed to create security group")?;

    log::info!("Created security group {}", group);
    Ok(ModuleOutcome::changed(format!("successfully created security group {group}"))
        .with("group", group))
}

async fn group_absent(
    api: &dyn ProxmoxApi,
    params: &FirewallParams,
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    let group = params.target.group.as_deref().unwrap_or_default();

    if !list_groups(api).await?.iter().any(|name| name == group) {
        return Ok(ModuleOutcome::unchanged(format!("security group {group} already doesn't exist"))
            .with("group", group));
    }
    if mode.is_dry_run() {
        return Ok(ModuleOutcome::changed(format!("Would delete security group {group}"))
            .with("group", group));
    }

    api.delete(&format!("{}/{}", GROUPS_PATH, segment(group)), &ApiParams::new())
        .await
        .with_api_context(|| format!("Failed to delete security group {group}"))?;

    log::info!("Deleted security group {}", group);
    Ok(ModuleOutcome::changed(format!("successfully deleted security group {group}"))
        .with("group", group))
}

/// IP sets with their entries under `cidrs`; `nomatch` spelled out as 0/1.
pub async fn list_ip_sets(api: &dyn ProxmoxApi) -> Result<Vec<ManagedObject>> {
    let mut ip_sets = get_list(api, IPSET_PATH)
        .await
        .api_context("Failed to retrieve firewall ipsets")?;

    for ip_set in &mut ip_sets {
        let name = ip_set.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
        let cidrs = get_list(api, &format!("{}/{}", IPSET_PATH, segment(&name)))
            .await
            .with_api_context(|| format!("Failed to retrieve firewall ipset {name}"))?;

        let cidrs: Vec<Value> = cidrs
            .into_iter()
            .map(|mut entry| {
                let nomatch = entry.get("nomatch").map_or(false, proxmox_to_ansible_bool);
                entry.insert("nomatch".to_string(), Value::from(u8::from(nomatch)));
                Value::Object(entry)
            })
            .collect();
        ip_set.insert("cidrs".to_string(), Value::Array(cidrs));
    }
    Ok(ip_sets)
}

fn ip_set_entries(ip_set: &ManagedObject) -> Vec<ManagedObject> {
    ip_set
        .get("cidrs")
        .and_then(Value::as_array)
        .map(|entries| entries.iter().filter_map(|entry| entry.as_object().cloned()).collect())
        .unwrap_or_default()
}

fn find_ip_set<'s>(ip_sets: &'s [ManagedObject], name: &str) -> Option<&'s ManagedObject> {
    ip_sets
        .iter()
        .find(|ip_set| ip_set.get("name").and_then(Value::as_str) == Some(name))
}

/// Writes needed for one requested IP set.
struct IpSetPlan<'p> {
    ip_set: &'p IpSet,
    create_set: bool,
    to_create: Vec<ManagedObject>,
    to_update: Vec<ManagedObject>,
}

async fn ip_sets_present(
    api: &dyn ProxmoxApi,
    ip_sets: &[IpSet],
    update: bool,
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    let existing = list_ip_sets(api).await?;

    let mut plans = Vec::with_capacity(ip_sets.len());
    for ip_set in ip_sets {
        let desired = ip_set
            .cidrs
            .iter()
            .flatten()
            .map(to_object)
            .collect::<Result<Vec<_>>>()?;

        let plan = match find_ip_set(&existing, &ip_set.name) {
            None => IpSetPlan {
                ip_set,
                create_set: true,
                to_create: desired,
                to_update: Vec::new(),
            },
            Some(current) => {
                let entries = ip_set_entries(current);
                let changes = diff(Some(entries.as_slice()), &desired, "cidr", &["digest"]);
                IpSetPlan {
                    ip_set,
                    create_set: false,
                    to_create: changes.to_create,
                    to_update: changes.to_update,
                }
            }
        };

        if !plan.to_update.is_empty() && !update {
            return Err(ReconcileError::validation(format!(
                "Ip set {} needs to be updated but update is false.",
                ip_set.name
            )));
        }
        plans.push(plan);
    }

    let changed = plans
        .iter()
        .any(|plan| plan.create_set || !plan.to_create.is_empty() || !plan.to_update.is_empty());
    if !changed {
        return Ok(ModuleOutcome::unchanged("All ipsets present."));
    }
    if mode.is_dry_run() {
        return Ok(ModuleOutcome::changed("Would create/update ipsets"));
    }

    for plan in &plans {
        let name = plan.ip_set.name.as_str();
        let set_path = format!("{}/{}", IPSET_PATH, segment(name));

        if plan.create_set {
            let mut payload = ApiParams::new();
            payload.insert("name".to_string(), Value::from(name));
            if let Some(comment) = &plan.ip_set.comment {
                payload.insert("comment".to_string(), Value::from(comment.as_str()));
            }
            api.post(IPSET_PATH, &payload)
                .await
                .with_api_context(|| format!("Failed to create ipset {name}"))?;
            log::info!("Created ipset {}", name);
        }

        for entry in &plan.to_update {
            let cidr = entry.get("cidr").and_then(Value::as_str).unwrap_or_default();
            api.put(&format!("{}/{}", set_path, segment(cidr)), entry)
                .await
                .with_api_context(|| format!("Failed to update {cidr} in ipset {name}"))?;
            log::info!("Updated {} in ipset {}", cidr, name);
        }

        for entry in &plan.to_create {
            let cidr = entry.get("cidr").and_then(Value::as_str).unwrap_or_default();
            api.post(&set_path, entry)
                .await
                .with_api_context(|| format!("Failed to add {cidr} to ipset {name}"))?;
            log::info!("Added {} to ipset {}", cidr, name);
        }
    }

    Ok(ModuleOutcome::changed("All ipsets present."))
}

async fn ip_sets_absent(
    api: &dyn ProxmoxApi,
    ip_sets: &[IpSet],
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    let existing = list_ip_sets(api).await?;

    // (set name, CIDRs to remove, remove the set itself)
    let mut removals: Vec<(&str, Vec<String>, bool)> = Vec::new();
    for ip_set in ip_sets {
        let Some(current) = find_ip_set(&existing, &ip_set.name) else {
            continue;
        };
        let configured: Vec<String> = ip_set_entries(current)
            .iter()
            .filter_map(|entry| entry.get("cidr").and_then(Value::as_str))
            .map(str::to_string)
            .collect();

        match ip_set.cidrs.as_deref() {
            None | Some([]) => removals.push((ip_set.name.as_str(), configured, true)),
            Some(entries) => {
                let doomed: Vec<String> = entries
                    .iter()
                    .map(|entry| entry.cidr.clone())
                    .filter(|cidr| configured.contains(cidr))
                    .collect();
                if !doomed.is_empty() {
                    removals.push((ip_set.name.as_str(), doomed, false));
                }
            }
        }
    }

    if removals.is_empty() {
        return Ok(ModuleOutcome::unchanged("Ipsets are absent."));
    }
    if mode.is_dry_run() {
        return Ok(ModuleOutcome::changed("Would remove ipsets or their entries"));
    }

    for (name, cidrs, remove_set) in removals {
        let set_path = format!("{}/{}", IPSET_PATH, segment(name));
        // a set can only be removed once it is empty
        for cidr in &cidrs {
            api.delete(&format!("{}/{}", set_path, segment(cidr)), &ApiParams::new())
                .await
                .with_api_context(|| format!("Failed to remove {cidr} from ipset {name}"))?;
            log::info!("Removed {} from ipset {}", cidr, name);
        }
        if remove_set {
            api.delete(&set_path, &ApiParams::new())
                .await
                .with_api_context(|| format!("Failed to delete ipset {name}"))?;
            log::info!("Deleted ipset {}", name);
        }
    }

    Ok(ModuleOutcome::changed("Ipsets are absent."))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FirewallInfoParams {
    #[serde(flatten)]
    pub target: FirewallTarget,
    /// Only the rule at this position.
    #[serde(default)]
    pub pos: Option<u32>,
}

/// Rules of one firewall plus the cluster wide groups and IP sets.
pub async fn info(api: &dyn ProxmoxApi, params: FirewallInfoParams) -> Result<ModuleOutcome> {
    let missing = params.target.missing();
    if !missing.is_empty() {
        return Err(params.target.missing_error(missing));
    }

    let endpoint = resolve_endpoint(api, &params.target).await?;
    let rules = match params.pos {
        Some(pos) => {
            let rule = get_object(api, &format!("{}/{}", endpoint.rules, pos))
                .await
                .api_context("Failed to retrieve firewall rules")?;
            vec![rule]
        }
        None => list_rules(api, &endpoint).await?,
    };
    let groups = list_groups(api).await?;
    let aliases = list_aliases(api, &endpoint).await?;
    let ip_sets = list_ip_sets(api).await?;

    let objects = |items: Vec<ManagedObject>| Value::Array(items.into_iter().map(Value::Object).collect());
    Ok(ModuleOutcome::unchanged("successfully retrieved firewall rules and groups")
        .with("firewall_rules", objects(rules))
        .with("groups", groups)
        .with("aliases", objects(aliases))
        .with("ip_sets", objects(ip_sets)))
}
