//! HA rules (`/cluster/ha/rules`)
//!
//! Node affinity rules pin resources to nodes, resource affinity rules keep
//! resources together or apart. The type of a rule is fixed once created;
//! changing it means deleting and recreating the rule.

use serde::Deserialize;
use serde_json::{json, Value};

use pve_api_client::{get_list, segment, ApiParams, ProxmoxApi};
use pve_reconcile_core::{
    differs_from, ApiResultExt, ExecutionMode, ModuleOutcome, ReconcileError, Result,
};
use pve_shared_types::{sorted_csv, ManagedObject};

const RULES_PATH: &str = "/cluster/ha/rules";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HaRuleState {
    Present,
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HaRuleType {
    NodeAffinity,
    ResourceAffinity,
}

impl HaRuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HaRuleType::NodeAffinity => "node-affinity",
            HaRuleType::ResourceAffinity => "resource-affinity",
        }
    }

    /// Parameters a rule of this type cannot be created without.
    fn required_on_create(&self) -> [&'static str; 2] {
        match self {
            HaRuleType::NodeAffinity => ["nodes", "resources"],
            HaRuleType::ResourceAffinity => ["affinity", "resources"],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Affinity {
    Positive,
    Negative,
}

impl Affinity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Affinity::Positive => "positive",
            Affinity::Negative => "negative",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HaRuleParams {
    pub state: HaRuleState,
    pub name: String,
    #[serde(rename = "type")]
    pub rule_type: HaRuleType,
    #[serde(default)]
    pub affinity: Option<Affinity>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub disable: Option<bool>,
    /// Delete and recreate a rule whose type differs.
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub nodes: Option<Vec<String>>,
    #[serde(default)]
    pub resources: Option<Vec<String>>,
    #[serde(default)]
    pub strict: Option<bool>,
}

fn sorted_join(items: &[String]) -> String {
    let mut items = items.to_vec();
    items.sort();
    items.join(",")
}

impl HaRuleParams {
    fn is_set(&self, param: &str) -> bool {
        match param {
            "nodes" => self.nodes.is_some(),
            "resources" => self.resources.is_some(),
            "affinity" => self.affinity.is_some(),
            _ => false,
        }
    }

    /// Fails before any write when a new rule would lack required fields.
    fn check_create_params(&self) -> Result<()> {
        let missing: Vec<String> = self
            .rule_type
            .required_on_create()
            .iter()
            .filter(|param| !self.is_set(param))
            .map(|param| param.to_string())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        Err(ReconcileError::MissingParameters {
            resource: format!("new HA rule {} of type {}", self.name, self.rule_type.as_str()),
            missing,
        })
    }

    /// Rule payload; fields of the other rule type are never sent.
    fn payload(&self) -> ApiParams {
        let mut payload = ApiParams::new();
        payload.insert("rule".to_string(), Value::from(self.name.as_str()));
        payload.insert("type".to_string(), Value::from(self.rule_type.as_str()));

        if let Some(comment) = &self.comment {
            payload.insert("comment".to_string(), Value::from(comment.as_str()));
        }
        if let Some(disable) = self.disable {
            payload.insert("disable".to_string(), Value::from(u8::from(disable)));
        }
        if let Some(resources) = &self.resources {
            payload.insert("resources".to_string(), Value::from(sorted_join(resources)));
        }

        match self.rule_type {
            HaRuleType::NodeAffinity => {
                if let Some(strict) = self.strict {
                    payload.insert("strict".to_string(), Value::from(u8::from(strict)));
                }
                if let Some(nodes) = &self.nodes {
                    payload.insert("nodes".to_string(), Value::from(sorted_join(nodes)));
                }
            }
            HaRuleType::ResourceAffinity => {
                if let Some(affinity) = self.affinity {
                    payload.insert("affinity".to_string(), Value::from(affinity.as_str()));
                }
            }
        }
        payload
    }
}

/// Rule as listed, with the defaults the API omits and sorted lists.
fn normalize_rule(rule: &ManagedObject) -> ManagedObject {
    let mut rule = rule.clone();
    rule.entry("disable".to_string())
        .or_insert_with(|| Value::from(0));
    rule.entry("comment".to_string())
        .or_insert_with(|| Value::from(""));
    for key in ["nodes", "resources"] {
        if let Some(list) = rule.get(key).and_then(Value::as_str).map(sorted_csv) {
            rule.insert(key.to_string(), Value::from(list));
        }
    }
    rule
}

pub async fn list_rules(api: &dyn ProxmoxApi) -> Result<Vec<ManagedObject>> {
    get_list(api, RULES_PATH)
        .await
        .api_context("Failed to retrieve HA rules")
}

fn find_rule(rules: Vec<ManagedObject>, name: &str) -> Option<ManagedObject> {
    rules
        .into_iter()
        .find(|rule| rule.get("rule").and_then(Value::as_str) == Some(name))
}

fn with_diff(outcome: ModuleOutcome, before: &ManagedObject, after: &ManagedObject) -> ModuleOutcome {
    outcome.with("diff", json!({ "before": before, "after": after }))
}

pub async fn run(
    api: &dyn ProxmoxApi,
    params: HaRuleParams,
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    let existing = find_rule(list_rules(api).await?, &params.name);

    match params.state {
        HaRuleState::Present => rule_present(api, &params, existing, mode).await,
        HaRuleState::Absent => rule_absent(api, &params, existing, mode).await,
    }
}

async fn rule_present(
    api: &dyn ProxmoxApi,
    params: &HaRuleParams,
    existing: Option<ManagedObject>,
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    let name = params.name.as_str();
    let path = format!("{}/{}", RULES_PATH, segment(name));
    let mut before = ManagedObject::new();

    let existing = match existing {
        Some(rule)
            if rule.get("type").and_then(Value::as_str) != Some(params.rule_type.as_str()) =>
        {
            let current_type = rule.get("type").and_then(Value::as_str).unwrap_or_default();
            if !params.force {
                return Err(ReconcileError::validation(format!(
                    "Rule {name} already exists with type={current_type}. The type of an existing rule \
                     can not be changed. Use force=true to delete the existing rule and recreate it \
                     with type={}",
                    params.rule_type.as_str()
                )));
            }

            params.check_create_params()?;
            before = rule.clone();
            if !mode.is_dry_run() {
                api.delete(&path, &ApiParams::new())
                    .await
                    .with_api_context(|| format!("Failed to delete HA rule {name}"))?;
                log::info!("Deleted HA rule {} to change its type", name);
            }
            None
        }
        other => other,
    };

    let payload = params.payload();

    let Some(existing) = existing else {
        params.check_create_params()?;

        if mode.is_dry_run() {
            let outcome = ModuleOutcome::changed(format!("Would create HA rule {name}"))
                .with("rule", Value::Object(payload.clone()));
            return Ok(with_diff(outcome, &before, &payload));
        }

        api.post(RULES_PATH, &payload)
            .await
            .with_api_context(|| format!("Failed to create HA rule {name}"))?;
        log::info!("Created HA rule {}", name);

        let after = find_rule(list_rules(api).await?, name).unwrap_or_default();
        let outcome = ModuleOutcome::changed(format!("Created HA rule {name}"))
            .with("rule", Value::Object(after.clone()));
        return Ok(with_diff(outcome, &before, &after));
    };

    let before = normalize_rule(&existing);
    let mut after = before.clone();
    after.extend(payload.clone());

    if !differs_from(&before, &payload, &[]) {
        let outcome = ModuleOutcome::unchanged(format!("HA rule {name} is up to date"))
            .with("rule", Value::Object(after.clone()));
        return Ok(with_diff(outcome, &before, &after));
    }

    let outcome = if mode.is_dry_run() {
        ModuleOutcome::changed(format!("Would update HA rule {name}"))
    } else {
        api.put(&path, &payload)
            .await
            .with_api_context(|| format!("Failed to update HA rule {name}"))?;
        log::info!("Updated HA rule {}", name);
        ModuleOutcome::changed(format!("Updated HA rule {name}"))
    };

    Ok(with_diff(outcome.with("rule", Value::Object(after.clone())), &before, &after))
}

async fn rule_absent(
    api: &dyn ProxmoxApi,
    params: &HaRuleParams,
    existing: Option<ManagedObject>,
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    let name = params.name.as_str();
    let empty = ManagedObject::new();

    let Some(existing) = existing else {
        let outcome = ModuleOutcome::unchanged(format!("HA rule {name} is absent"));
        return Ok(with_diff(outcome, &empty, &empty));
    };

    if !mode.is_dry_run() {
        let path = format!("{}/{}", RULES_PATH, segment(name));
        api.delete(&path, &ApiParams::new())
            .await
            .with_api_context(|| format!("Failed to delete HA rule {name}"))?;
        log::info!("Deleted HA rule {}", name);
    }

    let outcome = ModuleOutcome::change(
        mode,
        format!("Deleted HA rule {name}"),
        format!("Would delete HA rule {name}"),
    );
    Ok(with_diff(outcome, &existing, &empty))
}
