//! Module argument files
//!
//! An argument file is a JSON object, either flat or wrapped the way
//! Ansible hands arguments to a module:
//! `{"ANSIBLE_MODULE_ARGS": {...}}`. Internal `_ansible_*` keys are
//! stripped; `_ansible_check_mode` selects a dry run.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::Value;

use pve_reconcile_core::ExecutionMode;
use pve_shared_types::{proxmox_to_ansible_bool, ManagedObject};

const WRAPPER_KEY: &str = "ANSIBLE_MODULE_ARGS";
const CHECK_MODE_KEY: &str = "_ansible_check_mode";
const INTERNAL_PREFIX: &str = "_ansible_";

/// Parsed module arguments
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleArgs {
    pub params: ManagedObject,
    pub mode: ExecutionMode,
}

impl ModuleArgs {
    pub fn from_value(value: Value) -> Result<Self> {
        let mut params = match value {
            Value::Object(mut object) => match object.remove(WRAPPER_KEY) {
                Some(Value::Object(inner)) => inner,
                Some(other) => bail!("{WRAPPER_KEY} must be an object, got {other}"),
                None => object,
            },
            other => bail!("module arguments must be a JSON object, got {other}"),
        };

        let check_mode = params
            .get(CHECK_MODE_KEY)
            .map_or(false, proxmox_to_ansible_bool);
        params.retain(|key, _| !key.starts_with(INTERNAL_PREFIX));

        Ok(Self {
            params,
            mode: ExecutionMode::from_check_mode(check_mode),
        })
    }

    /// `--check` on the command line forces a dry run.
    pub fn with_check(mut self, check: bool) -> Self {
        if check {
            self.mode = ExecutionMode::DryRun;
        }
        self
    }
}

pub fn load_args(path: &Path) -> Result<ModuleArgs> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read argument file {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse argument file {}", path.display()))?;
    ModuleArgs::from_value(value)
}
