//! Module result as printed on stdout

use serde::Serialize;
use serde_json::Value;

use pve_shared_types::ManagedObject;

use crate::mode::ExecutionMode;

fn is_false(flag: &bool) -> bool {
    !*flag
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModuleOutcome {
    pub changed: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub failed: bool,
    pub msg: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
    /// Resource specific return values.
    #[serde(flatten)]
    pub data: ManagedObject,
}

impl ModuleOutcome {
    pub fn changed(msg: impl Into<String>) -> Self {
        Self {
            changed: true,
            msg: msg.into(),
            ..Default::default()
        }
    }

    pub fn unchanged(msg: impl Into<String>) -> Self {
        Self {
            changed: false,
            msg: msg.into(),
            ..Default::default()
        }
    }

    /// A change that was made, or would be made in dry-run.
    pub fn change(mode: ExecutionMode, applied: impl Into<String>, preview: impl Into<String>) -> Self {
        match mode {
            ExecutionMode::Apply => Self::changed(applied),
            ExecutionMode::DryRun => Self::changed(preview),
        }
    }

    /// Failed result carrying the full error chain.
    pub fn failure(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }

        Self {
            failed: true,
            msg: err.to_string(),
            exception: if chain.is_empty() {
                None
            } else {
                Some(chain.join("\nCaused by: "))
            },
            ..Default::default()
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_warnings<I>(mut self, warnings: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        self.warnings.extend(warnings);
        self
    }
}
