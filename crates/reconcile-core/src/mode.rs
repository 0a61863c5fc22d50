use std::fmt;

/// Whether a module run may mutate the cluster.
///
/// In `DryRun` every read and comparison still happens; writes are
/// replaced by a description of what would have been done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    #[default]
    Apply,
    DryRun,
}

impl ExecutionMode {
    pub fn from_check_mode(check_mode: bool) -> Self {
        if check_mode {
            ExecutionMode::DryRun
        } else {
            ExecutionMode::Apply
        }
    }

    pub fn is_dry_run(&self) -> bool {
        matches!(self, ExecutionMode::DryRun)
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Apply => write!(f, "apply"),
            ExecutionMode::DryRun => write!(f, "dry-run"),
        }
    }
}
