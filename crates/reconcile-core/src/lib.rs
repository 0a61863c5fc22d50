//! Proxmox VE reconciliation engine
//!
//! Pieces shared by every resource module: the list differ, the DHCP range
//! overlap checker, static field tables, the execution mode and the
//! module result.

pub mod diff;
pub mod error;
pub mod interval;
pub mod mode;
pub mod outcome;
pub mod schema;

pub use diff::{diff, diff_by, differs_from, normalize, values_equal, ListDiff};
pub use error::{ApiResultExt, ReconcileError, SdnError};
pub use interval::{address_to_int, compare_ranges, plan_ranges, RangeComparison, RangePlan};
pub use mode::ExecutionMode;
pub use outcome::ModuleOutcome;
pub use schema::{FieldKind, FieldSpec, ResourceSchema};

/// Result type for reconcilers
pub type Result<T> = std::result::Result<T, ReconcileError>;
