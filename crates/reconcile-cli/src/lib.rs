//! Proxmox VE reconcile module runner
//!
//! Reads a module argument file, runs one resource module against the
//! cluster and reports the outcome as a single JSON object on stdout.

pub mod args;
pub mod commands;


pub use args::{load_args, ModuleArgs};
pub use commands::{execute, run_module, ModuleKind};
