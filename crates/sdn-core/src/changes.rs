//! Pending SDN changes: apply, revert, or clear a stuck lock

use serde::Deserialize;

use pve_api_client::ProxmoxApi;
use pve_reconcile_core::{ExecutionMode, ModuleOutcome, ReconcileError, Result};
use pve_shared_types::SdnLockToken;

use crate::transaction::SdnTransaction;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangesState {
    #[default]
    Apply,
    Revert,
    Unlock,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangesParams {
    #[serde(default)]
    pub state: ChangesState,
    #[serde(default)]
    pub lock_token: Option<SdnLockToken>,
    /// Release the lock without a token.
    #[serde(default)]
    pub force: bool,
}

pub async fn run(
    api: &dyn ProxmoxApi,
    params: ChangesParams,
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    match params.state {
        ChangesState::Apply => {
            if mode.is_dry_run() {
                return Ok(ModuleOutcome::changed("Would apply pending SDN changes"));
            }
            let mut transaction = open(api, params.lock_token).await?;
            transaction.apply_and_release(true).await?;
            Ok(ModuleOutcome::changed("Applied pending SDN changes"))
        }
        ChangesState::Revert => {
            if mode.is_dry_run() {
                return Ok(ModuleOutcome::changed("Would revert pending SDN changes"));
            }
            let mut transaction = open(api, params.lock_token).await?;
            transaction.rollback_and_release(true).await?;
            Ok(ModuleOutcome::changed("Reverted pending SDN changes"))
        }
        ChangesState::Unlock => unlock(api, params, mode).await,
    }
}

async fn open(
    api: &dyn ProxmoxApi,
    token: Option<SdnLockToken>,
) -> Result<SdnTransaction<'_>> {
    Ok(match token {
        Some(token) => SdnTransaction::adopt(api, token),
        None => SdnTransaction::acquire(api).await?,
    })
}

async fn unlock(
    api: &dyn ProxmoxApi,
    params: ChangesParams,
    mode: ExecutionMode,
) -> Result<ModuleOutcome> {
    match (params.lock_token, params.force) {
        (_, true) => {
            if mode.is_dry_run() {
                return Ok(ModuleOutcome::changed("Would force release the SDN lock"));
            }
            SdnTransaction::force_release(api).await?;
            Ok(ModuleOutcome::changed("Force released the SDN lock"))
        }
        (Some(token), false) => {
            if mode.is_dry_run() {
                return Ok(ModuleOutcome::changed("Would release the SDN lock"));
            }
            SdnTransaction::adopt(api, token).release_lock(false).await?;
            Ok(ModuleOutcome::changed("Released the SDN lock"))
        }
        (None, false) => Err(ReconcileError::validation(
            "releasing the SDN lock needs lock_token or force",
        )),
    }
}
