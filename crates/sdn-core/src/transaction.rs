//! Global SDN lock protocol
//!
//! Every write under `/cluster/sdn` is staged under a cluster wide lock:
//! acquire the lock, make the staged writes with the lock token, then
//! either apply them (which releases the lock) or roll them back. No exit
//! path may leave the lock held; if the rollback itself fails the error
//! names the lock file an operator has to delete.

use std::future::Future;

use serde_json::Value;

use pve_api_client::{ApiError, ApiParams, ProxmoxApi};
use pve_reconcile_core::SdnError;
use pve_shared_types::{ansible_to_proxmox_bool, SdnLockToken, SDN_LOCK_FILE};

const LOCK_PATH: &str = "/cluster/sdn/lock";
const APPLY_PATH: &str = "/cluster/sdn";
const ROLLBACK_PATH: &str = "/cluster/sdn/rollback";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Locked,
    Applied,
    RolledBack,
}

impl LockState {
    pub fn holds_lock(&self) -> bool {
        matches!(self, LockState::Locked)
    }
}

/// Add the lock token to a staged write.
pub fn with_lock_token(mut params: ApiParams, token: &SdnLockToken) -> ApiParams {
    params.insert("lock-token".to_string(), Value::from(token.as_str()));
    params
}

pub struct SdnTransaction<'a> {
    api: &'a dyn ProxmoxApi,
    token: SdnLockToken,
    state: LockState,
    /// False for a token handed in by the caller.
    owned: bool,
}

impl<'a> SdnTransaction<'a> {
    /// `POST /cluster/sdn/lock`. Contention fails immediately, there is
    /// no retry.
    pub async fn acquire(api: &'a dyn ProxmoxApi) -> Result<SdnTransaction<'a>, SdnError> {
        log::debug!("Acquiring global SDN lock");

        let data = api
            .post(LOCK_PATH, &ApiParams::new())
            .await
            .map_err(|source| SdnError::LockHeldByOther { source })?;

        let token = match data {
            Value::String(token) if !token.is_empty() => SdnLockToken::new(token),
            other => {
                return Err(SdnError::LockHeldByOther {
                    source: ApiError::Parse(format!("lock endpoint returned no token: {other}")),
                })
            }
        };

        log::info!("Acquired global SDN lock");
        Ok(Self {
            api,
            token,
            state: LockState::Locked,
            owned: true,
        })
    }

    /// Continue under a lock acquired outside this run.
    pub fn adopt(api: &'a dyn ProxmoxApi, token: SdnLockToken) -> SdnTransaction<'a> {
        log::debug!("Using supplied SDN lock token");
        Self {
            api,
            token,
            state: LockState::Locked,
            owned: false,
        }
    }

    /// Release the lock without presenting a token, for manual recovery.
    pub async fn force_release(api: &dyn ProxmoxApi) -> Result<(), SdnError> {
        let mut params = ApiParams::new();
        params.insert("force".to_string(), Value::from(1));

        api.delete(LOCK_PATH, &params)
            .await
            .map_err(SdnError::release_failed)?;

        log::info!("Force released global SDN lock");
        Ok(())
    }

    pub fn token(&self) -> &SdnLockToken {
        &self.token
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    fn lock_params(&self, release: bool) -> ApiParams {
        let mut params = with_lock_token(ApiParams::new(), &self.token);
        params.insert(
            "release-lock".to_string(),
            Value::from(ansible_to_proxmox_bool(Some(release))),
        );
        params
    }

    /// `PUT /cluster/sdn`: apply everything staged under the token.
    ///
    /// A failed apply is rolled back before the error is returned, so an
    /// `ApplyFailed` error always means the lock was released.
    pub async fn apply_and_release(&mut self, release: bool) -> Result<(), SdnError> {
        log::debug!("Applying pending SDN changes");

        match self.api.put(APPLY_PATH, &self.lock_params(release)).await {
            Ok(_) => {
                self.state = if release {
                    LockState::Applied
                } else {
                    LockState::Locked
                };
                log::info!("Applied pending SDN changes");
                Ok(())
            }
            Err(source) => {
                log::warn!("Failed to apply SDN changes: {}", source);
                let cause = format!("Failed to apply SDN changes: {source}");
                self.rollback(true, Some(cause)).await?;
                Err(SdnError::ApplyFailed { source })
            }
        }
    }

    /// `POST /cluster/sdn/rollback`: drop everything staged under the token.
    pub async fn rollback_and_release(&mut self, release: bool) -> Result<(), SdnError> {
        self.rollback(release, None).await
    }

    async fn rollback(&mut self, release: bool, cause: Option<String>) -> Result<(), SdnError> {
        log::debug!("Rolling back pending SDN changes");

        match self.api.post(ROLLBACK_PATH, &self.lock_params(release)).await {
            Ok(_) => {
                self.state = if release {
                    LockState::RolledBack
                } else {
                    LockState::Locked
                };
                log::info!("Rolled back pending SDN changes");
                Ok(())
            }
            Err(source) => {
                log::error!(
                    "Rollback of SDN changes failed, lock file {} must be removed by hand",
                    SDN_LOCK_FILE
                );
                Err(SdnError::lock_stale(source, cause))
            }
        }
    }

    /// `DELETE /cluster/sdn/lock` without applying anything.
    pub async fn release_lock(&mut self, force: bool) -> Result<(), SdnError> {
        let mut params = with_lock_token(ApiParams::new(), &self.token);
        if force {
            params.insert("force".to_string(), Value::from(1));
        }

        self.api
            .delete(LOCK_PATH, &params)
            .await
            .map_err(SdnError::release_failed)?;

        self.state = LockState::Unlocked;
        log::info!("Released global SDN lock");
        Ok(())
    }

    /// Undo after a failed staged write and describe what failed.
    pub async fn abort(&mut self, context: impl Into<String>, source: ApiError) -> SdnError {
        let context = context.into();
        log::warn!("{}: {}", context, source);

        match self.rollback(true, Some(format!("{context}: {source}"))).await {
            Ok(()) => SdnError::MutationFailed { context, source },
            Err(stale) => stale,
        }
    }

    /// Run `mutate` under the SDN lock and apply its staged writes, or
    /// roll them back if it fails. `lock_token` continues under a lock
    /// the caller already holds.
    pub async fn commit<F, Fut, T>(
        api: &'a dyn ProxmoxApi,
        lock_token: Option<&SdnLockToken>,
        context: &str,
        mutate: F,
    ) -> Result<T, SdnError>
    where
        F: FnOnce(SdnLockToken) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut transaction = match lock_token {
            Some(token) => Self::adopt(api, token.clone()),
            None => Self::acquire(api).await?,
        };

        match mutate(transaction.token.clone()).await {
            Ok(value) => {
                transaction.apply_and_release(true).await?;
                Ok(value)
            }
            Err(err) => Err(transaction.abort(context, err).await),
        }
    }
}

impl Drop for SdnTransaction<'_> {
    fn drop(&mut self) {
        if self.owned && self.state.holds_lock() {
            log::warn!(
                "SDN lock still held at end of run, clear it by deleting {}",
                SDN_LOCK_FILE
            );
        }
    }
}
