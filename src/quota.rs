//! 配额账本：按账户计数的昂贵操作剩余次数。
//!
//! # Quota Ledger
//!
//! Each account owns one integer counter under `quotas:<account>`. It is
//! provisioned to the configured maximum with a conditional write, so a live
//! counter is never reset, and it expires after the provisioning lifespan, at
//! which point the next access provisions it again.
//!
//! The counter is a soft cap: the gate check and the charge are separate
//! store operations, so concurrent misses can both pass the gate and drive
//! the counter below zero.

use crate::cache::{ttl_from_secs, KeyValueStore, Namespace};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Units granted per provisioning window.
    pub max_quota: i64,
    /// Provisioning window, in seconds.
    pub lifespan_secs: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_quota: 10,
            lifespan_secs: 60 * 60 * 24 * 7,
        }
    }
}

impl QuotaConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_quota <= 0 {
            return Err(Error::configuration(
                "max quota must be positive",
                ErrorContext::new()
                    .with_field_path("quota.max_quota")
                    .with_details(self.max_quota.to_string()),
            ));
        }
        if self.lifespan_secs == 0 {
            return Err(Error::configuration(
                "quota lifespan must be non-zero",
                ErrorContext::new().with_field_path("quota.lifespan_secs"),
            ));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct QuotaLedger {
    store: Arc<dyn KeyValueStore>,
    config: QuotaConfig,
}

impl QuotaLedger {
    pub fn new(store: Arc<dyn KeyValueStore>, config: QuotaConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    fn key(account_id: &str) -> String {
        Namespace::Quotas.key(account_id).to_string()
    }

    /// Provision the default maximum if the account has no live counter.
    ///
    /// Returns whether this call wrote the counter. Safe to call on every request.
    pub async fn ensure_provisioned(&self, account_id: &str) -> Result<bool> {
        let key = Self::key(account_id);
        if self.store.get(&key).await?.is_some() {
            return Ok(false);
        }
        let written = self
            .store
            .set_if_absent(
                &key,
                &self.config.max_quota.to_string(),
                ttl_from_secs(self.config.lifespan_secs),
            )
            .await?;
        if written {
            info!(account_id, quota = self.config.max_quota, "provisioned quota");
        }
        Ok(written)
    }

    /// Remaining units. A missing counter is [`Error::NotFound`] and an
    /// unparsable one [`Error::InvalidCounter`]; both mean "provision first".
    pub async fn remaining(&self, account_id: &str) -> Result<i64> {
        let key = Self::key(account_id);
        let raw = self
            .store
            .get(&key)
            .await?
            .ok_or_else(|| Error::not_found(key.clone()))?;
        raw.trim().parse().map_err(|_| Error::InvalidCounter { key, value: raw })
    }

    /// Overwrite the counter with the default maximum and a fresh lifespan.
    ///
    /// Only for counters that can no longer be read as integers.
    pub async fn reset(&self, account_id: &str) -> Result<i64> {
        self.store
            .set(
                &Self::key(account_id),
                &self.config.max_quota.to_string(),
                ttl_from_secs(self.config.lifespan_secs),
            )
            .await?;
        warn!(account_id, quota = self.config.max_quota, "reset unreadable quota counter");
        Ok(self.config.max_quota)
    }

    /// Remaining units as stored, provisioning an absent counter and
    /// resetting an unparsable one first.
    pub async fn current(&self, account_id: &str) -> Result<i64> {
        self.ensure_provisioned(account_id).await?;
        match self.remaining(account_id).await {
            Err(Error::InvalidCounter { .. }) => self.reset(account_id).await,
            // Expired between the two reads.
            Err(Error::NotFound { .. }) => {
                self.ensure_provisioned(account_id).await?;
                self.remaining(account_id).await
            }
            other => other,
        }
    }

    /// Spend one unit. Only call from inside the compute step of a miss that
    /// invokes the model, never on a hit.
    ///
    /// A counter that expired or became unreadable since the gate check is
    /// provisioned again and then charged, so finished work is never lost.
    pub async fn charge(&self, account_id: &str) -> Result<i64> {
        let key = Self::key(account_id);
        let left = match self.store.decrement(&key).await {
            Ok(left) => left,
            Err(e @ (Error::NotFound { .. } | Error::InvalidCounter { .. })) => {
                warn!(account_id, error = %e, "quota counter unusable at charge; provisioning again");
                if e.is_not_found() {
                    self.ensure_provisioned(account_id).await?;
                } else {
                    self.reset(account_id).await?;
                }
                self.store.decrement(&key).await?
            }
            Err(e) => return Err(e),
        };
        info!(account_id, remaining = left, "charged quota");
        Ok(left)
    }

    /// Admission check for an expensive operation, run before any cache lookup.
    ///
    /// Provisions the counter if needed and rejects with
    /// [`Error::QuotaExhausted`] when nothing is left.
    pub async fn check(&self, account_id: &str) -> Result<i64> {
        let remaining = self.current(account_id).await?;
        if remaining <= 0 {
            debug!(account_id, remaining, "rejecting request: quota exhausted");
            return Err(Error::QuotaExhausted {
                account_id: account_id.to_string(),
                remaining,
            });
        }
        Ok(remaining)
    }
}
