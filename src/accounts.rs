//! Account and session records.
//!
//! `accounts:<id>` holds the account email without expiry and `sessions:<id>`
//! marks a live login until its TTL runs out or the account logs out. Identity
//! verification happens upstream; this module trusts the account ID it is given.

use crate::cache::{ttl_from_secs, KeyValueStore, Namespace};
use crate::quota::QuotaLedger;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountDetails {
    pub account_id: String,
    pub email: String,
    pub quota: i64,
}

#[derive(Clone)]
pub struct AccountRegistry {
    store: Arc<dyn KeyValueStore>,
    ledger: QuotaLedger,
    session_lifespan_secs: u64,
}

impl AccountRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>, ledger: QuotaLedger, session_lifespan_secs: u64) -> Self {
        Self {
            store,
            ledger,
            session_lifespan_secs,
        }
    }

    /// Record a verified login: email, session marker, and a quota if the
    /// account has none yet.
    pub async fn login(&self, account_id: &str, email: &str) -> Result<()> {
        self.store
            .set(Namespace::Accounts.key(account_id).as_str(), email, None)
            .await?;
        self.store
            .set(
                Namespace::Sessions.key(account_id).as_str(),
                "",
                ttl_from_secs(self.session_lifespan_secs),
            )
            .await?;
        self.ledger.ensure_provisioned(account_id).await?;
        info!(account_id, "account logged in");
        Ok(())
    }

    pub async fn has_session(&self, account_id: &str) -> Result<bool> {
        Ok(self
            .store
            .get(Namespace::Sessions.key(account_id).as_str())
            .await?
            .is_some())
    }

    /// Email and remaining quota as stored.
    ///
    /// A missing quota is provisioned and an unreadable one is reset to the
    /// maximum before it is reported.
    pub async fn details(&self, account_id: &str) -> Result<AccountDetails> {
        let email_key = Namespace::Accounts.key(account_id);
        let email = self
            .store
            .get(email_key.as_str())
            .await?
            .ok_or_else(|| Error::not_found(email_key.as_str()))?;

        let quota = self.ledger.current(account_id).await?;

        Ok(AccountDetails {
            account_id: account_id.to_string(),
            email,
            quota,
        })
    }

    /// End the session. The account record and quota are kept.
    pub async fn logout(&self, account_id: &str) -> Result<bool> {
        let existed = self
            .store
            .delete(Namespace::Sessions.key(account_id).as_str())
            .await?;
        info!(account_id, existed, "account logged out");
        Ok(existed)
    }
}
