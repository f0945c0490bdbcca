use crate::domain::money::Amount;
use crate::domain::payout::AccountStatus;
use crate::domain::ports::{PayoutProvider, ProviderAccountState, ProviderTransfer};
use crate::error::{MarketError, Result};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;

/// Stand-in for the external payout provider: deterministic references,
/// scriptable account status, and one-shot failure injection so tests can
/// exercise compensation and soft-failure paths.
#[derive(Default)]
pub struct SandboxProvider {
    state: Mutex<SandboxState>,
}

#[derive(Default)]
struct SandboxState {
    accounts: HashMap<String, ProviderAccountState>,
    next_transfer: u64,
    fail_create_account: bool,
    fail_transfer: bool,
}

impl SandboxProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `create_account` call fails once.
    pub fn fail_next_create_account(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_create_account = true;
        }
    }

    /// The next `create_transfer` call fails once.
    pub fn fail_next_transfer(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_transfer = true;
        }
    }

    /// Scripts the provider-side status returned by `fetch_account`.
    pub fn set_account_status(&self, provider_ref: &str, status: AccountStatus) {
        if let Ok(mut state) = self.state.lock() {
            let entry = state
                .accounts
                .entry(provider_ref.to_string())
                .or_insert_with(|| ProviderAccountState {
                    provider_ref: provider_ref.to_string(),
                    status,
                    context: json!({}),
                });
            entry.status = status;
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SandboxState>> {
        self.state
            .lock()
            .map_err(|_| MarketError::InvariantViolation("sandbox state poisoned".to_string()))
    }
}

#[async_trait]
impl PayoutProvider for SandboxProvider {
    async fn create_account(&self, seller_id: u64) -> Result<ProviderAccountState> {
        let mut state = self.lock()?;
        if state.fail_create_account {
            state.fail_create_account = false;
            return Err(MarketError::ExternalProviderFailure(
                "sandbox: account creation unavailable".to_string(),
            ));
        }
        let provider_ref = format!("acct_{seller_id}");
        let account = ProviderAccountState {
            provider_ref: provider_ref.clone(),
            status: AccountStatus::Pending,
            context: json!({ "seller_id": seller_id }),
        };
        state.accounts.insert(provider_ref, account.clone());
        Ok(account)
    }

    async fn delete_account(&self, provider_ref: &str) -> Result<()> {
        let mut state = self.lock()?;
        state.accounts.remove(provider_ref);
        Ok(())
    }

    async fn fetch_account(&self, provider_ref: &str) -> Result<ProviderAccountState> {
        let state = self.lock()?;
        state.accounts.get(provider_ref).cloned().ok_or_else(|| {
            MarketError::ExternalProviderFailure(format!(
                "sandbox: unknown account {provider_ref}"
            ))
        })
    }

    async fn create_transfer(
        &self,
        provider_ref: &str,
        amount: Amount,
        currency: &str,
    ) -> Result<ProviderTransfer> {
        let mut state = self.lock()?;
        if state.fail_transfer {
            state.fail_transfer = false;
            return Err(MarketError::ExternalProviderFailure(
                "sandbox: transfers unavailable".to_string(),
            ));
        }
        if !state.accounts.contains_key(provider_ref) {
            return Err(MarketError::ExternalProviderFailure(format!(
                "sandbox: unknown account {provider_ref}"
            )));
        }
        state.next_transfer += 1;
        let transfer_ref = format!("tr_{}", state.next_transfer);
        Ok(ProviderTransfer {
            transfer_ref: transfer_ref.clone(),
            payload: json!({
                "transfer_ref": transfer_ref,
                "destination": provider_ref,
                "amount": amount.value(),
                "currency": currency,
            }),
        })
    }
}
