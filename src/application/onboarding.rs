use crate::application::saga::{Saga, SagaStep};
use crate::domain::payout::PayoutAccount;
use crate::domain::ports::{PayoutProviderRef, PayoutStoreRef, ProviderAccountState};
use crate::error::{MarketError, Result};
use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};

/// Ids returned by a successful onboarding initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnboardingIds {
    pub account_id: u64,
    pub onboarding_id: u64,
}

/// Provisions payout accounts against the external provider.
///
/// Initialization runs as a saga: the local pending account is created
/// first, then the provider identity. A provider failure compensates by
/// deleting the local rows so a retry starts from a clean slate.
pub struct OnboardingService {
    store: PayoutStoreRef,
    provider: PayoutProviderRef,
}

impl OnboardingService {
    pub fn new(store: PayoutStoreRef, provider: PayoutProviderRef) -> Self {
        Self { store, provider }
    }

    /// Creates a pending payout account plus its onboarding record for a
    /// seller that does not have one yet. A second call for the same
    /// seller is a caller error, never a silent duplicate.
    pub async fn initialize_onboarding(&self, seller_id: u64) -> Result<OnboardingIds> {
        if let Some(existing) = self.store.account_by_seller(seller_id).await? {
            return Err(MarketError::InvalidState(format!(
                "seller {seller_id} already has payout account {}",
                existing.id
            )));
        }

        let draft: Arc<Mutex<Option<OnboardingIds>>> = Arc::new(Mutex::new(None));
        let saga = Saga::new(vec![
            Box::new(CreateLocalAccount {
                store: self.store.clone(),
                seller_id,
                draft: draft.clone(),
            }),
            Box::new(ProvisionProviderIdentity {
                store: self.store.clone(),
                provider: self.provider.clone(),
                seller_id,
                draft: draft.clone(),
            }),
        ]);
        saga.run().await?;

        let ids = draft
            .lock()
            .map_err(|_| MarketError::InvariantViolation("poisoned onboarding draft".to_string()))?
            .ok_or_else(|| {
                MarketError::InvariantViolation(
                    "onboarding saga completed without recording ids".to_string(),
                )
            })?;

        tracing::info!(
            seller_id,
            account_id = ids.account_id,
            "payout account onboarding initialized"
        );
        Ok(ids)
    }

    /// Pulls the current provider-side status and merges it into the
    /// local account. Besides the webhook reconciler this is the only
    /// path allowed to transition status away from pending.
    pub async fn sync_account(&self, account_id: u64) -> Result<PayoutAccount> {
        let mut account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or_else(|| MarketError::not_found("payout account", account_id))?;
        let provider_ref = account.provider_ref.clone().ok_or_else(|| {
            MarketError::InvalidState(format!(
                "payout account {account_id} has no provider identity to sync"
            ))
        })?;

        // Status check and merge happen around the call, never while a
        // store lock is held.
        let state = self.provider.fetch_account(&provider_ref).await?;

        if !account.status.can_transition(state.status) {
            return Err(MarketError::InvalidState(format!(
                "payout account {account_id} cannot move from {:?} to {:?}",
                account.status, state.status
            )));
        }
        account.status = state.status;
        account.context = state.context;
        self.store.update_account(account.clone()).await?;
        Ok(account)
    }
}

struct CreateLocalAccount {
    store: PayoutStoreRef,
    seller_id: u64,
    draft: Arc<Mutex<Option<OnboardingIds>>>,
}

#[async_trait]
impl SagaStep for CreateLocalAccount {
    fn name(&self) -> &str {
        "create-local-account"
    }

    async fn forward(&self) -> Result<()> {
        let mut account = self.store.insert_account(self.seller_id).await?;
        let onboarding = self
            .store
            .insert_onboarding(account.id, json!({ "seller_id": self.seller_id }))
            .await?;
        account.onboarding_id = Some(onboarding.id);
        self.store.update_account(account.clone()).await?;
        if let Ok(mut draft) = self.draft.lock() {
            *draft = Some(OnboardingIds {
                account_id: account.id,
                onboarding_id: onboarding.id,
            });
        }
        Ok(())
    }

    async fn compensate(&self) -> Result<()> {
        let ids = self.draft.lock().ok().and_then(|d| *d);
        if let Some(ids) = ids {
            self.store.delete_account(ids.account_id).await?;
        }
        Ok(())
    }
}

struct ProvisionProviderIdentity {
    store: PayoutStoreRef,
    provider: PayoutProviderRef,
    seller_id: u64,
    draft: Arc<Mutex<Option<OnboardingIds>>>,
}

impl ProvisionProviderIdentity {
    async fn persist_identity(&self, account_id: u64, state: ProviderAccountState) -> Result<()> {
        let mut account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or_else(|| MarketError::not_found("payout account", account_id))?;
        account.provider_ref = Some(state.provider_ref);
        account.context = state.context;
        self.store.update_account(account).await
    }
}

#[async_trait]
impl SagaStep for ProvisionProviderIdentity {
    fn name(&self) -> &str {
        "provision-provider-identity"
    }

    async fn forward(&self) -> Result<()> {
        let ids = self.draft.lock().ok().and_then(|d| *d).ok_or_else(|| {
            MarketError::InvariantViolation(
                "provider step ran before local account creation".to_string(),
            )
        })?;
        let state = self.provider.create_account(self.seller_id).await?;
        let provider_ref = state.provider_ref.clone();

        // The saga only compensates completed steps, so a persist
        // failure here must undo this step's own provider-side effect
        // or the provider account is orphaned.
        if let Err(err) = self.persist_identity(ids.account_id, state).await {
            if let Err(cleanup) = self.provider.delete_account(&provider_ref).await {
                tracing::error!(
                    %provider_ref,
                    error = %cleanup,
                    "failed to remove provider account after persist failure"
                );
            }
            return Err(err);
        }
        Ok(())
    }

    async fn compensate(&self) -> Result<()> {
        let ids = self.draft.lock().ok().and_then(|d| *d);
        if let Some(ids) = ids
            && let Some(account) = self.store.get_account(ids.account_id).await?
            && let Some(provider_ref) = account.provider_ref
        {
            self.provider.delete_account(&provider_ref).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payout::{
        AccountStatus, NewPayoutTransaction, OnboardingRecord, Payout, PayoutReversal,
        PayoutTransaction,
    };
    use crate::domain::ports::{PayoutProvider, PayoutStore};
    use crate::infrastructure::in_memory::InMemoryPayoutStore;
    use crate::infrastructure::provider::SandboxProvider;
    use rust_decimal::Decimal;
    use serde_json::Value;
    use std::collections::BTreeMap;

    /// Store whose `update_account` fails once the provider identity is
    /// attached, to exercise the provider-side cleanup path.
    struct FailingIdentityStore {
        inner: InMemoryPayoutStore,
    }

    #[async_trait]
    impl PayoutStore for FailingIdentityStore {
        async fn insert_account(&self, seller_id: u64) -> Result<PayoutAccount> {
            self.inner.insert_account(seller_id).await
        }
        async fn get_account(&self, id: u64) -> Result<Option<PayoutAccount>> {
            self.inner.get_account(id).await
        }
        async fn account_by_seller(&self, seller_id: u64) -> Result<Option<PayoutAccount>> {
            self.inner.account_by_seller(seller_id).await
        }
        async fn account_by_provider_ref(
            &self,
            provider_ref: &str,
        ) -> Result<Option<PayoutAccount>> {
            self.inner.account_by_provider_ref(provider_ref).await
        }
        async fn update_account(&self, account: PayoutAccount) -> Result<()> {
            if account.provider_ref.is_some() {
                return Err(std::io::Error::other("disk full").into());
            }
            self.inner.update_account(account).await
        }
        async fn delete_account(&self, id: u64) -> Result<()> {
            self.inner.delete_account(id).await
        }
        async fn insert_onboarding(&self, account_id: u64, data: Value) -> Result<OnboardingRecord> {
            self.inner.insert_onboarding(account_id, data).await
        }
        async fn append_transactions(
            &self,
            account_id: u64,
            transactions: Vec<NewPayoutTransaction>,
        ) -> Result<usize> {
            self.inner.append_transactions(account_id, transactions).await
        }
        async fn transactions_for(&self, account_id: u64) -> Result<Vec<PayoutTransaction>> {
            self.inner.transactions_for(account_id).await
        }
        async fn balance(&self, account_id: u64) -> Result<BTreeMap<String, Decimal>> {
            self.inner.balance(account_id).await
        }
        async fn insert_payout(&self, payout: Payout) -> Result<Payout> {
            self.inner.insert_payout(payout).await
        }
        async fn get_payout(&self, id: u64) -> Result<Option<Payout>> {
            self.inner.get_payout(id).await
        }
        async fn payout_by_provider_ref(&self, provider_ref: &str) -> Result<Option<Payout>> {
            self.inner.payout_by_provider_ref(provider_ref).await
        }
        async fn update_payout(&self, payout: Payout) -> Result<()> {
            self.inner.update_payout(payout).await
        }
        async fn insert_reversal(&self, reversal: PayoutReversal) -> Result<PayoutReversal> {
            self.inner.insert_reversal(reversal).await
        }
        async fn reversals_for(&self, payout_id: u64) -> Result<Vec<PayoutReversal>> {
            self.inner.reversals_for(payout_id).await
        }
        async fn reversal_by_provider_ref(
            &self,
            provider_ref: &str,
        ) -> Result<Option<PayoutReversal>> {
            self.inner.reversal_by_provider_ref(provider_ref).await
        }
    }

    fn service() -> (OnboardingService, PayoutStoreRef, Arc<SandboxProvider>) {
        let store: PayoutStoreRef = Arc::new(InMemoryPayoutStore::new());
        let provider = Arc::new(SandboxProvider::new());
        (
            OnboardingService::new(store.clone(), provider.clone()),
            store,
            provider,
        )
    }

    #[tokio::test]
    async fn test_initialize_creates_pending_account() {
        let (service, store, _provider) = service();
        let ids = service.initialize_onboarding(42).await.unwrap();

        let account = store.get_account(ids.account_id).await.unwrap().unwrap();
        assert_eq!(account.seller_id, 42);
        assert_eq!(account.status, AccountStatus::Pending);
        assert!(account.provider_ref.is_some());
        assert_eq!(account.onboarding_id, Some(ids.onboarding_id));
    }

    #[tokio::test]
    async fn test_second_initialize_is_caller_error() {
        let (service, _store, _provider) = service();
        service.initialize_onboarding(42).await.unwrap();
        assert!(matches!(
            service.initialize_onboarding(42).await,
            Err(MarketError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_provider_failure_rolls_back_local_account() {
        let (service, store, provider) = service();
        provider.fail_next_create_account();

        assert!(matches!(
            service.initialize_onboarding(42).await,
            Err(MarketError::ExternalProviderFailure(_))
        ));
        // Compensation removed the half-created account; a retry works.
        assert!(store.account_by_seller(42).await.unwrap().is_none());
        service.initialize_onboarding(42).await.unwrap();
    }

    #[tokio::test]
    async fn test_persist_failure_removes_provider_account() {
        let store: PayoutStoreRef = Arc::new(FailingIdentityStore {
            inner: InMemoryPayoutStore::new(),
        });
        let provider = Arc::new(SandboxProvider::new());
        let service = OnboardingService::new(store.clone(), provider.clone());

        assert!(matches!(
            service.initialize_onboarding(42).await,
            Err(MarketError::IoError(_))
        ));
        // Neither side keeps a half-provisioned account.
        assert!(store.account_by_seller(42).await.unwrap().is_none());
        assert!(provider.fetch_account("acct_42").await.is_err());
    }

    #[tokio::test]
    async fn test_sync_merges_provider_status() {
        let (service, store, provider) = service();
        let ids = service.initialize_onboarding(42).await.unwrap();
        let account = store.get_account(ids.account_id).await.unwrap().unwrap();
        provider.set_account_status(
            account.provider_ref.as_deref().unwrap(),
            AccountStatus::Active,
        );

        let synced = service.sync_account(ids.account_id).await.unwrap();
        assert_eq!(synced.status, AccountStatus::Active);
    }

    #[tokio::test]
    async fn test_sync_rejects_illegal_transition() {
        let (service, store, provider) = service();
        let ids = service.initialize_onboarding(42).await.unwrap();
        let mut account = store.get_account(ids.account_id).await.unwrap().unwrap();
        account.status = AccountStatus::Rejected;
        store.update_account(account.clone()).await.unwrap();
        provider.set_account_status(
            account.provider_ref.as_deref().unwrap(),
            AccountStatus::Active,
        );

        assert!(matches!(
            service.sync_account(ids.account_id).await,
            Err(MarketError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_sync_without_provider_identity() {
        let (service, store, _provider) = service();
        let account = store.insert_account(7).await.unwrap();
        assert!(matches!(
            service.sync_account(account.id).await,
            Err(MarketError::InvalidState(_))
        ));
    }
}
