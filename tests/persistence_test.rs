#![cfg(feature = "storage-rocksdb")]

//! Payout lifecycle against the RocksDB store, including a reopen to
//! verify everything that matters survives a process restart.

use cartsplit::application::onboarding::OnboardingService;
use cartsplit::application::payouts::{CreatePayoutInput, PayoutEngine};
use cartsplit::application::webhooks::WebhookReconciler;
use cartsplit::domain::events::ProviderEvent;
use cartsplit::domain::money::Amount;
use cartsplit::domain::payout::{AccountStatus, LedgerRef, NewPayoutTransaction, PayoutStatus};
use cartsplit::domain::ports::{PayoutStore, PayoutStoreRef};
use cartsplit::infrastructure::provider::SandboxProvider;
use cartsplit::infrastructure::rocksdb::RocksDbPayoutStore;
use rust_decimal_macros::dec;
use serde_json::Value;
use std::sync::Arc;
use tempfile::tempdir;

#[tokio::test]
async fn test_payout_lifecycle_survives_reopen() {
    let dir = tempdir().unwrap();
    let provider = Arc::new(SandboxProvider::new());
    let account_id;
    let payout_id;

    {
        let store: PayoutStoreRef = Arc::new(RocksDbPayoutStore::open(dir.path()).unwrap());
        let onboarding = OnboardingService::new(store.clone(), provider.clone());
        let engine = PayoutEngine::new(store.clone(), provider.clone());
        let reconciler = WebhookReconciler::new(store.clone());

        let ids = onboarding.initialize_onboarding(42).await.unwrap();
        account_id = ids.account_id;

        reconciler
            .handle(ProviderEvent::AccountActivated {
                account_ref: "acct_42".to_string(),
                context: Value::Null,
            })
            .await
            .unwrap();

        engine
            .add_transactions(
                account_id,
                vec![NewPayoutTransaction {
                    amount: dec!(100.0),
                    currency: "usd".to_string(),
                    reference: Some(LedgerRef::new("order", "1")),
                }],
            )
            .await
            .unwrap();

        let outcome = engine
            .create_payout(CreatePayoutInput {
                account_id,
                amount: Amount::new(dec!(60.0)).unwrap(),
                currency: "usd".to_string(),
            })
            .await
            .unwrap();
        payout_id = outcome.payout.unwrap().id;
    }

    // New store handle over the same directory, as after a restart.
    let store: PayoutStoreRef = Arc::new(RocksDbPayoutStore::open(dir.path()).unwrap());
    let engine = PayoutEngine::new(store.clone(), provider.clone());
    let reconciler = WebhookReconciler::new(store.clone());

    let account = store.get_account(account_id).await.unwrap().unwrap();
    assert_eq!(account.status, AccountStatus::Active);
    assert_eq!(account.provider_ref.as_deref(), Some("acct_42"));

    let payout = store.get_payout(payout_id).await.unwrap().unwrap();
    assert_eq!(payout.status, PayoutStatus::Pending);
    let transfer_ref = payout.provider_ref.clone().unwrap();

    // Replayed order credit is still deduplicated after the reopen.
    let appended = engine
        .add_transactions(
            account_id,
            vec![NewPayoutTransaction {
                amount: dec!(100.0),
                currency: "usd".to_string(),
                reference: Some(LedgerRef::new("order", "1")),
            }],
        )
        .await
        .unwrap();
    assert_eq!(appended, 0);

    reconciler
        .handle(ProviderEvent::PayoutSettled {
            transfer_ref: transfer_ref.clone(),
        })
        .await
        .unwrap();
    // Settling twice must not debit the ledger twice.
    reconciler
        .handle(ProviderEvent::PayoutSettled { transfer_ref })
        .await
        .unwrap();

    let settled = store.get_payout(payout_id).await.unwrap().unwrap();
    assert_eq!(settled.status, PayoutStatus::Settled);
    assert_eq!(
        engine.balance(account_id).await.unwrap().get("usd"),
        Some(&dec!(40.0))
    );
}

#[tokio::test]
async fn test_reversal_credits_durable_ledger() {
    let dir = tempdir().unwrap();
    let provider = Arc::new(SandboxProvider::new());
    let store: PayoutStoreRef = Arc::new(RocksDbPayoutStore::open(dir.path()).unwrap());
    let onboarding = OnboardingService::new(store.clone(), provider.clone());
    let engine = PayoutEngine::new(store.clone(), provider.clone());
    let reconciler = WebhookReconciler::new(store.clone());

    let ids = onboarding.initialize_onboarding(7).await.unwrap();
    reconciler
        .handle(ProviderEvent::AccountActivated {
            account_ref: "acct_7".to_string(),
            context: Value::Null,
        })
        .await
        .unwrap();
    engine
        .add_transactions(
            ids.account_id,
            vec![NewPayoutTransaction {
                amount: dec!(80.0),
                currency: "usd".to_string(),
                reference: None,
            }],
        )
        .await
        .unwrap();

    let outcome = engine
        .create_payout(CreatePayoutInput {
            account_id: ids.account_id,
            amount: Amount::new(dec!(80.0)).unwrap(),
            currency: "usd".to_string(),
        })
        .await
        .unwrap();
    let payout = outcome.payout.unwrap();
    let transfer_ref = payout.provider_ref.clone().unwrap();

    reconciler
        .handle(ProviderEvent::PayoutSettled {
            transfer_ref: transfer_ref.clone(),
        })
        .await
        .unwrap();
    let event = ProviderEvent::PayoutReversed {
        transfer_ref,
        reversal_ref: "rev_1".to_string(),
        amount: dec!(30.0),
        currency: "usd".to_string(),
    };
    reconciler.handle(event.clone()).await.unwrap();
    // Replay of the same reversal is a no-op.
    reconciler.handle(event).await.unwrap();

    assert_eq!(store.reversals_for(payout.id).await.unwrap().len(), 1);
    assert_eq!(
        engine.balance(ids.account_id).await.unwrap().get("usd"),
        Some(&dec!(30.0))
    );
}
