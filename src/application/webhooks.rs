use crate::domain::events::{ProviderEvent, ProviderWebhook};
use crate::domain::money::Amount;
use crate::domain::payout::{
    AccountStatus, LedgerRef, NewPayoutTransaction, PayoutStatus,
};
use crate::domain::ports::PayoutStoreRef;
use crate::error::{MarketError, Result};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

/// Applies asynchronous provider events to local state exactly once.
///
/// Delivery is at-least-once and out-of-order-tolerant: every handler is
/// idempotent against replay (status-transition checks on accounts and
/// payouts, reference-pair uniqueness on the ledger), and illegal
/// transitions are logged and ignored rather than treated as fatal.
pub struct WebhookReconciler {
    store: PayoutStoreRef,
}

impl WebhookReconciler {
    pub fn new(store: PayoutStoreRef) -> Self {
        Self { store }
    }

    pub async fn handle(&self, event: ProviderEvent) -> Result<()> {
        match event {
            ProviderEvent::AccountActivated {
                account_ref,
                context,
            } => {
                self.transition_account(&account_ref, AccountStatus::Active, Some(context))
                    .await
            }
            ProviderEvent::AccountRejected {
                account_ref,
                reason,
            } => {
                if let Some(reason) = &reason {
                    tracing::info!(account_ref, reason, "provider rejected payout account");
                }
                self.transition_account(&account_ref, AccountStatus::Rejected, None)
                    .await
            }
            ProviderEvent::PayoutSettled { transfer_ref } => self.settle_payout(&transfer_ref).await,
            ProviderEvent::PayoutReversed {
                transfer_ref,
                reversal_ref,
                amount,
                currency,
            } => {
                self.reverse_payout(&transfer_ref, &reversal_ref, amount, &currency)
                    .await
            }
        }
    }

    async fn transition_account(
        &self,
        account_ref: &str,
        to: AccountStatus,
        context: Option<serde_json::Value>,
    ) -> Result<()> {
        let mut account = self
            .store
            .account_by_provider_ref(account_ref)
            .await?
            .ok_or_else(|| MarketError::not_found("payout account", account_ref))?;

        if !account.status.can_transition(to) {
            tracing::warn!(
                account_ref,
                from = ?account.status,
                ?to,
                "ignoring illegal payout account transition"
            );
            return Ok(());
        }
        if account.status == to {
            // Replayed event.
            return Ok(());
        }
        account.status = to;
        if let Some(context) = context {
            account.context = context;
        }
        self.store.update_account(account).await
    }

    async fn settle_payout(&self, transfer_ref: &str) -> Result<()> {
        let mut payout = self
            .store
            .payout_by_provider_ref(transfer_ref)
            .await?
            .ok_or_else(|| MarketError::not_found("payout", transfer_ref))?;

        if !payout.status.can_transition(PayoutStatus::Settled) {
            tracing::warn!(
                transfer_ref,
                from = ?payout.status,
                "ignoring settlement of non-pending payout"
            );
            return Ok(());
        }
        if payout.status != PayoutStatus::Settled {
            payout.status = PayoutStatus::Settled;
            self.store.update_payout(payout.clone()).await?;
        }

        // Mirror the settlement into the ledger. The creation debit
        // carries the same reference pair, so this append only matters
        // for payouts that entered the store without one.
        self.store
            .append_transactions(
                payout.account_id,
                vec![NewPayoutTransaction {
                    amount: -payout.amount.value(),
                    currency: payout.currency.clone(),
                    reference: Some(LedgerRef::new("payout", transfer_ref)),
                }],
            )
            .await?;
        Ok(())
    }

    async fn reverse_payout(
        &self,
        transfer_ref: &str,
        reversal_ref: &str,
        amount: Decimal,
        currency: &str,
    ) -> Result<()> {
        let payout = self
            .store
            .payout_by_provider_ref(transfer_ref)
            .await?
            .ok_or_else(|| MarketError::not_found("payout", transfer_ref))?;
        if payout.currency != currency {
            return Err(MarketError::ValidationError(format!(
                "reversal {reversal_ref} is in {currency}, payout is in {}",
                payout.currency
            )));
        }

        if self
            .store
            .reversal_by_provider_ref(reversal_ref)
            .await?
            .is_none()
        {
            // Same cap as engine-initiated reversals: cumulative
            // reversals may not exceed the payout amount. A bad event
            // is dropped, not retried.
            let reversed: Decimal = self
                .store
                .reversals_for(payout.id)
                .await?
                .iter()
                .map(|r| r.amount.value())
                .sum();
            if reversed + amount > payout.amount.value() {
                tracing::warn!(
                    transfer_ref,
                    reversal_ref,
                    %amount,
                    "ignoring reversal exceeding the payout amount"
                );
                return Ok(());
            }
            self.store
                .insert_reversal(crate::domain::payout::PayoutReversal {
                    id: 0, // assigned by the store
                    payout_id: payout.id,
                    amount: Amount::new(amount)?,
                    currency: currency.to_string(),
                    provider_ref: Some(reversal_ref.to_string()),
                })
                .await?;
        }

        self.store
            .append_transactions(
                payout.account_id,
                vec![NewPayoutTransaction {
                    amount,
                    currency: currency.to_string(),
                    reference: Some(LedgerRef::new("payout_reversal", reversal_ref)),
                }],
            )
            .await?;
        Ok(())
    }
}

/// Internal bridge between the raw HTTP webhook endpoint (out of core)
/// and the reconciler: parses the payload and redelivers it with a fixed
/// delay and a small bounded attempt count.
pub struct WebhookDispatcher {
    reconciler: Arc<WebhookReconciler>,
    attempts: u32,
    delay: Duration,
}

impl WebhookDispatcher {
    pub const DEFAULT_ATTEMPTS: u32 = 3;
    pub const DEFAULT_DELAY: Duration = Duration::from_millis(200);

    pub fn new(reconciler: Arc<WebhookReconciler>) -> Self {
        Self::with_retry(reconciler, Self::DEFAULT_ATTEMPTS, Self::DEFAULT_DELAY)
    }

    pub fn with_retry(reconciler: Arc<WebhookReconciler>, attempts: u32, delay: Duration) -> Self {
        Self {
            reconciler,
            attempts: attempts.max(1),
            delay,
        }
    }

    pub async fn dispatch(&self, webhook: ProviderWebhook) -> Result<()> {
        // A payload that does not parse will never parse; fail fast.
        let event: ProviderEvent = serde_json::from_str(&webhook.body).map_err(|e| {
            MarketError::ValidationError(format!(
                "unparseable {} webhook payload: {e}",
                webhook.provider
            ))
        })?;

        let mut last_err = None;
        for attempt in 1..=self.attempts {
            match self.reconciler.handle(event.clone()).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    tracing::warn!(
                        provider = webhook.provider,
                        attempt,
                        attempts = self.attempts,
                        error = %err,
                        "webhook handling failed"
                    );
                    last_err = Some(err);
                    if attempt < self.attempts {
                        tokio::time::sleep(self.delay).await;
                    }
                }
            }
        }

        let err = last_err.unwrap_or_else(|| {
            MarketError::InvariantViolation("webhook dispatch failed without an error".to_string())
        });
        tracing::error!(
            provider = webhook.provider,
            error = %err,
            "webhook permanently failed after bounded retries"
        );
        Err(err)
    }
}
