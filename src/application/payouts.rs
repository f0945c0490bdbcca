use crate::domain::money::Amount;
use crate::domain::payout::{
    AccountStatus, LedgerRef, NewPayoutTransaction, Payout, PayoutReversal, PayoutStatus,
};
use crate::domain::ports::{PayoutProviderRef, PayoutStoreRef};
use crate::error::{MarketError, Result};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct CreatePayoutInput {
    pub account_id: u64,
    pub amount: Amount,
    pub currency: String,
}

/// Result of a payout attempt. Precondition violations are returned as
/// errors before any call leaves the process; a transient provider
/// failure after the checks is folded into `provider_error` instead, so
/// one seller's outage does not fail a batch of unrelated operations.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatePayoutOutcome {
    pub payout: Option<Payout>,
    pub provider_error: Option<String>,
}

/// Maintains each seller's payable balance as an append-only ledger and
/// drives withdrawals through the external provider.
pub struct PayoutEngine {
    store: PayoutStoreRef,
    provider: PayoutProviderRef,
}

impl PayoutEngine {
    pub fn new(store: PayoutStoreRef, provider: PayoutProviderRef) -> Self {
        Self { store, provider }
    }

    /// Appends signed ledger entries to an account. Entries whose
    /// reference pair already exists are skipped, so replays are safe
    /// under concurrent callers. Returns the number actually appended.
    pub async fn add_transactions(
        &self,
        account_id: u64,
        transactions: Vec<NewPayoutTransaction>,
    ) -> Result<usize> {
        if self.store.get_account(account_id).await?.is_none() {
            return Err(MarketError::not_found("payout account", account_id));
        }
        for tx in &transactions {
            if tx.amount == Decimal::ZERO {
                return Err(MarketError::ValidationError(
                    "ledger entries must carry a non-zero amount".to_string(),
                ));
            }
        }
        self.store.append_transactions(account_id, transactions).await
    }

    /// Net ledger balance per currency.
    pub async fn balance(&self, account_id: u64) -> Result<BTreeMap<String, Decimal>> {
        if self.store.get_account(account_id).await?.is_none() {
            return Err(MarketError::not_found("payout account", account_id));
        }
        self.store.balance(account_id).await
    }

    /// Creates a pending payout against an active account.
    ///
    /// Gating (`InvalidState` on a non-active account, insufficient
    /// balance) happens before the provider call and performs no write.
    /// A provider failure is caught here and surfaced as the soft flag.
    /// On success the payout amount is debited from the ledger
    /// immediately, so the funds cannot be withdrawn a second time
    /// while the payout is still pending.
    pub async fn create_payout(&self, input: CreatePayoutInput) -> Result<CreatePayoutOutcome> {
        let account = self
            .store
            .get_account(input.account_id)
            .await?
            .ok_or_else(|| MarketError::not_found("payout account", input.account_id))?;
        if account.status != AccountStatus::Active {
            return Err(MarketError::InvalidState(format!(
                "payout account {} is {:?}, not active",
                account.id, account.status
            )));
        }
        let provider_ref = account.provider_ref.clone().ok_or_else(|| {
            MarketError::InvalidState(format!(
                "payout account {} has no provider identity",
                account.id
            ))
        })?;

        let available = self
            .store
            .balance(account.id)
            .await?
            .get(&input.currency)
            .copied()
            .unwrap_or(Decimal::ZERO);
        if available < input.amount.value() {
            return Err(MarketError::InvalidState(format!(
                "payout account {} holds {available} {}, requested {}",
                account.id,
                input.currency,
                input.amount.value()
            )));
        }

        let transfer = match self
            .provider
            .create_transfer(&provider_ref, input.amount, &input.currency)
            .await
        {
            Ok(transfer) => transfer,
            Err(MarketError::ExternalProviderFailure(reason)) => {
                tracing::warn!(
                    account_id = account.id,
                    %reason,
                    "payout transfer failed at provider"
                );
                return Ok(CreatePayoutOutcome {
                    payout: None,
                    provider_error: Some(reason),
                });
            }
            Err(other) => return Err(other),
        };

        let transfer_ref = transfer.transfer_ref.clone();
        let payout = self
            .store
            .insert_payout(Payout {
                id: 0, // assigned by the store
                account_id: account.id,
                status: PayoutStatus::Pending,
                amount: input.amount,
                currency: input.currency,
                provider_ref: Some(transfer.transfer_ref),
                payload: transfer.payload,
            })
            .await?;

        // Debit the withdrawn funds now. The settlement webhook mirrors
        // the same reference pair, so its append replays as a no-op.
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

        Ok(CreatePayoutOutcome {
            payout: Some(payout),
            provider_error: None,
        })
    }

    /// Records a clawback as a child of an existing payout. The parent's
    /// amount is never mutated; cumulative reversals may not exceed it.
    pub async fn create_reversal(
        &self,
        payout_id: u64,
        amount: Amount,
        provider_ref: Option<String>,
    ) -> Result<PayoutReversal> {
        let payout = self
            .store
            .get_payout(payout_id)
            .await?
            .ok_or_else(|| MarketError::not_found("payout", payout_id))?;

        let reversed: Decimal = self
            .store
            .reversals_for(payout_id)
            .await?
            .iter()
            .map(|r| r.amount.value())
            .sum();
        if reversed + amount.value() > payout.amount.value() {
            return Err(MarketError::InvalidState(format!(
                "reversals of payout {payout_id} would exceed its amount"
            )));
        }

        self.store
            .insert_reversal(PayoutReversal {
                id: 0, // assigned by the store
                payout_id,
                amount,
                currency: payout.currency.clone(),
                provider_ref,
            })
            .await
    }
}
