use crate::domain::money::Amount;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Activation lifecycle of a seller's payout account. Only the webhook
/// reconciler and an explicit provider sync may move it off `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Pending,
    Active,
    Rejected,
}

impl AccountStatus {
    /// Replaying the current status is a legal no-op; leaving `Rejected`
    /// or moving back to `Pending` is not.
    pub fn can_transition(self, to: AccountStatus) -> bool {
        match (self, to) {
            (a, b) if a == b => true,
            (AccountStatus::Pending, AccountStatus::Active)
            | (AccountStatus::Pending, AccountStatus::Rejected) => true,
            _ => false,
        }
    }
}

/// Per-seller record tracking the external payout-provider identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutAccount {
    pub id: u64,
    pub seller_id: u64,
    pub status: AccountStatus,
    pub provider_ref: Option<String>,
    /// Free-form provider context, merged on sync and webhooks.
    pub context: Value,
    pub onboarding_id: Option<u64>,
}

/// Onboarding session created alongside a pending account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnboardingRecord {
    pub id: u64,
    pub account_id: u64,
    pub data: Value,
}

/// External reference pair making replayed ledger writes idempotent:
/// `(account_id, reference, reference_id)` is unique per ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerRef {
    pub reference: String,
    pub reference_id: String,
}

impl LedgerRef {
    pub fn new(reference: impl Into<String>, reference_id: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            reference_id: reference_id.into(),
        }
    }
}

/// Append-only ledger entry against a payout account. Positive amounts
/// credit the seller, negative amounts debit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutTransaction {
    pub id: u64,
    pub account_id: u64,
    pub amount: Decimal,
    pub currency: String,
    pub reference: Option<LedgerRef>,
}

/// Input for a ledger append; ids are assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPayoutTransaction {
    pub amount: Decimal,
    pub currency: String,
    pub reference: Option<LedgerRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    Pending,
    Settled,
    Failed,
}

impl PayoutStatus {
    pub fn can_transition(self, to: PayoutStatus) -> bool {
        match (self, to) {
            (a, b) if a == b => true,
            (PayoutStatus::Pending, PayoutStatus::Settled)
            | (PayoutStatus::Pending, PayoutStatus::Failed) => true,
            _ => false,
        }
    }
}

/// A batched withdrawal against a payout account. The amount is frozen
/// at creation; clawbacks arrive as `PayoutReversal` children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payout {
    pub id: u64,
    pub account_id: u64,
    pub status: PayoutStatus,
    pub amount: Amount,
    pub currency: String,
    pub provider_ref: Option<String>,
    pub payload: Value,
}

/// Partial or full clawback of a settled payout. Never mutates the
/// parent payout's amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutReversal {
    pub id: u64,
    pub payout_id: u64,
    pub amount: Amount,
    pub currency: String,
    pub provider_ref: Option<String>,
}
