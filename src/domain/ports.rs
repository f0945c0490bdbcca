use crate::domain::commission::{CommissionLine, CommissionRate, CommissionRule, RuleScope};
use crate::domain::events::DomainEvent;
use crate::domain::money::Amount;
use crate::domain::order::{LineItem, Order, OrderSet, PaymentCollection, SplitOrderPayment};
use crate::domain::payout::{
    AccountStatus, NewPayoutTransaction, OnboardingRecord, Payout, PayoutAccount, PayoutReversal,
    PayoutTransaction,
};
use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

pub type OrderStoreRef = Arc<dyn OrderStore>;
pub type CommissionRuleStoreRef = Arc<dyn CommissionRuleStore>;
pub type PayoutStoreRef = Arc<dyn PayoutStore>;
pub type PaymentStoreRef = Arc<dyn PaymentStore>;
pub type PayoutProviderRef = Arc<dyn PayoutProvider>;
pub type EventPublisherRef = Arc<dyn EventPublisher>;

/// Order set to be created by an atomic split insert. Ids and the display
/// sequence number are assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrderSet {
    pub cart_id: u64,
    pub customer_id: Option<u64>,
}

/// One per-seller order within a split insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub seller_id: u64,
    pub items: Vec<LineItem>,
}

/// Result of a committed split: the aggregate plus its seller orders.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOrderSet {
    pub order_set: OrderSet,
    pub orders: Vec<Order>,
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn find_order_set_by_cart(&self, cart_id: u64) -> Result<Option<OrderSet>>;

    /// Creates the order set, its per-seller orders, and their commission
    /// lines as one all-or-nothing write. Enforces the one-order-set-per-
    /// cart uniqueness inside its own critical section; callers' existence
    /// checks are only a fast path.
    async fn insert_order_set(
        &self,
        set: NewOrderSet,
        orders: Vec<NewOrder>,
        lines: Vec<CommissionLine>,
    ) -> Result<PlacedOrderSet>;

    async fn get_order_set(&self, id: u64) -> Result<Option<OrderSet>>;
    async fn get_order(&self, id: u64) -> Result<Option<(Order, Vec<CommissionLine>)>>;
    async fn orders_for_set(&self, order_set_id: u64) -> Result<Vec<Order>>;
}

#[async_trait]
pub trait CommissionRuleStore: Send + Sync {
    async fn insert_rate(&self, rate: CommissionRate) -> Result<()>;
    async fn get_rate(&self, id: u64) -> Result<Option<CommissionRate>>;

    /// Rejects a second enabled rule for the same `(scope, reference_id)`.
    async fn insert_rule(&self, rule: CommissionRule) -> Result<()>;
    async fn find_enabled(
        &self,
        scope: RuleScope,
        reference_id: Option<u64>,
    ) -> Result<Option<CommissionRule>>;

    /// Snapshot of all rules joined with their rates, for one resolution
    /// pass over a cart.
    async fn rules_with_rates(&self) -> Result<Vec<(CommissionRule, CommissionRate)>>;
}

#[async_trait]
pub trait PayoutStore: Send + Sync {
    async fn insert_account(&self, seller_id: u64) -> Result<PayoutAccount>;
    async fn get_account(&self, id: u64) -> Result<Option<PayoutAccount>>;
    async fn account_by_seller(&self, seller_id: u64) -> Result<Option<PayoutAccount>>;
    async fn account_by_provider_ref(&self, provider_ref: &str) -> Result<Option<PayoutAccount>>;
    async fn update_account(&self, account: PayoutAccount) -> Result<()>;
    /// Saga compensation only; removes the account and its onboarding row.
    async fn delete_account(&self, id: u64) -> Result<()>;

    async fn insert_onboarding(&self, account_id: u64, data: Value) -> Result<OnboardingRecord>;

    /// Appends ledger entries, skipping any whose reference pair already
    /// exists for the account. Returns how many were actually appended.
    async fn append_transactions(
        &self,
        account_id: u64,
        transactions: Vec<NewPayoutTransaction>,
    ) -> Result<usize>;
    async fn transactions_for(&self, account_id: u64) -> Result<Vec<PayoutTransaction>>;
    /// Net ledger sum per currency.
    async fn balance(&self, account_id: u64) -> Result<BTreeMap<String, Decimal>>;

    async fn insert_payout(&self, payout: Payout) -> Result<Payout>;
    async fn get_payout(&self, id: u64) -> Result<Option<Payout>>;
    async fn payout_by_provider_ref(&self, provider_ref: &str) -> Result<Option<Payout>>;
    async fn update_payout(&self, payout: Payout) -> Result<()>;

    /// Idempotent per provider reference: if a reversal with the same
    /// `provider_ref` already exists, the stored row is returned and no
    /// duplicate is written.
    async fn insert_reversal(&self, reversal: PayoutReversal) -> Result<PayoutReversal>;
    async fn reversals_for(&self, payout_id: u64) -> Result<Vec<PayoutReversal>>;
    async fn reversal_by_provider_ref(
        &self,
        provider_ref: &str,
    ) -> Result<Option<PayoutReversal>>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn register_collection(&self, collection: PaymentCollection) -> Result<()>;
    async fn get_collection(&self, id: u64) -> Result<Option<PaymentCollection>>;
    async fn split_payment_for(&self, order_id: u64) -> Result<Option<SplitOrderPayment>>;
    async fn split_payments_for_collection(
        &self,
        collection_id: u64,
    ) -> Result<Vec<SplitOrderPayment>>;
    async fn upsert_split_payment(&self, payment: SplitOrderPayment) -> Result<()>;
}

/// Provider-side view of a payout account, as returned by lookups.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderAccountState {
    pub provider_ref: String,
    pub status: AccountStatus,
    pub context: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderTransfer {
    pub transfer_ref: String,
    pub payload: Value,
}

/// Client for the external payout provider. Every call is bounded-latency
/// and fallible with `ExternalProviderFailure`; callers must not hold a
/// store lock while awaiting it.
#[async_trait]
pub trait PayoutProvider: Send + Sync {
    async fn create_account(&self, seller_id: u64) -> Result<ProviderAccountState>;
    async fn delete_account(&self, provider_ref: &str) -> Result<()>;
    async fn fetch_account(&self, provider_ref: &str) -> Result<ProviderAccountState>;
    async fn create_transfer(
        &self,
        provider_ref: &str,
        amount: Amount,
        currency: &str,
    ) -> Result<ProviderTransfer>;
}

/// Explicit publish/subscribe seam for the domain events in place of ad
/// hoc hook registration.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: DomainEvent) -> Result<()>;
}
