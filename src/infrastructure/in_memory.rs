use crate::domain::commission::{CommissionLine, CommissionRate, CommissionRule, RuleScope};
use crate::domain::order::{Order, OrderSet, PaymentCollection, SplitOrderPayment};
use crate::domain::payout::{
    NewPayoutTransaction, OnboardingRecord, Payout, PayoutAccount, PayoutReversal,
    PayoutTransaction,
};
use crate::domain::ports::{
    CommissionRuleStore, NewOrder, NewOrderSet, OrderStore, PaymentStore, PayoutStore,
    PlacedOrderSet,
};
use crate::error::{MarketError, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Thread-safe in-memory order store.
///
/// All state lives behind one `RwLock` so the split insert is a single
/// critical section: the cart-id uniqueness check and the writes commit
/// or fail together, which is what closes the concurrent-checkout race.
#[derive(Default, Clone)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<OrderState>>,
}

#[derive(Default)]
struct OrderState {
    order_sets: HashMap<u64, OrderSet>,
    cart_index: HashMap<u64, u64>,
    orders: HashMap<u64, Order>,
    // line_item_id -> commission lines, append-only.
    lines: HashMap<u64, Vec<CommissionLine>>,
    next_id: u64,
    next_display_id: u64,
}

impl OrderState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn find_order_set_by_cart(&self, cart_id: u64) -> Result<Option<OrderSet>> {
        let state = self.state.read().await;
        Ok(state
            .cart_index
            .get(&cart_id)
            .and_then(|id| state.order_sets.get(id))
            .cloned())
    }

    async fn insert_order_set(
        &self,
        set: NewOrderSet,
        orders: Vec<NewOrder>,
        lines: Vec<CommissionLine>,
    ) -> Result<PlacedOrderSet> {
        let mut state = self.state.write().await;
        if state.cart_index.contains_key(&set.cart_id) {
            return Err(MarketError::DuplicateProcessing(set.cart_id));
        }

        let now = Utc::now();
        let set_id = state.next_id();
        state.next_display_id += 1;
        let order_set = OrderSet {
            id: set_id,
            display_id: state.next_display_id,
            cart_id: set.cart_id,
            customer_id: set.customer_id,
            created_at: now,
            updated_at: now,
        };

        let mut placed_orders = Vec::with_capacity(orders.len());
        for new_order in orders {
            let order_id = state.next_id();
            let order = Order {
                id: order_id,
                order_set_id: set_id,
                seller_id: new_order.seller_id,
                items: new_order.items,
            };
            state.orders.insert(order_id, order.clone());
            placed_orders.push(order);
        }
        for line in lines {
            state.lines.entry(line.line_item_id).or_default().push(line);
        }
        state.cart_index.insert(set.cart_id, set_id);
        state.order_sets.insert(set_id, order_set.clone());

        Ok(PlacedOrderSet {
            order_set,
            orders: placed_orders,
        })
    }

    async fn get_order_set(&self, id: u64) -> Result<Option<OrderSet>> {
        let state = self.state.read().await;
        Ok(state.order_sets.get(&id).cloned())
    }

    async fn get_order(&self, id: u64) -> Result<Option<(Order, Vec<CommissionLine>)>> {
        let state = self.state.read().await;
        Ok(state.orders.get(&id).cloned().map(|order| {
            let lines = order
                .items
                .iter()
                .flat_map(|item| state.lines.get(&item.id).cloned().unwrap_or_default())
                .collect();
            (order, lines)
        }))
    }

    async fn orders_for_set(&self, order_set_id: u64) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.order_set_id == order_set_id)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.id);
        Ok(orders)
    }
}

/// In-memory commission rule/rate store.
#[derive(Default, Clone)]
pub struct InMemoryCommissionStore {
    state: Arc<RwLock<CommissionState>>,
}

#[derive(Default)]
struct CommissionState {
    rates: HashMap<u64, CommissionRate>,
    rules: HashMap<u64, CommissionRule>,
}

impl InMemoryCommissionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CommissionRuleStore for InMemoryCommissionStore {
    async fn insert_rate(&self, rate: CommissionRate) -> Result<()> {
        let mut state = self.state.write().await;
        state.rates.insert(rate.id, rate);
        Ok(())
    }

    async fn get_rate(&self, id: u64) -> Result<Option<CommissionRate>> {
        let state = self.state.read().await;
        Ok(state.rates.get(&id).cloned())
    }

    async fn insert_rule(&self, rule: CommissionRule) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.rates.contains_key(&rule.rate_id) {
            return Err(MarketError::not_found("commission rate", rule.rate_id));
        }
        if rule.enabled {
            let duplicate = state.rules.values().any(|existing| {
                existing.enabled
                    && existing.scope == rule.scope
                    && existing.reference_id == rule.reference_id
            });
            if duplicate {
                return Err(MarketError::InvalidState(format!(
                    "an enabled commission rule already exists for scope {:?}/{:?}",
                    rule.scope, rule.reference_id
                )));
            }
        }
        state.rules.insert(rule.id, rule);
        Ok(())
    }

    async fn find_enabled(
        &self,
        scope: RuleScope,
        reference_id: Option<u64>,
    ) -> Result<Option<CommissionRule>> {
        let state = self.state.read().await;
        Ok(state
            .rules
            .values()
            .find(|r| r.enabled && r.scope == scope && r.reference_id == reference_id)
            .cloned())
    }

    async fn rules_with_rates(&self) -> Result<Vec<(CommissionRule, CommissionRate)>> {
        let state = self.state.read().await;
        let mut joined = Vec::with_capacity(state.rules.len());
        for rule in state.rules.values() {
            let rate = state.rates.get(&rule.rate_id).cloned().ok_or_else(|| {
                MarketError::not_found("commission rate", rule.rate_id)
            })?;
            joined.push((rule.clone(), rate));
        }
        joined.sort_by_key(|(rule, _)| rule.id);
        Ok(joined)
    }
}

/// In-memory payout store: accounts, onboarding rows, the append-only
/// ledger, payouts, and reversals. The ledger's reference-pair set is
/// checked and updated inside the write lock, which is the whole
/// idempotency guarantee for concurrent crediting.
#[derive(Default, Clone)]
pub struct InMemoryPayoutStore {
    state: Arc<RwLock<PayoutState>>,
}

#[derive(Default)]
struct PayoutState {
    accounts: HashMap<u64, PayoutAccount>,
    seller_index: HashMap<u64, u64>,
    onboardings: HashMap<u64, OnboardingRecord>,
    ledger: Vec<PayoutTransaction>,
    ledger_refs: HashSet<(u64, String, String)>,
    payouts: HashMap<u64, Payout>,
    reversals: HashMap<u64, PayoutReversal>,
    next_id: u64,
}

impl PayoutState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

impl InMemoryPayoutStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PayoutStore for InMemoryPayoutStore {
    async fn insert_account(&self, seller_id: u64) -> Result<PayoutAccount> {
        let mut state = self.state.write().await;
        if state.seller_index.contains_key(&seller_id) {
            return Err(MarketError::InvalidState(format!(
                "seller {seller_id} already has a payout account"
            )));
        }
        let id = state.next_id();
        let account = PayoutAccount {
            id,
            seller_id,
            status: crate::domain::payout::AccountStatus::Pending,
            provider_ref: None,
            context: Value::Null,
            onboarding_id: None,
        };
        state.seller_index.insert(seller_id, id);
        state.accounts.insert(id, account.clone());
        Ok(account)
    }

    async fn get_account(&self, id: u64) -> Result<Option<PayoutAccount>> {
        let state = self.state.read().await;
        Ok(state.accounts.get(&id).cloned())
    }

    async fn account_by_seller(&self, seller_id: u64) -> Result<Option<PayoutAccount>> {
        let state = self.state.read().await;
        Ok(state
            .seller_index
            .get(&seller_id)
            .and_then(|id| state.accounts.get(id))
            .cloned())
    }

    async fn account_by_provider_ref(&self, provider_ref: &str) -> Result<Option<PayoutAccount>> {
        let state = self.state.read().await;
        Ok(state
            .accounts
            .values()
            .find(|a| a.provider_ref.as_deref() == Some(provider_ref))
            .cloned())
    }

    async fn update_account(&self, account: PayoutAccount) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.accounts.contains_key(&account.id) {
            return Err(MarketError::not_found("payout account", account.id));
        }
        state.accounts.insert(account.id, account);
        Ok(())
    }

    async fn delete_account(&self, id: u64) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(account) = state.accounts.remove(&id) {
            state.seller_index.remove(&account.seller_id);
            state.onboardings.retain(|_, o| o.account_id != id);
        }
        Ok(())
    }

    async fn insert_onboarding(&self, account_id: u64, data: Value) -> Result<OnboardingRecord> {
        let mut state = self.state.write().await;
        if !state.accounts.contains_key(&account_id) {
            return Err(MarketError::not_found("payout account", account_id));
        }
        let id = state.next_id();
        let record = OnboardingRecord {
            id,
            account_id,
            data,
        };
        state.onboardings.insert(id, record.clone());
        Ok(record)
    }

    async fn append_transactions(
        &self,
        account_id: u64,
        transactions: Vec<NewPayoutTransaction>,
    ) -> Result<usize> {
        let mut state = self.state.write().await;
        if !state.accounts.contains_key(&account_id) {
            return Err(MarketError::not_found("payout account", account_id));
        }
        let mut appended = 0;
        for tx in transactions {
            if let Some(reference) = &tx.reference {
                let key = (
                    account_id,
                    reference.reference.clone(),
                    reference.reference_id.clone(),
                );
                if state.ledger_refs.contains(&key) {
                    continue;
                }
                state.ledger_refs.insert(key);
            }
            let id = state.next_id();
            state.ledger.push(PayoutTransaction {
                id,
                account_id,
                amount: tx.amount,
                currency: tx.currency,
                reference: tx.reference,
            });
            appended += 1;
        }
        Ok(appended)
    }

    async fn transactions_for(&self, account_id: u64) -> Result<Vec<PayoutTransaction>> {
        let state = self.state.read().await;
        Ok(state
            .ledger
            .iter()
            .filter(|t| t.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn balance(&self, account_id: u64) -> Result<BTreeMap<String, Decimal>> {
        let state = self.state.read().await;
        let mut balance: BTreeMap<String, Decimal> = BTreeMap::new();
        for tx in state.ledger.iter().filter(|t| t.account_id == account_id) {
            *balance.entry(tx.currency.clone()).or_insert(Decimal::ZERO) += tx.amount;
        }
        Ok(balance)
    }

    async fn insert_payout(&self, mut payout: Payout) -> Result<Payout> {
        let mut state = self.state.write().await;
        if !state.accounts.contains_key(&payout.account_id) {
            return Err(MarketError::not_found("payout account", payout.account_id));
        }
        payout.id = state.next_id();
        state.payouts.insert(payout.id, payout.clone());
        Ok(payout)
    }

    async fn get_payout(&self, id: u64) -> Result<Option<Payout>> {
        let state = self.state.read().await;
        Ok(state.payouts.get(&id).cloned())
    }

    async fn payout_by_provider_ref(&self, provider_ref: &str) -> Result<Option<Payout>> {
        let state = self.state.read().await;
        Ok(state
            .payouts
            .values()
            .find(|p| p.provider_ref.as_deref() == Some(provider_ref))
            .cloned())
    }

    async fn update_payout(&self, payout: Payout) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.payouts.contains_key(&payout.id) {
            return Err(MarketError::not_found("payout", payout.id));
        }
        state.payouts.insert(payout.id, payout);
        Ok(())
    }

    async fn insert_reversal(&self, mut reversal: PayoutReversal) -> Result<PayoutReversal> {
        let mut state = self.state.write().await;
        if !state.payouts.contains_key(&reversal.payout_id) {
            return Err(MarketError::not_found("payout", reversal.payout_id));
        }
        // Provider-ref uniqueness lives here, under the write lock, so
        // concurrent duplicate webhooks cannot both insert.
        if let Some(provider_ref) = &reversal.provider_ref
            && let Some(existing) = state
                .reversals
                .values()
                .find(|r| r.provider_ref.as_deref() == Some(provider_ref))
        {
            return Ok(existing.clone());
        }
        reversal.id = state.next_id();
        state.reversals.insert(reversal.id, reversal.clone());
        Ok(reversal)
    }

    async fn reversals_for(&self, payout_id: u64) -> Result<Vec<PayoutReversal>> {
        let state = self.state.read().await;
        let mut reversals: Vec<PayoutReversal> = state
            .reversals
            .values()
            .filter(|r| r.payout_id == payout_id)
            .cloned()
            .collect();
        reversals.sort_by_key(|r| r.id);
        Ok(reversals)
    }

    async fn reversal_by_provider_ref(
        &self,
        provider_ref: &str,
    ) -> Result<Option<PayoutReversal>> {
        let state = self.state.read().await;
        Ok(state
            .reversals
            .values()
            .find(|r| r.provider_ref.as_deref() == Some(provider_ref))
            .cloned())
    }
}

/// In-memory view of the external payment service's collections plus the
/// per-order split payments tracked against them.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    state: Arc<RwLock<PaymentState>>,
}

#[derive(Default)]
struct PaymentState {
    collections: HashMap<u64, PaymentCollection>,
    split_payments: HashMap<u64, SplitOrderPayment>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn register_collection(&self, collection: PaymentCollection) -> Result<()> {
        let mut state = self.state.write().await;
        state.collections.insert(collection.id, collection);
        Ok(())
    }

    async fn get_collection(&self, id: u64) -> Result<Option<PaymentCollection>> {
        let state = self.state.read().await;
        Ok(state.collections.get(&id).cloned())
    }

    async fn split_payment_for(&self, order_id: u64) -> Result<Option<SplitOrderPayment>> {
        let state = self.state.read().await;
        Ok(state.split_payments.get(&order_id).cloned())
    }

    async fn split_payments_for_collection(
        &self,
        collection_id: u64,
    ) -> Result<Vec<SplitOrderPayment>> {
        let state = self.state.read().await;
        Ok(state
            .split_payments
            .values()
            .filter(|p| p.payment_collection_id == collection_id)
            .cloned()
            .collect())
    }

    async fn upsert_split_payment(&self, payment: SplitOrderPayment) -> Result<()> {
        let mut state = self.state.write().await;
        state.split_payments.insert(payment.order_id, payment);
        Ok(())
    }
}
