use crate::domain::commission::{self, CommissionLine, OrderTotals};
use crate::domain::events::DomainEvent;
use crate::domain::money::Balance;
use crate::domain::order::{Cart, LineItem};
use crate::domain::ports::{
    CommissionRuleStoreRef, EventPublisherRef, NewOrder, NewOrderSet, OrderStoreRef,
    PlacedOrderSet,
};
use crate::error::{MarketError, Result};
use std::collections::BTreeMap;

/// Splits a checked-out cart into one order per seller plus a parent
/// order set, attaching a computed commission line to every line item,
/// all in a single atomic store write.
///
/// Every cart is split exactly once: a fast-path existence check rejects
/// retried checkouts up front, and the store's cart-id uniqueness closes
/// the remaining check-then-act race between concurrent callers.
pub struct OrderSplitter {
    orders: OrderStoreRef,
    rules: CommissionRuleStoreRef,
    events: EventPublisherRef,
}

impl OrderSplitter {
    pub fn new(
        orders: OrderStoreRef,
        rules: CommissionRuleStoreRef,
        events: EventPublisherRef,
    ) -> Self {
        Self {
            orders,
            rules,
            events,
        }
    }

    pub async fn split_cart(&self, cart: &Cart) -> Result<PlacedOrderSet> {
        if cart.items.is_empty() {
            return Err(MarketError::ValidationError(format!(
                "cart {} has no line items",
                cart.id
            )));
        }

        // Idempotency guard, first sub-step. The insert below re-checks
        // under the store lock.
        if self.orders.find_order_set_by_cart(cart.id).await?.is_some() {
            return Err(MarketError::DuplicateProcessing(cart.id));
        }

        let rule_set = self.rules.rules_with_rates().await?;

        // BTreeMap keeps seller ordering deterministic across runs.
        let mut groups: BTreeMap<u64, Vec<LineItem>> = BTreeMap::new();
        for item in &cart.items {
            groups.entry(item.seller_id).or_default().push(item.clone());
        }

        let mut orders = Vec::with_capacity(groups.len());
        let mut lines = Vec::with_capacity(cart.items.len());
        for (seller_id, items) in groups {
            let totals = OrderTotals {
                total: items.iter().map(LineItem::total).sum(),
                tax_total: items.iter().map(|i| i.tax_total).sum(),
            };
            for item in &items {
                let (rule, rate) = commission::resolve_rule(&rule_set, item)?;
                lines.push(commission::compute_line(rule, rate, item, totals));
            }
            orders.push(NewOrder { seller_id, items });
        }

        // Conservation check before the write: the union of the seller
        // orders must carry exactly the cart total.
        let split_total: Balance = orders
            .iter()
            .flat_map(|o| o.items.iter())
            .map(LineItem::total)
            .sum();
        if split_total != cart.total() {
            return Err(MarketError::InvariantViolation(format!(
                "split total {:?} diverged from cart total {:?} for cart {}",
                split_total,
                cart.total(),
                cart.id
            )));
        }

        let placed = self
            .orders
            .insert_order_set(
                NewOrderSet {
                    cart_id: cart.id,
                    customer_id: cart.customer_id,
                },
                orders,
                lines,
            )
            .await?;

        tracing::info!(
            cart_id = cart.id,
            order_set_id = placed.order_set.id,
            orders = placed.orders.len(),
            "cart split into order set"
        );

        self.events
            .publish(DomainEvent::OrderSetPlaced {
                order_set_id: placed.order_set.id,
                order_ids: placed.orders.iter().map(|o| o.id).collect(),
                cart_id: cart.id,
            })
            .await?;

        Ok(placed)
    }

    /// Commission read for a given order id, for vendor/admin queries.
    pub async fn order_with_commissions(
        &self,
        order_id: u64,
    ) -> Result<(crate::domain::order::Order, Vec<CommissionLine>)> {
        self.orders
            .get_order(order_id)
            .await?
            .ok_or_else(|| MarketError::not_found("order", order_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::commission::{
        CommissionRate, CommissionRule, RateKind, RateTarget, RuleScope,
    };
    use crate::domain::money::Amount;
    use crate::domain::ports::CommissionRuleStore;
    use crate::infrastructure::event_bus::BroadcastEventBus;
    use crate::infrastructure::in_memory::{InMemoryCommissionStore, InMemoryOrderStore};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn item(id: u64, seller_id: u64, unit_price: rust_decimal::Decimal, quantity: u32) -> LineItem {
        LineItem {
            id,
            cart_id: 1,
            seller_id,
            product_id: id,
            quantity,
            unit_price: Amount::new(unit_price).unwrap(),
            tax_total: Balance::ZERO,
        }
    }

    async fn splitter_with_global_rule() -> (OrderSplitter, Arc<BroadcastEventBus>) {
        let rules = Arc::new(InMemoryCommissionStore::new());
        rules
            .insert_rate(CommissionRate {
                id: 1,
                name: "global 10%".to_string(),
                kind: RateKind::Percentage,
                target: RateTarget::ItemTotal,
                value: dec!(10),
                currency: "usd".to_string(),
                min_amount: Balance::ZERO,
                include_tax: false,
                priority: 0,
            })
            .await
            .unwrap();
        rules
            .insert_rule(CommissionRule {
                id: 1,
                code: "global-default".to_string(),
                scope: RuleScope::Global,
                reference_id: None,
                rate_id: 1,
                enabled: true,
            })
            .await
            .unwrap();

        let bus = Arc::new(BroadcastEventBus::new(16));
        let splitter = OrderSplitter::new(
            Arc::new(InMemoryOrderStore::new()),
            rules,
            bus.clone(),
        );
        (splitter, bus)
    }

    #[tokio::test]
    async fn test_split_two_seller_cart() {
        let (splitter, _bus) = splitter_with_global_rule().await;
        let cart = Cart {
            id: 1,
            customer_id: Some(42),
            payment_collection_id: None,
            items: vec![item(1, 10, dec!(50.0), 1), item(2, 20, dec!(30.0), 2)],
        };

        let placed = splitter.split_cart(&cart).await.unwrap();
        assert_eq!(placed.orders.len(), 2);
        assert_eq!(placed.order_set.cart_id, 1);
        assert_eq!(placed.order_set.customer_id, Some(42));

        let seller_a = placed.orders.iter().find(|o| o.seller_id == 10).unwrap();
        let seller_b = placed.orders.iter().find(|o| o.seller_id == 20).unwrap();
        assert_eq!(seller_a.total(), Balance::new(dec!(50.0)));
        assert_eq!(seller_b.total(), Balance::new(dec!(60.0)));

        let (_, lines) = splitter.order_with_commissions(seller_a.id).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].amount, Balance::new(dec!(5.00)));
        let (_, lines) = splitter.order_with_commissions(seller_b.id).await.unwrap();
        assert_eq!(lines[0].amount, Balance::new(dec!(6.00)));
    }

    #[tokio::test]
    async fn test_second_split_is_rejected() {
        let (splitter, _bus) = splitter_with_global_rule().await;
        let cart = Cart {
            id: 1,
            customer_id: None,
            payment_collection_id: None,
            items: vec![item(1, 10, dec!(50.0), 1)],
        };

        splitter.split_cart(&cart).await.unwrap();
        assert!(matches!(
            splitter.split_cart(&cart).await,
            Err(MarketError::DuplicateProcessing(1))
        ));
    }

    #[tokio::test]
    async fn test_empty_cart_is_rejected() {
        let (splitter, _bus) = splitter_with_global_rule().await;
        let cart = Cart {
            id: 1,
            customer_id: None,
            payment_collection_id: None,
            items: vec![],
        };
        assert!(matches!(
            splitter.split_cart(&cart).await,
            Err(MarketError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_placed_event_is_published() {
        let (splitter, bus) = splitter_with_global_rule().await;
        let mut rx = bus.subscribe();
        let cart = Cart {
            id: 7,
            customer_id: None,
            payment_collection_id: None,
            items: vec![item(1, 10, dec!(50.0), 1), item(2, 20, dec!(30.0), 2)],
        };

        let placed = splitter.split_cart(&cart).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            DomainEvent::OrderSetPlaced {
                order_set_id: placed.order_set.id,
                order_ids: placed.orders.iter().map(|o| o.id).collect(),
                cart_id: 7,
            }
        );
    }

    #[tokio::test]
    async fn test_rule_failure_leaves_no_partial_split() {
        // No rules configured at all: resolution fails for the first item
        // and nothing must be persisted.
        let orders: OrderStoreRef = Arc::new(InMemoryOrderStore::new());
        let splitter = OrderSplitter::new(
            orders.clone(),
            Arc::new(InMemoryCommissionStore::new()),
            Arc::new(BroadcastEventBus::new(16)),
        );
        let cart = Cart {
            id: 3,
            customer_id: None,
            payment_collection_id: None,
            items: vec![item(1, 10, dec!(50.0), 1)],
        };

        assert!(matches!(
            splitter.split_cart(&cart).await,
            Err(MarketError::ConfigurationAmbiguity(_))
        ));
        assert!(orders.find_order_set_by_cart(3).await.unwrap().is_none());
    }
}
