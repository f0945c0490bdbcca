use crate::domain::commission::{
    self, CommissionLine, CommissionRate, CommissionRule, OrderTotals, RuleScope,
};
use crate::domain::order::LineItem;
use crate::domain::ports::CommissionRuleStoreRef;
use crate::error::{MarketError, Result};
use rust_decimal::Decimal;

/// Rule administration plus a store-backed wrapper over the pure
/// resolution/computation functions.
pub struct CommissionEngine {
    rules: CommissionRuleStoreRef,
}

impl CommissionEngine {
    pub fn new(rules: CommissionRuleStoreRef) -> Self {
        Self { rules }
    }

    pub async fn add_rate(&self, rate: CommissionRate) -> Result<()> {
        if rate.value <= Decimal::ZERO {
            return Err(MarketError::ValidationError(format!(
                "rate {} must have a positive value",
                rate.name
            )));
        }
        self.rules.insert_rate(rate).await
    }

    /// Creates a rule. The duplicate-scope check runs as a discrete step
    /// before the write; the store's insert enforces it again.
    pub async fn add_rule(&self, rule: CommissionRule) -> Result<()> {
        if rule.scope != RuleScope::Global && rule.reference_id.is_none() {
            return Err(MarketError::ValidationError(format!(
                "rule {} needs a reference id for its scope",
                rule.code
            )));
        }
        if self.rules.get_rate(rule.rate_id).await?.is_none() {
            return Err(MarketError::not_found("commission rate", rule.rate_id));
        }
        if let Some(existing) = self
            .rules
            .find_enabled(rule.scope, rule.reference_id)
            .await?
        {
            return Err(MarketError::InvalidState(format!(
                "an enabled commission rule ({}) already exists for this scope",
                existing.code
            )));
        }
        self.rules.insert_rule(rule).await
    }

    /// Resolves and computes the commission line for one item against the
    /// current rule set.
    pub async fn compute_for_item(
        &self,
        item: &LineItem,
        order: OrderTotals,
    ) -> Result<CommissionLine> {
        let rule_set = self.rules.rules_with_rates().await?;
        let (rule, rate) = commission::resolve_rule(&rule_set, item)?;
        Ok(commission::compute_line(rule, rate, item, order))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::commission::{RateKind, RateTarget};
    use crate::domain::money::{Amount, Balance};
    use crate::domain::ports::CommissionRuleStore;
    use crate::infrastructure::in_memory::InMemoryCommissionStore;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn rate(id: u64, value: Decimal) -> CommissionRate {
        CommissionRate {
            id,
            name: format!("rate-{id}"),
            kind: RateKind::Percentage,
            target: RateTarget::ItemTotal,
            value,
            currency: "usd".to_string(),
            min_amount: Balance::ZERO,
            include_tax: false,
            priority: 0,
        }
    }

    fn rule(id: u64, scope: RuleScope, reference_id: Option<u64>, rate_id: u64) -> CommissionRule {
        CommissionRule {
            id,
            code: format!("rule-{id}"),
            scope,
            reference_id,
            rate_id,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_duplicate_rule_rejected_before_write() {
        let store = Arc::new(InMemoryCommissionStore::new());
        let engine = CommissionEngine::new(store.clone());

        engine.add_rate(rate(1, dec!(10))).await.unwrap();
        engine
            .add_rule(rule(1, RuleScope::Seller, Some(5), 1))
            .await
            .unwrap();

        let result = engine.add_rule(rule(2, RuleScope::Seller, Some(5), 1)).await;
        assert!(matches!(result, Err(MarketError::InvalidState(_))));
        // Only the first rule is persisted.
        assert_eq!(store.rules_with_rates().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rule_for_other_reference_is_allowed() {
        let engine = CommissionEngine::new(Arc::new(InMemoryCommissionStore::new()));
        engine.add_rate(rate(1, dec!(10))).await.unwrap();
        engine
            .add_rule(rule(1, RuleScope::Seller, Some(5), 1))
            .await
            .unwrap();
        engine
            .add_rule(rule(2, RuleScope::Seller, Some(6), 1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rule_requires_existing_rate() {
        let engine = CommissionEngine::new(Arc::new(InMemoryCommissionStore::new()));
        let result = engine.add_rule(rule(1, RuleScope::Global, None, 99)).await;
        assert!(matches!(result, Err(MarketError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_scoped_rule_requires_reference() {
        let engine = CommissionEngine::new(Arc::new(InMemoryCommissionStore::new()));
        engine.add_rate(rate(1, dec!(10))).await.unwrap();
        let result = engine.add_rule(rule(1, RuleScope::Product, None, 1)).await;
        assert!(matches!(result, Err(MarketError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_compute_for_item() {
        let engine = CommissionEngine::new(Arc::new(InMemoryCommissionStore::new()));
        engine.add_rate(rate(1, dec!(10))).await.unwrap();
        engine
            .add_rule(rule(1, RuleScope::Global, None, 1))
            .await
            .unwrap();

        let item = LineItem {
            id: 1,
            cart_id: 1,
            seller_id: 5,
            product_id: 9,
            quantity: 1,
            unit_price: Amount::new(dec!(50.0)).unwrap(),
            tax_total: Balance::ZERO,
        };
        let line = engine
            .compute_for_item(
                &item,
                OrderTotals {
                    total: item.total(),
                    tax_total: Balance::ZERO,
                },
            )
            .await
            .unwrap();
        assert_eq!(line.amount, Balance::new(dec!(5.0)));
    }
}
