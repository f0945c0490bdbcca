use crate::domain::money::Balance;
use crate::domain::order::LineItem;
use crate::error::{MarketError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Targeting scope of a commission rule, most specific first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleScope {
    Product,
    Seller,
    Global,
}

impl RuleScope {
    /// Lower is more specific.
    fn specificity(self) -> u8 {
        match self {
            RuleScope::Product => 0,
            RuleScope::Seller => 1,
            RuleScope::Global => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionRule {
    pub id: u64,
    /// Stable code baked into every `CommissionLine` for audit, even if
    /// the rule is later deleted.
    pub code: String,
    pub scope: RuleScope,
    /// `None` for global rules, the seller or product id otherwise.
    pub reference_id: Option<u64>,
    pub rate_id: u64,
    pub enabled: bool,
}

impl CommissionRule {
    fn matches(&self, item: &LineItem) -> bool {
        self.enabled
            && match self.scope {
                RuleScope::Product => self.reference_id == Some(item.product_id),
                RuleScope::Seller => self.reference_id == Some(item.seller_id),
                RuleScope::Global => true,
            }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateKind {
    Percentage,
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateTarget {
    ItemTotal,
    OrderTotal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionRate {
    pub id: u64,
    pub name: String,
    pub kind: RateKind,
    pub target: RateTarget,
    /// Percent (e.g. `10` for 10%) or the fixed amount, per `kind`.
    pub value: Decimal,
    pub currency: String,
    pub min_amount: Balance,
    pub include_tax: bool,
    /// Tie-breaker when several rules of the same specificity match.
    pub priority: i32,
}

/// Immutable commission record attached to one order line item at split
/// time. Never mutated afterwards, only superseded by a new line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionLine {
    pub line_item_id: u64,
    pub rate_id: Option<u64>,
    pub code: String,
    pub rate: Decimal,
    pub amount: Balance,
    pub description: Option<String>,
}

/// Totals of the seller order a line item belongs to, precomputed by the
/// splitter so order-targeted rates have their base available.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderTotals {
    pub total: Balance,
    pub tax_total: Balance,
}

/// Resolves the single effective rule for a line item.
///
/// Most specific scope wins (product > seller > global). Within the
/// winning scope the rate with the highest priority wins; a priority tie
/// there is a hard configuration error, never an arbitrary pick.
pub fn resolve_rule<'a>(
    rules: &'a [(CommissionRule, CommissionRate)],
    item: &LineItem,
) -> Result<&'a (CommissionRule, CommissionRate)> {
    let mut candidates: Vec<&(CommissionRule, CommissionRate)> =
        rules.iter().filter(|(rule, _)| rule.matches(item)).collect();
    if candidates.is_empty() {
        return Err(MarketError::ConfigurationAmbiguity(format!(
            "no commission rule matches line item {}",
            item.id
        )));
    }

    let best_specificity = candidates
        .iter()
        .map(|(rule, _)| rule.scope.specificity())
        .min()
        .unwrap_or(u8::MAX);
    candidates.retain(|(rule, _)| rule.scope.specificity() == best_specificity);

    candidates.sort_by(|a, b| b.1.priority.cmp(&a.1.priority));
    if candidates.len() > 1 && candidates[0].1.priority == candidates[1].1.priority {
        return Err(MarketError::ConfigurationAmbiguity(format!(
            "rules {} and {} tie on specificity and priority for line item {}",
            candidates[0].0.code, candidates[1].0.code, item.id
        )));
    }

    Ok(candidates[0])
}

/// Computes the commission owed for a line item under an already-resolved
/// rule. Pure function of its inputs: re-running it over the same rule
/// set and line item always yields the same line.
pub fn compute_line(
    rule: &CommissionRule,
    rate: &CommissionRate,
    item: &LineItem,
    order: OrderTotals,
) -> CommissionLine {
    let base = match (rate.target, rate.include_tax) {
        (RateTarget::ItemTotal, false) => item.total(),
        (RateTarget::ItemTotal, true) => item.total_with_tax(),
        (RateTarget::OrderTotal, false) => order.total,
        (RateTarget::OrderTotal, true) => order.total + order.tax_total,
    };

    let computed = match rate.kind {
        RateKind::Percentage => Balance::new(rate.value * base.0 / Decimal::from(100)),
        RateKind::Fixed => Balance::new(rate.value),
    };
    let amount = computed.max(rate.min_amount);

    CommissionLine {
        line_item_id: item.id,
        rate_id: Some(rate.id),
        code: rule.code.clone(),
        rate: rate.value,
        amount,
        description: Some(rate.name.clone()),
    }
}
