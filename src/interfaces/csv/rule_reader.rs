use crate::domain::commission::{CommissionRate, CommissionRule, RateKind, RateTarget, RuleScope};
use crate::domain::money::Balance;
use crate::error::{MarketError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

/// One CSV row of commission configuration: a rule and its rate together.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct RuleRecord {
    pub code: String,
    pub scope: RuleScope,
    pub reference: Option<u64>,
    pub kind: RateKind,
    pub target: RateTarget,
    pub value: Decimal,
    pub currency: String,
    pub min_amount: Option<Decimal>,
    pub include_tax: Option<bool>,
    pub priority: Option<i32>,
}

/// Reads commission rules from a CSV source.
pub struct RuleReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> RuleReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Materializes rule/rate pairs with sequential ids.
    pub fn rules(self) -> Result<Vec<(CommissionRule, CommissionRate)>> {
        let mut rules = Vec::new();
        for (idx, record) in self.reader.into_deserialize().enumerate() {
            let record: RuleRecord = record.map_err(MarketError::from)?;
            let id = idx as u64 + 1;
            let rate = CommissionRate {
                id,
                name: record.code.clone(),
                kind: record.kind,
                target: record.target,
                value: record.value,
                currency: record.currency,
                min_amount: record.min_amount.map(Balance::new).unwrap_or(Balance::ZERO),
                include_tax: record.include_tax.unwrap_or(false),
                priority: record.priority.unwrap_or(0),
            };
            let rule = CommissionRule {
                id,
                code: record.code,
                scope: record.scope,
                reference_id: record.reference,
                rate_id: id,
                enabled: true,
            };
            rules.push((rule, rate));
        }
        Ok(rules)
    }
}
