use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events published by the core for out-of-core consumers (notification,
/// payout crediting, catalog reindexing).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    OrderSetPlaced {
        order_set_id: u64,
        order_ids: Vec<u64>,
        cart_id: u64,
    },
}

/// Raw webhook payload as handed over by the HTTP endpoint (out of core).
/// The dispatcher parses it into a `ProviderEvent` before reconciling.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderWebhook {
    pub provider: String,
    pub body: String,
    pub signature: Option<String>,
}

/// Typed provider event. The wire format is an internally-tagged JSON
/// object, e.g. `{"type": "account.activated", "account_ref": "acct_1"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProviderEvent {
    #[serde(rename = "account.activated")]
    AccountActivated {
        account_ref: String,
        #[serde(default)]
        context: Value,
    },
    #[serde(rename = "account.rejected")]
    AccountRejected {
        account_ref: String,
        #[serde(default)]
        reason: Option<String>,
    },
    #[serde(rename = "payout.settled")]
    PayoutSettled { transfer_ref: String },
    #[serde(rename = "payout.reversed")]
    PayoutReversed {
        transfer_ref: String,
        reversal_ref: String,
        amount: Decimal,
        currency: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_provider_event_parsing() {
        let event: ProviderEvent =
            serde_json::from_str(r#"{"type": "account.activated", "account_ref": "acct_1"}"#)
                .unwrap();
        assert_eq!(
            event,
            ProviderEvent::AccountActivated {
                account_ref: "acct_1".to_string(),
                context: Value::Null,
            }
        );

        let event: ProviderEvent = serde_json::from_str(
            r#"{"type": "payout.reversed", "transfer_ref": "tr_1", "reversal_ref": "rev_1", "amount": "25.0", "currency": "usd"}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            ProviderEvent::PayoutReversed {
                transfer_ref: "tr_1".to_string(),
                reversal_ref: "rev_1".to_string(),
                amount: dec!(25.0),
                currency: "usd".to_string(),
            }
        );
    }

    #[test]
    fn test_unknown_event_type_is_rejected() {
        let result: Result<ProviderEvent, _> =
            serde_json::from_str(r#"{"type": "account.debited", "account_ref": "acct_1"}"#);
        assert!(result.is_err());
    }
}
