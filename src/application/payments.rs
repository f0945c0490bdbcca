use crate::domain::money::{Amount, Balance};
use crate::domain::order::SplitOrderPayment;
use crate::domain::ports::PaymentStoreRef;
use crate::error::{MarketError, Result};

/// Tracks per-seller captures and refunds against the single payment the
/// shopper made. The sum of captures across a collection can never
/// exceed what the payment service actually captured.
pub struct SplitPaymentTracker {
    store: PaymentStoreRef,
}

impl SplitPaymentTracker {
    pub fn new(store: PaymentStoreRef) -> Self {
        Self { store }
    }

    pub async fn record_capture(
        &self,
        order_id: u64,
        collection_id: u64,
        amount: Amount,
    ) -> Result<SplitOrderPayment> {
        let collection = self
            .store
            .get_collection(collection_id)
            .await?
            .ok_or_else(|| MarketError::not_found("payment collection", collection_id))?;

        let captured_elsewhere: Balance = self
            .store
            .split_payments_for_collection(collection_id)
            .await?
            .iter()
            .filter(|p| p.order_id != order_id)
            .map(|p| p.captured)
            .sum();
        let mut payment = self
            .store
            .split_payment_for(order_id)
            .await?
            .unwrap_or_else(|| SplitOrderPayment::new(order_id, collection_id));
        if payment.payment_collection_id != collection_id {
            return Err(MarketError::InvalidState(format!(
                "order {order_id} is tracked against collection {}, not {collection_id}",
                payment.payment_collection_id
            )));
        }

        let total_after = captured_elsewhere + payment.captured + Balance::from(amount);
        if total_after > collection.captured_total {
            return Err(MarketError::InvalidState(format!(
                "capturing {} for order {order_id} would exceed collection {collection_id}",
                amount.value()
            )));
        }

        payment.captured += Balance::from(amount);
        self.store.upsert_split_payment(payment.clone()).await?;
        Ok(payment)
    }

    pub async fn record_refund(&self, order_id: u64, amount: Amount) -> Result<SplitOrderPayment> {
        let mut payment = self
            .store
            .split_payment_for(order_id)
            .await?
            .ok_or_else(|| MarketError::not_found("split order payment", order_id))?;

        if payment.refunded + Balance::from(amount) > payment.captured {
            return Err(MarketError::InvalidState(format!(
                "refunding {} for order {order_id} would exceed its captured amount",
                amount.value()
            )));
        }
        payment.refunded += Balance::from(amount);
        self.store.upsert_split_payment(payment.clone()).await?;
        Ok(payment)
    }
}
