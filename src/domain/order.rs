use crate::domain::money::{Amount, Balance};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One line of a shopper's cart. Carries the seller so the splitter can
/// partition the cart, and the product so commission rules can target it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: u64,
    pub cart_id: u64,
    pub seller_id: u64,
    pub product_id: u64,
    pub quantity: u32,
    pub unit_price: Amount,
    /// Tax already computed for the whole line. Only enters commission
    /// bases when the winning rate is tax-inclusive.
    pub tax_total: Balance,
}

impl LineItem {
    /// Line total excluding tax.
    pub fn total(&self) -> Balance {
        Balance::new(self.unit_price.value() * Decimal::from(self.quantity))
    }

    pub fn total_with_tax(&self) -> Balance {
        self.total() + self.tax_total
    }
}

/// A checked-out cart as read from the cart service. Read-only input to
/// the splitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    pub id: u64,
    pub customer_id: Option<u64>,
    pub payment_collection_id: Option<u64>,
    pub items: Vec<LineItem>,
}

impl Cart {
    /// Cart total net of platform-level discounts (those are already
    /// baked into the unit prices by the cart service).
    pub fn total(&self) -> Balance {
        self.items.iter().map(LineItem::total).sum()
    }
}

/// Aggregate root for one checkout event. Exactly one exists per cart id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSet {
    pub id: u64,
    pub display_id: u64,
    pub cart_id: u64,
    pub customer_id: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One per seller within an `OrderSet`. Owns the subset of the cart's
/// line items whose seller matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    pub order_set_id: u64,
    pub seller_id: u64,
    pub items: Vec<LineItem>,
}

impl Order {
    pub fn total(&self) -> Balance {
        self.items.iter().map(LineItem::total).sum()
    }
}

/// The shopper's single payment, owned by the external payment service.
/// Registered locally so per-seller captures can be capped against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentCollection {
    pub id: u64,
    pub captured_total: Balance,
}

/// Per split order view of the shared payment collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitOrderPayment {
    pub order_id: u64,
    pub payment_collection_id: u64,
    pub captured: Balance,
    pub refunded: Balance,
}

impl SplitOrderPayment {
    pub fn new(order_id: u64, payment_collection_id: u64) -> Self {
        Self {
            order_id,
            payment_collection_id,
            captured: Balance::ZERO,
            refunded: Balance::ZERO,
        }
    }
}
