use crate::domain::money::{Amount, Balance};
use crate::domain::order::{Cart, LineItem};
use crate::error::{MarketError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

/// One CSV row of a cart line item.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct LineItemRecord {
    pub cart: u64,
    pub customer: Option<u64>,
    pub seller: u64,
    pub product: u64,
    pub item: u64,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub tax: Option<Decimal>,
}

/// Reads cart line items from a CSV source.
///
/// Wraps `csv::Reader` with whitespace trimming and flexible record
/// lengths, yielding rows lazily so large files stream.
pub struct LineItemReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> LineItemReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    pub fn records(self) -> impl Iterator<Item = Result<LineItemRecord>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(MarketError::from))
    }
}

/// Groups records into carts, preserving first-seen cart order.
pub fn collect_carts<I>(records: I) -> Result<Vec<Cart>>
where
    I: IntoIterator<Item = Result<LineItemRecord>>,
{
    let mut carts: Vec<Cart> = Vec::new();
    for record in records {
        let record = record?;
        let item = LineItem {
            id: record.item,
            cart_id: record.cart,
            seller_id: record.seller,
            product_id: record.product,
            quantity: record.quantity,
            unit_price: Amount::new(record.unit_price)?,
            tax_total: record.tax.map(Balance::new).unwrap_or(Balance::ZERO),
        };
        match carts.iter_mut().find(|c| c.id == record.cart) {
            Some(cart) => {
                if cart.customer_id.is_none() {
                    cart.customer_id = record.customer;
                }
                cart.items.push(item);
            }
            None => carts.push(Cart {
                id: record.cart,
                customer_id: record.customer,
                payment_collection_id: None,
                items: vec![item],
            }),
        }
    }
    Ok(carts)
}
