use crate::domain::commission::CommissionLine;
use crate::domain::money::Balance;
use crate::domain::order::{Order, OrderSet};
use crate::error::Result;
use std::io::Write;

/// Writes split results as CSV, one row per seller order.
pub struct OrderWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> OrderWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_header(&mut self) -> Result<()> {
        self.writer.write_record([
            "order_set",
            "display_id",
            "order",
            "seller",
            "total",
            "commission",
        ])?;
        Ok(())
    }

    pub fn write_order(
        &mut self,
        set: &OrderSet,
        order: &Order,
        lines: &[CommissionLine],
    ) -> Result<()> {
        let commission: Balance = lines.iter().map(|l| l.amount).sum();
        self.writer.write_record([
            set.id.to_string(),
            set.display_id.to_string(),
            order.id.to_string(),
            order.seller_id.to_string(),
            order.total().0.normalize().to_string(),
            commission.0.normalize().to_string(),
        ])?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Amount;
    use crate::domain::order::LineItem;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn test_writer_output() {
        let now = Utc::now();
        let set = OrderSet {
            id: 1,
            display_id: 7,
            cart_id: 3,
            customer_id: None,
            created_at: now,
            updated_at: now,
        };
        let order = Order {
            id: 2,
            order_set_id: 1,
            seller_id: 10,
            items: vec![LineItem {
                id: 1,
                cart_id: 3,
                seller_id: 10,
                product_id: 100,
                quantity: 1,
                unit_price: Amount::new(dec!(50.0)).unwrap(),
                tax_total: Balance::ZERO,
            }],
        };
        let lines = vec![CommissionLine {
            line_item_id: 1,
            rate_id: Some(1),
            code: "global-default".to_string(),
            rate: dec!(10),
            amount: Balance::new(dec!(5.00)),
            description: None,
        }];

        let mut buf = Vec::new();
        {
            let mut writer = OrderWriter::new(&mut buf);
            writer.write_header().unwrap();
            writer.write_order(&set, &order, &lines).unwrap();
            writer.flush().unwrap();
        }
        let output = String::from_utf8(buf).unwrap();
        assert!(output.contains("order_set,display_id,order,seller,total,commission"));
        assert!(output.contains("1,7,2,10,50,5"));
    }
}
