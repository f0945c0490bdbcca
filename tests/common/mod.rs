use std::fs::File;
use std::io::Error;
use std::path::Path;

pub const ITEMS_HEADER: [&str; 8] = [
    "cart",
    "customer",
    "seller",
    "product",
    "item",
    "quantity",
    "unit_price",
    "tax",
];

/// Writes a line-items CSV with one cart per `cart_id`, each holding one
/// item per seller in `sellers`.
pub fn generate_items_csv(path: &Path, carts: &[(u64, &[u64])]) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record(ITEMS_HEADER)?;
    let mut item_id = 0;
    for (cart_id, sellers) in carts {
        for seller in *sellers {
            item_id += 1;
            wtr.write_record([
                cart_id.to_string(),
                String::new(),
                seller.to_string(),
                item_id.to_string(),
                item_id.to_string(),
                "1".to_string(),
                "10.0".to_string(),
                String::new(),
            ])?;
        }
    }
    wtr.flush()?;
    Ok(())
}
