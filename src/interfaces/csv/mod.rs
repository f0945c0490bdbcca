pub mod line_item_reader;
pub mod order_writer;
pub mod rule_reader;
