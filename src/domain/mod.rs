pub mod commission;
pub mod events;
pub mod money;
pub mod order;
pub mod payout;
pub mod ports;
