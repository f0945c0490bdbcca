pub mod checkout;
pub mod commission;
pub mod onboarding;
pub mod payments;
pub mod payouts;
pub mod saga;
pub mod webhooks;
