pub mod donations;
pub mod metrics;
pub mod root;
pub mod time_slots;
pub mod vouchers;
pub mod webhooks;
