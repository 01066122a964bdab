pub mod cart;
pub mod checkout;
pub mod orders;
pub mod payment_gateway;
pub mod payment_status;
pub mod webhooks;
