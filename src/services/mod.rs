//! Business logic services.
//!
//! Services contain core business logic separated from HTTP handlers.
//! They handle database transactions, validation, and complex operations.

pub mod catalog;
pub mod checkout_service;
pub mod directory;
pub mod ledger;
pub mod order_status;
pub mod pricing;
pub mod stock;
pub mod voucher;
