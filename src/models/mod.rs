//! Data models representing database entities.
//!
//! This module contains the data structures that map to database tables and
//! the request/response bodies built from them.

/// Cart lines, addresses and checkout requests
pub mod cart;
/// Orders, order details and the status sequence
pub mod order;
/// Vouchers (promotions)
pub mod voucher;
/// Wallets and ledger entries
pub mod wallet;
