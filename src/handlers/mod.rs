//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, URL params, etc.)
//! 2. Calls into the services
//! 3. Returns HTTP response (JSON, status code)

/// Price preview, checkout and promotions endpoints
pub mod checkout;
/// Health check endpoint
pub mod health;
/// Order status endpoint
pub mod orders;
/// Wallet endpoints
pub mod wallets;
