//! Application configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to automatically deserialize environment variables into a type-safe struct.

use std::time::Duration;

use serde::Deserialize;

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `DATABASE_MAX_CONNECTIONS` (optional): pool size, defaults to 5
/// - `DELIVERY_ESTIMATE_DAYS` (optional): days added to the order date for the
///   estimated delivery, defaults to 7
/// - `CHECKOUT_TIMEOUT_SECS` (optional): time budget for one checkout or status
///   transaction, defaults to 10
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,

    #[serde(default = "default_delivery_days")]
    pub delivery_estimate_days: u32,

    #[serde(default = "default_checkout_timeout")]
    pub checkout_timeout_secs: u64,
}

/// Default port if SERVER_PORT environment variable is not set.
fn default_port() -> u16 {
    3000
}

fn default_max_connections() -> u32 {
    5
}

fn default_delivery_days() -> u32 {
    7
}

fn default_checkout_timeout() -> u64 {
    10
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This method first attempts to load a `.env` file (which is optional),
    /// then reads environment variables and deserializes them into a Config struct.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Required environment variables are missing (e.g., DATABASE_URL)
    /// - Environment variable values cannot be parsed into expected types
    pub fn from_env() -> Result<Self, envy::Error> {
        // Try to load .env file if it exists (does nothing if not found)
        dotenvy::dotenv().ok();

        // Field names are automatically converted: database_url -> DATABASE_URL
        envy::from_env::<Config>()
    }

    /// Settings consumed by the checkout and order status services.
    pub fn checkout_settings(&self) -> CheckoutSettings {
        CheckoutSettings {
            delivery_estimate_days: self.delivery_estimate_days,
            transaction_timeout: Duration::from_secs(self.checkout_timeout_secs),
        }
    }
}

/// Tunables for the checkout pipeline and order transitions.
#[derive(Debug, Clone, Copy)]
pub struct CheckoutSettings {
    /// Days between the order date and the estimated delivery.
    pub delivery_estimate_days: u32,

    /// Upper bound on a single checkout (or status transition) transaction,
    /// lock waits included.
    pub transaction_timeout: Duration,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            delivery_estimate_days: default_delivery_days(),
            transaction_timeout: Duration::from_secs(default_checkout_timeout()),
        }
    }
}
