//! # Booking Scan
//!
//! This crate watches an escape-room booking site for newly opened time slots.
//! It fetches each date's theme schedule and the page's hidden reservation ledger,
//! reconciles both into a verdict per slot, and announces slots that became
//! available since the previous run.

/// Errors, slot keys and wire types of the booking site
mod scan_types;
pub use scan_types::*;

/// Environment-driven configuration
mod config;
pub use config::*;

/// HTTP transport seam
mod transport;
pub use transport::*;

/// Token and ledger extraction from HTML
mod markup;
pub use markup::*;

/// Anti-forgery session lifecycle
mod session_manager;
pub use session_manager::*;

/// Site-local time source
mod clock;
pub use clock::*;

/// Slot verdict reconciliation
mod reconcile;
pub use reconcile::*;

/// Client for the reservation page and theme API
mod booking_client;
pub use booking_client::*;

/// Date-window collection of slot verdicts
mod collector;
pub use collector::*;

/// Persisted state of the previous run
mod state_store;
pub use state_store::*;

/// Polling loop and change detection
mod executor;
pub use executor::*;

/// Announcement formatting
mod notification_service;
pub use notification_service::*;

/// Telegram messenger
mod telegram_service;
pub use telegram_service::*;

#[cfg(test)]
mod test_support;
