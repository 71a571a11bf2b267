//! Herald: bulk WhatsApp sender with a delivery status ledger.
//!
//! Reads recipients from CSV, sends each a templated text or media message
//! through a WhatsApp Web bridge, and records per-recipient status,
//! updated in place as delivery and read receipts arrive.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod dispatch;
pub mod ledger;
pub mod logging;
pub mod recipients;
pub mod signal;
pub mod whatsapp;
