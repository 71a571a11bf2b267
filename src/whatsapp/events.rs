//! Event listener for WhatsApp notifications.
//!
//! A poller task long-polls the bridge's `/events/poll` endpoint and pushes
//! events into a bounded mpsc channel. [`EventHandler`] drains the channel,
//! firing readiness, recording receipts in the ledger, and reporting a
//! remote logout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::jid::{self, Jid};
use super::session::SessionError;
use crate::ledger::{Ledger, Status};
use crate::signal::OneShot;

/// A notification from the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WhatsAppEvent {
    /// WhatsApp connection established.
    Connected {
        /// Account display name, if already known.
        #[serde(default)]
        push_name: Option<String>,
    },
    /// The account display name was received or changed.
    PushNameSetting {
        /// New display name.
        push_name: String,
    },
    /// This device was unlinked from the phone.
    LoggedOut {
        /// Human-readable reason, if available.
        #[serde(default)]
        reason: Option<String>,
    },
    /// Delivery or read receipt for sent messages.
    Receipt {
        /// JID of the chat member that sent the receipt.
        sender: String,
        /// Message ids covered by this receipt.
        #[serde(default)]
        message_ids: Vec<String>,
        /// Receipt type, e.g. `delivered`, `read`, `played`.
        receipt_type: String,
    },
    /// WhatsApp connection lost.
    Disconnected {
        /// Human-readable reason, if available.
        #[serde(default)]
        reason: Option<String>,
    },
}

/// Long-poll timeout for the HTTP client (seconds).
const POLL_TIMEOUT_SECS: u64 = 60;

/// Maximum reconnect backoff (milliseconds).
const MAX_BACKOFF_MS: u64 = 30_000;

/// Spawn an event listener that forwards events to the given channel.
///
/// Returns immediately. The listener runs as a background Tokio task and
/// reconnects automatically with exponential backoff. It stops when the
/// receiving side of `event_tx` is dropped or the task is aborted.
pub fn spawn_event_listener(
    base_url: String,
    event_tx: mpsc::Sender<WhatsAppEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let poll_url = format!("{}/events/poll", base_url.trim_end_matches('/'));
        let mut backoff_ms: u64 = 1000;

        loop {
            info!(url = %poll_url, "connecting to WhatsApp event stream");

            match poll_events(&poll_url, &event_tx).await {
                Ok(()) => {
                    info!("WhatsApp event stream closed normally");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, backoff_ms, "WhatsApp event stream error, reconnecting");
                    tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                    backoff_ms = backoff_ms.saturating_mul(2).min(MAX_BACKOFF_MS);
                }
            }
        }
    })
}

/// Poll the bridge for events in a loop. Returns `Err` on non-timeout
/// network errors so the caller can reconnect with backoff.
async fn poll_events(
    poll_url: &str,
    event_tx: &mpsc::Sender<WhatsAppEvent>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(POLL_TIMEOUT_SECS))
        .build()?;

    loop {
        match client.get(poll_url).send().await {
            Ok(resp) if resp.status().is_success() => {
                match resp.json::<Vec<WhatsAppEvent>>().await {
                    Ok(events) => {
                        for event in events {
                            debug!(?event, "received WhatsApp event");
                            if event_tx.send(event).await.is_err() {
                                // Receiver dropped.
                                return Ok(());
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "undecodable event batch"),
                }
            }
            Ok(resp) => {
                debug!(status = %resp.status(), "event poll returned non-200");
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
            Err(e) if e.is_timeout() => {
                // Long-poll expired with nothing to report.
                continue;
            }
            Err(e) => {
                return Err(e.into());
            }
        }
    }
}

/// Map a receipt type to a ledger status. Other receipt kinds are ignored.
pub fn receipt_status(receipt_type: &str) -> Option<Status> {
    match receipt_type {
        "delivered" => Some(Status::Delivered),
        "read" => Some(Status::Read),
        _ => None,
    }
}

/// Consumes bridge events on behalf of the run.
pub struct EventHandler {
    ledger: Arc<Ledger>,
    readiness: Arc<OneShot>,
    /// Last seen link state, from `Connected` / `Disconnected`.
    link_up: AtomicBool,
}

impl EventHandler {
    /// Create a handler feeding `ledger` and firing `readiness`.
    pub fn new(ledger: Arc<Ledger>, readiness: Arc<OneShot>) -> Self {
        Self {
            ledger,
            readiness,
            link_up: AtomicBool::new(false),
        }
    }

    /// Drain `events` until the channel closes.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ForcedLogout`] as soon as a logout event
    /// arrives; the run must end.
    pub async fn run(self, mut events: mpsc::Receiver<WhatsAppEvent>) -> Result<(), SessionError> {
        while let Some(event) = events.recv().await {
            self.handle(event)?;
        }
        debug!("event channel closed");
        Ok(())
    }

    /// Apply one event.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ForcedLogout`] for a logout event.
    pub fn handle(&self, event: WhatsAppEvent) -> Result<(), SessionError> {
        match event {
            WhatsAppEvent::Connected { push_name } => {
                self.link_up.store(true, Ordering::Release);
                self.on_identity(push_name.as_deref().unwrap_or_default());
            }
            WhatsAppEvent::PushNameSetting { push_name } => self.on_identity(&push_name),
            WhatsAppEvent::LoggedOut { reason } => {
                warn!(reason = reason.as_deref().unwrap_or("unknown"), "logged out remotely");
                println!("\nYou have been logged out from another device.");
                println!("Please restart the application to generate a new QR code.");
                return Err(SessionError::ForcedLogout);
            }
            WhatsAppEvent::Receipt {
                sender,
                message_ids,
                receipt_type,
            } => self.on_receipt(&sender, &message_ids, &receipt_type),
            WhatsAppEvent::Disconnected { reason } => {
                self.link_up.store(false, Ordering::Release);
                warn!(reason = reason.as_deref().unwrap_or("unknown"), "WhatsApp disconnected");
            }
        }
        Ok(())
    }

    /// Readiness needs both an account name and a live link.
    fn on_identity(&self, push_name: &str) {
        if push_name.is_empty() {
            return;
        }
        if !self.link_up.load(Ordering::Acquire) {
            debug!(push_name, "account name seen while disconnected");
            return;
        }
        if self.readiness.fire() {
            info!(push_name, "login succeeded");
        }
    }

    fn on_receipt(&self, sender: &str, message_ids: &[String], receipt_type: &str) {
        let Some(status) = receipt_status(receipt_type) else {
            debug!(receipt_type, "ignoring receipt");
            return;
        };
        let Some(message_id) = message_ids.first() else {
            debug!(sender, "receipt without message ids");
            return;
        };
        let number = sender_user(sender);
        if let Err(e) = self.ledger.update(&number, message_id, status) {
            warn!(error = %e, %number, %message_id, "failed to record receipt");
        }
    }
}

/// User part of a receipt sender JID, or the raw string if it does not parse.
fn sender_user(sender: &str) -> String {
    let parsed: Jid = jid::resolve(sender);
    if parsed.is_empty() {
        sender.to_owned()
    } else {
        parsed.user
    }
}
