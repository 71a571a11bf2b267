//! Delivery dispatcher: resolves, checks, sends and records one recipient at a time.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::ledger::{Ledger, Status};
use crate::recipients::Recipients;
use crate::signal::OneShot;
use crate::whatsapp::client::MessagingClient;
use crate::whatsapp::jid::{self, Jid};
use crate::whatsapp::media::{verify_upload, MediaAttachment, MediaKind, Payload};
use crate::whatsapp::WhatsAppError;

/// Placeholder replaced by the recipient's display name.
pub const NAME_PLACEHOLDER: &str = "{name}";

/// Failures while building or sending one message. Fatal only for that
/// recipient; recorded as [`Status::SendFailed`].
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// No media is configured and the caption is empty.
    #[error("message must not be empty when no media is attached")]
    EmptyMessage,

    /// The media file extension is not jpeg, png or mp4.
    #[error("unsupported media format: {0:?}")]
    UnsupportedFormat(String),

    /// The media file could not be read.
    #[error("failed to read media {path}: {source}")]
    ReadMedia {
        /// Media file path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The bridge's upload metadata does not match the local file.
    #[error("upload integrity check failed: {0}")]
    Integrity(String),

    /// Upload or send failed at the bridge.
    #[error(transparent)]
    Client(#[from] WhatsAppError),
}

/// Message text with a `{name}` placeholder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageTemplate(String);

impl MessageTemplate {
    /// Wrap template text.
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Substitute `name` for every placeholder.
    pub fn render(&self, name: &str) -> String {
        self.0.replace(NAME_PLACEHOLDER, name)
    }
}

/// Uniform random pause between sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayWindow {
    /// Shortest pause.
    pub min: Duration,
    /// Longest pause.
    pub max: Duration,
}

impl DelayWindow {
    /// No pause at all.
    pub const NONE: DelayWindow = DelayWindow {
        min: Duration::ZERO,
        max: Duration::ZERO,
    };

    /// Draw a pause uniformly from `[min, max]`.
    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let min_ms = u64::try_from(self.min.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
    }
}

impl Default for DelayWindow {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(60),
            max: Duration::from_secs(180),
        }
    }
}

/// What to send and how fast.
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// Caption / body template.
    pub template: MessageTemplate,
    /// Media attached to every message; text-only when `None`.
    pub media_path: Option<PathBuf>,
    /// Pause after each send attempt.
    pub delay: DelayWindow,
}

/// Outcome counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    counts: HashMap<Status, usize>,
}

impl DispatchSummary {
    fn record(&mut self, status: Status) {
        let count = self.counts.entry(status).or_insert(0);
        *count = count.saturating_add(1);
    }

    /// Recipients that ended with `status`.
    pub fn count(&self, status: Status) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    /// Recipients processed.
    pub fn total(&self) -> usize {
        self.counts.values().fold(0, |acc, n| acc.saturating_add(*n))
    }
}

/// Sends the configured message to each recipient in turn.
pub struct Dispatcher<C: MessagingClient + ?Sized> {
    client: Arc<C>,
    ledger: Arc<Ledger>,
    options: DispatchOptions,
}

impl<C: MessagingClient + ?Sized> Dispatcher<C> {
    /// Create a dispatcher.
    pub fn new(client: Arc<C>, ledger: Arc<Ledger>, options: DispatchOptions) -> Self {
        Self {
            client,
            ledger,
            options,
        }
    }

    /// Process recipients in order until done or `shutdown` fires.
    ///
    /// A send already in flight is allowed to finish; shutdown only stops
    /// the next recipient from starting and cuts the pause short.
    pub async fn run(&self, recipients: &Recipients, shutdown: &OneShot) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        let total = recipients.len();

        for (i, recipient) in recipients.iter().enumerate() {
            if shutdown.is_fired() {
                info!(remaining = total.saturating_sub(i), "shutdown requested, stopping dispatch");
                break;
            }
            info!(number = %recipient.number, name = %recipient.name, "processing recipient");
            let status = self.dispatch_one(&recipient.number, &recipient.name).await;
            summary.record(status);

            let attempted = matches!(status, Status::Sent | Status::SendFailed);
            let last = i.saturating_add(1) == total;
            if attempted && !last {
                let pause = self.options.delay.sample();
                info!(secs = pause.as_secs(), "waiting before next recipient");
                tokio::select! {
                    () = tokio::time::sleep(pause) => {}
                    () = shutdown.wait() => {}
                }
            }
        }

        summary
    }

    /// Deliver to one recipient and record exactly one ledger update.
    pub async fn dispatch_one(&self, number: &str, name: &str) -> Status {
        let jid = jid::resolve(number);
        if jid.is_empty() {
            warn!(number, "invalid number");
            return self.record(number, "", Status::InvalidNumber);
        }

        match self.client.is_on_whatsapp(&[number.to_owned()]).await {
            Err(e) => {
                warn!(number, error = %e, "reachability check failed");
                return self.record(number, "", Status::CheckFailed);
            }
            Ok(results) if !results.first().is_some_and(|r| r.is_in) => {
                warn!(number, "number is not on WhatsApp");
                return self.record(number, "", Status::NotOnWhatsapp);
            }
            Ok(_) => {}
        }

        let caption = self.options.template.render(name);
        match self.send(&jid, caption).await {
            Ok(message_id) => {
                info!(number, %message_id, "message sent");
                self.record(number, &message_id, Status::Sent)
            }
            Err(e) => {
                warn!(number, error = %e, "failed to send message");
                self.record(number, "", Status::SendFailed)
            }
        }
    }

    async fn send(&self, to: &Jid, caption: String) -> Result<String, SendError> {
        let payload = match &self.options.media_path {
            None => {
                if caption.is_empty() {
                    return Err(SendError::EmptyMessage);
                }
                Payload::Text { body: caption }
            }
            Some(path) => {
                let kind = MediaKind::from_path(path).ok_or_else(|| {
                    SendError::UnsupportedFormat(
                        path.extension()
                            .map(|e| e.to_string_lossy().into_owned())
                            .unwrap_or_default(),
                    )
                })?;
                let data = tokio::fs::read(path)
                    .await
                    .map_err(|source| SendError::ReadMedia {
                        path: path.clone(),
                        source,
                    })?;
                let uploaded = self.client.upload(&data, kind.class()).await?;
                verify_upload(&data, &uploaded).map_err(SendError::Integrity)?;
                let length = u64::try_from(data.len()).unwrap_or(u64::MAX);
                Payload::media(kind, caption, MediaAttachment::from_upload(uploaded, kind, length))
            }
        };
        Ok(self.client.send_message(to, &payload).await?)
    }

    fn record(&self, number: &str, message_id: &str, status: Status) -> Status {
        if let Err(e) = self.ledger.update(number, message_id, status) {
            warn!(number, error = %e, "failed to write status ledger");
        }
        status
    }
}
