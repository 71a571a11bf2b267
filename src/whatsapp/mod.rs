//! WhatsApp adapter: bridge client, event listener, session setup, JIDs and media.
//!
//! The wire protocol lives in a WhatsApp Web bridge sidecar. This module
//! talks to it over HTTP and long-polls `/events/poll` for notifications.

pub mod client;
pub mod events;
pub mod jid;
pub mod media;
pub mod session;

/// Errors from the WhatsApp bridge.
#[derive(Debug, thiserror::Error)]
pub enum WhatsAppError {
    /// HTTP request to the bridge failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The bridge is not running or not reachable.
    #[error("bridge not running")]
    BridgeNotRunning,

    /// The bridge answered with `success: false` or a non-2xx status.
    #[error("bridge error: {0}")]
    Api(String),

    /// The bridge answered successfully but without a payload.
    #[error("bridge returned no data for {0}")]
    EmptyResponse(&'static str),
}
