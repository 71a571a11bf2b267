//! Client for the WhatsApp Web bridge sidecar.
//!
//! [`MessagingClient`] is the contract the rest of the crate depends on;
//! [`BridgeClient`] implements it over the bridge's HTTP API.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::jid::Jid;
use super::media::{MediaClass, Payload, UploadedMedia};
use super::WhatsAppError;

/// Default port the WhatsApp bridge listens on.
pub const DEFAULT_BRIDGE_PORT: u16 = 3001;

/// HTTP connect timeout for the reqwest client.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// HTTP request timeout for normal operations. Uploads of large videos and
/// the pairing long-poll need more than this, see [`LONG_REQUEST_TIMEOUT_SECS`].
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Timeout for uploads and pairing long-polls.
const LONG_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Connection status from the bridge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeStatus {
    /// Whether the bridge holds a live WhatsApp connection.
    pub connected: bool,
    /// Whether a linked device exists in the bridge's session store.
    #[serde(default)]
    pub paired: bool,
    /// Account display name, once known.
    #[serde(default)]
    pub push_name: Option<String>,
    /// The phone number linked, if paired.
    #[serde(default)]
    pub phone_number: Option<String>,
}

/// One step of the device-linking flow.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum PairingEvent {
    /// A new QR payload to scan.
    Code {
        /// Raw QR payload string.
        code: String,
        /// QR rendered as a base64 PNG, when the bridge provides one.
        #[serde(default)]
        qr_png: Option<String>,
    },
    /// The phone scanned the code and the device is linked.
    Success,
    /// All QR codes expired without a scan.
    Timeout,
    /// Pairing failed on the bridge side.
    Error {
        /// Bridge-provided description.
        #[serde(default)]
        message: String,
    },
}

/// Reachability answer for one queried number.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReachabilityResult {
    /// The number as queried.
    pub query: String,
    /// Resolved JID, if registered.
    #[serde(default)]
    pub jid: Option<String>,
    /// Whether the number has a WhatsApp account.
    pub is_in: bool,
}

/// Operations this crate needs from a WhatsApp client.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Current connection and pairing status.
    async fn status(&self) -> Result<BridgeStatus, WhatsAppError>;

    /// Connect (or reconnect) using the stored session.
    async fn connect(&self) -> Result<(), WhatsAppError>;

    /// Whether the link to WhatsApp is live.
    async fn is_connected(&self) -> bool;

    /// Wait for the next pairing event while no session exists.
    async fn next_pairing_event(&self) -> Result<PairingEvent, WhatsAppError>;

    /// Ask WhatsApp which of `numbers` have accounts.
    async fn is_on_whatsapp(
        &self,
        numbers: &[String],
    ) -> Result<Vec<ReachabilityResult>, WhatsAppError>;

    /// Encrypt and upload media bytes.
    async fn upload(&self, data: &[u8], class: MediaClass)
        -> Result<UploadedMedia, WhatsAppError>;

    /// Send a message, returning the assigned message id.
    async fn send_message(&self, to: &Jid, payload: &Payload) -> Result<String, WhatsAppError>;

    /// Unlink this device and invalidate the stored session.
    async fn logout(&self) -> Result<(), WhatsAppError>;

    /// Close the connection, keeping the session.
    async fn disconnect(&self) -> Result<(), WhatsAppError>;
}

/// Client for the bridge HTTP API.
pub struct BridgeClient {
    client: reqwest::Client,
    base_url: String,
}

/// Response envelope from the bridge HTTP API.
#[derive(Deserialize)]
struct BridgeResponse<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct SendResponse {
    id: String,
}

impl BridgeClient {
    /// Create a new client pointing at the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeouts, using default");
                reqwest::Client::default()
            });
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { client, base_url }
    }

    /// Returns the base URL of the bridge.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Unwrap the response envelope, turning bridge-reported failures into errors.
    async fn decode<T: DeserializeOwned>(
        resp: reqwest::Response,
        what: &'static str,
    ) -> Result<Option<T>, WhatsAppError> {
        let status = resp.status();
        let body: BridgeResponse<T> = match resp.json().await {
            Ok(body) => body,
            Err(e) if status.is_success() => return Err(e.into()),
            Err(_) => return Err(WhatsAppError::Api(format!("{what}: HTTP {status}"))),
        };
        if !status.is_success() || !body.success {
            let msg = body.error.unwrap_or_else(|| format!("HTTP {status}"));
            return Err(WhatsAppError::Api(format!("{what}: {msg}")));
        }
        Ok(body.data)
    }

    async fn post_unit(&self, path: &str, what: &'static str) -> Result<(), WhatsAppError> {
        let resp = self.client.post(self.url(path)).send().await?;
        Self::decode::<serde_json::Value>(resp, what).await?;
        Ok(())
    }
}

#[async_trait]
impl MessagingClient for BridgeClient {
    async fn status(&self) -> Result<BridgeStatus, WhatsAppError> {
        let resp = match self.client.get(self.url("/status")).send().await {
            Ok(resp) => resp,
            Err(e) if e.is_connect() => return Err(WhatsAppError::BridgeNotRunning),
            Err(e) => return Err(e.into()),
        };
        Self::decode(resp, "status")
            .await?
            .ok_or(WhatsAppError::EmptyResponse("status"))
    }

    async fn connect(&self) -> Result<(), WhatsAppError> {
        self.post_unit("/connect", "connect").await
    }

    async fn is_connected(&self) -> bool {
        match self.status().await {
            Ok(status) => status.connected,
            Err(e) => {
                debug!(error = %e, "status check failed");
                false
            }
        }
    }

    async fn next_pairing_event(&self) -> Result<PairingEvent, WhatsAppError> {
        let resp = self
            .client
            .get(self.url("/pair/events"))
            .timeout(std::time::Duration::from_secs(LONG_REQUEST_TIMEOUT_SECS))
            .send()
            .await?;
        Self::decode(resp, "pairing")
            .await?
            .ok_or(WhatsAppError::EmptyResponse("pairing"))
    }

    async fn is_on_whatsapp(
        &self,
        numbers: &[String],
    ) -> Result<Vec<ReachabilityResult>, WhatsAppError> {
        let body = serde_json::json!({ "numbers": numbers });
        let resp = self
            .client
            .post(self.url("/check"))
            .json(&body)
            .send()
            .await?;
        Ok(Self::decode(resp, "check").await?.unwrap_or_default())
    }

    async fn upload(
        &self,
        data: &[u8],
        class: MediaClass,
    ) -> Result<UploadedMedia, WhatsAppError> {
        let body = serde_json::json!({
            "media_type": class,
            "data": STANDARD.encode(data),
        });
        let resp = self
            .client
            .post(self.url("/upload"))
            .timeout(std::time::Duration::from_secs(LONG_REQUEST_TIMEOUT_SECS))
            .json(&body)
            .send()
            .await?;
        Self::decode(resp, "upload")
            .await?
            .ok_or(WhatsAppError::EmptyResponse("upload"))
    }

    async fn send_message(&self, to: &Jid, payload: &Payload) -> Result<String, WhatsAppError> {
        let body = serde_json::json!({ "jid": to.to_string(), "message": payload });
        let resp = self
            .client
            .post(self.url("/send"))
            .json(&body)
            .send()
            .await?;
        let sent: SendResponse = Self::decode(resp, "send")
            .await?
            .ok_or(WhatsAppError::EmptyResponse("send"))?;
        debug!(jid = %to, id = %sent.id, "message sent via WhatsApp");
        Ok(sent.id)
    }

    async fn logout(&self) -> Result<(), WhatsAppError> {
        self.post_unit("/logout", "logout").await
    }

    async fn disconnect(&self) -> Result<(), WhatsAppError> {
        self.post_unit("/disconnect", "disconnect").await
    }
}
