//! In-memory `MessagingClient` used by dispatcher and session tests.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use herald::whatsapp::client::{BridgeStatus, MessagingClient, PairingEvent, ReachabilityResult};
use herald::whatsapp::jid::Jid;
use herald::whatsapp::media::{sha256_base64, MediaClass, Payload, UploadedMedia};
use herald::whatsapp::WhatsAppError;

/// Scriptable fake of the bridge.
#[derive(Default)]
pub struct FakeClient {
    pub paired: bool,
    /// `connect` succeeds but the link never comes up.
    pub stay_offline: bool,
    pub connected: AtomicBool,
    pub connect_calls: AtomicUsize,
    pub pairing_events: Mutex<VecDeque<PairingEvent>>,
    /// Numbers that are not on WhatsApp.
    pub absent: HashSet<String>,
    /// Numbers whose reachability query fails.
    pub check_errors: HashSet<String>,
    /// Message id to return; `None` makes sends fail.
    pub send_id: Option<String>,
    /// Report a wrong plaintext hash from uploads.
    pub corrupt_upload: bool,
    pub checks: Mutex<Vec<String>>,
    pub uploads: Mutex<Vec<(usize, MediaClass)>>,
    pub sent: Mutex<Vec<(Jid, Payload)>>,
    pub logged_out: AtomicBool,
    pub disconnected: AtomicBool,
}

impl FakeClient {
    /// A paired, connected client whose sends succeed with `id`.
    pub fn sending(id: &str) -> Self {
        Self {
            paired: true,
            connected: AtomicBool::new(true),
            send_id: Some(id.to_owned()),
            ..Self::default()
        }
    }

    pub fn network_calls(&self) -> usize {
        let checks = self.checks.lock().map(|c| c.len()).unwrap_or(0);
        let uploads = self.uploads.lock().map(|u| u.len()).unwrap_or(0);
        let sent = self.sent.lock().map(|s| s.len()).unwrap_or(0);
        checks + uploads + sent
    }

    pub fn sent(&self) -> Vec<(Jid, Payload)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn uploads(&self) -> Vec<(usize, MediaClass)> {
        self.uploads.lock().map(|u| u.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MessagingClient for FakeClient {
    async fn status(&self) -> Result<BridgeStatus, WhatsAppError> {
        Ok(BridgeStatus {
            connected: self.connected.load(Ordering::SeqCst),
            paired: self.paired,
            push_name: None,
            phone_number: None,
        })
    }

    async fn connect(&self) -> Result<(), WhatsAppError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.paired && !self.stay_offline {
            self.connected.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn next_pairing_event(&self) -> Result<PairingEvent, WhatsAppError> {
        let next = self
            .pairing_events
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front());
        match next {
            Some(PairingEvent::Success) => {
                self.connected.store(true, Ordering::SeqCst);
                Ok(PairingEvent::Success)
            }
            Some(event) => Ok(event),
            None => Err(WhatsAppError::EmptyResponse("pairing")),
        }
    }

    async fn is_on_whatsapp(
        &self,
        numbers: &[String],
    ) -> Result<Vec<ReachabilityResult>, WhatsAppError> {
        let number = numbers.first().cloned().unwrap_or_default();
        if let Ok(mut checks) = self.checks.lock() {
            checks.push(number.clone());
        }
        if self.check_errors.contains(&number) {
            return Err(WhatsAppError::Api("check: timed out".to_owned()));
        }
        Ok(vec![ReachabilityResult {
            is_in: !self.absent.contains(&number),
            jid: None,
            query: number,
        }])
    }

    async fn upload(
        &self,
        data: &[u8],
        class: MediaClass,
    ) -> Result<UploadedMedia, WhatsAppError> {
        if let Ok(mut uploads) = self.uploads.lock() {
            uploads.push((data.len(), class));
        }
        let file_sha256 = if self.corrupt_upload {
            sha256_base64(b"something else")
        } else {
            sha256_base64(data)
        };
        Ok(UploadedMedia {
            url: "https://mmg.whatsapp.net/d/f/abc.enc".to_owned(),
            direct_path: "/v/t62/abc.enc".to_owned(),
            media_key: "bWVkaWFrZXk=".to_owned(),
            file_sha256,
            file_enc_sha256: "ZW5jaGFzaA==".to_owned(),
            file_length: data.len() as u64,
        })
    }

    async fn send_message(&self, to: &Jid, payload: &Payload) -> Result<String, WhatsAppError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((to.clone(), payload.clone()));
        }
        self.send_id
            .clone()
            .ok_or_else(|| WhatsAppError::Api("send: rejected".to_owned()))
    }

    async fn logout(&self) -> Result<(), WhatsAppError> {
        self.logged_out.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), WhatsAppError> {
        self.disconnected.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
