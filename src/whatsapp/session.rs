//! Session setup: QR pairing, reconnect, readiness wait, and logout.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use qrcode::render::unicode::Dense1x2;
use qrcode::{EcLevel, QrCode};
use tracing::{info, warn};

use super::client::{MessagingClient, PairingEvent};
use super::WhatsAppError;
use crate::signal::OneShot;

/// Default time to wait for the connection to become ready.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors while establishing a session. All are fatal to the run.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Talking to the bridge failed.
    #[error("connection failed: {0}")]
    Connect(#[from] WhatsAppError),

    /// No QR code was scanned in time; the user must restart.
    #[error("QR code expired, restart to generate a new one")]
    PairingExpired,

    /// The bridge reported a pairing failure.
    #[error("pairing failed: {0}")]
    Pairing(String),

    /// The connection did not become ready within the timeout.
    #[error("not connected to WhatsApp after {0:?}")]
    NotReady(Duration),

    /// This device was unlinked from the phone.
    #[error("logged out from another device")]
    ForcedLogout,
}

/// Where pairing QR codes are shown.
#[derive(Debug, Clone, Default)]
pub struct PairingOutput {
    /// File the QR PNG is written to, when the bridge supplies one.
    pub qr_png_path: Option<PathBuf>,
}

impl PairingOutput {
    /// Show a pairing code to the user.
    ///
    /// The code is always drawn on stdout; a bridge-supplied PNG is also
    /// written to `qr_png_path` when one is configured.
    pub fn render(&self, code: &str, qr_png: Option<&str>) {
        println!("\nScan this QR code with WhatsApp on your phone:");
        match render_qr(code) {
            Ok(block) => println!("{block}"),
            Err(e) => {
                warn!(error = %e, "failed to draw QR code");
                println!("{code}");
            }
        }
        if let (Some(png), Some(path)) = (qr_png, self.qr_png_path.as_deref()) {
            match write_png(path, png) {
                Ok(()) => println!("QR image also written to {}", path.display()),
                Err(e) => warn!(error = %e, path = %path.display(), "failed to write QR image"),
            }
        }
    }
}

/// Draw `code` as a QR code in Unicode half-block characters.
///
/// Colours are inverted for dark terminals: dark modules print as blanks.
///
/// # Errors
///
/// Returns an error if `code` is too long for a QR code.
pub fn render_qr(code: &str) -> Result<String, qrcode::types::QrError> {
    let qr = QrCode::with_error_correction_level(code, EcLevel::L)?;
    Ok(qr
        .render::<Dense1x2>()
        .dark_color(Dense1x2::Light)
        .light_color(Dense1x2::Dark)
        .build())
}

fn write_png(path: &Path, png_base64: &str) -> anyhow::Result<()> {
    let bytes = STANDARD.decode(png_base64.trim())?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Connect to WhatsApp, pairing first if no session exists, then wait for
/// `readiness` up to `ready_timeout`.
///
/// `readiness` is normally fired by the event handler once the account
/// name is known. If it does not fire in time but the bridge still reports
/// a live connection, setup proceeds anyway.
///
/// # Errors
///
/// Returns [`SessionError`] if pairing expires or fails, the bridge is
/// unreachable, or no connection exists after the timeout.
pub async fn establish<C: MessagingClient + ?Sized>(
    client: &C,
    readiness: &OneShot,
    pairing: &PairingOutput,
    ready_timeout: Duration,
) -> Result<(), SessionError> {
    let status = client.status().await?;

    if status.paired {
        info!(
            push_name = status.push_name.as_deref().unwrap_or("unknown"),
            phone = status.phone_number.as_deref().unwrap_or("unknown"),
            "resuming stored session"
        );
        client.connect().await?;
        if client.is_connected().await {
            readiness.fire();
        }
    } else {
        info!("no stored session, starting QR pairing");
        client.connect().await?;
        loop {
            match client.next_pairing_event().await? {
                PairingEvent::Code { code, qr_png } => pairing.render(&code, qr_png.as_deref()),
                PairingEvent::Success => {
                    info!("device paired");
                    println!("\nSuccessfully paired!");
                    break;
                }
                PairingEvent::Timeout => return Err(SessionError::PairingExpired),
                PairingEvent::Error { message } => return Err(SessionError::Pairing(message)),
            }
        }
    }

    info!("waiting for connection to become ready");
    if readiness.wait_timeout(ready_timeout).await {
        info!("WhatsApp connection ready");
        return Ok(());
    }
    if client.is_connected().await {
        info!("connected to WhatsApp without account name notification");
        return Ok(());
    }
    Err(SessionError::NotReady(ready_timeout))
}

/// Unlink this device and delete the local session directory.
///
/// # Errors
///
/// Returns an error if the bridge rejects the logout or the directory
/// cannot be removed.
pub async fn logout<C: MessagingClient + ?Sized>(
    client: &C,
    session_dir: &Path,
) -> anyhow::Result<()> {
    client.logout().await?;
    match std::fs::remove_dir_all(session_dir) {
        Ok(()) => info!(path = %session_dir.display(), "session data deleted"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(anyhow::anyhow!(
                "failed to delete session data at {}: {e}",
                session_dir.display()
            ))
        }
    }
    Ok(())
}
