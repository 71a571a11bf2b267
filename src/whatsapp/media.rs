//! Media classification, upload metadata and outbound payloads.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Upload class understood by the bridge (selects the media encryption keys).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaClass {
    /// Still image.
    Image,
    /// Video clip.
    Video,
}

/// Supported media file kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// `.jpg` / `.jpeg`
    Jpeg,
    /// `.png`
    Png,
    /// `.mp4`
    Mp4,
}

impl MediaKind {
    /// Classify a file by its extension (case-insensitive).
    ///
    /// Returns `None` for anything other than jpeg, png or mp4.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "mp4" => Some(Self::Mp4),
            _ => None,
        }
    }

    /// MIME type sent alongside the attachment.
    pub fn mimetype(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Mp4 => "video/mp4",
        }
    }

    /// Upload class for this kind.
    pub fn class(self) -> MediaClass {
        match self {
            Self::Jpeg | Self::Png => MediaClass::Image,
            Self::Mp4 => MediaClass::Video,
        }
    }
}

/// Result of uploading media bytes to the WhatsApp media servers.
///
/// Binary fields are base64 encoded, as the bridge returns them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedMedia {
    /// Public CDN URL.
    pub url: String,
    /// CDN direct path.
    pub direct_path: String,
    /// Media encryption key.
    pub media_key: String,
    /// SHA-256 of the plaintext bytes.
    pub file_sha256: String,
    /// SHA-256 of the encrypted bytes.
    pub file_enc_sha256: String,
    /// Plaintext length in bytes.
    pub file_length: u64,
}

/// Attachment fields carried by image and video messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAttachment {
    /// Public CDN URL.
    pub url: String,
    /// CDN direct path.
    pub direct_path: String,
    /// Media encryption key (base64).
    pub media_key: String,
    /// MIME type.
    pub mimetype: String,
    /// SHA-256 of the plaintext (base64).
    pub file_sha256: String,
    /// SHA-256 of the ciphertext (base64).
    pub file_enc_sha256: String,
    /// Plaintext length in bytes.
    pub file_length: u64,
}

impl MediaAttachment {
    /// Combine upload metadata with the local file's kind and length.
    pub fn from_upload(uploaded: UploadedMedia, kind: MediaKind, file_length: u64) -> Self {
        Self {
            url: uploaded.url,
            direct_path: uploaded.direct_path,
            media_key: uploaded.media_key,
            mimetype: kind.mimetype().to_owned(),
            file_sha256: uploaded.file_sha256,
            file_enc_sha256: uploaded.file_enc_sha256,
            file_length,
        }
    }
}

/// An outbound message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Payload {
    /// Plain text conversation message.
    Text {
        /// Message text.
        body: String,
    },
    /// Image with optional caption.
    Image {
        /// Caption shown under the image.
        caption: String,
        /// Uploaded attachment.
        #[serde(flatten)]
        media: MediaAttachment,
    },
    /// Video with optional caption.
    Video {
        /// Caption shown under the video.
        caption: String,
        /// Uploaded attachment.
        #[serde(flatten)]
        media: MediaAttachment,
    },
}

impl Payload {
    /// Build the media payload matching `kind`.
    pub fn media(kind: MediaKind, caption: String, media: MediaAttachment) -> Self {
        match kind.class() {
            MediaClass::Image => Self::Image { caption, media },
            MediaClass::Video => Self::Video { caption, media },
        }
    }
}

/// Base64 SHA-256 of `data`, in the encoding the bridge uses.
pub fn sha256_base64(data: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(data))
}

/// Check the bridge's reported plaintext hash and length against local bytes.
///
/// Returns a description of the mismatch on failure.
pub fn verify_upload(data: &[u8], uploaded: &UploadedMedia) -> Result<(), String> {
    let local = sha256_base64(data);
    if local != uploaded.file_sha256 {
        let reported = STANDARD
            .decode(&uploaded.file_sha256)
            .map(hex::encode)
            .unwrap_or_else(|_| uploaded.file_sha256.clone());
        return Err(format!(
            "plaintext hash mismatch: local {}, bridge {reported}",
            hex::encode(Sha256::digest(data))
        ));
    }
    let len = u64::try_from(data.len()).unwrap_or(u64::MAX);
    if uploaded.file_length != 0 && uploaded.file_length != len {
        return Err(format!(
            "length mismatch: local {len}, bridge {}",
            uploaded.file_length
        ));
    }
    Ok(())
}
