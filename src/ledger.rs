//! Per-recipient delivery status ledger, persisted as CSV.
//!
//! Entries are keyed by `(number, message_id)`. The backing file is a full
//! snapshot: every update truncates it and writes the header plus all
//! entries in insertion order.

use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{Local, SecondsFormat};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Header row of the status file.
pub const HEADER: [&str; 4] = ["Number", "MessageID", "Status", "Timestamp"];

/// Ledger errors.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The status file could not be created, opened or written.
    #[error("status file {path}: {source}")]
    Io {
        /// Path of the status file.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// CSV encoding failed.
    #[error("status file {path}: {source}")]
    Csv {
        /// Path of the status file.
        path: PathBuf,
        /// Underlying error.
        source: csv::Error,
    },

    /// The ledger mutex was poisoned by a panicking writer.
    #[error("ledger lock poisoned")]
    Poisoned,
}

/// Delivery status of one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Accepted by the server.
    Sent,
    /// Delivered to the recipient's device.
    Delivered,
    /// Read by the recipient.
    Read,
    /// The identifier could not be resolved to a JID.
    InvalidNumber,
    /// The reachability query failed.
    CheckFailed,
    /// The number has no WhatsApp account.
    NotOnWhatsapp,
    /// Building or sending the message failed.
    SendFailed,
}

impl Status {
    /// All statuses, in declaration order.
    pub const ALL: [Status; 7] = [
        Status::Sent,
        Status::Delivered,
        Status::Read,
        Status::InvalidNumber,
        Status::CheckFailed,
        Status::NotOnWhatsapp,
        Status::SendFailed,
    ];

    /// The persisted spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Sent => "sent",
            Status::Delivered => "delivered",
            Status::Read => "read",
            Status::InvalidNumber => "invalid_number",
            Status::CheckFailed => "check_failed",
            Status::NotOnWhatsapp => "not_on_whatsapp",
            Status::SendFailed => "send_failed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown status: {s}"))
    }
}

/// One row of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    /// Recipient identifier as given (raw number or receipt sender).
    #[serde(rename = "Number")]
    pub number: String,
    /// Message id, empty when no message was sent.
    #[serde(rename = "MessageID")]
    pub message_id: String,
    /// Current status.
    #[serde(rename = "Status")]
    pub status: Status,
    /// Time of the last change, RFC 3339.
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
}

#[derive(Default)]
struct Table {
    entries: Vec<StatusEntry>,
    index: HashMap<(String, String), usize>,
}

/// Append-or-update status store backed by a CSV file.
///
/// Shared between the dispatcher and the event handler via `Arc<Ledger>`.
/// A single mutex covers lookup, mutation and the file rewrite.
pub struct Ledger {
    path: PathBuf,
    table: Mutex<Table>,
}

impl Ledger {
    /// Open the ledger at `path`, creating the file and writing the header
    /// only if the file is empty. Safe to call on every start.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written.
    pub fn initialize(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| io_err(&path, source))?;
        let len = file
            .metadata()
            .map_err(|source| io_err(&path, source))?
            .len();
        if len == 0 {
            let mut writer = csv::Writer::from_writer(file);
            writer
                .write_record(HEADER)
                .map_err(|source| csv_err(&path, source))?;
            writer.flush().map_err(|source| io_err(&path, source))?;
        }
        Ok(Self {
            path,
            table: Mutex::new(Table::default()),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record `status` for `(number, message_id)` and rewrite the file.
    ///
    /// An existing entry with the same key has its status and timestamp
    /// overwritten in place; otherwise a new entry is appended.
    ///
    /// # Errors
    ///
    /// Returns an error if the file rewrite fails. The in-memory table keeps
    /// the change; the next successful update persists it.
    pub fn update(&self, number: &str, message_id: &str, status: Status) -> Result<(), LedgerError> {
        let mut table = self.table.lock().map_err(|_| LedgerError::Poisoned)?;
        let timestamp = now();
        let key = (number.to_owned(), message_id.to_owned());

        let existing = table.index.get(&key).copied();
        match existing.and_then(|i| table.entries.get_mut(i)) {
            Some(entry) => {
                entry.status = status;
                entry.timestamp = timestamp;
            }
            None => {
                let position = table.entries.len();
                table.entries.push(StatusEntry {
                    number: key.0.clone(),
                    message_id: key.1.clone(),
                    status,
                    timestamp,
                });
                table.index.insert(key, position);
            }
        }
        debug!(number, message_id, %status, "ledger updated");

        self.rewrite(&table.entries)
    }

    /// Snapshot of all entries in insertion order.
    pub fn entries(&self) -> Vec<StatusEntry> {
        match self.table.lock() {
            Ok(table) => table.entries.clone(),
            Err(_) => Vec::new(),
        }
    }

    /// Current status of `(number, message_id)`, if recorded.
    pub fn status_of(&self, number: &str, message_id: &str) -> Option<Status> {
        let table = self.table.lock().ok()?;
        let i = *table
            .index
            .get(&(number.to_owned(), message_id.to_owned()))?;
        table.entries.get(i).map(|e| e.status)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.table.lock().map(|t| t.entries.len()).unwrap_or(0)
    }

    /// Whether the ledger has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn rewrite(&self, entries: &[StatusEntry]) -> Result<(), LedgerError> {
        let file = File::create(&self.path).map_err(|source| io_err(&self.path, source))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer
            .write_record(HEADER)
            .map_err(|source| csv_err(&self.path, source))?;
        for entry in entries {
            writer
                .serialize(entry)
                .map_err(|source| csv_err(&self.path, source))?;
        }
        writer.flush().map_err(|source| io_err(&self.path, source))
    }
}

/// Read a status file back into entries (header skipped).
///
/// # Errors
///
/// Returns an error if the file cannot be opened or a row does not parse.
pub fn read_status_file(path: &Path) -> Result<Vec<StatusEntry>, LedgerError> {
    let mut reader = csv::Reader::from_path(path).map_err(|source| csv_err(path, source))?;
    reader
        .deserialize()
        .collect::<Result<Vec<StatusEntry>, _>>()
        .map_err(|source| csv_err(path, source))
}

fn now() -> String {
    Local::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn io_err(path: &Path, source: std::io::Error) -> LedgerError {
    LedgerError::Io {
        path: path.to_owned(),
        source,
    }
}

fn csv_err(path: &Path, source: csv::Error) -> LedgerError {
    LedgerError::Csv {
        path: path.to_owned(),
        source,
    }
}
