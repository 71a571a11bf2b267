//! Recipient list loading from `identifier,display_name` CSV files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

/// Errors while loading the recipient list. All are fatal to the run.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The file could not be opened.
    #[error("failed to open {path}: {source}")]
    Open {
        /// Recipients file path.
        path: PathBuf,
        /// Underlying error.
        source: csv::Error,
    },

    /// A record could not be parsed.
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// Recipients file path.
        path: PathBuf,
        /// Underlying error.
        source: csv::Error,
    },

    /// The file contains no usable identifiers.
    #[error("{0} is empty or contains no valid numbers")]
    Empty(PathBuf),
}

/// One message target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    /// Raw identifier (phone number or JID), trimmed.
    pub number: String,
    /// Name substituted into the message template.
    pub name: String,
}

/// Recipients in first-seen order, unique by identifier.
#[derive(Debug, Clone, Default)]
pub struct Recipients {
    list: Vec<Recipient>,
    index: HashMap<String, usize>,
}

impl Recipients {
    /// Insert or replace. A repeated identifier keeps its first position and
    /// takes the newer name.
    pub fn insert(&mut self, number: String, name: String) {
        if let Some(existing) = self.index.get(&number).and_then(|&i| self.list.get_mut(i)) {
            existing.name = name;
            return;
        }
        self.index.insert(number.clone(), self.list.len());
        self.list.push(Recipient { number, name });
    }

    /// Name for `number`, if present.
    pub fn get(&self, number: &str) -> Option<&str> {
        let i = *self.index.get(number)?;
        self.list.get(i).map(|r| r.name.as_str())
    }

    /// Iterate in load order.
    pub fn iter(&self) -> std::slice::Iter<'_, Recipient> {
        self.list.iter()
    }

    /// Number of distinct recipients.
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Whether there are no recipients.
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

impl<'a> IntoIterator for &'a Recipients {
    type Item = &'a Recipient;
    type IntoIter = std::slice::Iter<'a, Recipient>;

    fn into_iter(self) -> Self::IntoIter {
        self.list.iter()
    }
}

/// Load recipients from a CSV file.
///
/// Column 0 is the identifier, column 1 the display name (optional). Blank
/// identifiers are skipped. The first non-blank row is taken as a header
/// and skipped when its identifier has no digits.
///
/// # Errors
///
/// Returns [`LoadError`] if the file cannot be opened or parsed, or yields
/// no identifiers.
pub fn load_recipients(path: &Path) -> Result<Recipients, LoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| LoadError::Open {
            path: path.to_owned(),
            source,
        })?;

    let mut recipients = Recipients::default();
    let mut first = true;
    for record in reader.records() {
        let record = record.map_err(|source| LoadError::Parse {
            path: path.to_owned(),
            source,
        })?;
        let number = record.get(0).unwrap_or_default().trim();
        if number.is_empty() {
            continue;
        }
        let header = first && !number.chars().any(|c| c.is_ascii_digit());
        first = false;
        if header {
            debug!(header = number, "skipping header row");
            continue;
        }
        let name = record.get(1).unwrap_or_default().trim();
        recipients.insert(number.to_owned(), name.to_owned());
    }

    if recipients.is_empty() {
        return Err(LoadError::Empty(path.to_owned()));
    }
    info!(path = %path.display(), count = recipients.len(), "recipients loaded");
    Ok(recipients)
}
