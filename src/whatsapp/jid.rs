//! WhatsApp JID parsing and recipient resolution.
//!
//! A JID has the shape `user[.agent][:device]@server`. Plain phone numbers
//! are resolved against [`DEFAULT_USER_SERVER`].

use std::fmt;
use std::str::FromStr;

/// Server used for ordinary user accounts.
pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";

/// Errors from structured JID parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JidParseError {
    /// The input does not contain an `@`.
    #[error("expected '@' in {0:?}")]
    Separator(String),

    /// The agent component is not a number.
    #[error("invalid agent in {0:?}")]
    Agent(String),

    /// The device component is not a number.
    #[error("invalid device in {0:?}")]
    Device(String),
}

/// Structured WhatsApp address.
///
/// `Jid::default()` (empty user) is the invalid marker returned by
/// [`resolve`] for malformed input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Jid {
    /// User part, usually the phone number in international format.
    pub user: String,
    /// Agent number for multi-device addresses (0 when absent).
    pub agent: u8,
    /// Device number for multi-device addresses (0 when absent).
    pub device: u16,
    /// Server part, e.g. `s.whatsapp.net` or `g.us`.
    pub server: String,
}

impl Jid {
    /// Build a JID from a user and a server.
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            agent: 0,
            device: 0,
            server: server.into(),
        }
    }

    /// Whether this is the invalid marker (no user part).
    pub fn is_empty(&self) -> bool {
        self.user.is_empty()
    }
}

impl FromStr for Jid {
    type Err = JidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('@');
        let user_part = parts.next().unwrap_or_default();
        // Anything after a second `@` is dropped; an empty server is kept
        // and left for the bridge to reject at send time.
        let Some(server) = parts.next() else {
            return Err(JidParseError::Separator(s.to_owned()));
        };

        let (user_agent, device) = match user_part.split_once(':') {
            Some((rest, device)) => {
                let device: u16 = device
                    .parse()
                    .map_err(|_| JidParseError::Device(s.to_owned()))?;
                (rest, device)
            }
            None => (user_part, 0),
        };

        let (user, agent) = match user_agent.split_once('.') {
            Some((user, agent)) => {
                let agent: u8 = agent
                    .parse()
                    .map_err(|_| JidParseError::Agent(s.to_owned()))?;
                (user, agent)
            }
            None => (user_agent, 0),
        };

        Ok(Self {
            user: user.to_owned(),
            agent,
            device,
            server: server.to_owned(),
        })
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.user.is_empty() {
            return write!(f, "{}", self.server);
        }
        write!(f, "{}", self.user)?;
        if self.agent != 0 {
            write!(f, ".{}", self.agent)?;
        }
        if self.device != 0 {
            write!(f, ":{}", self.device)?;
        }
        write!(f, "@{}", self.server)
    }
}

/// Resolve a raw recipient string into a [`Jid`].
///
/// Never fails: malformed fully-qualified input yields `Jid::default()`,
/// which callers detect with [`Jid::is_empty`].
pub fn resolve(raw: &str) -> Jid {
    if !raw.contains('@') {
        return Jid::new(raw, DEFAULT_USER_SERVER);
    }
    raw.parse().unwrap_or_default()
}
