//! Trac client: authenticated session, HTTP transport and ticket decoding.

use std::{fmt, str::FromStr};

use serde::Deserialize;

pub mod session;
pub mod ticket;
pub mod transport;

pub use session::TrackerSession;
pub use ticket::{parse_ticket_csv, Ticket};
pub use transport::ReqwestTransport;

/// Failures talking to a Trac instance.
///
/// The `Display` text ends up verbatim in chat replies, so keep it short.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Cannot find form token in login page")]
    FormTokenNotFound,

    #[error("Unexpected HTTP status: {0}")]
    UnexpectedStatus(u16),

    #[error("Unexpected ticket data: {0}")]
    MalformedPayload(String),

    #[error("Too many redirects")]
    TooManyRedirects,

    #[error("HTTP request failed: {0}")]
    Transport(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Re-authentication failed: {0}")]
    Reauthentication(Box<TrackerError>),

    #[error("Session rejected after re-authentication (HTTP {0})")]
    SessionRejected(u16),
}

/// How the bot logs into a Trac instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum AuthMechanism {
    /// HTTP Basic auth on `/login`.
    #[default]
    Basic,
    /// The Trac login form (AccountManager).
    FormLogin,
}

impl FromStr for AuthMechanism {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "basic" | "http" => Ok(Self::Basic),
            "form" => Ok(Self::FormLogin),
            other => Err(format!("Invalid auth_type: {other} (expected basic or form)")),
        }
    }
}

impl TryFrom<String> for AuthMechanism {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for AuthMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic => f.write_str("basic"),
            Self::FormLogin => f.write_str("form"),
        }
    }
}

/// Username/password pair. `Debug` never prints the password.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
