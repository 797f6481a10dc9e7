//! Error types for the chat SDK.
//!
//! Handshake failures are always surfaced to the caller of
//! [`ClientBuilder::connect`](crate::client::ClientBuilder::connect).
//! Failures inside the poll loop never are: they are logged, reported to the
//! optional diagnostic hook, and the loop keeps running.

use crate::handshake::Stage;
use crate::regions::{Region, RegionTableError};

/// Problem while issuing an HTTP request.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The request was cancelled through its cancellation token before a
    /// response was read.
    #[error("request cancelled")]
    Cancelled,

    /// The underlying HTTP client failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A URL could not be built from the region table.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl TransportError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransportError::Cancelled)
    }
}

/// Problem while establishing a chat session. All variants are fatal.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    /// The web login rejected the email/password pair.
    #[error("login rejected: bad email or password")]
    BadCredentials,

    /// The upstream identity provider is unavailable.
    #[error("identity provider is down")]
    ServiceDown,

    /// A handshake request came back with a non-success status.
    #[error("{stage} step failed with HTTP {status}")]
    UnexpectedStatus {
        stage: Stage,
        status: u16,
        body: String,
    },

    /// The main page did not set a cookie the auth step needs.
    #[error("main page did not set the {0} cookie")]
    MissingCookie(&'static str),

    /// Every candidate realm refused the auth token.
    #[error("no realm accepted the auth token (tried {tried})")]
    NoRealmMatched { tried: usize },

    /// A realm accepted the token but its reply could not be split into
    /// display name and rotated token.
    #[error("malformed auth response: {0:?}")]
    MalformedAuthResponse(String),

    /// The first bind response carried no `sid` attribute.
    #[error("bind response carried no session id")]
    MissingSid,

    /// The region has no entry in the region table.
    #[error("region {0} is not in the region table")]
    UnknownRegion(Region),

    #[error(transparent)]
    Regions(#[from] RegionTableError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Problem while decoding a server frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("malformed XML: {0}")]
    Xml(String),

    #[error("missing <{0}> element")]
    MissingElement(&'static str),

    #[error("missing {0} attribute")]
    MissingAttribute(&'static str),

    #[error("unparseable timestamp {0:?}")]
    BadTimestamp(String),

    #[error("no usable stanza in frame (saw: {0})")]
    Unhandled(String),
}

/// Problem with a request made on an established session.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("binding endpoint answered HTTP {status}")]
    UnexpectedStatus { status: u16 },

    /// The poll loop has shut down and no longer accepts messages.
    #[error("session closed")]
    Closed,
}
