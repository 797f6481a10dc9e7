//! Events emitted by the chat client for the UI layer to consume.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::error::ParseError;

/// Channel label used for direct messages.
pub const PRIVATE_CHANNEL: &str = "private";

/// A chat line, either from a room or a direct message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    /// Room alias (`global-1`, `trade`, `gc_123`, ...) or `"private"`.
    pub channel: String,
    pub sender_name: String,
    /// Guild tag of the sender, `"null"` when they have none.
    pub sender_guild: String,
    pub sender_id: String,
    /// Local wall-clock time the message was sent.
    pub timestamp: NaiveDateTime,
    pub text: String,
}

impl ChatMessage {
    /// `HH:MM:SS`
    pub fn time(&self) -> String {
        self.timestamp.format("%H:%M:%S").to_string()
    }

    /// `DD:MM:YYYY`
    pub fn date(&self) -> String {
        self.timestamp.format("%d:%m:%Y").to_string()
    }

    pub fn is_private(&self) -> bool {
        self.channel == PRIVATE_CHANNEL
    }
}

/// Events that the SDK emits to the consumer (CLI, GUI, bot, etc.)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A message in a room or a private message.
    Message(ChatMessage),

    /// A friend came online or went offline.
    PresenceChange { who: String, online: bool },

    /// The poll returned with nothing to report. Never delivered on the
    /// event stream; only produced by the decoder.
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendStatus {
    Online,
    Offline,
}

impl fmt::Display for FriendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FriendStatus::Online => f.write_str("online"),
            FriendStatus::Offline => f.write_str("offline"),
        }
    }
}

/// Something the client swallowed instead of surfacing.
#[derive(Debug, Clone)]
pub enum Diagnostic {
    /// A response that decoded to no usable event.
    UnparsedFrame { body: String, error: ParseError },
    /// One stanza of a response that failed to decode. The rest of the
    /// response was still delivered. `body` is the whole response.
    SkippedStanza { body: String, error: ParseError },
    /// A request failed for a reason other than cancellation.
    TransportFailure { error: String },
}

/// Observer for [`Diagnostic`]s. Called on the poll loop's task, so keep it short.
pub type DiagnosticHook = Arc<dyn Fn(&Diagnostic) + Send + Sync>;
