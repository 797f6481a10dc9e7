//! Outgoing messages and well-known channel names.

use std::fmt;
use std::str::FromStr;

/// Where an outgoing message goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// A multi-user room, addressed by its room name (`global-1`, `gc_123`, ...).
    Group(String),
    /// A single player, addressed by their chat name.
    Private(String),
}

/// A message queued for sending. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub destination: Destination,
    pub text: String,
}

impl OutgoingMessage {
    pub fn group(channel: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            destination: Destination::Group(channel.into()),
            text: text.into(),
        }
    }

    pub fn private(recipient: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            destination: Destination::Private(recipient.into()),
            text: text.into(),
        }
    }
}

/// Chat rooms every player can see, plus the per-guild rooms.
///
/// Guild rooms carry a numeric id that is unique within a region. There is
/// no room for private messages; use [`OutgoingMessage::private`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// `global-1` .. `global-5`
    Global(u8),
    Help,
    Trade,
    Guild(u32),
    GuildOfficers(u32),
    Reporting,
    Moderators,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Global(n) => write!(f, "global-{n}"),
            Channel::Help => f.write_str("help"),
            Channel::Trade => f.write_str("trade"),
            Channel::Guild(id) => write!(f, "gc_{id}"),
            Channel::GuildOfficers(id) => write!(f, "gco_{id}"),
            Channel::Reporting => f.write_str("reporting"),
            Channel::Moderators => f.write_str("moderators"),
        }
    }
}

impl From<Channel> for String {
    fn from(channel: Channel) -> Self {
        channel.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown channel {0:?}")]
pub struct UnknownChannel(pub String);

impl FromStr for Channel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || UnknownChannel(s.to_string());
        match s {
            "help" => Ok(Channel::Help),
            "trade" => Ok(Channel::Trade),
            "reporting" => Ok(Channel::Reporting),
            "moderators" => Ok(Channel::Moderators),
            _ => {
                if let Some(n) = s.strip_prefix("global-") {
                    match n.parse::<u8>() {
                        Ok(n @ 1..=5) => Ok(Channel::Global(n)),
                        _ => Err(unknown()),
                    }
                } else if let Some(id) = s.strip_prefix("gco_") {
                    id.parse().map(Channel::GuildOfficers).map_err(|_| unknown())
                } else if let Some(id) = s.strip_prefix("gc_") {
                    id.parse().map(Channel::Guild).map_err(|_| unknown())
                } else {
                    Err(unknown())
                }
            }
        }
    }
}
