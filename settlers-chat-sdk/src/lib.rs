//! settlers-chat-sdk: chat client for The Settlers Online.
//!
//! Logs in through the web site, finds the account's realm, binds an XMPP
//! session over BOSH and then long-polls the chat host for messages and
//! presence changes. See [`client`] for the entry point.

pub mod client;
pub mod codec;
pub mod error;
pub mod event;
pub mod handshake;
pub mod message;
pub mod realm;
pub mod regions;
pub mod session;
pub mod transport;
pub mod xml;

pub use client::{Client, ClientBuilder, ClientHandle, ConnectConfig};
pub use error::{ClientError, HandshakeError, ParseError, TransportError};
pub use event::{ChatMessage, Diagnostic, Event, FriendStatus};
pub use handshake::Stage;
pub use message::{Channel, Destination, OutgoingMessage};
pub use regions::{Region, RegionTable};
