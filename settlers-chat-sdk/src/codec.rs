//! BOSH frame builders and response decoders.
//!
//! Every request to the binding endpoint is one `<body/>` wrapper carrying
//! the session id and a request id, optionally wrapping one XMPP stanza.
//! Builders are pure functions of their arguments; decoders take the raw
//! response body.
//!
//! Namespace declarations are stripped from responses before parsing. The
//! client never needs them and the element names alone are unambiguous.

use std::borrow::Cow;

use base64::Engine;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use quick_xml::escape::escape;
use regex::Regex;

use crate::error::ParseError;
use crate::event::{ChatMessage, Event, PRIVATE_CHANNEL};
use crate::message::{Destination, OutgoingMessage};
use crate::xml::Element;

pub const HTTPBIND_NS: &str = "http://jabber.org/protocol/httpbind";

/// What the server answers when a long poll times out with nothing to say.
pub const EMPTY_POLL_BODY: &str = r#"<body xmlns="http://jabber.org/protocol/httpbind"></body>"#;

/// Value of `playertag` for players without a guild.
const NO_GUILD_TAG: &str = "null";

/// The room whose wire id is bare `global` is shown as `global-1`. Only the
/// exact id is renamed: `global-2` and up already name their room, and a
/// prefix match would fold them all into the first one.
const FIRST_GLOBAL_ROOM: &str = "global";
const FIRST_GLOBAL_LABEL: &str = "global-1";

static SID: Lazy<Regex> = Lazy::new(|| Regex::new(r#"sid="(.*?)""#).expect("sid pattern"));
static NAMESPACE_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\s*xmlns(?::[\w.-]+)?=(?:"[^"]*"|'[^']*')"#).expect("namespace pattern")
});

/// Identity stamped onto outgoing chat messages.
#[derive(Debug, Clone, Copy)]
pub struct FrameSender<'a> {
    pub sid: &'a str,
    pub chat_host: &'a str,
    pub display_name: &'a str,
    pub user_id: &'a str,
}

// ── Builders ──

/// Open a binding session. The only frame without a `sid`.
pub fn first_bind(rid: u64, chat_host: &str, wait_secs: u64) -> String {
    format!(
        r#"<body rid="{rid}" xmlns:xmpp="urn:xmpp:xbosh" xmlns="{HTTPBIND_NS}" secure="false" wait="{wait_secs}" hold="1" xml:lang="en" xmpp:version="1.0" to="{chat_host}" ver="1.6" />"#
    )
}

/// `<display>@null\0<display>\0<token>\0null`, base64 encoded.
pub fn plain_credential(display_name: &str, auth_token: &str) -> String {
    let raw = format!("{display_name}@null\0{display_name}\0{auth_token}\0null");
    base64::engine::general_purpose::STANDARD.encode(raw.as_bytes())
}

/// SASL PLAIN auth with the chat token issued by the realm.
pub fn auth(sid: &str, rid: u64, display_name: &str, auth_token: &str) -> String {
    let credential = plain_credential(display_name, auth_token);
    format!(
        r#"<body sid="{sid}" rid="{rid}" xmlns="{HTTPBIND_NS}"><auth xmlns="urn:ietf:params:xml:ns:xmpp-sasl" mechanism="PLAIN">{credential}</auth></body>"#
    )
}

/// Restart the XMPP stream on the authenticated binding session.
pub fn restart(sid: &str, rid: u64, chat_host: &str) -> String {
    format!(
        r#"<body sid="{sid}" rid="{rid}" xmpp:restart="true" xmlns="{HTTPBIND_NS}" xml:lang="en" to="{chat_host}" xmlns:xmpp="urn:xmpp:xbosh" />"#
    )
}

pub fn bind_resource(sid: &str, rid: u64, resource: &str) -> String {
    let resource = escape(resource);
    format!(
        r#"<body sid="{sid}" rid="{rid}" xmlns="{HTTPBIND_NS}"><iq type="set" id="iq_1"><bind xmlns="urn:ietf:params:xml:ns:xmpp-bind"><resource>{resource}</resource></bind></iq></body>"#
    )
}

pub fn roster_query(sid: &str, rid: u64) -> String {
    format!(
        r#"<body sid="{sid}" rid="{rid}" xmlns="{HTTPBIND_NS}"><iq type="get" id="roster_5"><query xmlns="jabber:iq:roster" /></iq></body>"#
    )
}

/// Broadcast "online" presence. Doubles as a keep-alive that collects
/// whatever the server has queued.
pub fn presence(sid: &str, rid: u64) -> String {
    format!(
        r#"<body sid="{sid}" rid="{rid}" xmlns="{HTTPBIND_NS}"><presence><status>Online</status><priority>5</priority></presence></body>"#
    )
}

/// Enter a multi-user room under `nick`.
pub fn join_room(sid: &str, rid: u64, room: &str, chat_host: &str, nick: &str) -> String {
    let room = escape(room);
    let nick = escape(nick);
    format!(
        r#"<body sid="{sid}" rid="{rid}" xmlns="{HTTPBIND_NS}"><presence to="{room}@conference.{chat_host}/{nick}"><priority>0</priority><x xmlns="http://jabber.org/protocol/muc" /></presence></body>"#
    )
}

/// Empty frame: the server holds it until it has something to deliver.
pub fn poll(sid: &str, rid: u64) -> String {
    format!(r#"<body sid="{sid}" rid="{rid}" xmlns="{HTTPBIND_NS}" />"#)
}

pub fn message(sender: FrameSender<'_>, rid: u64, msg: &OutgoingMessage) -> String {
    let FrameSender {
        sid,
        chat_host,
        display_name,
        user_id,
    } = sender;
    let (to, kind) = match &msg.destination {
        Destination::Private(recipient) => (format!("{}@{chat_host}", escape(recipient.as_str())), ""),
        Destination::Group(room) => (
            format!("{}@conference.{chat_host}", escape(room.as_str())),
            r#" type="groupchat""#,
        ),
    };
    let name = escape(display_name);
    let user_id = escape(user_id);
    let text = escape(msg.text.as_str());
    format!(
        r#"<body rid="{rid}" xmlns="{HTTPBIND_NS}" sid="{sid}"><message to="{to}" id="m_{rid}" from="{name}@{chat_host}"{kind}><body>{text}</body><bbmsg playerid="{user_id}" playertag="{NO_GUILD_TAG}" playername="{name}" xmlns="bbmsg" /></message></body>"#
    )
}

// ── Decoders ──

/// First `sid="..."` attribute in a bind response.
pub fn extract_sid(body: &str) -> Option<String> {
    SID.captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|sid| !sid.is_empty())
}

pub fn strip_namespaces(body: &str) -> Cow<'_, str> {
    NAMESPACE_DECL.replace_all(body, "")
}

pub fn parse_frame(body: &str) -> Result<Element, ParseError> {
    Element::parse(&strip_namespaces(body))
}

/// Cheap check for the canonical timed-out poll.
pub fn is_empty_poll(body: &str) -> bool {
    body.trim() == EMPTY_POLL_BODY
}

/// Local part of a JID (`name@host/resource` -> `name`).
fn local_part(jid: &str) -> &str {
    jid.split('@').next().unwrap_or(jid)
}

/// Lower-cased friend names from a roster query result.
pub fn roster_items(body: &str) -> Result<Vec<String>, ParseError> {
    let root = parse_frame(body)?;
    let query = root
        .child("iq")
        .ok_or(ParseError::MissingElement("iq"))?
        .child("query")
        .ok_or(ParseError::MissingElement("query"))?;
    query
        .children_named("item")
        .map(|item| {
            item.attr("jid")
                .map(|jid| local_part(jid).to_lowercase())
                .ok_or(ParseError::MissingAttribute("jid"))
        })
        .collect()
}

/// Lower-cased names of everyone announced as available in a response.
pub fn online_presences(body: &str) -> Result<Vec<String>, ParseError> {
    let root = parse_frame(body)?;
    Ok(root
        .children_named("presence")
        .filter(|p| p.attr("type") != Some("unavailable"))
        .filter_map(|p| p.attr("from"))
        .map(|from| local_part(from).to_lowercase())
        .collect())
}

fn decode_presence(presence: &Element) -> Result<Event, ParseError> {
    let from = presence.attr("from").ok_or(ParseError::MissingAttribute("from"))?;
    Ok(Event::PresenceChange {
        who: local_part(from).to_lowercase(),
        online: presence.attr("type") != Some("unavailable"),
    })
}

/// Room alias for a groupchat `from`, with the first global room normalised.
fn room_alias(from: &str) -> String {
    match local_part(from) {
        FIRST_GLOBAL_ROOM => FIRST_GLOBAL_LABEL.to_string(),
        room => room.to_string(),
    }
}

/// Decode one `<message/>` stanza. `Ok(None)` for stanzas without a body
/// (chat states, receipts, subject changes).
pub fn decode_message(message: &Element) -> Result<Option<ChatMessage>, ParseError> {
    let Some(body) = message.child("body") else {
        return Ok(None);
    };

    let channel = if message.attr("type") == Some("groupchat") {
        room_alias(message.attr("from").ok_or(ParseError::MissingAttribute("from"))?)
    } else {
        PRIVATE_CHANNEL.to_string()
    };

    let bbmsg = message.child("bbmsg").ok_or(ParseError::MissingElement("bbmsg"))?;
    let field = |key: &str| bbmsg.attr(key).unwrap_or_default().to_string();

    let timestamp = match message.child("delay").and_then(|d| d.attr("stamp")) {
        Some(stamp) => parse_stamp(stamp)?,
        None => Local::now().naive_local(),
    };

    Ok(Some(ChatMessage {
        channel,
        sender_name: field("playername"),
        sender_guild: field("playertag"),
        sender_id: field("playerid"),
        timestamp,
        text: body.text.clone(),
    }))
}

/// Delay stamps are UTC; shown in local time.
fn parse_stamp(stamp: &str) -> Result<NaiveDateTime, ParseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(stamp) {
        return Ok(dt.with_timezone(&Local).naive_local());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y%m%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(stamp, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive).with_timezone(&Local).naive_local())
        .ok_or_else(|| ParseError::BadTimestamp(stamp.to_string()))
}

/// Stanzas decoded from one response, plus the ones that could not be.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded<T> {
    pub items: Vec<T>,
    pub rejected: Vec<ParseError>,
}

impl<T> Default for Decoded<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            rejected: Vec::new(),
        }
    }
}

impl<T> Decoded<T> {
    fn keep(&mut self, result: Result<Option<T>, ParseError>) {
        match result {
            Ok(Some(item)) => self.items.push(item),
            Ok(None) => {}
            Err(error) => self.rejected.push(error),
        }
    }
}

/// Every bodied `<message/>` in a response, in document order. A stanza that
/// fails to decode is set aside without losing its neighbours.
pub fn history(body: &str) -> Result<Decoded<ChatMessage>, ParseError> {
    let root = parse_frame(body)?;
    let mut decoded = Decoded::default();
    for message in root.children_named("message") {
        decoded.keep(decode_message(message));
    }
    Ok(decoded)
}

/// Decode a poll or send response into events.
///
/// A wrapper with no payload yields `[Event::Empty]`. Each stanza is decoded
/// on its own. A frame whose stanzas neither decode nor fail (only kinds the
/// client has no use for) is [`ParseError::Unhandled`], so the caller can
/// report it.
pub fn decode_poll(body: &str) -> Result<Decoded<Event>, ParseError> {
    if is_empty_poll(body) {
        return Ok(Decoded {
            items: vec![Event::Empty],
            ..Decoded::default()
        });
    }
    let root = parse_frame(body)?;
    if root.is_empty() {
        return Ok(Decoded {
            items: vec![Event::Empty],
            ..Decoded::default()
        });
    }

    let mut decoded = Decoded::default();
    for stanza in &root.children {
        match stanza.name.as_str() {
            "presence" => decoded.keep(decode_presence(stanza).map(Some)),
            "message" => decoded.keep(decode_message(stanza).map(|msg| msg.map(Event::Message))),
            _ => {}
        }
    }

    if decoded.items.is_empty() && decoded.rejected.is_empty() {
        let kinds: Vec<&str> = root.children.iter().map(|c| c.name.as_str()).collect();
        return Err(ParseError::Unhandled(kinds.join(",")));
    }
    Ok(decoded)
}
