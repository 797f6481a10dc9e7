//! Scripted transport and fixtures shared by the integration tests.
//!
//! `MockTransport` answers requests from a queue of scripted replies, in
//! order. When the queue is empty a request waits, like a long poll the
//! server is holding, until a reply is pushed or its token is cancelled.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use settlers_chat_sdk::codec::{self, EMPTY_POLL_BODY};
use settlers_chat_sdk::client::{Client, ClientBuilder, ConnectConfig};
use settlers_chat_sdk::error::TransportError;
use settlers_chat_sdk::regions::{Region, RegionTable};
use settlers_chat_sdk::transport::{HttpResponse, Transport};
use settlers_chat_sdk::xml::Element;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

pub const EMAIL: &str = "anna@example.com";
pub const PASSWORD: &str = "hunter2";
pub const USER_ID: &str = "31337";
pub const WEB_TOKEN: &str = "web-token";
pub const NAME: &str = "Anna";
pub const CHAT_TOKEN: &str = "chat-token";
pub const SID: &str = "sid-1";
pub const FIRST_RID: u64 = 1000;

pub const LOGIN_URL_PREFIX: &str = "https://www.test.local/en//api/user/login";
pub const MAIN_PAGE_URL: &str = "https://www.test.local/en/home";
pub const REALM_2_CHAT_HOST: &str = "w02chat01.test.local";
pub const REALM_2_BIND_URL: &str = "http://w02chat01.test.local/http-bind/";

/// Requests the handshake issues when realm 2 is the account's realm.
pub const HANDSHAKE_REQUESTS: usize = 8;

const STEP: Duration = Duration::from_secs(5);

const TABLE: &str = r#"
[[region]]
name = "TSOTESTING"
site = "test."
domain = "local"
language = "en"
main_page = "home"

[[region.realm]]
no = "1"
bb = "w01bb01"
chat = "w01chat01"

[[region.realm]]
no = "2"
bb = "w02bb01"
chat = "w02chat01"

[[region.realm]]
no = "3"
bb = "w03bb01"
chat = "w03chat01"
"#;

pub fn test_table() -> RegionTable {
    RegionTable::from_toml_str(TABLE).unwrap()
}

pub fn auth_url(realm: u32) -> String {
    format!("http://w0{realm}bb01.test.local/authenticate")
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: &'static str,
    pub url: String,
    pub body: String,
    pub content_type: Option<String>,
}

impl Recorded {
    /// Parse the posted frame.
    pub fn frame(&self) -> Element {
        codec::parse_frame(&self.body).unwrap()
    }

    pub fn rid(&self) -> Option<u64> {
        codec::parse_frame(&self.body)
            .ok()?
            .attr("rid")
            .and_then(|rid| rid.parse().ok())
    }

    /// A bare long-poll frame: a wrapper with nothing inside.
    pub fn is_poll(&self) -> bool {
        codec::parse_frame(&self.body)
            .map(|root| root.attr("sid").is_some() && root.is_empty())
            .unwrap_or(false)
    }
}

pub struct MockTransport {
    script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    pushed: Notify,
    requests: Mutex<Vec<Recorded>>,
    observer: mpsc::UnboundedSender<Recorded>,
}

impl MockTransport {
    pub fn new(
        script: impl IntoIterator<Item = HttpResponse>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Recorded>) {
        let (observer, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            script: Mutex::new(script.into_iter().map(Ok).collect()),
            pushed: Notify::new(),
            requests: Mutex::new(Vec::new()),
            observer,
        });
        (transport, rx)
    }

    pub fn push(&self, resp: HttpResponse) {
        self.push_result(Ok(resp));
    }

    pub fn push_body(&self, body: &str) {
        self.push(HttpResponse::new(200, body));
    }

    pub fn push_error(&self, error: TransportError) {
        self.push_result(Err(error));
    }

    fn push_result(&self, result: Result<HttpResponse, TransportError>) {
        self.script.lock().push_back(result);
        self.pushed.notify_waiters();
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().clone()
    }

    async fn respond(
        &self,
        recorded: Recorded,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(recorded.clone());
        let _ = self.observer.send(recorded);

        loop {
            let pushed = self.pushed.notified();
            if let Some(next) = self.script.lock().pop_front() {
                return next;
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                _ = pushed => {}
            }
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, url: &str, cancel: &CancellationToken) -> Result<HttpResponse, TransportError> {
        let recorded = Recorded {
            method: "GET",
            url: url.to_string(),
            body: String::new(),
            content_type: None,
        };
        self.respond(recorded, cancel).await
    }

    async fn post(
        &self,
        url: &str,
        body: String,
        content_type: &str,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, TransportError> {
        let recorded = Recorded {
            method: "POST",
            url: url.to_string(),
            body,
            content_type: Some(content_type.to_string()),
        };
        self.respond(recorded, cancel).await
    }
}

// ── Scripted server replies ──

pub fn login_ok() -> HttpResponse {
    HttpResponse::new(200, r#"{"status":"OK"}"#)
}

pub fn main_page() -> HttpResponse {
    HttpResponse::new(200, "<html></html>")
        .with_header("Set-Cookie", "JSESSIONID=x; Path=/")
        .with_header("Set-Cookie", format!("dsoAuthUser={USER_ID}; Path=/"))
        .with_header("Set-Cookie", format!("dsoAuthToken={WEB_TOKEN}; Path=/; HttpOnly"))
}

pub fn wrong_realm() -> HttpResponse {
    HttpResponse::new(403, "")
}

pub fn realm_accepts() -> HttpResponse {
    HttpResponse::new(200, format!("0|{NAME}|{CHAT_TOKEN}|1"))
}

pub fn bind_opened() -> HttpResponse {
    HttpResponse::new(
        200,
        format!(
            r#"<body xmlns="http://jabber.org/protocol/httpbind" sid="{SID}" wait="20" requests="2" inactivity="60" />"#
        ),
    )
}

pub fn empty() -> HttpResponse {
    HttpResponse::new(200, EMPTY_POLL_BODY)
}

/// A full successful handshake where realm 1 refuses and realm 2 accepts.
pub fn handshake_script() -> Vec<HttpResponse> {
    vec![
        login_ok(),
        main_page(),
        wrong_realm(),
        realm_accepts(),
        bind_opened(),
        empty(),
        empty(),
        empty(),
    ]
}

pub fn builder(transport: Arc<MockTransport>) -> ClientBuilder {
    Client::builder(EMAIL, PASSWORD, Region::Tsotesting)
        .regions(test_table())
        .transport(transport)
        .initial_rid(FIRST_RID)
}

pub fn fast_config() -> ConnectConfig {
    ConnectConfig {
        error_backoff: Duration::from_millis(10),
        ..ConnectConfig::default()
    }
}

/// Handshake against a fresh mock and drain its requests from the observer.
pub async fn connected() -> (Client, Arc<MockTransport>, mpsc::UnboundedReceiver<Recorded>) {
    let (transport, mut observed) = MockTransport::new(handshake_script());
    let client = builder(transport.clone())
        .config(fast_config())
        .connect()
        .await
        .unwrap();
    for _ in 0..HANDSHAKE_REQUESTS {
        observed.recv().await.unwrap();
    }
    (client, transport, observed)
}

/// Next request the transport saw, failing the test if none arrives.
pub async fn next_request(observed: &mut mpsc::UnboundedReceiver<Recorded>) -> Recorded {
    tokio::time::timeout(STEP, observed.recv())
        .await
        .expect("no request within timeout")
        .expect("transport dropped")
}

pub async fn within<F: std::future::Future>(fut: F) -> F::Output {
    tokio::time::timeout(STEP, fut).await.expect("timed out")
}

// ── Chat frames the server would push ──

pub fn group_message(room: &str, from: &str, text: &str) -> String {
    format!(
        r#"<body xmlns="http://jabber.org/protocol/httpbind"><message xmlns="jabber:client" from="{room}@conference.{REALM_2_CHAT_HOST}/{from}" to="anna@{REALM_2_CHAT_HOST}" type="groupchat"><body>{text}</body><bbmsg xmlns="bbmsg" playerid="7" playertag="null" playername="{from}" /></message></body>"#
    )
}

pub fn presence(who: &str, online: bool) -> String {
    let kind = if online { "" } else { r#" type="unavailable""# };
    format!(
        r#"<body xmlns="http://jabber.org/protocol/httpbind"><presence xmlns="jabber:client" from="{who}@{REALM_2_CHAT_HOST}/xiff"{kind} /></body>"#
    )
}
