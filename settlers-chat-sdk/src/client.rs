//! Chat client: handshake, then a long-poll loop.
//!
//! This is the main entry point for SDK consumers. [`ClientBuilder::connect`]
//! runs the login handshake and returns a [`Client`]. [`Client::start`] spawns
//! the poll loop and hands back a [`ClientHandle`] for sending plus a
//! receiver of [`Event`]s.
//!
//! ## The poll loop
//!
//! The loop is the only task that talks to the binding endpoint once it is
//! running, so there is at most one request in flight per session. Each
//! iteration either runs one queued command (a message, a roster query, a
//! channel join) or, when the queue is empty, posts an empty frame that the
//! server holds until it has something to deliver.
//!
//! Queueing a command cancels the held poll so the command goes out at once
//! instead of after the server's poll timeout. The cancelled poll's response
//! is dropped. Commands themselves are never interrupted this way.
//!
//! Nothing that goes wrong inside the loop ends it. Unusable frames, single
//! stanzas that fail to decode, and failed requests are logged and reported
//! to the diagnostic hook, if one is set. The loop stops when
//! [`ClientHandle::shutdown`] is called or the event receiver is dropped,
//! even while a poll is being held.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::codec::{self, FrameSender};
use crate::error::{ClientError, HandshakeError, ParseError, TransportError};
use crate::event::{ChatMessage, Diagnostic, DiagnosticHook, Event, FriendStatus};
use crate::handshake::{Handshake, Stage};
use crate::message::OutgoingMessage;
use crate::realm::{ProbeRealms, RealmResolver};
use crate::regions::{Region, RegionTable};
use crate::session::{Binding, Session};
use crate::transport::{HttpResponse, ReqwestTransport, Transport, XML_CONTENT_TYPE};

/// Buffered events between the poll loop and a slow consumer.
const EVENT_BUFFER: usize = 256;

/// Tuning for a chat session.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Commands that can wait for the loop. A full queue blocks the sender.
    pub queue_capacity: usize,
    /// Most history lines returned by a channel join.
    pub history_limit: usize,
    /// Upper bound on any single request. Must exceed `poll_wait_secs`.
    pub request_timeout: Duration,
    /// How long the server may hold an empty poll, in seconds.
    pub poll_wait_secs: u64,
    /// Pause after a failed request before the loop tries again.
    pub error_backoff: Duration,
    /// XMPP resource bound at the end of the handshake.
    pub resource: String,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            history_limit: 15,
            request_timeout: Duration::from_secs(60),
            poll_wait_secs: 20,
            error_backoff: Duration::from_secs(1),
            resource: "xiff-bosh".to_string(),
        }
    }
}

/// Collects everything needed to log in.
pub struct ClientBuilder {
    email: String,
    password: String,
    region: Region,
    regions: Option<RegionTable>,
    transport: Option<Arc<dyn Transport>>,
    resolver: Option<Arc<dyn RealmResolver>>,
    diagnostics: Option<DiagnosticHook>,
    progress: Option<watch::Sender<Stage>>,
    config: ConnectConfig,
    initial_rid: Option<u64>,
}

impl ClientBuilder {
    pub fn new(email: impl Into<String>, password: impl Into<String>, region: Region) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            region,
            regions: None,
            transport: None,
            resolver: None,
            diagnostics: None,
            progress: None,
            config: ConnectConfig::default(),
            initial_rid: None,
        }
    }

    /// Region table to look `region` up in. Defaults to the bundled table.
    pub fn regions(mut self, table: RegionTable) -> Self {
        self.regions = Some(table);
        self
    }

    /// Transport for this session only. Defaults to a fresh [`ReqwestTransport`].
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// How to find the account's realm. Defaults to [`ProbeRealms`].
    pub fn resolver(mut self, resolver: impl RealmResolver + 'static) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Observe what the poll loop discards.
    pub fn diagnostics(mut self, hook: impl Fn(&Diagnostic) + Send + Sync + 'static) -> Self {
        self.diagnostics = Some(Arc::new(hook));
        self
    }

    /// Publish each handshake stage as it starts.
    pub fn progress(mut self, progress: watch::Sender<Stage>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(mut self, config: ConnectConfig) -> Self {
        self.config = config;
        self
    }

    /// First request id, instead of a random one.
    pub fn initial_rid(mut self, rid: u64) -> Self {
        self.initial_rid = Some(rid);
        self
    }

    /// Run the handshake. The returned client is bound but not yet polling.
    pub async fn connect(self) -> Result<Client, HandshakeError> {
        let ClientBuilder {
            email,
            password,
            region,
            regions,
            transport,
            resolver,
            diagnostics,
            progress,
            config,
            initial_rid,
        } = self;

        let table = match regions {
            Some(table) => table,
            None => RegionTable::embedded()?,
        };
        let info = table.get(region).ok_or(HandshakeError::UnknownRegion(region))?;
        let transport: Arc<dyn Transport> = match transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(config.request_timeout)?),
        };
        let resolver = resolver.unwrap_or_else(|| Arc::new(ProbeRealms));

        let mut session = match initial_rid {
            Some(rid) => Session::with_initial_rid(email, password, rid),
            None => Session::new(email, password),
        };
        let shutdown = CancellationToken::new();

        Handshake {
            transport: transport.as_ref(),
            region: info,
            resolver: resolver.as_ref(),
            cancel: &shutdown,
            progress: progress.as_ref(),
            poll_wait_secs: config.poll_wait_secs,
            resource: &config.resource,
        }
        .run(&mut session)
        .await?;

        let binding = session.binding().cloned().ok_or(HandshakeError::MissingSid)?;
        Ok(Client {
            engine: Arc::new(Engine {
                session,
                binding,
                transport,
                config,
                diagnostics,
                shutdown,
                in_flight: Mutex::new(None),
            }),
        })
    }
}

/// A logged-in session that is not polling yet.
pub struct Client {
    engine: Arc<Engine>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("session", &self.engine.session)
            .finish_non_exhaustive()
    }
}

impl Client {
    pub fn builder(email: impl Into<String>, password: impl Into<String>, region: Region) -> ClientBuilder {
        ClientBuilder::new(email, password, region)
    }

    pub fn display_name(&self) -> &str {
        self.engine.session.display_name()
    }

    pub fn session(&self) -> &Session {
        &self.engine.session
    }

    /// Every friend on the roster, with whether they are online now.
    pub async fn friends_and_status(&self) -> Result<BTreeMap<String, FriendStatus>, ClientError> {
        self.engine.friends_and_status().await
    }

    /// Enter a room and return its recent history, oldest first.
    pub async fn join_channel(&self, channel: &str) -> Result<Vec<ChatMessage>, ClientError> {
        self.engine.join_channel(channel).await
    }

    /// Spawn the poll loop.
    pub fn start(self) -> (ClientHandle, mpsc::Receiver<Event>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (cmd_tx, cmd_rx) = mpsc::channel(self.engine.config.queue_capacity.max(1));

        let handle = ClientHandle {
            cmd_tx,
            engine: self.engine.clone(),
        };
        tokio::spawn(self.engine.run(cmd_rx, event_tx));
        (handle, event_rx)
    }
}

enum Command {
    Send(OutgoingMessage),
    Friends(oneshot::Sender<Result<BTreeMap<String, FriendStatus>, ClientError>>),
    Join {
        channel: String,
        reply: oneshot::Sender<Result<Vec<ChatMessage>, ClientError>>,
    },
}

/// A handle to a running poll loop. Cheap to clone; safe to use from any task.
#[derive(Clone)]
pub struct ClientHandle {
    cmd_tx: mpsc::Sender<Command>,
    engine: Arc<Engine>,
}

impl ClientHandle {
    /// Queue a message. Waits only while the queue is full.
    pub async fn send(&self, msg: OutgoingMessage) -> Result<(), ClientError> {
        self.submit(Command::Send(msg)).await
    }

    pub async fn friends_and_status(&self) -> Result<BTreeMap<String, FriendStatus>, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Friends(reply)).await?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    pub async fn join_channel(&self, channel: impl Into<String>) -> Result<Vec<ChatMessage>, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Join {
            channel: channel.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    pub fn display_name(&self) -> &str {
        self.engine.session.display_name()
    }

    /// Stop the loop, abandoning any request in flight. The event stream
    /// ends once the loop has exited.
    pub fn shutdown(&self) {
        self.engine.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }

    async fn submit(&self, cmd: Command) -> Result<(), ClientError> {
        if self.engine.shutdown.is_cancelled() {
            return Err(ClientError::Closed);
        }
        self.cmd_tx.send(cmd).await.map_err(|_| ClientError::Closed)?;
        self.engine.interrupt_poll();
        Ok(())
    }
}

struct Engine {
    session: Session,
    binding: Binding,
    transport: Arc<dyn Transport>,
    config: ConnectConfig,
    diagnostics: Option<DiagnosticHook>,
    shutdown: CancellationToken,
    /// Token of the current iteration's poll, if it may be interrupted.
    in_flight: Mutex<Option<CancellationToken>>,
}

impl Engine {
    fn sid(&self) -> &str {
        &self.binding.sid
    }

    fn interrupt_poll(&self) {
        if let Some(token) = self.in_flight.lock().as_ref() {
            token.cancel();
        }
    }

    fn report(&self, diagnostic: Diagnostic) {
        if let Some(hook) = &self.diagnostics {
            hook(&diagnostic);
        }
    }

    async fn post(&self, frame: String, cancel: &CancellationToken) -> Result<HttpResponse, TransportError> {
        self.transport
            .post(&self.binding.realm.bind_url, frame, XML_CONTENT_TYPE, cancel)
            .await
    }

    /// One request/response exchange that only shutdown can interrupt.
    async fn request(&self, frame: String) -> Result<String, ClientError> {
        let resp = self.post(frame, &self.shutdown).await?;
        if !resp.is_success() {
            return Err(ClientError::UnexpectedStatus { status: resp.status });
        }
        Ok(resp.body)
    }

    async fn friends_and_status(&self) -> Result<BTreeMap<String, FriendStatus>, ClientError> {
        let roster = self
            .request(codec::roster_query(self.sid(), self.session.next_rid()))
            .await?;
        let mut friends: BTreeMap<String, FriendStatus> = codec::roster_items(&roster)?
            .into_iter()
            .map(|name| (name, FriendStatus::Offline))
            .collect();

        // Announcing ourselves makes the server push friends' presence on
        // the following keep-alive.
        self.request(codec::presence(self.sid(), self.session.next_rid()))
            .await?;
        let status = self
            .request(codec::presence(self.sid(), self.session.next_rid()))
            .await?;
        for name in codec::online_presences(&status)? {
            if let Some(entry) = friends.get_mut(&name) {
                *entry = FriendStatus::Online;
            }
        }

        tracing::debug!(friends = friends.len(), "Fetched roster");
        Ok(friends)
    }

    async fn join_channel(&self, channel: &str) -> Result<Vec<ChatMessage>, ClientError> {
        let frame = codec::join_room(
            self.sid(),
            self.session.next_rid(),
            channel,
            &self.binding.realm.chat_host,
            self.session.display_name(),
        );
        self.request(frame).await?;
        let body = self
            .request(codec::presence(self.sid(), self.session.next_rid()))
            .await?;

        let decoded = codec::history(&body)?;
        self.skipped(&body, decoded.rejected);
        let mut history = decoded.items;
        let excess = history.len().saturating_sub(self.config.history_limit);
        history.drain(..excess);
        tracing::info!(%channel, history = history.len(), "Joined channel");
        Ok(history)
    }

    fn message_frame(&self, msg: &OutgoingMessage) -> String {
        let sender = FrameSender {
            sid: self.sid(),
            chat_host: &self.binding.realm.chat_host,
            display_name: self.session.display_name(),
            user_id: self.session.user_id(),
        };
        codec::message(sender, self.session.next_rid(), msg)
    }

    /// Run a queued command. Message responses are handed back for decoding
    /// like a poll; roster and join results go to their caller.
    async fn execute(&self, cmd: Command) -> Option<Result<HttpResponse, TransportError>> {
        match cmd {
            Command::Send(msg) => {
                tracing::debug!(destination = ?msg.destination, "Sending message");
                Some(self.post(self.message_frame(&msg), &self.shutdown).await)
            }
            Command::Friends(reply) => {
                let _ = reply.send(self.friends_and_status().await);
                None
            }
            Command::Join { channel, reply } => {
                let _ = reply.send(self.join_channel(&channel).await);
                None
            }
        }
    }

    async fn run(self: Arc<Self>, mut cmd_rx: mpsc::Receiver<Command>, event_tx: mpsc::Sender<Event>) {
        tracing::info!(name = %self.session.display_name(), "Poll loop started");

        while !self.shutdown.is_cancelled() && !event_tx.is_closed() {
            // Register before looking at the queue: a command queued after
            // the check below always finds this token to cancel.
            let poll_token = self.shutdown.child_token();
            *self.in_flight.lock() = Some(poll_token.clone());

            let result = match cmd_rx.try_recv() {
                Ok(cmd) => match self.execute(cmd).await {
                    Some(result) => result,
                    None => continue,
                },
                Err(_) => {
                    let frame = codec::poll(self.sid(), self.session.next_rid());
                    tokio::select! {
                        result = self.post(frame, &poll_token) => result,
                        _ = event_tx.closed() => break,
                    }
                }
            };

            match result {
                Ok(resp) if resp.is_success() => {
                    if !self.dispatch(&resp.body, &event_tx).await {
                        break;
                    }
                }
                Ok(resp) => self.failed(format!("HTTP {}", resp.status)).await,
                Err(e) if e.is_cancelled() => tracing::debug!("Poll interrupted"),
                Err(e) => self.failed(e.to_string()).await,
            }
        }

        *self.in_flight.lock() = None;
        tracing::info!("Poll loop stopped");
    }

    /// Decode a response and forward its events. `false` once nobody is
    /// listening.
    async fn dispatch(&self, body: &str, event_tx: &mpsc::Sender<Event>) -> bool {
        if codec::is_empty_poll(body) {
            return true;
        }
        let events = match codec::decode_poll(body) {
            Ok(decoded) => {
                self.skipped(body, decoded.rejected);
                decoded.items
            }
            Err(error) => {
                tracing::debug!(%error, "Discarding frame");
                self.report(Diagnostic::UnparsedFrame {
                    body: body.to_string(),
                    error,
                });
                return true;
            }
        };

        for event in events {
            if event == Event::Empty {
                continue;
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => return false,
                sent = event_tx.send(event) => {
                    if sent.is_err() {
                        return false;
                    }
                }
            }
        }
        true
    }

    fn skipped(&self, body: &str, rejected: Vec<ParseError>) {
        for error in rejected {
            tracing::debug!(%error, "Skipping stanza");
            self.report(Diagnostic::SkippedStanza {
                body: body.to_string(),
                error,
            });
        }
    }

    async fn failed(&self, error: String) {
        tracing::warn!(%error, "Poll loop request failed");
        self.report(Diagnostic::TransportFailure { error });
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = tokio::time::sleep(self.config.error_backoff) => {}
        }
    }
}
