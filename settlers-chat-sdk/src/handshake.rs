//! Login handshake.
//!
//! Four steps, strictly in order, each aborting the rest on failure:
//!
//! 1. **Login**: post the email/password pair to the web login endpoint.
//! 2. **Check-in**: fetch the main page, which sets the web user id and
//!    auth token cookies.
//! 3. **Auth**: trade the web token for a chat identity on the account's
//!    realm (see [`crate::realm`]).
//! 4. **Bind**: open a BOSH session on the realm's chat host, authenticate
//!    it, restart the stream and bind a resource.
//!
//! Only the bind step draws request ids from the session.

use std::fmt;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use zeroize::Zeroize;

use crate::codec;
use crate::error::HandshakeError;
use crate::realm::{AUTH_CONTENT_TYPE, RealmResolver, WebCredentials};
use crate::regions::{RealmEndpoints, RegionInfo};
use crate::session::{Binding, Session};
use crate::transport::{HttpResponse, Transport, XML_CONTENT_TYPE};

/// Login body marker: the identity provider is down.
const SERVICE_DOWN_MARKER: &str = "UPLAYDOWN";
/// Login body marker: wrong email or password.
const FAILED_MARKER: &str = "FAILED";

pub const USER_COOKIE: &str = "dsoAuthUser";
pub const TOKEN_COOKIE: &str = "dsoAuthToken";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Login,
    CheckIn,
    Auth,
    Bind,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Login, Stage::CheckIn, Stage::Auth, Stage::Bind];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Login => "login",
            Stage::CheckIn => "check-in",
            Stage::Auth => "auth",
            Stage::Bind => "bind",
        })
    }
}

/// Everything the handshake needs besides the session it fills in.
pub struct Handshake<'a> {
    pub transport: &'a dyn Transport,
    pub region: &'a RegionInfo,
    pub resolver: &'a dyn RealmResolver,
    pub cancel: &'a CancellationToken,
    /// Receives each stage as it starts.
    pub progress: Option<&'a watch::Sender<Stage>>,
    /// Long-poll wait advertised to the server, in seconds.
    pub poll_wait_secs: u64,
    pub resource: &'a str,
}

impl Handshake<'_> {
    /// Run all four steps and return the chat display name.
    pub async fn run(&self, session: &mut Session) -> Result<String, HandshakeError> {
        tracing::info!(region = %self.region.name, "Starting handshake");
        self.login(session).await?;
        self.check_in(session).await?;
        let realm = self.resolve_auth_hash(session).await?;
        self.bind(session, realm).await?;
        tracing::info!(name = %session.display_name(), "Handshake complete");
        Ok(session.display_name().to_string())
    }

    fn enter(&self, stage: Stage) {
        tracing::debug!(%stage, "Handshake stage");
        if let Some(progress) = self.progress {
            progress.send_replace(stage);
        }
    }

    /// Post the credentials. The password is wiped from the session before
    /// the request leaves.
    pub async fn login(&self, session: &mut Session) -> Result<(), HandshakeError> {
        self.enter(Stage::Login);
        let mut url = self.region.login_url(session.email(), session.password());
        session.forget_password();

        let result = self
            .transport
            .post(&url, String::new(), AUTH_CONTENT_TYPE, self.cancel)
            .await;
        url.zeroize();
        let resp = result?;

        if resp.status != 200 {
            return Err(unexpected(Stage::Login, resp));
        }
        if resp.body.contains(SERVICE_DOWN_MARKER) {
            return Err(HandshakeError::ServiceDown);
        }
        if resp.body.contains(FAILED_MARKER) {
            return Err(HandshakeError::BadCredentials);
        }
        tracing::info!("Logged in");
        Ok(())
    }

    /// Harvest the web user id and auth token cookies from the main page.
    pub async fn check_in(&self, session: &mut Session) -> Result<(), HandshakeError> {
        self.enter(Stage::CheckIn);
        let resp = self
            .transport
            .get(&self.region.main_page_url(), self.cancel)
            .await?;
        if !resp.is_success() {
            return Err(unexpected(Stage::CheckIn, resp));
        }

        let user_id = resp
            .cookie(USER_COOKIE)
            .ok_or(HandshakeError::MissingCookie(USER_COOKIE))?;
        let auth_token = resp
            .cookie(TOKEN_COOKIE)
            .ok_or(HandshakeError::MissingCookie(TOKEN_COOKIE))?;
        session.set_web_identity(user_id.to_string(), auth_token.to_string());
        tracing::debug!(user_id = %session.user_id(), "Checked in");
        Ok(())
    }

    /// Find the account's realm and swap the web token for a chat identity.
    /// The realm stays with the caller until [`Handshake::bind`] stores it
    /// alongside the sid.
    pub async fn resolve_auth_hash(&self, session: &mut Session) -> Result<RealmEndpoints, HandshakeError> {
        self.enter(Stage::Auth);
        let creds = WebCredentials {
            user_id: session.user_id(),
            auth_token: session.auth_token(),
        };
        let resolved = self
            .resolver
            .resolve(self.transport, self.region, creds, self.cancel)
            .await?;
        session.set_chat_identity(resolved.display_name, resolved.auth_token);
        Ok(resolved.realm)
    }

    /// Open and authenticate the BOSH session. Four requests, four request ids.
    pub async fn bind(&self, session: &mut Session, realm: RealmEndpoints) -> Result<(), HandshakeError> {
        self.enter(Stage::Bind);
        let chat_host = realm.chat_host.as_str();

        let frame = codec::first_bind(session.next_rid(), chat_host, self.poll_wait_secs);
        let resp = self.post_frame(&realm.bind_url, frame).await?;
        let sid = codec::extract_sid(&resp.body).ok_or(HandshakeError::MissingSid)?;
        tracing::debug!(%chat_host, "Binding session opened");

        let frame = codec::auth(&sid, session.next_rid(), session.display_name(), session.auth_token());
        self.post_frame(&realm.bind_url, frame).await?;
        let frame = codec::restart(&sid, session.next_rid(), chat_host);
        self.post_frame(&realm.bind_url, frame).await?;
        let frame = codec::bind_resource(&sid, session.next_rid(), self.resource);
        self.post_frame(&realm.bind_url, frame).await?;

        session.bind(Binding { sid, realm });
        Ok(())
    }

    async fn post_frame(&self, url: &str, frame: String) -> Result<HttpResponse, HandshakeError> {
        let resp = self
            .transport
            .post(url, frame, XML_CONTENT_TYPE, self.cancel)
            .await?;
        if !resp.is_success() {
            return Err(unexpected(Stage::Bind, resp));
        }
        Ok(resp)
    }
}

fn unexpected(stage: Stage, resp: HttpResponse) -> HandshakeError {
    HandshakeError::UnexpectedStatus {
        stage,
        status: resp.status,
        body: resp.body,
    }
}
