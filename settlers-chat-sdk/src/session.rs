//! Per-login session state.
//!
//! Identity and tokens are written by the handshake and read-only after it.
//! The request id counter is the one piece of state touched concurrently:
//! the poll loop, message senders and roster/join calls all draw ids from it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use zeroize::Zeroize;

use crate::regions::RealmEndpoints;

/// Upper bound (exclusive) for the random first request id.
const INITIAL_RID_RANGE: u64 = 1_000_000;

/// The BOSH session once bound: `sid` and realm are only ever set together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub sid: String,
    pub realm: RealmEndpoints,
}

pub struct Session {
    email: String,
    password: String,
    display_name: String,
    auth_token: String,
    user_id: String,
    binding: Option<Binding>,
    rid: AtomicU64,
}

impl Session {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        let first = rand::thread_rng().gen_range(0..INITIAL_RID_RANGE);
        Self::with_initial_rid(email, password, first)
    }

    /// Same as [`Session::new`] but with a known first request id.
    pub fn with_initial_rid(
        email: impl Into<String>,
        password: impl Into<String>,
        first_rid: u64,
    ) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            display_name: String::new(),
            auth_token: String::new(),
            user_id: String::new(),
            binding: None,
            rid: AtomicU64::new(first_rid),
        }
    }

    /// Take the next request id. Every call returns a fresh, strictly larger id.
    pub fn next_rid(&self) -> u64 {
        self.rid.fetch_add(1, Ordering::SeqCst)
    }

    /// The id the next call to [`Session::next_rid`] will hand out.
    pub fn peek_rid(&self) -> u64 {
        self.rid.load(Ordering::SeqCst)
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }

    /// Overwrite the password in memory once the login step has used it.
    pub(crate) fn forget_password(&mut self) {
        self.password.zeroize();
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn binding(&self) -> Option<&Binding> {
        self.binding.as_ref()
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    pub(crate) fn set_web_identity(&mut self, user_id: String, auth_token: String) {
        self.user_id = user_id;
        self.auth_token = auth_token;
    }

    /// Store the chat identity issued by a realm, replacing the web token.
    pub(crate) fn set_chat_identity(&mut self, display_name: String, rotated_token: String) {
        self.display_name = display_name;
        self.auth_token = rotated_token;
    }

    pub(crate) fn bind(&mut self, binding: Binding) {
        self.binding = Some(binding);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("email", &self.email)
            .field("display_name", &self.display_name)
            .field("user_id", &self.user_id)
            .field("binding", &self.binding)
            .field("rid", &self.peek_rid())
            .finish_non_exhaustive()
    }
}
