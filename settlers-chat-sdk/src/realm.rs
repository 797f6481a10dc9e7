//! Finding the realm an account lives on.
//!
//! The service has no endpoint that says which realm owns an account, so
//! the stock resolver, [`ProbeRealms`], offers the web token to every realm
//! of the region until one accepts it. [`FixedRealm`] skips the scan when
//! the realm is already known. Either plugs into the handshake through
//! [`RealmResolver`].

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::HandshakeError;
use crate::handshake::Stage;
use crate::regions::{RealmEndpoints, RegionInfo};
use crate::transport::Transport;

/// Content type the auth endpoint expects.
pub const AUTH_CONTENT_TYPE: &str = "text/html";

/// Status a realm answers with when the account is not one of its own.
const WRONG_REALM: u16 = 403;

/// Web identity harvested from the main page.
#[derive(Debug, Clone, Copy)]
pub struct WebCredentials<'a> {
    pub user_id: &'a str,
    pub auth_token: &'a str,
}

/// A realm that accepted the web token, with the chat identity it issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRealm {
    pub realm: RealmEndpoints,
    pub display_name: String,
    pub auth_token: String,
}

#[async_trait]
pub trait RealmResolver: Send + Sync {
    async fn resolve(
        &self,
        transport: &dyn Transport,
        region: &RegionInfo,
        creds: WebCredentials<'_>,
        cancel: &CancellationToken,
    ) -> Result<ResolvedRealm, HandshakeError>;
}

/// Try every realm of the region in table order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProbeRealms;

#[async_trait]
impl RealmResolver for ProbeRealms {
    async fn resolve(
        &self,
        transport: &dyn Transport,
        region: &RegionInfo,
        creds: WebCredentials<'_>,
        cancel: &CancellationToken,
    ) -> Result<ResolvedRealm, HandshakeError> {
        let mut tried = 0;
        for realm in region.realms() {
            tried += 1;
            let no = realm.no.clone();
            match offer_token(transport, realm, creds, cancel).await? {
                Some(resolved) => return Ok(resolved),
                None => tracing::debug!(realm = %no, "Realm refused token"),
            }
        }
        Err(HandshakeError::NoRealmMatched { tried })
    }
}

/// Use one known realm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedRealm(pub String);

#[async_trait]
impl RealmResolver for FixedRealm {
    async fn resolve(
        &self,
        transport: &dyn Transport,
        region: &RegionInfo,
        creds: WebCredentials<'_>,
        cancel: &CancellationToken,
    ) -> Result<ResolvedRealm, HandshakeError> {
        let realm = region
            .realm(&self.0)
            .ok_or(HandshakeError::NoRealmMatched { tried: 0 })?;
        offer_token(transport, realm, creds, cancel)
            .await?
            .ok_or(HandshakeError::NoRealmMatched { tried: 1 })
    }
}

/// POST the web token to a realm's auth endpoint. `Ok(None)` when the
/// realm says the account is not theirs.
pub async fn offer_token(
    transport: &dyn Transport,
    realm: RealmEndpoints,
    creds: WebCredentials<'_>,
    cancel: &CancellationToken,
) -> Result<Option<ResolvedRealm>, HandshakeError> {
    let body = format!(
        "DSOAUTHTOKEN={}&DSOAUTHUSER={}",
        creds.auth_token, creds.user_id
    );
    let resp = transport
        .post(&realm.auth_url, body, AUTH_CONTENT_TYPE, cancel)
        .await?;
    if resp.status == WRONG_REALM {
        return Ok(None);
    }
    if !resp.is_success() {
        return Err(HandshakeError::UnexpectedStatus {
            stage: Stage::Auth,
            status: resp.status,
            body: resp.body,
        });
    }

    let (display_name, auth_token) = split_auth_reply(&resp.body)
        .ok_or_else(|| HandshakeError::MalformedAuthResponse(resp.body.clone()))?;
    tracing::info!(realm = %realm.no, "Realm accepted token");
    Ok(Some(ResolvedRealm {
        realm,
        display_name,
        auth_token,
    }))
}

/// `<id>|<display name>|<rotated token>|...`
fn split_auth_reply(body: &str) -> Option<(String, String)> {
    let mut fields = body.trim().split('|').skip(1);
    let name = fields.next().filter(|s| !s.is_empty())?;
    let token = fields.next().filter(|s| !s.is_empty())?;
    Some((name.to_string(), token.to_string()))
}
