//! Handshake tests against a scripted transport.
//!
//! Tests cover:
//! - Login outcomes: bad credentials, identity provider down, bad status
//! - Check-in cookie harvesting
//! - Realm probing and fixed realms
//! - Bind frames and request id accounting

mod common;

use base64::Engine as _;
use common::*;
use settlers_chat_sdk::error::HandshakeError;
use settlers_chat_sdk::handshake::{Handshake, Stage};
use settlers_chat_sdk::realm::{FixedRealm, ProbeRealms};
use settlers_chat_sdk::regions::Region;
use settlers_chat_sdk::session::Session;
use settlers_chat_sdk::transport::HttpResponse;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

// ═══════════════════════════════════════════════════════════════════
// 1. Login
// ═══════════════════════════════════════════════════════════════════

mod login {
    use super::*;

    #[tokio::test]
    async fn failed_marker_stops_everything() {
        let (transport, _) = MockTransport::new([HttpResponse::new(200, r#"{"status":"FAILED"}"#)]);
        let err = builder(transport.clone()).connect().await.unwrap_err();

        assert!(matches!(err, HandshakeError::BadCredentials), "got {err:?}");
        let requests = transport.requests();
        assert_eq!(requests.len(), 1, "no check-in or auth after a failed login");
        assert!(requests[0].url.starts_with(LOGIN_URL_PREFIX));
    }

    #[tokio::test]
    async fn identity_provider_down() {
        let (transport, _) = MockTransport::new([HttpResponse::new(200, "UPLAYDOWN")]);
        let err = builder(transport.clone()).connect().await.unwrap_err();
        assert!(matches!(err, HandshakeError::ServiceDown), "got {err:?}");
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn non_ok_status_is_fatal() {
        let (transport, _) = MockTransport::new([HttpResponse::new(502, "FAILED")]);
        let err = builder(transport.clone()).connect().await.unwrap_err();
        match err {
            HandshakeError::UnexpectedStatus { stage, status, .. } => {
                assert_eq!(stage, Stage::Login);
                assert_eq!(status, 502);
            }
            other => panic!("expected UnexpectedStatus, got {other:?}"),
        }
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn credentials_are_percent_encoded() {
        let (transport, _) = MockTransport::new([HttpResponse::new(200, "FAILED")]);
        let _ = settlers_chat_sdk::Client::builder("a+b@example.com", "p&ss word", Region::Tsotesting)
            .regions(test_table())
            .transport(transport.clone())
            .connect()
            .await;
        let url = &transport.requests()[0].url;
        assert!(url.contains("name=a%2Bb%40example%2Ecom"), "{url}");
        assert!(url.contains("password=p%26ss%20word"), "{url}");
        assert!(url.ends_with("&rememberUser=on"));
    }

    #[tokio::test]
    async fn unknown_region_fails_before_any_request() {
        let (transport, _) = MockTransport::new(Vec::<HttpResponse>::new());
        let err = settlers_chat_sdk::Client::builder(EMAIL, PASSWORD, Region::Brazil)
            .regions(test_table())
            .transport(transport.clone())
            .connect()
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::UnknownRegion(Region::Brazil)));
        assert!(transport.requests().is_empty());
    }
}

// ═══════════════════════════════════════════════════════════════════
// 2. Check-in
// ═══════════════════════════════════════════════════════════════════

mod check_in {
    use super::*;

    #[tokio::test]
    async fn fetches_main_page() {
        let (transport, _) = MockTransport::new(handshake_script());
        builder(transport.clone()).connect().await.unwrap();
        let requests = transport.requests();
        assert_eq!(requests[1].method, "GET");
        assert_eq!(requests[1].url, MAIN_PAGE_URL);
    }

    #[tokio::test]
    async fn missing_token_cookie_fails_fast() {
        let page = HttpResponse::new(200, "").with_header("Set-Cookie", format!("dsoAuthUser={USER_ID}"));
        let (transport, _) = MockTransport::new([login_ok(), page]);
        let err = builder(transport.clone()).connect().await.unwrap_err();
        assert!(matches!(err, HandshakeError::MissingCookie("dsoAuthToken")), "got {err:?}");
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn main_page_error_names_the_stage() {
        let (transport, _) = MockTransport::new([login_ok(), HttpResponse::new(503, "")]);
        let err = builder(transport).connect().await.unwrap_err();
        assert!(matches!(
            err,
            HandshakeError::UnexpectedStatus { stage: Stage::CheckIn, status: 503, .. }
        ));
    }
}

// ═══════════════════════════════════════════════════════════════════
// 3. Realm resolution
// ═══════════════════════════════════════════════════════════════════

mod realms {
    use super::*;

    #[tokio::test]
    async fn probing_stops_at_the_first_realm_that_accepts() {
        let (transport, _) = MockTransport::new(handshake_script());
        let client = builder(transport.clone()).connect().await.unwrap();

        assert_eq!(client.display_name(), NAME);
        let auth: Vec<_> = transport
            .requests()
            .into_iter()
            .filter(|r| r.url.ends_with("/authenticate"))
            .collect();
        assert_eq!(auth.len(), 2, "realm 3 must not be contacted");
        assert_eq!(auth[0].url, auth_url(1));
        assert_eq!(auth[1].url, auth_url(2));
        for request in &auth {
            assert_eq!(request.body, format!("DSOAUTHTOKEN={WEB_TOKEN}&DSOAUTHUSER={USER_ID}"));
        }

        let binding = client.session().binding().unwrap();
        assert_eq!(binding.realm.no, "2");
        assert_eq!(binding.realm.chat_host, REALM_2_CHAT_HOST);
        assert_eq!(binding.sid, SID);
        assert_eq!(client.session().auth_token(), CHAT_TOKEN);
    }

    #[tokio::test]
    async fn every_realm_refusing_is_an_error() {
        let (transport, _) = MockTransport::new([
            login_ok(),
            main_page(),
            wrong_realm(),
            wrong_realm(),
            wrong_realm(),
        ]);
        let err = builder(transport.clone()).connect().await.unwrap_err();
        assert!(matches!(err, HandshakeError::NoRealmMatched { tried: 3 }), "got {err:?}");
        assert_eq!(transport.requests().len(), 5, "no bind without a realm");
    }

    #[tokio::test]
    async fn garbled_acceptance_is_an_error() {
        let (transport, _) = MockTransport::new([
            login_ok(),
            main_page(),
            HttpResponse::new(200, "oops"),
        ]);
        let err = builder(transport).connect().await.unwrap_err();
        assert!(matches!(err, HandshakeError::MalformedAuthResponse(body) if body == "oops"));
    }

    #[tokio::test]
    async fn server_error_stops_the_scan() {
        let (transport, _) = MockTransport::new([
            login_ok(),
            main_page(),
            HttpResponse::new(500, "busy"),
        ]);
        let err = builder(transport.clone()).connect().await.unwrap_err();
        assert!(matches!(
            err,
            HandshakeError::UnexpectedStatus { stage: Stage::Auth, status: 500, .. }
        ));
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test]
    async fn fixed_realm_skips_the_scan() {
        let (transport, _) = MockTransport::new([
            login_ok(),
            main_page(),
            realm_accepts(),
            bind_opened(),
            empty(),
            empty(),
            empty(),
        ]);
        let client = builder(transport.clone())
            .resolver(FixedRealm("3".into()))
            .connect()
            .await
            .unwrap();

        let requests = transport.requests();
        assert_eq!(requests[2].url, auth_url(3));
        assert_eq!(requests[3].url, "http://w03chat01.test.local/http-bind/");
        assert_eq!(client.session().binding().unwrap().realm.no, "3");
    }
}

// ═══════════════════════════════════════════════════════════════════
// 4. Bind
// ═══════════════════════════════════════════════════════════════════

mod bind {
    use super::*;

    #[tokio::test]
    async fn four_frames_four_request_ids() {
        let (transport, _) = MockTransport::new(handshake_script());
        let client = builder(transport.clone()).connect().await.unwrap();

        let bind: Vec<_> = transport
            .requests()
            .into_iter()
            .filter(|r| r.url == REALM_2_BIND_URL)
            .collect();
        assert_eq!(bind.len(), 4);
        let rids: Vec<_> = bind.iter().map(|r| r.rid().unwrap()).collect();
        assert_eq!(rids, [FIRST_RID, FIRST_RID + 1, FIRST_RID + 2, FIRST_RID + 3]);
        assert_eq!(client.session().peek_rid(), FIRST_RID + 4);

        for request in &bind {
            assert_eq!(request.content_type.as_deref(), Some("text/xml; charset=utf-8"));
        }
        assert_eq!(bind[0].frame().attr("sid"), None);
        assert_eq!(bind[0].frame().attr("to"), Some(REALM_2_CHAT_HOST));
        for request in &bind[1..] {
            assert_eq!(request.frame().attr("sid"), Some(SID));
        }
    }

    #[tokio::test]
    async fn plain_auth_carries_the_chat_identity() {
        let (transport, _) = MockTransport::new(handshake_script());
        builder(transport.clone()).connect().await.unwrap();

        let auth_frame = transport.requests()[5].frame();
        let auth = auth_frame.child("auth").unwrap();
        assert_eq!(auth.attr("mechanism"), Some("PLAIN"));
        let decoded = base64::engine::general_purpose::STANDARD.decode(&auth.text).unwrap();
        assert_eq!(decoded, format!("{NAME}@null\0{NAME}\0{CHAT_TOKEN}\0null").into_bytes());

        let restart = transport.requests()[6].frame();
        assert_eq!(restart.attr("xmpp:restart"), Some("true"));

        let resource = transport.requests()[7].frame();
        let bound = resource.child("iq").unwrap().child("bind").unwrap();
        assert_eq!(bound.child("resource").unwrap().text, "xiff-bosh");
    }

    #[tokio::test]
    async fn missing_sid_is_an_error() {
        let (transport, _) = MockTransport::new([
            login_ok(),
            main_page(),
            wrong_realm(),
            realm_accepts(),
            empty(),
        ]);
        let err = builder(transport.clone()).connect().await.unwrap_err();
        assert!(matches!(err, HandshakeError::MissingSid), "got {err:?}");
        assert_eq!(transport.requests().len(), 5);
    }

    #[tokio::test]
    async fn failed_bind_leaves_the_session_unbound() {
        let (transport, _) = MockTransport::new([
            login_ok(),
            main_page(),
            wrong_realm(),
            realm_accepts(),
            bind_opened(),
            HttpResponse::new(500, ""),
        ]);
        let table = test_table();
        let cancel = CancellationToken::new();
        let handshake = Handshake {
            transport: transport.as_ref(),
            region: table.get(Region::Tsotesting).unwrap(),
            resolver: &ProbeRealms,
            cancel: &cancel,
            progress: None,
            poll_wait_secs: 20,
            resource: "xiff-bosh",
        };
        let mut session = Session::with_initial_rid(EMAIL, PASSWORD, FIRST_RID);

        let err = handshake.run(&mut session).await.unwrap_err();
        assert!(matches!(
            err,
            HandshakeError::UnexpectedStatus { stage: Stage::Bind, status: 500, .. }
        ));
        assert_eq!(session.display_name(), NAME);
        assert!(!session.is_bound());
        assert!(session.binding().is_none());
    }

    #[tokio::test]
    async fn progress_reports_each_stage() {
        let (transport, _) = MockTransport::new(handshake_script());
        let (tx, rx) = watch::channel(Stage::Login);
        let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let watcher = {
            let seen = seen.clone();
            let mut rx = rx.clone();
            tokio::spawn(async move {
                while rx.changed().await.is_ok() {
                    seen.lock().push(*rx.borrow_and_update());
                }
            })
        };
        builder(transport).progress(tx).connect().await.unwrap();
        within(watcher).await.unwrap();

        assert_eq!(*rx.borrow(), Stage::Bind);
        let seen = seen.lock();
        assert_eq!(seen.last(), Some(&Stage::Bind));
        let order = |stage: &Stage| Stage::ALL.iter().position(|s| s == stage);
        assert!(seen.windows(2).all(|w| order(&w[0]) < order(&w[1])), "{seen:?}");
    }
}
