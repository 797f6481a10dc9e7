//! HTTP transport used by the handshake and the poll loop.
//!
//! Every request takes a [`CancellationToken`]. Cancelling it abandons the
//! request: the future resolves to [`TransportError::Cancelled`] and whatever
//! the server eventually answers is dropped with the connection.
//!
//! A transport owns the cookie jar, so one instance serves exactly one
//! session. Never share a transport between two logins.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// Content type of every frame posted to the binding endpoint.
pub const XML_CONTENT_TYPE: &str = "text/xml; charset=utf-8";

/// A minimal HTTP response.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    /// Response headers, lowercase names, in arrival order. Repeated headers
    /// (`set-cookie`) appear once per value.
    pub headers: Vec<(String, String)>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_lowercase(), value.into()));
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First value of a header (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.header_all(name).next()
    }

    pub fn header_all<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> + 'a {
        let lower = name.to_lowercase();
        self.headers
            .iter()
            .filter(move |(k, _)| *k == lower)
            .map(|(_, v)| v.as_str())
    }

    /// Value of a cookie set by this response, from its `Set-Cookie` headers.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.header_all("set-cookie").find_map(|header| {
            let pair = header.split(';').next()?.trim();
            let (key, value) = pair.split_once('=')?;
            (key.trim() == name).then(|| value.trim())
        })
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, cancel: &CancellationToken) -> Result<HttpResponse, TransportError>;

    async fn post(
        &self,
        url: &str,
        body: String,
        content_type: &str,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, TransportError>;
}

/// [`reqwest`]-backed transport with its own cookie store.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    inner: reqwest::Client,
}

impl ReqwestTransport {
    /// `timeout` bounds every request, so it must exceed the server's
    /// long-poll wait.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let inner = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()?;
        Ok(Self { inner })
    }

    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, TransportError> {
        let exchange = async {
            let resp = request.send().await?;
            let status = resp.status().as_u16();
            let headers: Vec<(String, String)> = resp
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_lowercase(), v.to_string()))
                })
                .collect();
            let body = resp.text().await?;
            Ok::<_, TransportError>(HttpResponse {
                status,
                body,
                headers,
            })
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = exchange => result,
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str, cancel: &CancellationToken) -> Result<HttpResponse, TransportError> {
        tracing::debug!(%url, "GET");
        self.execute(self.inner.get(url), cancel).await
    }

    async fn post(
        &self,
        url: &str,
        body: String,
        content_type: &str,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, TransportError> {
        tracing::debug!(%url, len = body.len(), "POST");
        let request = self
            .inner
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body);
        self.execute(request, cancel).await
    }
}
