use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{
    header::{self, HeaderMap, HeaderValue},
    Method, StatusCode, Url,
};
use serde_json::Value;

use crate::{
    request::{CachePolicy, RedirectMode},
    JwtHttpError, RequestConfig, Result,
};

/// Fully built request handed to a [`Transport`].
#[derive(Clone, Debug)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    /// Serialized JSON body, absent for GET and for requests without data.
    pub body: Option<String>,
    /// Transport policy flags with client defaults already filled in.
    pub config: RequestConfig,
}

/// Buffered response returned by a [`Transport`].
#[derive(Clone, Debug)]
pub struct TransportResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: String,
}

impl TransportResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<String>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Looks up a header value (names are case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn text(&self) -> &str {
        &self.body
    }

    /// Parses the body as JSON. An empty body yields `Value::Null`.
    pub fn json(&self) -> Result<Value> {
        if self.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&self.body).map_err(|err| {
            JwtHttpError::Decode(format!(
                "invalid JSON response (status {}): {err}; body: {}",
                self.status.as_u16(),
                self.body
            ))
        })
    }
}

/// The HTTP request/response primitive the client is built on.
///
/// Implementations perform exactly one network exchange per call and never
/// inspect the status code.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse>;
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        (**self).send(request).await
    }
}

/// Default [`Transport`] backed by `reqwest`.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    follow: reqwest::Client,
    no_follow: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with one redirect-following and one
    /// non-following client.
    pub fn new() -> Result<Self> {
        #[cfg(not(target_arch = "wasm32"))]
        let no_follow = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(JwtHttpError::Transport)?;
        // Browsers always follow redirects under fetch; there is no policy hook.
        #[cfg(target_arch = "wasm32")]
        let no_follow = reqwest::Client::new();

        Ok(Self {
            follow: reqwest::Client::new(),
            no_follow,
        })
    }

    /// Wraps an existing client. Its own redirect policy applies to every
    /// request except that [`RedirectMode::Error`] still rejects 3xx responses.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self {
            follow: client.clone(),
            no_follow: client,
        }
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        let TransportRequest {
            method,
            url,
            mut headers,
            body,
            config,
        } = request;

        let redirect = config.redirect.unwrap_or_default();
        let client = match redirect {
            RedirectMode::Follow => &self.follow,
            RedirectMode::Manual | RedirectMode::Error => &self.no_follow,
        };

        if let Some(value) = cache_control(config.cache.unwrap_or_default()) {
            headers
                .entry(header::CACHE_CONTROL)
                .or_insert(HeaderValue::from_static(value));
        }

        let mut builder = client.request(method, url).headers(headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        #[cfg(target_arch = "wasm32")]
        {
            use crate::request::{CredentialsMode, RequestMode};
            if config.credentials == Some(CredentialsMode::Include) {
                builder = builder.fetch_credentials_include();
            }
            if config.mode == Some(RequestMode::NoCors) {
                builder = builder.fetch_mode_no_cors();
            }
        }

        let response = builder.send().await.map_err(JwtHttpError::Transport)?;
        let status = response.status();
        if redirect == RedirectMode::Error && status.is_redirection() {
            return Err(JwtHttpError::Http {
                status: status.as_u16(),
                message: "redirect responses are not allowed for this request".to_owned(),
            });
        }

        let headers = response.headers().clone();
        let body = response.text().await.map_err(JwtHttpError::Transport)?;
        Ok(TransportResponse::new(status, headers, body))
    }
}

fn cache_control(policy: CachePolicy) -> Option<&'static str> {
    match policy {
        CachePolicy::NoStore => Some("no-store"),
        CachePolicy::NoCache | CachePolicy::Reload => Some("no-cache"),
        CachePolicy::OnlyIfCached => Some("only-if-cached"),
        CachePolicy::Default | CachePolicy::ForceCache => None,
    }
}
