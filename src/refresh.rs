//! Token refresh strategies.

use std::{fmt, future::Future, sync::Arc};

use async_trait::async_trait;
use reqwest::{
    header::{self, HeaderMap, HeaderValue},
    Method, Url,
};
use serde_json::{Map, Value};

use crate::{
    dispatch::{append_query, resolve_url},
    status::{check_not_found, check_success},
    JwtHttpError, RequestConfig, Result, Transport, TransportRequest,
};

/// Credentials returned by a refresh.
///
/// Absent or empty fields leave the stored value untouched.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
            refresh_token,
        }
    }

    /// Reads both tokens from a JSON object under the given key names.
    pub fn from_json(body: &Value, access_token_name: &str, refresh_token_name: &str) -> Self {
        let field = |name: &str| {
            body.get(name)
                .and_then(Value::as_str)
                .filter(|token| !token.is_empty())
                .map(str::to_owned)
        };
        Self {
            access_token: field(access_token_name),
            refresh_token: field(refresh_token_name),
        }
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |token: &Option<String>| token.as_ref().map(|_| "<redacted>");
        f.debug_struct("TokenPair")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .finish()
    }
}

/// Current credentials handed to a [`RefreshStrategy`].
#[derive(Clone, Default)]
pub struct RefreshRequest {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Whether the access token may be read from a response header.
    pub check_bearer_in_header: bool,
}

impl fmt::Debug for RefreshRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshRequest")
            .field("has_access_token", &self.access_token.is_some())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("check_bearer_in_header", &self.check_bearer_in_header)
            .finish()
    }
}

/// Obtains a fresh [`TokenPair`].
///
/// Errors are propagated to the caller of the request that triggered the
/// refresh, unchanged.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait RefreshStrategy: Send + Sync {
    async fn fetch_tokens(&self, request: RefreshRequest) -> Result<TokenPair>;
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl<T: RefreshStrategy + ?Sized> RefreshStrategy for Arc<T> {
    async fn fetch_tokens(&self, request: RefreshRequest) -> Result<TokenPair> {
        (**self).fetch_tokens(request).await
    }
}

/// How the default strategy sends credentials to the refresh endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RefreshMethod {
    /// Tokens travel as query parameters.
    Get,
    /// Tokens travel in a JSON body.
    #[default]
    Post,
}

/// Default strategy: calls a refresh endpoint with the current refresh token.
///
/// The response is a JSON object holding the new access token under the
/// access token name and optionally a new refresh token. With
/// `check_bearer_in_header`, a response header named after the access token
/// (lower-cased) takes priority over the body.
pub struct EndpointRefresh {
    transport: Arc<dyn Transport>,
    endpoint: String,
    base_url: Option<Url>,
    method: RefreshMethod,
    send_access_token: bool,
    access_token_name: String,
    refresh_token_name: String,
    config: RequestConfig,
}

impl EndpointRefresh {
    pub fn new(
        transport: Arc<dyn Transport>,
        endpoint: impl Into<String>,
        access_token_name: impl Into<String>,
        refresh_token_name: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            endpoint: endpoint.into(),
            base_url: None,
            method: RefreshMethod::default(),
            send_access_token: false,
            access_token_name: access_token_name.into(),
            refresh_token_name: refresh_token_name.into(),
            config: RequestConfig::standard(),
        }
    }

    /// Base used when the endpoint is a relative path.
    pub fn with_base_url(mut self, base_url: Option<Url>) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn with_method(mut self, method: RefreshMethod) -> Self {
        self.method = method;
        self
    }

    /// Also send the current access token to the endpoint.
    pub fn with_access_token(mut self, send: bool) -> Self {
        self.send_access_token = send;
        self
    }

    pub fn with_config(mut self, config: RequestConfig) -> Self {
        self.config = config;
        self
    }

    fn payload(&self, request: &RefreshRequest) -> Value {
        let mut payload = Map::new();
        if let Some(token) = &request.refresh_token {
            payload.insert(self.refresh_token_name.clone(), Value::String(token.clone()));
        }
        if self.send_access_token {
            if let Some(token) = &request.access_token {
                payload.insert(self.access_token_name.clone(), Value::String(token.clone()));
            }
        }
        Value::Object(payload)
    }
}

impl fmt::Debug for EndpointRefresh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointRefresh")
            .field("endpoint", &self.endpoint)
            .field("method", &self.method)
            .field("send_access_token", &self.send_access_token)
            .field("access_token_name", &self.access_token_name)
            .field("refresh_token_name", &self.refresh_token_name)
            .finish_non_exhaustive()
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl RefreshStrategy for EndpointRefresh {
    async fn fetch_tokens(&self, request: RefreshRequest) -> Result<TokenPair> {
        if self.endpoint.trim().is_empty() {
            return Err(JwtHttpError::InvalidRequest(
                "no refresh endpoint configured".to_owned(),
            ));
        }

        let mut url = resolve_url(self.base_url.as_ref(), &self.endpoint)?;
        // Taken before the query is appended so tokens stay out of errors.
        let target = url.to_string();
        let payload = self.payload(&request);
        let (method, body) = match self.method {
            RefreshMethod::Get => {
                append_query(&mut url, &payload)?;
                (Method::GET, None)
            }
            RefreshMethod::Post => (Method::POST, Some(payload.to_string())),
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        #[cfg(feature = "tracing")]
        tracing::debug!(endpoint = %target, "requesting new tokens");

        let response = self
            .transport
            .send(TransportRequest {
                method,
                url,
                headers,
                body,
                config: self.config.clone(),
            })
            .await?;
        let response = check_success(check_not_found(response, &target)?)?;
        let body = response.json()?;

        let mut pair = TokenPair::from_json(&body, &self.access_token_name, &self.refresh_token_name);
        if request.check_bearer_in_header {
            let name = self.access_token_name.to_ascii_lowercase();
            if let Some(token) = response.header(&name).map(strip_bearer).filter(|t| !t.is_empty()) {
                pair.access_token = Some(token.to_owned());
            }
        }
        Ok(pair)
    }
}

fn strip_bearer(value: &str) -> &str {
    let trimmed = value.trim();
    match trimmed.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => trimmed[7..].trim(),
        _ => trimmed,
    }
}

/// Adapts an async closure into a [`RefreshStrategy`].
///
/// ```
/// use jwt_http::{RefreshFn, TokenPair};
///
/// let strategy = RefreshFn::new(|_request| async {
///     Ok(TokenPair::new("new-access", Some("new-refresh".to_owned())))
/// });
/// # let _ = strategy;
/// ```
pub struct RefreshFn<F>(F);

impl<F> RefreshFn<F> {
    pub fn new<Fut>(f: F) -> Self
    where
        F: Fn(RefreshRequest) -> Fut,
        Fut: Future<Output = Result<TokenPair>>,
    {
        Self(f)
    }
}

impl<F> fmt::Debug for RefreshFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RefreshFn")
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[async_trait]
impl<F, Fut> RefreshStrategy for RefreshFn<F>
where
    F: Fn(RefreshRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TokenPair>> + Send,
{
    async fn fetch_tokens(&self, request: RefreshRequest) -> Result<TokenPair> {
        (self.0)(request).await
    }
}

#[cfg(target_arch = "wasm32")]
#[async_trait(?Send)]
impl<F, Fut> RefreshStrategy for RefreshFn<F>
where
    F: Fn(RefreshRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TokenPair>>,
{
    async fn fetch_tokens(&self, request: RefreshRequest) -> Result<TokenPair> {
        (self.0)(request).await
    }
}
