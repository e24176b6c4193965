use std::time::Duration;

use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Method,
};
use serde::Serialize;
use serde_json::Value;

use crate::{JwtHttpError, Result};

/// Cross-origin mode of a request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RequestMode {
    #[default]
    Cors,
    NoCors,
    SameOrigin,
}

/// Cache policy forwarded to the transport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CachePolicy {
    Default,
    NoStore,
    Reload,
    #[default]
    NoCache,
    ForceCache,
    OnlyIfCached,
}

/// Whether cookies and HTTP auth travel with the request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CredentialsMode {
    Omit,
    #[default]
    SameOrigin,
    Include,
}

/// Redirect handling.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RedirectMode {
    #[default]
    Follow,
    /// Redirect responses are returned as-is.
    Manual,
    /// A redirect response fails the request.
    Error,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReferrerPolicy {
    #[default]
    NoReferrer,
    NoReferrerWhenDowngrade,
    Origin,
    OriginWhenCrossOrigin,
    SameOrigin,
    StrictOrigin,
    StrictOriginWhenCrossOrigin,
    UnsafeUrl,
}

impl ReferrerPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoReferrer => "no-referrer",
            Self::NoReferrerWhenDowngrade => "no-referrer-when-downgrade",
            Self::Origin => "origin",
            Self::OriginWhenCrossOrigin => "origin-when-cross-origin",
            Self::SameOrigin => "same-origin",
            Self::StrictOrigin => "strict-origin",
            Self::StrictOriginWhenCrossOrigin => "strict-origin-when-cross-origin",
            Self::UnsafeUrl => "unsafe-url",
        }
    }
}

/// Transport policy flags for a single request.
///
/// Fields left as `None` fall back to the client-wide defaults in
/// [`ClientOptions::request`](crate::ClientOptions::request). The client never
/// interprets these values; they are passed to the [`Transport`](crate::Transport).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestConfig {
    pub mode: Option<RequestMode>,
    pub cache: Option<CachePolicy>,
    pub credentials: Option<CredentialsMode>,
    pub redirect: Option<RedirectMode>,
    pub referrer_policy: Option<ReferrerPolicy>,
    /// Per-request timeout. No timeout is applied when unset.
    pub timeout: Option<Duration>,
}

impl RequestConfig {
    /// Config with every policy flag set to its standard default.
    pub fn standard() -> Self {
        Self {
            mode: Some(RequestMode::default()),
            cache: Some(CachePolicy::default()),
            credentials: Some(CredentialsMode::default()),
            redirect: Some(RedirectMode::default()),
            referrer_policy: Some(ReferrerPolicy::default()),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_redirect(mut self, redirect: RedirectMode) -> Self {
        self.redirect = Some(redirect);
        self
    }

    pub fn with_cache(mut self, cache: CachePolicy) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_credentials(mut self, credentials: CredentialsMode) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_referrer_policy(mut self, policy: ReferrerPolicy) -> Self {
        self.referrer_policy = Some(policy);
        self
    }

    /// Fills unset fields from `defaults`; fields already set are kept.
    pub fn or_defaults(&self, defaults: &RequestConfig) -> RequestConfig {
        RequestConfig {
            mode: self.mode.or(defaults.mode),
            cache: self.cache.or(defaults.cache),
            credentials: self.credentials.or(defaults.credentials),
            redirect: self.redirect.or(defaults.redirect),
            referrer_policy: self.referrer_policy.or(defaults.referrer_policy),
            timeout: self.timeout.or(defaults.timeout),
        }
    }
}

/// One logical caller-facing request.
///
/// The same value is replayed unchanged after every token refresh.
#[derive(Clone, Debug)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    /// JSON payload. `Value::Null` means "no data".
    pub data: Value,
    /// Caller headers, applied above the common headers.
    pub headers: HeaderMap,
    pub config: RequestConfig,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            data: Value::Null,
            headers: HeaderMap::new(),
            config: RequestConfig::default(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Sets the request data from any serializable value.
    pub fn data<D: Serialize>(mut self, data: D) -> Result<Self> {
        self.data = to_data(data)?;
        Ok(self)
    }

    /// Adds a caller header, replacing an earlier value for the same name.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn config(mut self, config: RequestConfig) -> Self {
        self.config = config;
        self
    }
}

pub(crate) fn to_data<D: Serialize>(data: D) -> Result<Value> {
    serde_json::to_value(data)
        .map_err(|err| JwtHttpError::InvalidRequest(format!("request data is not JSON: {err}")))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::{ApiRequest, CachePolicy, RedirectMode, RequestConfig};

    #[test]
    fn unset_fields_take_defaults() {
        let call = RequestConfig::default().with_redirect(RedirectMode::Manual);
        let merged = call.or_defaults(&RequestConfig::standard().with_timeout(Duration::from_secs(5)));
        assert_eq!(merged.redirect, Some(RedirectMode::Manual));
        assert_eq!(merged.cache, Some(CachePolicy::NoCache));
        assert_eq!(merged.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn unit_data_is_null() {
        let request = ApiRequest::get("/x").data(()).expect("unit serializes");
        assert!(request.data.is_null());
        let request = ApiRequest::post("/x").data(json!({"id": 1})).expect("json");
        assert_eq!(request.data, json!({"id": 1}));
    }
}
