use std::time::Duration;

use crate::{RefreshMethod, RequestConfig};

/// Default key for the access token in payloads and storage.
pub const DEFAULT_ACCESS_TOKEN_NAME: &str = "BEARER";
/// Default key for the refresh token in payloads and storage.
pub const DEFAULT_REFRESH_TOKEN_NAME: &str = "REFRESH";
/// Default ceiling on refresh/replay cycles per logical call.
pub const DEFAULT_MAX_REFRESH_ATTEMPTS: usize = 3;

/// Configures the client. Fixed for the lifetime of a client instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientOptions {
    /// Base for relative request URLs and a relative refresh endpoint.
    ///
    /// Relative paths extend the base path even with a leading `/`:
    /// `https://h/v1` plus `/orders` is `https://h/v1/orders`.
    pub base_url: Option<String>,
    /// Endpoint used by the default refresh strategy. May stay empty when a
    /// custom strategy is installed.
    pub refresh_endpoint: String,
    /// How the default strategy sends credentials.
    pub refresh_method: RefreshMethod,
    /// Whether the default strategy also sends the current access token.
    pub send_access_token_on_refresh: bool,
    pub access_token_name: String,
    pub refresh_token_name: String,
    /// Maximum refresh/replay cycles per logical call (at least 1).
    pub max_refresh_attempts: usize,
    /// Initial state of the authorization flag.
    pub authorization: bool,
    /// Initial state of the check-bearer-in-header flag.
    pub check_bearer_in_header: bool,
    /// Reject non-2xx responses with [`JwtHttpError::Http`](crate::JwtHttpError::Http).
    /// When off, any non-401 response body is returned as the payload.
    pub strict_status: bool,
    /// Serialize refreshes so concurrent 401s share one refresh call.
    pub coalesce_refresh: bool,
    /// Transport policy defaults for every request.
    pub request: RequestConfig,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: None,
            refresh_endpoint: String::new(),
            refresh_method: RefreshMethod::default(),
            send_access_token_on_refresh: false,
            access_token_name: DEFAULT_ACCESS_TOKEN_NAME.to_owned(),
            refresh_token_name: DEFAULT_REFRESH_TOKEN_NAME.to_owned(),
            max_refresh_attempts: DEFAULT_MAX_REFRESH_ATTEMPTS,
            authorization: true,
            check_bearer_in_header: false,
            strict_status: true,
            coalesce_refresh: false,
            request: RequestConfig::standard(),
        }
    }
}

impl ClientOptions {
    /// Options using the given refresh endpoint and defaults elsewhere.
    pub fn with_refresh_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            refresh_endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Reads options from environment variables, keeping defaults for
    /// anything unset.
    ///
    /// - `JWT_HTTP_BASE_URL`
    /// - `JWT_HTTP_REFRESH_ENDPOINT`
    /// - `JWT_HTTP_REFRESH_METHOD` — `GET` or `POST`
    /// - `JWT_HTTP_ACCESS_TOKEN_NAME`, `JWT_HTTP_REFRESH_TOKEN_NAME`
    /// - `JWT_HTTP_MAX_REFRESH_ATTEMPTS` — integer ≥ 1
    /// - `JWT_HTTP_TIMEOUT_MS`
    ///
    /// **Not available on `wasm32` targets.**
    #[cfg(not(target_arch = "wasm32"))]
    pub fn from_env() -> std::result::Result<Self, String> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    #[cfg_attr(target_arch = "wasm32", allow(dead_code))]
    fn from_lookup<F>(lookup: F) -> std::result::Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let mut options = Self::default();

        if let Some(base_url) = var("JWT_HTTP_BASE_URL") {
            options.base_url = Some(base_url.trim().to_owned());
        }
        if let Some(endpoint) = var("JWT_HTTP_REFRESH_ENDPOINT") {
            options.refresh_endpoint = endpoint.trim().to_owned();
        }
        if let Some(method) = var("JWT_HTTP_REFRESH_METHOD") {
            options.refresh_method = match method.trim().to_ascii_uppercase().as_str() {
                "GET" => RefreshMethod::Get,
                "POST" => RefreshMethod::Post,
                other => return Err(format!("JWT_HTTP_REFRESH_METHOD must be GET or POST, got '{other}'")),
            };
        }
        if let Some(name) = var("JWT_HTTP_ACCESS_TOKEN_NAME") {
            options.access_token_name = name.trim().to_owned();
        }
        if let Some(name) = var("JWT_HTTP_REFRESH_TOKEN_NAME") {
            options.refresh_token_name = name.trim().to_owned();
        }
        if let Some(attempts) = var("JWT_HTTP_MAX_REFRESH_ATTEMPTS") {
            let attempts: usize = attempts
                .trim()
                .parse()
                .map_err(|_| format!("JWT_HTTP_MAX_REFRESH_ATTEMPTS is not an integer: '{attempts}'"))?;
            if attempts == 0 {
                return Err("JWT_HTTP_MAX_REFRESH_ATTEMPTS must be at least 1".to_owned());
            }
            options.max_refresh_attempts = attempts;
        }
        if let Some(timeout) = var("JWT_HTTP_TIMEOUT_MS") {
            let millis: u64 = timeout
                .trim()
                .parse()
                .map_err(|_| format!("JWT_HTTP_TIMEOUT_MS is not an integer: '{timeout}'"))?;
            options.request.timeout = Some(Duration::from_millis(millis));
        }

        Ok(options)
    }
}
