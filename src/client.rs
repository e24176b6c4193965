use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, RwLock,
    },
};

use reqwest::{header::HeaderMap, Url};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::{
    dispatch::{build_request, merge_headers, DispatchContext},
    error::BoxError,
    hooks::Hooks,
    status::{check_success, check_unauthorized},
    ApiRequest, ClientOptions, DefaultTokenStore, EndpointRefresh, JwtHttpError, RefreshRequest,
    RefreshStrategy, ReqwestTransport, Result, TokenPair, TokenStore, Transport,
};

/// HTTP client that attaches bearer tokens and refreshes them on 401.
///
/// Every verb runs one logical call: before handlers, then up to
/// `max_refresh_attempts + 1` dispatches separated by token refreshes, then
/// after handlers. Share an instance across tasks with `Arc`.
pub struct JwtHttpClient {
    transport: Arc<dyn Transport>,
    token_store: Arc<dyn TokenStore>,
    refresh: Arc<dyn RefreshStrategy>,
    options: ClientOptions,
    base_url: Option<Url>,
    common_headers: RwLock<HeaderMap>,
    authorization: AtomicBool,
    check_bearer_in_header: AtomicBool,
    hooks: Hooks,
    refresh_guard: tokio::sync::Mutex<()>,
}

impl fmt::Debug for JwtHttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtHttpClient")
            .field("options", &self.options)
            .field("authorization", &self.authorization())
            .field("check_bearer_in_header", &self.check_bearer_in_header())
            .field("hooks", &self.hooks)
            .field("tokens", &"<redacted>")
            .finish()
    }
}

impl JwtHttpClient {
    /// Creates a client that refreshes through `refresh_endpoint`, with
    /// in-memory token storage and default options.
    pub fn new(refresh_endpoint: impl Into<String>) -> Result<Self> {
        Self::builder()
            .options(ClientOptions::with_refresh_endpoint(refresh_endpoint))
            .build()
    }

    /// Creates a client from `JWT_HTTP_*` environment variables.
    ///
    /// See [`ClientOptions::from_env`]. **Not available on `wasm32` targets.**
    #[cfg(not(target_arch = "wasm32"))]
    pub fn from_env() -> std::result::Result<Self, String> {
        let options = ClientOptions::from_env()?;
        Self::builder()
            .options(options)
            .build()
            .map_err(|err| err.to_string())
    }

    pub fn builder() -> JwtHttpClientBuilder {
        JwtHttpClientBuilder::default()
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn token_store(&self) -> &Arc<dyn TokenStore> {
        &self.token_store
    }

    /// Merges `headers` into the headers sent with every request.
    ///
    /// Names already present are replaced. Common headers have the lowest
    /// precedence and are overridden by per-request headers.
    pub fn add_common_headers(&self, headers: HeaderMap) {
        let mut common = self
            .common_headers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        merge_headers(&mut common, &headers);
    }

    pub fn common_headers(&self) -> HeaderMap {
        self.common_headers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Enables or disables the `Authorization` header on requests.
    pub fn set_authorization_flag(&self, enabled: bool) {
        self.authorization.store(enabled, Ordering::Relaxed);
    }

    pub fn authorization(&self) -> bool {
        self.authorization.load(Ordering::Relaxed)
    }

    /// Lets the default refresh strategy read the new access token from a
    /// response header named after the access token.
    pub fn set_check_bearer_in_header_flag(&self, enabled: bool) {
        self.check_bearer_in_header.store(enabled, Ordering::Relaxed);
    }

    pub fn check_bearer_in_header(&self) -> bool {
        self.check_bearer_in_header.load(Ordering::Relaxed)
    }

    /// Persists tokens obtained elsewhere, e.g. from a login call.
    ///
    /// Absent or empty tokens leave the stored values untouched.
    pub async fn store_tokens(&self, tokens: &TokenPair) -> Result<()> {
        if let Some(token) = tokens.access_token.as_deref().filter(|t| !t.is_empty()) {
            self.token_store.set_access_token(token).await?;
        }
        if let Some(token) = tokens.refresh_token.as_deref().filter(|t| !t.is_empty()) {
            self.token_store.set_refresh_token(token).await?;
        }
        Ok(())
    }

    /// Sends a GET request; `data` is encoded as query parameters.
    pub async fn get<D: Serialize>(&self, url: &str, data: D) -> Result<Value> {
        self.execute(ApiRequest::get(url).data(data)?).await
    }

    /// Sends a POST request with `data` as JSON body (none when `data` is null).
    pub async fn post<D: Serialize>(&self, url: &str, data: D) -> Result<Value> {
        self.execute(ApiRequest::post(url).data(data)?).await
    }

    pub async fn put<D: Serialize>(&self, url: &str, data: D) -> Result<Value> {
        self.execute(ApiRequest::put(url).data(data)?).await
    }

    pub async fn delete<D: Serialize>(&self, url: &str, data: D) -> Result<Value> {
        self.execute(ApiRequest::delete(url).data(data)?).await
    }

    /// Runs one logical call and deserializes the payload into `T`.
    pub async fn execute_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let payload = self.execute(request).await?;
        serde_json::from_value(payload)
            .map_err(|err| JwtHttpError::Decode(format!("unexpected response shape: {err}")))
    }

    /// Runs one logical call and returns the parsed JSON payload.
    ///
    /// Handler errors fail the call. After handlers only see successful
    /// payloads.
    pub async fn execute(&self, request: ApiRequest) -> Result<Value> {
        self.hooks.run_before()?;
        let payload = self.send_with_refresh(&request).await?;
        self.hooks.run_after(&payload)?;
        Ok(payload)
    }

    /// Dispatches `request`, refreshing and replaying on 401.
    ///
    /// The attempt ceiling is checked before each refresh: after
    /// `max_refresh_attempts` refresh cycles, a further 401 fails with
    /// [`JwtHttpError::MaxCallCountExceeded`].
    async fn send_with_refresh(&self, request: &ApiRequest) -> Result<Value> {
        let max_attempts = self.options.max_refresh_attempts;
        let mut attempt = 0usize;

        loop {
            let access_token = self.current_access_token().await?;
            match self.dispatch(request, access_token.as_deref()).await {
                Err(JwtHttpError::Unauthorized) => {}
                outcome => return outcome,
            }

            if attempt >= max_attempts {
                #[cfg(feature = "tracing")]
                tracing::debug!(attempt, max_attempts, "refresh attempts exhausted");
                return Err(JwtHttpError::MaxCallCountExceeded { attempts: attempt });
            }

            #[cfg(feature = "tracing")]
            tracing::debug!(attempt, max_attempts, url = %request.url, "refreshing tokens before replay");

            self.refresh_tokens(access_token.as_deref()).await?;
            attempt += 1;
        }
    }

    async fn current_access_token(&self) -> Result<Option<String>> {
        if !self.authorization() {
            return Ok(None);
        }
        match self.token_store.access_token().await? {
            Some(token) if !token.is_empty() => Ok(Some(token)),
            _ => Err(JwtHttpError::NoAccessToken),
        }
    }

    async fn dispatch(&self, request: &ApiRequest, access_token: Option<&str>) -> Result<Value> {
        let outgoing = {
            let common = self
                .common_headers
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let ctx = DispatchContext {
                base_url: self.base_url.as_ref(),
                common_headers: &common,
                defaults: &self.options.request,
            };
            build_request(&ctx, request, access_token)?
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(method = %outgoing.method, url = %outgoing.url, "dispatching request");

        let response = check_unauthorized(self.transport.send(outgoing).await?)?;
        let response = if self.options.strict_status {
            check_success(response)?
        } else {
            response
        };
        response.json()
    }

    /// One refresh cycle: fetch new tokens and persist them.
    ///
    /// With `coalesce_refresh`, cycles are serialized and a call whose
    /// rejected token was already replaced skips its own refresh call.
    async fn refresh_tokens(&self, rejected_token: Option<&str>) -> Result<()> {
        if !self.options.coalesce_refresh {
            return self.fetch_and_store().await;
        }

        let _guard = self.refresh_guard.lock().await;
        let current = self.token_store.access_token().await?;
        if rejected_token.is_some() && current.is_some() && current.as_deref() != rejected_token {
            #[cfg(feature = "tracing")]
            tracing::debug!("tokens already refreshed by a concurrent call");
            return Ok(());
        }
        self.fetch_and_store().await
    }

    async fn fetch_and_store(&self) -> Result<()> {
        let request = RefreshRequest {
            access_token: self.token_store.access_token().await?,
            refresh_token: self.token_store.refresh_token().await?,
            check_bearer_in_header: self.check_bearer_in_header(),
        };
        let tokens = self.refresh.fetch_tokens(request).await?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            access_token = tokens.access_token.is_some(),
            refresh_token = tokens.refresh_token.is_some(),
            "storing refreshed tokens"
        );

        self.store_tokens(&tokens).await
    }
}

/// Builder for [`JwtHttpClient`].
#[derive(Default)]
pub struct JwtHttpClientBuilder {
    options: ClientOptions,
    transport: Option<Arc<dyn Transport>>,
    token_store: Option<Arc<dyn TokenStore>>,
    refresh: Option<Arc<dyn RefreshStrategy>>,
    hooks: Hooks,
}

impl fmt::Debug for JwtHttpClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtHttpClientBuilder")
            .field("options", &self.options)
            .field("custom_transport", &self.transport.is_some())
            .field("custom_token_store", &self.token_store.is_some())
            .field("custom_refresh", &self.refresh.is_some())
            .field("hooks", &self.hooks)
            .finish()
    }
}

impl JwtHttpClientBuilder {
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Replaces the `reqwest` transport.
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Replaces the default cookie/key-value token storage.
    pub fn token_store(mut self, store: impl TokenStore + 'static) -> Self {
        self.token_store = Some(Arc::new(store));
        self
    }

    /// Replaces the default refresh-endpoint strategy.
    pub fn refresh_strategy(mut self, strategy: impl RefreshStrategy + 'static) -> Self {
        self.refresh = Some(Arc::new(strategy));
        self
    }

    /// Registers a handler run before every logical call.
    pub fn before<F>(mut self, handler: F) -> Self
    where
        F: Fn() -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.hooks.push_before(Arc::new(handler));
        self
    }

    /// Registers a handler run with the payload of every successful call.
    pub fn after<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.hooks.push_after(Arc::new(handler));
        self
    }

    pub fn build(self) -> Result<JwtHttpClient> {
        let mut options = self.options;
        options.max_refresh_attempts = options.max_refresh_attempts.max(1);

        let base_url = options
            .base_url
            .as_deref()
            .map(|url| {
                Url::parse(url).map_err(|err| {
                    JwtHttpError::InvalidRequest(format!("invalid base url '{url}': {err}"))
                })
            })
            .transpose()?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };

        let token_store = self.token_store.unwrap_or_else(|| {
            Arc::new(DefaultTokenStore::in_memory(
                options.access_token_name.clone(),
                options.refresh_token_name.clone(),
            ))
        });

        let refresh: Arc<dyn RefreshStrategy> = match self.refresh {
            Some(refresh) => refresh,
            None if options.refresh_endpoint.trim().is_empty() => {
                return Err(JwtHttpError::InvalidRequest(
                    "refresh_endpoint is empty and no refresh strategy was supplied".to_owned(),
                ))
            }
            None => Arc::new(
                EndpointRefresh::new(
                    Arc::clone(&transport),
                    options.refresh_endpoint.clone(),
                    options.access_token_name.clone(),
                    options.refresh_token_name.clone(),
                )
                .with_base_url(base_url.clone())
                .with_method(options.refresh_method)
                .with_access_token(options.send_access_token_on_refresh)
                .with_config(options.request.clone()),
            ),
        };

        Ok(JwtHttpClient {
            transport,
            token_store,
            refresh,
            base_url,
            common_headers: RwLock::new(HeaderMap::new()),
            authorization: AtomicBool::new(options.authorization),
            check_bearer_in_header: AtomicBool::new(options.check_bearer_in_header),
            hooks: self.hooks,
            refresh_guard: tokio::sync::Mutex::new(()),
            options,
        })
    }
}
