//! `jwt-http` is an async HTTP client that attaches JWT bearer tokens to
//! outgoing requests and recovers from expired tokens.
//!
//! When a request comes back `401 Unauthorized`, the client asks its
//! [`RefreshStrategy`] for new tokens, stores them through its [`TokenStore`]
//! and replays the original request, up to
//! [`ClientOptions::max_refresh_attempts`] times per call.
//!
//! - [`JwtHttpClient::get`], [`JwtHttpClient::post`], [`JwtHttpClient::put`],
//!   [`JwtHttpClient::delete`]
//! - [`JwtHttpClient::execute`] for full control over headers and transport
//!   policy

mod client;
mod dispatch;
mod error;
mod hooks;
mod options;
mod refresh;
mod request;
pub mod status;
mod store;
mod transport;

pub use client::{JwtHttpClient, JwtHttpClientBuilder};
pub use error::{BoxError, JwtHttpError};
pub use hooks::{AfterHandler, BeforeHandler};
pub use options::{
    ClientOptions, DEFAULT_ACCESS_TOKEN_NAME, DEFAULT_MAX_REFRESH_ATTEMPTS,
    DEFAULT_REFRESH_TOKEN_NAME,
};
pub use refresh::{
    EndpointRefresh, RefreshFn, RefreshMethod, RefreshRequest, RefreshStrategy, TokenPair,
};
pub use request::{
    ApiRequest, CachePolicy, CredentialsMode, RedirectMode, ReferrerPolicy, RequestConfig,
    RequestMode,
};
#[cfg(not(target_arch = "wasm32"))]
pub use store::FileKeyValueStore;
pub use store::{
    CookieStore, DefaultTokenStore, KeyValueStore, MemoryCookieJar, MemoryKeyValueStore,
    TokenStore,
};
pub use transport::{ReqwestTransport, Transport, TransportRequest, TransportResponse};

pub type Result<T> = std::result::Result<T, JwtHttpError>;
