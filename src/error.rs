/// Boxed error used by caller-supplied strategies and hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum JwtHttpError {
    /// Network or request execution error from `reqwest`.
    #[error("transport error: {0}")]
    Transport(reqwest::Error),
    /// The server answered `401 Unauthorized`.
    ///
    /// Intercepted by the client to trigger a token refresh; it only reaches
    /// the caller when a custom refresh strategy returns it.
    #[error("request unauthorized (401)")]
    Unauthorized,
    /// The server answered `404 Not Found`.
    #[error("resource not found (404): {url}")]
    NotFound { url: String },
    /// Authorization is enabled but the token store holds no access token.
    #[error("no access token available")]
    NoAccessToken,
    /// Every allowed refresh/replay cycle was used and the server still
    /// answered 401.
    #[error("maximum refresh attempts exceeded after {attempts} refresh cycles")]
    MaxCallCountExceeded { attempts: usize },
    /// Non-success HTTP status with a best-effort message from the body.
    #[error("http error {status}: {message}")]
    Http { status: u16, message: String },
    /// Response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
    /// URL or request data could not be turned into a request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// A token store failed to read or persist a value.
    #[error("storage error: {0}")]
    Storage(String),
    /// A before/after handler failed.
    #[error("handler error: {0}")]
    Hook(BoxError),
    /// A caller-supplied refresh strategy failed.
    #[error("token refresh failed: {0}")]
    Refresh(BoxError),
}

impl JwtHttpError {
    /// Stable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "TransportError",
            Self::Unauthorized => "Error401",
            Self::NotFound { .. } => "Error404",
            Self::NoAccessToken => "NoAccessToken",
            Self::MaxCallCountExceeded { .. } => "MaxCallCountExceeded",
            Self::Http { .. } => "HttpStatusError",
            Self::Decode(_) => "DecodeError",
            Self::InvalidRequest(_) => "InvalidRequest",
            Self::Storage(_) => "StorageError",
            Self::Hook(_) => "HandlerError",
            Self::Refresh(_) => "RefreshError",
        }
    }

    /// Returns `true` for the authorization failure that triggers a refresh.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized => Some(401),
            Self::NotFound { .. } => Some(404),
            Self::Http { status, .. } => Some(*status),
            Self::Transport(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::JwtHttpError;

    #[test]
    fn kinds_are_distinct_names() {
        assert_eq!(JwtHttpError::Unauthorized.kind(), "Error401");
        assert_eq!(
            JwtHttpError::NotFound {
                url: "http://h/x".to_owned()
            }
            .kind(),
            "Error404"
        );
        assert_eq!(JwtHttpError::NoAccessToken.kind(), "NoAccessToken");
        assert_eq!(
            JwtHttpError::MaxCallCountExceeded { attempts: 2 }.kind(),
            "MaxCallCountExceeded"
        );
    }

    #[test]
    fn status_is_exposed_for_http_errors() {
        let err = JwtHttpError::Http {
            status: 503,
            message: "down".to_owned(),
        };
        assert_eq!(err.status(), Some(503));
        assert_eq!(err.to_string(), "http error 503: down");
        assert_eq!(JwtHttpError::NoAccessToken.status(), None);
    }
}
