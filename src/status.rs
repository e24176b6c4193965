//! Response status classification.

use reqwest::StatusCode;
use serde_json::Value;

use crate::{JwtHttpError, Result, TransportResponse};

/// Fails with [`JwtHttpError::Unauthorized`] on 401, otherwise passes the
/// response through unchanged.
pub fn check_unauthorized(response: TransportResponse) -> Result<TransportResponse> {
    if response.status() == StatusCode::UNAUTHORIZED {
        #[cfg(feature = "tracing")]
        tracing::debug!("response status 401, access token rejected");
        return Err(JwtHttpError::Unauthorized);
    }
    Ok(response)
}

/// Fails with [`JwtHttpError::NotFound`] on 404.
pub fn check_not_found(response: TransportResponse, url: &str) -> Result<TransportResponse> {
    if response.status() == StatusCode::NOT_FOUND {
        return Err(JwtHttpError::NotFound {
            url: url.to_owned(),
        });
    }
    Ok(response)
}

/// Fails with [`JwtHttpError::Http`] unless the status is in `[200, 300)`.
pub fn check_success(response: TransportResponse) -> Result<TransportResponse> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(JwtHttpError::Http {
        status: status.as_u16(),
        message: error_message(&response),
    })
}

/// Best-effort message from an error body.
///
/// Looks at `message`, `error`, `detail` and `error_description` in a JSON
/// object body, then falls back to the raw text or the status reason.
pub fn error_message(response: &TransportResponse) -> String {
    let body = response.text().trim();
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        for key in ["message", "error", "detail", "error_description"] {
            match map.get(key) {
                Some(Value::String(text)) if !text.is_empty() => return text.clone(),
                Some(Value::Object(inner)) => {
                    if let Some(Value::String(text)) = inner.get("message") {
                        return text.clone();
                    }
                }
                _ => {}
            }
        }
    }
    if !body.is_empty() {
        return body.to_owned();
    }
    response
        .status()
        .canonical_reason()
        .unwrap_or("unknown status")
        .to_owned()
}
