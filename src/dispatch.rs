//! Turns an [`ApiRequest`] into a [`TransportRequest`].

use reqwest::{
    header::{self, HeaderMap, HeaderValue},
    Method, Url,
};
use serde_json::Value;

use crate::{ApiRequest, JwtHttpError, RequestConfig, Result, TransportRequest};

/// Client-wide inputs to request construction.
pub(crate) struct DispatchContext<'a> {
    pub base_url: Option<&'a Url>,
    pub common_headers: &'a HeaderMap,
    pub defaults: &'a RequestConfig,
}

/// Builds the outgoing request.
///
/// Headers are layered lowest to highest: common headers, the JSON
/// content-type default, caller headers, then `Authorization` when an access
/// token is given. GET and HEAD carry `data` in the query string; every other
/// method sends non-null `data` as a JSON body.
pub(crate) fn build_request(
    ctx: &DispatchContext<'_>,
    request: &ApiRequest,
    access_token: Option<&str>,
) -> Result<TransportRequest> {
    let mut url = resolve_url(ctx.base_url, &request.url)?;

    let mut headers = ctx.common_headers.clone();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    merge_headers(&mut headers, &request.headers);
    if let Some(token) = access_token {
        headers.insert(header::AUTHORIZATION, bearer_header_value(token)?);
    }

    let body = if request.method == Method::GET || request.method == Method::HEAD {
        append_query(&mut url, &request.data)?;
        None
    } else if request.data.is_null() {
        None
    } else {
        let body = serde_json::to_string(&request.data).map_err(|err| {
            JwtHttpError::InvalidRequest(format!("request data is not JSON: {err}"))
        })?;
        Some(body)
    };

    Ok(TransportRequest {
        method: request.method.clone(),
        url,
        headers,
        body,
        config: request.config.or_defaults(ctx.defaults),
    })
}

/// Resolves `url` against the optional base. Absolute URLs ignore the base.
///
/// Relative paths always extend the base path, with or without a leading
/// `/`: base `https://h/v1` and `/orders` give `https://h/v1/orders`.
pub(crate) fn resolve_url(base: Option<&Url>, url: &str) -> Result<Url> {
    let invalid = |err: &dyn std::fmt::Display| {
        JwtHttpError::InvalidRequest(format!("invalid url '{url}': {err}"))
    };
    let Some(base) = base else {
        return Url::parse(url).map_err(|err| invalid(&err));
    };
    if let Ok(absolute) = Url::parse(url) {
        return Ok(absolute);
    }
    if url.starts_with("//") {
        return base.join(url).map_err(|err| invalid(&err));
    }

    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(url.strip_prefix('/').unwrap_or(url))
        .map_err(|err| invalid(&err))
}

/// Appends the members of a JSON object to the query string, in insertion order.
pub(crate) fn append_query(url: &mut Url, data: &Value) -> Result<()> {
    match data {
        Value::Null => Ok(()),
        Value::Object(map) if map.is_empty() => Ok(()),
        Value::Object(map) => {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in map {
                pairs.append_pair(key, &query_value(value));
            }
            Ok(())
        }
        other => Err(JwtHttpError::InvalidRequest(format!(
            "query data must be a JSON object, got {other}"
        ))),
    }
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Overlays `upper` onto `base`; every name present in `upper` replaces all
/// of its values in `base`.
pub(crate) fn merge_headers(base: &mut HeaderMap, upper: &HeaderMap) {
    for name in upper.keys() {
        base.remove(name);
        for value in upper.get_all(name) {
            base.append(name.clone(), value.clone());
        }
    }
}

fn bearer_header_value(token: &str) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(&normalize_bearer_authorization(token))
        .map_err(|_| JwtHttpError::InvalidRequest("access token is not a valid header value".to_owned()))?;
    value.set_sensitive(true);
    Ok(value)
}

fn normalize_bearer_authorization(token: &str) -> String {
    let trimmed = token.trim();
    let prefix = trimmed.get(..7);
    if prefix.is_some_and(|value| value.eq_ignore_ascii_case("bearer ")) {
        trimmed.to_owned()
    } else {
        format!("Bearer {trimmed}")
    }
}
