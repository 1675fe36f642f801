//! Fetch interception
//!
//! Every request that is not one of the `/__sw` or `/__app` routes is turned
//! into a [`FetchRequest`] and answered by the worker.

use super::AppState;
use crate::worker::fetch::{is_hop_by_hop, FetchRequest, FetchResponse};
use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, Method, Response, StatusCode, Uri};
use url::Url;

/// Request bodies above this size are rejected before reaching the worker
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Fallback handler
pub async fn intercept(State(state): State<AppState>, request: Request) -> Response<Body> {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!("Failed to read request body: {}", e);
            return plain(StatusCode::BAD_REQUEST, "Failed to read request body");
        }
    };

    let origin = &state.worker.settings().origin;
    let Some(request) = to_fetch_request(origin, &parts.method, &parts.uri, &parts.headers, body)
    else {
        return plain(StatusCode::BAD_REQUEST, "Invalid request URL");
    };

    tracing::debug!(
        method = %request.method,
        url = %request.url,
        navigate = request.navigate,
        "Fetch"
    );
    into_response(state.worker.handle_fetch(request).await)
}

/// Build the worker's view of an incoming request
///
/// Origin-form targets (`/path?query`) are resolved against the origin.
/// Absolute-form targets keep their own host and are treated as cross-origin
/// unless they match it.
pub(crate) fn to_fetch_request(
    origin: &Url,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: Bytes,
) -> Option<FetchRequest> {
    let url = if uri.scheme().is_some() && uri.authority().is_some() {
        Url::parse(&uri.to_string()).ok()?
    } else {
        // set_path rather than join: "//host/x" must not escape the origin
        let mut url = origin.clone();
        url.set_path(uri.path());
        url.set_query(uri.query());
        url
    };

    let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let navigate = header_str("sec-fetch-mode") == Some("navigate")
        || (*method == Method::GET
            && header_str(header::ACCEPT.as_str()).is_some_and(|a| a.contains("text/html")));

    let headers = headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
        .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_string())))
        .collect();

    Some(FetchRequest {
        method: method.clone(),
        url,
        headers,
        body,
        navigate,
    })
}

pub(crate) fn into_response(response: FetchResponse) -> Response<Body> {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);
    for (name, value) in &response.headers {
        if !is_hop_by_hop(name) {
            builder = builder.header(name.as_str(), value.as_str());
        }
    }

    builder.body(Body::from(response.body)).unwrap_or_else(|e| {
        tracing::error!("Failed to build response: {}", e);
        plain(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal error building response",
        )
    })
}

fn plain(status: StatusCode, message: &'static str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from(message))
        .unwrap_or_else(|_| Response::new(Body::from(message)))
}
