//! Per-request context threaded through the gate pipeline.
//!
//! Authentication gates write the resolved subject and token attributes here;
//! authorization gates and handlers read them. Nothing is stored globally.

use std::collections::HashMap;

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderName, HeaderValue, COOKIE, SET_COOKIE, WWW_AUTHENTICATE};
use hyper::{HeaderMap, Method, Response, StatusCode};
use serde::Serialize;
use uuid::Uuid;

use crate::types::GateError;

/// Cookie carrying the server-side session id.
pub const SESSION_COOKIE: &str = "natter_session";

/// Cookie carrying a token identifier in `cookie` transport mode.
pub const TOKEN_COOKIE: &str = "natter_token";

const COOKIE_FLAGS: &str = "Secure; HttpOnly; SameSite=Strict; Path=/";

/// Mutable per-request state.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: Uuid,
    method: Method,
    headers: HeaderMap,
    path_params: HashMap<String, String>,
    query: HashMap<String, String>,
    session_id: Option<String>,
    subject: Option<String>,
    attributes: HashMap<String, String>,
    token_expired: bool,
    response_headers: HeaderMap,
}

impl RequestContext {
    pub fn new(method: Method, headers: HeaderMap) -> Self {
        let session_id = cookie_value(&headers, SESSION_COOKIE);
        Self {
            request_id: Uuid::new_v4(),
            method,
            headers,
            path_params: HashMap::new(),
            query: HashMap::new(),
            session_id,
            subject: None,
            attributes: HashMap::new(),
            token_expired: false,
            response_headers: HeaderMap::new(),
        }
    }

    /// Attach path parameters captured by the routing layer.
    pub fn with_path_params(mut self, params: HashMap<String, String>) -> Self {
        self.path_params = params;
        self
    }

    pub fn with_path_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.insert(name.into(), value.into());
        self
    }

    /// Parse an `application/x-www-form-urlencoded` query string.
    /// Malformed query strings are treated as empty.
    pub fn with_query(mut self, query: Option<&str>) -> Self {
        self.query = query
            .and_then(|q| serde_urlencoded::from_str::<Vec<(String, String)>>(q).ok())
            .map(|pairs| pairs.into_iter().collect())
            .unwrap_or_default();
        self
    }

    // =========================================================================
    // Request accessors
    // =========================================================================

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .and_then(|v| v.to_str().ok())
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        cookie_value(&self.headers, name)
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    // =========================================================================
    // Identity
    // =========================================================================

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.subject.is_some()
    }

    pub fn set_subject(&mut self, subject: impl Into<String>) {
        self.subject = Some(subject.into());
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Record that a presented token was valid but expired.
    pub fn mark_token_expired(&mut self) {
        self.token_expired = true;
    }

    pub fn token_expired(&self) -> bool {
        self.token_expired
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Bind a new session id to this request and emit the session cookie.
    pub fn start_session(&mut self, session_id: String) {
        self.set_cookie(&format!("{SESSION_COOKIE}={session_id}; {COOKIE_FLAGS}"));
        self.session_id = Some(session_id);
    }

    /// Drop the session binding and expire the session cookie.
    pub fn end_session(&mut self) {
        if self.session_id.take().is_some() {
            self.set_cookie(&format!("{SESSION_COOKIE}=; Max-Age=0; {COOKIE_FLAGS}"));
        }
    }

    /// Emit a token cookie (cookie transport mode).
    pub fn set_token_cookie(&mut self, token_id: &str) {
        self.set_cookie(&format!("{TOKEN_COOKIE}={token_id}; {COOKIE_FLAGS}"));
    }

    pub fn clear_token_cookie(&mut self) {
        self.set_cookie(&format!("{TOKEN_COOKIE}=; Max-Age=0; {COOKIE_FLAGS}"));
    }

    fn set_cookie(&mut self, cookie: &str) {
        if let Ok(value) = HeaderValue::from_str(cookie) {
            self.response_headers.append(SET_COOKIE, value);
        }
    }

    // =========================================================================
    // Response side
    // =========================================================================

    pub fn set_response_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.response_headers.insert(name, value);
    }

    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    /// Take the accumulated response headers, leaving none behind.
    pub fn take_response_headers(&mut self) -> HeaderMap {
        std::mem::take(&mut self.response_headers)
    }
}

/// Find a cookie value in the request's `Cookie` headers.
fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, v)| *k == name && !v.is_empty())
        .map(|(_, v)| v.to_string())
}

// =============================================================================
// Rejection
// =============================================================================

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

/// Terminal outcome of a gate: the request stops here.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub message: String,
}

impl Rejection {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            message: message.into(),
        }
    }

    pub fn unauthorized(challenge: &str) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Authentication required").with_challenge(challenge)
    }

    pub fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, "Forbidden")
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// Attach a `WWW-Authenticate` challenge.
    pub fn with_challenge(mut self, challenge: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(challenge) {
            self.headers.insert(WWW_AUTHENTICATE, value);
        }
        self
    }

    pub fn challenge(&self) -> Option<&str> {
        self.headers
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
    }

    /// Render as a JSON error response.
    pub fn into_response(self) -> Response<Full<Bytes>> {
        let body = serde_json::to_string(&ErrorBody {
            error: &self.message,
        })
        .unwrap_or_else(|_| "{}".to_string());

        let mut response = Response::new(Full::new(Bytes::from(body)));
        *response.status_mut() = self.status;
        response.headers_mut().extend(self.headers);
        response.headers_mut().insert(
            hyper::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response
    }
}

impl From<GateError> for Rejection {
    fn from(err: GateError) -> Self {
        let (status, body) = err.into_status_code_and_body();
        Self::new(status, body)
    }
}
