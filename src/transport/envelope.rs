//! JSON response envelopes.
//!
//! Every transport response is one of two JSON shapes: a bare status, or a
//! status with the credential and a message list. Messages are the sessions'
//! own pre-serialized frames and pass through as raw JSON, never re-encoded.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::value::RawValue;

/// Protocol-level outcome of a transport operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    /// Window elapsed with nothing buffered. Carried in the body because an
    /// HTTP 204 cannot carry the envelope the client parses.
    NoContent,
    Unauthorized,
    Forbidden,
    RequestTimeout,
    Gone,
}

impl Status {
    /// The code the envelope body carries.
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::NoContent => 204,
            Status::Unauthorized => 401,
            Status::Forbidden => 403,
            Status::RequestTimeout => 408,
            Status::Gone => 410,
        }
    }

    /// The HTTP status line. Mirrors the body code except for no-content.
    pub fn http(self) -> StatusCode {
        match self {
            Status::Ok | Status::NoContent => StatusCode::OK,
            Status::Unauthorized => StatusCode::UNAUTHORIZED,
            Status::Forbidden => StatusCode::FORBIDDEN,
            Status::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
            Status::Gone => StatusCode::GONE,
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusEnvelope {
    status: u16,
}

#[derive(Debug, Serialize)]
struct PollEnvelope {
    status: u16,
    token: Option<String>,
    messages: Vec<Box<RawValue>>,
}

/// Render the bare `{status}` shape.
pub fn status_only(status: Status) -> Response {
    with_transport_headers(status.http(), Json(StatusEnvelope { status: status.code() }))
}

/// Render the `{status, token, messages}` shape.
///
/// Frames that are not valid JSON are dropped rather than corrupting the
/// array; sessions only ever buffer encoded frames, so this does not happen
/// in practice.
pub fn poll(status: Status, token: Option<String>, messages: Vec<String>) -> Response {
    let messages = messages
        .into_iter()
        .filter_map(|frame| RawValue::from_string(frame).ok())
        .collect();

    with_transport_headers(
        status.http(),
        Json(PollEnvelope {
            status: status.code(),
            token,
            messages,
        }),
    )
}

fn with_transport_headers(code: StatusCode, body: impl IntoResponse) -> Response {
    let mut response = (code, body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json; charset=utf-8"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}
