//! HTTP dispatcher for the long-poll mount.
//!
//! One handler serves every method on the mount path and runs a decision
//! table over HTTP method and credential validity. The origin guard runs as
//! middleware strictly before this handler; a halted request never reaches
//! the decision table.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Query, Request, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::config::CheckOrigin;
use crate::server::AppState;

use super::envelope::{self, Status};
use super::ops::CreateOutcome;

/// The long-poll endpoint.
pub async fn poll(
    State(state): State<AppState>,
    method: Method,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match method {
        Method::OPTIONS => preflight(&headers),
        Method::GET => get(&state, &params).await,
        Method::POST => post(&state, &params, body).await,
        _ => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn get(state: &AppState, params: &HashMap<String, String>) -> Response {
    if let Some(claims) = verified_claims(state, params) {
        let token = params.get("token").cloned();
        return match state.transport.resume(&claims).await {
            Some(mut session) => {
                let (status, messages) = state.transport.listen(&mut session).await;
                envelope::poll(status, token, messages)
            }
            // Subscribe-ack never came; the client starts over token-less.
            None => envelope::poll(Status::Gone, None, Vec::new()),
        };
    }

    match state.transport.create(params).await {
        CreateOutcome::Created { token } => envelope::poll(Status::Gone, Some(token), Vec::new()),
        CreateOutcome::Forbidden => envelope::poll(Status::Forbidden, None, Vec::new()),
    }
}

async fn post(state: &AppState, params: &HashMap<String, String>, body: Bytes) -> Response {
    let Some(claims) = verified_claims(state, params) else {
        return envelope::status_only(Status::Gone);
    };
    let Ok(body) = String::from_utf8(body.to_vec()) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    match state.transport.resume(&claims).await {
        Some(mut session) => {
            let status = state.transport.publish(&mut session, body).await;
            envelope::status_only(status)
        }
        None => envelope::status_only(Status::Gone),
    }
}

fn verified_claims(
    state: &AppState,
    params: &HashMap<String, String>,
) -> Option<crate::token::Claims> {
    let token = params.get("token")?;
    match state.transport.verify(token) {
        Ok(claims) => Some(claims),
        Err(error) => {
            debug!(%error, "presented credential rejected");
            None
        }
    }
}

fn preflight(headers: &HeaderMap) -> Response {
    let mut response = StatusCode::OK.into_response();
    let out = response.headers_mut();

    out.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    out.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    out.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static("3600"),
    );
    if let Some(requested) = headers.get(header::ACCESS_CONTROL_REQUEST_HEADERS) {
        out.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
    }

    response
}

/// Origin guard, mounted as middleware ahead of the dispatcher.
pub async fn origin_guard(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if origin_allowed(&state.check_origin, request.headers()) {
        next.run(request).await
    } else {
        debug!("request halted by origin check");
        StatusCode::FORBIDDEN.into_response()
    }
}

fn origin_allowed(policy: &CheckOrigin, headers: &HeaderMap) -> bool {
    // No Origin header means the request is not cross-origin (curl, native
    // clients, same-origin fetches); only a mismatched origin is rejected.
    let Some(origin) = headers.get(header::ORIGIN).and_then(|o| o.to_str().ok()) else {
        return true;
    };

    match policy {
        CheckOrigin::Enabled(false) => true,
        CheckOrigin::Enabled(true) => match origin_host(origin) {
            Some(origin_host) => headers
                .get(header::HOST)
                .and_then(|h| h.to_str().ok())
                // Host may carry a port the origin omits.
                .map(|host| host == origin_host || host.split(':').next() == Some(origin_host))
                .unwrap_or(false),
            None => false,
        },
        CheckOrigin::Allow(allowed) => allowed.iter().any(|a| a == "*" || a == origin),
    }
}

fn origin_host(origin: &str) -> Option<&str> {
    let rest = origin.split("://").nth(1)?;
    Some(rest.split('/').next().unwrap_or(rest))
}
