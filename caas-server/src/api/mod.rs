//! REST control plane
//!
//! HTTP API over the same registry and counters the session layer
//! writes. Every endpoint except the root banner is gated by HTTP Basic
//! Auth with the configured credentials; with no credentials configured
//! the gate is bypassed. The root path doubles as the WebSocket session
//! endpoint when the request asks for an upgrade.

pub mod command;
pub mod error;
pub mod sse;

use crate::session;
use crate::state::AppState;
use axum::{
    extract::{ws::WebSocketUpgrade, FromRequestParts, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine as _;
use tower_http::trace::TraceLayer;

/// Create the main router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    let commands = Router::new()
        .route("/", get(command::list_commands).post(command::create_command))
        .route("/latest", get(command::latest_command))
        .route("/latest/log", get(command::latest_command_log))
        .route("/latest/log/sse", get(sse::latest_command_log_sse))
        .route("/{id}", get(command::get_command))
        .route("/{id}/log", get(command::get_command_log))
        .route("/{id}/log/sse", get(sse::command_log_sse))
        .route("/{id}/create", post(command::create_command_with_id))
        .route("/{id}/cancel", post(command::cancel_command))
        .layer(middleware::from_fn_with_state(state.clone(), basic_auth));

    Router::new()
        .route("/", get(root))
        .route(
            "/exec",
            post(command::exec_command)
                .layer(middleware::from_fn_with_state(state.clone(), basic_auth)),
        )
        .nest("/commands", commands)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /. The banner, or the session channel when the client upgrades.
async fn root(State(state): State<AppState>, request: Request) -> Response {
    let wants_upgrade = request
        .headers()
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    if wants_upgrade {
        let (mut parts, _body) = request.into_parts();
        return match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
            Ok(ws) => ws
                .on_upgrade(move |socket| session::handle_socket(state, socket))
                .into_response(),
            Err(rejection) => rejection.into_response(),
        };
    }

    Json(serde_json::json!({
        "title": "caas agent",
        "description": "remote command execution agent",
        "version": env!("CARGO_PKG_VERSION"),
        "state": { "command": state.counters.snapshot() },
        "running_at": state.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
    }))
    .into_response()
}

/// Basic-auth gate; bypassed when the server has no credentials.
async fn basic_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if state.config.auth_disabled() {
        return next.run(request).await;
    }

    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_basic)
        .map(|(user, pass)| state.config.authenticate(&user, &pass).is_ok())
        .unwrap_or(false);

    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic realm=\"caas\"")],
            "unauthorized",
        )
            .into_response();
    }

    next.run(request).await
}

fn parse_basic(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}
