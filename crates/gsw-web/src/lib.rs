//! The moderation web console: JSON API plus static file service.

pub mod ops;
mod submission;

use std::net::SocketAddr;
use std::path::Path as FsPath;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{ConnectInfo, DefaultBodyLimit, Path, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tracing::info;

use gsw_core::audit::{AuditLog, SystemLog};
use gsw_core::clock;
use gsw_moderation::BanRegistry;
use gsw_requests::{RequestVoteEngine, VoteOutcome};

use submission::read_submission;

/// Everything the handlers reach for.
pub struct ApiState {
    pub registry: Arc<BanRegistry>,
    pub engine: Arc<RequestVoteEngine>,
    pub audit: Arc<AuditLog>,
    pub syslog: Arc<SystemLog>,
    pub ops: Vec<String>,
}

/// Build the console router: the JSON API, the upload directory, and the
/// static web root as fallback.
pub fn router(
    state: Arc<ApiState>,
    web_root: &FsPath,
    upload_dir: &FsPath,
    max_upload_bytes: usize,
) -> Router {
    Router::new()
        .route("/api/logs", get(get_logs))
        .route("/api/online", get(get_online))
        .route("/api/ops", get(get_ops))
        .route("/api/banned", get(get_banned))
        .route("/api/players", get(get_players))
        .route("/api/requests", get(get_requests).post(create_request))
        .route("/api/requests/{id}/vote", post(vote_request))
        .nest_service("/uploads", ServeDir::new(upload_dir))
        .fallback_service(ServeDir::new(web_root))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

/// Bind the console listener. Failure here is fatal for startup.
pub async fn bind(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web console at {addr}"))?;
    info!(%addr, "web console listening");
    Ok(listener)
}

/// Serve until the token is cancelled.
pub async fn serve(listener: TcpListener, app: Router, cancel: CancellationToken) -> Result<()> {
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { cancel.cancelled().await })
    .await
    .context("web console stopped with error")
}

/// Client address for vote de-duplication: proxy headers win over the
/// socket peer.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(real) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real = real.trim();
        if !real.is_empty() {
            return real.to_string();
        }
    }
    peer.ip().to_string()
}

async fn get_logs(State(state): State<Arc<ApiState>>) -> Json<Value> {
    let mut entries: Vec<(chrono::DateTime<chrono::Local>, Value)> = state
        .audit
        .snapshot()
        .into_iter()
        .map(|entry| {
            (
                entry.timestamp,
                json!({
                    "time": clock::format_stamp(entry.timestamp),
                    "kind": entry.kind,
                    "player": entry.player,
                    "content": entry.content,
                }),
            )
        })
        .collect();
    entries.extend(state.syslog.snapshot().into_iter().map(|entry| {
        (
            entry.timestamp,
            json!({
                "time": clock::format_stamp(entry.timestamp),
                "kind": "system",
                "player": "",
                "content": entry.message,
            }),
        )
    }));
    entries.sort_by_key(|(timestamp, _)| *timestamp);

    let logs: Vec<Value> = entries.into_iter().map(|(_, value)| value).collect();
    Json(json!({ "logs": logs }))
}

async fn get_online(State(state): State<Arc<ApiState>>) -> Json<Value> {
    let players: Vec<Value> = state
        .registry
        .online()
        .into_iter()
        .map(|player| json!({ "name": player.name, "client": player.client_info }))
        .collect();
    Json(json!({ "players": players }))
}

async fn get_ops(State(state): State<Arc<ApiState>>) -> Json<Value> {
    Json(json!({ "ops": state.ops }))
}

async fn get_banned(State(state): State<Arc<ApiState>>) -> Json<Value> {
    let players: Vec<Value> = state
        .registry
        .banned()
        .into_iter()
        .map(|ban| {
            json!({
                "name": ban.name,
                "reason": ban.reason,
                "ban_time": clock::format_stamp(ban.banned_at),
                "unban_time": clock::format_stamp(ban.unbans_at),
                "permanent": ban.permanent,
            })
        })
        .collect();
    Json(json!({ "players": players }))
}

async fn get_players(State(state): State<Arc<ApiState>>) -> Json<Value> {
    Json(json!({ "players": state.registry.players() }))
}

async fn get_requests(State(state): State<Arc<ApiState>>) -> Json<Value> {
    let requests: Vec<Value> = state
        .engine
        .list()
        .into_iter()
        .map(|request| {
            json!({
                "id": request.id,
                "applicant": request.applicant,
                "command": request.command,
                "reason": request.reason,
                "image": request.image,
                "created": clock::format_stamp(request.created_at),
                "executed": request.executed,
                "executed_at": request.executed_at.map(clock::format_stamp),
                "votes": request.votes(),
            })
        })
        .collect();
    Json(json!({
        "threshold": state.engine.threshold(),
        "requests": requests,
    }))
}

async fn create_request(State(state): State<Arc<ApiState>>, request: Request) -> Response {
    let submission = match read_submission(request).await {
        Ok(submission) => submission,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, &message),
    };

    if submission.applicant.is_empty()
        || submission.command.is_empty()
        || submission.reason.is_empty()
    {
        return error_response(StatusCode::BAD_REQUEST, "missing field");
    }
    if !state.registry.is_known(&submission.applicant) {
        return error_response(StatusCode::BAD_REQUEST, "unknown applicant");
    }
    if RequestVoteEngine::is_self_pardon(&submission.applicant, &submission.command)
        && submission.image.is_none()
    {
        return error_response(
            StatusCode::BAD_REQUEST,
            "a self-pardon request requires an attached image",
        );
    }

    let image = submission
        .image
        .as_ref()
        .map(|(bytes, ext)| (bytes.as_slice(), ext.as_str()));
    match state
        .engine
        .create(
            &submission.applicant,
            &submission.command,
            &submission.reason,
            image,
        )
        .await
    {
        Ok(id) => Json(json!({ "id": id })).into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "request creation failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "could not store request")
        }
    }
}

async fn vote_request(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let ip = client_ip(&headers, peer);
    match state.engine.vote(&id, &ip).await {
        VoteOutcome::Accepted => Json(json!({ "success": true })).into_response(),
        VoteOutcome::DuplicateIp => {
            vote_error(StatusCode::BAD_REQUEST, "this address has already voted")
        }
        VoteOutcome::AlreadyExecuted => {
            vote_error(StatusCode::BAD_REQUEST, "request already executed")
        }
        VoteOutcome::NotFound => vote_error(StatusCode::NOT_FOUND, "no such request"),
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn vote_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "success": false, "error": message }))).into_response()
}
