//! Loopback-only HTTP surface for the gateway.

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use uuid::Uuid;

use crate::audit::AuditAction;
use crate::config::ConfigError;
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::protocol::{
    ApplyDiffRequest, ErrorBody, ExecRequest, OpenFileRequest, ServiceInfo, WriteFileRequest,
};
use crate::gateway::service::{DEFAULT_ACTOR, Gateway, RequestContext};

/// Header a caller may use to name itself in the audit log
pub const ACTOR_HEADER: &str = "x-actor";

const MAX_ACTOR_LEN: usize = 64;

/// Build the router with all endpoints
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/", get(service_info))
        .route("/health", get(health))
        .route("/open-file", post(open_file))
        .route("/write-file", post(write_file))
        .route("/apply-diff", post(apply_diff))
        .route("/exec", post(exec))
        .with_state(gateway)
}

/// Bind the configured address and serve until SIGINT or SIGTERM
pub async fn serve(gateway: Arc<Gateway>) -> GatewayResult<()> {
    let addr = gateway.settings().listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    serve_on(gateway, listener, shutdown_signal()).await
}

/// Serve on an already bound listener. Refuses anything but loopback.
pub async fn serve_on<F>(gateway: Arc<Gateway>, listener: TcpListener, shutdown: F) -> GatewayResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local = listener.local_addr()?;
    if !local.ip().is_loopback() {
        return Err(ConfigError::InvalidValue(format!(
            "refusing to serve on non-loopback address {}",
            local
        ))
        .into());
    }

    info!(addr = %local, workspace = %gateway.settings().workspace_root.display(), "gateway listening");
    axum::serve(listener, router(gateway))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("gateway stopped");
    Ok(())
}

/// Completes on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, draining connections");
}

fn request_context(headers: &HeaderMap) -> RequestContext {
    let actor = headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty() && v.len() <= MAX_ACTOR_LEN && v.chars().all(|c| c.is_ascii_graphic()))
        .unwrap_or(DEFAULT_ACTOR);
    RequestContext::new(actor)
}

fn error_response(ctx: &RequestContext, err: &GatewayError) -> Response {
    let status = StatusCode::from_u16(err.kind().http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorBody::from_error(ctx.correlation_id, err))).into_response()
}

fn respond<T: Serialize>(ctx: &RequestContext, result: GatewayResult<T>) -> Response {
    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(e) => error_response(ctx, &e),
    }
}

/// Run the request on its own task so a dropped connection cannot cancel
/// the operation or its audit record
async fn detached<F>(correlation_id: Uuid, work: F) -> Response
where
    F: Future<Output = Response> + Send + 'static,
{
    match tokio::spawn(work).await {
        Ok(response) => response,
        Err(e) => {
            error!(correlation_id = %correlation_id, error = %e, "request task failed");
            let err = GatewayError::Io(io::Error::other(format!("request task failed: {}", e)));
            let status = StatusCode::INTERNAL_SERVER_ERROR;
            (status, Json(ErrorBody::from_error(correlation_id, &err))).into_response()
        }
    }
}

/// Unwrap a JSON body or audit and report the rejection
async fn parse_body<T>(
    gateway: &Gateway,
    ctx: &RequestContext,
    action: AuditAction,
    body: Result<Json<T>, JsonRejection>,
) -> Result<T, Response> {
    match body {
        Ok(Json(req)) => Ok(req),
        Err(rejection) => {
            let err = gateway.record_rejected(ctx, action, &rejection.body_text()).await;
            Err(error_response(ctx, &err))
        }
    }
}

async fn service_info() -> Json<ServiceInfo> {
    Json(ServiceInfo::current())
}

async fn health(State(gateway): State<Arc<Gateway>>) -> Response {
    Json(gateway.health().await).into_response()
}

async fn open_file(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    body: Result<Json<OpenFileRequest>, JsonRejection>,
) -> Response {
    let ctx = request_context(&headers);
    detached(ctx.correlation_id, async move {
        match parse_body(&gateway, &ctx, AuditAction::OpenFile, body).await {
            Ok(req) => respond(&ctx, gateway.open_file(&ctx, &req).await),
            Err(response) => response,
        }
    })
    .await
}

async fn write_file(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    body: Result<Json<WriteFileRequest>, JsonRejection>,
) -> Response {
    let ctx = request_context(&headers);
    detached(ctx.correlation_id, async move {
        match parse_body(&gateway, &ctx, AuditAction::WriteFile, body).await {
            Ok(req) => respond(&ctx, gateway.write_file(&ctx, &req).await),
            Err(response) => response,
        }
    })
    .await
}

async fn apply_diff(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    body: Result<Json<ApplyDiffRequest>, JsonRejection>,
) -> Response {
    let ctx = request_context(&headers);
    detached(ctx.correlation_id, async move {
        match parse_body(&gateway, &ctx, AuditAction::ApplyDiff, body).await {
            Ok(req) => respond(&ctx, gateway.apply_diff(&ctx, &req).await),
            Err(response) => response,
        }
    })
    .await
}

async fn exec(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    body: Result<Json<ExecRequest>, JsonRejection>,
) -> Response {
    let ctx = request_context(&headers);
    detached(ctx.correlation_id, async move {
        match parse_body(&gateway, &ctx, AuditAction::Exec, body).await {
            Ok(req) => respond(&ctx, gateway.exec(&ctx, &req).await),
            Err(response) => response,
        }
    })
    .await
}
