//! 管理面 HTTP 接口。
//!
//! | 方法 | 路径 | 语义 |
//! |---|---|---|
//! | GET | `/admin/status` | 运行状态、组件标识、设置与配置快照 |
//! | POST | `/admin/start` | 启动引擎（幂等） |
//! | POST | `/admin/stop` | 停止引擎（幂等，超时以 `ok: false` 告警） |
//! | POST | `/admin/reconfigure` | `{ "config": {...}, "persist": bool }` |
//! | POST | `/admin/shutdown` | 停止引擎并结束进程 |
//! | GET | `/health` | 存活探针 |
//! | GET | `/metrics` | Prometheus 文本格式的引擎指标 |
//!
//! 管理操作都会阻塞（等待工作线程退出等），因此在 `spawn_blocking` 中调用 [`Manager`]。

use std::{io, sync::Arc};

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::{
    config::ConfigError,
    error::{EngineError, FieldViolation},
    manager::{CommandReply, Manager, ManagerError},
    telemetry,
};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// 错误响应体；`violations` 仅在配置校验失败时出现。
#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
    ok: bool,
    code: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    violations: Vec<FieldViolation>,
}

#[derive(Debug, Deserialize)]
struct ReconfigureRequest {
    #[serde(default)]
    config: Value,
    #[serde(default)]
    persist: bool,
}

/// 构造管理面路由。
pub fn router(manager: Arc<Manager>) -> Router {
    Router::new()
        .route("/admin/status", get(status))
        .route("/admin/start", post(start))
        .route("/admin/stop", post(stop))
        .route("/admin/reconfigure", post(reconfigure))
        .route("/admin/shutdown", post(shutdown))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(manager)
}

/// 在 `listener` 上提供管理面，直到 `shutdown` 被调用后优雅退出。
pub async fn serve(listener: TcpListener, manager: Arc<Manager>) -> io::Result<()> {
    let signal = manager.shutdown_signal();
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "admin interface listening");
    }
    axum::serve(listener, router(manager).into_make_service())
        .with_graceful_shutdown(signal.wait())
        .await
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn metrics() -> Response {
    match telemetry::render() {
        Some(body) => ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "prometheus metrics not available (recorder not installed)",
        )
            .into_response(),
    }
}

async fn status(State(manager): State<Arc<Manager>>) -> Response {
    match tokio::task::spawn_blocking(move || manager.status()).await {
        Ok(report) => Json(report).into_response(),
        Err(err) => join_failure(err),
    }
}

async fn start(State(manager): State<Arc<Manager>>) -> Response {
    run_command(manager, "start", Manager::start).await
}

async fn stop(State(manager): State<Arc<Manager>>) -> Response {
    run_command(manager, "stop", Manager::stop).await
}

async fn shutdown(State(manager): State<Arc<Manager>>) -> Response {
    run_command(manager, "shutdown", Manager::shutdown).await
}

async fn reconfigure(
    State(manager): State<Arc<Manager>>,
    Json(request): Json<ReconfigureRequest>,
) -> Response {
    run_command(manager, "reconfigure", move |manager| {
        manager.reconfigure(&request.config, request.persist)
    })
    .await
}

async fn run_command<F>(manager: Arc<Manager>, command: &'static str, op: F) -> Response
where
    F: FnOnce(&Manager) -> Result<CommandReply, ManagerError> + Send + 'static,
{
    match tokio::task::spawn_blocking(move || op(&manager)).await {
        Ok(Ok(reply)) => {
            let status = StatusCode::OK;
            (status, Json(reply)).into_response()
        }
        Ok(Err(err)) => command_failure(command, err),
        Err(err) => join_failure(err),
    }
}

fn command_failure(command: &'static str, err: ManagerError) -> Response {
    let code = err.code();
    let status = match &err {
        ManagerError::Engine(EngineError::StopTimedOut { .. }) => {
            return (StatusCode::OK, Json(CommandReply::warning(err.to_string()))).into_response();
        }
        ManagerError::Engine(EngineError::AlreadyStarted) | ManagerError::ShutDown => {
            StatusCode::CONFLICT
        }
        ManagerError::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ManagerError::Config(ConfigError::Validation(_) | ConfigError::Rejected(_)) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ManagerError::Config(ConfigError::NoOrigin) => StatusCode::BAD_REQUEST,
        ManagerError::Config(ConfigError::File(_)) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let violations = match &err {
        ManagerError::Config(config) => config.violations().to_vec(),
        _ => Vec::new(),
    };
    let body = ErrorBody {
        message: format!("{command}: error - {err}"),
        ok: false,
        code,
        violations,
    };
    (status, Json(body)).into_response()
}

fn join_failure(err: tokio::task::JoinError) -> Response {
    error!(error = %err, "admin command task failed");
    let body = ErrorBody {
        message: format!("internal error: {err}"),
        ok: false,
        code: "runner.admin.internal",
        violations: Vec::new(),
    };
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}
