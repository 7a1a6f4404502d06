use crate::context::AppContext;
use crate::scanner;
use crate::tools::check_tools;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use heicsync_common::{JobId, JobKind, JobState};
use heicsync_db::models::{ConversionJob, JobFilter, JobStats};
use heicsync_db::pool::get_conn;
use heicsync_db::queries::jobs;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const MAX_LIMIT: i64 = 1000;

type ApiError = (StatusCode, String);

pub fn api_routes() -> Router<AppContext> {
    Router::new()
        .route("/tasks", get(list_tasks))
        .route("/tasks/:id", get(get_task))
        .route("/stats", get(stats))
        .route("/scan-now", post(scan_now))
        .route("/tools", get(get_tools))
}

pub async fn health(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "mode": ctx.config.watch.mode,
        "watch_dirs": ctx.config.watch.dirs,
        "watcher_running": ctx.is_watching(),
        "queue_size": ctx.queue.size(),
    }))
}

/// A ledger record plus the derived timestamp comparison.
#[derive(Debug, Serialize)]
pub struct JobResponse {
    #[serde(flatten)]
    pub job: ConversionJob,
    pub timestamps_consistent: Option<bool>,
}

impl From<ConversionJob> for JobResponse {
    fn from(job: ConversionJob) -> Self {
        Self {
            timestamps_consistent: job.timestamps_consistent(),
            job,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListTasksQuery {
    task_type: Option<String>,
    status: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl ListTasksQuery {
    fn into_filter(self) -> Result<JobFilter, String> {
        let kind = self
            .task_type
            .map(|s| s.parse::<JobKind>())
            .transpose()?;
        let state = self
            .status
            .map(|s| s.parse::<JobState>())
            .transpose()?;

        let limit = self.limit.unwrap_or(100);
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(format!("limit must be between 1 and {MAX_LIMIT}"));
        }
        let offset = self.offset.unwrap_or(0);
        if offset < 0 {
            return Err("offset must not be negative".to_string());
        }

        Ok(JobFilter {
            kind,
            state,
            limit,
            offset,
        })
    }
}

async fn list_tasks(
    State(ctx): State<AppContext>,
    Query(params): Query<ListTasksQuery>,
) -> Result<Json<Vec<JobResponse>>, ApiError> {
    let filter = params
        .into_filter()
        .map_err(|e| (StatusCode::BAD_REQUEST, e))?;

    let conn = get_conn(&ctx.db).map_err(internal)?;
    let listed = jobs::list_jobs(&conn, &filter).map_err(internal)?;
    Ok(Json(listed.into_iter().map(JobResponse::from).collect()))
}

async fn get_task(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobResponse>, ApiError> {
    let conn = get_conn(&ctx.db).map_err(internal)?;
    jobs::get_job(&conn, JobId::from(id))
        .map_err(internal)?
        .map(|job| Json(JobResponse::from(job)))
        .ok_or((StatusCode::NOT_FOUND, "Task not found".to_string()))
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    #[serde(flatten)]
    stats: JobStats,
    queue_size: usize,
}

async fn stats(State(ctx): State<AppContext>) -> Result<Json<StatsResponse>, ApiError> {
    let conn = get_conn(&ctx.db).map_err(internal)?;
    let stats = jobs::get_stats(&conn).map_err(internal)?;
    Ok(Json(StatsResponse {
        stats,
        queue_size: ctx.queue.size(),
    }))
}

#[derive(Debug, Serialize)]
struct ScanResponse {
    status: &'static str,
    found: usize,
    queued: usize,
}

async fn scan_now(State(ctx): State<AppContext>) -> Result<Json<ScanResponse>, ApiError> {
    if !ctx.queue.is_accepting() {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "Service is shutting down".to_string(),
        ));
    }

    tracing::info!("Manual scan triggered via API");

    let (found, queued) = tokio::task::spawn_blocking(move || {
        let paths = scanner::scan(&ctx.config.watch.dirs);
        let queued = ctx.coordinator.submit_all(&paths, JobKind::Once);
        (paths.len(), queued)
    })
    .await
    .map_err(internal)?;

    Ok(Json(ScanResponse {
        status: "scan started",
        found,
        queued,
    }))
}

#[derive(Serialize)]
struct ToolStatusResponse {
    name: String,
    available: bool,
    version: Option<String>,
    path: Option<String>,
}

async fn get_tools(State(ctx): State<AppContext>) -> impl IntoResponse {
    let config = ctx.config.tools.clone();
    let tools = tokio::task::spawn_blocking(move || check_tools(&config))
        .await
        .unwrap_or_default();
    let response: Vec<ToolStatusResponse> = tools
        .into_iter()
        .map(|t| ToolStatusResponse {
            name: t.name,
            available: t.available,
            version: t.version,
            path: t.path.map(|p| p.display().to_string()),
        })
        .collect();
    Json(response)
}

fn internal(e: impl std::fmt::Display) -> ApiError {
    tracing::error!(error = %e, "Request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}
