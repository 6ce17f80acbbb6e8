//! HTTP surface: service descriptor, liveness, manual trigger, statistics.
//!
//! The trigger endpoint only enqueues; generation happens on the worker, so
//! every handler here answers quickly no matter what is running.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tracing::error;

use clusterwatch::job::JobKind;
use clusterwatch::queue::JobQueue;
use clusterwatch::store::{JobStore, ReportStore};

pub struct AppState<S> {
    pub queue: Arc<JobQueue<S>>,
    pub store: S,
    pub cluster_name: String,
}

impl<S: Clone> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            store: self.store.clone(),
            cluster_name: self.cluster_name.clone(),
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    cluster: String,
}

pub fn router<S>(state: AppState<S>) -> Router
where
    S: JobStore + ReportStore + Clone + 'static,
{
    Router::new()
        .route("/", get(root::<S>))
        .route("/health", get(health::<S>))
        .route("/report", post(trigger_report::<S>))
        .route("/reports", get(report_stats::<S>))
        .with_state(state)
}

async fn root<S: Clone>(State(state): State<AppState<S>>) -> Json<serde_json::Value> {
    Json(json!({
        "service": "clusterwatch",
        "version": env!("CARGO_PKG_VERSION"),
        "cluster": state.cluster_name,
        "endpoints": {
            "health": "/health",
            "trigger_report": "POST /report",
            "report_stats": "/reports",
        },
    }))
}

async fn health<S: Clone>(State(state): State<AppState<S>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        cluster: state.cluster_name,
    })
}

async fn trigger_report<S>(State(state): State<AppState<S>>) -> Response
where
    S: JobStore + Clone,
{
    match state.queue.enqueue(JobKind::GenerateReport, None).await {
        Ok(job_id) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "accepted",
                "message": "report generation queued",
                "job_id": i64::from(job_id),
            })),
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to enqueue report job");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "message": "failed to queue report" })),
            )
                .into_response()
        }
    }
}

async fn report_stats<S>(State(state): State<AppState<S>>) -> Response
where
    S: ReportStore + Clone,
{
    match state.store.report_stats().await {
        Ok(stats) => Json(json!({
            "cluster": state.cluster_name,
            "statistics": {
                "total_reports": stats.count,
                "total_size_bytes": stats.total_bytes,
                "latest_report_date": stats.newest,
                "oldest_report_date": stats.oldest,
            },
        }))
        .into_response(),
        Err(err) => {
            error!(error = %err, "failed to read report statistics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "message": "failed to read statistics" })),
            )
                .into_response()
        }
    }
}
