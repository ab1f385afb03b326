//! Transfer job API handlers
//!
//! POST /transfer/start, GET /transfer/status/:job_id,
//! POST /transfer/cancel/:job_id, GET /transfer/jobs

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    models::{JobStatus, TransferError, TransferFilters, TransferJob, TransferProgress},
    AppState,
};

/// Date and state filters of a start request
#[derive(Debug, Deserialize)]
pub struct FilterOptions {
    #[serde(default = "default_only_not_transferred")]
    pub only_not_transferred: bool,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            only_not_transferred: true,
            start_date: None,
            end_date: None,
        }
    }
}

fn default_only_not_transferred() -> bool {
    true
}

/// POST /transfer/start request
#[derive(Debug, Default, Deserialize)]
pub struct StartTransferRequest {
    /// Caller-chosen job id, generated when absent
    #[serde(default)]
    pub job_id: Option<Uuid>,
    /// Restrict the job to these records
    #[serde(default)]
    pub record_ids: Option<Vec<String>>,
    #[serde(default)]
    pub filters: FilterOptions,
}

impl StartTransferRequest {
    fn into_filters(self) -> ApiResult<(Option<Uuid>, TransferFilters)> {
        if let (Some(start), Some(end)) = (self.filters.start_date, self.filters.end_date) {
            if start > end {
                return Err(ApiError::BadRequest(format!(
                    "start_date {} is after end_date {}",
                    start, end
                )));
            }
        }

        Ok((
            self.job_id,
            TransferFilters {
                record_ids: self.record_ids,
                only_not_transferred: self.filters.only_not_transferred,
                start_date: self.filters.start_date,
                end_date: self.filters.end_date,
            },
        ))
    }
}

/// POST /transfer/start response
#[derive(Debug, Serialize)]
pub struct StartTransferResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub total: usize,
}

/// Job snapshot as shown to the dashboard
#[derive(Debug, Serialize)]
pub struct TransferStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: TransferProgress,
    pub percentage: f64,
    pub current_label: Option<String>,
    pub errors: Vec<TransferError>,
    pub fatal_error: Option<String>,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub elapsed_seconds: u64,
}

impl From<TransferJob> for TransferStatusResponse {
    fn from(job: TransferJob) -> Self {
        Self {
            percentage: job.progress.percentage(),
            current_label: job.progress.current_label.clone(),
            elapsed_seconds: job.elapsed_seconds(),
            job_id: job.job_id,
            status: job.status,
            progress: job.progress,
            errors: job.errors,
            fatal_error: job.fatal_error,
            cancel_requested: job.cancel_requested,
            created_at: job.created_at,
            started_at: job.started_at,
            ended_at: job.ended_at,
        }
    }
}

/// GET /transfer/jobs response
#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<TransferStatusResponse>,
}

/// POST /transfer/start
///
/// Selects records and starts the job in the background. Returns 202
/// Accepted with the job id.
pub async fn start_transfer(
    State(state): State<AppState>,
    Json(request): Json<StartTransferRequest>,
) -> ApiResult<(StatusCode, Json<StartTransferResponse>)> {
    let (job_id, filters) = request.into_filters()?;

    let started = match state.transfers.start_job(job_id, filters).await {
        Ok(started) => started,
        Err(e) => {
            let err = ApiError::from(e);
            state.note_error(&err).await;
            return Err(err);
        }
    };

    tracing::info!(job_id = %started.job_id, total = started.total, "Transfer start accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(StartTransferResponse {
            job_id: started.job_id,
            status: JobStatus::Pending,
            total: started.total,
        }),
    ))
}

/// GET /transfer/status/:job_id
pub async fn get_transfer_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<TransferStatusResponse>> {
    let job = state
        .transfers
        .status(job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Transfer job not found: {}", job_id)))?;

    tracing::debug!(job_id = %job_id, status = %job.status, "Status query");

    Ok(Json(job.into()))
}

/// POST /transfer/cancel/:job_id
///
/// Best effort: the record in flight finishes before the job stops.
pub async fn cancel_transfer(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<TransferStatusResponse>> {
    let job = state.transfers.cancel(job_id).await?;
    Ok(Json(job.into()))
}

/// GET /transfer/jobs
pub async fn list_transfers(State(state): State<AppState>) -> Json<JobListResponse> {
    let jobs = state
        .transfers
        .list_jobs()
        .await
        .into_iter()
        .map(TransferStatusResponse::from)
        .collect();

    Json(JobListResponse { jobs })
}

/// Build transfer routes
pub fn transfer_routes() -> Router<AppState> {
    Router::new()
        .route("/transfer/start", post(start_transfer))
        .route("/transfer/status/:job_id", get(get_transfer_status))
        .route("/transfer/cancel/:job_id", post(cancel_transfer))
        .route("/transfer/jobs", get(list_transfers))
}
