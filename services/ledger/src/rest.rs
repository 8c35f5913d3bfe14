//! REST surface over any ledger backend
//!
//! Serves the API that [`crate::http::HttpLedgerClient`] consumes. Errors are
//! returned as `{"error": CODE, "message": ...}` with a status code the
//! client maps back onto [`LedgerError`].

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use types::aggregate::Aggregate;
use types::events::UsageEvent;
use types::ids::UsageId;

use crate::client::{AggregateFilter, LedgerClient, LedgerError};

pub type SharedLedger = Arc<dyn LedgerClient>;

/// JSON error body shared by server and client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

/// Error type for the REST handlers
#[derive(Debug)]
pub enum ApiError {
    Ledger(LedgerError),
    BadRequest(String),
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        ApiError::Ledger(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Ledger(e) => match e {
                LedgerError::DuplicateKey(_) => (StatusCode::CONFLICT, "DUPLICATE_KEY"),
                LedgerError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                LedgerError::ImmutableField { .. } => (StatusCode::CONFLICT, "IMMUTABLE_FIELD"),
                LedgerError::Rejected { status, .. } => (
                    StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
                    "REJECTED",
                ),
                LedgerError::Unavailable(_) | LedgerError::Timeout { .. } => {
                    (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE")
                }
                LedgerError::InvalidResponse(_) => (StatusCode::BAD_GATEWAY, "BAD_GATEWAY"),
            },
        };

        let message = match self {
            ApiError::BadRequest(msg) => msg,
            ApiError::Ledger(e) => e.to_string(),
        };

        let body = Json(ErrorBody {
            error: code.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

pub fn router(ledger: SharedLedger) -> Router {
    Router::new()
        .route("/aggregates", get(query_aggregates).post(add_aggregate))
        .route("/aggregates/{id}", get(get_aggregate).put(update_aggregate))
        .route("/events", post(emit_event))
        .layer(TraceLayer::new_for_http())
        .with_state(ledger)
}

async fn query_aggregates(
    State(ledger): State<SharedLedger>,
    Query(filter): Query<AggregateFilter>,
) -> Result<Json<Vec<Aggregate>>, ApiError> {
    Ok(Json(ledger.query(&filter).await?))
}

async fn get_aggregate(
    State(ledger): State<SharedLedger>,
    Path(usage_id): Path<UsageId>,
) -> Result<Json<Aggregate>, ApiError> {
    Ok(Json(ledger.get(&usage_id).await?))
}

async fn add_aggregate(
    State(ledger): State<SharedLedger>,
    Json(aggregate): Json<Aggregate>,
) -> Result<StatusCode, ApiError> {
    ledger.add(aggregate).await?;
    Ok(StatusCode::CREATED)
}

async fn update_aggregate(
    State(ledger): State<SharedLedger>,
    Path(usage_id): Path<UsageId>,
    Json(aggregate): Json<Aggregate>,
) -> Result<StatusCode, ApiError> {
    if aggregate.usage_id != usage_id {
        return Err(ApiError::BadRequest(format!(
            "path id {} does not match body id {}",
            usage_id, aggregate.usage_id
        )));
    }
    ledger.update(aggregate).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn emit_event(
    State(ledger): State<SharedLedger>,
    Json(event): Json<UsageEvent>,
) -> Result<StatusCode, ApiError> {
    ledger.emit(event).await?;
    Ok(StatusCode::ACCEPTED)
}
