//! Simple REST API server example for the borrowing ledger.
//!
//! Run with: `cargo run --example server`
//!
//! ## Endpoints
//!
//! - `POST /copies` - Register a copy
//! - `GET /copies/{id}` - Get a copy
//! - `POST /copies/{id}/lost` - Mark a copy lost
//! - `POST /copies/{id}/found` - Put a lost copy back on the shelf
//! - `GET /copies/{id}/loans` - Loan history of a copy
//! - `POST /loans` - Borrow a copy
//! - `GET /loans/{id}?as_of=YYYY-MM-DD` - Get a loan
//! - `POST /loans/{id}/return` - Return a copy
//! - `GET /loans/active` - Open loans
//! - `GET /loans/overdue?as_of=YYYY-MM-DD` - Overdue loans
//! - `GET /users/{id}/loans` - Loan history of a user
//!
//! ## Example Usage
//!
//! ```bash
//! # Register a copy
//! curl -X POST http://localhost:3000/copies \
//!   -H "Content-Type: application/json" \
//!   -d '{"copy_id": 1, "title_id": 10}'
//!
//! # Borrow it
//! curl -X POST http://localhost:3000/loans \
//!   -H "Content-Type: application/json" \
//!   -d '{"user_id": 1, "copy_id": 1, "borrowed_at": "2025-01-01"}'
//!
//! # Overdue loans
//! curl "http://localhost:3000/loans/overdue?as_of=2025-01-20"
//!
//! # Return it
//! curl -X POST http://localhost:3000/loans/1/return \
//!   -H "Content-Type: application/json" \
//!   -d '{"returned_at": "2025-01-20"}'
//! ```

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use borrow_ledger_rs::{
    CopyId, Engine, ErrorResponse, LedgerConfig, LedgerError, LedgerRequest, LedgerResponse,
    RecordId, TitleId, UserId,
};
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

// === Request DTOs ===

#[derive(Debug, Deserialize)]
pub struct RegisterCopyBody {
    pub copy_id: u64,
    pub title_id: u64,
}

#[derive(Debug, Deserialize)]
pub struct BorrowBody {
    pub user_id: u64,
    pub copy_id: u64,
    pub borrowed_at: NaiveDate,
    pub loan_period_days: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ReturnBody {
    pub returned_at: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct AsOfParams {
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct OverdueParams {
    pub as_of: NaiveDate,
}

// === Application State ===

/// Shared application state containing the ledger engine.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

// === Error Handling ===

/// Wrapper for converting `LedgerError` into HTTP responses.
pub struct AppError(LedgerError);

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorResponse::from(&self.0);
        let status =
            StatusCode::from_u16(body.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, Json(body)).into_response()
    }
}

/// Runs a request on a blocking thread; the engine may wait on a copy lock.
async fn dispatch(
    state: AppState,
    request: LedgerRequest,
) -> Result<(StatusCode, Json<LedgerResponse>), AppError> {
    let status = StatusCode::from_u16(request.success_code()).unwrap_or(StatusCode::OK);
    let response = tokio::task::spawn_blocking(move || state.engine.handle(request))
        .await
        .map_err(|_| AppError(LedgerError::StoreUnavailable))??;
    Ok((status, Json(response)))
}

// === Handlers ===

async fn register_copy(
    State(state): State<AppState>,
    Json(body): Json<RegisterCopyBody>,
) -> Result<(StatusCode, Json<LedgerResponse>), AppError> {
    let request = LedgerRequest::RegisterCopy {
        copy_id: CopyId(body.copy_id),
        title_id: TitleId(body.title_id),
    };
    dispatch(state, request).await
}

async fn get_copy(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<(StatusCode, Json<LedgerResponse>), AppError> {
    dispatch(state, LedgerRequest::GetCopy { copy_id: CopyId(id) }).await
}

async fn mark_lost(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<(StatusCode, Json<LedgerResponse>), AppError> {
    dispatch(state, LedgerRequest::MarkLost { copy_id: CopyId(id) }).await
}

async fn mark_found(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<(StatusCode, Json<LedgerResponse>), AppError> {
    dispatch(state, LedgerRequest::MarkFound { copy_id: CopyId(id) }).await
}

async fn copy_history(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(params): Query<AsOfParams>,
) -> Result<(StatusCode, Json<LedgerResponse>), AppError> {
    let request = LedgerRequest::CopyHistory {
        copy_id: CopyId(id),
        as_of: params.as_of,
    };
    dispatch(state, request).await
}

async fn borrow(
    State(state): State<AppState>,
    Json(body): Json<BorrowBody>,
) -> Result<(StatusCode, Json<LedgerResponse>), AppError> {
    let request = LedgerRequest::Borrow {
        user_id: UserId(body.user_id),
        copy_id: CopyId(body.copy_id),
        borrowed_at: body.borrowed_at,
        loan_period_days: body.loan_period_days,
    };
    dispatch(state, request).await
}

async fn get_loan(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(params): Query<AsOfParams>,
) -> Result<(StatusCode, Json<LedgerResponse>), AppError> {
    let request = LedgerRequest::GetRecord {
        record_id: RecordId(id),
        as_of: params.as_of,
    };
    dispatch(state, request).await
}

async fn return_loan(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(body): Json<ReturnBody>,
) -> Result<(StatusCode, Json<LedgerResponse>), AppError> {
    let request = LedgerRequest::Return {
        record_id: RecordId(id),
        returned_at: body.returned_at,
    };
    dispatch(state, request).await
}

async fn active_loans(
    State(state): State<AppState>,
    Query(params): Query<AsOfParams>,
) -> Result<(StatusCode, Json<LedgerResponse>), AppError> {
    dispatch(state, LedgerRequest::ActiveLoans { as_of: params.as_of }).await
}

async fn overdue_loans(
    State(state): State<AppState>,
    Query(params): Query<OverdueParams>,
) -> Result<(StatusCode, Json<LedgerResponse>), AppError> {
    dispatch(state, LedgerRequest::OverdueLoans { as_of: params.as_of }).await
}

async fn user_history(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(params): Query<AsOfParams>,
) -> Result<(StatusCode, Json<LedgerResponse>), AppError> {
    let request = LedgerRequest::UserHistory {
        user_id: UserId(id),
        as_of: params.as_of,
    };
    dispatch(state, request).await
}

// === Router ===

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/copies", post(register_copy))
        .route("/copies/{id}", get(get_copy))
        .route("/copies/{id}/lost", post(mark_lost))
        .route("/copies/{id}/found", post(mark_found))
        .route("/copies/{id}/loans", get(copy_history))
        .route("/loans", post(borrow))
        .route("/loans/active", get(active_loans))
        .route("/loans/overdue", get(overdue_loans))
        .route("/loans/{id}", get(get_loan))
        .route("/loans/{id}/return", post(return_loan))
        .route("/users/{id}/loans", get(user_history))
        .with_state(state)
}

// === Main ===

#[tokio::main]
async fn main() {
    let config = LedgerConfig::load(None).expect("Failed to load configuration");

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let state = AppState {
        engine: Arc::new(Engine::from_config(&config)),
    };

    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:3000").await.unwrap();
    tracing::info!("Borrow ledger API server running on http://127.0.0.1:3000");

    axum::serve(listener, app).await.unwrap();
}
