//! JSON HTTP API over the vital-sign store.
//!
//! # Routes
//!
//! - `GET /`: service status and record count
//! - `POST /api/vitals`: record one reading
//! - `GET /api/vitals/{patient_id}?start=&end=`: a patient's readings in a
//!   time window (defaults: from the epoch until now)
//!
//! The store is blocking and single-writer, so every call takes the store
//! mutex on the blocking thread pool.
//!
//! Every response carries permissive CORS headers. A preflight `OPTIONS`
//! request on any path is answered with `204 No Content`.

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    Json, Router,
    extract::{
        Path, Query, Request, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{
        HeaderValue, Method, StatusCode,
        header::{
            ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
            ACCESS_CONTROL_ALLOW_ORIGIN,
        },
    },
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::storage::{BTreeError, VitalRecord, VitalStore};

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    store: Arc<Mutex<VitalStore>>,
}

impl AppState {
    #[must_use]
    pub fn new(store: VitalStore) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
        }
    }

    /// Flush the store to disk.
    pub async fn sync(&self) -> Result<(), ApiError> {
        self.with_store(|store| store.sync()).await
    }

    /// Run `f` against the store on the blocking pool.
    async fn with_store<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&mut VitalStore) -> Result<T, BTreeError> + Send + 'static,
    {
        #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            let mut store = store
                .lock()
                .map_err(|_| ApiError::Internal("store lock poisoned".to_string()))?;
            f(&mut store).map_err(ApiError::Store)
        })
        .await
        .map_err(|e| ApiError::Internal(format!("store task failed: {e}")))?
    }
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/api/vitals", post(record_vitals))
        .route("/api/vitals/{patient_id}", get(patient_vitals))
        .with_state(state)
        .layer(middleware::from_fn(cors))
}

/// Answer preflight requests and add CORS headers to every response.
async fn cors(request: Request, next: Next) -> Response {
    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    response
}

#[derive(Debug, Serialize)]
struct StatusBody {
    status: &'static str,
    message: &'static str,
    version: &'static str,
    records: u64,
}

#[derive(Debug, Serialize)]
struct MessageBody {
    status: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct ReadingsBody {
    status: &'static str,
    count: usize,
    readings: Vec<VitalRecord>,
}

/// Query string for the readings endpoint. Both bounds are Unix seconds.
#[derive(Debug, Deserialize)]
struct TimeWindow {
    start: Option<i64>,
    end: Option<i64>,
}

async fn status(State(state): State<AppState>) -> Result<Json<StatusBody>, ApiError> {
    let records = state.with_store(|store| Ok(store.record_count())).await?;
    Ok(Json(StatusBody {
        status: "online",
        message: "ICU vitals API",
        version: env!("CARGO_PKG_VERSION"),
        records,
    }))
}

async fn record_vitals(
    State(state): State<AppState>,
    body: Result<Json<VitalRecord>, JsonRejection>,
) -> Result<Json<MessageBody>, ApiError> {
    let Json(record) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    state
        .with_store(move |store| store.insert(record.timestamp, &record))
        .await?;
    tracing::debug!(
        "recorded vitals for patient {} at {}",
        record.patient_id,
        record.timestamp
    );

    Ok(Json(MessageBody {
        status: "success",
        message: "Vitals recorded".to_string(),
    }))
}

async fn patient_vitals(
    State(state): State<AppState>,
    patient_id: Result<Path<i32>, PathRejection>,
    window: Result<Query<TimeWindow>, QueryRejection>,
) -> Result<Json<ReadingsBody>, ApiError> {
    let Path(patient_id) = patient_id.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let Query(window) = window.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let start = window.start.unwrap_or(0);
    let end = window.end.unwrap_or_else(unix_now);

    let readings = state
        .with_store(move |store| store.readings_for_patient(patient_id, start, end))
        .await?;

    Ok(Json(ReadingsBody {
        status: "success",
        count: readings.len(),
        readings,
    }))
}

/// Current time in Unix seconds.
fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

/// Errors returned by handlers.
#[derive(Debug)]
pub enum ApiError {
    /// The request could not be parsed.
    BadRequest(String),
    /// The store rejected the operation.
    Store(BTreeError),
    /// The store could not be reached.
    Internal(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest(msg) => write!(f, "bad request: {msg}"),
            Self::Store(e) => write!(f, "store error: {e}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::BadRequest(_) | Self::Internal(_) => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Store(e) => {
                if e.is_corruption() {
                    tracing::error!("vital store is corrupt: {e}");
                } else {
                    tracing::error!("vital store operation failed: {e}");
                }
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            Self::Internal(message) => {
                tracing::error!("{message}");
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        };

        (
            code,
            Json(MessageBody {
                status: "error",
                message,
            }),
        )
            .into_response()
    }
}
