// CRM Stage Report - Web Server
// REST API with Axum: report rows, report generation and file download

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Redirect, Response},
    routing::{get, post},
    Router,
};
use chrono::{Datelike, Utc};
use crm_stage_report::{
    rows_for_period, setup_database, year_selection, AttachmentStore, FieldRegistry,
    MonthSelection, ReportConfig, ReportError, ReportGenerator, ReportWizard,
    SqliteAttachmentStore, SqliteStore, StageFieldRef, SummaryRow,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    config: Arc<ReportConfig>,
    fields: Arc<FieldRegistry>,
}

impl AppState {
    fn new(conn: Connection, config: ReportConfig) -> Self {
        let fields = config.field_registry();
        Self {
            db: Arc::new(Mutex::new(conn)),
            config: Arc::new(config),
            fields: Arc::new(fields),
        }
    }

    fn stage_field(&self) -> StageFieldRef {
        StageFieldRef::new(&self.config.lead_model, &self.config.stage_field)
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

/// Error answer: status code plus message in the usual envelope
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<ReportError> for ApiError {
    fn from(err: ReportError) -> Self {
        let status = match err {
            ReportError::InvalidPeriod { .. }
            | ReportError::InvalidYear { .. }
            | ReportError::InvalidYearValue(_)
            | ReportError::InvalidMonth(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "request failed");
        }
        let body = ApiResponse {
            success: false,
            data: (),
            error: Some(self.message),
        };
        (self.status, Json(body)).into_response()
    }
}

/// Run `f` against the shared connection on the blocking pool
async fn with_conn<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Connection, &AppState) -> crm_stage_report::Result<T> + Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || {
        let conn = state
            .db
            .lock()
            .map_err(|_| ApiError::internal("database lock poisoned"))?;
        f(&conn, &state).map_err(ApiError::from)
    })
    .await
    .map_err(|e| ApiError::internal(e.to_string()))?
}

/// `?year=2024&month=3`; month 0 or absent means all months
#[derive(Debug, Deserialize)]
struct PeriodQuery {
    year: Option<i32>,
    month: Option<u32>,
}

impl PeriodQuery {
    fn wizard(&self) -> Result<ReportWizard, ReportError> {
        let year = self.year.unwrap_or_else(|| Utc::now().year());
        let month = MonthSelection::from_number(self.month.unwrap_or(0))?;
        Ok(ReportWizard::new(year, month))
    }
}

/// Generation result returned by the JSON variant of the report endpoint
#[derive(Serialize)]
struct GeneratedReport {
    attachment_id: i64,
    file_name: String,
    row_count: usize,
    url: String,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/years - Selectable report years
async fn get_years(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<i32>>>, ApiError> {
    let years = with_conn(&state, |conn, _| {
        year_selection(&SqliteStore::new(conn), Utc::now().date_naive())
    })
    .await?;
    Ok(Json(ApiResponse::ok(years)))
}

/// GET /api/rows - Summary rows for a year or a single month
async fn get_rows(
    State(state): State<AppState>,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<ApiResponse<Vec<SummaryRow>>>, ApiError> {
    let wizard = query.wizard()?;
    let rows = with_conn(&state, move |conn, state| {
        let store = SqliteStore::new(conn);
        rows_for_period(&store, &state.fields, &state.stage_field(), wizard.year, wizard.month)
    })
    .await?;
    Ok(Json(ApiResponse::ok(rows)))
}

/// POST /api/reports - Generate and store the report, then redirect to it
async fn create_report(
    State(state): State<AppState>,
    Query(query): Query<PeriodQuery>,
    headers: axum::http::HeaderMap,
) -> Result<Response, ApiError> {
    let wizard = query.wizard()?;
    let action = with_conn(&state, move |conn, state| {
        let store = SqliteStore::new(conn);
        let attachments = SqliteAttachmentStore::new(conn);
        let encoder = state.config.format.encoder();
        let generator = ReportGenerator::new(&store, &attachments, encoder, &state.fields)
            .with_stage_field(state.stage_field());
        wizard.generate_report(&generator, Utc::now().naive_utc())
    })
    .await?;

    let wants_json = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/json"));

    if wants_json {
        let body = GeneratedReport {
            attachment_id: action.attachment.id,
            file_name: action.attachment.file_name.clone(),
            row_count: action.row_count,
            url: action.url.clone(),
        };
        return Ok((StatusCode::CREATED, Json(ApiResponse::ok(body))).into_response());
    }

    Ok(Redirect::to(&action.url).into_response())
}

/// GET /web/content/:id - Download a stored report file
async fn download_attachment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let found =
        with_conn(&state, move |conn, _| SqliteAttachmentStore::new(conn).fetch(id)).await?;
    let Some((attachment, data)) = found else {
        return Err(ApiError::not_found(format!("attachment {} not found", id)));
    };

    let disposition = format!(
        "attachment; filename*=UTF-8''{}",
        urlencoding::encode(&attachment.file_name)
    );

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, attachment.mimetype),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        data,
    )
        .into_response())
}

fn app(state: AppState) -> Router {
    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/years", get(get_years))
        .route("/rows", get(get_rows))
        .route("/reports", post(create_report))
        .with_state(state.clone());

    // Build main router
    Router::new()
        .route("/web/content/:id", get(download_attachment))
        .with_state(state)
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use anyhow::Context;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("STAGE_REPORT_LOG").unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    "crm_stage_report=info,stage_report_server=info,warn",
                )
            }),
        )
        .init();

    let config_path = std::env::var_os("STAGE_REPORT_CONFIG").map(std::path::PathBuf::from);
    let config = ReportConfig::load(config_path.as_deref()).context("Failed to load config")?;

    let conn = Connection::open(&config.database)
        .with_context(|| format!("Failed to open database {}", config.database.display()))?;
    setup_database(&conn)?;
    tracing::info!(database = %config.database.display(), "database opened");

    let addr = config.server.bind.clone();
    let state = AppState::new(conn, config);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    println!("\n🚀 Stage report server running on http://{}", addr);
    println!("   Rows:   GET  /api/rows?year=2024&month=3");
    println!("   Report: POST /api/reports?year=2024");
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app(state))
        .await
        .context("Server error")?;

    Ok(())
}
