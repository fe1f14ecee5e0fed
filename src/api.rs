// REST API for the care-gap dashboard.
//
// Thin handlers over the db layer: every chart endpoint is a read, every
// form endpoint is a single parameterized insert, and the four recent-data
// endpoints share one resolver. The router is built separately from the
// listener so tests can drive it in-process.

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json},
    routing::{delete, get, post},
    Router,
};
use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;

use crate::auth;
use crate::config::Config;
use crate::db::{
    self, NewGapClosure, NewPriorityGap, TableName,
};
use crate::error::AppError;
use crate::extract::{ExtractorClient, GapMetrics};
use crate::recent::resolve_recent_period;

/// Shared application state. The store handle is constructed once at
/// startup and owned here; handlers borrow it for the duration of a query.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: Arc<Config>,
    pub extractor: ExtractorClient,
}

impl AppState {
    pub fn new(conn: Connection, config: Config) -> Self {
        let extractor = ExtractorClient::new(&config.extractor_url);
        Self {
            db: Arc::new(Mutex::new(conn)),
            config: Arc::new(config),
            extractor,
        }
    }
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

/// Form entry for the two ratio-based series. The form submits the raw
/// "numerator/denominator" string; the server owns the parsing.
#[derive(Deserialize)]
struct RatioEntry {
    percentage: String,
    date: NaiveDate,
    insurance: String,
}

#[derive(Deserialize)]
struct RiskEntry {
    percentage: f64,
    date: NaiveDate,
    insurance: String,
}

/// Persistence payload for already-extracted priority-gap metrics.
/// Individual counts are optional; date and the metrics object are not.
#[derive(Deserialize)]
struct ProcessedEntry {
    date: NaiveDate,
    metrics: ProcessedMetrics,
}

#[derive(Deserialize)]
struct ProcessedMetrics {
    diabetes: Option<i64>,
    blood_pressure: Option<i64>,
    breast_cancer: Option<i64>,
    colorectal_cancer: Option<i64>,
}

/// Parse a "numerator/denominator" form value.
fn parse_ratio(s: &str) -> Result<(i64, i64), AppError> {
    let parts: Vec<&str> = s.split('/').collect();
    if parts.len() != 2 {
        return Err(AppError::BadRequest(
            "Percentage must be in format \"numerator/denominator\"".to_string(),
        ));
    }

    let numerator = parts[0].trim().parse::<i64>();
    let denominator = parts[1].trim().parse::<i64>();

    match (numerator, denominator) {
        (Ok(n), Ok(d)) if d != 0 => Ok((n, d)),
        _ => Err(AppError::BadRequest(
            "Invalid numerator/denominator values".to_string(),
        )),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/health
async fn health() -> impl IntoResponse {
    Json(json!({ "status": "OK" }))
}

/// POST /api/login - exchange the shared credentials for a bearer token
async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.username != state.config.shared_username
        || req.password != state.config.shared_password
    {
        return Ok((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "Invalid credentials" })),
        ));
    }

    let token = auth::issue_token(
        &req.username,
        &state.config.jwt_secret,
        state.config.token_ttl_secs,
    )
    .map_err(anyhow::Error::from)?;

    Ok((StatusCode::OK, Json(json!({ "token": token }))))
}

/// GET /api/chart-data - full gap-closure history
async fn gap_chart_data(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let conn = state.db.lock().unwrap();
    let rows = db::get_gap_closures(&conn)?;
    Ok(Json(rows))
}

/// POST /api/gaps
async fn post_gap(
    State(state): State<AppState>,
    Json(entry): Json<RatioEntry>,
) -> Result<impl IntoResponse, AppError> {
    let (numerator, denominator) = parse_ratio(&entry.percentage)?;

    let conn = state.db.lock().unwrap();
    let row = db::insert_gap_closure(
        &conn,
        &NewGapClosure {
            date: entry.date,
            numerator,
            denominator,
            insurance: entry.insurance,
        },
    )?;

    Ok((StatusCode::CREATED, Json(vec![row])))
}

/// GET /api/gaps/recent-data - most recent month with gap-closure rows
async fn gap_recent_data(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let conn = state.db.lock().unwrap();
    let period = resolve_recent_period(
        Utc::now().date_naive(),
        state.config.lookback_months,
        |start, end| db::gap_closures_in_interval(&conn, start, end),
    )?;

    match period {
        Some(period) => Ok(Json(period.rows)),
        None => Err(AppError::NoRecentData),
    }
}

/// GET /api/chart-data/risk-score
async fn risk_chart_data(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let conn = state.db.lock().unwrap();
    let rows = db::get_risk_scores(&conn)?;
    Ok(Json(rows))
}

/// POST /api/risk
async fn post_risk(
    State(state): State<AppState>,
    Json(entry): Json<RiskEntry>,
) -> Result<impl IntoResponse, AppError> {
    let conn = state.db.lock().unwrap();
    let row = db::insert_risk_score(&conn, entry.date, entry.percentage, &entry.insurance)?;
    Ok((StatusCode::CREATED, Json(vec![row])))
}

/// GET /api/chart-data/risk-score/recent-data
async fn risk_recent_data(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let conn = state.db.lock().unwrap();
    let period = resolve_recent_period(
        Utc::now().date_naive(),
        state.config.lookback_months,
        |start, end| db::risk_scores_in_interval(&conn, start, end),
    )?;

    match period {
        Some(period) => Ok(Json(period.rows)),
        None => Err(AppError::NoRecentData),
    }
}

/// GET /api/chart-data/outreach
async fn outreach_chart_data(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = state.db.lock().unwrap();
    let rows = db::get_outreach(&conn)?;
    Ok(Json(rows))
}

/// POST /api/outreach
async fn post_outreach(
    State(state): State<AppState>,
    Json(entry): Json<RatioEntry>,
) -> Result<impl IntoResponse, AppError> {
    let (numerator, denominator) = parse_ratio(&entry.percentage)?;

    let conn = state.db.lock().unwrap();
    let row = db::insert_outreach(
        &conn,
        &NewGapClosure {
            date: entry.date,
            numerator,
            denominator,
            insurance: entry.insurance,
        },
    )?;

    Ok((StatusCode::CREATED, Json(vec![row])))
}

/// GET /api/chart-data/outreach/recent-data
async fn outreach_recent_data(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = state.db.lock().unwrap();
    let period = resolve_recent_period(
        Utc::now().date_naive(),
        state.config.lookback_months,
        |start, end| db::outreach_in_interval(&conn, start, end),
    )?;

    match period {
        Some(period) => Ok(Json(period.rows)),
        None => Err(AppError::NoRecentData),
    }
}

/// GET /api/chart-data/earnings
async fn earnings_data(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let conn = state.db.lock().unwrap();
    let rows = db::get_earnings(&conn)?;
    Ok(Json(rows))
}

/// GET /api/chart-data/priority-gaps
async fn priority_chart_data(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = state.db.lock().unwrap();
    let rows = db::get_priority_gaps(&conn)?;
    Ok(Json(rows))
}

/// GET /api/chart-data/priority-gaps/recent-data
async fn priority_recent_data(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = state.db.lock().unwrap();
    let period = resolve_recent_period(
        Utc::now().date_naive(),
        state.config.lookback_months,
        |start, end| db::priority_gaps_in_interval(&conn, start, end),
    )?;

    match period {
        Some(period) => Ok(Json(period.rows)),
        None => Err(AppError::NoRecentData),
    }
}

/// POST /api/priority-gaps - multipart workbook upload; extraction is
/// delegated to the external function and its validated counts are
/// returned to the client (persistence is a separate call).
async fn upload_priority_gaps(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<GapMetrics>, AppError> {
    let mut file: Option<Vec<u8>> = None;
    let mut date: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().map(|s| s.to_string());
        match name.as_deref() {
            Some("excelFile") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                file = Some(bytes.to_vec());
            }
            Some("date") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                date = Some(text);
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| AppError::BadRequest("No file uploaded".to_string()))?;
    let date = date.ok_or_else(|| AppError::BadRequest("No date provided".to_string()))?;

    let metrics = state.extractor.extract(&file, &date).await?;
    Ok(Json(metrics))
}

/// POST /api/priority-gaps/processed - persist extracted metrics
async fn post_processed_priority_gaps(
    State(state): State<AppState>,
    Json(entry): Json<ProcessedEntry>,
) -> Result<impl IntoResponse, AppError> {
    let conn = state.db.lock().unwrap();
    let row = db::insert_priority_gap(
        &conn,
        &NewPriorityGap {
            date: entry.date,
            diabetes: entry.metrics.diabetes,
            blood_pressure: entry.metrics.blood_pressure,
            breast_cancer: entry.metrics.breast_cancer,
            colo_cancer: entry.metrics.colorectal_cancer,
        },
    )?;

    Ok((StatusCode::CREATED, Json(vec![row])))
}

/// GET /api/table-data/:table
async fn table_data(
    State(state): State<AppState>,
    Path(table): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let table: TableName = table
        .parse()
        .map_err(|_| AppError::NotFound(format!("Unknown table: {}", table)))?;

    let conn = state.db.lock().unwrap();
    let rows = db::fetch_table(&conn, table)?;
    Ok(Json(rows))
}

/// DELETE /api/table-data/:table/:id
async fn delete_table_row(
    State(state): State<AppState>,
    Path((table, id)): Path<(String, i64)>,
) -> Result<impl IntoResponse, AppError> {
    let table: TableName = table
        .parse()
        .map_err(|_| AppError::NotFound(format!("Unknown table: {}", table)))?;

    let conn = state.db.lock().unwrap();
    if !db::delete_row(&conn, table, id)? {
        return Err(AppError::NotFound("Record not found".to_string()));
    }

    Ok(Json(json!({
        "message": format!("Record with id {} deleted successfully.", id)
    })))
}

// ============================================================================
// Router
// ============================================================================

pub fn build_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(health))
        .route("/login", post(login));

    let protected = Router::new()
        .route("/chart-data", get(gap_chart_data))
        .route("/chart-data/risk-score", get(risk_chart_data))
        .route("/chart-data/risk-score/recent-data", get(risk_recent_data))
        .route("/chart-data/outreach", get(outreach_chart_data))
        .route("/chart-data/outreach/recent-data", get(outreach_recent_data))
        .route("/chart-data/earnings", get(earnings_data))
        .route("/chart-data/priority-gaps", get(priority_chart_data))
        .route(
            "/chart-data/priority-gaps/recent-data",
            get(priority_recent_data),
        )
        .route("/gaps", post(post_gap))
        .route("/gaps/recent-data", get(gap_recent_data))
        .route("/risk", post(post_risk))
        .route("/outreach", post(post_outreach))
        .route("/priority-gaps", post(upload_priority_gaps))
        .route("/priority-gaps/processed", post(post_processed_priority_gaps))
        .route("/table-data/:table", get(table_data))
        .route("/table-data/:table/:id", delete(delete_table_row))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    Router::new()
        .nest("/api", public.merge(protected))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let conn = Connection::open_in_memory().unwrap();
        db::setup_database(&conn).unwrap();

        AppState::new(
            conn,
            Config {
                port: 0,
                db_path: ":memory:".to_string(),
                jwt_secret: "test-secret".to_string(),
                shared_username: "admin".to_string(),
                shared_password: "letmein".to_string(),
                // Unroutable; upload tests never reach the network.
                extractor_url: "http://127.0.0.1:9/extract".to_string(),
                lookback_months: 12,
                token_ttl_secs: 3600,
            },
        )
    }

    fn bearer(state: &AppState) -> String {
        let token =
            auth::issue_token("admin", &state.config.jwt_secret, 3600).unwrap();
        format!("Bearer {}", token)
    }

    async fn send(
        state: &AppState,
        req: Request<Body>,
    ) -> (StatusCode, serde_json::Value) {
        let app = build_router(state.clone());
        let response = app.oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        (status, body)
    }

    fn get_req(uri: &str, auth_header: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(h) = auth_header {
            builder = builder.header(header::AUTHORIZATION, h);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, auth_header: Option<&str>, body: serde_json::Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(h) = auth_header {
            builder = builder.header(header::AUTHORIZATION, h);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_login_issues_token() {
        let state = test_state();

        let (status, body) = send(
            &state,
            post_json(
                "/api/login",
                None,
                json!({ "username": "admin", "password": "letmein" }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["token"].as_str().unwrap().contains('.'));
    }

    #[tokio::test]
    async fn test_login_rejects_bad_credentials() {
        let state = test_state();

        let (status, body) = send(
            &state,
            post_json(
                "/api/login",
                None,
                json!({ "username": "admin", "password": "wrong" }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Invalid credentials");
    }

    #[tokio::test]
    async fn test_missing_token_is_401_invalid_token_is_403() {
        let state = test_state();

        let (status, _) = send(&state, get_req("/api/chart-data", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(
            &state,
            get_req("/api/chart-data", Some("Bearer not-a-token")),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_post_gap_then_chart_data() {
        let state = test_state();
        let auth = bearer(&state);

        let (status, body) = send(
            &state,
            post_json(
                "/api/gaps",
                Some(&auth),
                json!({
                    "percentage": "30 / 60",
                    "date": "2024-06-01",
                    "insurance": "Acme"
                }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body[0]["percentage"], 50.0);

        let (status, body) = send(&state, get_req("/api/chart-data", Some(&auth))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["insurance"], "Acme");
    }

    #[tokio::test]
    async fn test_post_gap_rejects_malformed_ratio() {
        let state = test_state();
        let auth = bearer(&state);

        for bad in ["not-a-ratio", "1/2/3", "a/b", "5/0"] {
            let (status, _) = send(
                &state,
                post_json(
                    "/api/gaps",
                    Some(&auth),
                    json!({
                        "percentage": bad,
                        "date": "2024-06-01",
                        "insurance": "Acme"
                    }),
                ),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "ratio {:?}", bad);
        }
    }

    #[tokio::test]
    async fn test_recent_data_404_when_empty() {
        let state = test_state();
        let auth = bearer(&state);

        let (status, body) = send(&state, get_req("/api/gaps/recent-data", Some(&auth))).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "No recent data found");
    }

    #[tokio::test]
    async fn test_recent_data_returns_latest_month_only() {
        let state = test_state();
        let auth = bearer(&state);

        let today = Utc::now().date_naive();
        let last_month = crate::recent::Month::containing(today).prev().start();

        {
            let conn = state.db.lock().unwrap();
            db::insert_risk_score(&conn, today, 80.0, "Acme").unwrap();
            db::insert_risk_score(&conn, last_month, 60.0, "Acme").unwrap();
        }

        let (status, body) = send(
            &state,
            get_req("/api/chart-data/risk-score/recent-data", Some(&auth)),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["percentage"], 80.0);
    }

    #[tokio::test]
    async fn test_recent_data_walks_back_to_previous_month() {
        let state = test_state();
        let auth = bearer(&state);

        let today = Utc::now().date_naive();
        let last_month = crate::recent::Month::containing(today).prev().start();

        {
            let conn = state.db.lock().unwrap();
            db::insert_outreach(
                &conn,
                &NewGapClosure {
                    date: last_month,
                    numerator: 3,
                    denominator: 4,
                    insurance: "Acme".to_string(),
                },
            )
            .unwrap();
        }

        let (status, body) = send(
            &state,
            get_req("/api/chart-data/outreach/recent-data", Some(&auth)),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["percentage"], 75.0);
    }

    #[tokio::test]
    async fn test_processed_priority_gaps_roundtrip() {
        let state = test_state();
        let auth = bearer(&state);

        let (status, body) = send(
            &state,
            post_json(
                "/api/priority-gaps/processed",
                Some(&auth),
                json!({
                    "date": "2024-06-01",
                    "metrics": {
                        "diabetes": 14,
                        "blood_pressure": 9,
                        "breast_cancer": 3,
                        "colorectal_cancer": 7
                    }
                }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body[0]["diabetes"], 14);
        assert_eq!(body[0]["colo_cancer"], 7);

        let (status, body) = send(
            &state,
            get_req("/api/chart-data/priority-gaps", Some(&auth)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_table_is_404() {
        let state = test_state();
        let auth = bearer(&state);

        let (status, _) = send(&state, get_req("/api/table-data/users", Some(&auth))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_row_then_404_on_repeat() {
        let state = test_state();
        let auth = bearer(&state);

        let id = {
            let conn = state.db.lock().unwrap();
            db::insert_risk_score(
                &conn,
                NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
                50.0,
                "Acme",
            )
            .unwrap()
            .id
        };

        let uri = format!("/api/table-data/risk_closure/{}", id);
        let req = |auth: &str| {
            Request::builder()
                .method("DELETE")
                .uri(&uri)
                .header(header::AUTHORIZATION, auth)
                .body(Body::empty())
                .unwrap()
        };

        let (status, body) = send(&state, req(&auth)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["message"].as_str().unwrap().contains("deleted"));

        let (status, body) = send(&state, req(&auth)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Record not found");
    }

    #[test]
    fn test_parse_ratio() {
        assert_eq!(parse_ratio("30/60").unwrap(), (30, 60));
        assert_eq!(parse_ratio(" 7 / 8 ").unwrap(), (7, 8));
        assert!(parse_ratio("30").is_err());
        assert!(parse_ratio("30/0").is_err());
        assert!(parse_ratio("a/b").is_err());
    }
}
