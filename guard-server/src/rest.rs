use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::analytics::compute_analytics;
use crate::auth::{hash_password, require_bearer, verify_password, TokenSigner};
use crate::errors::Error;
use crate::insight::{InsightClient, Language};
use crate::metrics::INVALID_PAYLOADS_TOTAL;
use crate::model::{
    AnalyticsSnapshot, Credentials, Device, DeviceStatusResponse, Explanation, IngestRequest,
    MaintenanceInsight, Reading, RiskAssessment, SystemSummary, VoiceAlert,
};
use crate::store::{record_reading, ReadingStore, UserStore};
use crate::validate::{validate_credentials, validate_ingest};

const DEFAULT_HISTORY_LIMIT: u32 = 20;
const MAX_HISTORY_LIMIT: u32 = 1000;
const RISK_WINDOW: u32 = 15;
const EXPLANATION_WINDOW: u32 = 10;
const MAINTENANCE_WINDOW: u32 = 50;
const CHAT_WINDOW: u32 = 10;

#[derive(Clone)]
pub struct AppState {
    pub readings: Arc<dyn ReadingStore>,
    pub users: Arc<dyn UserStore>,
    pub insight: Arc<InsightClient>,
    pub signer: Arc<TokenSigner>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    limit: Option<String>,
}

impl HistoryQuery {
    /// Unparseable or non-positive limits fall back to the default.
    fn limit(&self) -> u32 {
        match self.limit.as_deref().map(str::trim).map(str::parse::<i64>) {
            Some(Ok(n)) if n > 0 => n.min(i64::from(MAX_HISTORY_LIMIT)) as u32,
            _ => DEFAULT_HISTORY_LIMIT,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LangQuery {
    lang: Option<String>,
}

impl LangQuery {
    fn language(&self) -> Language {
        Language::parse(self.lang.as_deref())
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(rename = "deviceId")]
    device_id: Option<String>,
    query: Option<String>,
}

#[derive(Debug, Serialize)]
struct DeviceRisk {
    device_id: String,
    #[serde(flatten)]
    risk: RiskAssessment,
}

pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/device/:id/status", get(get_status))
        .route("/api/device/:id/analytics", get(get_analytics))
        .route("/api/device/:id/history", get(get_history))
        .route("/api/device/:id/risk", get(get_risk))
        .route("/api/device/:id/explanation", get(get_explanation))
        .route("/api/device/:id/voice", get(get_voice))
        .route("/api/device/:id/maintenance", get(get_maintenance))
        .route("/api/devices", get(list_devices))
        .route("/api/summary", get(get_summary))
        .route("/api/chat", post(chat))
        .route_layer(middleware::from_fn_with_state(
            state.signer.clone(),
            require_bearer,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/api/register", post(register))
        .route("/api/login", post(login))
        .route("/api/device/data", post(ingest))
        .merge(protected)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn register(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let Json(credentials) = payload.map_err(|e| AppError::invalid("Invalid input", e))?;
    validate_credentials(&credentials).map_err(|e| AppError::invalid("Invalid input", e))?;

    let hash = hash_password(&credentials.password)?;
    if !state
        .users
        .create_user(&credentials.phone_number, &hash)
        .await?
    {
        return Err(AppError::BadRequest {
            message: "User already exists".to_string(),
            details: None,
        });
    }

    info!("Registered user {}", credentials.phone_number);
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "User registered successfully" })),
    ))
}

async fn login(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(credentials) = payload.map_err(|e| AppError::invalid("Invalid input", e))?;
    validate_credentials(&credentials).map_err(|e| AppError::invalid("Invalid input", e))?;

    let user = state
        .users
        .find_user(&credentials.phone_number)
        .await?
        .ok_or(AppError::Unauthorized)?;
    if !verify_password(&credentials.password, &user.password_hash)? {
        return Err(AppError::Unauthorized);
    }

    let token = state.signer.issue(&user.phone_number)?;
    Ok(Json(json!({
        "message": "Login successful",
        "token": token,
        "user": { "id": user.id, "phoneNumber": user.phone_number },
    })))
}

async fn ingest(
    State(state): State<AppState>,
    payload: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(request) = payload.map_err(|e| {
        INVALID_PAYLOADS_TOTAL.inc();
        AppError::invalid("Invalid payload", e)
    })?;
    validate_ingest(&request).map_err(|e| {
        INVALID_PAYLOADS_TOTAL.inc();
        AppError::invalid("Invalid payload", e)
    })?;

    let reading = request.resolve(Utc::now());
    record_reading(state.readings.as_ref(), &reading).await?;

    Ok(Json(json!({
        "message": "Data received successfully",
        "device_id": reading.device_id,
    })))
}

async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeviceStatusResponse>, AppError> {
    let device = state
        .readings
        .get_device(&id)
        .await?
        .ok_or_else(|| AppError::NotFound("Device not found".to_string()))?;
    let latest_reading = state.readings.query_history(&id, 1).await?.into_iter().next();

    Ok(Json(DeviceStatusResponse {
        device,
        latest_reading,
    }))
}

async fn get_analytics(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AnalyticsSnapshot>, AppError> {
    let snapshot = compute_analytics(state.readings.as_ref(), &id, Utc::now()).await?;
    Ok(Json(snapshot))
}

async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<Vec<Reading>>, AppError> {
    let history = state.readings.query_history(&id, params.limit()).await?;
    Ok(Json(history))
}

async fn get_risk(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<LangQuery>,
) -> Result<Json<DeviceRisk>, AppError> {
    let readings = recent_readings(&state, &id, RISK_WINDOW).await?;
    let risk = state
        .insight
        .risk_assessment(&readings, &params.language())
        .await;

    Ok(Json(DeviceRisk {
        device_id: id,
        risk,
    }))
}

async fn get_explanation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<LangQuery>,
) -> Result<Json<Explanation>, AppError> {
    let readings = recent_readings(&state, &id, EXPLANATION_WINDOW).await?;
    let explanation = state
        .insight
        .explanation(&id, &readings, &params.language())
        .await;
    Ok(Json(explanation))
}

async fn get_voice(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<LangQuery>,
) -> Result<Json<VoiceAlert>, AppError> {
    let readings = recent_readings(&state, &id, EXPLANATION_WINDOW).await?;
    let alert = state
        .insight
        .voice_alert(&id, &readings, &params.language())
        .await;
    Ok(Json(alert))
}

async fn get_maintenance(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<LangQuery>,
) -> Result<Json<MaintenanceInsight>, AppError> {
    let history = recent_readings(&state, &id, MAINTENANCE_WINDOW).await?;
    let insight = state
        .insight
        .maintenance_insight(&id, &history, &params.language())
        .await;
    Ok(Json(insight))
}

async fn list_devices(State(state): State<AppState>) -> Result<Json<Vec<Device>>, AppError> {
    Ok(Json(state.readings.list_devices().await?))
}

async fn get_summary(
    State(state): State<AppState>,
    Query(params): Query<LangQuery>,
) -> Result<Json<SystemSummary>, AppError> {
    let devices = state.readings.list_devices().await?;
    let summary = state
        .insight
        .system_summary(&devices, &params.language())
        .await;
    Ok(Json(summary))
}

async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(request) = payload.map_err(|e| AppError::invalid("Invalid input", e))?;
    let (Some(device_id), Some(query)) = (
        request.device_id.filter(|d| !d.trim().is_empty()),
        request.query.filter(|q| !q.trim().is_empty()),
    ) else {
        return Err(AppError::BadRequest {
            message: "Missing deviceId or query".to_string(),
            details: None,
        });
    };

    let history = state
        .readings
        .query_history(&device_id, CHAT_WINDOW)
        .await?;
    let answer = state
        .insight
        .chat_response(&device_id, &history, &query)
        .await;

    Ok(Json(json!({ "answer": answer })))
}

/// Newest `limit` readings, or 404 when the device has none.
async fn recent_readings(
    state: &AppState,
    id: &str,
    limit: u32,
) -> Result<Vec<Reading>, AppError> {
    let readings = state.readings.query_history(id, limit).await?;
    if readings.is_empty() {
        return Err(AppError::NotFound(
            "No data available for this device".to_string(),
        ));
    }
    Ok(readings)
}

#[derive(Debug)]
enum AppError {
    BadRequest {
        message: String,
        details: Option<String>,
    },
    Unauthorized,
    NotFound(String),
    Internal(anyhow::Error),
}

impl AppError {
    fn invalid(message: &str, details: impl std::fmt::Display) -> Self {
        AppError::BadRequest {
            message: message.to_string(),
            details: Some(details.to_string()),
        }
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation(msg) => AppError::BadRequest {
                message: "Invalid input".to_string(),
                details: Some(msg),
            },
            other => AppError::Internal(other.into()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::BadRequest { message, details } => {
                warn!("Bad request: {} {:?}", message, details);
                let body = match details {
                    Some(details) => json!({ "error": message, "details": details }),
                    None => json!({ "error": message }),
                };
                (StatusCode::BAD_REQUEST, Json(body)).into_response()
            }
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Invalid credentials" })),
            )
                .into_response(),
            AppError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
            }
            AppError::Internal(e) => {
                error!("API error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use crate::insight::{BackendError, TextBackend};
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use tower::ServiceExt;

    struct Unused;

    #[async_trait]
    impl TextBackend for Unused {
        async fn generate(&self, _api_key: &str, _prompt: &str) -> Result<String, BackendError> {
            Err(BackendError::new(None, "no backend in tests"))
        }
    }

    fn state(store: Arc<MemoryStore>) -> AppState {
        AppState {
            readings: store.clone(),
            users: store,
            insight: Arc::new(InsightClient::new(vec![], Arc::new(Unused))),
            signer: Arc::new(TokenSigner::new(&AuthConfig {
                jwt_secret: "test-secret".to_string(),
                token_expiry_secs: 3600,
            })),
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_with_token(uri: &str, token: &str) -> Request<Body> {
        Request::get(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap()
    }

    fn token(state: &AppState) -> String {
        state.signer.issue("0911223344").unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_router(state(Arc::new(MemoryStore::new())));
        let req = Request::get("/health").body(Body::empty()).unwrap();
        let (status, body) = send(&app, req).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_ingest_defaults_and_status() {
        let store = Arc::new(MemoryStore::new());
        let st = state(store.clone());
        let app = create_router(st.clone());

        let payload = json!({
            "temperature": 45.2,
            "voltage": 221.0,
            "motionDetected": true,
            "vibrationDetected": false,
            "gasDetected": false,
            "state": "SAFE"
        });
        let (status, body) = send(&app, post_json("/api/device/data", payload)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["device_id"], "UNKNOWN-DEVICE");
        assert_eq!(store.reading_count(), 1);

        let (status, body) = send(
            &app,
            get_with_token("/api/device/UNKNOWN-DEVICE/status", &token(&st)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["device"]["current_state"], "SAFE");
        assert_eq!(body["latest_reading"]["temperature"], 45.2);
    }

    #[tokio::test]
    async fn test_ingest_rejects_bad_payload() {
        let store = Arc::new(MemoryStore::new());
        let app = create_router(state(store.clone()));

        let (status, body) = send(
            &app,
            post_json("/api/device/data", json!({ "temperature": "hot" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid payload");

        let out_of_range = json!({
            "device_id": "dev-1",
            "temperature": 9000.0,
            "voltage": 220.0,
            "motionDetected": false,
            "vibrationDetected": false,
            "gasDetected": false,
            "state": "SAFE"
        });
        let (status, _) = send(&app, post_json("/api/device/data", out_of_range)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(store.reading_count(), 0);
    }

    #[tokio::test]
    async fn test_bearer_guard() {
        let app = create_router(state(Arc::new(MemoryStore::new())));

        let req = Request::get("/api/devices").body(Body::empty()).unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app, get_with_token("/api/devices", "garbage")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let app = create_router(state(Arc::new(MemoryStore::new())));
        let creds = json!({ "phoneNumber": "0911223344", "password": "secret1" });

        let (status, _) = send(&app, post_json("/api/register", creds.clone())).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _) = send(&app, post_json("/api/register", creds.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app, post_json("/api/login", creds)).await;
        assert_eq!(status, StatusCode::OK);
        let token = body["token"].as_str().unwrap().to_string();

        let (status, body) = send(&app, get_with_token("/api/devices", &token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));

        let wrong = json!({ "phoneNumber": "0911223344", "password": "secret2" });
        let (status, _) = send(&app, post_json("/api/login", wrong)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_insight_routes_need_readings() {
        let st = state(Arc::new(MemoryStore::new()));
        let app = create_router(st.clone());

        for route in ["risk", "explanation", "voice", "maintenance"] {
            let uri = format!("/api/device/ghost/{}", route);
            let (status, body) = send(&app, get_with_token(&uri, &token(&st))).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{}", route);
            assert_eq!(body["error"], "No data available for this device");
        }
    }

    #[tokio::test]
    async fn test_risk_falls_back_without_keys() {
        let store = Arc::new(MemoryStore::new());
        let st = state(store.clone());
        let app = create_router(st.clone());

        let payload = json!({
            "device_id": "dev-1",
            "temperature": 70.0,
            "voltage": 240.0,
            "motionDetected": false,
            "vibrationDetected": true,
            "gasDetected": true,
            "state": "DANGER"
        });
        send(&app, post_json("/api/device/data", payload)).await;

        let (status, body) =
            send(&app, get_with_token("/api/device/dev-1/risk?lang=am", &token(&st))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["device_id"], "dev-1");
        assert_eq!(body["risk_level"], "UNKNOWN");
        assert_eq!(body["confidence"], 0.0);
    }

    #[test]
    fn test_history_limit_is_lenient() {
        let limit = |raw: Option<&str>| {
            HistoryQuery {
                limit: raw.map(String::from),
            }
            .limit()
        };

        assert_eq!(limit(None), 20);
        assert_eq!(limit(Some("5")), 5);
        assert_eq!(limit(Some("abc")), 20);
        assert_eq!(limit(Some("-5")), 20);
        assert_eq!(limit(Some("0")), 20);
        assert_eq!(limit(Some("99999999999")), 1000);
    }

    #[tokio::test]
    async fn test_history_with_bad_limit_uses_default() {
        let store = Arc::new(MemoryStore::new());
        let st = state(store.clone());
        let app = create_router(st.clone());

        for i in 0..25 {
            let payload = json!({
                "device_id": "dev-1",
                "temperature": 40.0,
                "voltage": 220.0,
                "motionDetected": false,
                "vibrationDetected": false,
                "gasDetected": false,
                "state": "SAFE",
                "timestamp": format!("2025-05-01T10:{:02}:00Z", i),
            });
            send(&app, post_json("/api/device/data", payload)).await;
        }

        let (status, body) = send(
            &app,
            get_with_token("/api/device/dev-1/history?limit=abc", &token(&st)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 20);

        let (_, body) = send(
            &app,
            get_with_token("/api/device/dev-1/history?limit=3", &token(&st)),
        )
        .await;
        assert_eq!(body.as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_chat_requires_fields() {
        let st = state(Arc::new(MemoryStore::new()));
        let app = create_router(st.clone());

        let req = Request::post("/api/chat")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {}", token(&st)))
            .body(Body::from(json!({ "deviceId": "dev-1" }).to_string()))
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing deviceId or query");
    }

    #[tokio::test]
    async fn test_storage_failure_is_generic_500() {
        let store = Arc::new(MemoryStore::new());
        store.set_offline(true);
        let st = state(store);
        let app = create_router(st.clone());

        let (status, body) = send(&app, get_with_token("/api/devices", &token(&st))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error");
    }
}
