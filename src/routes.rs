use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::{path::PathBuf, sync::Arc};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

use crate::auth::AuthService;
use crate::error::{ApiError, ApiJson};
use crate::features::FeatureVector;
use crate::insights::{self, HealthInsights, Vitals};
use crate::stage::{InferenceHandle, StageResult};
use crate::stats::load_stats;
use crate::symptoms::{match_symptoms, MatchOutcome, SymptomFlags};

// ---------- Server state ----------

#[derive(Clone)]
pub struct AppState {
    pub inference: InferenceHandle,
    pub auth: AuthService,
    pub stats_path: Arc<PathBuf>,
}

impl AppState {
    pub fn new(inference: InferenceHandle, auth: AuthService, stats_path: impl Into<PathBuf>) -> Self {
        Self {
            inference,
            auth,
            stats_path: Arc::new(stats_path.into()),
        }
    }
}

// ---------- Request types ----------

#[derive(Deserialize)]
struct Credentials {
    username: String,
    password: String,
}

// ---------- Handlers ----------

async fn root() -> Json<Value> {
    Json(json!({ "message": "Welcome to Alzheimer's Prediction API" }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "status": "ok", "model_loaded": state.inference.is_ready() }))
}

async fn predict_stage(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<Value>,
) -> Result<Json<StageResult>, ApiError> {
    // Refuse before touching the payload when artifacts never loaded.
    let pipeline = state.inference.pipeline()?;
    let x = FeatureVector::from_json(&payload)?;
    let out = pipeline.infer(&x)?;
    info!("stage prediction code={} p={:.3}", out.stage_code, out.confidence);
    Ok(Json(out))
}

async fn predict_general(ApiJson(flags): ApiJson<SymptomFlags>) -> Json<MatchOutcome> {
    Json(match_symptoms(&flags))
}

async fn health_insights(ApiJson(vitals): ApiJson<Vitals>) -> Json<HealthInsights> {
    Json(insights::score(&vitals))
}

async fn signup(
    State(state): State<AppState>,
    ApiJson(creds): ApiJson<Credentials>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let auth = state.auth.clone();
    // PBKDF2 and SQLite both block; keep them off the async workers.
    tokio::task::spawn_blocking(move || auth.signup(&creds.username, &creds.password))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "User created successfully" })),
    ))
}

async fn signin(
    State(state): State<AppState>,
    ApiJson(creds): ApiJson<Credentials>,
) -> Result<Json<Value>, ApiError> {
    let auth = state.auth.clone();
    let username = tokio::task::spawn_blocking(move || auth.signin(&creds.username, &creds.password))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;
    Ok(Json(json!({ "message": "Login successful", "username": username })))
}

async fn stats(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    Ok(Json(load_stats(&state.stats_path).await?))
}

// ---------- Router ----------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/predict", post(predict_stage))
        .route("/predict/", post(predict_stage))
        .route("/predict/general", post(predict_general))
        .route("/predict/health-insights", post(health_insights))
        .route("/auth/signup", post(signup))
        .route("/auth/signin", post(signin))
        .route("/stats", get(stats))
        .route("/stats/", get(stats))
        .with_state(state)
}

/// Credentialed CORS for the listed origins; `*` switches to an open,
/// credential-less policy.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("ignoring invalid CORS origin {o:?}");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

pub fn app(state: AppState, cors_origins: &[String]) -> Router {
    router(state).layer(cors_layer(cors_origins))
}
