use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, Method, StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};

use crate::auth::{AuthError, Identity, IdentityVerifier, extract_bearer_token};
use crate::config::Config;
use crate::credit::{
    CreditError, CreditPurchaseRequest, CreditStore, PurchaseError, PurchaseForwarder,
};
use crate::generation::GenerationClient;
use crate::pipeline::{GenerationPipeline, PipelineError};
use crate::planners::store::PlannerStore;
use crate::planners::types::PlannerRecord;

#[derive(Clone)]
pub struct AppState {
    config: Config,
    verifier: Arc<dyn IdentityVerifier>,
    credits: Arc<dyn CreditStore>,
    planners: Arc<dyn PlannerStore>,
    purchases: Arc<PurchaseForwarder>,
    pipeline: GenerationPipeline,
    started_at: DateTime<Utc>,
}

impl AppState {
    #[must_use]
    pub fn new(
        config: Config,
        verifier: Arc<dyn IdentityVerifier>,
        credits: Arc<dyn CreditStore>,
        planners: Arc<dyn PlannerStore>,
        generator: GenerationClient,
        purchases: Arc<PurchaseForwarder>,
    ) -> Self {
        let pipeline = GenerationPipeline::new(
            verifier.clone(),
            credits.clone(),
            generator,
            planners.clone(),
        );
        Self {
            config,
            verifier,
            credits,
            planners,
            purchases,
            pipeline,
            started_at: Utc::now(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    // Permissive CORS on every response; preflight OPTIONS is answered by
    // the layer with an empty body.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(handle_healthz))
        .route("/v1/planners", post(handle_generate_planner))
        .route("/v1/planners/:id", get(handle_get_planner))
        .route("/v1/credits/balance", get(handle_credit_balance))
        .route("/v1/credits/request", post(handle_request_credits))
        .layer(cors)
        .with_state(state)
}

async fn handle_healthz(State(state): State<AppState>) -> Json<Value> {
    let uptime_seconds = (Utc::now() - state.started_at).num_seconds();
    Json(serde_json::json!({
        "status": "ok",
        "service": state.config.service_name,
        "uptime_seconds": uptime_seconds,
    }))
}

#[derive(Debug, Serialize)]
struct GenerateResponse {
    id: String,
}

async fn handle_generate_planner(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<Value>>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let token = bearer_token(&headers)?;
    let inputs = body.and_then(|Json(value)| value.get("userInputs").cloned());
    let record = state
        .pipeline
        .run(token, inputs)
        .await
        .map_err(ApiError::from_pipeline)?;
    Ok(Json(GenerateResponse { id: record.id }))
}

async fn handle_get_planner(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<PlannerRecord>, ApiError> {
    let identity = authenticate(&state, &headers).await?;
    let record = state
        .planners
        .get(id.as_str())
        .await
        .map_err(|error| ApiError::Internal(error.to_string()))?
        .ok_or(ApiError::NotFound)?;
    if record.identity != identity.as_str() {
        return Err(ApiError::Forbidden(
            "planner belongs to another user".to_string(),
        ));
    }
    Ok(Json(record))
}

async fn handle_credit_balance(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let identity = authenticate(&state, &headers).await?;
    let balance = state
        .credits
        .balance(&identity)
        .await
        .map_err(ApiError::from_credit_read)?;
    Ok(Json(serde_json::json!({ "balance": balance })))
}

async fn handle_request_credits(
    State(state): State<AppState>,
    body: Option<Json<Value>>,
) -> Result<Json<Value>, ApiError> {
    let Some(Json(value)) = body else {
        return Err(ApiError::InvalidRequest(
            "request body must be a JSON object".to_string(),
        ));
    };
    let request: CreditPurchaseRequest = serde_json::from_value(value)
        .map_err(|error| ApiError::InvalidRequest(error.to_string()))?;
    state
        .purchases
        .forward(request)
        .await
        .map_err(ApiError::from_purchase)?;
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "purchase request forwarded",
    })))
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    extract_bearer_token(header).map_err(ApiError::from_auth)
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Identity, ApiError> {
    let token = bearer_token(headers)?;
    state
        .verifier
        .verify(token)
        .await
        .map_err(ApiError::from_auth)
}

#[derive(Debug)]
enum ApiError {
    Unauthorized(String),
    Forbidden(String),
    NotFound,
    InvalidRequest(String),
    Internal(String),
}

impl ApiError {
    fn from_auth(error: AuthError) -> Self {
        Self::Unauthorized(error.to_string())
    }

    fn from_pipeline(error: PipelineError) -> Self {
        match error {
            PipelineError::Auth(auth) => Self::Unauthorized(auth.to_string()),
            PipelineError::MissingInput => Self::InvalidRequest(error.to_string()),
            // Insufficient credits, upstream failures, malformed envelopes
            // and storage failures all surface as 500 to the client.
            other => Self::Internal(other.to_string()),
        }
    }

    fn from_credit_read(error: CreditError) -> Self {
        match error {
            CreditError::AccountNotFound => Self::NotFound,
            other => Self::Internal(other.to_string()),
        }
    }

    fn from_purchase(error: PurchaseError) -> Self {
        match error {
            PurchaseError::InvalidRequest(message) => Self::InvalidRequest(message),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            Self::Unauthorized(message) => (StatusCode::UNAUTHORIZED, message),
            Self::Forbidden(message) => (StatusCode::FORBIDDEN, message),
            Self::NotFound => (StatusCode::NOT_FOUND, "not found".to_string()),
            Self::InvalidRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
