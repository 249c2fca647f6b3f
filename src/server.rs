//! HTTP surface over an [`AclService`]
//!
//! Endpoints:
//!   POST /login    - password login, returns a token pair
//!   POST /refresh  - redeem a refresh token
//!   POST /logout   - revoke a refresh token
//!   POST /query    - authorize (and rewrite) a query or schema request
//!   POST /mutate   - authorize a mutation
//!   POST /alter    - authorize and apply a schema alter
//!   GET  /me       - the caller's groups, rules and fellow members
//!   GET  /groups/:name - one group, if the caller belongs to it
//!   GET  /health   - liveness
//!
//! The access token travels in `X-Dgraph-AccessToken`, an optional refresh
//! token for transparent renewal in `X-Dgraph-RefreshToken`.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::enforce::Credentials;
use crate::error::AclError;
use crate::request::{Alter, Mutation, Request};
use crate::service::AclService;
use crate::token::TokenPair;

pub const ACCESS_TOKEN_HEADER: &str = "x-dgraph-accesstoken";
pub const REFRESH_TOKEN_HEADER: &str = "x-dgraph-refreshtoken";

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct LoginReq {
    user: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct RefreshReq {
    refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct QueryReq {
    query: String,
}

#[derive(Debug, Default, Deserialize)]
struct MutateReq {
    #[serde(default)]
    set_nquads: String,
    #[serde(default)]
    delete_nquads: String,
}

#[derive(Debug, Default, Deserialize)]
struct AlterReq {
    schema: Option<String>,
    drop_attr: Option<String>,
    #[serde(default)]
    drop_all: bool,
}

#[derive(Debug, Serialize)]
struct LogoutRes {
    revoked: bool,
}

#[derive(Debug, Serialize)]
struct HealthRes {
    status: &'static str,
    version: &'static str,
    cache_generation: u64,
}

#[derive(Debug, Serialize)]
struct ErrorRes {
    error: String,
}

// ============================================================================
// Errors
// ============================================================================

/// HTTP status for an error kind
pub fn error_status(e: &AclError) -> StatusCode {
    match e {
        e if e.is_authentication() => StatusCode::UNAUTHORIZED,
        AclError::PermissionDenied(_) | AclError::ReservedPredicateViolation(_) => StatusCode::FORBIDDEN,
        AclError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub struct ApiError(AclError);

impl From<AclError> for ApiError {
    fn from(e: AclError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (error_status(&self.0), Json(ErrorRes { error: self.0.to_string() })).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

fn to_value<T: Serialize>(v: &T) -> Result<Value, ApiError> {
    serde_json::to_value(v).map_err(|e| ApiError(AclError::InvalidRequest(e.to_string())))
}

/// Read the token headers; missing headers mean an anonymous caller
pub fn credentials(headers: &HeaderMap) -> Credentials {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };
    Credentials {
        access_token: get(ACCESS_TOKEN_HEADER),
        refresh_token: get(REFRESH_TOKEN_HEADER),
    }
}

// ============================================================================
// Handlers
// ============================================================================

type AppState = Arc<AclService>;

async fn health(State(svc): State<AppState>) -> Json<HealthRes> {
    Json(HealthRes {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        cache_generation: svc.cache().snapshot().generation(),
    })
}

async fn login(State(svc): State<AppState>, Json(req): Json<LoginReq>) -> ApiResult<TokenPair> {
    Ok(Json(svc.login(&req.user, &req.password)?))
}

async fn refresh(State(svc): State<AppState>, Json(req): Json<RefreshReq>) -> ApiResult<TokenPair> {
    Ok(Json(svc.tokens().refresh(&req.refresh_token)?))
}

async fn logout(State(svc): State<AppState>, Json(req): Json<RefreshReq>) -> ApiResult<LogoutRes> {
    let revoked = svc.tokens().revoke(&req.refresh_token)?;
    Ok(Json(LogoutRes { revoked }))
}

async fn query(State(svc): State<AppState>, headers: HeaderMap, Json(req): Json<QueryReq>) -> ApiResult<Value> {
    let creds = credentials(&headers);
    let value = match Request::parse(&req.query)? {
        Request::Query(q) => to_value(&svc.enforcer().authorize_query(&creds, q)?)?,
        Request::Schema(s) => to_value(&svc.enforcer().query_schema(&creds, &s)?)?,
    };
    Ok(Json(value))
}

async fn mutate(State(svc): State<AppState>, headers: HeaderMap, Json(req): Json<MutateReq>) -> ApiResult<Value> {
    let mutation = Mutation::parse(&req.set_nquads, &req.delete_nquads)?;
    let authorized = svc.enforcer().authorize_mutation(&credentials(&headers), mutation)?;
    Ok(Json(to_value(&authorized)?))
}

async fn alter(State(svc): State<AppState>, headers: HeaderMap, Json(req): Json<AlterReq>) -> ApiResult<Value> {
    let op = match (req.schema, req.drop_attr, req.drop_all) {
        (Some(schema), None, false) => Alter::schema(&schema)?,
        (None, Some(predicate), false) => Alter::drop_attr(predicate),
        (None, None, true) => Alter::DropAll,
        _ => {
            return Err(ApiError(AclError::InvalidRequest(
                "alter takes exactly one of schema, drop_attr or drop_all".into(),
            )))
        }
    };
    let authorized = svc.enforcer().alter(&credentials(&headers), op)?;
    Ok(Json(to_value(&authorized)?))
}

async fn me(State(svc): State<AppState>, headers: HeaderMap) -> ApiResult<Value> {
    Ok(Json(to_value(&svc.admin().current_user(&credentials(&headers))?)?))
}

async fn group(State(svc): State<AppState>, headers: HeaderMap, Path(name): Path<String>) -> ApiResult<Value> {
    Ok(Json(to_value(&svc.admin().group(&credentials(&headers), &name)?)?))
}

// ============================================================================
// Router
// ============================================================================

pub fn router(service: Arc<AclService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .route("/query", post(query))
        .route("/mutate", post(mutate))
        .route("/alter", post(alter))
        .route("/me", get(me))
        .route("/groups/:name", get(group))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(service)
}
