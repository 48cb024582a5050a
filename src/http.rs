//! HTTP surface: availability reads, visit submissions, moderation.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{ConnectInfo, FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use ulid::Ulid;

use crate::model::{BookingRecord, BookingStatus, TimeSlot, VisitRequest};
use crate::rate_limit::{RateDecision, RateLimitAction, RateLimiter};
use crate::scheduler::{Scheduler, SchedulerError};
use crate::validate;

pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";

const GENERIC_FAILURE: &str = "Something went wrong. Please try again.";

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub limiter: Arc<RateLimiter>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/properties/{property_id}/availability",
            get(availability),
        )
        .route("/api/visits", post(create_visit))
        .route("/api/visits/{id}", get(get_visit))
        .route("/api/visits/{id}/status", patch(update_visit_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Errors ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, error: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                error,
                message: message.into(),
            },
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_error", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn slot_taken() -> Self {
        Self::new(
            StatusCode::CONFLICT,
            "slot_taken",
            "This time slot is no longer available. Please choose another time.",
        )
    }

    pub fn rate_limited() -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            "Too many requests. Please try again later.",
        )
    }

    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", GENERIC_FAILURE)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::Validation(message) => ApiError::validation(message),
            SchedulerError::SlotTaken(_) => ApiError::slot_taken(),
            SchedulerError::NotFound(id) => ApiError::not_found(format!("Visit {id} not found")),
            SchedulerError::Store(err) => {
                tracing::error!(error = %err, "scheduler storage error");
                ApiError::internal()
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::validation(e.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        ApiError::validation(e.body_text())
    }
}

// ── Client identity ─────────────────────────────────────────────

/// Rate-limit identity of the caller: first `X-Forwarded-For` hop, then
/// `X-Real-IP`, then the TCP peer, then `"unknown"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKey(pub String);

impl<S: Send + Sync> FromRequestParts<S> for ClientKey {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(ClientKey(client_key(&parts.headers, peer)))
    }
}

pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    if let Some(first) = header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }
    if let Some(real) = header("x-real-ip") {
        return real.to_string();
    }
    peer.map_or_else(|| "unknown".to_string(), |addr| addr.ip().to_string())
}

fn apply_rate_headers(headers: &mut HeaderMap, decision: &RateDecision) {
    headers.insert(RATE_LIMIT_LIMIT_HEADER, HeaderValue::from(decision.limit));
    headers.insert(RATE_LIMIT_REMAINING_HEADER, HeaderValue::from(decision.remaining));
    if !decision.allowed {
        headers.insert(
            axum::http::header::RETRY_AFTER,
            HeaderValue::from(decision.retry_after_secs()),
        );
    }
}

// ── Handlers ────────────────────────────────────────────────────

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct AvailabilityQuery {
    #[serde(default)]
    date: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AvailabilityResponse<'a> {
    property_id: &'a str,
    date: String,
    slots: &'a [TimeSlot],
}

async fn availability(
    State(state): State<AppState>,
    Path(property_id): Path<String>,
    query: Result<Query<AvailabilityQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    validate::validate_property_id(&property_id).map_err(ApiError::validation)?;
    let date = validate::parse_date(query.date.trim()).map_err(ApiError::validation)?;

    let slots = state
        .scheduler
        .resolve_availability(&property_id, date)
        .await?;
    let body = AvailabilityResponse {
        property_id: &property_id,
        date: date.to_string(),
        slots: slots.as_slice(),
    };
    Ok(Json(body).into_response())
}

#[derive(Debug, Serialize)]
struct CreatedBody {
    id: Ulid,
    success: bool,
}

async fn create_visit(
    State(state): State<AppState>,
    ClientKey(client): ClientKey,
    payload: Result<Json<VisitRequest>, JsonRejection>,
) -> Response {
    let decision = state
        .limiter
        .check_and_consume(RateLimitAction::VisitRequest, &client)
        .await;
    let mut response = if decision.allowed {
        match submit_visit(&state, payload).await {
            Ok(record) => (
                StatusCode::CREATED,
                Json(CreatedBody {
                    id: record.id,
                    success: true,
                }),
            )
                .into_response(),
            Err(e) => e.into_response(),
        }
    } else {
        ApiError::rate_limited().into_response()
    };
    apply_rate_headers(response.headers_mut(), &decision);
    response
}

async fn submit_visit(
    state: &AppState,
    payload: Result<Json<VisitRequest>, JsonRejection>,
) -> Result<BookingRecord, ApiError> {
    let Json(request) = payload?;
    let booking = validate::validate_visit(&request).map_err(ApiError::validation)?;
    Ok(state.scheduler.create_booking(booking).await?)
}

fn parse_id(raw: &str) -> Result<Ulid, ApiError> {
    Ulid::from_string(raw).map_err(|_| ApiError::not_found(format!("Visit {raw} not found")))
}

async fn get_visit(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BookingRecord>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.scheduler.get_booking(id).await?))
}

#[derive(Debug, Deserialize)]
struct StatusUpdate {
    status: String,
}

async fn update_visit_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<StatusUpdate>, JsonRejection>,
) -> Result<Json<BookingRecord>, ApiError> {
    let id = parse_id(&id)?;
    let Json(update) = payload?;
    let status: BookingStatus = update.status.trim().parse().map_err(ApiError::validation)?;
    Ok(Json(state.scheduler.update_status(id, status).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn client_key_prefers_first_forwarded_hop() {
        let peer: SocketAddr = "10.0.0.1:5000".parse().unwrap();
        let h = headers(&[
            ("x-forwarded-for", " 203.0.113.7 , 10.0.0.2"),
            ("x-real-ip", "198.51.100.1"),
        ]);
        assert_eq!(client_key(&h, Some(peer)), "203.0.113.7");
    }

    #[test]
    fn client_key_fallback_chain() {
        let peer: SocketAddr = "10.0.0.1:5000".parse().unwrap();
        assert_eq!(
            client_key(&headers(&[("x-real-ip", "198.51.100.1")]), Some(peer)),
            "198.51.100.1"
        );
        assert_eq!(
            client_key(&headers(&[("x-forwarded-for", " ")]), Some(peer)),
            "10.0.0.1"
        );
        assert_eq!(client_key(&HeaderMap::new(), None), "unknown");
    }

    #[test]
    fn scheduler_errors_map_to_status_codes() {
        let cases = [
            (SchedulerError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (SchedulerError::NotFound(Ulid::new()), StatusCode::NOT_FOUND),
            (
                SchedulerError::Store(crate::store::StoreError::Unavailable("disk".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
        let internal = ApiError::from(SchedulerError::Store(
            crate::store::StoreError::Unavailable("disk full at /var".into()),
        ));
        assert_eq!(internal.body.message, GENERIC_FAILURE);
    }

    #[test]
    fn denied_decision_sets_retry_after() {
        let mut h = HeaderMap::new();
        apply_rate_headers(
            &mut h,
            &RateDecision {
                allowed: false,
                limit: 3,
                remaining: 0,
                reset_after: std::time::Duration::from_millis(59_001),
            },
        );
        assert_eq!(h[RATE_LIMIT_LIMIT_HEADER], "3");
        assert_eq!(h[RATE_LIMIT_REMAINING_HEADER], "0");
        assert_eq!(h[axum::http::header::RETRY_AFTER], "60");
    }
}
