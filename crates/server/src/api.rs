//! JSON REST surface over the lifecycle engine. Handlers only translate HTTP
//! to engine calls and engine errors back to HTTP.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use haulr_core::{
    BreakdownLine, CounterOfferId, CustomerId, InterfaceError, LifecycleEngine, LifecycleError,
    OperatorRef, QuoteId, QuoteSubmission, RequestDetails, RequestEdit, RequestId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

#[derive(Clone)]
pub struct ApiState {
    engine: LifecycleEngine,
}

pub fn router(engine: LifecycleEngine) -> Router {
    Router::new()
        .route("/api/v1/requests", post(submit_request))
        .route("/api/v1/requests/{id}", get(get_request).patch(edit_request))
        .route("/api/v1/requests/{id}/cancel", post(cancel_request))
        .route("/api/v1/requests/{id}/quotes", get(list_quotes).post(submit_quote))
        .route("/api/v1/requests/{id}/operator-accept", post(operator_accept))
        .route("/api/v1/requests/{id}/start", post(start_job))
        .route("/api/v1/requests/{id}/complete", post(complete_job))
        .route("/api/v1/requests/{id}/history", get(request_history))
        .route("/api/v1/requests/{id}/fees", get(fee_preview))
        .route("/api/v1/quotes/{id}", get(get_quote))
        .route("/api/v1/quotes/{id}/accept", post(accept_quote))
        .route("/api/v1/quotes/{id}/decline", post(decline_quote))
        .route("/api/v1/quotes/{id}/withdraw", post(withdraw_quote))
        .route("/api/v1/quotes/{id}/counter", post(counter_quote))
        .route("/api/v1/quotes/{id}/counters", get(list_counters))
        .route("/api/v1/counters/{id}", get(get_counter))
        .route("/api/v1/counters/{id}/accept", post(accept_counter))
        .route("/api/v1/counters/{id}/decline", post(decline_counter))
        .with_state(ApiState { engine })
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequestBody {
    pub customer_id: String,
    #[serde(flatten)]
    pub details: RequestDetails,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelBody {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteBody {
    #[serde(flatten)]
    pub operator: OperatorRef,
    pub amount: Decimal,
    #[serde(default)]
    pub breakdown: Vec<BreakdownLine>,
    #[serde(default)]
    pub message: Option<String>,
}

impl QuoteBody {
    fn into_submission(self, request_id: String) -> QuoteSubmission {
        QuoteSubmission {
            request_id: RequestId(request_id),
            operator: self.operator,
            amount: self.amount,
            breakdown: self.breakdown,
            message: self.message,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CounterBody {
    pub amount: Decimal,
    #[serde(default)]
    pub message: Option<String>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: &'static str,
    pub detail: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_status: Option<String>,
    pub correlation_id: String,
}

/// A lifecycle error tagged with the correlation id it was logged under.
#[derive(Debug)]
pub struct ApiError {
    kind: &'static str,
    interface: InterfaceError,
}

impl From<LifecycleError> for ApiError {
    fn from(value: LifecycleError) -> Self {
        let kind = value.kind();
        let correlation_id = Uuid::new_v4().to_string();
        if matches!(value, LifecycleError::Store(_)) {
            error!(
                event_name = "api.request.failed",
                correlation_id = %correlation_id,
                error_kind = kind,
                error = %value,
                "lifecycle call failed"
            );
        } else {
            info!(
                event_name = "api.request.rejected",
                correlation_id = %correlation_id,
                error_kind = kind,
                error = %value,
                "lifecycle call rejected"
            );
        }
        Self { kind, interface: value.into_interface(correlation_id) }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail, current_status) = match &self.interface {
            InterfaceError::BadRequest { message, .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, message.clone(), None)
            }
            InterfaceError::NotFound { message, .. } => (StatusCode::NOT_FOUND, message.clone(), None),
            InterfaceError::Conflict { message, current_status, .. } => {
                (StatusCode::CONFLICT, message.clone(), current_status.clone())
            }
            InterfaceError::ServiceUnavailable { message, .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, message.clone(), None)
            }
        };

        let body = ErrorBody {
            error: self.interface.user_message(),
            detail,
            kind: self.kind,
            current_status,
            correlation_id: self.interface.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn submit_request(
    State(state): State<ApiState>,
    Json(body): Json<SubmitRequestBody>,
) -> Result<impl IntoResponse, ApiError> {
    let request = state.engine.submit(CustomerId(body.customer_id), body.details).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

async fn get_request(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult<impl Serialize> {
    Ok(Json(state.engine.get_request(&RequestId(id)).await?))
}

async fn edit_request(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(edit): Json<RequestEdit>,
) -> ApiResult<impl Serialize> {
    Ok(Json(state.engine.edit(&RequestId(id), edit).await?))
}

async fn cancel_request(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Option<Json<CancelBody>>,
) -> ApiResult<impl Serialize> {
    let Json(body) = body.unwrap_or_default();
    Ok(Json(state.engine.cancel(&RequestId(id), &body.reason).await?))
}

async fn list_quotes(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult<impl Serialize> {
    Ok(Json(state.engine.list_quotes(&RequestId(id)).await?))
}

async fn submit_quote(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<QuoteBody>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.engine.receive_quote(body.into_submission(id)).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn operator_accept(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<QuoteBody>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.engine.operator_accept(body.into_submission(id)).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn start_job(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult<impl Serialize> {
    Ok(Json(state.engine.start_job(&RequestId(id)).await?))
}

async fn complete_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl Serialize> {
    Ok(Json(state.engine.complete_job(&RequestId(id)).await?))
}

async fn request_history(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl Serialize> {
    Ok(Json(state.engine.history(&RequestId(id)).await?))
}

async fn fee_preview(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult<impl Serialize> {
    Ok(Json(state.engine.fee_preview(&RequestId(id)).await?))
}

async fn get_quote(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult<impl Serialize> {
    Ok(Json(state.engine.get_quote(&QuoteId(id)).await?))
}

async fn accept_quote(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult<impl Serialize> {
    Ok(Json(state.engine.accept_quote(&QuoteId(id)).await?))
}

async fn decline_quote(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl Serialize> {
    Ok(Json(state.engine.decline_quote(&QuoteId(id)).await?))
}

async fn withdraw_quote(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl Serialize> {
    Ok(Json(state.engine.withdraw_quote(&QuoteId(id)).await?))
}

async fn counter_quote(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<CounterBody>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.engine.counter_offer(&QuoteId(id), body.amount, body.message).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn list_counters(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl Serialize> {
    Ok(Json(state.engine.counters(&QuoteId(id)).await?))
}

async fn get_counter(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult<impl Serialize> {
    Ok(Json(state.engine.get_counter(&CounterOfferId(id)).await?))
}

async fn accept_counter(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl Serialize> {
    Ok(Json(state.engine.accept_counter(&CounterOfferId(id)).await?))
}

async fn decline_counter(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl Serialize> {
    Ok(Json(state.engine.decline_counter(&CounterOfferId(id)).await?))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use chrono::{Duration, TimeZone, Utc};
    use haulr_core::{LifecycleEngine, LifecyclePolicy, ManualClock};
    use haulr_db::InMemoryLifecycleStore;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::router;

    fn app() -> (Router, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 2, 14, 18, 0, 0).unwrap());
        let engine = LifecycleEngine::new(
            Arc::new(InMemoryLifecycleStore::new()),
            LifecyclePolicy::default(),
        )
        .with_clock(Arc::new(clock.clone()));
        (router(engine), clock)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .expect("request");

        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn submit(app: &Router) -> String {
        let (status, body) = call(
            app,
            "POST",
            "/api/v1/requests",
            Some(json!({
                "customerId": "C-42",
                "serviceType": "jump_start",
                "description": "Battery flat in the office car park",
                "location": { "address": "Level 2, Quay St car park" },
                "isEmergency": true
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["requestId"].as_str().expect("requestId").to_string()
    }

    async fn quote(app: &Router, request_id: &str, operator: &str, amount: &str) -> String {
        let (status, body) = call(
            app,
            "POST",
            &format!("/api/v1/requests/{request_id}/quotes"),
            Some(json!({
                "operatorId": operator,
                "operatorName": format!("{operator} Roadside"),
                "amount": amount,
                "breakdown": [{ "label": "call-out", "amount": amount }]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["quote"]["quoteId"].as_str().expect("quoteId").to_string()
    }

    #[tokio::test]
    async fn submit_quote_accept_round_trip_over_http() {
        let (app, _) = app();
        let request_id = submit(&app).await;
        let quote_id = quote(&app, &request_id, "OP-7", "85.00").await;

        let (status, body) = call(&app, "POST", &format!("/api/v1/quotes/{quote_id}/accept"), None).await;
        assert_eq!(status, StatusCode::OK, "{body}");

        let (status, body) = call(&app, "GET", &format!("/api/v1/requests/{request_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "assigned");
        assert_eq!(body["operatorId"], "OP-7");
        assert_eq!(body["operatorName"], "OP-7 Roadside");

        let (_, history) =
            call(&app, "GET", &format!("/api/v1/requests/{request_id}/history"), None).await;
        let events: Vec<&str> =
            history.as_array().expect("array").iter().filter_map(|row| row["event"].as_str()).collect();
        assert_eq!(events, vec!["request.submitted", "quote.received", "quote.accepted"]);
    }

    #[tokio::test]
    async fn illegal_transition_returns_conflict_with_current_status() {
        let (app, _) = app();
        let request_id = submit(&app).await;

        let (status, body) =
            call(&app, "POST", &format!("/api/v1/requests/{request_id}/complete"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "invalid_state");
        assert_eq!(body["currentStatus"], "pending");
        assert!(body["correlationId"].as_str().is_some_and(|id| !id.is_empty()));
    }

    #[tokio::test]
    async fn expired_quote_cannot_be_accepted() {
        let (app, clock) = app();
        let request_id = submit(&app).await;
        let quote_id = quote(&app, &request_id, "OP-1", "120.00").await;

        clock.advance(Duration::minutes(61));
        let (status, body) = call(&app, "POST", &format!("/api/v1/quotes/{quote_id}/accept"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "expired");
        assert_eq!(body["currentStatus"], "expired");
    }

    #[tokio::test]
    async fn unknown_ids_and_bad_input_map_to_client_errors() {
        let (app, _) = app();

        let (status, body) = call(&app, "GET", "/api/v1/requests/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "not_found");

        let (status, body) = call(
            &app,
            "POST",
            "/api/v1/requests",
            Some(json!({
                "customerId": "C-1",
                "serviceType": "tow",
                "description": "  ",
                "location": { "address": "Somewhere" }
            })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["kind"], "validation");

        let request_id = submit(&app).await;
        quote(&app, &request_id, "OP-1", "50.00").await;
        let (status, body) = call(
            &app,
            "POST",
            &format!("/api/v1/requests/{request_id}/quotes"),
            Some(json!({ "operatorId": "OP-1", "operatorName": "again", "amount": "45.00" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "duplicate_quote");
    }

    #[tokio::test]
    async fn fees_edit_and_cancel_follow_the_free_window() {
        let (app, clock) = app();
        let request_id = submit(&app).await;

        let (status, preview) =
            call(&app, "GET", &format!("/api/v1/requests/{request_id}/fees"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(preview["inFreeWindow"], true);
        assert_eq!(preview["cancellationFeeCents"], 0);

        let (status, edited) = call(
            &app,
            "PATCH",
            &format!("/api/v1/requests/{request_id}"),
            Some(json!({ "description": "Battery flat, car is on level 3" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{edited}");
        assert_eq!(edited["feeCents"], 0);
        assert_eq!(edited["request"]["editCount"], 1);

        clock.advance(Duration::minutes(15));
        let (status, cancelled) = call(
            &app,
            "POST",
            &format!("/api/v1/requests/{request_id}/cancel"),
            Some(json!({ "reason": "got a jump from a colleague" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{cancelled}");
        assert_eq!(cancelled["status"], "cancelled");
        assert_eq!(cancelled["cancellationFeeCents"], 500);
    }

    #[tokio::test]
    async fn counter_offer_flow_over_http() {
        let (app, _) = app();
        let request_id = submit(&app).await;
        let quote_id = quote(&app, &request_id, "OP-3", "140.00").await;

        let (status, countered) = call(
            &app,
            "POST",
            &format!("/api/v1/quotes/{quote_id}/counter"),
            Some(json!({ "amount": "110.00", "message": "cash on arrival" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{countered}");
        let counter_id = countered["counter"]["counterId"].as_str().expect("counterId").to_string();

        let (_, counters) = call(&app, "GET", &format!("/api/v1/quotes/{quote_id}/counters"), None).await;
        assert_eq!(counters.as_array().map(Vec::len), Some(1));
        let (status, open) = call(&app, "GET", &format!("/api/v1/counters/{counter_id}"), None).await;
        assert_eq!(status, StatusCode::OK, "{open}");
        assert_eq!(open["status"], "open");
        assert_eq!(open["amount"], "110.00");

        let (status, accepted) =
            call(&app, "POST", &format!("/api/v1/counters/{counter_id}/accept"), None).await;
        assert_eq!(status, StatusCode::OK, "{accepted}");
        assert_eq!(accepted["replacement"]["amount"], "110.00");
        assert_eq!(accepted["quote"]["status"], "declined");

        let (_, quotes) = call(&app, "GET", &format!("/api/v1/requests/{request_id}/quotes"), None).await;
        assert_eq!(quotes.as_array().map(Vec::len), Some(2));

        let (_, answered) = call(&app, "GET", &format!("/api/v1/counters/{counter_id}"), None).await;
        assert_eq!(answered["status"], "accepted");
        let (status, missing) = call(&app, "GET", "/api/v1/counters/CO-missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{missing}");
    }

    #[tokio::test]
    async fn cancel_without_a_body_records_an_empty_reason() {
        let (app, _) = app();
        let request_id = submit(&app).await;

        let (status, cancelled) =
            call(&app, "POST", &format!("/api/v1/requests/{request_id}/cancel"), None).await;
        assert_eq!(status, StatusCode::OK, "{cancelled}");
        assert_eq!(cancelled["status"], "cancelled");
        assert_eq!(cancelled["cancellationFeeCents"], 0);
        assert_eq!(cancelled["cancellationReason"], "");
    }
}
