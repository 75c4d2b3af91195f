//! Route handlers and the mock business logic they wrap, in the shape of
//! the teacher's own `examples/axummetrics::get_user`: an axum extractor
//! function that builds a [`RequestContext`] and hands off to the already
//! chain-wrapped [`interceptor_kit::HandlerFn`], plus the raw operation
//! functions passed to `chain.build` in `main.rs`.

use crate::AppState;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use interceptor_kit::args::Args;
use interceptor_kit::context::RequestContext;
use interceptor_kit::error::Error;
use interceptor_kit::handler::{BoxFuture, HandlerResult};
use interceptor_kit::method_key::MethodKey;
use serde_json::json;
use std::net::SocketAddr;

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "healthy", "service": "interceptor-kit-http-demo"}))
}

fn correlation_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

fn error_response(err: Error) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, Json(json!({"error": err.to_string()}))).into_response();
    if let Some(retry_after) = err.retry_after() {
        if let Ok(value) = HeaderValue::from_str(&retry_after.as_secs().to_string()) {
            response.headers_mut().insert("retry-after", value);
        }
    }
    response
}

pub async fn get_invoice(
    Path(id): Path<String>,
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let subject = state.resolver.resolve(&headers, Some(peer.to_string()));
    let ctx = RequestContext::new(correlation_id(), subject, MethodKey::new("invoice.read"), Args::from_values(vec![json!(id)]));

    match (state.get_invoice)(ctx).await {
        Ok(value) if value.is_null() => (StatusCode::NOT_FOUND, Json(json!({"error": "invoice not found"}))).into_response(),
        Ok(value) => (StatusCode::OK, Json(value)).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, serde::Deserialize, serde::Serialize)]
pub struct CapturePaymentRequest {
    pub invoice_id: String,
    pub amount_cents: u64,
}

pub async fn capture_payment(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<CapturePaymentRequest>,
) -> Response {
    let Some(idempotency_key) = headers.get("idempotency-key").and_then(|v| v.to_str().ok()).map(str::to_string) else {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "Idempotency-Key header is required"}))).into_response();
    };

    let subject = state.resolver.resolve(&headers, Some(peer.to_string()));
    let ctx = RequestContext::new(
        correlation_id(),
        subject,
        MethodKey::new("payment.capture"),
        Args::from_values(vec![serde_json::to_value(&body).expect("CapturePaymentRequest always serializes")]),
    )
    .with_idempotency_key(idempotency_key);

    match (state.capture_payment)(ctx).await {
        Ok(value) => (StatusCode::OK, Json(value)).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, serde::Deserialize, serde::Serialize)]
pub struct ReportRequest {
    pub report_name: String,
}

pub async fn generate_report(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<ReportRequest>,
) -> Response {
    let subject = state.resolver.resolve(&headers, Some(peer.to_string()));
    let ctx = RequestContext::new(
        correlation_id(),
        subject,
        MethodKey::new("report.generate"),
        Args::from_values(vec![serde_json::to_value(&body).expect("ReportRequest always serializes")]),
    );

    match (state.generate_report)(ctx).await {
        Ok(value) => (StatusCode::OK, Json(value)).into_response(),
        Err(err) => error_response(err),
    }
}

/// Mock invoice lookup, standing in for a real repository the way
/// `axummetrics::UserRepository` stands in for one.
pub fn fetch_invoice(ctx: RequestContext) -> BoxFuture<'static, HandlerResult> {
    Box::pin(async move {
        let id = ctx.args.as_value().get(0).and_then(|v| v.as_str()).unwrap_or_default().to_string();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let invoice = match id.as_str() {
            "invoice_001" => Some(json!({"id": "invoice_001", "customer": "Alice Johnson", "amount_cents": 4_200})),
            "invoice_002" => Some(json!({"id": "invoice_002", "customer": "Bob Smith", "amount_cents": 9_900})),
            _ => None,
        };

        Ok(invoice.unwrap_or(serde_json::Value::Null))
    })
}

/// Mock payment capture, standing in for a payment processor call.
pub fn capture_payment_handler(ctx: RequestContext) -> BoxFuture<'static, HandlerResult> {
    Box::pin(async move {
        let body: CapturePaymentRequest =
            serde_json::from_value(ctx.args.as_value().get(0).cloned().unwrap_or(serde_json::Value::Null))
                .map_err(|e| Error::ValidationError(e.to_string()))?;

        tokio::time::sleep(std::time::Duration::from_millis(25)).await;

        Ok(json!({
            "invoice_id": body.invoice_id,
            "amount_cents": body.amount_cents,
            "captured": true,
        }))
    })
}

/// Mock report generation, standing in for a slow aggregation job.
pub fn generate_report_handler(ctx: RequestContext) -> BoxFuture<'static, HandlerResult> {
    Box::pin(async move {
        let body: ReportRequest =
            serde_json::from_value(ctx.args.as_value().get(0).cloned().unwrap_or(serde_json::Value::Null))
                .map_err(|e| Error::ValidationError(e.to_string()))?;

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        Ok(json!({"report": body.report_name, "rows": 42}))
    })
}
