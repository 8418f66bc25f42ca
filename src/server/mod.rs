// HTTP surface for payment operations and Stripe webhook deliveries

use axum::{
    async_trait,
    body::Bytes,
    extract::{rejection::JsonRejection, FromRequest, Path, Request, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use http::{HeaderMap, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::payments::gateway::{CustomerProfile, RefundReceipt};
use crate::payments::model::PaymentAttempt;
use crate::payments::{
    Confirmation, CreateIntent, CreatedPayment, PaymentError, PaymentQueries,
    ReconciliationEngine, WebhookAck,
};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReconciliationEngine>,
    pub queries: PaymentQueries,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/payments/create-intent", post(create_intent))
        .route("/payments/confirm", post(confirm_payment))
        .route("/payments/webhook", post(handle_webhook))
        .route("/payments/refund", post(refund_payment))
        .route("/payments/customers", post(create_customer))
        .route("/payments/customers/:customer_id", get(get_customer))
        .route("/payments/user/:user_id", get(payments_by_user))
        .route("/payments/:id", get(payment_by_id))
        .route("/health", get(health_check))
        .with_state(state)
}

pub async fn run_http_server(port: u16, state: AppState) -> anyhow::Result<()> {
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting payments HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Error body: `{ "error": <code>, "message": <text> }`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError(PaymentError);

impl From<PaymentError> for ApiError {
    fn from(e: PaymentError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = match &self.0 {
            PaymentError::Store(e) => {
                error!(error = %e, "Storage failure");
                "Internal server error".to_string()
            }
            PaymentError::Gateway(e) => e.message.clone(),
            PaymentError::Validation(m)
            | PaymentError::NotFound(m)
            | PaymentError::SignatureInvalid(m) => m.clone(),
        };
        let body = ErrorBody {
            error: self.0.code().to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// JSON body whose rejections (bad syntax, wrong types, missing fields, wrong
/// content type) are reported as 400 `validation_error` bodies.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(json_rejection(rejection)),
        }
    }
}

fn json_rejection(rejection: JsonRejection) -> ApiError {
    warn!(status = %rejection.status(), reason = %rejection.body_text(), "Rejected request body");
    PaymentError::Validation(rejection.body_text()).into()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentRequest {
    pub user_id: String,
    pub amount: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub payment_method_id: Option<String>,
    #[serde(default)]
    pub stripe_customer_id: Option<String>,
}

fn default_currency() -> String {
    "USD".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    pub payment_intent_id: String,
    #[serde(default)]
    pub payment_method_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequestBody {
    pub payment_intent_id: String,
    #[serde(default)]
    pub amount: Option<Decimal>,
    /// Reused by the caller when retrying the same refund.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCustomerRequest {
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCustomerResponse {
    pub customer_id: String,
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn create_intent(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateIntentRequest>,
) -> ApiResult<(StatusCode, Json<CreatedPayment>)> {
    let created = state
        .engine
        .create_intent(CreateIntent {
            user_id: req.user_id,
            amount: req.amount,
            currency: req.currency,
            description: req.description,
            metadata: req.metadata,
            payment_method_id: req.payment_method_id,
            customer_id: req.stripe_customer_id,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn confirm_payment(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ConfirmRequest>,
) -> ApiResult<Json<Confirmation>> {
    let confirmation = state
        .engine
        .confirm(&req.payment_intent_id, req.payment_method_id.as_deref())
        .await?;
    Ok(Json(confirmation))
}

async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let signature = match headers.get("stripe-signature").map(|v| v.to_str()) {
        Some(Ok(sig)) => sig,
        Some(Err(_)) => {
            warn!("Stripe-Signature header is not valid ASCII");
            ""
        }
        None => "",
    };
    let ack = state.engine.handle_webhook(&body, signature).await?;
    Ok(Json(ack))
}

async fn refund_payment(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RefundRequestBody>,
) -> ApiResult<(StatusCode, Json<RefundReceipt>)> {
    let receipt = state
        .engine
        .refund(&req.payment_intent_id, req.amount, req.idempotency_key.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn create_customer(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateCustomerRequest>,
) -> ApiResult<(StatusCode, Json<CreateCustomerResponse>)> {
    let customer_id = state
        .engine
        .create_customer(&req.user_id, req.email, req.name)
        .await?;
    Ok((StatusCode::CREATED, Json(CreateCustomerResponse { customer_id })))
}

async fn get_customer(
    State(state): State<AppState>,
    Path(customer_id): Path<String>,
) -> ApiResult<Json<CustomerProfile>> {
    Ok(Json(state.engine.get_customer(&customer_id).await?))
}

async fn payments_by_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<Vec<PaymentAttempt>>> {
    Ok(Json(state.queries.get_by_user(&user_id).await?))
}

async fn payment_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<PaymentAttempt>> {
    let id = Uuid::parse_str(&id).map_err(|_| PaymentError::not_found(&id))?;
    Ok(Json(state.queries.get_by_id(id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::fake::{FakeGateway, VALID_SIGNATURE};
    use crate::payments::model::PaymentStatus;
    use crate::payments::store::RedbPaymentStore;
    use rust_decimal_macros::dec;

    fn state() -> AppState {
        let store = Arc::new(RedbPaymentStore::in_memory().unwrap());
        let engine = ReconciliationEngine::new(Arc::new(FakeGateway::new()), store.clone());
        AppState {
            engine: Arc::new(engine),
            queries: PaymentQueries::new(store),
        }
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn create_request(amount: Decimal) -> CreateIntentRequest {
        serde_json::from_value(serde_json::json!({
            "userId": "u1",
            "amount": amount,
            "currency": "EUR",
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = health_check().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_create_request_defaults_to_usd() {
        let req: CreateIntentRequest =
            serde_json::from_str(r#"{"userId":"u1","amount":12.5}"#).unwrap();
        assert_eq!(req.currency, "USD");
        assert_eq!(req.amount, dec!(12.5));
        assert!(req.metadata.is_empty());
    }

    #[tokio::test]
    async fn test_create_then_lookup() {
        let state = state();
        let response = create_intent(State(state.clone()), ApiJson(create_request(dec!(100))))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: serde_json::Value = body_json(response).await;
        assert_eq!(created["paymentIntentId"], "pi_1");
        assert_eq!(created["clientSecret"], "pi_1_secret");
        assert_eq!(created["customerId"], "cus_1");
        let payment_id = created["paymentId"].as_str().unwrap().to_string();

        let response = payment_by_id(State(state.clone()), Path(payment_id.clone()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let record: serde_json::Value = body_json(response).await;
        assert_eq!(record["status"], "pending");
        assert_eq!(record["userId"], "u1");

        let response = payments_by_user(State(state), Path("u1".to_string()))
            .await
            .into_response();
        let records: Vec<serde_json::Value> = body_json(response).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["id"], payment_id);
    }

    #[tokio::test]
    async fn test_create_invalid_amount_is_bad_request() {
        let response = create_intent(State(state()), ApiJson(create_request(dec!(0))))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: ErrorBody = body_json(response).await;
        assert_eq!(body.error, "validation_error");
    }

    #[tokio::test]
    async fn test_payment_by_id_not_found() {
        let response = payment_by_id(State(state()), Path(Uuid::new_v4().to_string()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = payment_by_id(State(state()), Path("not-a-uuid".to_string()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_webhook_missing_signature() {
        let response = handle_webhook(State(state()), HeaderMap::new(), Bytes::from("{}"))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body: ErrorBody = body_json(response).await;
        assert_eq!(body.error, "signature_invalid");
    }

    #[tokio::test]
    async fn test_webhook_applies_event() {
        let state = state();
        create_intent(State(state.clone()), ApiJson(create_request(dec!(100))))
            .await
            .into_response();

        let mut headers = HeaderMap::new();
        headers.insert("stripe-signature", VALID_SIGNATURE.parse().unwrap());
        let payload = FakeGateway::webhook_payload("evt_1", "payment_intent.succeeded", "pi_1", None);
        let response = handle_webhook(State(state.clone()), headers, Bytes::from(payload))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let ack: serde_json::Value = body_json(response).await;
        assert_eq!(ack, serde_json::json!({ "received": true }));

        let records = state.queries.get_by_user("u1").await.unwrap();
        assert_eq!(records[0].status, PaymentStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_refund_unknown_intent_is_not_found() {
        let req = RefundRequestBody {
            payment_intent_id: "pi_missing".to_string(),
            amount: None,
            idempotency_key: None,
        };
        let response = refund_payment(State(state()), ApiJson(req)).await.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: ErrorBody = body_json(response).await;
        assert_eq!(body.message, "Payment not found: pi_missing");
    }

    #[tokio::test]
    async fn test_confirm_and_refund_flow() {
        let state = state();
        create_intent(State(state.clone()), ApiJson(create_request(dec!(100))))
            .await
            .into_response();

        let req = ConfirmRequest {
            payment_intent_id: "pi_1".to_string(),
            payment_method_id: Some("pm_card_visa".to_string()),
        };
        let response = confirm_payment(State(state.clone()), ApiJson(req))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let confirmation: serde_json::Value = body_json(response).await;
        assert_eq!(confirmation["status"], "succeeded");
        assert_eq!(confirmation["paymentIntent"]["id"], "pi_1");

        let req = RefundRequestBody {
            payment_intent_id: "pi_1".to_string(),
            amount: Some(dec!(10)),
            idempotency_key: Some("refund-attempt-1".to_string()),
        };
        let response = refund_payment(State(state), ApiJson(req)).await.into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
        let receipt: serde_json::Value = body_json(response).await;
        assert_eq!(receipt["refundId"], "re_1");
        assert_eq!(receipt["status"], "succeeded");
    }

    #[tokio::test]
    async fn test_customer_routes() {
        let state = state();
        let req = CreateCustomerRequest {
            user_id: "u1".to_string(),
            email: None,
            name: None,
        };
        let response = create_customer(State(state.clone()), ApiJson(req))
            .await
            .into_response();
        let created: CreateCustomerResponse = body_json(response).await;
        assert_eq!(created.customer_id, "cus_1");

        let response = get_customer(State(state), Path("cus_1".to_string()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let profile: serde_json::Value = body_json(response).await;
        assert_eq!(profile["id"], "cus_1");
    }

    async fn extract<T: DeserializeOwned>(body: &'static str) -> Result<ApiJson<T>, ApiError> {
        let req = http::Request::builder()
            .method("POST")
            .uri("/payments/create-intent")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(body))
            .unwrap();
        ApiJson::<T>::from_request(req, &()).await
    }

    async fn assert_validation_error(result: Result<ApiJson<CreateIntentRequest>, ApiError>) -> String {
        let Err(err) = result else {
            panic!("body should have been rejected");
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: ErrorBody = body_json(response).await;
        assert_eq!(body.error, "validation_error");
        body.message
    }

    #[tokio::test]
    async fn test_body_missing_user_id_is_validation_error() {
        let message =
            assert_validation_error(extract(r#"{"amount":10,"currency":"EUR"}"#).await).await;
        assert!(message.contains("userId"));
    }

    #[tokio::test]
    async fn test_body_non_numeric_amount_is_validation_error() {
        assert_validation_error(extract(r#"{"userId":"u1","amount":"ten"}"#).await).await;
    }

    #[tokio::test]
    async fn test_body_not_json_is_validation_error() {
        assert_validation_error(extract("amount=10&userId=u1").await).await;
    }

    #[tokio::test]
    async fn test_body_without_json_content_type_is_validation_error() {
        let req = http::Request::builder()
            .method("POST")
            .uri("/payments/create-intent")
            .body(axum::body::Body::from(r#"{"userId":"u1","amount":10}"#))
            .unwrap();
        let result = ApiJson::<CreateIntentRequest>::from_request(req, &()).await;
        assert_validation_error(result).await;
    }

    #[tokio::test]
    async fn test_well_formed_body_is_extracted() {
        let ApiJson(req) = extract::<CreateIntentRequest>(r#"{"userId":"u1","amount":"12.50"}"#)
            .await
            .unwrap();
        assert_eq!(req.user_id, "u1");
        assert_eq!(req.amount, dec!(12.50));
    }

    #[tokio::test]
    async fn test_malformed_bodies_over_http_are_bad_requests() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state())).await.unwrap();
        });

        let client = reqwest::Client::new();
        for (path, body) in [
            ("/payments/create-intent", r#"{"amount":10}"#),
            ("/payments/create-intent", r#"{"userId":"u1","amount":"ten"}"#),
            ("/payments/confirm", "not json"),
            ("/payments/refund", r#"{"amount":1}"#),
            ("/payments/customers", "{"),
        ] {
            let response = client
                .post(format!("http://{addr}{path}"))
                .header("content-type", "application/json")
                .body(body)
                .send()
                .await
                .unwrap();
            assert_eq!(response.status().as_u16(), 400, "{path} {body}");
            let body: serde_json::Value = serde_json::from_str(&response.text().await.unwrap()).unwrap();
            assert_eq!(body["error"], "validation_error");
        }
    }

    #[test]
    fn test_router_builds() {
        let _ = router(state());
    }
}
