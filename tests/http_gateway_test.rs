use escrowbook::config::GatewayConfig;
use escrowbook::domain::money::Money;
use escrowbook::domain::payment::{
    InitializePayment, METADATA_BOOKING_ID, RefundStatus, SubaccountRequest, VerificationStatus,
};
use escrowbook::domain::ports::PaymentGateway;
use escrowbook::error::BookingError;
use escrowbook::infrastructure::http_gateway::HttpPaymentGateway;
use rust_decimal_macros::dec;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SECRET: &str = "sk_test_gateway";

fn gateway(server: &MockServer, timeout: Duration) -> HttpPaymentGateway {
    let config = GatewayConfig::new(&format!("{}/", server.uri()), SECRET, timeout).unwrap();
    HttpPaymentGateway::new(&config).unwrap()
}

fn request(settlement_target: Option<&str>) -> InitializePayment {
    InitializePayment {
        payer_email: "alice@example.com".to_string(),
        amount: Money::new(dec!(100.00)),
        reference: "BK-b-1".to_string(),
        metadata: BTreeMap::from([(METADATA_BOOKING_ID.to_string(), "b-1".to_string())]),
        settlement_target: settlement_target.map(str::to_string),
        platform_fee: Money::new(dec!(15.00)),
    }
}

#[tokio::test]
async fn test_initialize_sends_minor_units_and_split() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/transaction/initialize"))
        .and(header("authorization", format!("Bearer {SECRET}").as_str()))
        .and(body_partial_json(json!({
            "email": "alice@example.com",
            "amount": 10000,
            "reference": "BK-b-1",
            "metadata": { "booking_id": "b-1" },
            "subaccount": "ACCT_bob",
            "transaction_charge": 1500,
            "bearer": "subaccount",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": true,
            "message": "Authorization URL created",
            "data": {
                "authorization_url": "https://checkout.example.com/abc",
                "access_code": "abc",
                "reference": "BK-b-1",
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let session = gateway(&server, Duration::from_secs(5))
        .initialize(request(Some("ACCT_bob")))
        .await
        .unwrap();
    assert_eq!(session.reference, "BK-b-1");
    assert_eq!(session.authorization_url, "https://checkout.example.com/abc");
}

#[tokio::test]
async fn test_verify_maps_status_and_amount() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/transaction/verify/BK-b-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": true,
            "message": "Verification successful",
            "data": { "status": "success", "amount": 10000, "reference": "BK-b-1" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/transaction/verify/BK-b-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": true,
            "message": "Verification successful",
            "data": { "status": "abandoned", "amount": 5000, "reference": "BK-b-2" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/transaction/verify/BK-b-3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": true,
            "message": "Verification successful",
            "data": { "status": "ongoing", "amount": 5000, "reference": "BK-b-3" }
        })))
        .mount(&server)
        .await;

    let gateway = gateway(&server, Duration::from_secs(5));
    let paid = gateway.verify("BK-b-1").await.unwrap();
    assert_eq!(paid.status, VerificationStatus::Success);
    assert_eq!(paid.amount, Money::new(dec!(100)));

    let abandoned = gateway.verify("BK-b-2").await.unwrap();
    assert_eq!(abandoned.status, VerificationStatus::Failed);

    assert!(matches!(
        gateway.verify("BK-b-3").await,
        Err(BookingError::PaymentGatewayError(_))
    ));
}

#[tokio::test]
async fn test_refund_returns_receipt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/refund"))
        .and(body_partial_json(json!({ "transaction": "BK-b-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": true,
            "message": "Refund has been queued for processing",
            "data": { "id": 3018284, "status": "pending" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let receipt = gateway(&server, Duration::from_secs(5))
        .refund("BK-b-1")
        .await
        .unwrap();
    assert_eq!(receipt.refund_id, "3018284");
    assert_eq!(receipt.status, RefundStatus::Pending);
}

#[tokio::test]
async fn test_create_subaccount() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/subaccount"))
        .and(body_partial_json(json!({
            "business_name": "Bob Companion",
            "settlement_bank": "058",
            "account_number": "0123456789",
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "status": true,
            "message": "Subaccount created",
            "data": { "subaccount_code": "ACCT_4hl4xenwpjy5wb" }
        })))
        .mount(&server)
        .await;

    let code = gateway(&server, Duration::from_secs(5))
        .create_subaccount(SubaccountRequest {
            business_name: "Bob Companion".to_string(),
            settlement_bank: "058".to_string(),
            account_number: "0123456789".to_string(),
            percentage_charge: dec!(15),
        })
        .await
        .unwrap();
    assert_eq!(code, "ACCT_4hl4xenwpjy5wb");
}

#[tokio::test]
async fn test_errors_are_gateway_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/refund"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/transaction/verify/BK-b-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": false,
            "message": "Transaction reference not found",
        })))
        .mount(&server)
        .await;

    let gateway = gateway(&server, Duration::from_secs(5));
    let refund = gateway.refund("BK-b-1").await;
    assert!(matches!(refund, Err(BookingError::PaymentGatewayError(_))));
    assert!(refund.unwrap_err().is_retryable());

    let verify = gateway.verify("BK-b-1").await;
    match verify {
        Err(BookingError::PaymentGatewayError(message)) => {
            assert!(message.contains("Transaction reference not found"));
        }
        other => panic!("expected a gateway error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_slow_gateway_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/transaction/verify/BK-b-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(3))
                .set_body_json(json!({
                    "status": true,
                    "message": "Verification successful",
                    "data": { "status": "success", "amount": 10000, "reference": "BK-b-1" }
                })),
        )
        .mount(&server)
        .await;

    let result = gateway(&server, Duration::from_millis(200))
        .verify("BK-b-1")
        .await;
    assert!(matches!(result, Err(BookingError::PaymentGatewayError(_))));
}
