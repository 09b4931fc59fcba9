//! HTTPS client for the payment gateway's transaction, refund and sub-account endpoints.
//!
//! Amounts travel in minor units. Every response is wrapped in a
//! `{ status, message, data }` envelope; `status == false` is an error even on HTTP 200.

use crate::config::GatewayConfig;
use crate::domain::money::Money;
use crate::domain::payment::{
    InitializePayment, PaymentSession, PaymentVerification, RefundReceipt, RefundStatus,
    SubaccountRequest, VerificationStatus,
};
use crate::domain::ports::PaymentGateway;
use crate::error::{BookingError, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Serialize)]
struct InitializeBody<'a> {
    email: &'a str,
    amount: i64,
    reference: &'a str,
    metadata: &'a BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    subaccount: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    transaction_charge: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bearer: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    status: String,
    amount: i64,
    reference: String,
}

#[derive(Debug, Serialize)]
struct RefundBody<'a> {
    transaction: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefundData {
    id: serde_json::Value,
    status: RefundStatus,
}

#[derive(Debug, Deserialize)]
struct SubaccountData {
    subaccount_code: String,
}

/// Payment gateway reached over HTTPS with a bearer secret key.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: Client,
    base_url: String,
    secret_key: String,
}

impl HttpPaymentGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BookingError::PaymentGatewayError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            secret_key: config.secret_key.clone(),
        })
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        let response = request
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| BookingError::PaymentGatewayError(format!("{what}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BookingError::PaymentGatewayError(format!(
                "{what}: HTTP {}: {body}",
                status.as_u16()
            )));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| BookingError::PaymentGatewayError(format!("{what}: bad response: {e}")))?;
        if !envelope.status {
            return Err(BookingError::PaymentGatewayError(format!(
                "{what}: {}",
                envelope.message
            )));
        }
        debug!(%what, message = %envelope.message, "gateway call succeeded");
        envelope
            .data
            .ok_or_else(|| BookingError::PaymentGatewayError(format!("{what}: response has no data")))
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn initialize(&self, request: InitializePayment) -> Result<PaymentSession> {
        let amount = request.amount.to_minor_units()?;
        let split = match &request.settlement_target {
            Some(code) => Some((code.as_str(), request.platform_fee.to_minor_units()?)),
            None => None,
        };
        let body = InitializeBody {
            email: &request.payer_email,
            amount,
            reference: &request.reference,
            metadata: &request.metadata,
            subaccount: split.map(|(code, _)| code),
            transaction_charge: split.map(|(_, fee)| fee),
            bearer: split.map(|_| "subaccount"),
        };

        let data: InitializeData = self
            .send(
                self.client
                    .post(format!("{}/transaction/initialize", self.base_url))
                    .json(&body),
                "initialize",
            )
            .await?;

        Ok(PaymentSession {
            authorization_url: data.authorization_url,
            reference: data.reference,
        })
    }

    async fn verify(&self, reference: &str) -> Result<PaymentVerification> {
        let data: VerifyData = self
            .send(
                self.client
                    .get(format!("{}/transaction/verify/{reference}", self.base_url)),
                "verify",
            )
            .await?;

        let status = match data.status.as_str() {
            "success" => VerificationStatus::Success,
            "failed" | "abandoned" | "reversed" => VerificationStatus::Failed,
            other => {
                return Err(BookingError::PaymentGatewayError(format!(
                    "verify: payment {reference} is still {other}"
                )));
            }
        };

        Ok(PaymentVerification {
            reference: data.reference,
            status,
            amount: Money::from_minor_units(data.amount),
        })
    }

    async fn refund(&self, reference: &str) -> Result<RefundReceipt> {
        let data: RefundData = self
            .send(
                self.client
                    .post(format!("{}/refund", self.base_url))
                    .json(&RefundBody {
                        transaction: reference,
                    }),
                "refund",
            )
            .await?;

        let refund_id = match data.id {
            serde_json::Value::String(id) => id,
            other => other.to_string(),
        };
        Ok(RefundReceipt {
            refund_id,
            status: data.status,
        })
    }

    async fn create_subaccount(&self, request: SubaccountRequest) -> Result<String> {
        let data: SubaccountData = self
            .send(
                self.client
                    .post(format!("{}/subaccount", self.base_url))
                    .json(&request),
                "create subaccount",
            )
            .await?;
        Ok(data.subaccount_code)
    }
}
