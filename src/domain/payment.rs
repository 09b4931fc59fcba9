use super::money::Money;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata key that carries the booking id through the gateway and back on webhooks.
pub const METADATA_BOOKING_ID: &str = "booking_id";

/// A request to start collecting a payment.
#[derive(Debug, Clone, PartialEq)]
pub struct InitializePayment {
    pub payer_email: String,
    pub amount: Money,
    pub reference: String,
    pub metadata: BTreeMap<String, String>,
    /// Payee sub-account that receives its share at capture time.
    pub settlement_target: Option<String>,
    /// Flat amount kept by the platform when a settlement target is present.
    pub platform_fee: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSession {
    pub authorization_url: String,
    pub reference: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentVerification {
    pub reference: String,
    pub status: VerificationStatus,
    pub amount: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundReceipt {
    pub refund_id: String,
    pub status: RefundStatus,
}

/// Registration of a payee that shares in captured payments.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubaccountRequest {
    pub business_name: String,
    pub settlement_bank: String,
    pub account_number: String,
    /// Share of each transaction retained by the platform, in percent.
    pub percentage_charge: rust_decimal::Decimal,
}
