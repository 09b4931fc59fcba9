//! Inbound payment gateway callbacks.
//!
//! A callback is only applied after its signature checks out and its event id is absent
//! from the ledger. The id is recorded after the engine accepted the event, so a callback
//! that failed on a transient error is applied again when the gateway redelivers it.
//!
//! A `charge.success` callback is never taken at its word: the reference is verified with
//! the gateway and the verified amount is what gets compared against the booking.

use super::engine::BookingEngine;
use crate::domain::actor::Actor;
use crate::domain::booking::{Booking, REFERENCE_PREFIX};
use crate::domain::money::Money;
use crate::domain::payment::METADATA_BOOKING_ID;
use crate::domain::ports::WebhookLedgerBox;
use crate::error::{BookingError, Result};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha512;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

type HmacSha512 = Hmac<Sha512>;

/// Header the gateway puts the hex signature in.
pub const SIGNATURE_HEADER: &str = "X-Signature";

pub const EVENT_CHARGE_SUCCESS: &str = "charge.success";
pub const EVENT_CHARGE_FAILED: &str = "charge.failed";
pub const EVENT_REFUND_PROCESSED: &str = "refund.processed";

/// HMAC-SHA512 over the raw request body, keyed with the shared secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Vec<u8>,
}

impl WebhookVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self) -> Result<HmacSha512> {
        HmacSha512::new_from_slice(&self.secret).map_err(|_| {
            BookingError::InternalError(Box::new(std::io::Error::other(
                "invalid webhook secret length",
            )))
        })
    }

    /// Lower-case hex signature of `body`, as the gateway would send it.
    pub fn sign(&self, body: &[u8]) -> Result<String> {
        let mut mac = self.mac()?;
        mac.update(body);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    pub fn verify(&self, body: &[u8], signature: &str) -> Result<()> {
        let expected = hex::decode(signature.trim())
            .map_err(|_| BookingError::SignatureVerificationError)?;
        let mut mac = self.mac()?;
        mac.update(body);
        mac.verify_slice(&expected)
            .map_err(|_| BookingError::SignatureVerificationError)
    }
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    event: String,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    reference: Option<String>,
    /// Minor units.
    #[serde(default)]
    amount: Option<i64>,
    #[serde(default)]
    metadata: Option<BTreeMap<String, serde_json::Value>>,
    /// Refund events carry the refunded transaction's reference here.
    #[serde(default)]
    transaction_reference: Option<String>,
}

impl EventData {
    fn id_string(&self) -> Option<String> {
        match self.id.as_ref()? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    fn payment_reference(&self) -> Option<&str> {
        self.transaction_reference
            .as_deref()
            .or(self.reference.as_deref())
    }

    /// Booking id from the metadata round-tripped through the gateway, or from the
    /// reference derived from it.
    fn booking_id(&self) -> Option<String> {
        let from_metadata = self
            .metadata
            .as_ref()
            .and_then(|m| m.get(METADATA_BOOKING_ID))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        from_metadata.or_else(|| {
            self.payment_reference()
                .and_then(|r| r.strip_prefix(REFERENCE_PREFIX))
                .map(str::to_string)
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    Applied(Booking),
    /// The event id was already in the ledger; nothing was re-applied.
    Duplicate,
    /// Acknowledged and recorded without touching any booking.
    Ignored { reason: String },
}

/// Authenticates, deduplicates and applies gateway callbacks.
pub struct WebhookProcessor {
    engine: Arc<BookingEngine>,
    ledger: WebhookLedgerBox,
    verifier: WebhookVerifier,
}

impl WebhookProcessor {
    pub fn new(engine: Arc<BookingEngine>, ledger: WebhookLedgerBox, verifier: WebhookVerifier) -> Self {
        Self {
            engine,
            ledger,
            verifier,
        }
    }

    pub async fn process(&self, body: &[u8], signature: &str) -> Result<WebhookOutcome> {
        if let Err(e) = self.verifier.verify(body, signature) {
            warn!("webhook rejected: bad signature");
            return Err(e);
        }

        let payload: WebhookPayload = serde_json::from_slice(body)
            .map_err(|e| BookingError::ValidationError(format!("malformed webhook body: {e}")))?;
        let event_id = event_id(&payload)?;

        if self.ledger.contains(&event_id).await? {
            debug!(%event_id, "webhook replay ignored");
            return Ok(WebhookOutcome::Duplicate);
        }

        let outcome = match self.apply(&payload).await {
            Ok(outcome) => outcome,
            Err(BookingError::InvalidTransition { action, from }) => {
                warn!(%event_id, action, %from, "webhook does not apply to booking state");
                WebhookOutcome::Ignored {
                    reason: format!("cannot {action} a booking in {from}"),
                }
            }
            Err(e) => return Err(e),
        };

        if !self.ledger.record(&event_id, self.engine.now()).await? {
            // a concurrent delivery of the same event won the insert
            debug!(%event_id, "webhook recorded concurrently");
            return Ok(WebhookOutcome::Duplicate);
        }
        info!(%event_id, event = %payload.event, "webhook processed");
        Ok(outcome)
    }

    async fn apply(&self, payload: &WebhookPayload) -> Result<WebhookOutcome> {
        let system = Actor::system();
        let data = &payload.data;

        let booking = match payload.event.as_str() {
            EVENT_CHARGE_SUCCESS => {
                let booking_id = require_booking_id(data)?;
                let reference = data.reference.as_deref().ok_or_else(|| {
                    BookingError::ValidationError("charge event has no reference".to_string())
                })?;
                let amount = data.amount.ok_or_else(|| {
                    BookingError::ValidationError("charge event has no amount".to_string())
                })?;
                self.check_reported_amount(&booking_id, Money::from_minor_units(amount))
                    .await?;
                self.engine
                    .verify_reference(&system, &booking_id, reference)
                    .await?
            }
            EVENT_CHARGE_FAILED => {
                let booking_id = require_booking_id(data)?;
                self.engine.fail_payment(&system, &booking_id).await?
            }
            EVENT_REFUND_PROCESSED => {
                let booking_id = require_booking_id(data)?;
                self.engine.settle_refund(&booking_id, data.id_string()).await?
            }
            other => {
                debug!(event = other, "unhandled webhook event");
                return Ok(WebhookOutcome::Ignored {
                    reason: format!("unhandled event {other}"),
                });
            }
        };
        Ok(WebhookOutcome::Applied(booking))
    }

    /// Turns away a callback whose own amount already disagrees with the booking, before
    /// asking the gateway.
    async fn check_reported_amount(&self, booking_id: &str, reported: Money) -> Result<()> {
        let booking = self.engine.get_booking(&Actor::system(), booking_id).await?;
        if reported != booking.total_amount {
            warn!(%booking_id, expected = %booking.total_amount, %reported, "callback amount does not match booking total");
            return Err(BookingError::PaymentAmountMismatch {
                booking_id: booking_id.to_string(),
                expected: booking.total_amount,
                received: reported,
            });
        }
        Ok(())
    }
}

fn require_booking_id(data: &EventData) -> Result<String> {
    data.booking_id().ok_or_else(|| {
        BookingError::ValidationError("webhook cannot be correlated to a booking".to_string())
    })
}

fn event_id(payload: &WebhookPayload) -> Result<String> {
    let key = payload
        .data
        .id_string()
        .or_else(|| payload.data.reference.clone())
        .ok_or_else(|| BookingError::ValidationError("webhook event has no id".to_string()))?;
    Ok(format!("{}:{key}", payload.event))
}
