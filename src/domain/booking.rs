use super::commission::Split;
use super::money::Money;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix of the gateway reference derived from a booking id.
pub const REFERENCE_PREFIX: &str = "BK-";

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Accepted,
    Rejected,
    Completed,
    Cancelled,
    Expired,
}

impl BookingStatus {
    /// Terminal statuses are kept for audit and never leave their status again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::Completed | Self::Cancelled | Self::Expired
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    RefundPending,
    Refunded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::RefundPending => "refund_pending",
            Self::Refunded => "refunded",
            Self::Failed => "failed",
        }
    }
}

/// The pair of statuses that together describe where a booking is.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
pub struct CompoundState {
    pub booking: BookingStatus,
    pub payment: PaymentStatus,
}

impl CompoundState {
    pub const fn new(booking: BookingStatus, payment: PaymentStatus) -> Self {
        Self { booking, payment }
    }
}

impl fmt::Display for CompoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.booking.as_str(), self.payment.as_str())
    }
}

/// A reservation of a companion's time by a client.
///
/// Parties, schedule and money are fixed at creation. Only the state machine and the
/// expiration sweep mutate the status fields, and every write bumps `version` so the
/// repository can reject stale read-modify-write cycles.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Booking {
    pub id: String,
    pub client_id: String,
    pub companion_id: String,
    pub start_time: DateTime<Utc>,
    pub duration_hours: u32,
    pub hourly_rate: Money,
    /// Commission in effect when the booking was created.
    pub commission_percentage: Decimal,
    pub total_amount: Money,
    pub platform_fee: Money,
    pub companion_earnings: Money,
    pub booking_status: BookingStatus,
    pub payment_status: PaymentStatus,
    /// Set once by payment initialization, never replaced.
    pub payment_reference: Option<String>,
    pub authorization_url: Option<String>,
    pub settlement_target: Option<String>,
    pub refund_id: Option<String>,
    /// Payment leg needs an operator because an automatic refund did not go through.
    pub needs_reconciliation: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

/// Everything needed to create a booking once the price has been split.
#[derive(Debug, Clone)]
pub struct BookingDraft {
    pub id: String,
    pub client_id: String,
    pub companion_id: String,
    pub start_time: DateTime<Utc>,
    pub duration_hours: u32,
    pub hourly_rate: Money,
    pub commission_percentage: Decimal,
    pub split: Split,
}

impl Booking {
    pub fn new(draft: BookingDraft, created_at: DateTime<Utc>, expiration_window: Duration) -> Self {
        Self {
            id: draft.id,
            client_id: draft.client_id,
            companion_id: draft.companion_id,
            start_time: draft.start_time,
            duration_hours: draft.duration_hours,
            hourly_rate: draft.hourly_rate,
            commission_percentage: draft.commission_percentage,
            total_amount: draft.split.total_amount,
            platform_fee: draft.split.platform_fee,
            companion_earnings: draft.split.companion_earnings,
            booking_status: BookingStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_reference: None,
            authorization_url: None,
            settlement_target: None,
            refund_id: None,
            needs_reconciliation: false,
            created_at,
            expires_at: created_at + expiration_window,
            updated_at: created_at,
            version: 0,
        }
    }

    pub fn state(&self) -> CompoundState {
        CompoundState::new(self.booking_status, self.payment_status)
    }

    pub fn set_state(&mut self, state: CompoundState) {
        self.booking_status = state.booking;
        self.payment_status = state.payment;
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time + Duration::hours(i64::from(self.duration_hours))
    }

    pub fn is_party(&self, user_id: &str) -> bool {
        self.client_id == user_id || self.companion_id == user_id
    }

    /// The party on the other side of `user_id`. The client is the default recipient for
    /// system-originated events.
    pub fn counterparty_of(&self, user_id: &str) -> &str {
        if user_id == self.client_id {
            &self.companion_id
        } else {
            &self.client_id
        }
    }

    /// Inclusive: a booking created at `T` is past a 24h window at exactly `T + 24h`.
    pub fn is_past_window(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Reference handed to the gateway, stable across retries of the same booking.
    pub fn derived_reference(&self) -> String {
        format!("{REFERENCE_PREFIX}{}", self.id)
    }
}
