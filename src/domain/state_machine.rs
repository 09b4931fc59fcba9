//! Legal moves of the compound (booking status, payment status) state.
//!
//! [`transition`] is a pure function: it never touches storage or the gateway. Callers
//! persist the returned state and, when `refund_required` is set, issue the refund only
//! after that write has committed.

use super::actor::{Actor, Role};
use super::booking::{Booking, BookingStatus, CompoundState, PaymentStatus};
use crate::error::{BookingError, Result};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    InitializePayment,
    PaymentSucceeded,
    PaymentFailed,
    Accept,
    Reject,
    Complete,
    Cancel,
    Expire { now: DateTime<Utc> },
    RefundSettled,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::InitializePayment => "initialize payment for",
            Self::PaymentSucceeded => "confirm payment for",
            Self::PaymentFailed => "fail payment for",
            Self::Accept => "accept",
            Self::Reject => "reject",
            Self::Complete => "complete",
            Self::Cancel => "cancel",
            Self::Expire { .. } => "expire",
            Self::RefundSettled => "settle refund for",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Move to `to`. When `refund_required` is set the captured payment must be returned.
    Applied {
        to: CompoundState,
        refund_required: bool,
    },
    /// The action was already applied; nothing to write and no side effects.
    Unchanged,
}

impl Transition {
    fn to(booking: BookingStatus, payment: PaymentStatus) -> Self {
        Self::Applied {
            to: CompoundState::new(booking, payment),
            refund_required: false,
        }
    }

    fn to_with_refund(booking: BookingStatus) -> Self {
        Self::Applied {
            to: CompoundState::new(booking, PaymentStatus::RefundPending),
            refund_required: true,
        }
    }
}

/// Decides the next compound state for `action` taken by `actor` on `booking`.
///
/// Authorization is checked before legality, so a stranger always gets
/// `AuthorizationError` regardless of the booking's state.
pub fn transition(booking: &Booking, action: &Action, actor: &Actor) -> Result<Transition> {
    authorize(booking, action, actor)?;

    use BookingStatus as B;
    use PaymentStatus as P;

    let invalid = || BookingError::InvalidTransition {
        action: action.name(),
        from: booking.state(),
    };

    let next = match (action, booking.booking_status, booking.payment_status) {
        (Action::InitializePayment, B::Pending, P::Pending) => Transition::to(B::Pending, P::Pending),

        (Action::PaymentSucceeded, B::Pending, P::Pending) => Transition::to(B::Pending, P::Paid),
        (Action::PaymentSucceeded, B::Pending | B::Accepted | B::Completed, P::Paid) => {
            Transition::Unchanged
        }
        // Money captured after the booking already ended must go straight back.
        (Action::PaymentSucceeded, b, P::Pending) if b.is_terminal() => {
            Transition::to_with_refund(b)
        }
        (Action::PaymentSucceeded, b, P::RefundPending | P::Refunded) if b.is_terminal() => {
            Transition::Unchanged
        }

        (Action::PaymentFailed, B::Pending, P::Pending) => Transition::to(B::Cancelled, P::Failed),
        (Action::PaymentFailed, _, P::Failed) => Transition::Unchanged,

        (Action::Accept, B::Pending, P::Paid) => Transition::to(B::Accepted, P::Paid),

        (Action::Reject, B::Pending, P::Paid) => Transition::to_with_refund(B::Rejected),
        (Action::Reject, B::Pending, P::Pending) => Transition::to(B::Rejected, P::Pending),

        (Action::Complete, B::Accepted, P::Paid) => Transition::to(B::Completed, P::Paid),

        (Action::Cancel, B::Pending | B::Accepted, P::Paid) => {
            Transition::to_with_refund(B::Cancelled)
        }
        (Action::Cancel, B::Pending, P::Pending) => Transition::to(B::Cancelled, P::Pending),

        (Action::Expire { now }, B::Pending, P::Paid) if booking.is_past_window(*now) => {
            Transition::to_with_refund(B::Expired)
        }
        (Action::Expire { now }, B::Pending, P::Pending) if booking.is_past_window(*now) => {
            Transition::to(B::Expired, P::Pending)
        }

        (Action::RefundSettled, b, P::RefundPending) if b.is_terminal() => {
            Transition::to(b, P::Refunded)
        }
        (Action::RefundSettled, b, P::Refunded) if b.is_terminal() => Transition::Unchanged,

        _ => return Err(invalid()),
    };

    Ok(next)
}

/// Checks that `actor` may take `action` on `booking`, whatever its state.
pub fn authorize(booking: &Booking, action: &Action, actor: &Actor) -> Result<()> {
    let is_client = actor.role == Role::Client && actor.user_id == booking.client_id;
    let is_companion = actor.role == Role::Companion && actor.user_id == booking.companion_id;

    let allowed = match action {
        Action::InitializePayment => is_client,
        Action::PaymentSucceeded | Action::PaymentFailed => actor.is_system() || is_client,
        Action::Accept | Action::Reject | Action::Complete => is_companion,
        Action::Cancel => is_client || is_companion,
        Action::Expire { .. } | Action::RefundSettled => actor.is_system(),
    };

    if allowed {
        Ok(())
    } else {
        Err(BookingError::AuthorizationError(format!(
            "{} ({:?}) may not {} booking {}",
            actor.user_id,
            actor.role,
            action.name(),
            booking.id
        )))
    }
}
