use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    PaymentReceived,
    BookingAccepted,
    BookingRejected,
    BookingCompleted,
    BookingCancelled,
    BookingExpired,
    PaymentFailed,
}

/// A notice for one user about one booking.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Notification {
    pub user_id: String,
    pub event: NotificationEvent,
    pub title: String,
    pub body: String,
    pub booking_id: String,
}

impl Notification {
    pub fn new(user_id: &str, event: NotificationEvent, booking_id: &str) -> Self {
        let (title, body) = match event {
            NotificationEvent::PaymentReceived => (
                "New booking request",
                "A client has paid for a booking and is waiting for your answer.",
            ),
            NotificationEvent::BookingAccepted => (
                "Booking accepted",
                "Your booking has been accepted.",
            ),
            NotificationEvent::BookingRejected => (
                "Booking declined",
                "Your booking was declined. Any payment is being refunded.",
            ),
            NotificationEvent::BookingCompleted => (
                "Booking completed",
                "Your booking has been marked as completed.",
            ),
            NotificationEvent::BookingCancelled => (
                "Booking cancelled",
                "A booking was cancelled. Any payment is being refunded.",
            ),
            NotificationEvent::BookingExpired => (
                "Booking expired",
                "The booking was not answered in time. Any payment is being refunded.",
            ),
            NotificationEvent::PaymentFailed => (
                "Payment failed",
                "The payment for your booking did not go through.",
            ),
        };

        Self {
            user_id: user_id.to_string(),
            event,
            title: title.to_string(),
            body: body.to_string(),
            booking_id: booking_id.to_string(),
        }
    }
}
