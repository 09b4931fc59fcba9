use crate::domain::booking::CompoundState;
use crate::domain::money::Money;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum BookingError {
    #[error("Validation error: {0}")]
    #[diagnostic(code(escrowbook::validation))]
    ValidationError(String),

    #[error("Authorization error: {0}")]
    #[diagnostic(code(escrowbook::authorization))]
    AuthorizationError(String),

    #[error("Invalid transition: cannot {action} a booking in state {from}")]
    #[diagnostic(code(escrowbook::invalid_transition))]
    InvalidTransition {
        action: &'static str,
        from: CompoundState,
    },

    #[error(
        "Payment amount mismatch for booking {booking_id}: expected {expected}, received {received}"
    )]
    #[diagnostic(
        code(escrowbook::amount_mismatch),
        help("captured amount differs from the booking total; review manually before any retry")
    )]
    PaymentAmountMismatch {
        booking_id: String,
        expected: Money,
        received: Money,
    },

    #[error("Payment gateway error: {0}")]
    #[diagnostic(code(escrowbook::gateway))]
    PaymentGatewayError(String),

    #[error("Webhook signature verification failed")]
    #[diagnostic(code(escrowbook::signature))]
    SignatureVerificationError,

    #[error("Refund failed for booking {booking_id}: {reason}")]
    #[diagnostic(code(escrowbook::refund))]
    RefundFailure { booking_id: String, reason: String },

    #[error("Not found: {0}")]
    #[diagnostic(code(escrowbook::not_found))]
    NotFound(String),

    #[error("Booking {0} was modified concurrently")]
    #[diagnostic(code(escrowbook::conflict))]
    ConcurrentModification(String),

    #[error("CSV error: {0}")]
    #[diagnostic(code(escrowbook::csv))]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    #[diagnostic(code(escrowbook::io))]
    IoError(#[from] std::io::Error),

    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    #[diagnostic(code(escrowbook::rocksdb))]
    RocksDbError(#[from] rocksdb::Error),

    #[error("Internal error: {0}")]
    #[diagnostic(code(escrowbook::internal))]
    InternalError(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl BookingError {
    /// Whether a later sweep or caller retry may succeed without human review.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PaymentGatewayError(_)
                | Self::RefundFailure { .. }
                | Self::ConcurrentModification(_)
        )
    }
}

impl From<serde_json::Error> for BookingError {
    fn from(err: serde_json::Error) -> Self {
        Self::InternalError(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, BookingError>;
