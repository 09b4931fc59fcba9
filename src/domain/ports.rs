use super::booking::{Booking, CompoundState};
use super::notification::Notification;
use super::payment::{
    InitializePayment, PaymentSession, PaymentVerification, RefundReceipt, SubaccountRequest,
};
use super::profile::{PlatformSettings, Profile};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn insert(&self, booking: Booking) -> Result<()>;
    async fn get(&self, booking_id: &str) -> Result<Option<Booking>>;
    /// Replaces the stored booking only if its version still equals `expected_version`.
    ///
    /// Returns `false` when another writer got there first. Implementations must make the
    /// compare and the write a single atomic step.
    async fn update_if(&self, booking: Booking, expected_version: u64) -> Result<bool>;
    async fn find_by_state(&self, state: CompoundState) -> Result<Vec<Booking>>;
    async fn all(&self) -> Result<Vec<Booking>>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>>;
    async fn increment_booking_count(&self, companion_id: &str) -> Result<()>;
    async fn set_subaccount_code(&self, companion_id: &str, code: &str) -> Result<()>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn platform_settings(&self) -> Result<PlatformSettings>;
}

/// Append-only set of gateway event ids that have been applied.
#[async_trait]
pub trait WebhookLedger: Send + Sync {
    async fn contains(&self, event_id: &str) -> Result<bool>;
    /// Inserts the id if absent. Returns `false` when it was already recorded.
    async fn record(&self, event_id: &str, processed_at: DateTime<Utc>) -> Result<bool>;
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initialize(&self, request: InitializePayment) -> Result<PaymentSession>;
    async fn verify(&self, reference: &str) -> Result<PaymentVerification>;
    async fn refund(&self, reference: &str) -> Result<RefundReceipt>;
    async fn create_subaccount(&self, request: SubaccountRequest) -> Result<String>;
}

/// Best-effort delivery of notices; callers log and drop failures.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<()>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub type BookingRepositoryBox = Box<dyn BookingRepository>;
pub type ProfileStoreBox = Box<dyn ProfileStore>;
pub type SettingsStoreBox = Box<dyn SettingsStore>;
pub type WebhookLedgerBox = Box<dyn WebhookLedger>;
pub type PaymentGatewayBox = Box<dyn PaymentGateway>;
pub type NotificationDispatcherBox = Box<dyn NotificationDispatcher>;
pub type ClockBox = Box<dyn Clock>;

pub type BookingRepositoryFactory = Box<dyn Fn() -> BookingRepositoryBox + Send + Sync>;
