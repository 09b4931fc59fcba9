use crate::domain::booking::{Booking, CompoundState};
use crate::domain::money::Money;
use crate::domain::notification::Notification;
use crate::domain::payment::{
    InitializePayment, PaymentSession, PaymentVerification, RefundReceipt, RefundStatus,
    SubaccountRequest, VerificationStatus,
};
use crate::domain::ports::{
    BookingRepository, NotificationDispatcher, PaymentGateway, ProfileStore, SettingsStore,
    WebhookLedger,
};
use crate::domain::profile::{PlatformSettings, Profile};
use crate::error::{BookingError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::RwLock;

/// A thread-safe in-memory booking repository.
///
/// Uses `Arc<RwLock<HashMap<String, Booking>>>`; the version check and the write in
/// `update_if` happen under one write lock.
#[derive(Default, Clone)]
pub struct InMemoryBookingRepository {
    bookings: Arc<RwLock<HashMap<String, Booking>>>,
}

impl InMemoryBookingRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookingRepository for InMemoryBookingRepository {
    async fn insert(&self, booking: Booking) -> Result<()> {
        let mut bookings = self.bookings.write().await;
        bookings.insert(booking.id.clone(), booking);
        Ok(())
    }

    async fn get(&self, booking_id: &str) -> Result<Option<Booking>> {
        let bookings = self.bookings.read().await;
        Ok(bookings.get(booking_id).cloned())
    }

    async fn update_if(&self, booking: Booking, expected_version: u64) -> Result<bool> {
        let mut bookings = self.bookings.write().await;
        match bookings.get(&booking.id) {
            Some(stored) if stored.version == expected_version => {
                bookings.insert(booking.id.clone(), booking);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(BookingError::NotFound(format!("booking {}", booking.id))),
        }
    }

    async fn find_by_state(&self, state: CompoundState) -> Result<Vec<Booking>> {
        let bookings = self.bookings.read().await;
        Ok(bookings
            .values()
            .filter(|b| b.state() == state)
            .cloned()
            .collect())
    }

    async fn all(&self) -> Result<Vec<Booking>> {
        let bookings = self.bookings.read().await;
        Ok(bookings.values().cloned().collect())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryProfileStore {
    profiles: Arc<RwLock<HashMap<String, Profile>>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, profile: Profile) {
        let mut profiles = self.profiles.write().await;
        profiles.insert(profile.id.clone(), profile);
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        let profiles = self.profiles.read().await;
        Ok(profiles.get(user_id).cloned())
    }

    async fn increment_booking_count(&self, companion_id: &str) -> Result<()> {
        let mut profiles = self.profiles.write().await;
        let profile = profiles
            .get_mut(companion_id)
            .ok_or_else(|| BookingError::NotFound(format!("profile {companion_id}")))?;
        profile.booking_count += 1;
        Ok(())
    }

    async fn set_subaccount_code(&self, companion_id: &str, code: &str) -> Result<()> {
        let mut profiles = self.profiles.write().await;
        let profile = profiles
            .get_mut(companion_id)
            .ok_or_else(|| BookingError::NotFound(format!("profile {companion_id}")))?;
        profile.subaccount_code = Some(code.to_string());
        Ok(())
    }
}

#[derive(Clone)]
pub struct InMemorySettingsStore {
    settings: Arc<RwLock<PlatformSettings>>,
}

impl InMemorySettingsStore {
    pub fn new(settings: PlatformSettings) -> Self {
        Self {
            settings: Arc::new(RwLock::new(settings)),
        }
    }

    pub async fn set_commission(&self, percentage: rust_decimal::Decimal) {
        self.settings.write().await.commission_percentage = percentage;
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn platform_settings(&self) -> Result<PlatformSettings> {
        Ok(*self.settings.read().await)
    }
}

#[derive(Default, Clone)]
pub struct InMemoryWebhookLedger {
    events: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
}

impl InMemoryWebhookLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WebhookLedger for InMemoryWebhookLedger {
    async fn contains(&self, event_id: &str) -> Result<bool> {
        Ok(self.events.read().await.contains_key(event_id))
    }

    async fn record(&self, event_id: &str, processed_at: DateTime<Utc>) -> Result<bool> {
        let mut events = self.events.write().await;
        if events.contains_key(event_id) {
            return Ok(false);
        }
        events.insert(event_id.to_string(), processed_at);
        Ok(true)
    }
}

/// Keeps every notification it is handed, in order.
#[derive(Default, Clone)]
pub struct RecordingNotifier {
    sent: Arc<RwLock<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.read().await.clone()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        self.sent.write().await.push(notification);
        Ok(())
    }
}

#[derive(Default)]
struct GatewayState {
    payments: HashMap<String, (VerificationStatus, Money)>,
    initialized: Vec<InitializePayment>,
    refunds: Vec<String>,
    subaccounts: Vec<SubaccountRequest>,
    refunds_fail: bool,
    refunds_queued: bool,
    unavailable: bool,
    latency: Option<std::time::Duration>,
}

/// A sandbox gateway that settles payments in memory.
///
/// Payments start uncaptured; [`InMemoryGateway::capture`] and [`InMemoryGateway::decline`]
/// play the part of the payer. Failure switches simulate outages.
#[derive(Default, Clone)]
pub struct InMemoryGateway {
    state: Arc<Mutex<GatewayState>>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capture(&self, reference: &str, amount: Money) {
        self.state()
            .payments
            .insert(reference.to_string(), (VerificationStatus::Success, amount));
    }

    pub fn decline(&self, reference: &str) {
        self.state()
            .payments
            .insert(reference.to_string(), (VerificationStatus::Failed, Money::ZERO));
    }

    pub fn fail_refunds(&self, fail: bool) {
        self.state().refunds_fail = fail;
    }

    /// Answer refunds as accepted but not yet processed.
    pub fn queue_refunds(&self, queued: bool) {
        self.state().refunds_queued = queued;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    pub fn set_latency(&self, latency: std::time::Duration) {
        self.state().latency = Some(latency);
    }

    pub fn initialize_calls(&self) -> Vec<InitializePayment> {
        self.state().initialized.clone()
    }

    /// References of every refund attempted, successful or not.
    pub fn refund_calls(&self) -> Vec<String> {
        self.state().refunds.clone()
    }

    async fn simulate_network(&self) -> Result<()> {
        let (latency, unavailable) = {
            let state = self.state();
            (state.latency, state.unavailable)
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if unavailable {
            return Err(BookingError::PaymentGatewayError(
                "sandbox gateway unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for InMemoryGateway {
    async fn initialize(&self, request: InitializePayment) -> Result<PaymentSession> {
        self.simulate_network().await?;
        let reference = request.reference.clone();
        self.state().initialized.push(request);
        Ok(PaymentSession {
            authorization_url: format!("https://checkout.sandbox.local/{reference}"),
            reference,
        })
    }

    async fn verify(&self, reference: &str) -> Result<PaymentVerification> {
        self.simulate_network().await?;
        let (status, amount) = self
            .state()
            .payments
            .get(reference)
            .copied()
            .ok_or_else(|| {
                BookingError::PaymentGatewayError(format!("unknown reference {reference}"))
            })?;
        Ok(PaymentVerification {
            reference: reference.to_string(),
            status,
            amount,
        })
    }

    async fn refund(&self, reference: &str) -> Result<RefundReceipt> {
        self.simulate_network().await?;
        let mut state = self.state();
        state.refunds.push(reference.to_string());
        if state.refunds_fail {
            return Err(BookingError::PaymentGatewayError(format!(
                "refund of {reference} rejected"
            )));
        }
        match state.payments.get(reference) {
            Some((VerificationStatus::Success, _)) => Ok(RefundReceipt {
                refund_id: format!("rf_{}", state.refunds.len()),
                status: if state.refunds_queued {
                    RefundStatus::Pending
                } else {
                    RefundStatus::Processed
                },
            }),
            _ => Err(BookingError::PaymentGatewayError(format!(
                "transaction {reference} was never captured"
            ))),
        }
    }

    async fn create_subaccount(&self, request: SubaccountRequest) -> Result<String> {
        self.simulate_network().await?;
        let mut state = self.state();
        state.subaccounts.push(request);
        Ok(format!("ACCT_{}", state.subaccounts.len()))
    }
}
