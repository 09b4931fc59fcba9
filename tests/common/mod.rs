#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use escrowbook::application::engine::{BookingEngine, EnginePorts, NewBooking};
use escrowbook::application::webhook::{WebhookProcessor, WebhookVerifier};
use escrowbook::config::EngineConfig;
use escrowbook::domain::actor::Actor;
use escrowbook::domain::booking::{Booking, BookingDraft, CompoundState};
use escrowbook::domain::commission::compute_split;
use escrowbook::domain::money::Money;
use escrowbook::domain::ports::{BookingRepositoryBox, Clock};
use escrowbook::domain::profile::{PlatformSettings, Profile};
use escrowbook::infrastructure::clock::ManualClock;
use escrowbook::infrastructure::in_memory::{
    InMemoryBookingRepository, InMemoryGateway, InMemoryProfileStore, InMemorySettingsStore,
    InMemoryWebhookLedger, RecordingNotifier,
};
use escrowbook::interfaces::csv::booking_writer::BookingWriter;
use rust_decimal_macros::dec;
use serde_json::json;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

pub const WEBHOOK_SECRET: &str = "sk_test_webhook";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 9, 1, 9, 0, 0).unwrap()
}

pub struct Harness {
    pub engine: Arc<BookingEngine>,
    pub webhooks: WebhookProcessor,
    pub gateway: InMemoryGateway,
    pub notifier: RecordingNotifier,
    pub profiles: InMemoryProfileStore,
    pub clock: ManualClock,
}

pub async fn harness() -> Harness {
    harness_with(EngineConfig::default(), Box::new(InMemoryBookingRepository::new())).await
}

/// alice is a client, bob a companion charging 50/h with a settlement sub-account.
/// Commission is 15%.
pub async fn harness_with(config: EngineConfig, bookings: BookingRepositoryBox) -> Harness {
    let clock = ManualClock::new(t0());
    let gateway = InMemoryGateway::new();
    let notifier = RecordingNotifier::new();
    let profiles = InMemoryProfileStore::new();
    profiles.put(Profile::client("alice", "alice@example.com")).await;
    profiles.put(Profile::client("carol", "carol@example.com")).await;
    profiles
        .put(
            Profile::companion("bob", "bob@example.com", Money::new(dec!(50)))
                .with_subaccount("ACCT_bob"),
        )
        .await;

    let engine = Arc::new(BookingEngine::new(
        EnginePorts {
            bookings,
            profiles: Box::new(profiles.clone()),
            settings: Box::new(InMemorySettingsStore::new(PlatformSettings {
                commission_percentage: dec!(15),
            })),
            gateway: Box::new(gateway.clone()),
            notifier: Box::new(notifier.clone()),
            clock: Box::new(clock.clone()),
        },
        config,
    ));
    let webhooks = WebhookProcessor::new(
        engine.clone(),
        Box::new(InMemoryWebhookLedger::new()),
        WebhookVerifier::new(WEBHOOK_SECRET),
    );

    Harness {
        engine,
        webhooks,
        gateway,
        notifier,
        profiles,
        clock,
    }
}

/// A 2 hour booking of bob by alice with its checkout initialized.
pub async fn initialized_booking(h: &Harness) -> Booking {
    let alice = Actor::client("alice");
    let booking = h
        .engine
        .create_booking(
            &alice,
            NewBooking {
                companion_id: "bob".to_string(),
                start_time: h.clock.now() + Duration::days(3),
                duration_hours: 2,
            },
        )
        .await
        .unwrap();
    h.engine.initialize_payment(&alice, &booking.id).await.unwrap();
    h.engine.get_booking(&alice, &booking.id).await.unwrap()
}

/// Signed `charge.success` body for the booking, amount in minor units.
pub fn charge_success(booking: &Booking, event_id: u64, amount_minor: i64) -> (Vec<u8>, String) {
    signed(json!({
        "event": "charge.success",
        "data": {
            "id": event_id,
            "reference": booking.derived_reference(),
            "amount": amount_minor,
            "metadata": { "booking_id": booking.id },
        }
    }))
}

pub fn signed(payload: serde_json::Value) -> (Vec<u8>, String) {
    let body = serde_json::to_vec(&payload).unwrap();
    let signature = WebhookVerifier::new(WEBHOOK_SECRET).sign(&body).unwrap();
    (body, signature)
}

/// Captures the full price in the sandbox gateway, then delivers the gateway's callback.
pub async fn paid_booking(h: &Harness) -> Booking {
    let booking = initialized_booking(h).await;
    capture_full_price(h, &booking);
    let (body, signature) = charge_success(&booking, 1, 10_000);
    h.webhooks.process(&body, &signature).await.unwrap();
    h.engine.get_booking(&Actor::system(), &booking.id).await.unwrap()
}

pub fn capture_full_price(h: &Harness, booking: &Booking) {
    h.gateway
        .capture(&booking.derived_reference(), booking.total_amount);
}

/// A stored booking in `state`, built without going through the engine.
pub fn snapshot_booking(id: &str, created_at: DateTime<Utc>, state: CompoundState) -> Booking {
    let draft = BookingDraft {
        id: id.to_string(),
        client_id: "alice".to_string(),
        companion_id: "bob".to_string(),
        start_time: created_at + Duration::days(3),
        duration_hours: 2,
        hourly_rate: Money::new(dec!(50)),
        commission_percentage: dec!(15),
        split: compute_split(Money::new(dec!(50)), 2, dec!(15)).unwrap(),
    };
    let mut booking = Booking::new(draft, created_at, Duration::hours(24));
    booking.set_state(state);
    if state.payment != escrowbook::domain::booking::PaymentStatus::Pending {
        booking.payment_reference = Some(booking.derived_reference());
    }
    booking
}

pub fn write_snapshot(path: &Path, bookings: Vec<Booking>) {
    let file = File::create(path).unwrap();
    BookingWriter::new(file).write_bookings(bookings).unwrap();
}
