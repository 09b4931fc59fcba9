use super::engine::BookingEngine;
use crate::domain::booking::{Booking, BookingStatus, CompoundState, PaymentStatus};
use crate::error::{BookingError, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Counters for one sweep run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Bookings moved to `expired`, paid or not.
    pub expired: usize,
    /// Expired bookings whose refund the gateway took in this run, processed or queued.
    pub refunded: usize,
    /// Expired bookings whose refund failed and now wait for an operator.
    pub flagged: usize,
    /// Bookings a user moved on between the scan and the write.
    pub skipped: usize,
    /// Earlier failed refunds that went through on retry.
    pub refunds_retried: usize,
    pub refunds_still_pending: usize,
    pub errors: usize,
}

enum Expiry {
    Expired(Booking),
    Skipped,
    Failed,
}

/// Forces bookings left `pending` past their window into `expired`.
///
/// The scan only nominates candidates. Each one goes back through the engine, which
/// re-reads the booking and re-checks the guard before writing, so a booking accepted or
/// cancelled after the scan is left alone.
pub struct ExpirationSweeper {
    engine: Arc<BookingEngine>,
}

impl ExpirationSweeper {
    pub fn new(engine: Arc<BookingEngine>) -> Self {
        Self { engine }
    }

    /// Runs one pass at `now`. Per-booking failures are counted and logged; only a failed
    /// scan aborts the run.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let repo = self.engine.repository();

        let mut candidates = Vec::new();
        for payment in [PaymentStatus::Paid, PaymentStatus::Pending] {
            let stuck = repo
                .find_by_state(CompoundState::new(BookingStatus::Pending, payment))
                .await?;
            candidates.extend(stuck.into_iter().filter(|b| b.is_past_window(now)));
        }
        debug!(candidates = candidates.len(), %now, "sweep scan complete");

        let concurrency = self.engine.config().sweep_concurrency.max(1);
        let outcomes: Vec<Expiry> = stream::iter(candidates)
            .map(|booking| self.expire_one(booking, now))
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut touched = HashSet::new();
        for outcome in outcomes {
            match outcome {
                Expiry::Expired(booking) => {
                    report.expired += 1;
                    match (booking.payment_status, booking.needs_reconciliation) {
                        (PaymentStatus::RefundPending, true) => report.flagged += 1,
                        (PaymentStatus::Refunded | PaymentStatus::RefundPending, false) => {
                            report.refunded += 1
                        }
                        _ => {}
                    }
                    touched.insert(booking.id);
                }
                Expiry::Skipped => report.skipped += 1,
                Expiry::Failed => report.errors += 1,
            }
        }

        self.retry_refunds(&touched, &mut report).await?;

        info!(
            expired = report.expired,
            refunded = report.refunded,
            flagged = report.flagged,
            skipped = report.skipped,
            retried = report.refunds_retried,
            errors = report.errors,
            "sweep finished"
        );
        Ok(report)
    }

    async fn expire_one(&self, booking: Booking, now: DateTime<Utc>) -> Expiry {
        match self.engine.expire(&booking.id, now).await {
            Ok(expired) => Expiry::Expired(expired),
            Err(BookingError::InvalidTransition { from, .. }) => {
                debug!(booking_id = %booking.id, %from, "booking moved on since the scan; not expiring");
                Expiry::Skipped
            }
            Err(e) => {
                error!(booking_id = %booking.id, error = %e, "failed to expire booking");
                Expiry::Failed
            }
        }
    }

    /// Re-attempts refunds flagged for reconciliation, leaving out bookings this run just
    /// tried. An unflagged `refund_pending` booking may have its refund call still in flight.
    async fn retry_refunds(&self, touched: &HashSet<String>, report: &mut SweepReport) -> Result<()> {
        let repo = self.engine.repository();
        let mut pending = Vec::new();
        for status in [
            BookingStatus::Rejected,
            BookingStatus::Cancelled,
            BookingStatus::Expired,
        ] {
            let stuck = repo
                .find_by_state(CompoundState::new(status, PaymentStatus::RefundPending))
                .await?;
            pending.extend(
                stuck
                    .into_iter()
                    .filter(|b| b.needs_reconciliation && !touched.contains(&b.id)),
            );
        }

        let concurrency = self.engine.config().sweep_concurrency.max(1);
        let results: Vec<(String, Result<Booking>)> = stream::iter(pending)
            .map(|booking| async move {
                let result = self.engine.retry_refund(&booking.id).await;
                (booking.id, result)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        for (booking_id, result) in results {
            match result {
                Ok(_) => report.refunds_retried += 1,
                Err(BookingError::RefundFailure { reason, .. }) => {
                    warn!(%booking_id, %reason, "refund retry failed");
                    report.refunds_still_pending += 1;
                }
                Err(BookingError::InvalidTransition { .. }) => {
                    debug!(%booking_id, "refund settled since the scan");
                }
                Err(e) => {
                    error!(%booking_id, error = %e, "refund retry errored");
                    report.errors += 1;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::engine::{EnginePorts, NewBooking};
    use crate::config::EngineConfig;
    use crate::domain::actor::Actor;
    use crate::domain::money::Money;
    use crate::domain::ports::{BookingRepository, Clock};
    use crate::domain::profile::{PlatformSettings, Profile};
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::in_memory::{
        InMemoryBookingRepository, InMemoryGateway, InMemoryProfileStore, InMemorySettingsStore,
        RecordingNotifier,
    };
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    /// Repository whose scan returns what it saw, then lets the companion accept every
    /// paid booking before the sweep gets to write.
    #[derive(Clone)]
    struct AcceptAfterScan {
        inner: InMemoryBookingRepository,
    }

    #[async_trait]
    impl BookingRepository for AcceptAfterScan {
        async fn insert(&self, booking: Booking) -> Result<()> {
            self.inner.insert(booking).await
        }

        async fn get(&self, booking_id: &str) -> Result<Option<Booking>> {
            self.inner.get(booking_id).await
        }

        async fn update_if(&self, booking: Booking, expected_version: u64) -> Result<bool> {
            self.inner.update_if(booking, expected_version).await
        }

        async fn find_by_state(&self, state: CompoundState) -> Result<Vec<Booking>> {
            let seen = self.inner.find_by_state(state).await?;
            if state == CompoundState::new(BookingStatus::Pending, PaymentStatus::Paid) {
                for b in &seen {
                    let mut accepted = b.clone();
                    accepted.booking_status = BookingStatus::Accepted;
                    accepted.version = b.version + 1;
                    self.inner.update_if(accepted, b.version).await?;
                }
            }
            Ok(seen)
        }

        async fn all(&self) -> Result<Vec<Booking>> {
            self.inner.all().await
        }
    }

    struct Fixture {
        engine: Arc<BookingEngine>,
        gateway: InMemoryGateway,
        clock: ManualClock,
    }

    async fn fixture(bookings: Box<dyn BookingRepository>) -> Fixture {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap());
        let profiles = InMemoryProfileStore::new();
        profiles.put(Profile::client("alice", "alice@example.com")).await;
        profiles
            .put(Profile::companion("bob", "bob@example.com", Money::new(dec!(50))))
            .await;
        let gateway = InMemoryGateway::new();

        let engine = Arc::new(BookingEngine::new(
            EnginePorts {
                bookings,
                profiles: Box::new(profiles),
                settings: Box::new(InMemorySettingsStore::new(PlatformSettings {
                    commission_percentage: dec!(15),
                })),
                gateway: Box::new(gateway.clone()),
                notifier: Box::new(RecordingNotifier::new()),
                clock: Box::new(clock.clone()),
            },
            EngineConfig::default(),
        ));
        Fixture {
            engine,
            gateway,
            clock,
        }
    }

    async fn create(f: &Fixture, paid: bool) -> Booking {
        let alice = Actor::client("alice");
        let booking = f
            .engine
            .create_booking(
                &alice,
                NewBooking {
                    companion_id: "bob".to_string(),
                    start_time: f.clock.now() + Duration::days(3),
                    duration_hours: 2,
                },
            )
            .await
            .unwrap();
        if paid {
            let session = f.engine.initialize_payment(&alice, &booking.id).await.unwrap();
            f.gateway.capture(&session.reference, Money::new(dec!(100)));
            return f.engine.verify_payment(&alice, &booking.id).await.unwrap();
        }
        booking
    }

    #[tokio::test]
    async fn test_sweep_expires_paid_booking_with_one_refund() {
        let f = fixture(Box::new(InMemoryBookingRepository::new())).await;
        let booking = create(&f, true).await;
        let sweeper = ExpirationSweeper::new(f.engine.clone());

        let early = sweeper
            .sweep(booking.created_at + Duration::hours(23))
            .await
            .unwrap();
        assert_eq!(early, SweepReport::default());

        let report = sweeper
            .sweep(booking.created_at + Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.refunded, 1);
        assert_eq!(f.gateway.refund_calls().len(), 1);

        let stored = f
            .engine
            .get_booking(&Actor::system(), &booking.id)
            .await
            .unwrap();
        assert_eq!(
            stored.state(),
            CompoundState::new(BookingStatus::Expired, PaymentStatus::Refunded)
        );

        // a second run finds nothing left to do
        let again = sweeper
            .sweep(booking.created_at + Duration::hours(30))
            .await
            .unwrap();
        assert_eq!(again, SweepReport::default());
        assert_eq!(f.gateway.refund_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_expires_unpaid_without_refund() {
        let f = fixture(Box::new(InMemoryBookingRepository::new())).await;
        let booking = create(&f, false).await;

        let report = ExpirationSweeper::new(f.engine.clone())
            .sweep(booking.expires_at)
            .await
            .unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.refunded, 0);
        assert!(f.gateway.refund_calls().is_empty());

        let stored = f
            .engine
            .get_booking(&Actor::system(), &booking.id)
            .await
            .unwrap();
        assert_eq!(
            stored.state(),
            CompoundState::new(BookingStatus::Expired, PaymentStatus::Pending)
        );
    }

    #[tokio::test]
    async fn test_sweep_flags_failed_refund_then_retries() {
        let f = fixture(Box::new(InMemoryBookingRepository::new())).await;
        let booking = create(&f, true).await;
        let sweeper = ExpirationSweeper::new(f.engine.clone());

        f.gateway.fail_refunds(true);
        let report = sweeper.sweep(booking.expires_at).await.unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.flagged, 1);
        assert_eq!(report.refunds_retried, 0);

        let stored = f
            .engine
            .get_booking(&Actor::system(), &booking.id)
            .await
            .unwrap();
        assert_eq!(stored.booking_status, BookingStatus::Expired);
        assert_eq!(stored.payment_status, PaymentStatus::RefundPending);
        assert!(stored.needs_reconciliation);

        f.gateway.fail_refunds(false);
        let report = sweeper
            .sweep(booking.expires_at + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(report.expired, 0);
        assert_eq!(report.refunds_retried, 1);

        let stored = f
            .engine
            .get_booking(&Actor::system(), &booking.id)
            .await
            .unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Refunded);
        assert!(!stored.needs_reconciliation);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_the_scan() {
        let f = fixture(Box::new(InMemoryBookingRepository::new())).await;
        let first = create(&f, true).await;
        let second = create(&f, true).await;
        let unpaid = create(&f, false).await;

        f.gateway.set_unavailable(true);
        let report = ExpirationSweeper::new(f.engine.clone())
            .sweep(f.clock.now() + Duration::hours(25))
            .await
            .unwrap();
        assert_eq!(report.expired, 3);
        assert_eq!(report.flagged, 2);
        assert_eq!(report.errors, 0);

        for id in [&first.id, &second.id, &unpaid.id] {
            let stored = f.engine.get_booking(&Actor::system(), id).await.unwrap();
            assert_eq!(stored.booking_status, BookingStatus::Expired);
        }
    }

    #[tokio::test]
    async fn test_sweep_rechecks_before_write() {
        let repo = AcceptAfterScan {
            inner: InMemoryBookingRepository::new(),
        };
        let f = fixture(Box::new(repo)).await;
        let booking = create(&f, true).await;

        let report = ExpirationSweeper::new(f.engine.clone())
            .sweep(booking.expires_at + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(report.expired, 0);
        assert_eq!(report.skipped, 1);
        assert!(f.gateway.refund_calls().is_empty());

        let stored = f
            .engine
            .get_booking(&Actor::system(), &booking.id)
            .await
            .unwrap();
        assert_eq!(
            stored.state(),
            CompoundState::new(BookingStatus::Accepted, PaymentStatus::Paid)
        );
    }
}
