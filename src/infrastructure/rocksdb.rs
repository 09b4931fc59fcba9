use crate::domain::booking::{Booking, CompoundState};
use crate::domain::ports::{BookingRepository, WebhookLedger};
use crate::error::{BookingError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamilyDescriptor, DB, Options};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for storing bookings, keyed by booking id.
pub const CF_BOOKINGS: &str = "bookings";
/// Column Family for the webhook dedupe ledger, keyed by event id.
pub const CF_WEBHOOK_EVENTS: &str = "webhook_events";

/// A persistent store implementation using RocksDB.
///
/// Holds bookings and processed webhook ids in separate Column Families. Writers that must
/// check before they write (`update_if`, `record`) serialize on `write_lock`, which makes
/// the compare-and-swap atomic within this process.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

fn internal(message: String) -> BookingError {
    BookingError::InternalError(Box::new(std::io::Error::other(message)))
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the required column families ("bookings" and "webhook_events") exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_bookings = ColumnFamilyDescriptor::new(CF_BOOKINGS, Options::default());
        let cf_events = ColumnFamilyDescriptor::new(CF_WEBHOOK_EVENTS, Options::default());

        let db = DB::open_cf_descriptors(&opts, path, vec![cf_bookings, cf_events])?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn read_booking(&self, booking_id: &str) -> Result<Option<Booking>> {
        let cf = self
            .db
            .cf_handle(CF_BOOKINGS)
            .ok_or_else(|| internal("Bookings column family not found".to_string()))?;

        match self.db.get_cf(&cf, booking_id.as_bytes())? {
            Some(bytes) => {
                let booking = serde_json::from_slice(&bytes)
                    .map_err(|e| internal(format!("Deserialization error: {e}")))?;
                Ok(Some(booking))
            }
            None => Ok(None),
        }
    }

    fn write_booking(&self, booking: &Booking) -> Result<()> {
        let cf = self
            .db
            .cf_handle(CF_BOOKINGS)
            .ok_or_else(|| internal("Bookings column family not found".to_string()))?;

        let value = serde_json::to_vec(booking)
            .map_err(|e| internal(format!("Serialization error: {e}")))?;
        self.db.put_cf(&cf, booking.id.as_bytes(), value)?;
        Ok(())
    }

    fn scan(&self) -> Result<Vec<Booking>> {
        let cf = self
            .db
            .cf_handle(CF_BOOKINGS)
            .ok_or_else(|| internal("Bookings column family not found".to_string()))?;

        let mut bookings = Vec::new();
        for item in self.db.iterator_cf(&cf, rocksdb::IteratorMode::Start) {
            let (_key, value) =
                item.map_err(|e| internal(format!("RocksDB iteration error: {e}")))?;
            let booking: Booking = serde_json::from_slice(&value)
                .map_err(|e| internal(format!("Failed to deserialize booking: {e}")))?;
            bookings.push(booking);
        }
        Ok(bookings)
    }
}

#[async_trait]
impl BookingRepository for RocksDBStore {
    async fn insert(&self, booking: Booking) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write_booking(&booking)
    }

    async fn get(&self, booking_id: &str) -> Result<Option<Booking>> {
        self.read_booking(booking_id)
    }

    async fn update_if(&self, booking: Booking, expected_version: u64) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let stored = self
            .read_booking(&booking.id)?
            .ok_or_else(|| BookingError::NotFound(format!("booking {}", booking.id)))?;
        if stored.version != expected_version {
            return Ok(false);
        }
        self.write_booking(&booking)?;
        Ok(true)
    }

    async fn find_by_state(&self, state: CompoundState) -> Result<Vec<Booking>> {
        Ok(self
            .scan()?
            .into_iter()
            .filter(|b| b.state() == state)
            .collect())
    }

    async fn all(&self) -> Result<Vec<Booking>> {
        self.scan()
    }
}

#[async_trait]
impl WebhookLedger for RocksDBStore {
    async fn contains(&self, event_id: &str) -> Result<bool> {
        let cf = self
            .db
            .cf_handle(CF_WEBHOOK_EVENTS)
            .ok_or_else(|| internal("Webhook events column family not found".to_string()))?;
        // Just check if the key exists without retrieving the value
        Ok(self.db.get_pinned_cf(&cf, event_id.as_bytes())?.is_some())
    }

    async fn record(&self, event_id: &str, processed_at: DateTime<Utc>) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let cf = self
            .db
            .cf_handle(CF_WEBHOOK_EVENTS)
            .ok_or_else(|| internal("Webhook events column family not found".to_string()))?;

        if self.db.get_pinned_cf(&cf, event_id.as_bytes())?.is_some() {
            return Ok(false);
        }
        self.db
            .put_cf(&cf, event_id.as_bytes(), processed_at.to_rfc3339().as_bytes())?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::booking::{BookingDraft, BookingStatus, PaymentStatus};
    use crate::domain::commission::compute_split;
    use crate::domain::money::Money;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn booking(id: &str) -> Booking {
        let created = Utc.with_ymd_and_hms(2026, 2, 1, 10, 0, 0).unwrap();
        let draft = BookingDraft {
            id: id.to_string(),
            client_id: "c".to_string(),
            companion_id: "p".to_string(),
            start_time: created + Duration::days(1),
            duration_hours: 2,
            hourly_rate: Money::new(dec!(25)),
            commission_percentage: dec!(20),
            split: compute_split(Money::new(dec!(25)), 2, dec!(20)).unwrap(),
        };
        Booking::new(draft, created, Duration::hours(24))
    }

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).expect("Failed to open RocksDB");

        assert!(store.db.cf_handle(CF_BOOKINGS).is_some());
        assert!(store.db.cf_handle(CF_WEBHOOK_EVENTS).is_some());
    }

    #[tokio::test]
    async fn test_rocksdb_booking_roundtrip_and_cas() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();

        let b = booking("b-1");
        store.insert(b.clone()).await.unwrap();
        assert_eq!(store.get("b-1").await.unwrap(), Some(b.clone()));

        let mut paid = b.clone();
        paid.payment_status = PaymentStatus::Paid;
        paid.version = 1;
        assert!(store.update_if(paid.clone(), 0).await.unwrap());
        assert!(!store.update_if(paid, 0).await.unwrap());

        let found = store
            .find_by_state(CompoundState::new(BookingStatus::Pending, PaymentStatus::Paid))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(store.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rocksdb_webhook_ledger() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();

        assert!(!store.contains("charge.success:1").await.unwrap());
        assert!(store.record("charge.success:1", Utc::now()).await.unwrap());
        assert!(!store.record("charge.success:1", Utc::now()).await.unwrap());
        assert!(store.contains("charge.success:1").await.unwrap());
    }
}
