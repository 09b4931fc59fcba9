mod common;

use chrono::Utc;
use common::{snapshot_booking, t0};
use escrowbook::domain::booking::{BookingStatus, CompoundState, PaymentStatus};
use escrowbook::domain::ports::{BookingRepositoryBox, PaymentGatewayBox, WebhookLedgerBox};
use escrowbook::domain::payment::{InitializePayment, METADATA_BOOKING_ID};
use escrowbook::domain::money::Money;
use escrowbook::infrastructure::in_memory::{
    InMemoryBookingRepository, InMemoryGateway, InMemoryWebhookLedger,
};
use rust_decimal_macros::dec;
use std::collections::BTreeMap;

#[tokio::test]
async fn test_ports_as_trait_objects() {
    let bookings: BookingRepositoryBox = Box::new(InMemoryBookingRepository::new());
    let ledger: WebhookLedgerBox = Box::new(InMemoryWebhookLedger::new());
    let gateway: PaymentGatewayBox = Box::new(InMemoryGateway::new());

    let booking = snapshot_booking(
        "b-dyn",
        t0(),
        CompoundState::new(BookingStatus::Pending, PaymentStatus::Pending),
    );

    // Verify Send + Sync by spawning tasks
    let bookings_handle = tokio::spawn(async move {
        bookings.insert(booking).await.unwrap();
        bookings.get("b-dyn").await.unwrap().unwrap()
    });

    let ledger_handle = tokio::spawn(async move {
        let first = ledger.record("charge.success:1", Utc::now()).await.unwrap();
        let second = ledger.record("charge.success:1", Utc::now()).await.unwrap();
        (first, second)
    });

    let gateway_handle = tokio::spawn(async move {
        gateway
            .initialize(InitializePayment {
                payer_email: "alice@example.com".to_string(),
                amount: Money::new(dec!(100)),
                reference: "BK-b-dyn".to_string(),
                metadata: BTreeMap::from([(
                    METADATA_BOOKING_ID.to_string(),
                    "b-dyn".to_string(),
                )]),
                settlement_target: None,
                platform_fee: Money::new(dec!(15)),
            })
            .await
            .unwrap()
    });

    let retrieved = bookings_handle.await.unwrap();
    assert_eq!(retrieved.id, "b-dyn");

    assert_eq!(ledger_handle.await.unwrap(), (true, false));

    let session = gateway_handle.await.unwrap();
    assert_eq!(session.reference, "BK-b-dyn");
}
