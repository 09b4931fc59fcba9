use super::effects::{PostCommit, run_post_commit};
use crate::config::EngineConfig;
use crate::domain::actor::{Actor, Role};
use crate::domain::booking::{Booking, BookingDraft, BookingStatus, CompoundState, PaymentStatus};
use crate::domain::commission::compute_split;
use crate::domain::money::Money;
use crate::domain::notification::{Notification, NotificationEvent};
use crate::domain::payment::{
    InitializePayment, METADATA_BOOKING_ID, PaymentSession, RefundStatus, SubaccountRequest,
    VerificationStatus,
};
use crate::domain::ports::{
    BookingRepository, BookingRepositoryBox, ClockBox, NotificationDispatcherBox,
    PaymentGatewayBox, ProfileStoreBox, SettingsStoreBox,
};
use crate::domain::state_machine::{self, Action, Transition};
use crate::error::{BookingError, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::future::Future;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// The collaborators the engine reaches through its ports.
pub struct EnginePorts {
    pub bookings: BookingRepositoryBox,
    pub profiles: ProfileStoreBox,
    pub settings: SettingsStoreBox,
    pub gateway: PaymentGatewayBox,
    pub notifier: NotificationDispatcherBox,
    pub clock: ClockBox,
}

/// Bank details a companion is paid out to.
#[derive(Debug, Clone)]
pub struct SettlementAccount {
    pub business_name: String,
    pub settlement_bank: String,
    pub account_number: String,
}

/// A client's request to reserve a companion.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub companion_id: String,
    pub start_time: DateTime<Utc>,
    pub duration_hours: u32,
}

/// Result of one read-modify-write cycle.
struct Mutation {
    booking: Booking,
    changed: bool,
}

struct Applied {
    booking: Booking,
    changed: bool,
    refund_required: bool,
}

/// What happened when a captured payment was sent back.
struct RefundOutcome {
    booking: Booking,
    failure: Option<String>,
}

/// Orchestrates every booking action against storage, the gateway and notifications.
///
/// Each action is a single read-modify-write of one booking, guarded by the booking's
/// version. Gateway calls that follow a transition (refunds) only happen after the
/// transition has been written, and notifications only after the final write.
pub struct BookingEngine {
    bookings: BookingRepositoryBox,
    profiles: ProfileStoreBox,
    settings: SettingsStoreBox,
    gateway: PaymentGatewayBox,
    notifier: NotificationDispatcherBox,
    clock: ClockBox,
    config: EngineConfig,
}

impl BookingEngine {
    pub fn new(ports: EnginePorts, config: EngineConfig) -> Self {
        Self {
            bookings: ports.bookings,
            profiles: ports.profiles,
            settings: ports.settings,
            gateway: ports.gateway,
            notifier: ports.notifier,
            clock: ports.clock,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn repository(&self) -> &dyn BookingRepository {
        self.bookings.as_ref()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Creates a `(pending, pending)` booking priced from the companion's rate and the
    /// commission currently configured for the platform.
    pub async fn create_booking(&self, actor: &Actor, request: NewBooking) -> Result<Booking> {
        if actor.role != Role::Client {
            return Err(BookingError::AuthorizationError(format!(
                "{} is not a client and cannot create bookings",
                actor.user_id
            )));
        }
        if actor.user_id == request.companion_id {
            return Err(BookingError::ValidationError(
                "A user cannot book themselves".to_string(),
            ));
        }

        let now = self.clock.now();
        if request.start_time <= now {
            return Err(BookingError::ValidationError(
                "Booking must start in the future".to_string(),
            ));
        }

        let companion = self
            .profiles
            .get_profile(&request.companion_id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("companion {}", request.companion_id)))?;
        if companion.role != Role::Companion {
            return Err(BookingError::ValidationError(format!(
                "{} is not a companion",
                companion.id
            )));
        }
        let hourly_rate = companion.hourly_rate.ok_or_else(|| {
            BookingError::ValidationError(format!("{} has no hourly rate", companion.id))
        })?;
        let hourly_rate = Money::positive(hourly_rate.value())?;

        let settings = self.settings.platform_settings().await?;
        let split = compute_split(
            hourly_rate,
            request.duration_hours,
            settings.commission_percentage,
        )?;

        let draft = BookingDraft {
            id: Uuid::new_v4().to_string(),
            client_id: actor.user_id.clone(),
            companion_id: companion.id,
            start_time: request.start_time,
            duration_hours: request.duration_hours,
            hourly_rate,
            commission_percentage: settings.commission_percentage,
            split,
        };
        let booking = Booking::new(draft, now, self.config.expiration_window);
        self.bookings.insert(booking.clone()).await?;

        info!(
            booking_id = %booking.id,
            client_id = %booking.client_id,
            companion_id = %booking.companion_id,
            total = %booking.total_amount,
            fee = %booking.platform_fee,
            "booking created"
        );
        Ok(booking)
    }

    /// Registers the companion's payout account with the gateway and keeps the returned
    /// code as the settlement target of their future bookings.
    pub async fn register_settlement_account(
        &self,
        actor: &Actor,
        account: SettlementAccount,
    ) -> Result<String> {
        if actor.role != Role::Companion {
            return Err(BookingError::AuthorizationError(format!(
                "{} is not a companion",
                actor.user_id
            )));
        }
        if account.account_number.trim().is_empty() || account.settlement_bank.trim().is_empty() {
            return Err(BookingError::ValidationError(
                "Bank and account number are required".to_string(),
            ));
        }
        self.profiles
            .get_profile(&actor.user_id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("companion {}", actor.user_id)))?;

        let settings = self.settings.platform_settings().await?;
        let code = self
            .call_gateway(self.gateway.create_subaccount(SubaccountRequest {
                business_name: account.business_name,
                settlement_bank: account.settlement_bank,
                account_number: account.account_number,
                percentage_charge: settings.commission_percentage,
            }))
            .await?;
        self.profiles
            .set_subaccount_code(&actor.user_id, &code)
            .await?;

        info!(companion_id = %actor.user_id, subaccount = %code, "settlement account registered");
        Ok(code)
    }

    /// Starts the gateway checkout for a booking. Repeated calls return the stored session.
    pub async fn initialize_payment(&self, actor: &Actor, booking_id: &str) -> Result<PaymentSession> {
        let booking = self.get_existing(booking_id).await?;
        state_machine::transition(&booking, &Action::InitializePayment, actor)?;

        if let (Some(reference), Some(url)) = (&booking.payment_reference, &booking.authorization_url)
        {
            debug!(%booking_id, %reference, "payment already initialized");
            return Ok(PaymentSession {
                authorization_url: url.clone(),
                reference: reference.clone(),
            });
        }

        let client = self
            .profiles
            .get_profile(&booking.client_id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("client {}", booking.client_id)))?;
        let settlement_target = self
            .profiles
            .get_profile(&booking.companion_id)
            .await?
            .and_then(|companion| companion.subaccount_code);
        if settlement_target.is_none() {
            warn!(%booking_id, "companion has no settlement sub-account; full amount settles to the platform");
        }

        let reference = booking
            .payment_reference
            .clone()
            .unwrap_or_else(|| booking.derived_reference());
        let metadata = BTreeMap::from([
            (METADATA_BOOKING_ID.to_string(), booking.id.clone()),
            ("client_id".to_string(), booking.client_id.clone()),
            ("companion_id".to_string(), booking.companion_id.clone()),
        ]);

        let session = self
            .call_gateway(self.gateway.initialize(InitializePayment {
                payer_email: client.email,
                amount: booking.total_amount,
                reference: reference.clone(),
                metadata,
                settlement_target: settlement_target.clone(),
                platform_fee: booking.platform_fee,
            }))
            .await?;
        if session.reference != reference {
            return Err(BookingError::PaymentGatewayError(format!(
                "gateway answered with reference {} for {reference}",
                session.reference
            )));
        }

        let url = session.authorization_url.clone();
        let applied = self
            .apply(booking_id, actor, Action::InitializePayment, |b| {
                if b.payment_reference.is_none() {
                    b.payment_reference = Some(reference.clone());
                }
                b.authorization_url = Some(url.clone());
                b.settlement_target = settlement_target.clone();
            })
            .await?;

        info!(%booking_id, %reference, "payment initialized");
        Ok(PaymentSession {
            authorization_url: applied.booking.authorization_url.unwrap_or(url),
            reference: applied.booking.payment_reference.unwrap_or(reference),
        })
    }

    /// Asks the gateway for the outcome of the booking's payment and applies it.
    pub async fn verify_payment(&self, actor: &Actor, booking_id: &str) -> Result<Booking> {
        let booking = self.get_existing(booking_id).await?;
        let reference = booking.payment_reference.clone().ok_or(BookingError::InvalidTransition {
            action: "verify payment for",
            from: booking.state(),
        })?;
        self.verify_reference(actor, booking_id, &reference).await
    }

    /// Verifies `reference` with the gateway and applies what it reports. Only the
    /// verified amount is compared against the booking total.
    pub async fn verify_reference(
        &self,
        actor: &Actor,
        booking_id: &str,
        reference: &str,
    ) -> Result<Booking> {
        let booking = self.get_existing(booking_id).await?;
        state_machine::authorize(&booking, &Action::PaymentSucceeded, actor)?;

        let verification = self.call_gateway(self.gateway.verify(reference)).await?;
        match verification.status {
            VerificationStatus::Success => {
                self.confirm_payment(actor, booking_id, reference, verification.amount)
                    .await
            }
            VerificationStatus::Failed => self.fail_payment(actor, booking_id).await,
        }
    }

    /// Applies a successful capture of `amount` under `reference`.
    ///
    /// A capture that does not match the booking total is refused without touching the
    /// booking. Applying the same capture twice is a no-op.
    pub async fn confirm_payment(
        &self,
        actor: &Actor,
        booking_id: &str,
        reference: &str,
        amount: Money,
    ) -> Result<Booking> {
        let booking = self.get_existing(booking_id).await?;
        state_machine::authorize(&booking, &Action::PaymentSucceeded, actor)?;

        if amount != booking.total_amount {
            error!(
                %booking_id,
                %reference,
                expected = %booking.total_amount,
                received = %amount,
                "captured amount does not match booking total"
            );
            return Err(BookingError::PaymentAmountMismatch {
                booking_id: booking_id.to_string(),
                expected: booking.total_amount,
                received: amount,
            });
        }
        if let Some(existing) = &booking.payment_reference
            && existing != reference
        {
            return Err(BookingError::ValidationError(format!(
                "reference {reference} does not belong to booking {booking_id}"
            )));
        }

        let applied = self
            .apply(booking_id, actor, Action::PaymentSucceeded, |b| {
                if b.payment_reference.is_none() {
                    b.payment_reference = Some(reference.to_string());
                }
            })
            .await?;
        if !applied.changed {
            debug!(%booking_id, %reference, "payment already applied");
            return Ok(applied.booking);
        }

        if applied.refund_required {
            warn!(%booking_id, %reference, state = %applied.booking.state(), "payment captured after booking ended; refunding");
            return Ok(self.refund_captured_payment(applied.booking).await?.booking);
        }

        info!(%booking_id, %reference, "payment confirmed");
        let hooks = vec![PostCommit::Notify(Notification::new(
            &applied.booking.companion_id,
            NotificationEvent::PaymentReceived,
            booking_id,
        ))];
        self.post_commit(hooks).await;
        Ok(applied.booking)
    }

    pub async fn fail_payment(&self, actor: &Actor, booking_id: &str) -> Result<Booking> {
        self.run_action(booking_id, actor, Action::PaymentFailed, |b| {
            vec![PostCommit::Notify(Notification::new(
                &b.client_id,
                NotificationEvent::PaymentFailed,
                &b.id,
            ))]
        })
        .await
    }

    pub async fn accept(&self, actor: &Actor, booking_id: &str) -> Result<Booking> {
        self.run_action(booking_id, actor, Action::Accept, |b| {
            vec![
                PostCommit::Notify(Notification::new(
                    &b.client_id,
                    NotificationEvent::BookingAccepted,
                    &b.id,
                )),
                PostCommit::IncrementBookingCount {
                    companion_id: b.companion_id.clone(),
                },
            ]
        })
        .await
    }

    pub async fn reject(&self, actor: &Actor, booking_id: &str) -> Result<Booking> {
        self.run_action(booking_id, actor, Action::Reject, |b| {
            vec![PostCommit::Notify(Notification::new(
                &b.client_id,
                NotificationEvent::BookingRejected,
                &b.id,
            ))]
        })
        .await
    }

    /// Marks an accepted booking as done. The earnings split was configured when the
    /// payment was initialized, so no gateway call is made.
    pub async fn complete(&self, actor: &Actor, booking_id: &str) -> Result<Booking> {
        self.run_action(booking_id, actor, Action::Complete, |b| {
            vec![PostCommit::Notify(Notification::new(
                &b.client_id,
                NotificationEvent::BookingCompleted,
                &b.id,
            ))]
        })
        .await
    }

    pub async fn cancel(&self, actor: &Actor, booking_id: &str) -> Result<Booking> {
        self.run_action(booking_id, actor, Action::Cancel, |b| {
            vec![PostCommit::Notify(Notification::new(
                b.counterparty_of(&actor.user_id),
                NotificationEvent::BookingCancelled,
                &b.id,
            ))]
        })
        .await
    }

    /// Forces a pending booking past its window into `expired`, refunding any capture.
    ///
    /// The guard is evaluated against a fresh read, so a booking a user moved on since the
    /// caller last looked is refused with `InvalidTransition`.
    pub async fn expire(&self, booking_id: &str, now: DateTime<Utc>) -> Result<Booking> {
        self.run_action(booking_id, &Actor::system(), Action::Expire { now }, |b| {
            vec![PostCommit::Notify(Notification::new(
                &b.client_id,
                NotificationEvent::BookingExpired,
                &b.id,
            ))]
        })
        .await
    }

    /// Re-attempts the refund of a terminal booking flagged for reconciliation.
    ///
    /// Unflagged `refund_pending` bookings either have a refund call in flight or a refund
    /// queued at the gateway, and are refused.
    pub async fn retry_refund(&self, booking_id: &str) -> Result<Booking> {
        let booking = self.get_existing(booking_id).await?;
        if !booking.booking_status.is_terminal()
            || booking.payment_status != PaymentStatus::RefundPending
            || !booking.needs_reconciliation
        {
            return Err(BookingError::InvalidTransition {
                action: "retry refund for",
                from: booking.state(),
            });
        }

        let outcome = self.refund_captured_payment(booking).await?;
        match outcome.failure {
            None => Ok(outcome.booking),
            Some(reason) => Err(BookingError::RefundFailure {
                booking_id: booking_id.to_string(),
                reason,
            }),
        }
    }

    /// Records a refund the gateway reports as processed out of band.
    pub async fn settle_refund(&self, booking_id: &str, refund_id: Option<String>) -> Result<Booking> {
        let applied = self
            .apply(booking_id, &Actor::system(), Action::RefundSettled, |b| {
                b.needs_reconciliation = false;
                if refund_id.is_some() {
                    b.refund_id = refund_id.clone();
                }
            })
            .await?;
        if applied.changed {
            info!(%booking_id, "refund settled by gateway");
        }
        Ok(applied.booking)
    }

    /// Read access for the parties of a booking and for operators.
    pub async fn get_booking(&self, actor: &Actor, booking_id: &str) -> Result<Booking> {
        let booking = self.get_existing(booking_id).await?;
        let allowed = matches!(actor.role, Role::Admin | Role::System)
            || booking.is_party(&actor.user_id);
        if allowed {
            Ok(booking)
        } else {
            Err(BookingError::AuthorizationError(format!(
                "{} cannot view booking {booking_id}",
                actor.user_id
            )))
        }
    }

    /// Bookings whose refund could not be completed automatically, oldest first.
    pub async fn reconciliation_queue(&self, actor: &Actor) -> Result<Vec<Booking>> {
        if actor.role != Role::Admin {
            return Err(BookingError::AuthorizationError(format!(
                "{} is not an operator",
                actor.user_id
            )));
        }

        let mut queue = Vec::new();
        for status in [
            BookingStatus::Rejected,
            BookingStatus::Cancelled,
            BookingStatus::Expired,
        ] {
            let stuck = self
                .bookings
                .find_by_state(CompoundState::new(status, PaymentStatus::RefundPending))
                .await?;
            queue.extend(stuck.into_iter().filter(|b| b.needs_reconciliation));
        }
        queue.sort_by_key(|b| b.updated_at);
        Ok(queue)
    }

    async fn get_existing(&self, booking_id: &str) -> Result<Booking> {
        self.bookings
            .get(booking_id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("booking {booking_id}")))
    }

    /// Transition, then refund if money has to go back, then post-commit hooks.
    async fn run_action<H>(
        &self,
        booking_id: &str,
        actor: &Actor,
        action: Action,
        hooks: H,
    ) -> Result<Booking>
    where
        H: FnOnce(&Booking) -> Vec<PostCommit> + Send,
    {
        let applied = self.apply(booking_id, actor, action, |_| {}).await?;
        if !applied.changed {
            debug!(%booking_id, action = action.name(), "already applied");
            return Ok(applied.booking);
        }
        info!(
            %booking_id,
            action = action.name(),
            state = %applied.booking.state(),
            "booking transitioned"
        );

        let booking = if applied.refund_required {
            self.refund_captured_payment(applied.booking).await?.booking
        } else {
            applied.booking
        };

        self.post_commit(hooks(&booking)).await;
        Ok(booking)
    }

    /// Runs the state machine against a fresh read and writes the result, retrying when a
    /// concurrent writer wins the race.
    async fn apply<E>(
        &self,
        booking_id: &str,
        actor: &Actor,
        action: Action,
        edit: E,
    ) -> Result<Applied>
    where
        E: Fn(&mut Booking) + Send + Sync,
    {
        let mut refund_required = false;
        let mutation = self
            .mutate(booking_id, |current| {
                match state_machine::transition(current, &action, actor)? {
                    Transition::Unchanged => {
                        refund_required = false;
                        Ok(None)
                    }
                    Transition::Applied {
                        to,
                        refund_required: refund,
                    } => {
                        refund_required = refund;
                        let mut next = current.clone();
                        next.set_state(to);
                        edit(&mut next);
                        Ok(Some(next))
                    }
                }
            })
            .await?;

        Ok(Applied {
            booking: mutation.booking,
            changed: mutation.changed,
            refund_required: refund_required && mutation.changed,
        })
    }

    async fn mutate<F>(&self, booking_id: &str, mut decide: F) -> Result<Mutation>
    where
        F: FnMut(&Booking) -> Result<Option<Booking>> + Send,
    {
        for attempt in 1..=self.config.max_write_attempts {
            let current = self.get_existing(booking_id).await?;
            let Some(mut next) = decide(&current)? else {
                return Ok(Mutation {
                    booking: current,
                    changed: false,
                });
            };

            next.version = current.version + 1;
            next.updated_at = self.clock.now();
            if self.bookings.update_if(next.clone(), current.version).await? {
                return Ok(Mutation {
                    booking: next,
                    changed: true,
                });
            }
            debug!(%booking_id, attempt, "write lost a race; re-reading");
        }

        Err(BookingError::ConcurrentModification(booking_id.to_string()))
    }

    /// Sends a captured payment back. Failure leaves the booking in `refund_pending` with the
    /// reconciliation flag set instead of undoing the status change.
    async fn refund_captured_payment(&self, booking: Booking) -> Result<RefundOutcome> {
        let Some(reference) = booking.payment_reference.clone() else {
            return self
                .refund_failed(&booking.id, "captured payment has no reference".to_string())
                .await;
        };

        match self.call_gateway(self.gateway.refund(&reference)).await {
            Ok(receipt) if receipt.status == RefundStatus::Processed => {
                info!(booking_id = %booking.id, %reference, refund_id = %receipt.refund_id, "refund issued");
                let refund_id = receipt.refund_id;
                let applied = self
                    .apply(&booking.id, &Actor::system(), Action::RefundSettled, |b| {
                        b.refund_id = Some(refund_id.clone());
                        b.needs_reconciliation = false;
                    })
                    .await?;
                Ok(RefundOutcome {
                    booking: applied.booking,
                    failure: None,
                })
            }
            Ok(receipt) if receipt.status != RefundStatus::Failed => {
                // settled later by the refund.processed callback
                info!(booking_id = %booking.id, %reference, refund_id = %receipt.refund_id, status = ?receipt.status, "refund queued");
                let refund_id = receipt.refund_id;
                let mutation = self
                    .mutate(&booking.id, |current| {
                        if current.payment_status != PaymentStatus::RefundPending {
                            return Ok(None);
                        }
                        let mut next = current.clone();
                        next.refund_id = Some(refund_id.clone());
                        next.needs_reconciliation = false;
                        Ok(Some(next))
                    })
                    .await?;
                Ok(RefundOutcome {
                    booking: mutation.booking,
                    failure: None,
                })
            }
            Ok(receipt) => {
                self.refund_failed(
                    &booking.id,
                    format!("gateway reported refund {} as failed", receipt.refund_id),
                )
                .await
            }
            Err(e) => self.refund_failed(&booking.id, e.to_string()).await,
        }
    }

    async fn refund_failed(&self, booking_id: &str, reason: String) -> Result<RefundOutcome> {
        error!(%booking_id, %reason, "refund failed; flagged for manual reconciliation");
        let mutation = self
            .mutate(booking_id, |current| {
                if current.needs_reconciliation
                    || current.payment_status != PaymentStatus::RefundPending
                {
                    return Ok(None);
                }
                let mut next = current.clone();
                next.needs_reconciliation = true;
                Ok(Some(next))
            })
            .await?;
        Ok(RefundOutcome {
            booking: mutation.booking,
            failure: Some(reason),
        })
    }

    async fn call_gateway<T>(&self, call: impl Future<Output = Result<T>> + Send) -> Result<T> {
        tokio::time::timeout(self.config.gateway_timeout, call)
            .await
            .map_err(|_| {
                BookingError::PaymentGatewayError(format!(
                    "gateway call timed out after {:?}",
                    self.config.gateway_timeout
                ))
            })?
    }

    async fn post_commit(&self, hooks: Vec<PostCommit>) {
        run_post_commit(hooks, self.notifier.as_ref(), self.profiles.as_ref()).await;
    }
}
