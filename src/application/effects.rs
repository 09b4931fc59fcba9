use crate::domain::notification::Notification;
use crate::domain::ports::{NotificationDispatcher, ProfileStore};
use tracing::{debug, warn};

/// Side effect that runs only after the booking write it belongs to has committed.
#[derive(Debug, Clone, PartialEq)]
pub enum PostCommit {
    Notify(Notification),
    IncrementBookingCount { companion_id: String },
}

/// Runs hooks in order. A failing hook is logged and skipped; it never undoes the write.
pub async fn run_post_commit(
    hooks: Vec<PostCommit>,
    notifier: &dyn NotificationDispatcher,
    profiles: &dyn ProfileStore,
) {
    for hook in hooks {
        match hook {
            PostCommit::Notify(notification) => {
                let booking_id = notification.booking_id.clone();
                let user_id = notification.user_id.clone();
                match notifier.notify(notification).await {
                    Ok(()) => debug!(%booking_id, %user_id, "notification sent"),
                    Err(e) => {
                        warn!(%booking_id, %user_id, error = %e, "notification failed; ignoring")
                    }
                }
            }
            PostCommit::IncrementBookingCount { companion_id } => {
                if let Err(e) = profiles.increment_booking_count(&companion_id).await {
                    warn!(%companion_id, error = %e, "booking counter update failed; ignoring");
                }
            }
        }
    }
}
