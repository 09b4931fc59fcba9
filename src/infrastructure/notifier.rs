use crate::domain::notification::Notification;
use crate::domain::ports::NotificationDispatcher;
use crate::error::Result;
use async_trait::async_trait;
use tracing::info;

/// Dispatcher that writes each notice to the log instead of a delivery channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl NotificationDispatcher for LogNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        info!(
            user_id = %notification.user_id,
            booking_id = %notification.booking_id,
            event = ?notification.event,
            title = %notification.title,
            "notification"
        );
        Ok(())
    }
}
