use std::sync::Arc;

use chrono::{Datelike, Weekday};
use tracing::{error, info, warn};

use crate::config::MonitorConfig;
use crate::executor::{NotificationError, NotificationService};
use crate::scan_types::SlotKey;

/// Trait for chat messenger implementations
#[async_trait::async_trait]
pub trait MessengerService: Send + Sync {
    /// Deliver one message, returning the messenger's message id
    async fn send_message(&self, text: &str) -> Result<String, NotificationError>;
}

/// Formats availability announcements and hands them to a messenger
pub struct NotificationServiceImpl {
    messenger: Option<Arc<dyn MessengerService>>,
    reservation_url: String,
    max_slots: usize,
}

impl NotificationServiceImpl {
    /// Create a notifier; `None` only logs announcements
    pub fn new(
        messenger: Option<Arc<dyn MessengerService>>,
        reservation_url: impl Into<String>,
        max_slots: usize,
    ) -> Self {
        Self {
            messenger,
            reservation_url: reservation_url.into(),
            max_slots: max_slots.max(1),
        }
    }

    /// Notifier using the configured booking URL and slot cap
    pub fn from_config(
        messenger: Option<Arc<dyn MessengerService>>,
        config: &MonitorConfig,
    ) -> Self {
        Self::new(
            messenger,
            config.reservation_url(),
            config.max_notification_slots,
        )
    }

    /// Build the announcement text
    fn create_notification_content(&self, theme_name: &str, new_slots: &[SlotKey]) -> String {
        let mut lines = vec![
            format!("🔔 [{}] 새 예약 가능 시간 {}개", theme_name, new_slots.len()),
            String::new(),
        ];

        lines.extend(new_slots.iter().take(self.max_slots).map(|slot| {
            format!(
                "• {} ({}) {}",
                slot.date.format("%Y-%m-%d"),
                korean_weekday(slot.date.weekday()),
                slot.time.format("%H:%M")
            )
        }));

        if new_slots.len() > self.max_slots {
            lines.push(format!("외 {}개", new_slots.len() - self.max_slots));
        }

        lines.push(String::new());
        lines.push(format!("예약하기: {}", self.reservation_url));

        lines.join("\n")
    }
}

#[async_trait::async_trait]
impl NotificationService for NotificationServiceImpl {
    async fn send_availability_notification(
        &self,
        theme_name: &str,
        new_slots: &[SlotKey],
    ) -> Result<(), NotificationError> {
        if new_slots.is_empty() {
            return Ok(());
        }

        let message = self.create_notification_content(theme_name, new_slots);

        let Some(ref messenger) = self.messenger else {
            warn!("No messenger configured, logging notification instead");
            info!("{}", message);
            return Ok(());
        };

        match messenger.send_message(&message).await {
            Ok(message_id) => {
                info!(
                    "Notification for {} slots sent (message {})",
                    new_slots.len(),
                    message_id
                );
                Ok(())
            }
            Err(e) => {
                error!("Failed to send notification: {}", e);
                Err(e)
            }
        }
    }
}

fn korean_weekday(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "월",
        Weekday::Tue => "화",
        Weekday::Wed => "수",
        Weekday::Thu => "목",
        Weekday::Fri => "금",
        Weekday::Sat => "토",
        Weekday::Sun => "일",
    }
}
