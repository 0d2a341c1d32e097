use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use booking_scan::{
    BookingTransport, Clock, MessengerService, MonitorConfig, NotificationServiceImpl,
    ReqwestTransport, ScanError, ScanExecutor, SiteClock, SlotCollector, StateStore,
    TelegramService,
};

/// Manager for the polling loop
/// Wires the executor from configuration and runs it in the background
pub struct ScanManager {
    config: Arc<MonitorConfig>,
    executor_handle: Option<JoinHandle<()>>,
}

impl ScanManager {
    /// Create a new scan manager
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config: Arc::new(config),
            executor_handle: None,
        }
    }

    /// Build the executor and its collaborators
    fn build_executor(&self) -> Result<ScanExecutor, ScanError> {
        let transport: Arc<dyn BookingTransport> = Arc::new(ReqwestTransport::new(&self.config)?);
        let clock: Arc<dyn Clock> = Arc::new(SiteClock::new(self.config.site_offset()));

        let collector = SlotCollector::from_config(transport, clock.clone(), &self.config);
        let state_store = StateStore::new(&self.config.state_file);

        let messenger = self.build_messenger();
        let notification_service = Arc::new(NotificationServiceImpl::from_config(
            messenger,
            &self.config,
        ));

        Ok(ScanExecutor::new(
            collector,
            state_store,
            notification_service,
            clock,
            self.config.clone(),
        ))
    }

    fn build_messenger(&self) -> Option<Arc<dyn MessengerService>> {
        let (Some(token), Some(chat_id)) = (
            self.config.telegram_bot_token.as_deref(),
            self.config.telegram_chat_id,
        ) else {
            warn!("Telegram is not configured, notifications will only be logged");
            return None;
        };

        match TelegramService::new(token, chat_id) {
            Ok(service) => Some(Arc::new(service)),
            Err(e) => {
                error!("Failed to create Telegram client: {}", e);
                None
            }
        }
    }

    /// Start the polling loop in a background task
    pub fn start(&mut self) -> Result<(), ScanError> {
        info!(
            "Starting scan execution for '{}' from {} to {}",
            self.config.theme_name, self.config.date_start, self.config.date_end
        );

        let executor = Arc::new(self.build_executor()?);

        let handle = tokio::spawn(async move {
            if let Err(e) = executor.start().await {
                error!("Scan executor failed: {}", e);
            }
        });
        self.executor_handle = Some(handle);

        info!("Scan execution started");
        Ok(())
    }

    /// Stop the polling loop
    pub async fn stop(&mut self) {
        info!("Stopping scan execution");

        if let Some(handle) = self.executor_handle.take() {
            handle.abort();
            let _ = handle.await;
        }

        info!("Scan execution stopped");
    }
}

impl Drop for ScanManager {
    fn drop(&mut self) {
        if let Some(handle) = self.executor_handle.take() {
            handle.abort();
        }
    }
}
