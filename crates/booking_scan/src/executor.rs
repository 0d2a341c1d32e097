use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use tokio::sync::Mutex;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::collector::SlotCollector;
use crate::config::MonitorConfig;
use crate::scan_types::{ScanError, SlotKey, SlotMap};
use crate::state_store::StateStore;

/// Trait for announcing newly available slots
#[async_trait::async_trait]
pub trait NotificationService: Send + Sync {
    /// Announce `new_slots` of `theme_name`; an empty list sends nothing
    async fn send_availability_notification(
        &self,
        theme_name: &str,
        new_slots: &[SlotKey],
    ) -> Result<(), NotificationError>;
}

/// Errors raised while delivering an announcement
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    /// The messenger rejected or could not read the message
    #[error("Telegram error: {0}")]
    Telegram(String),
    /// The messenger could not be reached
    #[error("Transport error: {0}")]
    Transport(String),
}

/// What a single run ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The monitoring window lies entirely in the past
    WindowClosed,
    /// Nothing became available since the previous run
    NothingNew,
    /// New slots were announced and the state advanced
    Notified,
    /// New slots were held back by the notification cooldown
    Deferred,
    /// Sending failed; the state was left behind for a retry
    NotificationFailed,
}

/// Summary of one polling run
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Slots in the map persisted (or held back) by this run
    pub total_slots: usize,
    /// How many of those are available
    pub available_slots: usize,
    /// Available now but not in the previous state
    pub new_slots: Vec<SlotKey>,
    /// Dates whose fetch failed
    pub failed_dates: Vec<NaiveDate>,
    /// Dates on which the theme was not offered
    pub theme_missing_dates: Vec<NaiveDate>,
    /// What the run did with the new slots
    pub outcome: RunOutcome,
}

impl RunSummary {
    fn window_closed() -> Self {
        Self {
            total_slots: 0,
            available_slots: 0,
            new_slots: Vec::new(),
            failed_dates: Vec::new(),
            theme_missing_dates: Vec::new(),
            outcome: RunOutcome::WindowClosed,
        }
    }
}

/// Main scan execution engine
pub struct ScanExecutor {
    collector: SlotCollector,
    state_store: StateStore,
    notification_service: Arc<dyn NotificationService>,
    clock: Arc<dyn Clock>,
    config: Arc<MonitorConfig>,

    /// Site-local time of the last announcement
    last_notified: Mutex<Option<NaiveDateTime>>,
}

impl ScanExecutor {
    /// Create a new scan executor
    pub fn new(
        collector: SlotCollector,
        state_store: StateStore,
        notification_service: Arc<dyn NotificationService>,
        clock: Arc<dyn Clock>,
        config: Arc<MonitorConfig>,
    ) -> Self {
        Self {
            collector,
            state_store,
            notification_service,
            clock,
            config,
            last_notified: Mutex::new(None),
        }
    }

    /// Start the polling loop; runs until the task is aborted
    pub async fn start(&self) -> Result<(), ScanError> {
        info!(
            "Starting slot polling every {}s for '{}'",
            self.config.check_interval.as_secs(),
            self.config.theme_name
        );

        let mut poll_interval = interval(self.config.check_interval);
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            poll_interval.tick().await;

            let hour = self.clock.now().hour();
            if !self.config.is_run_hour(hour) {
                debug!("Hour {} is outside run hours, skipping", hour);
                continue;
            }

            match self.run_once().await {
                Ok(summary) => info!(
                    "Run finished: {:?}, {} slots ({} available, {} new)",
                    summary.outcome,
                    summary.total_slots,
                    summary.available_slots,
                    summary.new_slots.len()
                ),
                Err(e) => error!("Polling run failed: {}", e),
            }
        }
    }

    /// Collect, diff against the persisted state, announce, persist
    pub async fn run_once(&self) -> Result<RunSummary, ScanError> {
        let previous = self.state_store.load().await?;

        let now = self.clock.now();
        let start = self.config.date_start.max(now.date());
        let end = self.config.date_end;
        if end < start {
            info!("Monitoring window ended on {}", end);
            return Ok(RunSummary::window_closed());
        }

        let report = self
            .collector
            .collect_report(start, end, self.config.exclude_past)
            .await;

        let mut current = report.slots;
        let cutoff = self.config.exclude_past.then(|| self.clock.now());
        let unread_dates: Vec<NaiveDate> = report
            .failed_dates
            .iter()
            .chain(&report.theme_missing_dates)
            .copied()
            .collect();
        carry_over_unread_dates(&previous, &mut current, &unread_dates, cutoff);

        let new_slots = find_new_availability(&previous, &current);
        let mut summary = RunSummary {
            total_slots: current.len(),
            available_slots: current.values().filter(|v| v.is_available()).count(),
            new_slots,
            failed_dates: report.failed_dates,
            theme_missing_dates: report.theme_missing_dates,
            outcome: RunOutcome::NothingNew,
        };

        if summary.new_slots.is_empty() {
            debug!("No new availability");
            self.state_store.save(&current).await?;
        } else if self.in_cooldown(now).await {
            info!(
                "Found {} new slots inside the notification cooldown, deferring",
                summary.new_slots.len()
            );
            summary.outcome = RunOutcome::Deferred;
        } else {
            info!("Found {} newly available slots", summary.new_slots.len());
            match self
                .notification_service
                .send_availability_notification(&self.config.theme_name, &summary.new_slots)
                .await
            {
                Ok(()) => {
                    *self.last_notified.lock().await = Some(now);
                    self.state_store.save(&current).await?;
                    summary.outcome = RunOutcome::Notified;
                }
                Err(e) => {
                    // state stays behind so the next run announces again
                    error!("Failed to send availability notification: {}", e);
                    summary.outcome = RunOutcome::NotificationFailed;
                }
            }
        }

        let stats = self.collector.session_stats().await;
        debug!(
            "Session {} after {} bootstraps (token: {})",
            stats.state, stats.bootstrap_count, stats.has_token
        );

        Ok(summary)
    }

    async fn in_cooldown(&self, now: NaiveDateTime) -> bool {
        let Some(last) = *self.last_notified.lock().await else {
            return false;
        };
        let cooldown = chrono::Duration::from_std(self.config.notification_cooldown)
            .unwrap_or_else(|_| chrono::Duration::zero());
        now - last < cooldown
    }
}

/// Slots that are available now but were not available in `previous`
pub fn find_new_availability(previous: &SlotMap, current: &SlotMap) -> Vec<SlotKey> {
    current
        .iter()
        .filter(|(_, verdict)| verdict.is_available())
        .filter(|(key, _)| !previous.get(key).is_some_and(|v| v.is_available()))
        .map(|(key, _)| *key)
        .collect()
}

/// Keep last run's entries for dates that yielded no slots this time,
/// either because the fetch failed or the theme was not listed
fn carry_over_unread_dates(
    previous: &SlotMap,
    current: &mut SlotMap,
    unread_dates: &[NaiveDate],
    cutoff: Option<NaiveDateTime>,
) {
    for (key, verdict) in previous {
        if !unread_dates.contains(&key.date) {
            continue;
        }
        if cutoff.is_some_and(|cutoff| key.datetime() <= cutoff) {
            continue;
        }
        current.entry(*key).or_insert(*verdict);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::notification_service::NotificationServiceImpl;
    use crate::scan_types::SlotVerdict;
    use crate::telegram_service::MockMessengerService;
    use crate::test_support::*;
    use crate::transport::TransportResponse;

    const DAY: &str = "2025-09-01";

    struct Harness {
        executor: ScanExecutor,
        transport: Arc<MockTransport>,
        messenger: Arc<MockMessengerService>,
        store: StateStore,
        _dir: tempfile::TempDir,
    }

    fn harness(now: &str, cooldown: Duration) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(MonitorConfig {
            date_start: date(DAY),
            date_end: date("2025-09-02"),
            state_file: dir.path().join("state.json"),
            notification_cooldown: cooldown,
            ..MonitorConfig::default()
        });

        let transport = Arc::new(MockTransport::new());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::at(now));
        let messenger = Arc::new(MockMessengerService::new());
        let store = StateStore::new(&config.state_file);

        let executor = ScanExecutor::new(
            SlotCollector::from_config(transport.clone(), clock.clone(), &config),
            store.clone(),
            Arc::new(NotificationServiceImpl::from_config(
                Some(messenger.clone()),
                &config,
            )),
            clock,
            config,
        );

        Harness {
            executor,
            transport,
            messenger,
            store,
            _dir: dir,
        }
    }

    fn key(s: &str) -> SlotKey {
        s.parse().unwrap()
    }

    fn serve(h: &Harness, day: &str, slots: &[(&str, bool)]) {
        h.transport
            .set_page(day, TransportResponse::new(200, reservation_page(None)));
        h.transport.replace_api(
            day,
            TransportResponse::new(200, api_json("층간소음", 7, slots)),
        );
    }

    #[test]
    fn test_find_new_availability() {
        let previous: SlotMap = [
            (key("2025-09-01 18:30:00"), SlotVerdict::Available),
            (key("2025-09-01 20:00:00"), SlotVerdict::SoldOut),
        ]
        .into();
        let current: SlotMap = [
            (key("2025-09-01 18:30:00"), SlotVerdict::Available),
            (key("2025-09-01 20:00:00"), SlotVerdict::Available),
            (key("2025-09-01 21:30:00"), SlotVerdict::Available),
            (key("2025-09-01 23:00:00"), SlotVerdict::SoldOut),
        ]
        .into();

        assert_eq!(
            find_new_availability(&previous, &current),
            vec![key("2025-09-01 20:00:00"), key("2025-09-01 21:30:00")]
        );
        assert!(find_new_availability(&current, &current).is_empty());
    }

    #[tokio::test]
    async fn test_new_slot_is_announced_once() {
        let h = harness("2025-08-31 12:00:00", Duration::ZERO);
        serve(&h, DAY, &[("18:30:00", false), ("20:00:00", true)]);
        serve(&h, "2025-09-02", &[("18:30:00", true)]);

        let first = h.executor.run_once().await.unwrap();
        assert_eq!(first.outcome, RunOutcome::Notified);
        assert_eq!(first.new_slots, vec![key("2025-09-01 18:30:00")]);
        assert_eq!(first.total_slots, 3);
        assert_eq!(h.messenger.sent().len(), 1);
        assert!(h.messenger.sent()[0].contains("2025-09-01"));

        let second = h.executor.run_once().await.unwrap();
        assert_eq!(second.outcome, RunOutcome::NothingNew);
        assert_eq!(h.messenger.sent().len(), 1);

        let saved = h.store.load().await.unwrap();
        assert_eq!(saved[&key("2025-09-01 18:30:00")], SlotVerdict::Available);
        assert_eq!(saved[&key("2025-09-01 20:00:00")], SlotVerdict::SoldOut);
    }

    #[tokio::test]
    async fn test_sold_out_slot_reopening_is_announced() {
        let h = harness("2025-08-31 12:00:00", Duration::ZERO);
        serve(&h, DAY, &[("18:30:00", true)]);
        serve(&h, "2025-09-02", &[]);

        assert_eq!(h.executor.run_once().await.unwrap().outcome, RunOutcome::NothingNew);

        serve(&h, DAY, &[("18:30:00", false)]);
        let summary = h.executor.run_once().await.unwrap();
        assert_eq!(summary.outcome, RunOutcome::Notified);
        assert_eq!(summary.new_slots, vec![key("2025-09-01 18:30:00")]);
    }

    #[tokio::test]
    async fn test_failed_notification_keeps_previous_state() {
        let h = harness("2025-08-31 12:00:00", Duration::ZERO);
        serve(&h, DAY, &[("18:30:00", false)]);
        serve(&h, "2025-09-02", &[]);
        h.messenger.set_failing(true);

        let failed = h.executor.run_once().await.unwrap();
        assert_eq!(failed.outcome, RunOutcome::NotificationFailed);
        assert!(h.store.load().await.unwrap().is_empty());

        h.messenger.set_failing(false);
        let retried = h.executor.run_once().await.unwrap();
        assert_eq!(retried.outcome, RunOutcome::Notified);
        assert_eq!(retried.new_slots, vec![key("2025-09-01 18:30:00")]);
    }

    #[tokio::test]
    async fn test_cooldown_defers_announcement() {
        let h = harness("2025-08-31 12:00:00", Duration::from_secs(300));
        serve(&h, DAY, &[("18:30:00", false), ("20:00:00", true)]);
        serve(&h, "2025-09-02", &[]);

        assert_eq!(h.executor.run_once().await.unwrap().outcome, RunOutcome::Notified);

        serve(&h, DAY, &[("18:30:00", false), ("20:00:00", false)]);
        let deferred = h.executor.run_once().await.unwrap();
        assert_eq!(deferred.outcome, RunOutcome::Deferred);
        assert_eq!(deferred.new_slots, vec![key("2025-09-01 20:00:00")]);
        assert_eq!(h.messenger.sent().len(), 1);

        // the deferred slot is still new relative to the persisted state
        let saved = h.store.load().await.unwrap();
        assert_eq!(saved[&key("2025-09-01 20:00:00")], SlotVerdict::SoldOut);
    }

    #[tokio::test]
    async fn test_failed_date_carries_previous_entries() {
        let h = harness("2025-08-31 12:00:00", Duration::ZERO);
        serve(&h, DAY, &[("18:30:00", false)]);
        serve(&h, "2025-09-02", &[("11:00:00", false)]);
        assert_eq!(h.executor.run_once().await.unwrap().outcome, RunOutcome::Notified);

        h.transport
            .set_page("2025-09-02", TransportResponse::new(NETWORK_FAILURE, ""));
        let summary = h.executor.run_once().await.unwrap();
        assert_eq!(summary.outcome, RunOutcome::NothingNew);
        assert_eq!(summary.failed_dates, vec![date("2025-09-02")]);

        let saved = h.store.load().await.unwrap();
        assert_eq!(saved[&key("2025-09-02 11:00:00")], SlotVerdict::Available);

        // back online: the slot is not announced a second time
        serve(&h, "2025-09-02", &[("11:00:00", false)]);
        let summary = h.executor.run_once().await.unwrap();
        assert_eq!(summary.outcome, RunOutcome::NothingNew);
        assert_eq!(h.messenger.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_theme_keeps_previous_entries() {
        let h = harness("2025-08-31 12:00:00", Duration::ZERO);
        serve(&h, DAY, &[("18:30:00", false)]);
        serve(&h, "2025-09-02", &[("11:00:00", false)]);
        assert_eq!(h.executor.run_once().await.unwrap().outcome, RunOutcome::Notified);

        // the theme drops off the list for one run
        h.transport.replace_api(
            "2025-09-02",
            TransportResponse::new(200, api_json("사랑하는감?", 9, &[("11:00:00", false)])),
        );
        let summary = h.executor.run_once().await.unwrap();
        assert_eq!(summary.theme_missing_dates, vec![date("2025-09-02")]);
        assert_eq!(summary.outcome, RunOutcome::NothingNew);
        let saved = h.store.load().await.unwrap();
        assert_eq!(saved[&key("2025-09-02 11:00:00")], SlotVerdict::Available);

        serve(&h, "2025-09-02", &[("11:00:00", false)]);
        let summary = h.executor.run_once().await.unwrap();
        assert_eq!(summary.outcome, RunOutcome::NothingNew);
        assert_eq!(h.messenger.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_closed_window_does_nothing() {
        let h = harness("2025-09-05 09:00:00", Duration::ZERO);
        let summary = h.executor.run_once().await.unwrap();
        assert_eq!(summary.outcome, RunOutcome::WindowClosed);
        assert_eq!(h.transport.page_calls(), 0);
    }
}
