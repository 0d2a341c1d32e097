use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use tracing::{debug, info, warn};

use crate::booking_client::{BookingClient, DayFetch};
use crate::clock::Clock;
use crate::config::MonitorConfig;
use crate::reconcile::Reconciler;
use crate::scan_types::{ScanError, SlotKey, SlotMap, SlotVerdict};
use crate::session_manager::SessionStats;
use crate::transport::BookingTransport;

/// Result of one pass over the date window
#[derive(Debug, Default)]
pub struct CollectionReport {
    pub slots: SlotMap,
    /// Dates whose fetch failed and contributed nothing
    pub failed_dates: Vec<NaiveDate>,
    /// Dates on which the configured theme was not offered
    pub theme_missing_dates: Vec<NaiveDate>,
}

impl CollectionReport {
    /// Number of slots resolved to available
    pub fn available_count(&self) -> usize {
        self.slots.values().filter(|v| v.is_available()).count()
    }
}

/// Drives the booking client and the reconciler across a date window
pub struct SlotCollector {
    client: BookingClient,
    reconciler: Reconciler,
    clock: Arc<dyn Clock>,
    theme_name: String,
}

impl SlotCollector {
    /// Create a collector for `theme_name`
    pub fn new(
        client: BookingClient,
        reconciler: Reconciler,
        clock: Arc<dyn Clock>,
        theme_name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            reconciler,
            clock,
            theme_name: theme_name.into(),
        }
    }

    /// Wire a collector for the configured site and theme
    pub fn from_config(
        transport: Arc<dyn BookingTransport>,
        clock: Arc<dyn Clock>,
        config: &MonitorConfig,
    ) -> Self {
        Self::new(
            BookingClient::new(transport, config),
            Reconciler::from_config(config),
            clock,
            config.theme_name.clone(),
        )
    }

    /// Availability of the theme for every date from `start` to `end` inclusive
    pub async fn collect_availability(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        exclude_past: bool,
    ) -> SlotMap {
        self.collect_report(start, end, exclude_past).await.slots
    }

    /// Like `collect_availability`, also reporting which dates contributed nothing
    pub async fn collect_report(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        exclude_past: bool,
    ) -> CollectionReport {
        let mut report = CollectionReport::default();

        if end < start {
            warn!("Empty date window: {} is after {}", start, end);
            return report;
        }

        // one session per collection run
        self.client.reset_session().await;

        info!(
            "Collecting '{}' slots from {} to {} (now {})",
            self.theme_name,
            start,
            end,
            self.clock.now().format("%Y-%m-%d %H:%M:%S")
        );

        for date in start.iter_days().take_while(|date| *date <= end) {
            let day = match self.client.fetch(date).await {
                Ok(day) => day,
                Err(e) => {
                    warn!("Skipping {}: {}", date, e);
                    report.failed_dates.push(date);
                    continue;
                }
            };

            let slots = match self.extract_slots(&day, date, self.clock.now()) {
                Ok(slots) => slots,
                Err(e) => {
                    warn!("No slots for {}: {}", date, e);
                    report.theme_missing_dates.push(date);
                    continue;
                }
            };

            let cutoff = self.clock.now();
            let mut filtered = 0;
            for (key, verdict) in slots {
                if exclude_past && key.datetime() <= cutoff {
                    debug!("Dropping past slot {}", key);
                    filtered += 1;
                    continue;
                }

                // A time listed twice keeps the more conservative verdict
                report
                    .slots
                    .entry(key)
                    .and_modify(|existing| {
                        if verdict == SlotVerdict::SoldOut {
                            *existing = SlotVerdict::SoldOut;
                        }
                    })
                    .or_insert(verdict);
            }

            if filtered > 0 {
                info!("{}: dropped {} past slots", date, filtered);
            }
        }

        info!(
            "Collected {} slots ({} available, {} dates failed)",
            report.slots.len(),
            report.available_count(),
            report.failed_dates.len()
        );

        report
    }

    /// Resolve every slot the API lists for the configured theme on one date
    pub fn extract_slots(
        &self,
        day: &DayFetch,
        date: NaiveDate,
        now: NaiveDateTime,
    ) -> Result<Vec<(SlotKey, SlotVerdict)>, ScanError> {
        for (index, theme) in day.api.data.iter().enumerate() {
            debug!("  {}. '{}' (PK: {:?})", index + 1, theme.title, theme.pk);
        }

        let (theme, theme_pk) = day
            .api
            .find_theme(&self.theme_name)
            .ok_or_else(|| ScanError::ThemeNotFound(self.theme_name.clone()))?;

        debug!("Matched '{}' to '{}' (PK={})", self.theme_name, theme.title, theme_pk);

        let mut slots = Vec::new();
        for descriptor in day.api.times_for(theme_pk) {
            if descriptor.time.trim().is_empty() {
                continue;
            }

            let key = match SlotKey::from_api_time(date, &descriptor.time) {
                Ok(key) => key,
                Err(e) => {
                    warn!("Skipping slot on {}: {}", date, e);
                    continue;
                }
            };

            let verdict = self.reconciler.resolve(
                theme_pk,
                &descriptor.time,
                date,
                &day.ledger,
                descriptor.reservation,
                now,
            );
            debug!("  {} = {}", key, verdict);
            slots.push((key, verdict));
        }

        info!("{}: {} '{}' slots", date, slots.len(), self.theme_name);
        Ok(slots)
    }

    /// Statistics of the client's session
    pub async fn session_stats(&self) -> SessionStats {
        self.client.session_stats().await
    }
}
