use std::collections::HashSet;

use chrono::{FixedOffset, NaiveDate, NaiveDateTime, TimeZone};
use tracing::{debug, warn};

use crate::config::MonitorConfig;
use crate::scan_types::{HiddenLedger, SlotKey, SlotVerdict};

/// Merges the API's nominal flag with the page ledger into one verdict per slot.
///
/// Rules apply in order and the first one that fires decides:
/// 1. the API marks the slot reserved: sold out
/// 2. the slot is at or before `now`: sold out
/// 3. the ledger has nothing for the theme: the API flag decides
/// 4. the slot's epoch second is in the theme's ledger: sold out, otherwise available
///
/// A slot whose time cannot be converted resolves to sold out, as do configured exclusions.
#[derive(Debug, Clone)]
pub struct Reconciler {
    offset: FixedOffset,
    excluded_slots: HashSet<SlotKey>,
}

impl Reconciler {
    /// Reconciler for a site at `offset`, treating `excluded_slots` as sold out
    pub fn new(offset: FixedOffset, excluded_slots: HashSet<SlotKey>) -> Self {
        Self {
            offset,
            excluded_slots,
        }
    }

    /// Reconciler for the configured site offset and exclusions
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(config.site_offset(), config.excluded_slots.clone())
    }

    /// Decide whether one slot is truly available
    pub fn resolve(
        &self,
        theme_pk: i64,
        time_str: &str,
        date: NaiveDate,
        ledger: &HiddenLedger,
        api_reserved: bool,
        now: NaiveDateTime,
    ) -> SlotVerdict {
        if api_reserved {
            debug!("API reports {} {} reserved", date, time_str);
            return SlotVerdict::SoldOut;
        }

        let key = match SlotKey::from_api_time(date, time_str) {
            Ok(key) => key,
            Err(e) => {
                warn!("{}; treating {} {:?} as sold out", e, date, time_str);
                return SlotVerdict::SoldOut;
            }
        };

        if self.excluded_slots.contains(&key) {
            debug!("Slot {} is excluded by configuration", key);
            return SlotVerdict::SoldOut;
        }

        if key.datetime() <= now {
            debug!("Slot {} is in the past", key);
            return SlotVerdict::SoldOut;
        }

        let Some(booked) = ledger.theme_entries(theme_pk) else {
            debug!("No ledger entries for theme {}, using API result for {}", theme_pk, key);
            return SlotVerdict::from_available(!api_reserved);
        };

        let Some(timestamp) = self.slot_timestamp(&key) else {
            warn!("Timestamp conversion failed for {}; treating as sold out", key);
            return SlotVerdict::SoldOut;
        };

        let reserved = booked.contains(&timestamp.to_string());
        debug!(
            "Slot {} timestamp {} reserved in ledger: {}",
            key, timestamp, reserved
        );

        SlotVerdict::from_available(!reserved)
    }

    /// Epoch seconds of a slot in the site's timezone
    pub fn slot_timestamp(&self, key: &SlotKey) -> Option<i64> {
        self.offset
            .from_local_datetime(&key.datetime())
            .single()
            .map(|moment| moment.timestamp())
    }
}
