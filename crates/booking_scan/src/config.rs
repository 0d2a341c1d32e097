use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{Days, FixedOffset, NaiveDate, Offset, Utc};
use validator::{Validate, ValidationError};

use crate::scan_types::{ScanError, SlotKey};

const DEFAULT_WINDOW_DAYS: u64 = 30;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Everything the watcher needs, built once at process start
#[derive(Debug, Clone, Validate)]
#[validate(schema(function = "validate_windows"))]
pub struct MonitorConfig {
    /// Display name of the theme to watch, matched by substring
    #[validate(length(min = 1, message = "Theme name is required"))]
    pub theme_name: String,

    /// First date of the window (inclusive)
    pub date_start: NaiveDate,

    /// Last date of the window (inclusive)
    pub date_end: NaiveDate,

    /// Site root, also sent as the Origin header
    #[validate(url(message = "Base URL must be a valid URL"))]
    pub base_url: String,

    /// Path of the reservation page, relative to the base URL
    pub reservation_path: String,

    /// Path of the theme/slot API, relative to the base URL
    pub api_path: String,

    /// User-Agent sent with every request
    pub user_agent: String,

    /// Timeout for every single request
    pub request_timeout: Duration,

    /// Offset of the site's local time from UTC, in hours
    #[validate(range(min = -12, max = 14))]
    pub utc_offset_hours: i32,

    /// Pause between two polling runs
    pub check_interval: Duration,

    /// Site-local hours in which polling runs, as `start..end`
    pub run_hours: (u32, u32),

    /// Location of the persisted slot state
    pub state_file: PathBuf,

    /// Slots that always resolve to sold out
    pub excluded_slots: HashSet<SlotKey>,

    /// Drop slots at or before "now" from collected maps
    pub exclude_past: bool,

    /// Bot token for Telegram announcements
    pub telegram_bot_token: Option<String>,
    /// Chat receiving the announcements
    pub telegram_chat_id: Option<i64>,

    /// Upper bound on slots listed in one message
    #[validate(range(min = 1))]
    pub max_notification_slots: usize,

    /// Minimum gap between two announcements
    pub notification_cooldown: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        let utc_offset_hours = 9; // Asia/Seoul
        let date_start = site_today(utc_offset_hours);
        Self {
            theme_name: "층간소음".to_string(),
            date_start,
            date_end: default_window_end(date_start),
            base_url: "https://zerohongdae.com".to_string(),
            reservation_path: "/reservation".to_string(),
            api_path: "/reservation/theme".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(10),
            utc_offset_hours,
            check_interval: Duration::from_secs(60),
            run_hours: (0, 24),
            state_file: PathBuf::from("state.json"),
            excluded_slots: HashSet::new(),
            exclude_past: true,
            telegram_bot_token: None,
            telegram_chat_id: None,
            max_notification_slots: 10,
            notification_cooldown: Duration::from_secs(300),
        }
    }
}

impl MonitorConfig {
    /// Build the configuration from process environment variables
    pub fn from_env() -> Result<Self, ScanError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ScanError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let utc_offset_hours = parse_or(
            get("SITE_UTC_OFFSET_HOURS"),
            "SITE_UTC_OFFSET_HOURS",
            defaults.utc_offset_hours,
        )?;

        let date_start = match get("DATE_START") {
            Some(raw) => parse_date("DATE_START", &raw)?,
            None => site_today(utc_offset_hours),
        };
        let date_end = match get("DATE_END") {
            Some(raw) => parse_date("DATE_END", &raw)?,
            None => default_window_end(date_start),
        };

        let run_hours = match get("RUN_HOURS") {
            Some(raw) => parse_hour_range(&raw)?,
            None => defaults.run_hours,
        };

        let excluded_slots = match get("EXCLUDED_SLOTS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(|entry| {
                    entry.parse::<SlotKey>().map_err(|e| {
                        ScanError::ConfigError(format!("EXCLUDED_SLOTS: {}", e))
                    })
                })
                .collect::<Result<HashSet<_>, _>>()?,
            None => HashSet::new(),
        };

        let config = Self {
            theme_name: get("THEME_NAME").unwrap_or(defaults.theme_name),
            date_start,
            date_end,
            base_url: get("BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            reservation_path: get("RESERVATION_PATH").unwrap_or(defaults.reservation_path),
            api_path: get("API_PATH").unwrap_or(defaults.api_path),
            user_agent: get("USER_AGENT").unwrap_or(defaults.user_agent),
            request_timeout: Duration::from_secs(parse_or(
                get("REQUEST_TIMEOUT"),
                "REQUEST_TIMEOUT",
                defaults.request_timeout.as_secs(),
            )?),
            utc_offset_hours,
            check_interval: parse_minutes(
                get("CHECK_INTERVAL_MINUTES"),
                "CHECK_INTERVAL_MINUTES",
                1,
            )?,
            run_hours,
            state_file: get("STATE_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.state_file),
            excluded_slots,
            exclude_past: parse_or(
                get("EXCLUDE_PAST_SLOTS"),
                "EXCLUDE_PAST_SLOTS",
                defaults.exclude_past,
            )?,
            telegram_bot_token: get("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: get("TELEGRAM_CHAT_ID")
                .map(|raw| parse_value("TELEGRAM_CHAT_ID", &raw))
                .transpose()?,
            max_notification_slots: parse_or(
                get("MAX_NOTIFICATION_SLOTS"),
                "MAX_NOTIFICATION_SLOTS",
                defaults.max_notification_slots,
            )?,
            notification_cooldown: Duration::from_secs(parse_or(
                get("NOTIFICATION_COOLDOWN"),
                "NOTIFICATION_COOLDOWN",
                defaults.notification_cooldown.as_secs(),
            )?),
        };

        config
            .validate()
            .map_err(|e| ScanError::ConfigError(e.to_string()))?;

        Ok(config)
    }

    /// URL of the reservation page
    pub fn reservation_url(&self) -> String {
        format!("{}{}", self.base_url, self.reservation_path)
    }

    /// URL of the theme/slot API
    pub fn api_url(&self) -> String {
        format!("{}{}", self.base_url, self.api_path)
    }

    /// Site-local timezone as a fixed offset
    pub fn site_offset(&self) -> FixedOffset {
        site_offset(self.utc_offset_hours)
    }

    /// Whether the given site-local hour falls inside `run_hours`
    pub fn is_run_hour(&self, hour: u32) -> bool {
        let (start, end) = self.run_hours;
        hour >= start && hour < end
    }
}

fn site_offset(hours: i32) -> FixedOffset {
    FixedOffset::east_opt(hours * 3600).unwrap_or_else(|| Utc.fix())
}

fn site_today(offset_hours: i32) -> NaiveDate {
    Utc::now().with_timezone(&site_offset(offset_hours)).date_naive()
}

fn default_window_end(start: NaiveDate) -> NaiveDate {
    start
        .checked_add_days(Days::new(DEFAULT_WINDOW_DAYS))
        .unwrap_or(start)
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ScanError>
where
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e| ScanError::ConfigError(format!("{}={:?}: {}", key, raw, e)))
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T, ScanError>
where
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_minutes(raw: Option<String>, key: &str, default: u64) -> Result<Duration, ScanError> {
    let minutes: u64 = parse_or(raw, key, default)?;
    minutes
        .checked_mul(60)
        .map(Duration::from_secs)
        .ok_or_else(|| ScanError::ConfigError(format!("{}={} is too large", key, minutes)))
}

fn parse_date(key: &str, raw: &str) -> Result<NaiveDate, ScanError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| ScanError::ConfigError(format!("{}={:?}: {}", key, raw, e)))
}

fn parse_hour_range(raw: &str) -> Result<(u32, u32), ScanError> {
    let (start, end) = raw
        .split_once('-')
        .ok_or_else(|| ScanError::ConfigError(format!("RUN_HOURS={:?}: expected start-end", raw)))?;
    Ok((
        parse_value("RUN_HOURS", start.trim())?,
        parse_value("RUN_HOURS", end.trim())?,
    ))
}

fn validate_windows(config: &MonitorConfig) -> Result<(), ValidationError> {
    if config.date_end < config.date_start {
        return Err(ValidationError::new("date_end_before_date_start"));
    }

    let (start, end) = config.run_hours;
    if start >= end || end > 24 {
        return Err(ValidationError::new("invalid_run_hours"));
    }

    if config.check_interval.is_zero() {
        return Err(ValidationError::new("zero_check_interval"));
    }

    if config.request_timeout.is_zero() || config.request_timeout > Duration::from_secs(120) {
        return Err(ValidationError::new("invalid_request_timeout"));
    }

    Ok(())
}
