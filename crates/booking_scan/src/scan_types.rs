use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use serde_json::Value;

/// Format of a slot key, shared by logs and the persisted state file
pub const SLOT_KEY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Custom error type for scan operations
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// Timeout, connection failure or an unexpected HTTP status
    #[error("Network error: {0}")]
    Network(String),

    /// Malformed JSON or markup
    #[error("Data format error: {0}")]
    DataFormat(String),

    /// Anti-forgery token missing or rejected by the booking site
    #[error("Authentication failed with booking site")]
    AuthenticationFailed,

    /// Rate limited by the booking site
    #[error("Rate limited by booking site")]
    RateLimited,

    /// No theme on the site matches the configured name
    #[error("Theme not found: {0}")]
    ThemeNotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// State file error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScanError {
    /// Map a non-success HTTP status onto the error taxonomy
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => ScanError::RateLimited,
            // 419 is how the site reports a stale anti-forgery token
            401 | 403 | 419 => ScanError::AuthenticationFailed,
            _ => ScanError::Network(format!("HTTP {}", status)),
        }
    }
}

/// Reconciled availability decision for one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotVerdict {
    /// The slot can be booked
    #[serde(rename = "예약가능")]
    Available,
    /// The slot is taken, in the past, or its state is unknown
    #[serde(rename = "매진")]
    SoldOut,
}

impl SlotVerdict {
    /// Verdict from a plain availability flag
    pub fn from_available(available: bool) -> Self {
        if available {
            SlotVerdict::Available
        } else {
            SlotVerdict::SoldOut
        }
    }

    /// Whether the slot can be booked
    pub fn is_available(self) -> bool {
        self == SlotVerdict::Available
    }

    /// The literal used in the persisted state file
    pub fn as_str(self) -> &'static str {
        match self {
            SlotVerdict::Available => "예약가능",
            SlotVerdict::SoldOut => "매진",
        }
    }
}

impl fmt::Display for SlotVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bookable (date, time) in the site's local timezone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    /// Calendar date of the slot
    pub date: NaiveDate,
    /// Start time of the slot
    pub time: NaiveTime,
}

impl SlotKey {
    /// Create a key from its parts
    pub fn new(date: NaiveDate, time: NaiveTime) -> Self {
        Self { date, time }
    }

    /// Build a key from the time string the booking API returns
    pub fn from_api_time(date: NaiveDate, time_str: &str) -> Result<Self, ScanError> {
        parse_slot_time(time_str)
            .map(|time| Self::new(date, time))
            .ok_or_else(|| ScanError::DataFormat(format!("Invalid slot time: {:?}", time_str)))
    }

    /// Wall-clock moment of the slot
    pub fn datetime(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.datetime().format(SLOT_KEY_FORMAT))
    }
}

impl FromStr for SlotKey {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let datetime = NaiveDateTime::parse_from_str(s.trim(), SLOT_KEY_FORMAT)
            .map_err(|e| ScanError::DataFormat(format!("Invalid slot key {:?}: {}", s, e)))?;
        Ok(Self::new(datetime.date(), datetime.time()))
    }
}

impl Serialize for SlotKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SlotKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// One verdict per slot, ordered by date then time
pub type SlotMap = BTreeMap<SlotKey, SlotVerdict>;

/// Parse the API's `HH:MM:SS` time, tolerating a missing seconds field
pub fn parse_slot_time(time_str: &str) -> Option<NaiveTime> {
    let trimmed = time_str.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
        .ok()
}

/// Response body of the theme/slot API
#[derive(Debug, Default, Deserialize)]
pub struct ThemeApiResponse {
    /// Every theme the venue offers on the requested date
    #[serde(default)]
    pub data: Vec<ThemeDescriptor>,

    /// Time slots keyed by stringified theme PK
    #[serde(default)]
    pub times: HashMap<String, Vec<TimeSlotDescriptor>>,
}

/// A theme entry from the API's `data` list
#[derive(Debug, Clone, Deserialize)]
pub struct ThemeDescriptor {
    /// Display name of the theme
    #[serde(default)]
    pub title: String,

    /// Theme primary key, keying `times` and the ledger
    #[serde(rename = "PK", default, deserialize_with = "lenient_pk")]
    pub pk: Option<i64>,
}

/// A time slot entry from the API's `times` mapping
#[derive(Debug, Clone, Deserialize)]
pub struct TimeSlotDescriptor {
    /// Start time as `HH:MM:SS`
    #[serde(default)]
    pub time: String,

    /// True when the API already reports the slot as taken
    #[serde(default, deserialize_with = "lenient_flag")]
    pub reservation: bool,
}

impl ThemeApiResponse {
    /// First theme whose title contains the configured name or is contained by it
    pub fn find_theme(&self, theme_name: &str) -> Option<(&ThemeDescriptor, i64)> {
        self.data.iter().find_map(|theme| {
            let title = theme.title.trim();
            if title.is_empty() {
                return None;
            }
            let matches = title.contains(theme_name) || theme_name.contains(title);
            match (matches, theme.pk) {
                (true, Some(pk)) => Some((theme, pk)),
                _ => None,
            }
        })
    }

    /// Slot descriptors for a theme, empty when the API lists none
    pub fn times_for(&self, theme_pk: i64) -> &[TimeSlotDescriptor] {
        self.times
            .get(&theme_pk.to_string())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

fn lenient_pk<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_i64().is_some_and(|v| v != 0),
        Value::String(s) => matches!(s.trim(), "1" | "true"),
        _ => false,
    })
}

/// Booked epoch-second timestamps per theme, scraped from the reservation page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HiddenLedger {
    reservations: HashMap<String, HashSet<String>>,
}

impl HiddenLedger {
    /// Parse the JSON text of the ledger element
    pub fn from_json_str(text: &str) -> Result<Self, ScanError> {
        let value: Value = serde_json::from_str(text.trim())
            .map_err(|e| ScanError::DataFormat(format!("Ledger JSON parse failed: {}", e)))?;

        if !value.is_object() {
            return Err(ScanError::DataFormat(
                "Ledger is not a JSON object".to_string(),
            ));
        }

        Ok(Self::from_value(&value))
    }

    /// Read the `other` field; anything unexpected inside it is skipped
    pub fn from_value(value: &Value) -> Self {
        let mut reservations = HashMap::new();

        if let Some(Value::Object(themes)) = value.get("other") {
            for (theme_pk, booked) in themes {
                let timestamps: HashSet<String> = match booked {
                    Value::Object(entries) => entries.keys().cloned().collect(),
                    Value::Array(entries) => entries
                        .iter()
                        .filter_map(|entry| match entry {
                            Value::String(s) => Some(s.clone()),
                            Value::Number(n) => Some(n.to_string()),
                            _ => None,
                        })
                        .collect(),
                    _ => continue,
                };
                reservations.insert(theme_pk.trim().to_string(), timestamps);
            }
        }

        Self { reservations }
    }

    /// Record a booking, mostly useful when building fixtures
    pub fn insert(&mut self, theme_pk: i64, timestamp: i64) {
        self.reservations
            .entry(theme_pk.to_string())
            .or_default()
            .insert(timestamp.to_string());
    }

    /// True when the ledger knows about no theme at all
    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }

    /// Booked timestamps for a theme; `None` when the theme has no entries
    pub fn theme_entries(&self, theme_pk: i64) -> Option<&HashSet<String>> {
        self.reservations
            .get(&theme_pk.to_string())
            .filter(|entries| !entries.is_empty())
    }

    /// Number of themes present in the ledger
    pub fn theme_count(&self) -> usize {
        self.reservations.len()
    }
}
