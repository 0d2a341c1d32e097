//! Scripted transport and fixtures shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{FixedOffset, NaiveDate, NaiveDateTime, TimeZone};

use crate::clock::Clock;
use crate::scan_types::ScanError;
use crate::transport::{BookingTransport, TransportResponse};

/// Status used to simulate a connection failure or timeout
pub const NETWORK_FAILURE: u16 = 0;

/// In-memory transport answering from queued responses
pub struct MockTransport {
    landing: Mutex<VecDeque<TransportResponse>>,
    pages: Mutex<HashMap<String, TransportResponse>>,
    api: Mutex<HashMap<String, VecDeque<TransportResponse>>>,
    api_tokens: Mutex<Vec<Option<String>>>,
    landing_calls: AtomicUsize,
    page_calls: AtomicUsize,
    api_calls: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            landing: Mutex::new(VecDeque::new()),
            pages: Mutex::new(HashMap::new()),
            api: Mutex::new(HashMap::new()),
            api_tokens: Mutex::new(Vec::new()),
            landing_calls: AtomicUsize::new(0),
            page_calls: AtomicUsize::new(0),
            api_calls: AtomicUsize::new(0),
        }
    }

    /// Queue a landing-page reply; once drained, a page with token `test-token` is served
    pub fn push_landing(&self, response: TransportResponse) {
        self.landing.lock().unwrap().push_back(response);
    }

    pub fn set_page(&self, date: &str, response: TransportResponse) {
        self.pages.lock().unwrap().insert(date.to_string(), response);
    }

    /// Queue an API reply for a date; the last queued reply repeats
    pub fn push_api(&self, date: &str, response: TransportResponse) {
        self.api
            .lock()
            .unwrap()
            .entry(date.to_string())
            .or_default()
            .push_back(response);
    }

    /// Drop queued API replies for a date and serve `response` from now on
    pub fn replace_api(&self, date: &str, response: TransportResponse) {
        self.api
            .lock()
            .unwrap()
            .insert(date.to_string(), VecDeque::from([response]));
    }

    /// Serve the same page and API body for a date
    pub fn serve_date(&self, date: &str, ledger_json: Option<&str>, api_json: &str) {
        self.set_page(date, TransportResponse::new(200, reservation_page(ledger_json)));
        self.push_api(date, TransportResponse::new(200, api_json));
    }

    pub fn landing_calls(&self) -> usize {
        self.landing_calls.load(Ordering::SeqCst)
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }

    pub fn api_calls(&self) -> usize {
        self.api_calls.load(Ordering::SeqCst)
    }

    /// Anti-forgery tokens sent with each API call, in order
    pub fn api_tokens(&self) -> Vec<Option<String>> {
        self.api_tokens.lock().unwrap().clone()
    }
}

fn reply(response: TransportResponse) -> Result<TransportResponse, ScanError> {
    if response.status == NETWORK_FAILURE {
        Err(ScanError::Network("simulated connection failure".to_string()))
    } else {
        Ok(response)
    }
}

fn lookup<'a>(pairs: &'a [(&str, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(key))
        .map(|(_, value)| value.as_str())
}

#[async_trait]
impl BookingTransport for MockTransport {
    async fn get(
        &self,
        _url: &str,
        query: &[(&str, String)],
    ) -> Result<TransportResponse, ScanError> {
        match lookup(query, "date") {
            None => {
                self.landing_calls.fetch_add(1, Ordering::SeqCst);
                let queued = self.landing.lock().unwrap().pop_front();
                reply(queued.unwrap_or_else(|| {
                    TransportResponse::new(200, landing_page("test-token"))
                }))
            }
            Some(date) => {
                self.page_calls.fetch_add(1, Ordering::SeqCst);
                let page = self.pages.lock().unwrap().get(date).cloned();
                reply(page.unwrap_or_else(|| TransportResponse::new(404, "not found")))
            }
        }
    }

    async fn post_form(
        &self,
        _url: &str,
        form: &[(&str, String)],
        headers: &[(&str, String)],
    ) -> Result<TransportResponse, ScanError> {
        self.api_calls.fetch_add(1, Ordering::SeqCst);
        self.api_tokens
            .lock()
            .unwrap()
            .push(lookup(headers, "X-CSRF-TOKEN").map(str::to_string));

        let date = lookup(form, "reservationDate").unwrap_or_default().to_string();
        let mut api = self.api.lock().unwrap();
        let response = match api.get_mut(&date) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        reply(response.unwrap_or_else(|| TransportResponse::new(404, "not found")))
    }
}

/// Clock frozen at a site-local moment
pub struct FixedClock(pub NaiveDateTime);

impl FixedClock {
    pub fn at(s: &str) -> Self {
        Self(NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

pub fn seoul() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).unwrap()
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// Epoch seconds of a Seoul wall-clock moment
pub fn seoul_epoch(s: &str) -> i64 {
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap();
    seoul().from_local_datetime(&naive).unwrap().timestamp()
}

pub fn landing_page(token: &str) -> String {
    format!(
        r#"<html><head><meta name="csrf-token" content="{}"></head><body></body></html>"#,
        token
    )
}

pub fn reservation_page(ledger_json: Option<&str>) -> String {
    match ledger_json {
        Some(json) => format!(
            r#"<html><body><div id="reservationHiddenData" style="display:none">{}</div></body></html>"#,
            json
        ),
        None => "<html><body><p>no ledger here</p></body></html>".to_string(),
    }
}

/// API body offering one theme with the given slots
pub fn api_json(title: &str, pk: i64, slots: &[(&str, bool)]) -> String {
    let times: Vec<serde_json::Value> = slots
        .iter()
        .map(|(time, reserved)| serde_json::json!({"time": time, "reservation": reserved}))
        .collect();
    let mut by_theme = serde_json::Map::new();
    by_theme.insert(pk.to_string(), serde_json::Value::Array(times));
    serde_json::json!({
        "data": [{"title": title, "PK": pk}],
        "times": by_theme,
    })
    .to_string()
}
