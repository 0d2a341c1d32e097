use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::markup::extract_hidden_ledger;
use crate::scan_types::{HiddenLedger, ScanError, ThemeApiResponse};
use crate::session_manager::{ReauthBudget, SessionManager, SessionStats};
use crate::transport::BookingTransport;

/// Both data sources for one date
#[derive(Debug)]
pub struct DayFetch {
    /// Mandatory theme/slot API response
    pub api: ThemeApiResponse,
    /// Supplementary page ledger, empty when it could not be read
    pub ledger: HiddenLedger,
}

/// Client for the booking site's reservation page and theme API
pub struct BookingClient {
    transport: Arc<dyn BookingTransport>,
    session_manager: SessionManager,
    reservation_url: String,
    api_url: String,
}

impl BookingClient {
    /// Create a client; its session is bootstrapped on first use
    pub fn new(transport: Arc<dyn BookingTransport>, config: &MonitorConfig) -> Self {
        Self {
            session_manager: SessionManager::new(transport.clone(), config),
            transport,
            reservation_url: config.reservation_url(),
            api_url: config.api_url(),
        }
    }

    /// Fetch the page ledger and the API response for one date
    pub async fn fetch(&self, date: NaiveDate) -> Result<DayFetch, ScanError> {
        let date_str = date.format("%Y-%m-%d").to_string();

        let ledger = self.fetch_hidden_ledger(&date_str).await?;
        let api = self.fetch_theme_data(&date_str).await?;

        Ok(DayFetch { api, ledger })
    }

    /// Start a fresh session; the next API call bootstraps again
    pub async fn reset_session(&self) {
        self.session_manager.reset().await;
    }

    /// Statistics of the underlying session
    pub async fn session_stats(&self) -> SessionStats {
        self.session_manager.get_session_stats().await
    }

    /// GET the reservation page; only the page status is fatal, the ledger itself is not
    async fn fetch_hidden_ledger(&self, date_str: &str) -> Result<HiddenLedger, ScanError> {
        info!("Fetching reservation page for {}", date_str);

        let response = self
            .transport
            .get(&self.reservation_url, &[("date", date_str.to_string())])
            .await?;

        if !response.is_success() {
            warn!(
                "Reservation page for {} failed with status {}",
                date_str, response.status
            );
            return Err(ScanError::Network(format!(
                "Reservation page HTTP {}",
                response.status
            )));
        }

        match extract_hidden_ledger(&response.body) {
            Ok(ledger) => {
                debug!(
                    "Hidden ledger for {} covers {} themes",
                    date_str,
                    ledger.theme_count()
                );
                Ok(ledger)
            }
            Err(e) => {
                warn!("Hidden ledger unavailable for {}: {}", date_str, e);
                Ok(HiddenLedger::default())
            }
        }
    }

    /// POST the theme API, re-bootstrapping the session at most once
    async fn fetch_theme_data(&self, date_str: &str) -> Result<ThemeApiResponse, ScanError> {
        let mut budget = ReauthBudget::once();
        let mut token = self.session_manager.ensure_token().await;

        loop {
            let current = match token.take() {
                Some(token) => token,
                None => {
                    warn!("No anti-forgery token for {}, re-initializing session", date_str);
                    self.session_manager
                        .reauthenticate(&mut budget)
                        .await
                        .ok_or(ScanError::AuthenticationFailed)?
                }
            };

            match self.post_theme_request(date_str, &current).await {
                Err(ScanError::AuthenticationFailed) => {
                    self.session_manager.mark_rejected().await;
                }
                other => return other,
            }
        }
    }

    async fn post_theme_request(
        &self,
        date_str: &str,
        token: &str,
    ) -> Result<ThemeApiResponse, ScanError> {
        let form = [
            ("reservationDate", date_str.to_string()),
            ("name", String::new()),
            ("phone", String::new()),
            ("paymentType", "1".to_string()),
        ];
        let headers = [
            ("X-Requested-With", "XMLHttpRequest".to_string()),
            ("X-CSRF-TOKEN", token.to_string()),
            (
                "Accept",
                "application/json, text/javascript, */*; q=0.01".to_string(),
            ),
        ];

        let response = self
            .transport
            .post_form(&self.api_url, &form, &headers)
            .await?;

        info!("API request for {}: HTTP {}", date_str, response.status);

        if !response.is_success() {
            debug!("API response body: {}", response.body_preview());
            return Err(ScanError::from_status(response.status));
        }

        serde_json::from_str(&response.body).map_err(|e| {
            debug!("API response body: {}", response.body_preview());
            ScanError::DataFormat(format!("Failed to parse theme API response: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use crate::transport::TransportResponse;

    const DAY: &str = "2025-09-01";

    fn client(transport: &Arc<MockTransport>) -> BookingClient {
        BookingClient::new(transport.clone(), &MonitorConfig::default())
    }

    #[tokio::test]
    async fn test_fetch_returns_both_sources() {
        let transport = Arc::new(MockTransport::new());
        transport.serve_date(
            DAY,
            Some(r#"{"other":{"7":{"1756719000":1}}}"#),
            &api_json("층간소음", 7, &[("18:30:00", false)]),
        );

        let day = client(&transport).fetch(date(DAY)).await.unwrap();
        assert_eq!(day.api.times_for(7).len(), 1);
        assert!(day.ledger.theme_entries(7).unwrap().contains("1756719000"));
        assert_eq!(transport.api_tokens(), vec![Some("test-token".to_string())]);
    }

    #[tokio::test]
    async fn test_missing_ledger_is_not_fatal() {
        let transport = Arc::new(MockTransport::new());
        transport.serve_date(DAY, None, &api_json("층간소음", 7, &[("18:30:00", false)]));

        let day = client(&transport).fetch(date(DAY)).await.unwrap();
        assert!(day.ledger.is_empty());
        assert_eq!(day.api.data.len(), 1);
    }

    #[tokio::test]
    async fn test_page_failure_fails_the_date() {
        let transport = Arc::new(MockTransport::new());
        transport.set_page(DAY, TransportResponse::new(500, "oops"));
        transport.push_api(DAY, TransportResponse::new(200, "{}"));

        let result = client(&transport).fetch(date(DAY)).await;
        assert!(matches!(result, Err(ScanError::Network(_))));
        assert_eq!(transport.api_calls(), 0);
    }

    #[tokio::test]
    async fn test_api_failures_fail_the_date() {
        let transport = Arc::new(MockTransport::new());
        transport.set_page(DAY, TransportResponse::new(200, reservation_page(None)));
        transport.push_api(DAY, TransportResponse::new(200, "<html>login</html>"));
        let result = client(&transport).fetch(date(DAY)).await;
        assert!(matches!(result, Err(ScanError::DataFormat(_))));

        let transport = Arc::new(MockTransport::new());
        transport.set_page(DAY, TransportResponse::new(200, reservation_page(None)));
        transport.push_api(DAY, TransportResponse::new(NETWORK_FAILURE, ""));
        let result = client(&transport).fetch(date(DAY)).await;
        assert!(matches!(result, Err(ScanError::Network(_))));
    }

    #[tokio::test]
    async fn test_rejected_token_retries_once() {
        let transport = Arc::new(MockTransport::new());
        transport.push_landing(TransportResponse::new(200, landing_page("stale")));
        transport.push_landing(TransportResponse::new(200, landing_page("fresh")));
        transport.set_page(DAY, TransportResponse::new(200, reservation_page(None)));
        transport.push_api(DAY, TransportResponse::new(419, "CSRF token mismatch"));
        transport.push_api(
            DAY,
            TransportResponse::new(200, api_json("층간소음", 7, &[("18:30:00", false)])),
        );

        let client = client(&transport);
        assert!(client.fetch(date(DAY)).await.is_ok());
        assert_eq!(
            transport.api_tokens(),
            vec![Some("stale".to_string()), Some("fresh".to_string())]
        );
        assert_eq!(transport.landing_calls(), 2);
        assert_eq!(client.session_stats().await.state, "ready");
    }

    #[tokio::test]
    async fn test_second_rejection_fails_without_looping() {
        let transport = Arc::new(MockTransport::new());
        transport.set_page(DAY, TransportResponse::new(200, reservation_page(None)));
        transport.push_api(DAY, TransportResponse::new(419, "CSRF token mismatch"));

        let client = client(&transport);
        let result = client.fetch(date(DAY)).await;
        assert!(matches!(result, Err(ScanError::AuthenticationFailed)));
        assert_eq!(transport.api_calls(), 2);
        assert_eq!(transport.landing_calls(), 2);
        assert_eq!(client.session_stats().await.state, "auth_expired");
    }

    #[tokio::test]
    async fn test_missing_token_bootstraps_once_then_fails() {
        let transport = Arc::new(MockTransport::new());
        transport.push_landing(TransportResponse::new(200, "<html>no token</html>"));
        transport.push_landing(TransportResponse::new(NETWORK_FAILURE, ""));
        transport.set_page(DAY, TransportResponse::new(200, reservation_page(None)));
        transport.push_api(DAY, TransportResponse::new(200, "{}"));

        let result = client(&transport).fetch(date(DAY)).await;
        assert!(matches!(result, Err(ScanError::AuthenticationFailed)));
        assert_eq!(transport.landing_calls(), 2);
        assert_eq!(transport.api_calls(), 0);
    }
}
