//! HTTP client for the accrual service.
//!
//! `GET {base_url}/api/orders/{number}` answers:
//! - `200` with `{"order", "status", "accrual"?}`
//! - `204` when the order is unknown to the accrual system
//! - `429` with `Retry-After` when the caller exceeds its request quota
//! - `5xx` on internal failures

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use super::{AccrualOracle, AccrualReport, OracleError};

/// Accrual client configuration.
#[derive(Debug, Clone)]
pub struct AccrualClientConfig {
    /// Base address of the accrual service, e.g. `http://localhost:8081`.
    pub base_url: String,

    /// Timeout of one HTTP attempt.
    pub request_timeout: Duration,

    /// Upper bound for one `order_status` call, retries included.
    pub overall_timeout: Duration,

    /// Retries after the first attempt.
    pub max_retries: usize,
}

impl Default for AccrualClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            request_timeout: Duration::from_secs(5),
            overall_timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

impl AccrualClientConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_overall_timeout(mut self, timeout: Duration) -> Self {
        self.overall_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Accrual service client with bounded retries.
pub struct HttpAccrualClient {
    client: Client,
    config: AccrualClientConfig,
}

impl HttpAccrualClient {
    pub fn new(config: AccrualClientConfig) -> Result<Self, OracleError> {
        if config.base_url.trim().is_empty() {
            return Err(OracleError::Config(
                "accrual system address not configured".to_string(),
            ));
        }

        let client = Client::builder().timeout(config.request_timeout).build()?;

        Ok(Self { client, config })
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(2))
            .with_max_times(self.config.max_retries)
            .with_jitter()
    }

    fn order_url(&self, number: &str) -> String {
        format!(
            "{}/api/orders/{number}",
            self.config.base_url.trim_end_matches('/')
        )
    }

    /// Wait at least as long as a rate-limited response asked for. `None`
    /// from the backoff means retries are exhausted and is kept.
    fn next_delay(err: &OracleError, backoff: Option<Duration>) -> Option<Duration> {
        match err {
            OracleError::RateLimited {
                retry_after: Some(wait),
            } => backoff.map(|delay| delay.max(*wait)),
            _ => backoff,
        }
    }

    fn retry_after(headers: &HeaderMap) -> Option<Duration> {
        headers
            .get(RETRY_AFTER)?
            .to_str()
            .ok()?
            .trim()
            .parse()
            .ok()
            .map(Duration::from_secs)
    }

    /// One attempt, no retry.
    async fn fetch(&self, number: &str) -> Result<AccrualReport, OracleError> {
        let response = self.client.get(self.order_url(number)).send().await?;
        let status = response.status();

        match status {
            StatusCode::OK => {
                let body = response.bytes().await?;
                let report = AccrualReport::from_json(&body)?;
                if report.number != number {
                    return Err(OracleError::Malformed(format!(
                        "asked for order {number}, got {}",
                        report.number
                    )));
                }
                debug!(number, status = ?report.state, reward = ?report.reward, "accrual status received");
                Ok(report)
            }
            StatusCode::NO_CONTENT => Err(OracleError::NotRegistered(number.to_string())),
            StatusCode::TOO_MANY_REQUESTS => Err(OracleError::RateLimited {
                retry_after: Self::retry_after(response.headers()),
            }),
            s if s.is_server_error() => Err(OracleError::Unavailable(s.to_string())),
            s => Err(OracleError::UnexpectedStatus(s.as_u16())),
        }
    }
}

#[async_trait]
impl AccrualOracle for HttpAccrualClient {
    async fn order_status(&self, number: &str) -> Result<AccrualReport, OracleError> {
        let attempts = (|| async { self.fetch(number).await })
            .retry(self.backoff())
            .when(OracleError::is_retryable)
            .adjust(Self::next_delay)
            .notify(|err, delay| {
                warn!(number, reason = %err, ?delay, "retrying accrual request");
            });

        match tokio::time::timeout(self.config.overall_timeout, attempts).await {
            Ok(result) => result,
            Err(_) => Err(OracleError::Timeout(self.config.overall_timeout)),
        }
    }
}
