//! Client side of the external accrual service.
//!
//! The accrual service decides, asynchronously and on its own schedule,
//! whether an order earns points and how many. The ledger only ever asks it
//! for the current verdict on one order number.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::Amount;
use crate::model::OrderStatus;

mod http;
mod scripted;

pub use http::{AccrualClientConfig, HttpAccrualClient};
pub use scripted::ScriptedOracle;

/// Errors from querying the accrual service.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("accrual request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("order {0} is not registered in the accrual system")]
    NotRegistered(String),

    #[error("accrual system is rate limiting requests (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("accrual system unavailable: {0}")]
    Unavailable(String),

    #[error("unexpected accrual response status {0}")]
    UnexpectedStatus(u16),

    #[error("malformed accrual response: {0}")]
    Malformed(String),

    #[error("accrual request timed out after {0:?}")]
    Timeout(Duration),

    #[error("accrual client misconfigured: {0}")]
    Config(String),
}

impl OracleError {
    /// Transient failures worth another attempt within the same call.
    pub fn is_retryable(&self) -> bool {
        match self {
            OracleError::Http(err) => err.is_timeout() || err.is_connect(),
            OracleError::RateLimited { .. } | OracleError::Unavailable(_) => true,
            _ => false,
        }
    }
}

/// Order state as reported by the accrual service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccrualState {
    Registered,
    Processing,
    Invalid,
    Processed,
}

impl AccrualState {
    pub fn into_order_status(self) -> OrderStatus {
        match self {
            AccrualState::Registered => OrderStatus::New,
            AccrualState::Processing => OrderStatus::Processing,
            AccrualState::Invalid => OrderStatus::Invalid,
            AccrualState::Processed => OrderStatus::Processed,
        }
    }
}

/// Raw response body of `GET /api/orders/{number}`.
#[derive(Debug, Deserialize)]
struct AccrualResponse {
    order: String,
    status: AccrualState,
    accrual: Option<f64>,
}

/// The accrual service's current verdict on one order.
#[derive(Debug, Clone, PartialEq)]
pub struct AccrualReport {
    pub number: String,
    pub state: AccrualState,
    pub reward: Option<Amount>,
}

impl AccrualReport {
    pub fn new(number: impl Into<String>, state: AccrualState, reward: Option<Amount>) -> Self {
        Self {
            number: number.into(),
            state,
            reward,
        }
    }

    pub fn status(&self) -> OrderStatus {
        self.state.into_order_status()
    }

    /// Parse a response body.
    pub fn from_json(body: &[u8]) -> Result<Self, OracleError> {
        let response: AccrualResponse =
            serde_json::from_slice(body).map_err(|e| OracleError::Malformed(e.to_string()))?;
        Self::from_response(response)
    }

    fn from_response(response: AccrualResponse) -> Result<Self, OracleError> {
        let reward = match response.accrual {
            Some(value) if !value.is_finite() || value < 0.0 => {
                return Err(OracleError::Malformed(format!(
                    "order {}: accrual {value} is not a non-negative number",
                    response.order
                )));
            }
            Some(value) => match Amount::try_from_float(value) {
                Some(reward) => Some(reward),
                None => {
                    return Err(OracleError::Malformed(format!(
                        "order {}: accrual {value} is out of range",
                        response.order
                    )));
                }
            },
            None => None,
        };
        Ok(Self {
            number: response.order,
            state: response.status,
            reward,
        })
    }
}

#[async_trait]
pub trait AccrualOracle: Send + Sync {
    /// Fetch the accrual verdict for one order number.
    async fn order_status(&self, number: &str) -> Result<AccrualReport, OracleError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_maps_to_new() {
        assert_eq!(AccrualState::Registered.into_order_status(), OrderStatus::New);
        assert_eq!(
            AccrualState::Processing.into_order_status(),
            OrderStatus::Processing
        );
        assert_eq!(AccrualState::Invalid.into_order_status(), OrderStatus::Invalid);
        assert_eq!(
            AccrualState::Processed.into_order_status(),
            OrderStatus::Processed
        );
    }

    #[test]
    fn parse_processed_with_reward() {
        let report =
            AccrualReport::from_json(br#"{"order":"2377225624","status":"PROCESSED","accrual":729.98}"#)
                .unwrap();
        assert_eq!(report.number, "2377225624");
        assert_eq!(report.state, AccrualState::Processed);
        assert_eq!(report.reward, Some(Amount::from_scaled(72_998)));
    }

    #[test]
    fn parse_without_reward() {
        let report =
            AccrualReport::from_json(br#"{"order":"2377225624","status":"REGISTERED"}"#).unwrap();
        assert_eq!(report.status(), OrderStatus::New);
        assert_eq!(report.reward, None);
    }

    #[test]
    fn parse_rejects_negative_reward() {
        let result =
            AccrualReport::from_json(br#"{"order":"2377225624","status":"PROCESSED","accrual":-1}"#);
        assert!(matches!(result, Err(OracleError::Malformed(_))));
    }

    #[test]
    fn parse_rejects_out_of_range_reward() {
        let result =
            AccrualReport::from_json(br#"{"order":"2377225624","status":"PROCESSED","accrual":1e17}"#);
        assert!(matches!(result, Err(OracleError::Malformed(_))));
    }

    #[test]
    fn parse_rejects_unknown_status() {
        let result = AccrualReport::from_json(br#"{"order":"2377225624","status":"LOST"}"#);
        assert!(matches!(result, Err(OracleError::Malformed(_))));
    }

    #[test]
    fn retryable_classification() {
        assert!(OracleError::RateLimited { retry_after: None }.is_retryable());
        assert!(OracleError::Unavailable("502".to_string()).is_retryable());
        assert!(!OracleError::NotRegistered("1".to_string()).is_retryable());
        assert!(!OracleError::Malformed("x".to_string()).is_retryable());
        assert!(!OracleError::UnexpectedStatus(404).is_retryable());
        assert!(!OracleError::Timeout(Duration::from_secs(1)).is_retryable());
    }
}
