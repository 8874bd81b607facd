//! Process configuration: command-line flags, each mirrored by an
//! environment variable.

use clap::Parser;
use std::time::Duration;
use thiserror::Error;

use crate::accrual::AccrualClientConfig;
use crate::scheduler::PollInterval;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("poll interval minimum {0:?} exceeds maximum {1:?}")]
    InvalidPollInterval(Duration, Duration),
    #[error("poll interval maximum must be greater than zero")]
    ZeroPollInterval,
    #[error("accrual request timeout {0:?} exceeds overall timeout {1:?}")]
    InvalidAccrualTimeout(Duration, Duration),
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Loyalty points ledger reconciliation service", long_about = None)]
pub struct Config {
    /// Base address of the accrual service
    #[arg(short = 'r', long, env = "ACCRUAL_SYSTEM_ADDRESS")]
    pub accrual_system_address: String,

    /// Shortest pause between two reconciliation ticks, in seconds
    #[arg(long, env = "POLL_MIN_SECS", default_value_t = 2)]
    pub poll_min_secs: u64,

    /// Longest pause between two reconciliation ticks, in seconds
    #[arg(long, env = "POLL_MAX_SECS", default_value_t = 7)]
    pub poll_max_secs: u64,

    /// Retries of a failed accrual request
    #[arg(long, env = "ACCRUAL_RETRIES", default_value_t = 3)]
    pub accrual_retries: usize,

    /// Timeout of one accrual HTTP attempt, in seconds
    #[arg(long, default_value_t = 5)]
    pub accrual_request_timeout_secs: u64,

    /// Timeout of one accrual lookup including retries, in seconds
    #[arg(long, env = "ACCRUAL_TIMEOUT_SECS", default_value_t = 30)]
    pub accrual_timeout_secs: u64,

    /// How long shutdown waits for an in-flight tick, in seconds
    #[arg(long, default_value_t = 5)]
    pub shutdown_grace_secs: u64,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

impl Config {
    pub fn poll_interval(&self) -> Result<PollInterval, ConfigError> {
        PollInterval::new(
            Duration::from_secs(self.poll_min_secs),
            Duration::from_secs(self.poll_max_secs),
        )
    }

    pub fn accrual_client(&self) -> Result<AccrualClientConfig, ConfigError> {
        let request = Duration::from_secs(self.accrual_request_timeout_secs);
        let overall = Duration::from_secs(self.accrual_timeout_secs);
        if request > overall {
            return Err(ConfigError::InvalidAccrualTimeout(request, overall));
        }
        Ok(AccrualClientConfig::default()
            .with_base_url(self.accrual_system_address.clone())
            .with_request_timeout(request)
            .with_overall_timeout(overall)
            .with_max_retries(self.accrual_retries))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config, clap::Error> {
        Config::try_parse_from(std::iter::once("loyalty-ledger").chain(args.iter().copied()))
    }

    #[test]
    fn defaults() {
        let config = parse(&["-r", "http://localhost:8081"]).unwrap();
        assert_eq!(config.accrual_system_address, "http://localhost:8081");
        assert_eq!(config.poll_interval().unwrap(), PollInterval::default());
        assert_eq!(config.shutdown_grace(), Duration::from_secs(5));

        let client = config.accrual_client().unwrap();
        assert_eq!(client.base_url, "http://localhost:8081");
        assert_eq!(client.max_retries, 3);
        assert_eq!(client.request_timeout, Duration::from_secs(5));
        assert_eq!(client.overall_timeout, Duration::from_secs(30));
    }

    #[test]
    fn accrual_address_is_required() {
        // only meaningful when the variable is not exported by the environment
        if std::env::var_os("ACCRUAL_SYSTEM_ADDRESS").is_none() {
            assert!(parse(&[]).is_err());
        }
    }

    #[test]
    fn long_flags_override_defaults() {
        let config = parse(&[
            "--accrual-system-address",
            "http://accrual",
            "--poll-min-secs",
            "1",
            "--poll-max-secs",
            "1",
            "--accrual-retries",
            "0",
            "--log-json",
        ])
        .unwrap();
        let interval = config.poll_interval().unwrap();
        assert_eq!(interval.min(), Duration::from_secs(1));
        assert_eq!(interval.max(), Duration::from_secs(1));
        assert_eq!(config.accrual_client().unwrap().max_retries, 0);
        assert!(config.log_json);
    }

    #[test]
    fn inverted_poll_interval_is_rejected() {
        let config = parse(&["-r", "x", "--poll-min-secs", "9", "--poll-max-secs", "3"]).unwrap();
        assert_eq!(
            config.poll_interval(),
            Err(ConfigError::InvalidPollInterval(
                Duration::from_secs(9),
                Duration::from_secs(3)
            ))
        );
    }

    #[test]
    fn request_timeout_above_overall_is_rejected() {
        let config = parse(&[
            "-r",
            "x",
            "--accrual-request-timeout-secs",
            "10",
            "--accrual-timeout-secs",
            "5",
        ])
        .unwrap();
        assert!(matches!(
            config.accrual_client(),
            Err(ConfigError::InvalidAccrualTimeout(..))
        ));
    }
}
