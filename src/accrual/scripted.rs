//! In-process accrual oracle with scripted answers.
//!
//! Useful for tests, benchmarks and running the ledger without an accrual
//! service. Numbers without a script answer as unregistered.
//!
//! ```ignore
//! let oracle = ScriptedOracle::new();
//! oracle.respond(AccrualReport::new("2377225624", AccrualState::Processed, Some(reward)));
//! oracle.fail("12345678903", "maintenance");
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{AccrualOracle, AccrualReport, OracleError};

#[derive(Debug, Clone)]
enum Script {
    Report(AccrualReport),
    Unavailable(String),
}

#[derive(Debug, Default)]
struct State {
    scripts: HashMap<String, Script>,
    calls: HashMap<String, usize>,
}

#[derive(Debug, Default)]
pub struct ScriptedOracle {
    state: Mutex<State>,
    delay: Option<Duration>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every answer, simulating a slow accrual service.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer every request for `report.number` with `report` from now on.
    pub fn respond(&self, report: AccrualReport) {
        self.state()
            .scripts
            .insert(report.number.clone(), Script::Report(report));
    }

    /// Answer every request for `number` with [`OracleError::Unavailable`].
    pub fn fail(&self, number: &str, reason: &str) {
        self.state()
            .scripts
            .insert(number.to_string(), Script::Unavailable(reason.to_string()));
    }

    /// Total number of requests served.
    pub fn calls(&self) -> usize {
        self.state().calls.values().sum()
    }

    pub fn calls_for(&self, number: &str) -> usize {
        self.state().calls.get(number).copied().unwrap_or(0)
    }
}

#[async_trait]
impl AccrualOracle for ScriptedOracle {
    async fn order_status(&self, number: &str) -> Result<AccrualReport, OracleError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let script = {
            let mut state = self.state();
            *state.calls.entry(number.to_string()).or_default() += 1;
            state.scripts.get(number).cloned()
        };

        match script {
            Some(Script::Report(report)) => Ok(report),
            Some(Script::Unavailable(reason)) => Err(OracleError::Unavailable(reason)),
            None => Err(OracleError::NotRegistered(number.to_string())),
        }
    }
}
