//! Configuration for the phase pipeline

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::ConfigurationError;

/// Option key holding the session's trading date (`YYYY-MM-DD`)
pub const OPT_TRADING_DATE: &str = "tradingDate";

/// Option key overriding how many trading days the planning window reaches back
pub const OPT_PLANNING_LOOKBACK_DAYS: &str = "planningLookbackDays";

/// Pipeline-wide tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Events retained per phase for late subscribers
    pub replay_capacity: usize,

    /// Bounded channel size for each live subscriber
    pub subscriber_buffer: usize,

    /// Fixed pause before re-opening a failed candle stream
    pub retry_backoff: Duration,

    /// Trading days the planning window reaches back
    pub planning_lookback_days: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            replay_capacity: 10_000,
            subscriber_buffer: 1_024,
            retry_backoff: Duration::from_secs(2),
            planning_lookback_days: 2,
        }
    }
}

/// Flat string-keyed options passed to `start_phase`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhaseOptions(BTreeMap<String, String>);

impl PhaseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn for_date(date: NaiveDate) -> Self {
        Self::new().with(OPT_TRADING_DATE, date.format("%Y-%m-%d").to_string())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Overlay `other` onto these options; keys in `other` win
    pub fn merge(&mut self, other: &PhaseOptions) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn trading_date(&self) -> Result<Option<NaiveDate>, ConfigurationError> {
        let Some(raw) = self.get(OPT_TRADING_DATE) else {
            return Ok(None);
        };
        NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .map(Some)
            .map_err(|_| invalid(OPT_TRADING_DATE, raw))
    }

    pub fn planning_lookback_days(&self) -> Result<Option<u32>, ConfigurationError> {
        let Some(raw) = self.get(OPT_PLANNING_LOOKBACK_DAYS) else {
            return Ok(None);
        };
        match raw.trim().parse::<u32>() {
            Ok(days) if days > 0 => Ok(Some(days)),
            _ => Err(invalid(OPT_PLANNING_LOOKBACK_DAYS, raw)),
        }
    }
}

impl From<BTreeMap<String, String>> for PhaseOptions {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

fn invalid(key: &str, value: &str) -> ConfigurationError {
    ConfigurationError::InvalidOption {
        key: key.to_string(),
        value: value.to_string(),
    }
}
