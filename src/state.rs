//! Session state threaded through candle processing, and its read-only view

use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

use crate::config::PhaseOptions;
use crate::types::{Candle, DaytimeExtreme, Order, Phase, PlanZone, SwingPoint};

/// Accumulator for one trading session. Owned by a single runner while a phase executes.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub trading_date: NaiveDate,
    pub options: PhaseOptions,
    pub candles: Vec<Candle>,
    pub swing_points: Vec<SwingPoint>,
    pub plan_zones: Vec<PlanZone>,
    pub daytime_extremes: Vec<DaytimeExtreme>,
    pub orders: Vec<Order>,
    pub completed_phases: Vec<Phase>,
}

impl SessionState {
    pub fn new(trading_date: NaiveDate, options: PhaseOptions) -> Self {
        Self {
            trading_date,
            options,
            candles: Vec::new(),
            swing_points: Vec::new(),
            plan_zones: Vec::new(),
            daytime_extremes: Vec::new(),
            orders: Vec::new(),
            completed_phases: Vec::new(),
        }
    }

    pub fn last_candle(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn last_candle_timestamp(&self) -> Option<i64> {
        self.candles.last().map(|c| c.timestamp)
    }

    pub fn open_orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter().filter(|o| o.status.is_open())
    }

    pub fn snapshot(&self, running: Option<Phase>) -> StatusSnapshot {
        StatusSnapshot {
            trading_date: self.trading_date,
            completed_phases: self.completed_phases.clone(),
            running_phase: running,
            candle_count: self.candles.len(),
            last_candle_timestamp: self.last_candle_timestamp(),
            swing_points: self.swing_points.len(),
            plan_zones: self.plan_zones.len(),
            daytime_extremes: self.daytime_extremes.len(),
            open_orders: self.open_orders().count(),
            total_orders: self.orders.len(),
        }
    }
}

/// Status reply for transports
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    #[serde(rename = "tradingDate")]
    pub trading_date: NaiveDate,
    #[serde(rename = "completedPhases")]
    pub completed_phases: Vec<Phase>,
    #[serde(rename = "runningPhase")]
    pub running_phase: Option<Phase>,
    #[serde(rename = "candleCount")]
    pub candle_count: usize,
    #[serde(rename = "lastCandleTimestamp")]
    pub last_candle_timestamp: Option<i64>,
    #[serde(rename = "swingPoints")]
    pub swing_points: usize,
    #[serde(rename = "planZones")]
    pub plan_zones: usize,
    #[serde(rename = "daytimeExtremes")]
    pub daytime_extremes: usize,
    #[serde(rename = "openOrders")]
    pub open_orders: usize,
    #[serde(rename = "totalOrders")]
    pub total_orders: usize,
}

/// Read-only handle on the canonical session state.
///
/// The controller holds the only sender; every view sees each committed state
/// as a whole.
#[derive(Debug, Clone)]
pub struct StateView {
    rx: watch::Receiver<Arc<SessionState>>,
}

impl StateView {
    pub(crate) fn new(rx: watch::Receiver<Arc<SessionState>>) -> Self {
        Self { rx }
    }

    pub fn current(&self) -> Arc<SessionState> {
        self.rx.borrow().clone()
    }

    /// Wait for the next committed state
    pub async fn changed(&mut self) -> Option<Arc<SessionState>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(ts: i64, high: f64, low: f64) -> Candle {
        Candle {
            timestamp: ts,
            open: low,
            high,
            low,
            close: high,
            volume: 1.0,
        }
    }

    #[test]
    fn test_last_candle_and_snapshot() {
        let mut state = SessionState::new(
            NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
            PhaseOptions::new(),
        );
        assert_eq!(state.last_candle_timestamp(), None);

        state.candles.push(candle(1, 10.0, 8.0));
        state.candles.push(candle(2, 12.0, 9.0));
        state.candles.push(candle(3, 11.0, 7.0));

        assert_eq!(state.last_candle_timestamp(), Some(3));
        assert_eq!(state.last_candle().map(|c| c.high), Some(11.0));

        let snapshot = state.snapshot(Some(Phase::Planning));
        assert_eq!(snapshot.candle_count, 3);
        assert_eq!(snapshot.last_candle_timestamp, Some(3));
        assert_eq!(snapshot.running_phase, Some(Phase::Planning));
    }

    #[tokio::test]
    async fn test_view_sees_committed_state() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let (tx, rx) = watch::channel(Arc::new(SessionState::new(date, PhaseOptions::new())));
        let mut view = StateView::new(rx);
        assert!(view.current().candles.is_empty());

        let mut next = SessionState::new(date, PhaseOptions::new());
        next.completed_phases.push(Phase::Planning);
        tx.send_replace(Arc::new(next));

        let seen = view.changed().await.unwrap();
        assert_eq!(seen.completed_phases, vec![Phase::Planning]);
        assert_eq!(view.current().snapshot(None).completed_phases.len(), 1);
    }
}
