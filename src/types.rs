use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::phase::PhaseController;

/// Processing stage of a trading session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Multi-day lookback: swing points and supply/demand zones
    Planning,
    /// Overnight session up to the open: daytime extremes
    Preparing,
    /// Regular trading hours: order placement and management
    Trading,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Planning, Phase::Preparing, Phase::Trading];

    /// The phase that opens a new session and starts from an empty state
    pub fn is_session_start(&self) -> bool {
        matches!(self, Phase::Planning)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Planning => "planning",
            Phase::Preparing => "preparing",
            Phase::Trading => "trading",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "planning" => Ok(Phase::Planning),
            "preparing" | "preparingfortrading" => Ok(Phase::Preparing),
            "trading" => Ok(Phase::Trading),
            other => anyhow::bail!("unknown phase: {}", other),
        }
    }
}

/// OHLCV aggregate over one time bucket. Timestamp is epoch milliseconds (UTC).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Candle {
    pub fn body_high(&self) -> f64 {
        self.open.max(self.close)
    }

    pub fn body_low(&self) -> f64 {
        self.open.min(self.close)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwingKind {
    High,
    Low,
}

/// Confirmed pivot. `timestamp` is the confirming candle, `pivot_timestamp` the pivot itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwingPoint {
    pub timestamp: i64,
    #[serde(rename = "pivotTimestamp")]
    pub pivot_timestamp: i64,
    pub price: f64,
    pub kind: SwingKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneKind {
    Demand,
    Supply,
}

/// Supply/demand zone derived during planning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanZone {
    pub id: Uuid,
    pub timestamp: i64,
    pub kind: ZoneKind,
    pub low: f64,
    pub high: f64,
    /// Set once the trading phase has acted on the zone
    #[serde(default)]
    pub touched: bool,
}

impl PlanZone {
    pub fn overlaps(&self, candle: &Candle) -> bool {
        candle.low <= self.high && candle.high >= self.low
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtremeKind {
    High,
    Low,
}

/// New high or low of the pre-open range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaytimeExtreme {
    pub timestamp: i64,
    pub kind: ExtremeKind,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Placed,
    Stopped,
    Targeted,
    /// Still open when the phase ended; closed at the last price
    Closed,
}

impl OrderStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, OrderStatus::Placed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub timestamp: i64,
    #[serde(rename = "zoneId")]
    pub zone_id: Uuid,
    pub side: OrderSide,
    pub entry: f64,
    pub stop: f64,
    pub target: f64,
    pub status: OrderStatus,
    #[serde(rename = "exitPrice", default)]
    pub exit_price: Option<f64>,
}

impl Order {
    /// Points won or lost, once the order has an exit
    pub fn pnl_points(&self) -> Option<f64> {
        let exit = self.exit_price?;
        Some(match self.side {
            OrderSide::Long => exit - self.entry,
            OrderSide::Short => self.entry - exit,
        })
    }
}

/// Everything the pipeline emits. Immutable once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    Candle(Candle),
    SwingPoint(SwingPoint),
    PlanZone(PlanZone),
    DaytimeExtreme(DaytimeExtreme),
    Order(Order),
    PhaseComplete {
        timestamp: i64,
        phase: Phase,
        #[serde(rename = "tradingDate")]
        trading_date: chrono::NaiveDate,
    },
    PhaseErrored {
        timestamp: i64,
        phase: Phase,
        #[serde(rename = "tradingDate")]
        trading_date: chrono::NaiveDate,
        message: String,
    },
}

impl Event {
    pub fn timestamp(&self) -> i64 {
        match self {
            Event::Candle(c) => c.timestamp,
            Event::SwingPoint(s) => s.timestamp,
            Event::PlanZone(z) => z.timestamp,
            Event::DaytimeExtreme(d) => d.timestamp,
            Event::Order(o) => o.timestamp,
            Event::PhaseComplete { timestamp, .. } | Event::PhaseErrored { timestamp, .. } => {
                *timestamp
            }
        }
    }
}

/// Messages pushed to WebSocket clients
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum WsMessage {
    Event { phase: Phase, event: Event },
    Status(crate::state::StatusSnapshot),
    PhaseAccepted { phase: Phase },
    Error { message: String },
}

/// Commands accepted from WebSocket clients
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum ClientCommand {
    StartPhase {
        phase: Phase,
        #[serde(default)]
        options: std::collections::BTreeMap<String, String>,
    },
    Subscribe {
        phase: Phase,
    },
    Status,
}

/// Shared application state
pub struct AppState {
    pub controller: Arc<PhaseController>,
}
