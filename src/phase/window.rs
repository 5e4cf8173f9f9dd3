//! Candle windows per phase, in exchange time (America/New_York)

use chrono::{Datelike, Duration, NaiveDate, TimeZone, Weekday};
use chrono_tz::America::New_York;

use crate::candles::CandleWindow;
use crate::types::Phase;

/// Regular session open
const OPEN: (u32, u32) = (9, 30);
/// Regular session close
const CLOSE: (u32, u32) = (16, 0);
/// Start of the overnight session
const OVERNIGHT: (u32, u32) = (18, 0);

pub fn previous_trading_day(date: NaiveDate) -> NaiveDate {
    let mut day = date - Duration::days(1);
    while matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
        day = day - Duration::days(1);
    }
    day
}

/// Epoch millis of a wall-clock time in New York
fn eastern(date: NaiveDate, (hour, minute): (u32, u32)) -> i64 {
    let Some(naive) = date.and_hms_opt(hour, minute, 0) else {
        return 0;
    };
    New_York
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp_millis())
        .unwrap_or_else(|| naive.and_utc().timestamp_millis())
}

/// - Planning: open `lookback_days` trading days back until the previous day's overnight start
/// - Preparing: overnight session up to the open
/// - Trading: regular hours
pub fn phase_window(phase: Phase, date: NaiveDate, lookback_days: u32) -> CandleWindow {
    let previous = previous_trading_day(date);
    match phase {
        Phase::Planning => {
            let mut first = date;
            for _ in 0..lookback_days.max(1) {
                first = previous_trading_day(first);
            }
            CandleWindow::new(eastern(first, OPEN), eastern(previous, OVERNIGHT))
        }
        Phase::Preparing => CandleWindow::new(eastern(previous, OVERNIGHT), eastern(date, OPEN)),
        Phase::Trading => CandleWindow::new(eastern(date, OPEN), eastern(date, CLOSE)),
    }
}
