//! Candle sources
//!
//! A source yields candles for a requested window in strictly increasing
//! timestamp order. Sources are re-invoked with an advanced window when a
//! runner resumes after a stream fault, so they must not carry cursor state
//! between calls.

mod file;
mod memory;
mod synthetic;

pub use file::{read_candles, FileCandleSource};
pub use memory::MemoryCandleSource;
pub use synthetic::SyntheticCandleSource;

use anyhow::Result;
use futures::stream::{BoxStream, StreamExt};
use serde::Serialize;
use std::time::Duration;

use crate::types::Candle;

/// Half-open `[start, end)` range of epoch milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CandleWindow {
    pub start: i64,
    pub end: i64,
}

impl CandleWindow {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ts: i64) -> bool {
        ts >= self.start && ts < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Window that starts strictly after an already processed candle
    pub fn resume_after(self, last_processed: Option<i64>) -> Self {
        match last_processed {
            Some(ts) => Self {
                start: self.start.max(ts + 1),
                end: self.end,
            },
            None => self,
        }
    }
}

pub trait CandleSource: Send + Sync {
    /// Lazy, ordered candles within `window`. Errors are transient faults.
    fn candles(&self, window: CandleWindow) -> BoxStream<'static, Result<Candle>>;
}

/// Delay each item by `pace`, for replays that should look live
pub(crate) fn paced<T: Send + 'static>(
    stream: BoxStream<'static, T>,
    pace: Option<Duration>,
) -> BoxStream<'static, T> {
    match pace {
        Some(delay) if !delay.is_zero() => stream
            .then(move |item| async move {
                tokio::time::sleep(delay).await;
                item
            })
            .boxed(),
        _ => stream,
    }
}
