use anyhow::Result;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;

use super::{paced, CandleSource, CandleWindow};
use crate::types::Candle;

/// Candles held in memory, sorted by timestamp
#[derive(Debug, Clone)]
pub struct MemoryCandleSource {
    candles: Arc<Vec<Candle>>,
    pace: Option<Duration>,
}

impl MemoryCandleSource {
    pub fn new(mut candles: Vec<Candle>) -> Self {
        candles.sort_by_key(|c| c.timestamp);
        candles.dedup_by_key(|c| c.timestamp);
        Self {
            candles: Arc::new(candles),
            pace: None,
        }
    }

    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}

impl CandleSource for MemoryCandleSource {
    fn candles(&self, window: CandleWindow) -> BoxStream<'static, Result<Candle>> {
        let from = self.candles.partition_point(|c| c.timestamp < window.start);
        let to = self.candles.partition_point(|c| c.timestamp < window.end);
        let selected: Vec<Candle> = self.candles[from..to.max(from)].to_vec();
        paced(stream::iter(selected.into_iter().map(Ok)).boxed(), self.pace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(ts: i64) -> Candle {
        Candle {
            timestamp: ts,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 0.0,
        }
    }

    #[tokio::test]
    async fn test_window_filtering_and_order() {
        let source = MemoryCandleSource::new(vec![candle(30), candle(10), candle(20), candle(40)]);
        let got: Vec<i64> = source
            .candles(CandleWindow::new(10, 40))
            .map(|c| c.unwrap().timestamp)
            .collect()
            .await;
        assert_eq!(got, vec![10, 20, 30]);

        let none: Vec<_> = source.candles(CandleWindow::new(50, 10)).collect().await;
        assert!(none.is_empty());
    }
}
