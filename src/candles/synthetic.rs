//! Deterministic synthetic candles for demo runs without market data

use anyhow::Result;
use futures::stream::{self, BoxStream, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

use super::{paced, CandleSource, CandleWindow};
use crate::types::Candle;

/// Each candle is a pure function of its time bucket, so a resumed window
/// reproduces exactly the candles a fresh one would have produced.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticCandleSource {
    pub interval_ms: i64,
    pub base_price: f64,
    /// Amplitude of the slow oscillation, in points
    pub swing: f64,
    /// Per-candle noise, in points
    pub noise: f64,
    pub seed: u64,
    pub pace: Option<Duration>,
}

impl Default for SyntheticCandleSource {
    fn default() -> Self {
        Self {
            interval_ms: 60_000,
            base_price: 5_000.0,
            swing: 25.0,
            noise: 2.0,
            seed: 7,
            pace: None,
        }
    }
}

impl SyntheticCandleSource {
    fn price_at(&self, bucket: i64) -> f64 {
        // ~6.5 hour cycle at one-minute buckets
        let phase = bucket as f64 / 62.0;
        self.base_price + self.swing * phase.sin() + self.swing * 0.4 * (phase * 3.1).sin()
    }

    pub fn candle_at(&self, bucket: i64) -> Candle {
        let mut rng = StdRng::seed_from_u64(self.seed ^ (bucket as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let open = self.price_at(bucket);
        let close = self.price_at(bucket + 1) + rng.gen_range(-self.noise..=self.noise);
        let high = open.max(close) + rng.gen_range(0.0..=self.noise);
        let low = open.min(close) - rng.gen_range(0.0..=self.noise);
        Candle {
            timestamp: bucket * self.interval_ms,
            open,
            high,
            low,
            close,
            volume: rng.gen_range(100.0..2_000.0_f64).round(),
        }
    }
}

impl CandleSource for SyntheticCandleSource {
    fn candles(&self, window: CandleWindow) -> BoxStream<'static, Result<Candle>> {
        let interval = self.interval_ms.max(1);
        let first = window.start.div_euclid(interval) + i64::from(window.start.rem_euclid(interval) != 0);
        let last = window.end.div_euclid(interval) + i64::from(window.end.rem_euclid(interval) != 0);
        let source = Self {
            interval_ms: interval,
            ..*self
        };

        paced(
            stream::iter((first..last).map(move |bucket| Ok(source.candle_at(bucket)))).boxed(),
            self.pace,
        )
    }
}
