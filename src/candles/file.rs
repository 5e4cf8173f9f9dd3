//! Candle files on disk
//!
//! Supported layouts:
//! - `*.csv` / `*.csv.zst` with a `timestamp,open,high,low,close,volume` header
//!   (timestamp in epoch milliseconds, UTC)
//! - `*.json` holding an array of `{timestamp, open, high, low, close[, volume]}`
//!
//! The path may be a single file or a directory of such files.

use anyhow::{bail, Context, Result};
use futures::stream::{self, BoxStream, StreamExt};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use super::{paced, CandleSource, CandleWindow};
use crate::types::Candle;

#[derive(Debug, Clone)]
pub struct FileCandleSource {
    path: PathBuf,
    pace: Option<Duration>,
}

impl FileCandleSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pace: None,
        }
    }

    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }
}

impl CandleSource for FileCandleSource {
    fn candles(&self, window: CandleWindow) -> BoxStream<'static, Result<Candle>> {
        let path = self.path.clone();
        let loaded = stream::once(async move {
            tokio::task::spawn_blocking(move || read_candles(&path))
                .await
                .context("Candle loader task failed")
                .and_then(|loaded| loaded)
        });

        let candles = loaded
            .map(move |result: Result<Vec<Candle>>| match result {
                Ok(candles) => stream::iter(
                    candles
                        .into_iter()
                        .filter(move |c| window.contains(c.timestamp))
                        .map(Ok),
                )
                .left_stream(),
                Err(e) => stream::once(async move { Err(e) }).right_stream(),
            })
            .flatten()
            .boxed();

        paced(candles, self.pace)
    }
}

/// Load, sort and dedupe every candle under `path`
pub fn read_candles(path: &Path) -> Result<Vec<Candle>> {
    let mut candles = Vec::new();

    if path.is_dir() {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let file = entry?.path();
            if candle_format(&file).is_some() {
                files.push(file);
            }
        }
        files.sort();
        for file in &files {
            candles.extend(read_file(file)?);
        }
        info!("Loaded {} candles from {} files in {:?}", candles.len(), files.len(), path);
    } else {
        candles = read_file(path)?;
        info!("Loaded {} candles from {:?}", candles.len(), path);
    }

    candles.sort_by_key(|c| c.timestamp);
    candles.dedup_by_key(|c| c.timestamp);
    Ok(candles)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Csv,
    CsvZst,
    Json,
}

fn candle_format(path: &Path) -> Option<Format> {
    let name = path.file_name()?.to_string_lossy().to_lowercase();
    if name.ends_with(".csv.zst") {
        Some(Format::CsvZst)
    } else if name.ends_with(".csv") {
        Some(Format::Csv)
    } else if name.ends_with(".json") {
        Some(Format::Json)
    } else {
        None
    }
}

fn read_file(path: &Path) -> Result<Vec<Candle>> {
    let Some(format) = candle_format(path) else {
        bail!("Unsupported candle file: {:?}", path);
    };

    let raw = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
    match format {
        Format::Json => serde_json::from_slice(&raw)
            .with_context(|| format!("Failed to parse candles from {:?}", path)),
        Format::Csv => parse_csv(&raw).with_context(|| format!("Failed to parse {:?}", path)),
        Format::CsvZst => {
            let csv = zstd::decode_all(&raw[..])
                .with_context(|| format!("Failed to decompress {:?}", path))?;
            parse_csv(&csv).with_context(|| format!("Failed to parse {:?}", path))
        }
    }
}

fn parse_csv(bytes: &[u8]) -> Result<Vec<Candle>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let mut candles = Vec::new();
    for record in reader.deserialize::<Candle>() {
        candles.push(record?);
    }
    Ok(candles)
}
