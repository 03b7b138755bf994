use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::models::OrderKind;

/// Rolling window capacity. Oldest samples are evicted FIFO past this.
pub const WINDOW_CAP: usize = 200;

/// Minimum number of samples before a direction vote is defined.
const DIRECTION_MIN_SAMPLES: usize = 100;

// ---------------------------------------------------------------------------
// Samples
// ---------------------------------------------------------------------------

/// One OHLCV bar.
#[derive(Debug, Clone)]
pub struct Candle {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// A price observation. Ticks carry only a last price; ATR and the volume
/// ratio are computed over candle samples only.
#[derive(Debug, Clone)]
pub enum Sample {
    Candle(Candle),
    Tick { close: Decimal },
}

impl Sample {
    pub fn close(&self) -> Decimal {
        match self {
            Sample::Candle(c) => c.close,
            Sample::Tick { close } => *close,
        }
    }

    fn candle(&self) -> Option<&Candle> {
        match self {
            Sample::Candle(c) => Some(c),
            Sample::Tick { .. } => None,
        }
    }
}

/// Time-bucket granularity for deduplication: at most one sample is kept
/// per bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Minute,
    Second,
}

fn bucket_start(now: DateTime<Utc>, bucket: Bucket) -> DateTime<Utc> {
    let step = match bucket {
        Bucket::Minute => 60,
        Bucket::Second => 1,
    };
    let ts = now.timestamp() - now.timestamp().rem_euclid(step);
    DateTime::from_timestamp(ts, 0).unwrap_or(now)
}

// ---------------------------------------------------------------------------
// EMA
// ---------------------------------------------------------------------------

/// Exponential moving average, smoothing factor `2 / (window + 1)`, seeded
/// with the first value. Returns the full series.
pub fn ema(values: &[Decimal], window: usize) -> Vec<Decimal> {
    if values.is_empty() || window == 0 {
        return Vec::new();
    }
    let alpha = Decimal::from(2) / Decimal::from(window as u64 + 1);
    let mut out = Vec::with_capacity(values.len());
    let mut prev = values[0];
    out.push(prev);
    for value in &values[1..] {
        prev = alpha * *value + (Decimal::ONE - alpha) * prev;
        out.push(prev);
    }
    out
}

/// Wilder RSI: average gain/loss seeded as the simple mean of the first
/// `window` deltas, then exponentially smoothed with `alpha = 1/window`.
/// Undefined until `window + 1` closes exist.
fn wilder_rsi(closes: &[Decimal], window: usize) -> Option<Decimal> {
    if window == 0 || closes.len() < window + 1 {
        return None;
    }

    let gain_of = |d: Decimal| if d > Decimal::ZERO { d } else { Decimal::ZERO };
    let loss_of = |d: Decimal| if d < Decimal::ZERO { -d } else { Decimal::ZERO };

    let mut avg_gain = Decimal::ZERO;
    let mut avg_loss = Decimal::ZERO;
    for w in closes[..window + 1].windows(2) {
        let delta = w[1] - w[0];
        avg_gain += gain_of(delta);
        avg_loss += loss_of(delta);
    }
    let n = Decimal::from(window as u64);
    avg_gain /= n;
    avg_loss /= n;

    let alpha = Decimal::ONE / n;
    for w in closes[window..].windows(2) {
        let delta = w[1] - w[0];
        avg_gain = alpha * gain_of(delta) + (Decimal::ONE - alpha) * avg_gain;
        avg_loss = alpha * loss_of(delta) + (Decimal::ONE - alpha) * avg_loss;
    }

    if avg_loss.is_zero() {
        return Some(Decimal::from(100));
    }
    let rs = avg_gain / avg_loss;
    Some(Decimal::from(100) - Decimal::from(100) / (Decimal::ONE + rs))
}

// ---------------------------------------------------------------------------
// IndicatorEngine
// ---------------------------------------------------------------------------

/// Bounded, bucket-deduplicated window of price samples with the indicator
/// computations derived from it.
#[derive(Debug, Default)]
pub struct IndicatorEngine {
    samples: VecDeque<Sample>,
    last_bucket: Option<DateTime<Utc>>,
}

impl IndicatorEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample unless one was already recorded in the current time
    /// bucket; evict the oldest sample past capacity.
    pub fn add(&mut self, sample: Sample, bucket: Bucket, now: DateTime<Utc>) {
        let start = bucket_start(now, bucket);
        if self.last_bucket == Some(start) {
            return;
        }
        self.samples.push_back(sample);
        if self.samples.len() > WINDOW_CAP {
            self.samples.pop_front();
        }
        self.last_bucket = Some(start);
    }

    /// Seed the window from history, keeping the most recent samples.
    pub fn load_history(&mut self, samples: impl IntoIterator<Item = Sample>) {
        self.samples = samples.into_iter().collect();
        while self.samples.len() > WINDOW_CAP {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn closes(&self) -> Vec<Decimal> {
        self.samples.iter().map(Sample::close).collect()
    }

    pub fn rsi(&self, window: usize) -> Option<Decimal> {
        wilder_rsi(&self.closes(), window)
    }

    /// True when the latest candle's volume exceeds 1.2x the trailing
    /// 20-sample average, or unconditionally below 20 volume samples.
    pub fn volume_signal(&self) -> bool {
        let volumes: Vec<Decimal> = self
            .samples
            .iter()
            .filter_map(|s| s.candle().map(|c| c.volume))
            .collect();
        if volumes.len() < 20 {
            return true;
        }
        let tail = &volumes[volumes.len() - 20..];
        let average = tail.iter().copied().sum::<Decimal>() / Decimal::from(20);
        volumes[volumes.len() - 1] > average * Decimal::new(12, 1)
    }

    /// Average true range over the last `period` candle steps; `None` with
    /// fewer than `period` true-range values.
    pub fn average_true_range(&self, period: usize) -> Option<Decimal> {
        let candles: Vec<&Candle> = self.samples.iter().filter_map(Sample::candle).collect();
        if period == 0 || candles.len() < period + 1 {
            return None;
        }
        let mut ranges = Vec::with_capacity(candles.len() - 1);
        for pair in candles.windows(2) {
            let prev_close = pair[0].close;
            let c = pair[1];
            let tr = (c.high - c.low)
                .max((c.high - prev_close).abs())
                .max((c.low - prev_close).abs());
            ranges.push(tr);
        }
        let tail = &ranges[ranges.len() - period..];
        Some(tail.iter().copied().sum::<Decimal>() / Decimal::from(period as u64))
    }

    /// EMA(9)/EMA(21) cross filtered by RSI(14). Undefined below 100
    /// samples.
    pub fn direction(&self) -> Option<OrderKind> {
        if self.samples.len() < DIRECTION_MIN_SAMPLES {
            return None;
        }
        let closes = self.closes();
        let ema_fast = *ema(&closes, 9).last()?;
        let ema_slow = *ema(&closes, 21).last()?;
        let rsi = wilder_rsi(&closes, 14)?;

        tracing::debug!(volume_signal = self.volume_signal(), "volume ratio check");

        if ema_fast > ema_slow && rsi < Decimal::from(70) {
            Some(OrderKind::Long)
        } else if ema_fast < ema_slow && rsi > Decimal::from(30) {
            Some(OrderKind::Short)
        } else {
            None
        }
    }
}
