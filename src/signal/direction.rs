use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::indicators::{Bucket, IndicatorEngine, Sample};
use crate::models::OrderKind;

/// Entry-decision input for the lifecycle manager, injectable so tests can
/// substitute a scripted source.
pub trait DirectionSource: Send {
    /// Seed the slow engine from candle history at startup.
    fn load_history(&mut self, samples: Vec<Sample>);

    /// Feed one live observation.
    fn observe(&mut self, sample: Sample, now: DateTime<Utc>);

    /// Confirmed direction vote, or `None`.
    fn direction(&self) -> Option<OrderKind>;

    /// ATR from the slow timeframe.
    fn atr(&self, period: usize) -> Option<Decimal>;
}

/// Two-timeframe trend confirmation: a minute-bucketed main engine and a
/// second-bucketed fast engine. A direction is emitted only when both agree,
/// which suppresses single-timeframe whipsaw.
#[derive(Debug, Default)]
pub struct MultiTimeframeSignal {
    main: IndicatorEngine,
    fast: IndicatorEngine,
}

impl MultiTimeframeSignal {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DirectionSource for MultiTimeframeSignal {
    fn load_history(&mut self, samples: Vec<Sample>) {
        self.main.load_history(samples);
    }

    fn observe(&mut self, sample: Sample, now: DateTime<Utc>) {
        self.main.add(sample.clone(), Bucket::Minute, now);
        self.fast.add(sample, Bucket::Second, now);
    }

    fn direction(&self) -> Option<OrderKind> {
        let main = self.main.direction();
        let fast = self.fast.direction();
        tracing::debug!(main = ?main, fast = ?fast, "timeframe votes");
        match (main, fast) {
            (Some(m), Some(f)) if m == f => Some(m),
            _ => None,
        }
    }

    fn atr(&self, period: usize) -> Option<Decimal> {
        self.main.average_true_range(period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn trend(up: bool, n: usize) -> Vec<Decimal> {
        let mut price: Decimal = "100".parse().unwrap();
        let (a, b): (Decimal, Decimal) = if up {
            ("1".parse().unwrap(), "-0.6".parse().unwrap())
        } else {
            ("-1".parse().unwrap(), "0.6".parse().unwrap())
        };
        (0..n)
            .map(|i| {
                price += if i % 2 == 0 { a } else { b };
                price
            })
            .collect()
    }

    fn warm_engine(closes: &[Decimal]) -> IndicatorEngine {
        let mut engine = IndicatorEngine::new();
        for (i, close) in closes.iter().enumerate() {
            engine.add(Sample::Tick { close: *close }, Bucket::Second, at(i as i64));
        }
        engine
    }

    #[test]
    fn observe_routes_by_bucket() {
        let mut signal = MultiTimeframeSignal::new();
        for i in 0..130 {
            signal.observe(Sample::Tick { close: Decimal::from(100) }, at(i));
        }
        assert_eq!(signal.fast.len(), 130);
        // seconds 0..130 span minutes 0, 1 and 2
        assert_eq!(signal.main.len(), 3);
    }

    #[test]
    fn no_vote_when_fast_engine_is_cold() {
        let mut signal = MultiTimeframeSignal::new();
        signal.load_history(
            trend(true, 150)
                .into_iter()
                .map(|close| Sample::Tick { close })
                .collect(),
        );
        assert!(signal.direction().is_none());
    }

    #[test]
    fn vote_when_both_timeframes_agree() {
        let closes = trend(true, 150);
        let signal = MultiTimeframeSignal {
            main: warm_engine(&closes),
            fast: warm_engine(&closes),
        };
        assert_eq!(signal.direction(), Some(OrderKind::Long));
    }

    #[test]
    fn no_vote_when_timeframes_disagree() {
        let signal = MultiTimeframeSignal {
            main: warm_engine(&trend(true, 150)),
            fast: warm_engine(&trend(false, 150)),
        };
        assert!(signal.direction().is_none());
    }

    #[test]
    fn short_vote_passes_through() {
        let closes = trend(false, 150);
        let signal = MultiTimeframeSignal {
            main: warm_engine(&closes),
            fast: warm_engine(&closes),
        };
        assert_eq!(signal.direction(), Some(OrderKind::Short));
    }

    #[test]
    fn atr_comes_from_the_main_timeframe() {
        use super::super::indicators::Candle;
        let mut signal = MultiTimeframeSignal::new();
        let candles: Vec<Sample> = (0..20)
            .map(|_| {
                Sample::Candle(Candle {
                    open: Decimal::from(100),
                    high: Decimal::from(105),
                    low: Decimal::from(95),
                    close: Decimal::from(100),
                    volume: Decimal::ONE,
                })
            })
            .collect();
        signal.load_history(candles);
        assert_eq!(signal.atr(14), Some(Decimal::from(10)));
    }
}
