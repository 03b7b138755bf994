pub mod direction;
pub mod indicators;

pub use direction::{DirectionSource, MultiTimeframeSignal};
pub use indicators::{Bucket, Candle, IndicatorEngine, Sample};
