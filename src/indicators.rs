//! Technical indicators powered by the `ta` crate
//!
//! The bot only needs a pair of exponential moving averages. The `ta`
//! implementation seeds with the first input and uses `α = 2 / (period + 1)`,
//! so `ema[0] = close[0]` and `ema[i] = α·close[i] + (1-α)·ema[i-1]`.
//!
//! Everything here is a pure function of the input series; nothing is carried
//! between polling cycles.

use ta::indicators::ExponentialMovingAverage;
use ta::Next;
use thiserror::Error;

use crate::types::{PriceBar, Signal, Trend};

pub const DEFAULT_FAST_PERIOD: usize = 9;
pub const DEFAULT_SLOW_PERIOD: usize = 21;

/// Minimum number of points needed to compare the last two EMA values
const MIN_POINTS: usize = 2;

#[derive(Debug, Error, PartialEq)]
pub enum IndicatorError {
    #[error("insufficient data: need at least {required} points, got {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("invalid EMA period: {0}")]
    InvalidPeriod(usize),
}

// =============================================================================
// Moving Averages
// =============================================================================

/// Calculate an Exponential Moving Average over the full series.
///
/// Unlike a windowed indicator every position gets a value, starting from
/// the seed `closes[0]`.
pub fn ema(values: &[f64], period: usize) -> Result<Vec<f64>, IndicatorError> {
    let mut indicator =
        ExponentialMovingAverage::new(period).map_err(|_| IndicatorError::InvalidPeriod(period))?;

    Ok(values.iter().map(|&value| indicator.next(value)).collect())
}

/// Fast and slow EMA aligned with the input closes
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSeries {
    pub fast: Vec<f64>,
    pub slow: Vec<f64>,
}

impl IndicatorSeries {
    pub fn compute(
        closes: &[f64],
        fast_period: usize,
        slow_period: usize,
    ) -> Result<Self, IndicatorError> {
        Ok(IndicatorSeries {
            fast: ema(closes, fast_period)?,
            slow: ema(closes, slow_period)?,
        })
    }

    pub fn len(&self) -> usize {
        self.fast.len().min(self.slow.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Last (fast, slow) pair, if any
    pub fn last(&self) -> Option<(f64, f64)> {
        Some((*self.fast.last()?, *self.slow.last()?))
    }

    fn ensure_points(&self, required: usize) -> Result<(), IndicatorError> {
        let available = self.len();
        if available < required {
            return Err(IndicatorError::InsufficientData {
                required,
                available,
            });
        }
        Ok(())
    }
}

// =============================================================================
// Crossover Signal / Trend
// =============================================================================

/// Detect a crossover between the last two points.
///
/// Both sides of the cross are strict: touching the slow line on either bar
/// is not a cross.
pub fn check_signal(series: &IndicatorSeries) -> Result<Signal, IndicatorError> {
    series.ensure_points(MIN_POINTS)?;

    let n = series.len();
    let (prev_fast, prev_slow) = (series.fast[n - 2], series.slow[n - 2]);
    let (fast, slow) = (series.fast[n - 1], series.slow[n - 1]);

    let signal = if prev_fast < prev_slow && fast > slow {
        Signal::Buy
    } else if prev_fast > prev_slow && fast < slow {
        Signal::Sell
    } else {
        Signal::None
    };

    Ok(signal)
}

/// Trend direction from the last point only
pub fn trend(series: &IndicatorSeries) -> Result<Trend, IndicatorError> {
    series.ensure_points(MIN_POINTS)?;

    let (fast, slow) = series.last().ok_or(IndicatorError::InsufficientData {
        required: MIN_POINTS,
        available: 0,
    })?;

    Ok(if fast > slow {
        Trend::Up
    } else if fast < slow {
        Trend::Down
    } else {
        Trend::Sideways
    })
}

/// Everything the decision loop needs from one batch of bars
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub fast_ema: f64,
    pub slow_ema: f64,
    pub signal: Signal,
    pub trend: Trend,
}

pub fn analyze(
    bars: &[PriceBar],
    fast_period: usize,
    slow_period: usize,
) -> Result<Analysis, IndicatorError> {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let series = IndicatorSeries::compute(&closes, fast_period, slow_period)?;

    let signal = check_signal(&series)?;
    let trend = trend(&series)?;
    let (fast_ema, slow_ema) = series.last().ok_or(IndicatorError::InsufficientData {
        required: MIN_POINTS,
        available: 0,
    })?;

    Ok(Analysis {
        fast_ema,
        slow_ema,
        signal,
        trend,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn series(fast: &[f64], slow: &[f64]) -> IndicatorSeries {
        IndicatorSeries {
            fast: fast.to_vec(),
            slow: slow.to_vec(),
        }
    }

    #[test]
    fn test_ema_seeded_with_first_value() {
        let values = vec![10.0, 11.0, 12.0];
        let result = ema(&values, 3).unwrap();

        // α = 0.5
        assert_eq!(result.len(), 3);
        assert_relative_eq!(result[0], 10.0);
        assert_relative_eq!(result[1], 10.5);
        assert_relative_eq!(result[2], 11.25);
    }

    #[test]
    fn test_ema_zero_period_rejected() {
        assert_eq!(ema(&[1.0, 2.0], 0), Err(IndicatorError::InvalidPeriod(0)));
    }

    #[test]
    fn test_ema_is_pure() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.7).sin()).collect();
        let a = IndicatorSeries::compute(&closes, 9, 21).unwrap();
        let b = IndicatorSeries::compute(&closes, 9, 21).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_upward_cross_scenario() {
        let closes = vec![10.0, 10.0, 10.0, 9.0, 11.0];
        let s = IndicatorSeries::compute(&closes, 2, 4).unwrap();

        assert_relative_eq!(s.fast[3], 9.333_333, epsilon = 1e-5);
        assert_relative_eq!(s.slow[3], 9.6, epsilon = 1e-9);
        assert_relative_eq!(s.fast[4], 10.444_444, epsilon = 1e-5);
        assert_relative_eq!(s.slow[4], 10.16, epsilon = 1e-9);

        assert_eq!(check_signal(&s).unwrap(), Signal::Buy);
        assert_eq!(trend(&s).unwrap(), Trend::Up);
    }

    #[test]
    fn test_downward_cross() {
        let closes = vec![10.0, 10.0, 10.0, 11.0, 9.0];
        let s = IndicatorSeries::compute(&closes, 2, 4).unwrap();
        assert_eq!(check_signal(&s).unwrap(), Signal::Sell);
        assert_eq!(trend(&s).unwrap(), Trend::Down);
    }

    #[test]
    fn test_no_cross_when_already_above() {
        let s = series(&[11.0, 12.0], &[10.0, 10.5]);
        assert_eq!(check_signal(&s).unwrap(), Signal::None);
        assert_eq!(trend(&s).unwrap(), Trend::Up);
    }

    #[test]
    fn test_touch_is_not_a_cross() {
        let s = series(&[10.0, 11.0], &[10.0, 10.5]);
        assert_eq!(check_signal(&s).unwrap(), Signal::None);

        let s = series(&[9.0, 10.5], &[10.0, 10.5]);
        assert_eq!(check_signal(&s).unwrap(), Signal::None);
        assert_eq!(trend(&s).unwrap(), Trend::Sideways);
    }

    #[test]
    fn test_insufficient_data() {
        let s = IndicatorSeries::compute(&[10.0], 9, 21).unwrap();
        assert_eq!(
            check_signal(&s),
            Err(IndicatorError::InsufficientData {
                required: 2,
                available: 1
            })
        );
        assert!(trend(&s).is_err());

        let empty = IndicatorSeries::compute(&[], 9, 21).unwrap();
        assert!(empty.is_empty());
        assert!(check_signal(&empty).is_err());
    }

    #[test]
    fn test_trend_matches_sign_of_difference() {
        let closes: Vec<f64> = (0..80)
            .map(|i| 50.0 + 5.0 * (i as f64 / 7.0).sin() + i as f64 * 0.05)
            .collect();

        for end in 2..=closes.len() {
            let s = IndicatorSeries::compute(&closes[..end], 9, 21).unwrap();
            let (fast, slow) = s.last().unwrap();
            let expected = if fast > slow {
                Trend::Up
            } else if fast < slow {
                Trend::Down
            } else {
                Trend::Sideways
            };
            assert_eq!(trend(&s).unwrap(), expected);
        }
    }

    #[test]
    fn test_analyze_uses_closes() {
        let bars: Vec<PriceBar> = [10.0, 10.0, 10.0, 9.0, 11.0]
            .iter()
            .enumerate()
            .map(|(i, &close)| PriceBar {
                timestamp: chrono::DateTime::from_timestamp(1_700_000_000 + i as i64 * 300, 0)
                    .unwrap(),
                open: close,
                high: close + 0.5,
                low: close - 0.5,
                close,
                volume: 1000.0,
            })
            .collect();

        let analysis = analyze(&bars, 2, 4).unwrap();
        assert_eq!(analysis.signal, Signal::Buy);
        assert_eq!(analysis.trend, Trend::Up);
        assert_relative_eq!(analysis.slow_ema, 10.16, epsilon = 1e-9);
    }
}
