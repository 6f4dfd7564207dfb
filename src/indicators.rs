//! Indicator engine over the close prices of a [`Series`].
//!
//! Every output is aligned index-for-index with the input closes. Points inside
//! an indicator's warm-up window are `None`; a series shorter than the window
//! simply produces no defined values.

use ta::Next;
use ta::indicators::{BollingerBands, ExponentialMovingAverage, SimpleMovingAverage};

use crate::models::{Indicator, IndicatorSelection, Series};

pub const SMA_WINDOW: usize = 14;
pub const RSI_WINDOW: usize = 14;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;
pub const BOLLINGER_WINDOW: usize = 20;
pub const BOLLINGER_K: f64 = 2.0;

pub const COL_SMA: &str = "SMA";
pub const COL_RSI: &str = "RSI";
pub const COL_MACD: &str = "MACD";
pub const COL_SIGNAL: &str = "Signal";
pub const COL_BB_UPPER: &str = "BB_upper";
pub const COL_BB_MIDDLE: &str = "BB_middle";
pub const COL_BB_LOWER: &str = "BB_lower";

/// Simple moving average of the trailing `window` closes.
pub fn moving_average(closes: &[f64], window: usize) -> Vec<Option<f64>> {
    let Ok(mut sma) = SimpleMovingAverage::new(window) else {
        return vec![None; closes.len()];
    };
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let value = sma.next(close);
            (i + 1 >= window).then_some(value)
        })
        .collect()
}

/// Wilder's RSI.
///
/// Gains and losses are smoothed with factor `1/window`, which is what an EMA of
/// period `2 * window - 1` uses. The first bar has no prior close and counts as
/// an unchanged day.
pub fn rsi(closes: &[f64], window: usize) -> Vec<Option<f64>> {
    if window == 0 {
        return vec![None; closes.len()];
    }
    let wilder_period = 2 * window - 1;
    let (Ok(mut avg_gain), Ok(mut avg_loss)) = (
        ExponentialMovingAverage::new(wilder_period),
        ExponentialMovingAverage::new(wilder_period),
    ) else {
        return vec![None; closes.len()];
    };

    let mut previous: Option<f64> = None;
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let change = previous.map_or(0.0, |p| close - p);
            previous = Some(close);

            let gain = avg_gain.next(change.max(0.0));
            let loss = avg_loss.next((-change).max(0.0));

            if i + 1 < window {
                return None;
            }
            if loss == 0.0 {
                return Some(100.0);
            }
            Some(100.0 - 100.0 / (1.0 + gain / loss))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct MacdOutput {
    pub macd: Vec<Option<f64>>,
    pub signal: Vec<Option<f64>>,
}

/// MACD line (fast EMA minus slow EMA) and its signal EMA.
///
/// Both EMAs run from the first close; the MACD line is reported once the slow
/// EMA has seen `slow` closes. The signal EMA is seeded on the first reported
/// MACD value and reported after `signal` of them.
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> MacdOutput {
    let n = closes.len();
    let (Ok(mut fast_ema), Ok(mut slow_ema), Ok(mut signal_ema)) = (
        ExponentialMovingAverage::new(fast),
        ExponentialMovingAverage::new(slow),
        ExponentialMovingAverage::new(signal),
    ) else {
        return MacdOutput {
            macd: vec![None; n],
            signal: vec![None; n],
        };
    };

    let mut macd_line = Vec::with_capacity(n);
    let mut signal_line = Vec::with_capacity(n);
    let mut defined = 0usize;

    for (i, &close) in closes.iter().enumerate() {
        let f = fast_ema.next(close);
        let s = slow_ema.next(close);
        if i + 1 < slow {
            macd_line.push(None);
            signal_line.push(None);
            continue;
        }
        let m = f - s;
        let sig = signal_ema.next(m);
        defined += 1;
        macd_line.push(Some(m));
        signal_line.push((defined >= signal).then_some(sig));
    }

    MacdOutput {
        macd: macd_line,
        signal: signal_line,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BollingerOutput {
    pub upper: Vec<Option<f64>>,
    pub middle: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
}

/// Bands at `k` population standard deviations around the `window` SMA.
pub fn bollinger(closes: &[f64], window: usize, k: f64) -> BollingerOutput {
    let n = closes.len();
    let mut out = BollingerOutput {
        upper: Vec::with_capacity(n),
        middle: Vec::with_capacity(n),
        lower: Vec::with_capacity(n),
    };
    let Ok(mut bands) = BollingerBands::new(window, k) else {
        out.upper = vec![None; n];
        out.middle = vec![None; n];
        out.lower = vec![None; n];
        return out;
    };

    for (i, &close) in closes.iter().enumerate() {
        let b = bands.next(close);
        let ready = i + 1 >= window;
        out.upper.push(ready.then_some(b.upper));
        out.middle.push(ready.then_some(b.average));
        out.lower.push(ready.then_some(b.lower));
    }
    out
}

/// One named output sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: &'static str,
    pub indicator: Indicator,
    pub values: Vec<Option<f64>>,
}

/// Columns for the selected indicators, in menu order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IndicatorFrame {
    columns: Vec<Column>,
}

impl IndicatorFrame {
    pub fn compute(series: &Series, selection: &IndicatorSelection) -> Self {
        let closes = series.closes();
        let mut columns = Vec::new();

        for indicator in selection.iter() {
            match indicator {
                Indicator::MovingAverage => columns.push(Column {
                    name: COL_SMA,
                    indicator,
                    values: moving_average(&closes, SMA_WINDOW),
                }),
                Indicator::Rsi => columns.push(Column {
                    name: COL_RSI,
                    indicator,
                    values: rsi(&closes, RSI_WINDOW),
                }),
                Indicator::Macd => {
                    let out = macd(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL);
                    columns.push(Column {
                        name: COL_MACD,
                        indicator,
                        values: out.macd,
                    });
                    columns.push(Column {
                        name: COL_SIGNAL,
                        indicator,
                        values: out.signal,
                    });
                }
                Indicator::Bollinger => {
                    let out = bollinger(&closes, BOLLINGER_WINDOW, BOLLINGER_K);
                    columns.push(Column {
                        name: COL_BB_UPPER,
                        indicator,
                        values: out.upper,
                    });
                    columns.push(Column {
                        name: COL_BB_MIDDLE,
                        indicator,
                        values: out.middle,
                    });
                    columns.push(Column {
                        name: COL_BB_LOWER,
                        indicator,
                        values: out.lower,
                    });
                }
            }
        }

        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Latest value of a column, if it is defined on the last bar.
    pub fn latest(&self, name: &str) -> Option<f64> {
        self.column(name).and_then(|c| c.values.last().copied().flatten())
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Bar, Period};
    use chrono::NaiveDate;
    use proptest::prelude::*;

    const EPS: f64 = 1e-9;

    fn close_enough(a: f64, b: f64) -> bool {
        (a - b).abs() <= EPS * (1.0 + a.abs().max(b.abs()))
    }

    fn series_from(closes: &[f64]) -> Series {
        let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                date: start + chrono::Days::new(i as u64),
                open: c,
                high: c + 1.0,
                low: c - 1.0,
                close: c,
                volume: 1_000,
            })
            .collect();
        Series::new("TEST", Period::OneYear, bars)
    }

    #[test]
    fn moving_average_of_arithmetic_closes() {
        let closes: Vec<f64> = (10..30).map(f64::from).collect();
        let sma = moving_average(&closes, SMA_WINDOW);

        assert_eq!(sma.len(), 20);
        assert!(sma[..13].iter().all(Option::is_none));
        assert!(close_enough(sma[19].unwrap(), 22.5));
        assert!(close_enough(sma[13].unwrap(), 16.5));
    }

    #[test]
    fn short_series_yields_only_warm_up() {
        let closes = [10.0, 11.0, 12.0];
        assert!(moving_average(&closes, SMA_WINDOW).iter().all(Option::is_none));
        assert!(rsi(&closes, RSI_WINDOW).iter().all(Option::is_none));
        let m = macd(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL);
        assert!(m.macd.iter().chain(m.signal.iter()).all(Option::is_none));
        let bb = bollinger(&closes, BOLLINGER_WINDOW, BOLLINGER_K);
        assert!(bb.middle.iter().all(Option::is_none));
    }

    #[test]
    fn empty_closes_give_empty_outputs() {
        assert!(moving_average(&[], SMA_WINDOW).is_empty());
        assert!(rsi(&[], RSI_WINDOW).is_empty());
        assert!(macd(&[], MACD_FAST, MACD_SLOW, MACD_SIGNAL).macd.is_empty());
    }

    #[test]
    fn rsi_saturates_when_price_only_rises() {
        let closes: Vec<f64> = (1..=30).map(f64::from).collect();
        let values = rsi(&closes, RSI_WINDOW);
        assert!(values[..13].iter().all(Option::is_none));
        assert!(values[13..].iter().all(|v| *v == Some(100.0)));
    }

    #[test]
    fn rsi_is_zero_when_price_only_falls() {
        let closes: Vec<f64> = (1..=30).rev().map(f64::from).collect();
        let values = rsi(&closes, RSI_WINDOW);
        assert!(values[13..].iter().all(|v| v.is_some_and(|x| x.abs() < 1e-9)));
    }

    #[test]
    fn rsi_matches_wilder_smoothing() {
        // alternating +1/-1 after the flat first bar
        let closes: Vec<f64> = (0..20).map(|i| if i % 2 == 0 { 10.0 } else { 11.0 }).collect();
        let values = rsi(&closes, RSI_WINDOW);

        let alpha = 1.0 / 14.0;
        let (mut g, mut l) = (0.0f64, 0.0f64);
        for i in 1..=13 {
            let change = closes[i] - closes[i - 1];
            g = alpha * change.max(0.0) + (1.0 - alpha) * g;
            l = alpha * (-change).max(0.0) + (1.0 - alpha) * l;
        }
        let expected = 100.0 - 100.0 / (1.0 + g / l);
        assert!(close_enough(values[13].unwrap(), expected));
    }

    #[test]
    fn macd_warm_up_lengths() {
        let closes: Vec<f64> = (0..40).map(|i| 20.0 + (i as f64 * 0.3).sin()).collect();
        let out = macd(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL);

        assert_eq!(out.macd.iter().filter(|v| v.is_none()).count(), 25);
        assert!(out.macd[25].is_some());
        assert!(out.signal[32].is_none());
        assert!(out.signal[33].is_some());
    }

    #[test]
    fn macd_of_flat_prices_is_zero() {
        let closes = vec![50.0; 40];
        let out = macd(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL);
        assert!(out.macd.iter().flatten().all(|v| v.abs() < 1e-12));
        assert!(out.signal.iter().flatten().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn macd_line_matches_hand_rolled_emas() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let ema = |period: f64| {
            let k = 2.0 / (period + 1.0);
            closes.iter().skip(1).fold(closes[0], |acc, c| k * c + (1.0 - k) * acc)
        };
        let out = macd(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL);
        assert!(close_enough(out.macd[29].unwrap(), ema(12.0) - ema(26.0)));
    }

    #[test]
    fn signal_line_is_nine_period_ema_of_macd() {
        let closes: Vec<f64> = (0..45).map(|i| 20.0 + (i as f64 * 0.4).sin() * 3.0 + i as f64 * 0.1).collect();
        let out = macd(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL);

        let k = 2.0 / 10.0;
        let mut ema = out.macd[25].unwrap();
        for i in 26..closes.len() {
            ema = k * out.macd[i].unwrap() + (1.0 - k) * ema;
            if i >= 33 {
                assert!(close_enough(out.signal[i].unwrap(), ema), "signal mismatch at {}", i);
            }
        }
        assert!(close_enough(out.signal[44].unwrap(), ema));
    }

    #[test]
    fn frame_with_no_selection_is_empty() {
        let series = series_from(&[1.0, 2.0, 3.0]);
        let frame = IndicatorFrame::compute(&series, &IndicatorSelection::none());
        assert!(frame.is_empty());
    }

    #[test]
    fn frame_columns_follow_menu_order() {
        let closes: Vec<f64> = (0..40).map(|i| 10.0 + i as f64).collect();
        let series = series_from(&closes);
        let frame = IndicatorFrame::compute(&series, &IndicatorSelection::all());

        let names: Vec<_> = frame.columns().iter().map(|c| c.name).collect();
        assert_eq!(
            names,
            vec![COL_SMA, COL_RSI, COL_MACD, COL_SIGNAL, COL_BB_UPPER, COL_BB_MIDDLE, COL_BB_LOWER]
        );
        assert!(frame.columns().iter().all(|c| c.values.len() == 40));
        assert!(close_enough(frame.latest(COL_SMA).unwrap(), 42.5));
    }

    fn closes_strategy() -> impl Strategy<Value = Vec<f64>> {
        proptest::collection::vec(1.0f64..500.0, 0..120)
    }

    proptest! {
        #[test]
        fn moving_average_defined_count_and_values(closes in closes_strategy()) {
            let sma = moving_average(&closes, SMA_WINDOW);
            let defined = sma.iter().filter(|v| v.is_some()).count();
            prop_assert_eq!(defined, closes.len().saturating_sub(SMA_WINDOW - 1));
            for (i, v) in sma.iter().enumerate() {
                if let Some(v) = v {
                    let window = &closes[i + 1 - SMA_WINDOW..=i];
                    let mean = window.iter().sum::<f64>() / SMA_WINDOW as f64;
                    prop_assert!((v - mean).abs() < 1e-6, "sma[{}] = {} != {}", i, v, mean);
                }
            }
        }

        #[test]
        fn rsi_stays_in_bounds(closes in closes_strategy()) {
            for v in rsi(&closes, RSI_WINDOW).into_iter().flatten() {
                prop_assert!((0.0..=100.0).contains(&v), "rsi out of range: {}", v);
            }
        }

        #[test]
        fn bollinger_middle_and_width(closes in closes_strategy()) {
            let bb = bollinger(&closes, BOLLINGER_WINDOW, BOLLINGER_K);
            for i in 0..closes.len() {
                let (Some(up), Some(mid), Some(low)) = (bb.upper[i], bb.middle[i], bb.lower[i]) else {
                    prop_assert!(i + 1 < BOLLINGER_WINDOW);
                    continue;
                };
                let window = &closes[i + 1 - BOLLINGER_WINDOW..=i];
                let mean = window.iter().sum::<f64>() / BOLLINGER_WINDOW as f64;
                let var = window.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / BOLLINGER_WINDOW as f64;
                prop_assert!((mid - mean).abs() < 1e-6);
                prop_assert!(((up - low) - 4.0 * var.sqrt()).abs() < 1e-4);
            }
        }
    }
}
