//! Naive next-day trend line.
//!
//! Ordinary least squares of next-day close against the bar date as unix seconds.
//! It is a straight line through time, not a predictive model, and every surface
//! labels it that way.

use chrono::{Days, NaiveDate};

use crate::models::Series;

const TRAIN_FRACTION: f64 = 0.8;
const MIN_ROWS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendForecast {
    pub target_date: NaiveDate,
    pub predicted_close: f64,
    /// Coefficient of determination on the held-out tail; `None` if undefined.
    pub r_squared: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct LinearFit {
    slope: f64,
    intercept: f64,
}

impl LinearFit {
    fn predict(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

fn fit(xs: &[f64], ys: &[f64]) -> Option<LinearFit> {
    let n = xs.len() as f64;
    if xs.len() < 2 {
        return None;
    }
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;
    let (sxy, sxx) = xs.iter().zip(ys).fold((0.0, 0.0), |(sxy, sxx), (x, y)| {
        let dx = x - mean_x;
        (sxy + dx * (y - mean_y), sxx + dx * dx)
    });
    if sxx == 0.0 {
        return None;
    }
    let slope = sxy / sxx;
    Some(LinearFit {
        slope,
        intercept: mean_y - slope * mean_x,
    })
}

fn r_squared(model: &LinearFit, xs: &[f64], ys: &[f64]) -> Option<f64> {
    if ys.is_empty() {
        return None;
    }
    let mean = ys.iter().sum::<f64>() / ys.len() as f64;
    let ss_tot: f64 = ys.iter().map(|y| (y - mean).powi(2)).sum();
    let ss_res: f64 = xs
        .iter()
        .zip(ys)
        .map(|(x, y)| (y - model.predict(*x)).powi(2))
        .sum();
    (ss_tot > 0.0).then(|| 1.0 - ss_res / ss_tot)
}

fn unix_seconds(date: NaiveDate) -> f64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp() as f64)
        .unwrap_or_default()
}

/// Fits on the first 80% of rows in date order and scores on the rest.
pub fn next_day_trend(series: &Series) -> Option<TrendForecast> {
    let bars = series.bars();
    if bars.len() < MIN_ROWS + 1 {
        return None;
    }
    // target is the following bar's close, so the last bar has no row
    let xs: Vec<f64> = bars[..bars.len() - 1].iter().map(|b| unix_seconds(b.date)).collect();
    let ys: Vec<f64> = bars[1..].iter().map(|b| b.close).collect();

    let split = ((xs.len() as f64) * TRAIN_FRACTION).round() as usize;
    let split = split.clamp(2, xs.len());
    let model = fit(&xs[..split], &ys[..split])?;
    let r_squared = r_squared(&model, &xs[split..], &ys[split..]);

    let last_date = bars.last()?.date;
    let target_date = last_date.checked_add_days(Days::new(1))?;
    Some(TrendForecast {
        target_date,
        predicted_close: model.predict(unix_seconds(target_date)),
        r_squared,
    })
}
