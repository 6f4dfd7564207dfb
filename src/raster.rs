//! PNG rendering of a [`ChartModel`].

use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

use crate::chart::{AxisId, ChartModel, LineTrace, SecondaryAxis, TraceColor};
use crate::errors::ExportError;

pub mod colors {
    use image::Rgb;

    pub const BACKGROUND: Rgb<u8> = Rgb([17, 17, 17]);
    pub const FRAME: Rgb<u8> = Rgb([70, 70, 70]);
    pub const GUIDE: Rgb<u8> = Rgb([45, 45, 45]);
    pub const BULL: Rgb<u8> = Rgb([0, 200, 83]);
    pub const BEAR: Rgb<u8> = Rgb([255, 68, 68]);
}

const MARGIN: u32 = 12;
const PANEL_GAP: u32 = 8;

fn trace_rgb(color: TraceColor) -> Rgb<u8> {
    match color {
        TraceColor::Blue => Rgb([33, 150, 243]),
        TraceColor::Green => Rgb([76, 175, 80]),
        TraceColor::Orange => Rgb([255, 152, 0]),
        TraceColor::Purple => Rgb([171, 71, 188]),
        TraceColor::Red => Rgb([229, 57, 53]),
        TraceColor::Yellow => Rgb([253, 216, 53]),
    }
}

/// Pixel rectangle mapped to a value range.
#[derive(Debug, Clone, Copy)]
struct Panel {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    min: f64,
    max: f64,
}

impl Panel {
    /// Value to pixel row, clamped to the panel.
    fn y_for(&self, value: f64) -> i64 {
        let span = (self.max - self.min).max(f64::EPSILON);
        let t = ((value - self.min) / span).clamp(0.0, 1.0);
        let bottom = (self.y + self.height - 1) as f64;
        (bottom - t * (self.height - 1) as f64).round() as i64
    }

    fn x_center(&self, index: usize, count: usize) -> i64 {
        let slot = self.width as f64 / count.max(1) as f64;
        (self.x as f64 + slot * (index as f64 + 0.5)).round() as i64
    }

    fn slot_width(&self, count: usize) -> f64 {
        self.width as f64 / count.max(1) as f64
    }
}

/// Lays out the price panel on top and one strip per secondary axis below it.
fn layout(width: u32, height: u32, model: &ChartModel) -> (Panel, Vec<(SecondaryAxis, Panel)>) {
    let inner_w = width.saturating_sub(2 * MARGIN).max(1);
    let inner_h = height.saturating_sub(2 * MARGIN).max(1);
    let n_secondary = model.secondary_axes.len() as u32;

    let price_h = if n_secondary == 0 {
        inner_h
    } else {
        (inner_h as f64 * 0.6) as u32
    };
    let price = Panel {
        x: MARGIN,
        y: MARGIN,
        width: inner_w,
        height: price_h.max(1),
        min: model.price_range.0,
        max: model.price_range.1,
    };

    let mut secondary = Vec::new();
    if n_secondary > 0 {
        let remaining = inner_h.saturating_sub(price_h + n_secondary * PANEL_GAP);
        let strip_h = (remaining / n_secondary).max(1);
        for (i, axis) in model.secondary_axes.iter().enumerate() {
            let y = MARGIN + price_h + PANEL_GAP + i as u32 * (strip_h + PANEL_GAP);
            secondary.push((
                *axis,
                Panel {
                    x: MARGIN,
                    y,
                    width: inner_w,
                    height: strip_h,
                    min: axis.min,
                    max: axis.max,
                },
            ));
        }
    }
    (price, secondary)
}

pub fn render(model: &ChartModel, width: u32, height: u32) -> RgbImage {
    let mut img = RgbImage::from_pixel(width.max(1), height.max(1), colors::BACKGROUND);
    let (price, secondary) = layout(img.width(), img.height(), model);

    draw_frame(&mut img, &price);
    let count = model.candles.len();
    for (i, candle) in model.candles.iter().enumerate() {
        let color = if candle.is_bullish() {
            colors::BULL
        } else {
            colors::BEAR
        };
        let x = price.x_center(i, count);
        draw_line(&mut img, x, price.y_for(candle.high), x, price.y_for(candle.low), color);

        let body_w = (price.slot_width(count) * 0.6).max(1.0) as i64;
        let top = price.y_for(candle.open.max(candle.close));
        let bottom = price.y_for(candle.open.min(candle.close));
        draw_filled_rect(&mut img, x - body_w / 2, top, body_w, bottom - top + 1, color);
    }
    for trace in model.traces_on(AxisId::Price) {
        draw_trace(&mut img, &price, trace, count);
    }

    for (axis, panel) in &secondary {
        draw_frame(&mut img, panel);
        match axis.id {
            AxisId::Rsi => {
                for level in [30.0, 70.0] {
                    let y = panel.y_for(level);
                    draw_line(&mut img, panel.x as i64, y, (panel.x + panel.width - 1) as i64, y, colors::GUIDE);
                }
            }
            AxisId::Macd if axis.min < 0.0 && axis.max > 0.0 => {
                let y = panel.y_for(0.0);
                draw_line(&mut img, panel.x as i64, y, (panel.x + panel.width - 1) as i64, y, colors::GUIDE);
            }
            _ => {}
        }
        for trace in model.traces_on(axis.id) {
            draw_trace(&mut img, panel, trace, count);
        }
    }

    img
}

/// Renders and encodes the chart as PNG bytes.
pub fn encode_png(model: &ChartModel, width: u32, height: u32) -> Result<Vec<u8>, ExportError> {
    let img = render(model, width, height);
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

fn draw_trace(img: &mut RgbImage, panel: &Panel, trace: &LineTrace, count: usize) {
    let color = trace_rgb(trace.color);
    let mut previous: Option<(i64, i64)> = None;
    for (i, value) in trace.points.iter().enumerate() {
        let Some(v) = value.filter(|v| v.is_finite()) else {
            previous = None;
            continue;
        };
        let point = (panel.x_center(i, count), panel.y_for(v));
        match previous {
            Some((x0, y0)) => draw_line(img, x0, y0, point.0, point.1, color),
            None => put(img, point.0, point.1, color),
        }
        previous = Some(point);
    }
}

fn draw_frame(img: &mut RgbImage, panel: &Panel) {
    let (x0, y0) = (panel.x as i64, panel.y as i64);
    let (x1, y1) = (x0 + panel.width as i64 - 1, y0 + panel.height as i64 - 1);
    draw_line(img, x0, y0, x1, y0, colors::FRAME);
    draw_line(img, x0, y1, x1, y1, colors::FRAME);
    draw_line(img, x0, y0, x0, y1, colors::FRAME);
    draw_line(img, x1, y0, x1, y1, colors::FRAME);
}

fn put(img: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, color);
    }
}

fn draw_filled_rect(img: &mut RgbImage, x: i64, y: i64, width: i64, height: i64, color: Rgb<u8>) {
    for dy in 0..height.max(1) {
        for dx in 0..width.max(1) {
            put(img, x + dx, y + dy, color);
        }
    }
}

/// Bresenham; off-image pixels are skipped.
fn draw_line(img: &mut RgbImage, x0: i64, y0: i64, x1: i64, y1: i64, color: Rgb<u8>) {
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let (mut x, mut y, mut err) = (x0, y0, dx + dy);
    loop {
        put(img, x, y, color);
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}
