//! Renders bucket size history as a PNG line chart.
//!
//! Pure: the same rows and maximum always produce the same bytes. The chart
//! shows the trailing [`PLOT_WINDOW_SECS`] seconds ending at the newest
//! sample, the size series in blue with point markers, and a dashed red
//! reference line at the historical maximum.

use crate::models::size_sample::SizeSample;
use image::{ImageError, ImageFormat, Rgb, RgbImage};
use std::{collections::BTreeMap, io::Cursor};

pub const PLOT_WINDOW_SECS: i64 = 10;

const WIDTH: u32 = 800;
const HEIGHT: u32 = 500;
const MARGIN_LEFT: i64 = 60;
const MARGIN_RIGHT: i64 = 20;
const MARGIN_TOP: i64 = 20;
const MARGIN_BOTTOM: i64 = 50;
const Y_HEADROOM: f64 = 1.1;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const GRID: Rgb<u8> = Rgb([225, 225, 225]);
const AXIS: Rgb<u8> = Rgb([0, 0, 0]);
pub const SERIES: Rgb<u8> = Rgb([31, 119, 180]);
pub const MAX_LINE: Rgb<u8> = Rgb([214, 39, 40]);

/// Union of both row sets, one row per timestamp, oldest first. When both
/// sets carry a timestamp the row from `recent` is kept.
pub fn merge_samples(recent: &[SizeSample], history: &[SizeSample]) -> Vec<SizeSample> {
    let mut merged = BTreeMap::new();
    for sample in history.iter().chain(recent) {
        merged.insert(sample.timestamp, sample.clone());
    }
    merged.into_values().collect()
}

/// Render the chart. Returns `Ok(None)` when there is nothing to plot.
pub fn render_size_plot(
    recent: &[SizeSample],
    history: &[SizeSample],
    max_size: i64,
) -> Result<Option<Vec<u8>>, ImageError> {
    let samples = merge_samples(recent, history);
    let Some(latest) = samples.last().map(|s| s.timestamp) else {
        return Ok(None);
    };

    let peak = samples
        .iter()
        .map(|s| s.total_size)
        .max()
        .unwrap_or(0)
        .max(max_size);
    let frame = Frame {
        x_start: latest - PLOT_WINDOW_SECS,
        y_top: (peak as f64 * Y_HEADROOM).max(1.0),
    };

    let mut canvas = Canvas::new();
    canvas.draw_grid();

    let max_y = frame.y(max_size);
    canvas.dashed_hline(max_y, MAX_LINE);

    let points: Vec<(i64, i64)> = samples
        .iter()
        .map(|s| (frame.x(s.timestamp), frame.y(s.total_size)))
        .collect();
    for pair in points.windows(2) {
        canvas.line(pair[0], pair[1], SERIES);
    }
    for point in &points {
        canvas.marker(*point, SERIES);
    }

    canvas.draw_axes();
    canvas.encode().map(Some)
}

/// Maps data coordinates to pixel coordinates inside the plot area.
struct Frame {
    x_start: i64,
    y_top: f64,
}

impl Frame {
    fn x(&self, timestamp: i64) -> i64 {
        let offset = (timestamp - self.x_start) as f64 / PLOT_WINDOW_SECS as f64;
        MARGIN_LEFT + (offset * plot_width() as f64).round() as i64
    }

    fn y(&self, value: i64) -> i64 {
        let fraction = value as f64 / self.y_top;
        MARGIN_TOP + plot_height() - (fraction * plot_height() as f64).round() as i64
    }
}

fn plot_width() -> i64 {
    WIDTH as i64 - MARGIN_LEFT - MARGIN_RIGHT
}

fn plot_height() -> i64 {
    HEIGHT as i64 - MARGIN_TOP - MARGIN_BOTTOM
}

struct Canvas {
    image: RgbImage,
}

impl Canvas {
    fn new() -> Self {
        Self {
            image: RgbImage::from_pixel(WIDTH, HEIGHT, BACKGROUND),
        }
    }

    fn in_plot_area(x: i64, y: i64) -> bool {
        (MARGIN_LEFT..=MARGIN_LEFT + plot_width()).contains(&x)
            && (MARGIN_TOP..=MARGIN_TOP + plot_height()).contains(&y)
    }

    /// Plot-area pixels only; everything else is clipped.
    fn plot(&mut self, x: i64, y: i64, color: Rgb<u8>) {
        if Self::in_plot_area(x, y) {
            self.image.put_pixel(x as u32, y as u32, color);
        }
    }

    fn draw_grid(&mut self) {
        for second in 0..=PLOT_WINDOW_SECS {
            let x = MARGIN_LEFT + second * plot_width() / PLOT_WINDOW_SECS;
            for y in MARGIN_TOP..=MARGIN_TOP + plot_height() {
                self.plot(x, y, GRID);
            }
        }
        for step in 0..=5 {
            let y = MARGIN_TOP + step * plot_height() / 5;
            for x in MARGIN_LEFT..=MARGIN_LEFT + plot_width() {
                self.plot(x, y, GRID);
            }
        }
    }

    fn draw_axes(&mut self) {
        let bottom = MARGIN_TOP + plot_height();
        for x in MARGIN_LEFT..=MARGIN_LEFT + plot_width() {
            self.plot(x, bottom, AXIS);
        }
        for y in MARGIN_TOP..=bottom {
            self.plot(MARGIN_LEFT, y, AXIS);
        }
        // One tick per second below the x axis.
        for second in 0..=PLOT_WINDOW_SECS {
            let x = MARGIN_LEFT + second * plot_width() / PLOT_WINDOW_SECS;
            for y in bottom + 1..=bottom + 5 {
                self.image.put_pixel(x as u32, y as u32, AXIS);
            }
        }
    }

    fn dashed_hline(&mut self, y: i64, color: Rgb<u8>) {
        for x in MARGIN_LEFT..=MARGIN_LEFT + plot_width() {
            if (x - MARGIN_LEFT) / 8 % 2 == 0 {
                self.plot(x, y, color);
                self.plot(x, y + 1, color);
            }
        }
    }

    /// Bresenham line, two pixels thick.
    fn line(&mut self, (x0, y0): (i64, i64), (x1, y1): (i64, i64), color: Rgb<u8>) {
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let (mut x, mut y, mut err) = (x0, y0, dx + dy);

        loop {
            self.plot(x, y, color);
            self.plot(x, y + 1, color);
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

    fn marker(&mut self, (cx, cy): (i64, i64), color: Rgb<u8>) {
        const RADIUS: i64 = 4;
        for dy in -RADIUS..=RADIUS {
            for dx in -RADIUS..=RADIUS {
                if dx * dx + dy * dy <= RADIUS * RADIUS {
                    self.plot(cx + dx, cy + dy, color);
                }
            }
        }
    }

    fn encode(self) -> Result<Vec<u8>, ImageError> {
        let mut bytes = Cursor::new(Vec::new());
        self.image.write_to(&mut bytes, ImageFormat::Png)?;
        Ok(bytes.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(timestamp: i64, total_size: i64) -> SizeSample {
        SizeSample {
            bucket_name: "tracked".into(),
            timestamp,
            total_size,
            object_count: 1,
        }
    }

    fn count_pixels(png: &[u8], color: Rgb<u8>) -> usize {
        let decoded = image::load_from_memory(png).unwrap().to_rgb8();
        decoded.pixels().filter(|p| **p == color).count()
    }

    #[test]
    fn no_rows_means_no_plot() {
        assert!(render_size_plot(&[], &[], 47).unwrap().is_none());
    }

    #[test]
    fn merge_dedupes_overlap_and_sorts() {
        let recent = vec![sample(108, 21), sample(105, 47)];
        let history = vec![sample(100, 19), sample(105, 47)];
        let merged = merge_samples(&recent, &history);
        let stamps: Vec<_> = merged.iter().map(|s| s.timestamp).collect();
        assert_eq!(stamps, vec![100, 105, 108]);
    }

    #[test]
    fn renders_a_png_with_series_and_max_line() {
        let history = vec![sample(100, 19), sample(105, 47), sample(108, 21)];
        let png = render_size_plot(&history[2..], &history, 47)
            .unwrap()
            .unwrap();

        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (WIDTH, HEIGHT));
        assert!(count_pixels(&png, SERIES) > 0);
        assert!(count_pixels(&png, MAX_LINE) > 0);
    }

    #[test]
    fn rendering_is_deterministic() {
        let rows = vec![sample(200, 2), sample(203, 30)];
        let first = render_size_plot(&rows, &[], 30).unwrap();
        let second = render_size_plot(&[], &rows, 30).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn a_single_row_still_plots() {
        let png = render_size_plot(&[sample(50, 0)], &[], 0).unwrap().unwrap();
        assert!(count_pixels(&png, SERIES) > 0);
    }
}
