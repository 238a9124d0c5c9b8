//! Диагностический график: столбчатая диаграмма важности признаков

use std::path::Path;

use image::{ImageFormat, Rgb, RgbImage};

use crate::error::Result;

const WIDTH: u32 = 800;
const HEIGHT: u32 = 480;
const MARGIN: u32 = 40;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const AXIS: Rgb<u8> = Rgb([40, 40, 40]);
const BAR: Rgb<u8> = Rgb([31, 119, 180]);

fn fill_rect(img: &mut RgbImage, x0: u32, y0: u32, x1: u32, y1: u32, color: Rgb<u8>) {
    let x1 = x1.min(img.width());
    let y1 = y1.min(img.height());
    for x in x0..x1 {
        for y in y0..y1 {
            img.put_pixel(x, y, color);
        }
    }
}

/// Рисует диаграмму в памяти; столбцы в порядке признаков
pub fn render_importances(importances: &[(String, f64)]) -> RgbImage {
    let mut img = RgbImage::from_pixel(WIDTH, HEIGHT, BACKGROUND);
    let plot_w = WIDTH - 2 * MARGIN;
    let plot_h = HEIGHT - 2 * MARGIN;
    let baseline = HEIGHT - MARGIN;

    let max = importances
        .iter()
        .map(|(_, v)| *v)
        .filter(|v| v.is_finite())
        .fold(0.0, f64::max);

    if !importances.is_empty() && max > 0.0 {
        let slot = (plot_w / importances.len() as u32).max(1);
        let bar_w = (slot * 3 / 4).max(1);
        for (i, (_, value)) in importances.iter().enumerate() {
            let x0 = MARGIN + i as u32 * slot + (slot - bar_w) / 2;
            if x0 >= MARGIN + plot_w {
                break;
            }
            let share = if value.is_finite() { value.max(0.0) / max } else { 0.0 };
            let bar_h = (share * plot_h as f64).round() as u32;
            fill_rect(&mut img, x0, baseline - bar_h, x0 + bar_w, baseline, BAR);
        }
    }

    // оси
    fill_rect(&mut img, MARGIN, baseline, MARGIN + plot_w, baseline + 2, AXIS);
    fill_rect(&mut img, MARGIN - 2, MARGIN, MARGIN, baseline + 2, AXIS);
    img
}

pub fn save_importances(importances: &[(String, f64)], path: &Path) -> Result<()> {
    let img = render_importances(importances);
    img.save_with_format(path, ImageFormat::Png)?;
    tracing::debug!(path = %path.display(), bars = importances.len(), "plot saved");
    Ok(())
}
