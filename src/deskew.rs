use geo::{Coord, MinimumRotatedRect, MultiPoint, Polygon};
use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use imageproc::filter::{gaussian_blur_f32, median_filter};
use nalgebra::{Point2, Rotation2, Vector2};
use tracing::instrument;

use crate::DeskewOptions;

const BINS: usize = 256;
const CUBIC_A: f32 = -0.75;

/// Binarizes `image` and rotates it so the dominant text baseline is horizontal.
///
/// The result has the same dimensions as the input. When the mask has no foreground at
/// all the thresholded image is returned unrotated.
#[instrument(level = "debug", skip(image, options), fields(width = image.width(), height = image.height()))]
pub fn deskew(image: &DynamicImage, options: &DeskewOptions) -> GrayImage {
    let gray = image.to_luma8();
    let denoised = median_filter(&gray, options.median_radius, options.median_radius);
    let enhanced = equalize_tiles(&denoised, options.clahe_clip_limit, options.clahe_grid);
    let mask = adaptive_threshold(&enhanced, options.threshold_block_size, options.threshold_offset);

    match skew_angle(&mask) {
        Some(angle) => {
            log::debug!("Correcting skew by {angle:.2} degrees");
            rotate_replicate(&mask, angle)
        }
        None => {
            log::debug!("No foreground to estimate skew from, leaving image unrotated");
            mask
        }
    }
}

/// Contrast limited histogram equalization over a `grid` x `grid` layout of tiles, with
/// bilinear blending between neighbouring tile mappings.
#[instrument(level = "trace", skip(image))]
pub fn equalize_tiles(image: &GrayImage, clip_limit: f32, grid: u32) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }
    let grid = grid.max(1);
    let tile_w = width.div_ceil(grid);
    let tile_h = height.div_ceil(grid);
    let tiles_x = width.div_ceil(tile_w) as usize;
    let tiles_y = height.div_ceil(tile_h) as usize;

    let mut luts = Vec::with_capacity(tiles_x * tiles_y);
    for ty in 0..tiles_y as u32 {
        for tx in 0..tiles_x as u32 {
            let x_range = tx * tile_w..((tx + 1) * tile_w).min(width);
            let y_range = ty * tile_h..((ty + 1) * tile_h).min(height);
            let mut histogram = [0u32; BINS];
            for y in y_range {
                for x in x_range.clone() {
                    histogram[image.get_pixel(x, y)[0] as usize] += 1;
                }
            }
            luts.push(tile_mapping(histogram, clip_limit));
        }
    }

    let axis = |pos: u32, tile: u32, tiles: usize| {
        let grid_pos = (pos as f32 + 0.5) / tile as f32 - 0.5;
        let low = grid_pos.floor();
        let first = (low.max(0.0) as usize).min(tiles - 1);
        let second = ((low + 1.0).max(0.0) as usize).min(tiles - 1);
        (first, second, (grid_pos - low).clamp(0.0, 1.0))
    };

    ImageBuffer::from_fn(width, height, |x, y| {
        let value = image.get_pixel(x, y)[0] as usize;
        let (x0, x1, wx) = axis(x, tile_w, tiles_x);
        let (y0, y1, wy) = axis(y, tile_h, tiles_y);
        let at = |tx: usize, ty: usize| luts[ty * tiles_x + tx][value] as f32;
        let top = at(x0, y0) * (1.0 - wx) + at(x1, y0) * wx;
        let bottom = at(x0, y1) * (1.0 - wx) + at(x1, y1) * wx;
        Luma([(top * (1.0 - wy) + bottom * wy).round().clamp(0.0, 255.0) as u8])
    })
}

fn tile_mapping(mut histogram: [u32; BINS], clip_limit: f32) -> [u8; BINS] {
    let total = histogram.iter().sum::<u32>();
    if clip_limit > 0.0 {
        let limit = ((clip_limit * total as f32 / BINS as f32) as u32).max(1);
        let mut excess = 0;
        for bin in histogram.iter_mut() {
            if *bin > limit {
                excess += *bin - limit;
                *bin = limit;
            }
        }
        let batch = excess / BINS as u32;
        let residual = (excess % BINS as u32) as usize;
        for bin in histogram.iter_mut() {
            *bin += batch;
        }
        if residual > 0 {
            let step = (BINS / residual).max(1);
            for bin in histogram.iter_mut().step_by(step).take(residual) {
                *bin += 1;
            }
        }
    }

    let mut lut = [0u8; BINS];
    let scale = 255.0 / total.max(1) as f32;
    let mut cumulative = 0;
    for (entry, count) in lut.iter_mut().zip(histogram) {
        cumulative += count;
        *entry = (cumulative as f32 * scale).round().min(255.0) as u8;
    }
    lut
}

/// Marks a pixel as foreground when it is brighter than the Gaussian weighted mean of its
/// `block_size` neighbourhood minus `offset`.
#[instrument(level = "trace", skip(image))]
pub fn adaptive_threshold(image: &GrayImage, block_size: u32, offset: f32) -> GrayImage {
    // Same sigma a Gaussian kernel of `block_size` taps would get.
    let sigma = 0.3 * ((block_size as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let local_mean = gaussian_blur_f32(image, sigma.max(0.1));
    ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
        let value = image.get_pixel(x, y)[0] as f32;
        let threshold = local_mean.get_pixel(x, y)[0] as f32 - offset;
        Luma([if value > threshold { 255 } else { 0 }])
    })
}

/// Rotation in degrees that levels the foreground of `mask`, or `None` if nothing is set.
///
/// The minimum area rectangle of all non-zero pixels is measured with its edge angle
/// folded into [-90, 0) and then mapped to the correction.
pub fn skew_angle(mask: &GrayImage) -> Option<f32> {
    // Only the outermost pixels of each row can be on the hull.
    let mut points = Vec::new();
    for (y, row) in mask.enumerate_rows() {
        let mut set = row.filter(|(_, _, pixel)| pixel[0] > 0).map(|(x, _, _)| x);
        if let Some(first) = set.next() {
            let last = set.last().unwrap_or(first);
            points.push(Coord { x: first as f32, y: y as f32 });
            points.push(Coord { x: last as f32, y: y as f32 });
        }
    }
    if points.is_empty() {
        return None;
    }

    let angle = match MultiPoint::from(points).minimum_rotated_rect() {
        Some(rect) => rect_angle(&rect),
        None => -90.0,
    };
    log::trace!("Minimum area rectangle angle {angle}");
    Some(if angle < -45.0 { -(90.0 + angle) } else { -angle })
}

fn rect_angle(rect: &Polygon<f32>) -> f32 {
    match rect.exterior().0.as_slice() {
        [a, b, ..] => (b.y - a.y).atan2(b.x - a.x).to_degrees().rem_euclid(90.0) - 90.0,
        _ => -90.0,
    }
}

/// Rotates clockwise by `degrees` about the image center using bicubic sampling. Samples
/// falling outside the source repeat the nearest edge pixel.
#[instrument(level = "trace", skip(image))]
pub fn rotate_replicate(image: &GrayImage, degrees: f32) -> GrayImage {
    if degrees == 0.0 || image.width() == 0 || image.height() == 0 {
        return image.clone();
    }
    let center = Vector2::new((image.width() / 2) as f32, (image.height() / 2) as f32);
    let inverse = Rotation2::new(-degrees.to_radians());
    ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
        let source = inverse * (Point2::new(x as f32, y as f32) - center) + center;
        Luma([sample_bicubic(image, source.x, source.y)])
    })
}

fn cubic_weight(t: f32) -> f32 {
    let t = t.abs();
    if t <= 1.0 {
        ((CUBIC_A + 2.0) * t - (CUBIC_A + 3.0)) * t * t + 1.0
    } else if t < 2.0 {
        ((CUBIC_A * t - 5.0 * CUBIC_A) * t + 8.0 * CUBIC_A) * t - 4.0 * CUBIC_A
    } else {
        0.0
    }
}

fn sample_bicubic(image: &GrayImage, x: f32, y: f32) -> u8 {
    let max_x = image.width() as i64 - 1;
    let max_y = image.height() as i64 - 1;
    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);
    let mut value = 0.0;
    for j in -1..=2 {
        let py = (y0 as i64 + j).clamp(0, max_y) as u32;
        let wy = cubic_weight(fy - j as f32);
        for i in -1..=2 {
            let px = (x0 as i64 + i).clamp(0, max_x) as u32;
            value += image.get_pixel(px, py)[0] as f32 * cubic_weight(fx - i as f32) * wy;
        }
    }
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use imageproc::drawing::draw_line_segment_mut;

    fn tilted_band(degrees: f32) -> GrayImage {
        let mut mask = GrayImage::new(240, 240);
        let slope = degrees.to_radians().tan();
        for offset in 0..6 {
            let y = 100.0 + offset as f32;
            draw_line_segment_mut(
                &mut mask,
                (30.0, y),
                (210.0, y + 180.0 * slope),
                Luma([255]),
            );
        }
        mask
    }

    #[test]
    fn empty_mask_has_no_angle() {
        assert_eq!(skew_angle(&GrayImage::new(50, 40)), None);
    }

    #[test]
    fn level_band_needs_no_correction() {
        let angle = skew_angle(&tilted_band(0.0)).unwrap();
        assert!(angle.abs() < 0.5, "{angle}");
    }

    #[test]
    fn measures_clockwise_tilt() {
        let angle = skew_angle(&tilted_band(10.0)).unwrap();
        assert!((angle + 10.0).abs() < 1.5, "{angle}");
    }

    #[test]
    fn measures_counter_clockwise_tilt() {
        let angle = skew_angle(&tilted_band(-8.0)).unwrap();
        assert!((angle - 8.0).abs() < 1.5, "{angle}");
    }

    #[test]
    fn rotation_levels_the_band() {
        let mask = tilted_band(12.0);
        let angle = skew_angle(&mask).unwrap();
        let rotated = rotate_replicate(&mask, angle);
        assert_eq!(rotated.dimensions(), mask.dimensions());
        let residual = skew_angle(&rotated).unwrap();
        assert!(residual.abs() < 1.5, "{residual}");
    }

    #[test]
    fn rotation_replicates_borders() {
        let image = GrayImage::from_pixel(64, 48, Luma([200]));
        let rotated = rotate_replicate(&image, 30.0);
        assert!(rotated.pixels().all(|pixel| pixel[0] == 200));
    }

    #[test]
    fn zero_rotation_is_identity() {
        let mask = tilted_band(5.0);
        assert_eq!(rotate_replicate(&mask, 0.0), mask);
    }

    #[test]
    fn equalization_spreads_a_narrow_range() {
        let image = GrayImage::from_fn(64, 64, |x, _| Luma([100 + (x % 16) as u8]));
        let enhanced = equalize_tiles(&image, 2.0, 8);
        assert_eq!(enhanced.dimensions(), image.dimensions());
        let (min, max) = enhanced
            .pixels()
            .fold((255, 0), |(min, max), pixel| (min.min(pixel[0]), max.max(pixel[0])));
        assert!(max - min > 16, "range {min}..{max}");
    }

    #[test]
    fn threshold_follows_local_illumination() {
        // Dark text strokes on a background that brightens from left to right.
        let image = GrayImage::from_fn(120, 40, |x, y| {
            let background = 90 + x as u8;
            if y == 20 && x % 10 < 3 {
                Luma([background - 60])
            } else {
                Luma([background])
            }
        });
        let mask = adaptive_threshold(&image, 31, 15.0);
        assert_eq!(mask.get_pixel(5, 5)[0], 255);
        assert_eq!(mask.get_pixel(110, 5)[0], 255);
        assert_eq!(mask.get_pixel(1, 20)[0], 0);
        assert_eq!(mask.get_pixel(111, 20)[0], 0);
    }

    #[test]
    fn deskew_keeps_dimensions() {
        let image = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(80, 60, image::Rgb([240, 240, 240])));
        let result = deskew(&image, &DeskewOptions::default());
        assert_eq!(result.dimensions(), (80, 60));
    }
}
