//! Gradient Hough transform for circles.
//!
//! Edge pixels from Canny vote for candidate centres along their gradient
//! direction for every radius in range. Accumulator peaks above a vote
//! threshold become centres (strongest first, at least `min_distance` apart),
//! and each centre's radius is the distance most edge pixels agree on.

use std::sync::atomic::{AtomicU32, Ordering};

use image::{GrayImage, Rgb, RgbImage};
use imageproc::{
    drawing::{draw_filled_circle_mut, draw_hollow_circle_mut},
    edges::canny,
};
use rayon::prelude::*;

use crate::filters::sobel_gradients;

const CIRCLE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const CENTER_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// A detected circle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    pub x: u32,
    pub y: u32,
    pub radius: u32,
    /// Accumulator votes for the centre.
    pub votes: u32,
}

/// Detection parameters. The defaults mirror the classic gradient Hough
/// settings: 20 px between centres, Canny high threshold 50, 30 votes, and an
/// unbounded radius range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HoughCircleParams {
    /// Minimum distance between detected centres.
    pub min_distance: f32,
    /// Upper Canny threshold; the lower one is half of it.
    pub canny_high: f32,
    /// Votes a centre needs, and edge pixels a radius needs.
    pub vote_threshold: u32,
    pub min_radius: u32,
    /// `0` means bounded only by the image size. Values past the image
    /// diagonal are clamped to it.
    pub max_radius: u32,
}

impl Default for HoughCircleParams {
    fn default() -> Self {
        Self {
            min_distance: 20.0,
            canny_high: 50.0,
            vote_threshold: 30,
            min_radius: 0,
            max_radius: 0,
        }
    }
}

/// Detects circles in a grayscale image, strongest first.
///
/// # Arguments
///
/// * `image` - Grayscale input; images narrower or shorter than 3 px yield
///   no circles
/// * `params` - Detection settings, see [`HoughCircleParams`]
///
/// # Returns
///
/// Detected circles ordered by accumulator votes, highest first.
///
/// # Examples
///
/// ```rust,no_run
/// use image::open;
/// use quadseg::{detect_circles, draw_circles, HoughCircleParams};
///
/// let image = open("coins.png").unwrap();
/// let params = HoughCircleParams {
///     min_radius: 10,
///     max_radius: 60,
///     ..HoughCircleParams::default()
/// };
/// let circles = detect_circles(&image.to_luma8(), &params);
///
/// let mut overlay = image.to_rgb8();
/// draw_circles(&mut overlay, &circles);
/// overlay.save("coins-circles.png").unwrap();
/// ```
pub fn detect_circles(image: &GrayImage, params: &HoughCircleParams) -> Vec<Circle> {
    let (width, height) = image.dimensions();
    if width < 3 || height < 3 {
        return Vec::new();
    }

    let edges = canny(image, params.canny_high * 0.5, params.canny_high);
    let (gx, gy) = sobel_gradients(image, 3);

    // No circle fitting the frame is larger than its diagonal
    let diagonal = (width as f32).hypot(height as f32).ceil() as u32;
    let min_radius = params.min_radius.max(1);
    let max_radius = if params.max_radius == 0 {
        width.max(height)
    } else {
        params.max_radius.min(diagonal)
    };
    if min_radius > max_radius {
        return Vec::new();
    }

    let edge_points: Vec<(u32, u32, f32, f32)> = edges
        .enumerate_pixels()
        .filter(|(_, _, p)| p[0] > 0)
        .filter_map(|(x, y, _)| {
            let index = (y * width + x) as usize;
            let (dx, dy) = (gx[index], gy[index]);
            let norm = dx.hypot(dy);
            (norm > 0.0).then(|| (x, y, dx / norm, dy / norm))
        })
        .collect();

    debug!("hough edge points: {}", edge_points.len());

    // Parallel voting into a shared accumulator
    let accumulator: Vec<AtomicU32> = (0..width as usize * height as usize)
        .map(|_| AtomicU32::new(0))
        .collect();

    edge_points.par_iter().for_each(|&(x, y, cos, sin)| {
        for sign in [-1.0f32, 1.0] {
            for r in min_radius..=max_radius {
                let cx = (x as f32 + sign * r as f32 * cos).round();
                let cy = (y as f32 + sign * r as f32 * sin).round();
                if cx < 0.0 || cy < 0.0 || cx >= width as f32 || cy >= height as f32 {
                    break;
                }
                accumulator[cy as usize * width as usize + cx as usize]
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    });

    let votes: Vec<u32> = accumulator.into_iter().map(AtomicU32::into_inner).collect();
    let mut centers = local_maxima(&votes, width, height, params.vote_threshold);
    centers.sort_by(|a, b| b.2.cmp(&a.2));

    debug!("hough candidate centres: {}", centers.len());

    let min_distance_sq = params.min_distance * params.min_distance;
    let mut circles: Vec<Circle> = Vec::new();
    for (cx, cy, center_votes) in centers {
        let too_close = circles.iter().any(|c| {
            let dx = c.x as f32 - cx as f32;
            let dy = c.y as f32 - cy as f32;
            dx * dx + dy * dy < min_distance_sq
        });
        if too_close {
            continue;
        }

        if let Some(radius) = best_radius(
            &edge_points,
            (cx, cy),
            min_radius,
            max_radius,
            params.vote_threshold,
        ) {
            circles.push(Circle {
                x: cx,
                y: cy,
                radius,
                votes: center_votes,
            });
        }
    }

    circles
}

/// Accumulator cells above `threshold` that are not beaten by a neighbour.
/// Ties resolve to the first cell in raster order.
fn local_maxima(votes: &[u32], width: u32, height: u32, threshold: u32) -> Vec<(u32, u32, u32)> {
    let (w, h) = (width as usize, height as usize);
    (1..h - 1)
        .into_par_iter()
        .flat_map_iter(|y| {
            (1..w - 1).filter_map(move |x| {
                let v = votes[y * w + x];
                let peak = v > threshold
                    && v > votes[y * w + x - 1]
                    && v >= votes[y * w + x + 1]
                    && v > votes[(y - 1) * w + x]
                    && v >= votes[(y + 1) * w + x];
                peak.then_some((x as u32, y as u32, v))
            })
        })
        .collect()
}

/// Radius with the most supporting edge pixels, if it has at least
/// `min_support` of them.
fn best_radius(
    edge_points: &[(u32, u32, f32, f32)],
    center: (u32, u32),
    min_radius: u32,
    max_radius: u32,
    min_support: u32,
) -> Option<u32> {
    let mut histogram = vec![0u32; (max_radius - min_radius + 1) as usize];
    for &(x, y, _, _) in edge_points {
        let dx = x as f32 - center.0 as f32;
        let dy = y as f32 - center.1 as f32;
        let r = dx.hypot(dy).round() as u32;
        if (min_radius..=max_radius).contains(&r) {
            histogram[(r - min_radius) as usize] += 1;
        }
    }

    let (offset, support) = histogram
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))?;
    (*support >= min_support).then_some(min_radius + offset as u32)
}

/// Draws each circle outline (2 px) in green and its centre in red.
pub fn draw_circles(canvas: &mut RgbImage, circles: &[Circle]) {
    for circle in circles {
        let center = (circle.x as i32, circle.y as i32);
        let radius = circle.radius as i32;
        draw_hollow_circle_mut(canvas, center, radius, CIRCLE_COLOR);
        draw_hollow_circle_mut(canvas, center, radius + 1, CIRCLE_COLOR);
        draw_filled_circle_mut(canvas, center, 2, CENTER_COLOR);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn disk(size: u32, center: (i32, i32), radius: i32) -> GrayImage {
        let mut image = GrayImage::new(size, size);
        draw_filled_circle_mut(&mut image, center, radius, Luma([255u8]));
        image
    }

    #[test]
    fn test_detects_single_disk() {
        let image = disk(100, (50, 50), 20);
        let circles = detect_circles(&image, &HoughCircleParams::default());

        assert!(!circles.is_empty());
        let best = circles[0];
        assert!(best.x.abs_diff(50) <= 2, "{best:?}");
        assert!(best.y.abs_diff(50) <= 2, "{best:?}");
        assert!(best.radius.abs_diff(20) <= 2, "{best:?}");
    }

    #[test]
    fn test_flat_image_has_no_circles() {
        let image = GrayImage::from_pixel(64, 64, Luma([128]));
        assert!(detect_circles(&image, &HoughCircleParams::default()).is_empty());
    }

    #[test]
    fn test_tiny_image_is_ignored() {
        let image = GrayImage::new(2, 2);
        assert!(detect_circles(&image, &HoughCircleParams::default()).is_empty());
    }

    #[test]
    fn test_oversized_max_radius_is_clamped() {
        let image = disk(100, (50, 50), 20);
        let bounded = detect_circles(&image, &HoughCircleParams::default());
        let params = HoughCircleParams {
            max_radius: u32::MAX,
            ..HoughCircleParams::default()
        };
        let unbounded = detect_circles(&image, &params);
        assert_eq!(unbounded.len(), bounded.len());
        assert!(unbounded[0].radius.abs_diff(20) <= 2, "{:?}", unbounded[0]);

        let tiny = GrayImage::from_pixel(10, 10, Luma([50]));
        assert!(detect_circles(&tiny, &params).is_empty());
    }

    #[test]
    fn test_best_radius_picks_mode() {
        let points = vec![
            (10, 0, 0.0, 0.0),
            (0, 10, 0.0, 0.0),
            (10, 10, 0.0, 0.0),
            (3, 0, 0.0, 0.0),
        ];
        assert_eq!(best_radius(&points, (0, 0), 1, 20, 2), Some(10));
        assert_eq!(best_radius(&points, (0, 0), 1, 20, 3), None);
    }

    #[test]
    fn test_draw_circles_marks_outline_and_center() {
        let mut canvas = RgbImage::new(40, 40);
        let circle = Circle {
            x: 20,
            y: 20,
            radius: 10,
            votes: 50,
        };
        draw_circles(&mut canvas, &[circle]);
        assert_eq!(*canvas.get_pixel(30, 20), CIRCLE_COLOR);
        assert_eq!(*canvas.get_pixel(20, 20), CENTER_COLOR);
        assert_eq!(*canvas.get_pixel(0, 0), Rgb([0, 0, 0]));
    }
}
