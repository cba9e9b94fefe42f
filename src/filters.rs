//! Single-channel filters behind the operation catalog.
//!
//! Blur, median and morphology delegate to `imageproc`. The derivative
//! operators (Roberts, Prewitt, Sobel) use a row-parallel correlation with
//! reflect-101 borders so that arbitrary Sobel apertures and 2x2 kernels are
//! available.

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::{
    filter::{box_filter, gaussian_blur_f32, median_filter},
    morphology::{grayscale_close, grayscale_dilate, grayscale_erode, grayscale_open, Mask},
};
use rayon::prelude::*;

/// Single-channel `f32` buffer used for gradient magnitudes.
pub type GrayImageF32 = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Largest Sobel aperture.
pub const MAX_SOBEL_APERTURE: u32 = 31;

/// Roberts cross, diagonal kernel
const ROBERTS_X: [i32; 4] = [1, 0, 0, -1];
/// Roberts cross, anti-diagonal kernel
const ROBERTS_Y: [i32; 4] = [0, 1, -1, 0];
/// Prewitt horizontal derivative
const PREWITT_X: [i32; 9] = [-1, 0, 1, -1, 0, 1, -1, 0, 1];
/// Prewitt vertical derivative
const PREWITT_Y: [i32; 9] = [-1, -1, -1, 0, 0, 0, 1, 1, 1];

/// Rounds an even kernel size up to the next odd one.
pub fn odd_kernel(kernel_size: u32) -> u32 {
    if kernel_size % 2 == 1 {
        kernel_size
    } else {
        kernel_size + 1
    }
}

/// Gaussian sigma derived from a kernel size, `0.3 * ((k - 1) / 2 - 1) + 0.8`.
pub fn gaussian_sigma(kernel_size: u32) -> f32 {
    0.3 * ((kernel_size as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Gaussian blur with an odd kernel derived from `kernel_size`.
pub fn low_pass(image: &GrayImage, kernel_size: u32) -> GrayImage {
    gaussian_blur_f32(image, gaussian_sigma(odd_kernel(kernel_size)))
}

/// The image minus its Gaussian blur, saturating at zero.
pub fn high_pass(image: &GrayImage, kernel_size: u32) -> GrayImage {
    let blurred = low_pass(image, kernel_size);
    let mut out = image.clone();
    out.par_iter_mut()
        .zip(blurred.par_iter())
        .for_each(|(value, blur)| *value = value.saturating_sub(*blur));
    out
}

/// Box (mean) filter over a `kernel_size` square.
pub fn mean(image: &GrayImage, kernel_size: u32) -> GrayImage {
    let radius = kernel_size / 2;
    box_filter(image, radius, radius)
}

/// Median filter over an odd square derived from `kernel_size`.
pub fn median(image: &GrayImage, kernel_size: u32) -> GrayImage {
    let radius = odd_kernel(kernel_size) / 2;
    median_filter(image, radius, radius)
}

fn square_mask(kernel_size: u32) -> Mask {
    Mask::square((kernel_size / 2).min(u8::MAX as u32) as u8)
}

/// Grayscale erosion (local minimum) with a square structuring element.
pub fn erode(image: &GrayImage, kernel_size: u32) -> GrayImage {
    grayscale_erode(image, &square_mask(kernel_size))
}

/// Grayscale dilation (local maximum) with a square structuring element.
pub fn dilate(image: &GrayImage, kernel_size: u32) -> GrayImage {
    grayscale_dilate(image, &square_mask(kernel_size))
}

/// Erosion followed by dilation.
pub fn open(image: &GrayImage, kernel_size: u32) -> GrayImage {
    grayscale_open(image, &square_mask(kernel_size))
}

/// Dilation followed by erosion.
pub fn close(image: &GrayImage, kernel_size: u32) -> GrayImage {
    grayscale_close(image, &square_mask(kernel_size))
}

/// Binary threshold: samples strictly above `threshold` become 255, the rest 0.
pub fn threshold_binary(image: &GrayImage, threshold: u8) -> GrayImage {
    let mut out = image.clone();
    out.par_iter_mut()
        .for_each(|value| *value = if *value > threshold { u8::MAX } else { 0 });
    out
}

/// Roberts cross edge response.
///
/// Each diagonal response is saturated to `0..=255` before the two are
/// averaged.
pub fn roberts(image: &GrayImage) -> GrayImage {
    let gx = correlate_saturating(image, &ROBERTS_X, 2, 2);
    let gy = correlate_saturating(image, &ROBERTS_Y, 2, 2);
    average(&gx, &gy)
}

/// Prewitt edge response, combined like [`roberts`].
pub fn prewitt(image: &GrayImage) -> GrayImage {
    let gx = correlate_saturating(image, &PREWITT_X, 3, 3);
    let gy = correlate_saturating(image, &PREWITT_Y, 3, 3);
    average(&gx, &gy)
}

/// Sobel gradient magnitude `sqrt(gx^2 + gy^2)` for an aperture derived from
/// `kernel_size` (forced odd, clamped to `3..=31`).
pub fn sobel_magnitude(image: &GrayImage, kernel_size: u32) -> GrayImageF32 {
    let (gx, gy) = sobel_gradients(image, kernel_size);
    let magnitude: Vec<f32> = gx
        .par_iter()
        .zip(gy.par_iter())
        .map(|(x, y)| x.hypot(*y))
        .collect();
    ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
        Luma([magnitude[(y * image.width() + x) as usize]])
    })
}

/// Computes horizontal and vertical Sobel derivatives.
///
/// The aperture is `kernel_size` forced odd and clamped to `3..=31`. Both
/// results are row-major with one value per pixel.
///
/// # Sobel Operators (aperture 3)
///
/// Horizontal (Gx):
/// ```text
/// [-1  0  1]
/// [-2  0  2]
/// [-1  0  1]
/// ```
///
/// Vertical (Gy):
/// ```text
/// [-1 -2 -1]
/// [ 0  0  0]
/// [ 1  2  1]
/// ```
///
/// Larger apertures use binomial smoothing of order `k - 1` and a derivative
/// built from the binomial of order `k - 2`.
pub fn sobel_gradients(image: &GrayImage, kernel_size: u32) -> (Vec<f32>, Vec<f32>) {
    let aperture = odd_kernel(kernel_size).clamp(3, MAX_SOBEL_APERTURE) as usize;
    let (smooth, derivative) = sobel_kernels(aperture);
    let (width, height) = image.dimensions();
    let samples: Vec<f32> = image.as_raw().iter().map(|v| *v as f32).collect();

    let (gx, gy) = rayon::join(
        || separable(&samples, width, height, &derivative, &smooth),
        || separable(&samples, width, height, &smooth, &derivative),
    );
    (gx, gy)
}

/// Maps the full range of `values` onto `0..=255`. A constant input maps to 0.
///
/// # Examples
///
/// ```rust
/// use image::{ImageBuffer, Luma};
/// use quadseg::filters::{normalize_min_max, GrayImageF32};
///
/// let values: GrayImageF32 = ImageBuffer::from_fn(3, 1, |x, _| Luma([x as f32 * 0.5]));
/// let scaled = normalize_min_max(&values);
/// assert_eq!(scaled.as_raw(), &vec![0, 128, 255]);
/// ```
pub fn normalize_min_max(values: &GrayImageF32) -> GrayImage {
    let (min, max) = min_max(values.as_raw());
    normalize_with(values, min, max)
}

/// Smallest and largest value of a slice, `(0.0, 0.0)` when empty.
pub fn min_max(values: &[f32]) -> (f32, f32) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    values
        .par_iter()
        .fold(
            || (f32::INFINITY, f32::NEG_INFINITY),
            |(lo, hi), v| (lo.min(*v), hi.max(*v)),
        )
        .reduce(
            || (f32::INFINITY, f32::NEG_INFINITY),
            |(a, b), (c, d)| (a.min(c), b.max(d)),
        )
}

/// Maps `min..=max` onto `0..=255`.
pub fn normalize_with(values: &GrayImageF32, min: f32, max: f32) -> GrayImage {
    let range = max - min;
    let data: Vec<u8> = values
        .as_raw()
        .par_iter()
        .map(|v| {
            if range > 0.0 {
                ((v - min) / range * 255.0).round().clamp(0.0, 255.0) as u8
            } else {
                0
            }
        })
        .collect();
    ImageBuffer::from_fn(values.width(), values.height(), |x, y| {
        Luma([data[(y * values.width() + x) as usize]])
    })
}

/// Binomial coefficients of `(1 + x)^order`.
fn binomial(order: usize) -> Vec<f32> {
    let mut row = vec![1.0f32];
    for _ in 0..order {
        let mut next = vec![1.0f32; row.len() + 1];
        for i in 1..row.len() {
            next[i] = row[i - 1] + row[i];
        }
        row = next;
    }
    row
}

/// Smoothing and derivative kernels of an odd Sobel aperture.
fn sobel_kernels(aperture: usize) -> (Vec<f32>, Vec<f32>) {
    let smooth = binomial(aperture - 1);
    let base = binomial(aperture - 2);
    let derivative = (0..aperture)
        .map(|i| {
            let left = if i > 0 { base[i - 1] } else { 0.0 };
            let right = base.get(i).copied().unwrap_or(0.0);
            left - right
        })
        .collect();
    (smooth, derivative)
}

/// Reflect-101 border index (`dcb|abcd|cba`).
fn reflect_101(index: i64, len: usize) -> usize {
    let len = len as i64;
    if len == 1 {
        return 0;
    }
    let mut i = index;
    loop {
        if i < 0 {
            i = -i;
        } else if i >= len {
            i = 2 * len - 2 - i;
        } else {
            return i as usize;
        }
    }
}

/// Correlates rows with `row_kernel`, then columns with `col_kernel`. Both
/// kernels are centred.
fn separable(
    samples: &[f32],
    width: u32,
    height: u32,
    row_kernel: &[f32],
    col_kernel: &[f32],
) -> Vec<f32> {
    let (width, height) = (width as usize, height as usize);
    if width == 0 || height == 0 {
        return Vec::new();
    }
    let row_anchor = (row_kernel.len() / 2) as i64;
    let col_anchor = (col_kernel.len() / 2) as i64;

    let mut horizontal = vec![0.0f32; width * height];
    horizontal
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, out_row)| {
            let row = &samples[y * width..(y + 1) * width];
            for (x, out) in out_row.iter_mut().enumerate() {
                *out = row_kernel
                    .iter()
                    .enumerate()
                    .map(|(k, weight)| {
                        weight * row[reflect_101(x as i64 + k as i64 - row_anchor, width)]
                    })
                    .sum();
            }
        });

    let mut out = vec![0.0f32; width * height];
    out.par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, out_row)| {
            for (x, value) in out_row.iter_mut().enumerate() {
                *value = col_kernel
                    .iter()
                    .enumerate()
                    .map(|(k, weight)| {
                        let source = reflect_101(y as i64 + k as i64 - col_anchor, height);
                        weight * horizontal[source * width + x]
                    })
                    .sum();
            }
        });
    out
}

/// 2-D correlation with an integer kernel anchored at its centre, saturated
/// to `u8`.
fn correlate_saturating(
    image: &GrayImage,
    kernel: &[i32],
    kernel_width: usize,
    kernel_height: usize,
) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return GrayImage::new(width, height);
    }
    let (w, h) = (width as usize, height as usize);
    let anchor_x = (kernel_width / 2) as i64;
    let anchor_y = (kernel_height / 2) as i64;
    let pixels = image.as_raw();

    let mut out = GrayImage::new(width, height);
    out.par_chunks_mut(w).enumerate().for_each(|(y, out_row)| {
        for (x, value) in out_row.iter_mut().enumerate() {
            let mut sum = 0i32;
            for ky in 0..kernel_height {
                let sy = reflect_101(y as i64 + ky as i64 - anchor_y, h);
                for kx in 0..kernel_width {
                    let sx = reflect_101(x as i64 + kx as i64 - anchor_x, w);
                    sum += kernel[ky * kernel_width + kx] * pixels[sy * w + sx] as i32;
                }
            }
            *value = sum.clamp(0, u8::MAX as i32) as u8;
        }
    });
    out
}

/// Per-sample `(a + b) / 2`, rounded half up.
fn average(a: &GrayImage, b: &GrayImage) -> GrayImage {
    let mut out = a.clone();
    out.par_iter_mut()
        .zip(b.par_iter())
        .for_each(|(left, right)| *left = ((*left as u16 + *right as u16 + 1) / 2) as u8);
    out
}
