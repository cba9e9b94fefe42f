//! The fixed catalog of operations a front end can apply to an image.
//!
//! Every operation takes the untouched original and returns a new image; none
//! of them accumulate on a previous result.

use std::{fmt, str::FromStr};

use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use rayon::prelude::*;

use crate::{
    error::{ProcessingError, Result},
    filters::{self, GrayImageF32},
    hough::{detect_circles, draw_circles, HoughCircleParams},
    segment::{SegmentConfig, Segmenter},
};

/// Smallest accepted kernel size.
pub const MIN_KERNEL_SIZE: u32 = 1;
/// Largest accepted kernel size.
pub const MAX_KERNEL_SIZE: u32 = 20;
pub const DEFAULT_KERNEL_SIZE: u32 = 5;
pub const DEFAULT_BINARY_THRESHOLD: u8 = 128;

/// Catalog entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    LowPass,
    HighPass,
    Mean,
    Median,
    Roberts,
    Prewitt,
    Sobel,
    Erode,
    Dilate,
    Open,
    Close,
    HoughCircles,
    SplitAndMerge,
    Threshold,
}

impl Operation {
    /// Every operation, in the order a front end lists them.
    pub const ALL: [Operation; 14] = [
        Operation::LowPass,
        Operation::HighPass,
        Operation::Mean,
        Operation::Median,
        Operation::Roberts,
        Operation::Prewitt,
        Operation::Sobel,
        Operation::Erode,
        Operation::Dilate,
        Operation::Open,
        Operation::Close,
        Operation::HoughCircles,
        Operation::SplitAndMerge,
        Operation::Threshold,
    ];

    /// Machine name, as accepted by [`FromStr`].
    pub const fn name(self) -> &'static str {
        match self {
            Operation::LowPass => "low-pass",
            Operation::HighPass => "high-pass",
            Operation::Mean => "mean",
            Operation::Median => "median",
            Operation::Roberts => "roberts",
            Operation::Prewitt => "prewitt",
            Operation::Sobel => "sobel",
            Operation::Erode => "erode",
            Operation::Dilate => "dilate",
            Operation::Open => "open",
            Operation::Close => "close",
            Operation::HoughCircles => "hough-circles",
            Operation::SplitAndMerge => "split-and-merge",
            Operation::Threshold => "threshold",
        }
    }

    /// Human readable label.
    pub const fn label(self) -> &'static str {
        match self {
            Operation::LowPass => "Low Pass Filter",
            Operation::HighPass => "High-Pass Filter",
            Operation::Mean => "Mean Filter",
            Operation::Median => "Median Filter",
            Operation::Roberts => "Roberts Edge",
            Operation::Prewitt => "Prewitt Edge",
            Operation::Sobel => "Sobel Edge",
            Operation::Erode => "Erosion",
            Operation::Dilate => "Dilation",
            Operation::Open => "Opening",
            Operation::Close => "Closing",
            Operation::HoughCircles => "Hough Circle",
            Operation::SplitAndMerge => "Region Split and Merge",
            Operation::Threshold => "Thresholding",
        }
    }

    /// One-line description, suitable for a tooltip.
    pub const fn description(self) -> &'static str {
        match self {
            Operation::LowPass => "Applies a Gaussian blur to the image",
            Operation::HighPass => "Highlights edges and fine details in the image",
            Operation::Mean => "Blurs the image to reduce noise and detail",
            Operation::Median => "Removes salt-and-pepper noise from the image",
            Operation::Roberts => "Detects edges using Roberts operator",
            Operation::Prewitt => "Detects edges using Prewitt operator",
            Operation::Sobel => "Detects edges using Sobel operator",
            Operation::Erode => "Erodes boundaries of foreground objects",
            Operation::Dilate => "Expands boundaries of foreground objects",
            Operation::Open => "Erosion followed by dilation, useful for removing noise",
            Operation::Close => "Dilation followed by erosion, useful for closing gaps",
            Operation::HoughCircles => "Detects circles in the image",
            Operation::SplitAndMerge => "Segments the image into regions",
            Operation::Threshold => "Converts image to binary based on intensity threshold",
        }
    }

    /// Whether the kernel size parameter changes the result.
    pub const fn uses_kernel_size(self) -> bool {
        matches!(
            self,
            Operation::LowPass
                | Operation::HighPass
                | Operation::Mean
                | Operation::Median
                | Operation::Sobel
                | Operation::Erode
                | Operation::Dilate
                | Operation::Open
                | Operation::Close
        )
    }

    /// Whether the binary threshold parameter changes the result.
    pub const fn uses_threshold(self) -> bool {
        matches!(self, Operation::Threshold)
    }

    /// Applies the operation to `image`, returning a new image.
    ///
    /// Filters that work per channel keep colour input in colour (alpha is
    /// dropped); high-pass, thresholding and segmentation produce grayscale,
    /// Hough circles produce an RGB overlay.
    ///
    /// # Arguments
    ///
    /// * `image` - Source image, never modified
    /// * `params` - Kernel size, binary threshold, segmenter and Hough settings;
    ///   each operation reads only the fields it needs
    ///
    /// # Returns
    ///
    /// The processed image, or [`ProcessingError::InvalidInput`] when either
    /// dimension of `image` is zero.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use image::{DynamicImage, GrayImage, Luma};
    /// use quadseg::{Operation, OperationParams};
    ///
    /// let image = DynamicImage::ImageLuma8(GrayImage::from_fn(8, 8, |x, _| {
    ///     Luma([if x < 4 { 10 } else { 200 }])
    /// }));
    /// let params = OperationParams::default().with_threshold(100);
    ///
    /// let binary = Operation::Threshold.apply(&image, &params).unwrap().to_luma8();
    /// assert_eq!(binary.get_pixel(0, 0)[0], 0);
    /// assert_eq!(binary.get_pixel(7, 0)[0], 255);
    /// ```
    pub fn apply(self, image: &DynamicImage, params: &OperationParams) -> Result<DynamicImage> {
        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return Err(ProcessingError::InvalidInput(format!(
                "degenerate dimensions {width}x{height}"
            )));
        }
        debug!("apply {} to {}x{}", self.name(), width, height);

        let k = params.kernel_size;
        let output = match self {
            Operation::LowPass => per_channel(image, |c| filters::low_pass(c, k)),
            Operation::HighPass => gray(filters::high_pass(&image.to_luma8(), k)),
            Operation::Mean => per_channel(image, |c| filters::mean(c, k)),
            Operation::Median => per_channel(image, |c| filters::median(c, k)),
            Operation::Roberts => per_channel(image, filters::roberts),
            Operation::Prewitt => per_channel(image, filters::prewitt),
            Operation::Sobel => sobel(image, k),
            Operation::Erode => per_channel(image, |c| filters::erode(c, k)),
            Operation::Dilate => per_channel(image, |c| filters::dilate(c, k)),
            Operation::Open => per_channel(image, |c| filters::open(c, k)),
            Operation::Close => per_channel(image, |c| filters::close(c, k)),
            Operation::HoughCircles => {
                let circles = detect_circles(&image.to_luma8(), &params.hough);
                debug!("detected {} circles", circles.len());
                let mut canvas = image.to_rgb8();
                draw_circles(&mut canvas, &circles);
                DynamicImage::ImageRgb8(canvas)
            }
            Operation::SplitAndMerge => {
                let config = params.segment.with_leaf_collection(false);
                let segmentation =
                    Segmenter::with_config(config).segment_parallel(&image.to_luma8())?;
                gray(segmentation.image)
            }
            Operation::Threshold => {
                gray(filters::threshold_binary(&image.to_luma8(), params.threshold))
            }
        };
        Ok(output)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = ProcessingError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        Operation::ALL
            .into_iter()
            .find(|op| op.name() == wanted)
            .ok_or_else(|| ProcessingError::UnknownOperation(s.to_string()))
    }
}

/// Parameters shared by the catalog.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OperationParams {
    kernel_size: u32,
    pub threshold: u8,
    pub segment: SegmentConfig,
    pub hough: HoughCircleParams,
}

impl Default for OperationParams {
    fn default() -> Self {
        Self {
            kernel_size: DEFAULT_KERNEL_SIZE,
            threshold: DEFAULT_BINARY_THRESHOLD,
            segment: SegmentConfig::default(),
            hough: HoughCircleParams::default(),
        }
    }
}

impl OperationParams {
    /// Parameters with the given kernel size, which must lie in `1..=20`.
    pub fn new(kernel_size: u32) -> Result<Self> {
        Self::default().with_kernel_size(kernel_size)
    }

    /// Replaces the kernel size; fails with [`ProcessingError::Configuration`]
    /// outside `1..=20`.
    pub fn with_kernel_size(mut self, kernel_size: u32) -> Result<Self> {
        if !(MIN_KERNEL_SIZE..=MAX_KERNEL_SIZE).contains(&kernel_size) {
            return Err(ProcessingError::Configuration(format!(
                "kernel size must be in {MIN_KERNEL_SIZE}..={MAX_KERNEL_SIZE}, got {kernel_size}"
            )));
        }
        self.kernel_size = kernel_size;
        Ok(self)
    }

    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_segment(mut self, segment: SegmentConfig) -> Self {
        self.segment = segment;
        self
    }

    pub fn with_hough(mut self, hough: HoughCircleParams) -> Self {
        self.hough = hough;
        self
    }

    pub fn kernel_size(&self) -> u32 {
        self.kernel_size
    }
}

fn gray(image: GrayImage) -> DynamicImage {
    DynamicImage::ImageLuma8(image)
}

fn split_channels(rgb: &RgbImage) -> Vec<GrayImage> {
    (0..3)
        .map(|channel| {
            GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
                Luma([rgb.get_pixel(x, y)[channel]])
            })
        })
        .collect()
}

fn join_channels(planes: &[GrayImage]) -> RgbImage {
    RgbImage::from_fn(planes[0].width(), planes[0].height(), |x, y| {
        Rgb([
            planes[0].get_pixel(x, y)[0],
            planes[1].get_pixel(x, y)[0],
            planes[2].get_pixel(x, y)[0],
        ])
    })
}

fn is_gray(image: &DynamicImage) -> bool {
    matches!(
        image,
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageLumaA8(_)
    )
}

/// Runs a single-channel filter on a gray image directly, or on each colour
/// channel in parallel.
fn per_channel<F>(image: &DynamicImage, filter: F) -> DynamicImage
where
    F: Fn(&GrayImage) -> GrayImage + Sync,
{
    if is_gray(image) {
        return gray(filter(&image.to_luma8()));
    }

    let planes = split_channels(&image.to_rgb8());
    let filtered: Vec<GrayImage> = planes.par_iter().map(|plane| filter(plane)).collect();
    DynamicImage::ImageRgb8(join_channels(&filtered))
}

/// Sobel magnitude per channel, normalised over all channels together.
fn sobel(image: &DynamicImage, kernel_size: u32) -> DynamicImage {
    if is_gray(image) {
        let magnitude = filters::sobel_magnitude(&image.to_luma8(), kernel_size);
        return gray(filters::normalize_min_max(&magnitude));
    }

    let planes = split_channels(&image.to_rgb8());
    let magnitudes: Vec<GrayImageF32> = planes
        .par_iter()
        .map(|plane| filters::sobel_magnitude(plane, kernel_size))
        .collect();

    let (min, max) = magnitudes
        .iter()
        .map(|m| filters::min_max(m.as_raw()))
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), (a, b)| {
            (lo.min(a), hi.max(b))
        });

    let normalized: Vec<GrayImage> = magnitudes
        .iter()
        .map(|m| filters::normalize_with(m, min, max))
        .collect();
    DynamicImage::ImageRgb8(join_channels(&normalized))
}
