//! # Region Split-and-Merge Segmentation Library
//!
//! This crate provides a recursive quadtree split-and-merge segmenter for
//! grayscale images, together with the fixed catalog of classical operations an
//! interactive image tool offers next to it (blurs, edge detectors, morphology,
//! thresholding and Hough circle detection).
//!
//! ## Features
//!
//! - Split-and-merge segmentation with a pluggable homogeneity predicate
//! - Stack-safe sequential traversal and a rayon-parallel traversal
//! - Cooperative cancellation that still returns a full-size result
//! - Gaussian, box and median blurs, high-pass filter
//! - Roberts, Prewitt and Sobel edge detectors
//! - Grayscale erosion, dilation, opening and closing
//! - Gradient Hough circle detection with overlay drawing
//! - Optional debug logging (enable with `logger` feature)
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use image::open;
//! use quadseg::{SegmentConfig, Segmenter};
//!
//! let image = open("example.png").unwrap().to_luma8();
//! let segmenter = Segmenter::with_config(SegmentConfig::new(10.0, 2).unwrap());
//! let result = segmenter.segment(&image).unwrap();
//!
//! println!(
//!     "{} splits, {} leaf regions, depth {}",
//!     result.stats.splits, result.stats.leaves, result.stats.max_depth
//! );
//! result.image.save("segmented.png").unwrap();
//! ```
//!
//! ## Mosaic Output
//!
//! By default every homogeneous region keeps its own samples, so the output
//! is identical to the input and the useful product is the list of leaf
//! regions. Switch to [`RegionFill::Mean`] for a flat-region mosaic:
//!
//! ```rust,no_run
//! use image::open;
//! use quadseg::{RegionFill, SegmentConfig, Segmenter};
//!
//! let image = open("example.png").unwrap().to_luma8();
//! let config = SegmentConfig::new(8.0, 2).unwrap().with_fill(RegionFill::Mean);
//! let mosaic = Segmenter::with_config(config).segment_parallel(&image).unwrap();
//! mosaic.image.save("mosaic.png").unwrap();
//! ```
//!
//! ## Operation Catalog
//!
//! ```rust,no_run
//! use quadseg::{Operation, OperationParams, Workspace};
//!
//! let mut workspace = Workspace::open("photo.jpg").unwrap();
//! let params = OperationParams::new(7).unwrap();
//!
//! workspace.apply(Operation::Median, &params).unwrap();
//! workspace.save(workspace.default_output_name()).unwrap();
//! ```
//!
//! ## Optional Features
//!
//! ### Logger Feature
//!
//! ```toml
//! [dependencies]
//! quadseg = { version = "0.1.0", features = ["logger"] }
//! log = "0.4"
//! env_logger = "0.11"
//! ```
//!
//! With the feature enabled the segmenter reports progress through `log`:
//!
//! ```text
//! DEBUG quadseg::segment: start parallel segmentation 640x480
//! DEBUG quadseg::segment: segmentation done: splits=1365 leaves=4096 max_depth=7
//! ```

// Conditional logging macros
#[cfg(feature = "logger")]
macro_rules! debug {
    ($($arg:tt)*) => {
        log::debug!($($arg)*);
    };
}

#[cfg(not(feature = "logger"))]
macro_rules! debug {
    ($($arg:tt)*) => {};
}

pub mod buffer;
pub mod error;
pub mod filters;
pub mod hough;
pub mod operation;
pub mod segment;
pub mod workspace;

pub use buffer::{gray_from_raw, gray_from_rows};
pub use error::{ProcessingError, Result};
pub use hough::{detect_circles, draw_circles, Circle, HoughCircleParams};
pub use operation::{Operation, OperationParams};
pub use segment::{
    merge_quadrants, region_mean_std, segment_image, split_quadrants, CancelToken, Completion,
    HomogeneityPredicate, Region, RegionFill, SegmentConfig, SegmentStats, Segmentation,
    Segmenter, StdDevPredicate,
};
pub use workspace::Workspace;

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn test_logger_feature_compilation() {
        // The debug! macro must expand with and without the logger feature
        let image = GrayImage::from_pixel(10, 10, Luma([128u8]));
        debug!("Test debug message");

        let result = Segmenter::default().segment(&image).unwrap();
        assert_eq!(result.image.dimensions(), (10, 10));
    }

    #[test]
    fn test_debug_macro_no_panic() {
        debug!("Starting test");
        debug!("Processing data: {}", 42);
        debug!("Test completed successfully");
    }
}
