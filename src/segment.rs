//! Recursive region split-and-merge segmentation.
//!
//! A region is tested against a [`HomogeneityPredicate`]; if it is not
//! homogeneous it is quadrisected and each quadrant is processed the same way.
//! The leaves of this implicit quadtree tile the input exactly and are painted
//! back into an output buffer of the same shape.
//!
//! By default ([`RegionFill::Preserve`]) a homogeneous region keeps its own
//! samples, so the output equals the input sample for sample. Use
//! [`RegionFill::Mean`] to replace every leaf with its mean intensity instead.
//!
//! The sequential traversal runs on an explicit work stack, so very large
//! inputs cannot exhaust the call stack. The parallel traversal hands the four
//! quadrants of large regions to rayon and drops back to the work stack below
//! [`SegmentConfig::parallel_cutoff`].

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use image::{imageops, GenericImage, GrayImage};

use crate::{
    buffer::ensure_non_empty,
    error::{ProcessingError, Result},
};

/// Standard deviation cutoff used by the reference predicate.
pub const DEFAULT_THRESHOLD: f64 = 10.0;
/// Regions whose smaller side is below this are never split.
pub const DEFAULT_MIN_EXTENT: u32 = 2;
/// Regions with at most this many samples are traversed sequentially.
pub const DEFAULT_PARALLEL_CUTOFF: u32 = 128 * 128;

/// A rectangle inside a parent buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    /// A `width` x `height` rectangle whose top-left corner is `(x, y)`.
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The region covering the whole image.
    pub fn full(image: &GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(0, 0, width, height)
    }

    /// Number of samples covered.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Splits the region into `[top_left, top_right, bottom_left, bottom_right]`.
    ///
    /// The first half along each axis gets the floor of half the extent and
    /// the second half gets the remainder, so for a 7 wide, 5 high region the
    /// quadrants are 3x2, 4x2, 3x3 and 4x3 (width x height).
    ///
    /// ```text
    /// +--------+----------+
    /// |   tl   |    tr    |  height / 2
    /// +--------+----------+
    /// |   bl   |    br    |  height - height / 2
    /// +--------+----------+
    ///  width/2  width - width/2
    /// ```
    pub fn quadrants(&self) -> [Region; 4] {
        let top = self.height / 2;
        let left = self.width / 2;
        let bottom = self.height - top;
        let right = self.width - left;

        [
            Region::new(self.x, self.y, left, top),
            Region::new(self.x + left, self.y, right, top),
            Region::new(self.x, self.y + top, left, bottom),
            Region::new(self.x + left, self.y + top, right, bottom),
        ]
    }

    /// Row-major iterator over the samples of this region in `image`.
    ///
    /// The region must lie inside the image.
    pub fn samples<'a>(&self, image: &'a GrayImage) -> impl Iterator<Item = u8> + 'a {
        let Region {
            x,
            y,
            width,
            height,
        } = *self;
        let stride = image.width() as usize;
        let raw: &'a [u8] = image.as_raw();

        (y..y + height).flat_map(move |row| {
            let start = row as usize * stride + x as usize;
            raw[start..start + width as usize].iter().copied()
        })
    }

    fn contains_region(&self, other: &Region) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.x as u64 + other.width as u64 <= self.x as u64 + self.width as u64
            && other.y as u64 + other.height as u64 <= self.y as u64 + self.height as u64
    }
}

/// Mean and population standard deviation of the samples in `region`.
///
/// Returns `(0.0, 0.0)` for an empty region.
pub fn region_mean_std(image: &GrayImage, region: Region) -> (f64, f64) {
    let count = region.area();
    if count == 0 {
        return (0.0, 0.0);
    }
    let n = count as f64;

    let sum: u64 = region.samples(image).map(u64::from).sum();
    let mean = sum as f64 / n;

    let squared: f64 = region
        .samples(image)
        .map(|value| {
            let delta = value as f64 - mean;
            delta * delta
        })
        .sum();

    (mean, (squared / n).sqrt())
}

/// Decides whether a region is flat enough to stop subdividing.
///
/// Any `Fn(&GrayImage, Region) -> bool + Sync` closure is a predicate, which
/// makes ad-hoc criteria easy to plug in:
///
/// ```rust
/// use quadseg::{Region, SegmentConfig, Segmenter};
/// use image::GrayImage;
///
/// let range_below_16 = |image: &GrayImage, region: Region| {
///     let (lo, hi) = region
///         .samples(image)
///         .fold((u8::MAX, u8::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
///     hi - lo < 16
/// };
/// let segmenter = Segmenter::new(SegmentConfig::default(), range_below_16);
/// let output = segmenter.segment(&GrayImage::new(8, 8)).unwrap();
/// assert_eq!(output.stats.splits, 0);
/// ```
pub trait HomogeneityPredicate: Sync {
    fn is_homogeneous(&self, image: &GrayImage, region: Region) -> bool;
}

impl<F> HomogeneityPredicate for F
where
    F: Fn(&GrayImage, Region) -> bool + Sync,
{
    fn is_homogeneous(&self, image: &GrayImage, region: Region) -> bool {
        self(image, region)
    }
}

/// Reference predicate: the population standard deviation of the region is
/// strictly below `threshold`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StdDevPredicate {
    threshold: f64,
}

impl StdDevPredicate {
    /// Fails with [`ProcessingError::Configuration`] unless `threshold` is
    /// finite and positive.
    pub fn new(threshold: f64) -> Result<Self> {
        validate_threshold(threshold)?;
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl Default for StdDevPredicate {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl HomogeneityPredicate for StdDevPredicate {
    fn is_homogeneous(&self, image: &GrayImage, region: Region) -> bool {
        let (_, std_dev) = region_mean_std(image, region);
        std_dev < self.threshold
    }
}

/// What a leaf region contributes to the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegionFill {
    /// Keep the region's own samples.
    #[default]
    Preserve,
    /// Replace every sample with the region's rounded mean.
    Mean,
}

/// Segmenter configuration, validated on construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentConfig {
    threshold: f64,
    min_extent: u32,
    max_depth: Option<u32>,
    fill: RegionFill,
    parallel_cutoff: u32,
    collect_leaves: bool,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            min_extent: DEFAULT_MIN_EXTENT,
            max_depth: None,
            fill: RegionFill::Preserve,
            parallel_cutoff: DEFAULT_PARALLEL_CUTOFF,
            collect_leaves: true,
        }
    }
}

impl SegmentConfig {
    /// Creates a configuration with the given homogeneity threshold and
    /// minimum region extent.
    ///
    /// # Arguments
    ///
    /// * `threshold` - Standard deviation below which a region counts as
    ///   homogeneous; must be finite and positive (typical range: 5.0-30.0)
    /// * `min_extent` - Regions whose smaller side is below this are not
    ///   split; at least 1
    ///
    /// A region is only ever split when both of its sides are at least 2, so
    /// a `min_extent` of 1 behaves like 2.
    ///
    /// # Returns
    ///
    /// The configuration, or [`ProcessingError::Configuration`] for an
    /// out-of-range value.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use quadseg::SegmentConfig;
    ///
    /// let config = SegmentConfig::new(12.5, 4).unwrap();
    /// assert_eq!(config.min_extent(), 4);
    ///
    /// assert!(SegmentConfig::new(-1.0, 2).is_err());
    /// assert!(SegmentConfig::new(10.0, 0).is_err());
    /// ```
    pub fn new(threshold: f64, min_extent: u32) -> Result<Self> {
        validate_threshold(threshold)?;
        if min_extent == 0 {
            return Err(ProcessingError::Configuration(
                "minimum region extent must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            threshold,
            min_extent,
            ..Self::default()
        })
    }

    /// Stops splitting at `depth` levels, the whole image being level 1.
    pub fn with_max_depth(mut self, depth: u32) -> Result<Self> {
        if depth == 0 {
            return Err(ProcessingError::Configuration(
                "maximum depth must be at least 1".to_string(),
            ));
        }
        self.max_depth = Some(depth);
        Ok(self)
    }

    /// Selects what leaf regions contribute to the output image.
    pub fn with_fill(mut self, fill: RegionFill) -> Self {
        self.fill = fill;
        self
    }

    /// Regions of at most `area` samples are traversed on a single thread by
    /// [`Segmenter::segment_parallel`].
    pub fn with_parallel_cutoff(mut self, area: u32) -> Self {
        self.parallel_cutoff = area;
        self
    }

    /// Whether [`Segmentation::leaves`] is populated. Callers that only need
    /// the output image can turn this off to skip building the leaf list.
    pub fn with_leaf_collection(mut self, collect: bool) -> Self {
        self.collect_leaves = collect;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn min_extent(&self) -> u32 {
        self.min_extent
    }

    pub fn max_depth(&self) -> Option<u32> {
        self.max_depth
    }

    pub fn fill(&self) -> RegionFill {
        self.fill
    }

    pub fn parallel_cutoff(&self) -> u32 {
        self.parallel_cutoff
    }

    pub fn collects_leaves(&self) -> bool {
        self.collect_leaves
    }

    /// The reference predicate for this configuration's threshold.
    pub fn predicate(&self) -> StdDevPredicate {
        StdDevPredicate {
            threshold: self.threshold,
        }
    }
}

fn validate_threshold(threshold: f64) -> Result<()> {
    if !threshold.is_finite() || threshold <= 0.0 {
        return Err(ProcessingError::Configuration(format!(
            "homogeneity threshold must be positive and finite, got {threshold}"
        )));
    }
    Ok(())
}

/// Cooperative cancellation flag shared between a caller and a running
/// segmentation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals every clone of this token. A running segmentation stops at
    /// the next region it would visit.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// How a segmentation finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Complete,
    /// Stopped early; regions never visited hold the unmodified input.
    Cancelled,
}

/// Counters collected during a traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentStats {
    /// Number of regions that were quadrisected.
    pub splits: u64,
    /// Number of leaf regions.
    pub leaves: u64,
    /// Deepest level visited, the whole image being level 1.
    pub max_depth: u32,
}

impl SegmentStats {
    fn absorb(&mut self, other: SegmentStats) {
        self.splits += other.splits;
        self.leaves += other.leaves;
        self.max_depth = self.max_depth.max(other.max_depth);
    }
}

/// Output of a segmentation run.
#[derive(Debug, Clone)]
pub struct Segmentation {
    /// Same dimensions as the input.
    pub image: GrayImage,
    /// Leaf regions in traversal order (top-left, top-right, bottom-left,
    /// bottom-right at every level). Empty when leaf collection is disabled
    /// with [`SegmentConfig::with_leaf_collection`].
    pub leaves: Vec<Region>,
    pub stats: SegmentStats,
    pub status: Completion,
}

impl Segmentation {
    /// `true` unless the run was cancelled.
    pub fn is_complete(&self) -> bool {
        self.status == Completion::Complete
    }
}

/// Result of one sequential run, or of one node of the parallel fan-out.
/// The parallel traversal returns these pieces in traversal order and they
/// are only concatenated once, when the output is assembled.
#[derive(Debug, Default)]
struct Traversal {
    leaves: Vec<Region>,
    unvisited: Vec<Region>,
    stats: SegmentStats,
}

/// Region split-and-merge segmenter.
///
/// # Examples
///
/// ```rust
/// use quadseg::{gray_from_rows, Completion, SegmentConfig, Segmenter};
///
/// let image = gray_from_rows(&[
///     [0u8, 0, 255, 255],
///     [0, 0, 255, 255],
///     [255, 255, 255, 255],
///     [255, 255, 255, 255],
/// ])
/// .unwrap();
///
/// let segmenter = Segmenter::with_config(SegmentConfig::new(10.0, 2).unwrap());
/// let result = segmenter.segment(&image).unwrap();
///
/// assert_eq!(result.status, Completion::Complete);
/// assert_eq!(result.stats.splits, 1);
/// assert_eq!(result.image, image);
/// ```
#[derive(Debug, Clone)]
pub struct Segmenter<P = StdDevPredicate> {
    config: SegmentConfig,
    predicate: P,
}

impl Segmenter<StdDevPredicate> {
    /// Segmenter using the standard deviation predicate at the configured
    /// threshold.
    pub fn with_config(config: SegmentConfig) -> Self {
        Self {
            predicate: config.predicate(),
            config,
        }
    }
}

impl Default for Segmenter<StdDevPredicate> {
    fn default() -> Self {
        Self::with_config(SegmentConfig::default())
    }
}

impl<P: HomogeneityPredicate> Segmenter<P> {
    /// Segmenter with a custom predicate. The threshold in `config` is only
    /// used by [`SegmentConfig::predicate`], not by `predicate`.
    pub fn new(config: SegmentConfig, predicate: P) -> Self {
        Self { config, predicate }
    }

    pub fn config(&self) -> &SegmentConfig {
        &self.config
    }

    /// Segments `image` on the calling thread.
    pub fn segment(&self, image: &GrayImage) -> Result<Segmentation> {
        self.segment_with_cancel(image, &CancelToken::new())
    }

    /// Segments `image` on the calling thread, checking `cancel` before every
    /// region.
    ///
    /// # Arguments
    ///
    /// * `image` - Grayscale input with non-zero dimensions
    /// * `cancel` - Token another thread may signal while the run is going on
    ///
    /// # Returns
    ///
    /// A [`Segmentation`] whose image has the input's dimensions. After a
    /// cancellation `status` is [`Completion::Cancelled`] and every region
    /// not yet visited holds the input samples. An empty input fails with
    /// [`ProcessingError::InvalidInput`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// use image::{GrayImage, Luma};
    /// use quadseg::{CancelToken, Completion, Segmenter};
    ///
    /// let image = GrayImage::from_fn(64, 64, |x, y| Luma([(x * y % 256) as u8]));
    /// let cancel = CancelToken::new();
    /// cancel.cancel();
    ///
    /// let result = Segmenter::default()
    ///     .segment_with_cancel(&image, &cancel)
    ///     .unwrap();
    /// assert_eq!(result.status, Completion::Cancelled);
    /// assert_eq!(result.image, image);
    /// ```
    pub fn segment_with_cancel(
        &self,
        image: &GrayImage,
        cancel: &CancelToken,
    ) -> Result<Segmentation> {
        ensure_non_empty(image)?;
        debug!(
            "start segmentation {}x{}",
            image.width(),
            image.height()
        );

        let traversal = self.traverse(image, Region::full(image), 1, cancel);
        Ok(self.finish(image, vec![traversal]))
    }

    /// Segments `image` with the quadrants of large regions processed on the
    /// rayon thread pool.
    ///
    /// Produces the same image, leaves and statistics as [`Segmenter::segment`].
    pub fn segment_parallel(&self, image: &GrayImage) -> Result<Segmentation> {
        self.segment_parallel_with_cancel(image, &CancelToken::new())
    }

    /// Parallel counterpart of [`Segmenter::segment_with_cancel`]. Branches
    /// running when `cancel` is signalled stop at their next region.
    pub fn segment_parallel_with_cancel(
        &self,
        image: &GrayImage,
        cancel: &CancelToken,
    ) -> Result<Segmentation> {
        ensure_non_empty(image)?;
        debug!(
            "start parallel segmentation {}x{}",
            image.width(),
            image.height()
        );

        let pieces = self.traverse_parallel(image, Region::full(image), 1, cancel);
        Ok(self.finish(image, pieces))
    }

    fn is_leaf(&self, image: &GrayImage, region: Region, depth: u32) -> bool {
        region.width < 2
            || region.height < 2
            || region.width.min(region.height) < self.config.min_extent
            || self.config.max_depth.is_some_and(|max| depth >= max)
            || self.predicate.is_homogeneous(image, region)
    }

    /// Pre-order traversal on an explicit stack. Quadrants are pushed in
    /// reverse so they pop as top-left, top-right, bottom-left, bottom-right.
    fn traverse(
        &self,
        image: &GrayImage,
        root: Region,
        root_depth: u32,
        cancel: &CancelToken,
    ) -> Traversal {
        let mut traversal = Traversal::default();
        let mut pending = vec![(root, root_depth)];

        while let Some((region, depth)) = pending.pop() {
            if cancel.is_cancelled() {
                traversal.unvisited.push(region);
                traversal
                    .unvisited
                    .extend(pending.drain(..).rev().map(|(region, _)| region));
                break;
            }

            traversal.stats.max_depth = traversal.stats.max_depth.max(depth);

            if self.is_leaf(image, region, depth) {
                traversal.leaves.push(region);
                traversal.stats.leaves += 1;
                continue;
            }

            traversal.stats.splits += 1;
            pending.extend(
                region
                    .quadrants()
                    .into_iter()
                    .rev()
                    .map(|quadrant| (quadrant, depth + 1)),
            );
        }

        traversal
    }

    fn traverse_parallel(
        &self,
        image: &GrayImage,
        region: Region,
        depth: u32,
        cancel: &CancelToken,
    ) -> Vec<Traversal> {
        if region.area() <= self.config.parallel_cutoff as u64 {
            return vec![self.traverse(image, region, depth, cancel)];
        }

        if cancel.is_cancelled() {
            return vec![Traversal {
                unvisited: vec![region],
                ..Traversal::default()
            }];
        }

        let mut node = Traversal::default();
        node.stats.max_depth = depth;

        if self.is_leaf(image, region, depth) {
            node.leaves.push(region);
            node.stats.leaves = 1;
            return vec![node];
        }

        node.stats.splits = 1;
        let [top_left, top_right, bottom_left, bottom_right] = region.quadrants();
        let ((tl, tr), (bl, br)) = rayon::join(
            || {
                rayon::join(
                    || self.traverse_parallel(image, top_left, depth + 1, cancel),
                    || self.traverse_parallel(image, top_right, depth + 1, cancel),
                )
            },
            || {
                rayon::join(
                    || self.traverse_parallel(image, bottom_left, depth + 1, cancel),
                    || self.traverse_parallel(image, bottom_right, depth + 1, cancel),
                )
            },
        );

        let mut pieces = Vec::with_capacity(1 + tl.len() + tr.len() + bl.len() + br.len());
        pieces.push(node);
        pieces.extend(tl);
        pieces.extend(tr);
        pieces.extend(bl);
        pieces.extend(br);
        pieces
    }

    /// Paints leaves and unvisited regions into a fresh buffer. Together they
    /// tile the input, so every output sample is written exactly once.
    fn finish(&self, image: &GrayImage, pieces: Vec<Traversal>) -> Segmentation {
        let mut output = GrayImage::new(image.width(), image.height());
        let mut stats = SegmentStats::default();
        let mut unvisited = 0usize;

        for piece in &pieces {
            for leaf in &piece.leaves {
                match self.config.fill {
                    RegionFill::Preserve => copy_region(image, &mut output, *leaf),
                    RegionFill::Mean => {
                        let (mean, _) = region_mean_std(image, *leaf);
                        fill_region(&mut output, *leaf, mean.round().clamp(0.0, 255.0) as u8);
                    }
                }
            }
            for region in &piece.unvisited {
                copy_region(image, &mut output, *region);
            }
            unvisited += piece.unvisited.len();
            stats.absorb(piece.stats);
        }

        let status = if unvisited > 0 {
            debug!("segmentation cancelled with {} unvisited regions", unvisited);
            Completion::Cancelled
        } else {
            Completion::Complete
        };

        debug!(
            "segmentation done: splits={} leaves={} max_depth={}",
            stats.splits,
            stats.leaves,
            stats.max_depth
        );

        let leaves = if !self.config.collect_leaves {
            Vec::new()
        } else if pieces.len() == 1 {
            pieces
                .into_iter()
                .next()
                .map(|piece| piece.leaves)
                .unwrap_or_default()
        } else {
            let mut leaves = Vec::with_capacity(stats.leaves as usize);
            for piece in pieces {
                leaves.extend(piece.leaves);
            }
            leaves
        };

        Segmentation {
            image: output,
            leaves,
            stats,
            status,
        }
    }
}

fn copy_region(source: &GrayImage, target: &mut GrayImage, region: Region) {
    let stride = source.width() as usize;
    let width = region.width as usize;
    let source = source.as_raw();
    let target: &mut [u8] = target;

    for row in region.y..region.y + region.height {
        let start = row as usize * stride + region.x as usize;
        target[start..start + width].copy_from_slice(&source[start..start + width]);
    }
}

fn fill_region(target: &mut GrayImage, region: Region, value: u8) {
    let stride = target.width() as usize;
    let width = region.width as usize;
    let target: &mut [u8] = target;

    for row in region.y..region.y + region.height {
        let start = row as usize * stride + region.x as usize;
        target[start..start + width].fill(value);
    }
}

/// Segments `image` with the standard deviation predicate at `threshold` and
/// default settings otherwise.
pub fn segment_image(image: &GrayImage, threshold: f64) -> Result<GrayImage> {
    let config = SegmentConfig::new(threshold, DEFAULT_MIN_EXTENT)?;
    Ok(Segmenter::with_config(config).segment(image)?.image)
}

/// Crops `image` into its four quadrants, in [`Region::quadrants`] order.
///
/// Both sides must be at least 2 so that no quadrant is empty.
pub fn split_quadrants(image: &GrayImage) -> Result<[GrayImage; 4]> {
    let (width, height) = image.dimensions();
    if width < 2 || height < 2 {
        return Err(ProcessingError::InvalidInput(format!(
            "cannot quadrisect a {width}x{height} buffer"
        )));
    }

    Ok(Region::full(image)
        .quadrants()
        .map(|q| imageops::crop_imm(image, q.x, q.y, q.width, q.height).to_image()))
}

/// Reassembles four quadrants: the top pair side by side, the bottom pair
/// side by side, then the two strips stacked.
pub fn merge_quadrants(
    top_left: &GrayImage,
    top_right: &GrayImage,
    bottom_left: &GrayImage,
    bottom_right: &GrayImage,
) -> Result<GrayImage> {
    let top = hstack(top_left, top_right)?;
    let bottom = hstack(bottom_left, bottom_right)?;
    vstack(&top, &bottom)
}

fn hstack(left: &GrayImage, right: &GrayImage) -> Result<GrayImage> {
    if left.height() != right.height() {
        return Err(ProcessingError::InvalidInput(format!(
            "cannot place a {}-row block beside a {}-row block",
            right.height(),
            left.height()
        )));
    }

    let mut out = GrayImage::new(left.width() + right.width(), left.height());
    out.copy_from(left, 0, 0)?;
    out.copy_from(right, left.width(), 0)?;
    Ok(out)
}

fn vstack(top: &GrayImage, bottom: &GrayImage) -> Result<GrayImage> {
    if top.width() != bottom.width() {
        return Err(ProcessingError::InvalidInput(format!(
            "cannot stack a {}-column block under a {}-column block",
            bottom.width(),
            top.width()
        )));
    }

    let mut out = GrayImage::new(top.width(), top.height() + bottom.height());
    out.copy_from(top, 0, 0)?;
    out.copy_from(bottom, 0, top.height())?;
    Ok(out)
}

/// Checks that `leaves` tile `bounds` without gap or overlap.
pub fn leaves_tile(bounds: Region, leaves: &[Region]) -> bool {
    let covered: u64 = leaves.iter().map(Region::area).sum();
    if covered != bounds.area() || !leaves.iter().all(|leaf| bounds.contains_region(leaf)) {
        return false;
    }

    let mut seen = vec![false; bounds.area() as usize];
    for leaf in leaves {
        for row in leaf.y..leaf.y + leaf.height {
            for col in leaf.x..leaf.x + leaf.width {
                let index =
                    (row - bounds.y) as usize * bounds.width as usize + (col - bounds.x) as usize;
                if seen[index] {
                    return false;
                }
                seen[index] = true;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::gray_from_rows;
    use image::{ImageBuffer, Luma};

    fn ramp(width: u32, height: u32) -> GrayImage {
        ImageBuffer::from_fn(width, height, |x, y| Luma([((x * 37 + y * 91) % 256) as u8]))
    }

    fn depth_bound(image: &GrayImage) -> u32 {
        let min = image.width().min(image.height());
        // ceil(log2(min)) + 1
        (u32::BITS - (min - 1).leading_zeros()) + 1
    }

    #[test]
    fn test_quadrants_floor_then_remainder() {
        let [tl, tr, bl, br] = Region::new(0, 0, 7, 5).quadrants();
        assert_eq!(tl, Region::new(0, 0, 3, 2));
        assert_eq!(tr, Region::new(3, 0, 4, 2));
        assert_eq!(bl, Region::new(0, 2, 3, 3));
        assert_eq!(br, Region::new(3, 2, 4, 3));
        assert!(leaves_tile(Region::new(0, 0, 7, 5), &[tl, tr, bl, br]));
    }

    #[test]
    fn test_quadrants_keep_parent_offset() {
        let quadrants = Region::new(10, 4, 3, 3).quadrants();
        assert_eq!(quadrants[0], Region::new(10, 4, 1, 1));
        assert_eq!(quadrants[3], Region::new(11, 5, 2, 2));
    }

    #[test]
    fn test_region_samples_row_major() {
        let image = gray_from_rows(&[[1u8, 2, 3], [4, 5, 6], [7, 8, 9]]).unwrap();
        let samples: Vec<u8> = Region::new(1, 1, 2, 2).samples(&image).collect();
        assert_eq!(samples, vec![5, 6, 8, 9]);
    }

    #[test]
    fn test_mean_std_is_population() {
        let image = gray_from_rows(&[[0u8, 10], [0, 10]]).unwrap();
        let (mean, std_dev) = region_mean_std(&image, Region::full(&image));
        assert!((mean - 5.0).abs() < 1e-9);
        assert!((std_dev - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_config_validation() {
        assert!(SegmentConfig::new(0.0, 2).is_err());
        assert!(SegmentConfig::new(-3.0, 2).is_err());
        assert!(SegmentConfig::new(f64::NAN, 2).is_err());
        assert!(SegmentConfig::new(10.0, 0).is_err());
        assert!(SegmentConfig::default().with_max_depth(0).is_err());
        assert!(StdDevPredicate::new(f64::INFINITY).is_err());

        let config = SegmentConfig::new(4.5, 3).unwrap();
        assert_eq!(config.threshold(), 4.5);
        assert_eq!(config.min_extent(), 3);
        assert_eq!(config.fill(), RegionFill::Preserve);
    }

    #[test]
    fn test_flat_input_is_not_split() {
        let image = GrayImage::from_pixel(4, 4, Luma([100]));
        let result = Segmenter::default().segment(&image).unwrap();
        assert_eq!(result.image, image);
        assert_eq!(result.stats.splits, 0);
        assert_eq!(result.stats.leaves, 1);
        assert_eq!(result.stats.max_depth, 1);
    }

    #[test]
    fn test_block_pattern_splits_once() {
        let image = ImageBuffer::from_fn(4, 4, |x, y| Luma([if x < 2 && y < 2 { 0 } else { 255 }]));
        let result = Segmenter::default().segment(&image).unwrap();
        assert_eq!(result.image, image);
        assert_eq!(result.stats.splits, 1);
        assert_eq!(result.stats.leaves, 4);
        assert_eq!(result.leaves, Region::full(&image).quadrants().to_vec());
    }

    #[test]
    fn test_two_by_two_splits_to_single_pixels() {
        let image = gray_from_rows(&[[0u8, 255], [255, 0]]).unwrap();
        let segmenter = Segmenter::with_config(SegmentConfig::new(1.0, 2).unwrap());
        let result = segmenter.segment(&image).unwrap();
        assert_eq!(result.image, image);
        assert_eq!(result.stats.splits, 1);
        assert_eq!(result.stats.leaves, 4);
        assert!(result.leaves.iter().all(|leaf| leaf.area() == 1));
    }

    #[test]
    fn test_single_row_is_a_leaf() {
        let image = gray_from_rows(&[[0u8, 255, 0, 255, 0]]).unwrap();
        let result = Segmenter::default().segment(&image).unwrap();
        assert_eq!(result.image, image);
        assert_eq!(result.stats.splits, 0);
    }

    #[test]
    fn test_min_extent_stops_early() {
        let image = ramp(8, 8);
        let segmenter = Segmenter::with_config(SegmentConfig::new(0.5, 8).unwrap());
        let result = segmenter.segment(&image).unwrap();
        assert_eq!(result.stats.splits, 1);
        assert!(result.leaves.iter().all(|leaf| leaf.width == 4));
    }

    #[test]
    fn test_max_depth_bounds_tree() {
        let image = ramp(32, 32);
        let config = SegmentConfig::new(0.5, 2).unwrap().with_max_depth(3).unwrap();
        let result = Segmenter::with_config(config).segment(&image).unwrap();
        assert_eq!(result.stats.max_depth, 3);
        assert_eq!(result.stats.leaves, 16);
        assert_eq!(result.image, image);
    }

    #[test]
    fn test_shape_and_depth_bound_on_odd_sizes() {
        for (width, height) in [(1, 1), (1, 9), (5, 7), (7, 5), (13, 3), (31, 17), (64, 33)] {
            let image = ramp(width, height);
            let segmenter = Segmenter::with_config(SegmentConfig::new(1.0, 2).unwrap());
            let result = segmenter.segment(&image).unwrap();
            assert_eq!(result.image.dimensions(), (width, height));
            assert_eq!(result.image, image);
            assert!(result.stats.max_depth <= depth_bound(&image));
            assert!(leaves_tile(Region::full(&image), &result.leaves));
        }
    }

    #[test]
    fn test_mean_fill_paints_leaf_means() {
        let image = gray_from_rows(&[
            [10u8, 12, 200, 200],
            [14, 16, 200, 200],
            [50, 50, 90, 92],
            [50, 50, 94, 96],
        ])
        .unwrap();
        let config = SegmentConfig::new(5.0, 2).unwrap().with_fill(RegionFill::Mean);
        let result = Segmenter::with_config(config).segment(&image).unwrap();

        let expected = gray_from_rows(&[
            [13u8, 13, 200, 200],
            [13, 13, 200, 200],
            [50, 50, 93, 93],
            [50, 50, 93, 93],
        ])
        .unwrap();
        assert_eq!(result.stats.splits, 1);
        assert_eq!(result.image, expected);
    }

    #[test]
    fn test_closure_predicate() {
        let image = ramp(16, 16);
        let never = |_: &GrayImage, _: Region| false;
        let result = Segmenter::new(SegmentConfig::default(), never)
            .segment(&image)
            .unwrap();
        assert_eq!(result.stats.leaves, 256);
        assert_eq!(result.stats.splits, 1 + 4 + 16 + 64);
        assert_eq!(result.stats.max_depth, 5);
    }

    #[test]
    fn test_cancelled_before_start_returns_input() {
        let image = ramp(16, 16);
        let cancel = CancelToken::new();
        cancel.cancel();

        let config = SegmentConfig::default().with_fill(RegionFill::Mean);
        let result = Segmenter::with_config(config)
            .segment_with_cancel(&image, &cancel)
            .unwrap();
        assert_eq!(result.status, Completion::Cancelled);
        assert!(!result.is_complete());
        assert_eq!(result.image, image);
        assert!(result.leaves.is_empty());
    }

    #[test]
    fn test_cancel_mid_traversal_keeps_shape() {
        let image = ramp(32, 32);
        let cancel = CancelToken::new();
        let seen = std::sync::atomic::AtomicUsize::new(0);
        let predicate = |_: &GrayImage, _: Region| {
            if seen.fetch_add(1, Ordering::Relaxed) == 10 {
                cancel.cancel();
            }
            false
        };
        let config = SegmentConfig::default().with_fill(RegionFill::Mean);
        let segmenter = Segmenter::new(config, predicate);

        let result = segmenter.segment_with_cancel(&image, &cancel).unwrap();
        assert_eq!(result.status, Completion::Cancelled);
        assert_eq!(result.image.dimensions(), (32, 32));
        // 1x1 leaves painted with their mean are the samples themselves
        assert_eq!(result.image, image);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let image = ImageBuffer::from_fn(97, 61, |x, y| {
            Luma([if (x / 13 + y / 11) % 2 == 0 { 30 } else { 220 }])
        });
        let config = SegmentConfig::new(10.0, 2)
            .unwrap()
            .with_fill(RegionFill::Mean)
            .with_parallel_cutoff(64);
        let segmenter = Segmenter::with_config(config);

        let sequential = segmenter.segment(&image).unwrap();
        let parallel = segmenter.segment_parallel(&image).unwrap();
        assert_eq!(parallel.image, sequential.image);
        assert_eq!(parallel.leaves, sequential.leaves);
        assert_eq!(parallel.stats, sequential.stats);
        assert!(parallel.is_complete());
    }

    #[test]
    fn test_leaf_collection_can_be_disabled() {
        let image = ramp(48, 40);
        let config = SegmentConfig::new(20.0, 2)
            .unwrap()
            .with_fill(RegionFill::Mean)
            .with_parallel_cutoff(64);
        let collected = Segmenter::with_config(config).segment_parallel(&image).unwrap();
        let skipped = Segmenter::with_config(config.with_leaf_collection(false))
            .segment_parallel(&image)
            .unwrap();

        assert!(leaves_tile(Region::full(&image), &collected.leaves));
        assert_eq!(collected.leaves.len() as u64, collected.stats.leaves);
        assert!(skipped.leaves.is_empty());
        assert_eq!(skipped.image, collected.image);
        assert_eq!(skipped.stats, collected.stats);
    }

    #[test]
    fn test_parallel_cancelled_returns_input() {
        let image = ramp(64, 64);
        let cancel = CancelToken::new();
        cancel.cancel();
        let config = SegmentConfig::default().with_parallel_cutoff(16);
        let result = Segmenter::with_config(config)
            .segment_parallel_with_cancel(&image, &cancel)
            .unwrap();
        assert_eq!(result.status, Completion::Cancelled);
        assert_eq!(result.image, image);
    }

    #[test]
    fn test_empty_input_rejected() {
        let image = GrayImage::new(0, 0);
        assert!(matches!(
            Segmenter::default().segment(&image),
            Err(ProcessingError::InvalidInput(_))
        ));
        assert!(Segmenter::default().segment_parallel(&image).is_err());
    }

    #[test]
    fn test_split_and_merge_odd_dimensions() {
        let image = ramp(7, 5);
        let [tl, tr, bl, br] = split_quadrants(&image).unwrap();
        assert_eq!(tl.dimensions(), (3, 2));
        assert_eq!(tr.dimensions(), (4, 2));
        assert_eq!(bl.dimensions(), (3, 3));
        assert_eq!(br.dimensions(), (4, 3));

        let merged = merge_quadrants(&tl, &tr, &bl, &br).unwrap();
        assert_eq!(merged, image);
    }

    #[test]
    fn test_split_rejects_thin_input() {
        assert!(split_quadrants(&ramp(1, 4)).is_err());
        assert!(split_quadrants(&ramp(4, 1)).is_err());
    }

    #[test]
    fn test_merge_rejects_mismatched_quadrants() {
        let a = GrayImage::new(2, 2);
        let b = GrayImage::new(2, 3);
        assert!(merge_quadrants(&a, &b, &a, &a).is_err());
        assert!(merge_quadrants(&a, &a, &GrayImage::new(3, 2), &a).is_err());
    }

    #[test]
    fn test_segment_image_helper() {
        let image = ramp(9, 9);
        assert_eq!(segment_image(&image, 10.0).unwrap(), image);
        assert!(segment_image(&image, 0.0).is_err());
    }

    #[test]
    fn test_leaves_tile_detects_overlap_and_gap() {
        let bounds = Region::new(0, 0, 2, 2);
        let overlap = [
            Region::new(0, 0, 2, 1),
            Region::new(0, 0, 1, 1),
            Region::new(1, 1, 1, 1),
        ];
        assert!(!leaves_tile(bounds, &overlap));
        assert!(!leaves_tile(bounds, &[Region::new(0, 0, 2, 1)]));
        assert!(leaves_tile(bounds, &[Region::new(0, 0, 2, 1), Region::new(0, 1, 2, 1)]));
    }
}
