use std::time::Instant;

use env_logger::Builder;
use image::open;
use log::info;
use quadseg::{RegionFill, SegmentConfig, Segmenter};

fn main() {
    Builder::from_default_env().format_timestamp_nanos().init();

    let img = open("test_image/input.png").unwrap().to_luma8();
    info!("Loading image: {}x{}", img.width(), img.height());

    let config = SegmentConfig::new(10.0, 2)
        .unwrap()
        .with_fill(RegionFill::Mean);
    let segmenter = Segmenter::with_config(config);

    let instance = Instant::now();
    let result = segmenter.segment_parallel(&img).unwrap();
    let elapsed = instance.elapsed();

    info!("Segmentation took {elapsed:?}");
    info!(
        "{} splits, {} leaf regions, max depth {}",
        result.stats.splits, result.stats.leaves, result.stats.max_depth
    );

    result.image.save("test_image/segmented.png").unwrap();
}
