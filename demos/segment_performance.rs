use std::time::Duration;

use env_logger::Builder;
use image::{GrayImage, ImageBuffer, Luma};
use log::info;
use quadseg::{SegmentConfig, Segmenter};

fn main() {
    Builder::from_default_env().format_timestamp_nanos().init();

    // Synthetic 4K frame: flat tiles with a noisy band so the tree is uneven
    let image: GrayImage = ImageBuffer::from_fn(3840, 2160, |x, y| {
        let tile = ((x / 240 + y / 135) % 2) as u8 * 160 + 40;
        if (1000..1200).contains(&y) {
            Luma([tile.wrapping_add(((x * 7919 + y * 104729) % 61) as u8)])
        } else {
            Luma([tile])
        }
    });

    let segmenter = Segmenter::with_config(SegmentConfig::new(10.0, 2).unwrap());

    let runs = 5;
    let mut sequential_times = Vec::new();
    let mut parallel_times = Vec::new();

    for i in 0..runs {
        info!("Run {}/{}", i + 1, runs);

        let start = std::time::Instant::now();
        let sequential = segmenter.segment(&image).unwrap();
        sequential_times.push(start.elapsed());

        let start = std::time::Instant::now();
        let parallel = segmenter.segment_parallel(&image).unwrap();
        parallel_times.push(start.elapsed());

        info!(
            "  Sequential: {:?}, Parallel: {:?}, leaves: {}",
            sequential_times[i],
            parallel_times[i],
            parallel.stats.leaves
        );
        assert_eq!(sequential.stats, parallel.stats);
    }

    let avg_sequential = sequential_times.iter().sum::<Duration>() / runs as u32;
    let avg_parallel = parallel_times.iter().sum::<Duration>() / runs as u32;

    info!("=== Performance Summary ===");
    info!("Average Sequential Time: {:?}", avg_sequential);
    info!("Average Parallel Time: {:?}", avg_parallel);
    info!(
        "Average Speedup: {:.2}x",
        avg_sequential.as_secs_f64() / avg_parallel.as_secs_f64()
    );
}
