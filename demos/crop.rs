use std::env;
use std::path::Path;
use std::time::Duration;

use shiguredo_mp4_crop::crop::{CropOptions, crop_file};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 4 {
        eprintln!("Usage: {} <input_mp4> <output_mp4> <duration_ms>", args[0]);
        std::process::exit(1);
    }

    let input = Path::new(&args[1]);
    if !input.exists() {
        eprintln!("Error: Could not open file '{}'", input.display());
        std::process::exit(1);
    }
    let Ok(duration_ms) = args[3].parse::<u64>() else {
        eprintln!("Error: Invalid duration '{}'", args[3]);
        std::process::exit(1);
    };

    let options = CropOptions::with_duration(Duration::from_millis(duration_ms));
    let report = match crop_file(input, &args[2], options) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: Failed to crop: {e}");
            let mut source = std::error::Error::source(&e);
            while let Some(s) = source {
                eprintln!("  caused by: {s}");
                source = s.source();
            }
            std::process::exit(1);
        }
    };

    println!(
        "Cropped to {} ms (reference track {}, {} samples)",
        report.duration.as_millis(),
        report.reference_track_id,
        report.terminal_sample
    );
    for track in &report.tracks {
        println!(
            "  Track {}: {} / {} samples, {} chunk(s)",
            track.track_id,
            track.sample_count,
            track.original_sample_count,
            track.chunk_count()
        );
    }
    println!(
        "Media data: {} bytes copied in {} range(s)",
        report.media_data_size, report.range_count
    );
}
