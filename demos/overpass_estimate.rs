//! Estimate city parameters from the live Overpass API.
//!
//! Run with: cargo run --example overpass_estimate --features http -- "<city>" [cache-dir]

use std::time::Instant;

use street_coverage::{
    EstimatorConfig, JsonFileParameterStore, MemoryParameterStore, OverpassSource,
    ParameterEstimator, ParameterStore,
};

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let city = args.first().cloned().unwrap_or_else(|| "Cambridge".to_string());

    let source = match OverpassSource::new() {
        Ok(source) => source,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    let estimator = ParameterEstimator::with_config(source, EstimatorConfig::default());

    let mut store: Box<dyn ParameterStore> = match args.get(1) {
        Some(dir) => Box::new(JsonFileParameterStore::new(dir)),
        None => Box::new(MemoryParameterStore::new()),
    };

    println!("Estimating parameters for {} via {}\n", city, estimator.source().endpoint());
    let start = Instant::now();
    match estimator.parameters_for(&city, store.as_mut(), false) {
        Ok(params) => {
            println!("Done in {:.1?}", start.elapsed());
            println!("  max_walking_speed: {} m/s", params.max_walking_speed);
            println!("  min_walking_speed: {} m/s", params.min_walking_speed);
            println!("  buffer_distance:   {} m", params.buffer_distance);
            println!("  max_sinuosity:     {}", params.max_sinuosity);
            println!("  max_direct_dist:   {} m", params.max_direct_distance);
            match params.bbox {
                Some(b) => println!(
                    "  bbox:              [{:.4}, {:.4}, {:.4}, {:.4}]",
                    b.min_lng, b.min_lat, b.max_lng, b.max_lat
                ),
                None => println!("  bbox:              none"),
            }
        }
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}
