use super::run_pipeline;
use crate::cli::{parse_shape, SyntheticArgs};
use crate::exit_codes;
use crate::output;
use rtwl_rs::synthetics::spiral_stations;
use rtwl_rs::{
    make_synthetic_data, GridPoint, HomogeneousProvider, LocationPeak, PipelineStats,
    RegularGrid, RtwlConfig, SyntheticConfig,
};
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
struct SyntheticOutput {
    source_index: usize,
    source: GridPoint,
    origin_time: f64,
    peak: Option<LocationPeak>,
    /// Located minus true origin time (s)
    time_error: Option<f64>,
    /// Distance from the located point to the true source (km)
    location_error: Option<f64>,
    windows: usize,
    stats: PipelineStats,
}

fn build_config(args: &SyntheticArgs) -> Result<RtwlConfig, String> {
    let mut config = match &args.config {
        Some(path) => RtwlConfig::from_json_file(path)
            .map_err(|e| format!("Failed to load config '{}': {}", path, e))?,
        None => {
            let mut config = RtwlConfig::offline(args.dt);
            config.safety_margin = args.safety_margin;
            config.number_of_regions = args.regions;
            config
        }
    };
    // synthetic traces are replayed as fast as possible
    config.offline_mode = true;
    config.validate().map_err(|e| format!("Invalid configuration: {}", e))?;
    Ok(config)
}

pub async fn execute(args: SyntheticArgs) -> i32 {
    let shape = match parse_shape(&args.shape) {
        Ok(shape) => shape,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return exit_codes::INPUT_ERROR;
        }
    };
    if args.stations < 3 {
        eprintln!("Error: at least 3 stations are needed to locate a source");
        return exit_codes::INPUT_ERROR;
    }

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return exit_codes::INPUT_ERROR;
        }
    };

    let provider = match RegularGrid::new(GridPoint::default(), args.spacing, shape).and_then(
        |grid| HomogeneousProvider::new(grid, spiral_stations(&grid, args.stations), args.velocity),
    ) {
        Ok(provider) => provider,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };

    let source_index = args.source.unwrap_or_else(|| provider.grid().centre_index());
    let synthetic = SyntheticConfig {
        dt: config.dt,
        npts: args.npts,
        origin_offset: args.origin_offset,
        pulse_width: args.pulse_width,
        chunks: args.chunks,
        start: args.start,
    };
    let event = match make_synthetic_data(&provider, source_index, &synthetic) {
        Ok(event) => event,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };

    log::info!(
        "Synthetic source at point {} ({:.1}, {:.1}, {:.1}), {} stations, {} rounds",
        event.source_index,
        event.source.x,
        event.source.y,
        event.source.z,
        event.traces.len(),
        synthetic.chunks
    );

    let rounds = event.rounds(synthetic.chunks);
    let run = match run_pipeline(config, Arc::new(provider), rounds).await {
        Ok(run) => run,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    };

    let peak = run.peak();
    let result = SyntheticOutput {
        source_index: event.source_index,
        source: event.source,
        origin_time: event.origin_time,
        time_error: peak.map(|p| p.time - event.origin_time),
        location_error: peak.map(|p| GridPoint::new(p.x, p.y, p.z).distance(&event.source)),
        peak,
        windows: run.windows.len(),
        stats: run.stats,
    };

    if args.json {
        if !output::emit(&result, args.compact, args.output.as_deref()) {
            return exit_codes::EXECUTION_ERROR;
        }
    } else {
        let text = match &result.peak {
            Some(p) => format!(
                "Located peak: t = {:.2} s (error {:+.2} s), amplitude {:.3}, \
                 point {} at ({:.2}, {:.2}, {:.2}), {:.2} km from the source",
                p.time,
                result.time_error.unwrap_or_default(),
                p.amplitude,
                p.point,
                p.x,
                p.y,
                p.z,
                result.location_error.unwrap_or_default()
            ),
            None => "No window located".to_string(),
        };
        if let Err(e) = output::write_output(&text, args.output.as_deref()) {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    }

    if result.peak.is_some() {
        exit_codes::SUCCESS
    } else {
        exit_codes::NO_LOCATION
    }
}
