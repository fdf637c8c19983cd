use super::run_pipeline;
use crate::cli::RunArgs;
use crate::exit_codes;
use crate::output;
use rtwl_rs::streaming::read_chunks_jsonl;
use rtwl_rs::{JsonFileProvider, LocationPeak, LocationWindow, PipelineStats, RtwlConfig};
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
struct RunOutput {
    peak: Option<LocationPeak>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    windows: Vec<LocationWindow>,
    stats: PipelineStats,
}

pub async fn execute(args: RunArgs) -> i32 {
    let config = match RtwlConfig::from_json_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: Failed to load config '{}': {}", args.config, e);
            return exit_codes::INPUT_ERROR;
        }
    };

    let chunks = match read_chunks_jsonl(&args.input) {
        Ok(chunks) => chunks,
        Err(e) => {
            eprintln!("Error: Failed to read chunks from '{}': {}", args.input, e);
            return exit_codes::INPUT_ERROR;
        }
    };
    log::info!("Replaying {} chunks from {}", chunks.len(), args.input);

    // one chunk per round: file order is arrival order
    let rounds = chunks.into_iter().map(|c| vec![c]).collect();
    let provider = Arc::new(JsonFileProvider::new(&args.ttimes));

    let run = match run_pipeline(config, provider, rounds).await {
        Ok(run) => run,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    };

    let result = RunOutput {
        peak: run.peak(),
        windows: if args.peak_only { Vec::new() } else { run.windows },
        stats: run.stats,
    };
    if !output::emit(&result, args.compact, args.output.as_deref()) {
        return exit_codes::EXECUTION_ERROR;
    }

    if result.peak.is_some() {
        exit_codes::SUCCESS
    } else {
        exit_codes::NO_LOCATION
    }
}
