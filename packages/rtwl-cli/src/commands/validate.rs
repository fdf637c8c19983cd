use crate::cli::ValidateArgs;
use crate::exit_codes;
use crate::output;
use rtwl_rs::{JsonFileProvider, RtwlConfig, TravelTimeProvider, TravelTimeSnapshot};
use serde::Serialize;

#[derive(Serialize)]
struct ValidateOutput {
    config: String,
    config_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    ttimes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ttimes_valid: Option<bool>,
    stations: Option<usize>,
    points: Option<usize>,
    regions: Option<usize>,
    error: Option<String>,
}

pub fn execute(args: ValidateArgs) -> i32 {
    let mut result = ValidateOutput {
        config: args.config.clone(),
        config_valid: false,
        ttimes: args.ttimes.clone(),
        ttimes_valid: None,
        stations: None,
        points: None,
        regions: None,
        error: None,
    };

    match RtwlConfig::from_json_file(&args.config) {
        Ok(config) => {
            result.config_valid = true;
            if let Some(path) = &args.ttimes {
                let loaded = JsonFileProvider::new(path).load().and_then(|table| {
                    TravelTimeSnapshot::build(0, table, config.dt, config.number_of_regions)
                });
                match loaded {
                    Ok(snapshot) => {
                        result.ttimes_valid = Some(true);
                        result.stations = Some(snapshot.nsta());
                        result.points = Some(snapshot.npts());
                        result.regions = Some(snapshot.partition.len());
                    }
                    Err(e) => {
                        result.ttimes_valid = Some(false);
                        result.error = Some(format!("Invalid travel times '{}': {}", path, e));
                    }
                }
            }
        }
        Err(e) => {
            result.error = Some(format!("Invalid config '{}': {}", args.config, e));
        }
    }

    if args.json {
        if !output::emit(&result, false, None) {
            return exit_codes::EXECUTION_ERROR;
        }
    } else if let Some(err) = &result.error {
        eprintln!("Error: {}", err);
    } else {
        match (result.stations, result.points) {
            (Some(stations), Some(points)) => println!(
                "Config '{}' is valid; travel times: {} stations x {} points",
                args.config, stations, points
            ),
            _ => println!("Config '{}' is valid", args.config),
        }
    }

    if result.error.is_some() {
        exit_codes::INPUT_ERROR
    } else {
        exit_codes::SUCCESS
    }
}
