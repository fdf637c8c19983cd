use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "rtwl",
    version,
    about = "Real-time waveform migration and seismic event location",
    long_about = "Stack station waveforms along travel times onto a 3D grid and track the\n\
                  point and time of maximum stacked energy, as data streams in."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Locate a synthetic event in a uniform-velocity medium (offline mode)
    Synthetic(SyntheticArgs),
    /// Replay JSON-lines chunks through the pipeline
    Run(RunArgs),
    /// Validate configuration and travel-time files
    Validate(ValidateArgs),
}

#[derive(Args)]
pub struct SyntheticArgs {
    /// Number of stations
    #[arg(long, default_value_t = 5)]
    pub stations: usize,

    /// Grid nodes along x, y and z
    #[arg(long, num_args = 3, default_values_t = vec![5, 5, 3])]
    pub shape: Vec<usize>,

    /// Grid spacing (km)
    #[arg(long, default_value_t = 2.0)]
    pub spacing: f64,

    /// Medium velocity (km/s)
    #[arg(long, default_value_t = 5.0)]
    pub velocity: f64,

    /// Source grid index (default: grid centre)
    #[arg(long)]
    pub source: Option<usize>,

    /// Sample interval (s)
    #[arg(long, default_value_t = 0.01)]
    pub dt: f64,

    /// Samples per synthetic trace
    #[arg(long, default_value_t = 12_000)]
    pub npts: usize,

    /// Origin time after the trace start (s)
    #[arg(long, default_value_t = 50.0)]
    pub origin_offset: f64,

    /// Pulse standard deviation (s)
    #[arg(long, default_value_t = 0.2)]
    pub pulse_width: f64,

    /// Delivery rounds per trace
    #[arg(long, default_value_t = 3)]
    pub chunks: usize,

    /// Trace start, seconds since the epoch (default: now)
    #[arg(long)]
    pub start: Option<f64>,

    /// Safety margin (s)
    #[arg(long, default_value_t = 10.0)]
    pub safety_margin: f64,

    /// Number of region workers
    #[arg(long, default_value_t = 2)]
    pub regions: usize,

    /// Engine configuration file; grid and synthetic options still apply
    #[arg(long, env = "RTWL_CONFIG")]
    pub config: Option<String>,

    /// Output file (default: stdout)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Compact JSON output (no indentation)
    #[arg(long, default_value_t = false)]
    pub compact: bool,
}

#[derive(Args)]
pub struct RunArgs {
    /// Engine configuration (JSON)
    #[arg(long, env = "RTWL_CONFIG")]
    pub config: String,

    /// Travel-time table (JSON)
    #[arg(long, env = "RTWL_TTIMES")]
    pub ttimes: String,

    /// Chunks to replay, one JSON object per line
    #[arg(long)]
    pub input: String,

    /// Output file (default: stdout)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Compact JSON output (no indentation)
    #[arg(long, default_value_t = false)]
    pub compact: bool,

    /// Only report the strongest peak, not every window
    #[arg(long, default_value_t = false)]
    pub peak_only: bool,
}

#[derive(Args)]
pub struct ValidateArgs {
    /// Engine configuration (JSON)
    #[arg(long)]
    pub config: String,

    /// Travel-time table (JSON)
    #[arg(long)]
    pub ttimes: Option<String>,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

/// Split `[nx, ny, nz]` from the repeated `--shape` values
pub fn parse_shape(values: &[usize]) -> Result<[usize; 3], String> {
    match values {
        [nx, ny, nz] if *nx > 0 && *ny > 0 && *nz > 0 => Ok([*nx, *ny, *nz]),
        [_, _, _] => Err(format!("Grid shape {:?} has an empty axis", values)),
        _ => Err(format!(
            "Grid shape needs exactly 3 values, got {}",
            values.len()
        )),
    }
}
