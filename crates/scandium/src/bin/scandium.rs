//! scandium CLI: configuration tooling, autopilot profiles and simulation.

use clap::{Args, Parser, Subcommand};
use scandium::config::LandingConfig;
use scandium::params::Autopilot;
use scandium::sim::{run_simulation, DescentProfile, SimulationOptions};
use std::path::{Path, PathBuf};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "scandium")]
#[command(about = "Vision-based precision landing: LANDING_TARGET output for MAVLink autopilots")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error, off).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the default configuration, or write it to a file.
    Config {
        /// Destination JSON file.
        #[arg(long)]
        write: Option<PathBuf>,
    },

    /// Check a configuration file and report every problem found.
    Validate {
        /// Configuration JSON file.
        path: PathBuf,
    },

    /// Print the autopilot parameters precision landing expects.
    Params {
        #[arg(value_enum)]
        autopilot: Autopilot,

        /// Emit JSON instead of NAME,VALUE lines.
        #[arg(long)]
        json: bool,
    },

    /// Fly a synthetic approach through the full pipeline.
    Simulate(SimulateArgs),
}

#[derive(Debug, Clone, Args)]
struct SimulateArgs {
    /// Configuration JSON file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Maximum number of ticks.
    #[arg(long, default_value = "400")]
    ticks: u64,

    /// Starting altitude above the marker, meters.
    #[arg(long, default_value = "2.0")]
    altitude: f64,

    /// Initial forward offset of the marker, meters.
    #[arg(long, default_value = "0.0")]
    offset_x: f64,

    /// Initial right offset of the marker, meters.
    #[arg(long, default_value = "0.0")]
    offset_y: f64,

    /// Descent rate once centered, m/s.
    #[arg(long, default_value = "0.5")]
    descent_rate: f64,

    /// Fixed landability score instead of the configured scorer.
    #[arg(long)]
    landability: Option<f64>,

    /// Marker id in the scene.
    #[arg(long, default_value = "1")]
    tag: u32,

    /// Silence the simulated autopilot from this tick on.
    #[arg(long)]
    drop_link_at: Option<u64>,

    /// Print the summary as JSON.
    #[arg(long)]
    json: bool,
}

fn init_logging(level: &str) -> CliResult<()> {
    let filter = scandium::core::parse_level(level)
        .ok_or_else(|| format!("unknown log level '{level}'"))?;
    #[cfg(feature = "tracing")]
    {
        let _ = filter;
        scandium::init_tracing(false, level);
    }
    #[cfg(not(feature = "tracing"))]
    {
        // RUST_LOG, when set, refines the configured level per module
        env_logger::Builder::new()
            .filter_level(filter)
            .parse_default_env()
            .format_timestamp_millis()
            .try_init()?;
    }
    Ok(())
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    match cli.command {
        Commands::Config { write } => run_config(write),
        Commands::Validate { path } => run_validate(&path),
        Commands::Params { autopilot, json } => run_params(autopilot, json),
        Commands::Simulate(args) => run_simulate(&args),
    }
}

// ── config ────────────────────────────────────────────────────────────

fn run_config(out: Option<PathBuf>) -> CliResult<()> {
    let cfg = LandingConfig::default();
    match out {
        Some(path) => {
            cfg.write_json(&path)?;
            log::info!("default configuration written to {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&cfg)?),
    }
    Ok(())
}

// ── validate ──────────────────────────────────────────────────────────

fn run_validate(path: &Path) -> CliResult<()> {
    let cfg = LandingConfig::load_json(path)?;
    cfg.validate()?;
    println!("{}: ok", path.display());
    Ok(())
}

// ── params ────────────────────────────────────────────────────────────

fn run_params(autopilot: Autopilot, json: bool) -> CliResult<()> {
    let profile = autopilot.profile();
    if json {
        println!("{}", serde_json::to_string_pretty(&profile)?);
    } else {
        print!("{profile}");
    }
    Ok(())
}

// ── simulate ──────────────────────────────────────────────────────────

fn run_simulate(args: &SimulateArgs) -> CliResult<()> {
    let cfg = match &args.config {
        Some(path) => LandingConfig::load_json(path)?,
        None => LandingConfig::default(),
    };
    cfg.validate()?;

    let opts = SimulationOptions {
        max_ticks: args.ticks,
        profile: DescentProfile {
            start_altitude_m: args.altitude,
            offset_m: [args.offset_x, args.offset_y],
            descent_rate_mps: args.descent_rate,
            ..DescentProfile::default()
        },
        tag_id: args.tag,
        landability: args.landability,
        link_drop_at_tick: args.drop_link_at,
        ..SimulationOptions::default()
    };
    let summary = run_simulation(&cfg, &opts)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }
    for c in &summary.transitions {
        println!(
            "tick {:>4}  {:<9} -> {:<9} {}",
            c.tick,
            c.from.as_str(),
            c.to.as_str(),
            c.reason.as_deref().unwrap_or("")
        );
    }
    println!("final state: {}", summary.final_state.as_str());
    println!("ticks: {}", summary.ticks);
    println!("landing_target messages: {}", summary.published.len());
    if let (Some(first), Some(last)) = (summary.published.first(), summary.published.last()) {
        for (label, m) in [("first", first), ("last", last)] {
            println!(
                "  {label:<5} t={}us distance={:.2}m angle=({:.4}, {:.4}) rad",
                m.time_usec, m.distance, m.angle_x, m.angle_y
            );
        }
    }
    println!("heartbeats: {}", summary.heartbeats_sent);
    Ok(())
}
