//! Transition and crash analysis CLI for link-adaptation session logs.
//!
//! Parses the interleaved two-peer session log, reconstructs configuration
//! transitions and crash candidates, and renders the requested view.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;

use shiftscope::analysis::{self, report, Analysis, ScanResult};
use shiftscope::config::{load_profile, ModemProfile};

#[derive(Parser)]
#[command(name = "shiftscope")]
#[command(about = "Transition timing and crash analysis for half-duplex link-adaptation logs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a YAML profile overriding the built-in config table
    #[arg(short, long)]
    profile: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Keep a compressed snapshot of the parsed events next to the log
    #[arg(long)]
    cache: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Full report: summary, NAck timelines, crashes, coverage table
    Analyze {
        /// Path to the session log
        logfile: PathBuf,

        /// Also write the analysis as JSON to this path
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Summary table only
    Summary {
        /// Path to the session log
        logfile: PathBuf,
    },

    /// Detailed timeline for one transition
    Transition {
        /// Path to the session log
        logfile: PathBuf,

        /// Transition index as shown in the summary table
        index: usize,
    },

    /// Dump every classified event
    Events {
        /// Path to the session log
        logfile: PathBuf,
    },

    /// Crash detection report only
    Crashes {
        /// Path to the session log
        logfile: PathBuf,
    },

    /// Static coarse-search coverage table for the active profile
    Coverage,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let profile = match cli.profile {
        Some(ref path) => load_profile(path)?,
        None => ModemProfile::default(),
    };

    match cli.command {
        Commands::Analyze { logfile, json } => {
            let analysis = run_analysis(&logfile, &profile, cli.cache)?;
            println!(
                "{}",
                report::render_summary(&analysis.transitions, &profile, analysis.has_timestamps)
            );

            let nacked: Vec<_> = analysis.transitions.iter().filter(|t| t.nacked).collect();
            if nacked.is_empty() {
                println!("\n  No NAcked transitions found");
            } else {
                println!("\n\n{}", "#".repeat(80));
                println!(
                    "  DETAILED TIMELINE FOR {} NAcked TRANSITION(S)",
                    nacked.len()
                );
                println!("{}", "#".repeat(80));
                for tr in nacked {
                    println!(
                        "{}",
                        report::render_transition(tr, &profile, analysis.has_timestamps)
                    );
                }
            }

            println!(
                "{}",
                report::render_crashes(&analysis.crashes, &analysis.events, &profile)
            );
            println!("{}", report::render_coverage(&profile));

            if let Some(path) = json {
                let full = report::build_report(&analysis, &logfile.display().to_string());
                report::write_json_report(&full, &path)?;
            }
        }
        Commands::Summary { logfile } => {
            let analysis = run_analysis(&logfile, &profile, cli.cache)?;
            println!(
                "{}",
                report::render_summary(&analysis.transitions, &profile, analysis.has_timestamps)
            );
            if !analysis.crashes.is_empty() {
                println!(
                    "{}",
                    report::render_crashes(&analysis.crashes, &analysis.events, &profile)
                );
            }
        }
        Commands::Transition { logfile, index } => {
            let analysis = run_analysis(&logfile, &profile, cli.cache)?;
            match analysis.transitions.get(index) {
                Some(tr) => println!(
                    "{}",
                    report::render_transition(tr, &profile, analysis.has_timestamps)
                ),
                None if analysis.transitions.is_empty() => {
                    println!("No transitions found in the log");
                }
                None => {
                    println!(
                        "Transition {} not found (0-{} available)",
                        index,
                        analysis.transitions.len() - 1
                    );
                }
            }
        }
        Commands::Events { logfile } => {
            let analysis = run_analysis(&logfile, &profile, cli.cache)?;
            println!("{}", report::render_events(&analysis.events));
        }
        Commands::Crashes { logfile } => {
            let analysis = run_analysis(&logfile, &profile, cli.cache)?;
            println!(
                "{}",
                report::render_crashes(&analysis.crashes, &analysis.events, &profile)
            );
        }
        Commands::Coverage => {
            println!("{}", report::render_coverage(&profile));
        }
    }

    Ok(())
}

/// Parse the log (or load its cached scan) and run both analysis passes
fn run_analysis(logfile: &Path, profile: &ModemProfile, use_cache: bool) -> Result<Analysis> {
    let step = profile.tunables.line_time_step.as_secs_f64();
    let scan = load_scan(logfile, step, use_cache)?;

    log::info!(
        "{} events parsed (timestamps: {})",
        scan.events.len(),
        if scan.has_timestamps {
            "precise"
        } else {
            "approximate, line-number proxy"
        }
    );

    // Both passes read the same immutable event slice
    let (transitions, crashes) = rayon::join(
        || analysis::build_transitions(&scan.events, profile),
        || analysis::detect_crashes(&scan.events, &profile.tunables),
    );

    log::info!("{} transitions found", transitions.len());
    if !crashes.is_empty() {
        log::warn!("{} crash(es) detected", crashes.len());
    }

    Ok(Analysis {
        events: scan.events,
        transitions,
        crashes,
        has_timestamps: scan.has_timestamps,
    })
}

fn load_scan(logfile: &Path, step: f64, use_cache: bool) -> Result<ScanResult> {
    if use_cache {
        if let Some(scan) = analysis::cache::load_cached_scan(logfile) {
            return Ok(scan);
        }
    }

    let scan = analysis::parse_log_file(logfile, step)?;

    if use_cache {
        if let Err(err) = analysis::cache::store_scan(logfile, &scan) {
            log::warn!("Could not cache scan: {:#}", err);
        }
    }
    Ok(scan)
}
