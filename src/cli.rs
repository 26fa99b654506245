// ============================================================================
// Colorbook CLI: headless fills, markup sanitizing and drawing checks
// ============================================================================
//
// Usage examples:
//   colorbook fill page.png --x 120 --y 80 --color "#FF0000" -o colored.png
//   colorbook sanitize drawings/*.svg --output-dir clean/
//   colorbook validate cat.svg dog.svg
//   colorbook analyze page.png
//   colorbook state cat-42 --clear
//
// Everything runs on the current thread except the flood fill, which goes
// through the same worker bridge an interactive session uses.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand};
use log::{LevelFilter, info};

use crate::canvas::{Color, PixelBuffer, analyze_raster};
use crate::components::state::StateManager;
use crate::error::Result;
use crate::io::{FileStore, LoadOutcome};
use crate::ops::fill::apply_changes;
use crate::ops::sanitize::{sanitize, validate_for_coloring};
use crate::ops::worker::{FillBackend, FloodFillParams};
use crate::settings::EngineSettings;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// Colorbook headless tools.
#[derive(Parser, Debug)]
#[command(
    name = "colorbook",
    about = "Region-coloring engine: fills, markup sanitizing and drawing checks",
    long_about = "Run the coloring engine without a host UI.\n\n\
                  Example:\n  \
                  colorbook fill page.png --x 120 --y 80 --color \"#FF0000\" -o out.png\n  \
                  colorbook sanitize drawings/*.svg --output-dir clean/"
)]
pub struct CliArgs {
    /// Settings file (TOML). Defaults to the platform config location.
    #[arg(long, global = true, value_name = "FILE")]
    pub settings: Option<PathBuf>,

    /// Echo log output and per-file timing to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Flood-fill one point of a PNG and write the result.
    Fill {
        input: PathBuf,
        #[arg(long)]
        x: u32,
        #[arg(long)]
        y: u32,
        /// Fill color as #RGB, #RRGGBB or #RRGGBBAA.
        #[arg(short, long)]
        color: String,
        /// 0-100; overrides the settings file.
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=100))]
        tolerance: Option<u8>,
        /// Stop after this many pixels; overrides the settings file.
        #[arg(long)]
        max_points: Option<usize>,
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },
    /// Sanitize SVG markup. Glob patterns accepted.
    Sanitize {
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<String>,
        /// Write `<stem>.svg` files here instead of printing to stdout.
        #[arg(long, value_name = "DIR")]
        output_dir: Option<PathBuf>,
    },
    /// Report whether SVG files are usable as coloring pages (JSON per file).
    Validate {
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<String>,
    },
    /// Count boundary ink and colorable pixels of a PNG.
    Analyze { input: PathBuf },
    /// Show (or clear) the saved region colors of a drawing.
    State {
        drawing_id: String,
        /// Forget every saved color and the undo history.
        #[arg(long)]
        clear: bool,
    },
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the selected command and return an OS exit code.
/// `0` = everything succeeded, `1` = one or more inputs failed.
pub fn run(args: CliArgs) -> ExitCode {
    crate::logger::init(
        if args.verbose { LevelFilter::Debug } else { LevelFilter::Info },
        args.verbose,
    );

    let settings = match &args.settings {
        Some(path) => match EngineSettings::load_from(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("error: could not read settings '{}': {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => EngineSettings::load(),
    };

    let ok = match args.command {
        Command::Fill {
            input,
            x,
            y,
            color,
            tolerance,
            max_points,
            output,
        } => {
            let mut settings = settings;
            if let Some(t) = tolerance {
                settings.fill.tolerance = t;
            }
            if max_points.is_some() {
                settings.fill.max_points = max_points;
            }
            report(&input, run_fill(&input, x, y, &color, &settings, &output))
        }
        Command::Sanitize { inputs, output_dir } => for_each_input(&inputs, |path| {
            run_sanitize(path, output_dir.as_deref())
        }),
        Command::Validate { inputs } => for_each_input(&inputs, run_validate),
        Command::Analyze { input } => {
            report(&input, run_analyze(&input, settings.boundary_ink_threshold))
        }
        Command::State { drawing_id, clear } => {
            report(Path::new(&drawing_id), run_state(&drawing_id, clear, &settings))
        }
    };

    if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

fn report(path: &Path, result: Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            eprintln!("error: {}: {}", path.display(), e);
            false
        }
    }
}

fn for_each_input(patterns: &[String], mut run_one: impl FnMut(&Path) -> Result<()>) -> bool {
    let inputs = resolve_inputs(patterns);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return false;
    }
    let mut failed = 0usize;
    for path in &inputs {
        let started = Instant::now();
        if report(path, run_one(path)) {
            info!("{} done in {:.1} ms", path.display(), started.elapsed().as_secs_f64() * 1000.0);
        } else {
            failed += 1;
        }
    }
    if failed > 0 {
        eprintln!("{} of {} file(s) failed.", failed, inputs.len());
    }
    failed == 0
}

// ============================================================================
// Commands
// ============================================================================

fn run_fill(
    input: &Path,
    x: u32,
    y: u32,
    color: &str,
    settings: &EngineSettings,
    output: &Path,
) -> Result<()> {
    let fill_color = Color::parse_hex(color)?;
    let mut buffer = PixelBuffer::load_png(input)?;

    let mut backend = FillBackend::start(settings.use_worker);
    let pending = backend.submit(
        &buffer,
        FloodFillParams {
            x,
            y,
            fill_color,
            tolerance: settings.fill.tolerance,
            max_points: settings.fill.max_points,
        },
    )?;
    let result = pending.wait();
    backend.shutdown();
    let result = result?;

    let changed = apply_changes(&mut buffer, &result.changes);
    buffer.save_png(output)?;
    println!(
        "{}: filled {} pixel(s) in {:.1} ms{}",
        output.display(),
        changed,
        result.stats.total_time_ms,
        if result.stats.truncated { " (truncated)" } else { "" }
    );
    Ok(())
}

fn run_sanitize(path: &Path, output_dir: Option<&Path>) -> Result<()> {
    let markup = std::fs::read_to_string(path)?;
    let clean = sanitize(&markup)?;
    match output_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("output");
            let out = dir.join(format!("{}.svg", stem));
            std::fs::write(&out, clean)?;
            println!("{} -> {}", path.display(), out.display());
        }
        None => println!("{}", clean),
    }
    Ok(())
}

fn run_validate(path: &Path) -> Result<()> {
    let markup = std::fs::read_to_string(path)?;
    let validation = validate_for_coloring(&markup);
    println!("{}: {}", path.display(), serde_json::to_string(&validation)?);
    Ok(())
}

fn run_analyze(path: &Path, ink_threshold: u8) -> Result<()> {
    let buffer = PixelBuffer::load_png(path)?;
    let report = analyze_raster(&buffer, ink_threshold);
    println!(
        "{}: {}x{}, {} boundary, {} transparent, {} colorable",
        path.display(),
        buffer.width(),
        buffer.height(),
        report.boundary_pixels,
        report.transparent_pixels,
        report.colorable_pixels()
    );
    Ok(())
}

fn run_state(drawing_id: &str, clear: bool, settings: &EngineSettings) -> Result<()> {
    let store = FileStore::new(settings.state_dir());
    let mut manager = StateManager::open(drawing_id, store, settings.storage_policy())?;
    if let LoadOutcome::Discarded(reason) = manager.load_outcome() {
        println!("{}: saved state discarded ({:?})", drawing_id, reason);
    }
    if clear {
        manager.clear();
        println!("{}: cleared", drawing_id);
        return Ok(());
    }
    let state = manager.state();
    println!(
        "{}: {} (undo {}, redo {})",
        drawing_id,
        serde_json::to_string(state.regions())?,
        state.undo_len(),
        state.redo_len()
    );
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}
