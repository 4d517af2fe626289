// ============================================================================
// LabelFE CLI: headless batch conversion of annotation masks
// ============================================================================
//
// Usage examples:
//   labelfe -i annotations/cell_01.png --export -o cell_01_server.png
//   labelfe -i "annotations/*.png" --export --output-dir export/
//   labelfe -i mask.png --smooth 5 -o mask_clean.png
//   labelfe -i mask.png --width 1024 --height 768 -o resized.png
//
// Inputs are palette-coloured annotation PNGs. Everything runs synchronously
// on the current thread apart from rayon's per-row work inside the codec.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use crate::canvas::{ClassBuffer, RasterStore};
use crate::components::history::HistoryManager;
use crate::error::{EngineError, Result};
use crate::io::{self, EXPORT_SIZE};
use crate::library;
use crate::ops::smoothing;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// LabelFE headless annotation converter.
#[derive(Parser, Debug)]
#[command(
    name = "labelfe",
    about = "LabelFE headless annotation mask converter",
    long_about = "Decode palette-coloured annotation masks, optionally smooth them,\n\
                  and write them back in storage form or as the 512x512\n\
                  red-on-transparent training export.\n\n\
                  Example:\n  \
                  labelfe -i \"annotations/*.png\" --export --output-dir export/"
)]
pub struct CliArgs {
    /// Input annotation file(s). Glob patterns accepted (e.g. "annotations/*.png").
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Output file path. Only valid for single-file input.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output directory for batch processing.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Write the training-server format instead of the storage palette.
    #[arg(long)]
    pub export: bool,

    /// Smooth class boundaries over the whole mask with this kernel size.
    #[arg(long, value_name = "KERNEL")]
    pub smooth: Option<usize>,

    /// Decode width (defaults to the input's own width).
    #[arg(long, value_name = "PX")]
    pub width: Option<u32>,

    /// Decode height (defaults to the input's own height).
    #[arg(long, value_name = "PX")]
    pub height: Option<u32>,

    /// Print per-file class histograms and timing information.
    #[arg(short, long)]
    pub verbose: bool,
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all CLI processing and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs) -> ExitCode {
    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    if inputs.len() > 1 && args.output.is_some() && args.output_dir.is_none() {
        eprintln!(
            "error: {} input files given but --output only accepts a single file path.\n\
             Use --output-dir to specify a destination directory for batch processing.",
            inputs.len()
        );
        return ExitCode::FAILURE;
    }

    if let Some(dir) = &args.output_dir {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!(
                "error: could not create output directory '{}': {}",
                dir.display(),
                e
            );
            return ExitCode::FAILURE;
        }
    }

    let total = inputs.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, input_path) in inputs.iter().enumerate() {
        if multi || args.verbose {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }

        let file_start = Instant::now();

        let Some(output_path) = build_output_path(
            input_path,
            args.output.as_deref(),
            args.output_dir.as_deref(),
            args.export,
        ) else {
            eprintln!(
                "  error: cannot determine output path for '{}'.",
                input_path.display()
            );
            any_failure = true;
            continue;
        };

        match run_one(input_path, &output_path, &args) {
            Ok(()) => {
                if args.verbose || multi {
                    println!(
                        "  → {} ({:.0}ms)",
                        output_path.display(),
                        file_start.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
            Err(e) => {
                tracing::error!("{}: {}", input_path.display(), e);
                eprintln!("  error: {}", e);
                any_failure = true;
            }
        }
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

// ============================================================================
// Per-file processing pipeline
// ============================================================================

fn run_one(input: &Path, output: &Path, args: &CliArgs) -> Result<()> {
    // -- Step 1: Decode --------------------------------------------------
    let image = io::load_image(input)?;
    let width = args.width.unwrap_or(image.width());
    let height = args.height.unwrap_or(image.height());
    if width == 0 || height == 0 {
        return Err(EngineError::Decode(format!("{}x{} is not a valid size", width, height)));
    }
    let (mut buffer, stats) = io::decode_with_stats(&image, width, height);
    if args.verbose {
        println!(
            "  decoded {}x{}: {} exact, {} nearest, {} background",
            width, height, stats.exact, stats.nearest, stats.background
        );
    }

    // -- Step 2: Smooth (optional) ---------------------------------------
    if let Some(kernel) = args.smooth {
        let mut history = HistoryManager::default();
        let bounds = buffer.bounds();
        let changed = smoothing::smooth(&mut buffer, &mut history, bounds, kernel).is_some();
        if args.verbose {
            println!(
                "  smoothing (kernel {}): {}",
                smoothing::odd_kernel(kernel),
                if changed { "applied" } else { "no change" }
            );
        }
    }

    if args.verbose {
        print_histogram(&buffer);
    }

    // -- Step 3: Save ----------------------------------------------------
    if args.export {
        io::save_export(&buffer, EXPORT_SIZE, output)
    } else {
        io::save_annotation(&buffer, output)
    }
}

fn print_histogram(buffer: &ClassBuffer) {
    let counts = buffer.class_counts();
    let total: usize = counts.iter().sum();
    for (class, &count) in counts.iter().enumerate() {
        if count == 0 {
            continue;
        }
        println!(
            "  class {}: {} px ({:.1}%)",
            class,
            count,
            count as f64 * 100.0 / total.max(1) as f64
        );
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn is_png(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("png"))
}

/// Expand the `-i` arguments into an ordered, deduplicated list of masks.
/// A directory contributes every annotation PNG inside it; files and glob
/// matches that are not PNGs are skipped.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();
    let mut push = |path: PathBuf| {
        if !result.contains(&path) {
            result.push(path);
        }
    };

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.is_dir() {
            match library::list_png(as_path) {
                Ok(names) => names.into_iter().for_each(|name| push(as_path.join(name))),
                Err(e) => eprintln!("warning: cannot list '{}': {}", pattern, e),
            }
            continue;
        }
        if as_path.exists() {
            if is_png(as_path) {
                push(as_path.to_path_buf());
            } else {
                eprintln!("warning: '{}' is not a PNG mask, skipped.", pattern);
            }
            continue;
        }

        let entries = match glob::glob(pattern) {
            Ok(entries) => entries,
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
                continue;
            }
        };
        let matched: Vec<PathBuf> = entries.flatten().filter(|p| p.is_file() && is_png(p)).collect();
        if matched.is_empty() {
            eprintln!("warning: pattern '{}' matched no PNG masks.", pattern);
        }
        matched.into_iter().for_each(&mut push);
    }

    result
}

/// Compute the output path for a single input file.
///
/// Priority:
/// 1. `--output` (explicit path, used for single-file input)
/// 2. `--output-dir` (batch directory, keeps the input file name)
/// 3. Fallback: next to the input with an `_export` / `_out` suffix
fn build_output_path(
    input: &Path,
    output: Option<&Path>,
    output_dir: Option<&Path>,
    export: bool,
) -> Option<PathBuf> {
    if let Some(out) = output {
        return Some(out.to_path_buf());
    }

    let stem = input.file_stem()?.to_string_lossy().into_owned();

    if let Some(dir) = output_dir {
        return Some(dir.join(format!("{}.png", stem)));
    }

    let parent = input.parent().unwrap_or(Path::new("."));
    let suffix = if export { "export" } else { "out" };
    Some(parent.join(format!("{}_{}.png", stem, suffix)))
}
