// ============================================================================
// PaintStack CLI: headless document tools via command-line arguments
// ============================================================================
//
// Usage examples:
//   paintstack new -W 1920 -H 1080 -o blank.pst
//   paintstack info scenes/*.pst
//   paintstack flatten -i layered.pst -o flat.pst
//
// All processing runs synchronously on the current thread.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand};

use crate::composition::Composition;
use crate::io::{load_document, save_document};
use crate::layer::{Layer, LayerHolder, LayerKind};
use crate::ops::canvas_ops::flatten;
use crate::render::Compositor;
use crate::settings::EngineSettings;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// PaintStack headless document tool.
#[derive(Parser, Debug)]
#[command(
    name = "paintstack",
    about = "PaintStack headless layered-document tool",
    long_about = "Create, inspect and flatten PaintStack (.pst) layered documents\n\
                  without an editor.\n\n\
                  Example:\n  \
                  paintstack info scenes/*.pst\n  \
                  paintstack flatten -i layered.pst -o flat.pst"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Print per-file timing information.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Write the session log here instead of the platform data directory.
    #[arg(long, global = true, value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a document holding a single white background layer.
    New {
        #[arg(short = 'W', long, default_value_t = 1920)]
        width: u32,
        #[arg(short = 'H', long, default_value_t = 1080)]
        height: u32,
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },
    /// Print the layer tree of one or more documents.
    Info {
        /// Input file(s). Glob patterns accepted (e.g. "*.pst", "scenes/*.pst").
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<String>,
    },
    /// Merge every visible layer into one and save the result.
    Flatten {
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the selected command and return an OS exit code.
/// `0` = everything succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs) -> ExitCode {
    let settings = EngineSettings::load();
    let result = match args.command {
        Command::New { width, height, output } => run_new(width, height, &output, &settings),
        Command::Info { inputs } => run_info(&inputs, &settings, args.verbose),
        Command::Flatten { input, output } => run_flatten(&input, &output, &settings, args.verbose),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_new(width: u32, height: u32, output: &Path, settings: &EngineSettings) -> Result<(), String> {
    if width == 0 || height == 0 {
        return Err("canvas dimensions must be non-zero".to_string());
    }
    let mut comp = Composition::new(width, height, settings);
    save_document(&mut comp, output).map_err(|e| format!("save failed: {}", e))?;
    println!("{} ({}x{})", output.display(), comp.width(), comp.height());
    Ok(())
}

fn run_info(patterns: &[String], settings: &EngineSettings, verbose: bool) -> Result<(), String> {
    let inputs = resolve_inputs(patterns);
    if inputs.is_empty() {
        return Err("no input files matched the given pattern(s).".to_string());
    }

    let mut failures = 0;
    for input in &inputs {
        let start = Instant::now();
        match load_document(input, settings) {
            Ok(comp) => {
                print!("{}", describe(&comp));
                if verbose {
                    println!("  loaded in {:.0}ms", start.elapsed().as_secs_f64() * 1000.0);
                }
            }
            Err(e) => {
                eprintln!("{}: load failed: {}", input.display(), e);
                failures += 1;
            }
        }
    }
    if failures > 0 {
        return Err(format!("{} of {} file(s) could not be read", failures, inputs.len()));
    }
    Ok(())
}

fn run_flatten(input: &Path, output: &Path, settings: &EngineSettings, verbose: bool) -> Result<(), String> {
    let start = Instant::now();
    let mut comp = load_document(input, settings).map_err(|e| format!("load failed: {}", e))?;
    flatten(&mut comp, &Compositor::new()).map_err(|e| format!("flatten failed: {}", e))?;
    save_document(&mut comp, output).map_err(|e| format!("save failed: {}", e))?;
    if verbose {
        println!(
            "  → {} ({:.0}ms)",
            output.display(),
            start.elapsed().as_secs_f64() * 1000.0
        );
    }
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Human-readable summary of a document: header line, then the tree with
/// the top layer first. The active layer is marked with `*`.
pub fn describe(comp: &Composition) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} ({}x{}, {} layers)",
        comp.name,
        comp.width(),
        comp.height(),
        comp.layer_count_recursive()
    );
    describe_level(comp, comp.layers(), 1, &mut out);
    out
}

fn describe_level(comp: &Composition, layers: &[Layer], depth: usize, out: &mut String) {
    for layer in layers.iter().rev() {
        let marker = if comp.active_layer_id() == Some(layer.id()) { '*' } else { ' ' };
        let mut flags = String::new();
        if !layer.visible {
            flags.push_str(" hidden");
        }
        if layer.has_mask() {
            flags.push_str(" masked");
        }
        let detail = match layer.kind() {
            LayerKind::Image(c) => format!("{}x{} at ({}, {})", c.pixels.width(), c.pixels.height(), c.tx, c.ty),
            LayerKind::Adjustment(s) => s.filter.clone(),
            LayerKind::Group(g) => format!("{} children", g.num_layers()),
            LayerKind::Mask(_) => String::new(),
        };
        let _ = writeln!(
            out,
            "{}{} {} [{}] {} {:.0}% {}{}",
            "  ".repeat(depth),
            marker,
            layer.name,
            layer.kind_name(),
            detail,
            layer.opacity * 100.0,
            layer.blend_mode.name(),
            flags
        );
        if let Some(group) = layer.as_group() {
            describe_level(comp, group.children(), depth + 1, out);
        }
    }
}

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            // Literal path, use directly
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        // Treat as glob pattern
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::HolderId;
    use crate::ops::layer_ops::{add_layer, AddToHistory};

    #[test]
    fn parses_subcommands() {
        let args = CliArgs::try_parse_from(["paintstack", "new", "-W", "64", "-H", "32", "-o", "a.pst"]).unwrap();
        assert!(matches!(args.command, Command::New { width: 64, height: 32, .. }));

        let args = CliArgs::try_parse_from(["paintstack", "-v", "info", "a.pst", "b.pst"]).unwrap();
        assert!(args.verbose);
        assert!(matches!(args.command, Command::Info { ref inputs } if inputs.len() == 2));

        assert!(CliArgs::try_parse_from(["paintstack", "info"]).is_err());
    }

    #[test]
    fn describe_lists_top_layer_first_and_nests_groups() {
        let mut comp = Composition::new(8, 8, &EngineSettings::default());
        comp.name = "doc".to_string();
        let group = Layer::new_group("G", vec![Layer::new_image("inner", 8, 8)]);
        add_layer(&mut comp, group, HolderId::Root, None, AddToHistory::No).unwrap();

        let text = describe(&comp);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "doc (8x8, 3 layers)");
        assert!(lines[1].contains("* G [group]"));
        assert!(lines[2].starts_with("    "));
        assert!(lines[2].contains("inner"));
        assert!(lines[3].contains("Background"));
    }

    #[test]
    fn resolve_inputs_skips_unmatched_patterns() {
        let missing = std::env::temp_dir().join("paintstack_no_such_dir").join("*.pst");
        assert!(resolve_inputs(&[missing.to_string_lossy().into_owned()]).is_empty());
    }
}
