use crate::config::{
    CutConfig, MergeConfig, ProcessingConfig, DEFAULT_CUT_GRID, DEFAULT_MAX_CUT_ITERATIONS,
    MAX_POINTS_IN_ELEMENT,
};
use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments parser
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Args {
    /// JSON tile dump to process (required)
    #[arg(long)]
    pub input: PathBuf,

    /// JSON file to write the processed tiles to (optional, prints a summary otherwise)
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Resolution (bits per coordinate) to write shapes at, repeatable
    #[arg(long = "resolution", default_values_t = [24u8])]
    pub resolutions: Vec<u8>,

    /// Largest number of points in a merged shape
    #[arg(long, default_value_t = MAX_POINTS_IN_ELEMENT)]
    pub max_points: usize,

    /// Grid (map units) cut lines are snapped to, 0 disables snapping
    #[arg(long, allow_hyphen_values = true, default_value_t = DEFAULT_CUT_GRID)]
    pub cut_grid: i32,

    /// Write every shape as it is, without merging
    #[arg(long)]
    pub no_merge: bool,

    /// Keep doubled road segments
    #[arg(long)]
    pub keep_overlaps: bool,

    /// Enable debug mode (optional)
    #[arg(long, env = "IMGTILE_DEBUG")]
    pub debug: bool,
}

impl Args {
    pub fn to_config(&self) -> ProcessingConfig {
        let mut resolutions = self.resolutions.clone();
        // most detailed first, each level once
        resolutions.sort_unstable_by(|a, b| b.cmp(a));
        resolutions.dedup();

        ProcessingConfig {
            resolutions,
            cut: CutConfig {
                grid: self.cut_grid,
                max_iterations: DEFAULT_MAX_CUT_ITERATIONS,
            },
            merge: MergeConfig {
                enabled: !self.no_merge,
                max_points: self.max_points,
            },
            remove_overlaps: !self.keep_overlaps,
        }
    }
}

/// Validates CLI arguments after parsing.
pub fn validate_args(args: &Args) -> Result<(), String> {
    if !args.input.exists() {
        return Err(format!("Input does not exist: {}", args.input.display()));
    }
    if !args.input.is_file() {
        return Err(format!("Input is not a file: {}", args.input.display()));
    }

    if let Some(bad) = args.resolutions.iter().find(|r| !(1..=24).contains(*r)) {
        return Err(format!("Resolution {bad} is out of range, expected 1 to 24."));
    }

    // A closed ring needs at least three corners plus the closing point
    if args.max_points < 4 {
        return Err("--max-points must be at least 4.".to_string());
    }

    if args.cut_grid < 0 {
        return Err("--cut-grid must not be negative.".to_string());
    }

    Ok(())
}
