//! Command-line parsing for the `cbv` cotrending tool.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! fitting code. `app` turns these arguments into `CorrectionOptions`.

use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand};

use crate::domain::Normalization;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "cbv",
    version,
    about = "Remove instrumental systematics from light curves with cotrending basis vectors"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Correct one or more light curves against a basis-vector file.
    Correct(CorrectArgs),
    /// Write a synthetic light curve + basis-vector set, optionally correcting it.
    Demo(DemoArgs),
}

/// Options for `cbv correct`.
#[derive(Debug, Args, Clone)]
#[command(group(ArgGroup::new("selection").required(true).args(["ids", "auto"])))]
pub struct CorrectArgs {
    /// Light curve CSV(s): time, cadenceno, flux[, flux_err][, quality].
    #[arg(short = 'l', long = "lightcurve", value_name = "CSV", num_args = 1.., required = true)]
    pub lightcurves: Vec<PathBuf>,

    /// Basis-vector CSV: cadenceno, vector_1, vector_2, ...
    #[arg(short = 'c', long, value_name = "CSV")]
    pub cbv: PathBuf,

    /// Comma-separated basis-vector IDs to fit, in order (e.g. `1,2,3`). Required unless `--auto`.
    #[arg(long, value_delimiter = ',')]
    pub ids: Vec<u32>,

    /// Choose basis vectors automatically by BIC instead of `--ids`.
    #[arg(long)]
    pub auto: bool,

    /// Upper bound on vectors considered by `--auto`.
    #[arg(long, default_value_t = 16)]
    pub max_auto_vectors: usize,

    /// Use bisquare-weighted iterative fitting.
    #[arg(long)]
    pub robust: bool,

    /// Maximum least squares solves in robust mode.
    #[arg(long, default_value_t = 50)]
    pub max_iterations: usize,

    /// Relative coefficient change that ends robust iteration.
    #[arg(long, default_value_t = 1e-6)]
    pub tolerance: f64,

    /// Ridge penalty on basis-vector coefficients.
    #[arg(long, default_value_t = 0.0)]
    pub l2: f64,

    /// Do not fit a constant offset.
    #[arg(long)]
    pub no_offset: bool,

    /// Quality bits that exclude a cadence (decimal or 0x-hex). Defaults to the
    /// Kepler cotrending mask.
    #[arg(long, value_parser = parse_mask)]
    pub exclude_mask: Option<u32>,

    /// Flux normalization before fitting.
    #[arg(long, value_enum, default_value_t = Normalization::None)]
    pub normalize: Normalization,

    /// Weight cadences by inverse flux variance.
    #[arg(long)]
    pub use_uncertainties: bool,

    /// Treat a non-converged robust fit as an error.
    #[arg(long)]
    pub reject_non_converged: bool,

    /// Directory for `<target>_corrected.csv` files.
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Write a JSON report (one entry per target).
    #[arg(long, value_name = "JSON")]
    pub report: Option<PathBuf>,

    /// Print only the batch table, not per-target summaries.
    #[arg(short = 'q', long)]
    pub quiet: bool,
}

/// Options for `cbv demo`.
#[derive(Debug, Args, Clone)]
pub struct DemoArgs {
    /// Random seed.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Number of cadences.
    #[arg(long, default_value_t = 4000)]
    pub cadences: usize,

    /// Number of basis vectors.
    #[arg(long, default_value_t = 8)]
    pub vectors: usize,

    /// Number of light curves.
    #[arg(long, default_value_t = 1)]
    pub targets: usize,

    /// White noise (ppm).
    #[arg(long, default_value_t = 100.0)]
    pub noise_ppm: f64,

    /// Output directory for `cbv.csv` and `synthetic-NNN.csv`.
    #[arg(short = 'o', long, value_name = "DIR", default_value = "cbv-demo")]
    pub output_dir: PathBuf,

    /// Also run an automatic robust correction and compare with the truth.
    #[arg(long)]
    pub correct: bool,
}

/// Parse a quality mask given as decimal or `0x`-prefixed hex.
pub fn parse_mask(raw: &str) -> Result<u32, String> {
    let s = raw.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse::<u32>(),
    };
    parsed.map_err(|_| format!("invalid quality mask '{raw}' (expected decimal or 0x-hex)"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_accepts_decimal_and_hex() {
        assert_eq!(parse_mask("175"), Ok(175));
        assert_eq!(parse_mask("0xAF"), Ok(175));
        assert_eq!(parse_mask(" 0x0 "), Ok(0));
        assert!(parse_mask("safe").is_err());
    }

    #[test]
    fn correct_parses_id_lists() {
        let cli = Cli::try_parse_from([
            "cbv", "correct", "-l", "a.csv", "b.csv", "--cbv", "q1.csv", "--ids", "1,2,5", "--robust",
        ])
        .unwrap();
        let Command::Correct(args) = cli.command else {
            panic!("expected correct");
        };
        assert_eq!(args.lightcurves.len(), 2);
        assert_eq!(args.ids, vec![1, 2, 5]);
        assert!(args.robust);
        assert!(!args.auto);
        assert_eq!(args.exclude_mask, None);
    }

    #[test]
    fn ids_and_auto_conflict() {
        let res = Cli::try_parse_from(["cbv", "correct", "-l", "a.csv", "--cbv", "q.csv", "--ids", "1", "--auto"]);
        assert!(res.is_err());
    }

    #[test]
    fn correct_requires_a_selection_mode() {
        let err = Cli::try_parse_from(["cbv", "correct", "-l", "a.csv", "--cbv", "q.csv"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);

        let cli = Cli::try_parse_from(["cbv", "correct", "-l", "a.csv", "--cbv", "q.csv", "--auto"]).unwrap();
        let Command::Correct(args) = cli.command else {
            panic!("expected correct");
        };
        assert!(args.auto);
        assert!(args.ids.is_empty());
    }
}
