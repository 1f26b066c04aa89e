//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - installs logging
//! - parses CLI arguments
//! - runs corrections (or generates demo data)
//! - prints summaries
//! - writes optional exports

use std::fs;
use std::path::Path;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use crate::cli::{Command, CorrectArgs, DemoArgs};
use crate::correct::CorrectionOptions;
use crate::data::{SyntheticConfig, generate};
use crate::domain::DEFAULT_EXCLUDE_MASK;
use crate::error::AppError;
use crate::fit::{FitOptions, Selection};
use crate::io::export::{write_basis_csv, write_corrected_csv, write_light_curve_csv, write_reports_json};
use crate::report::{BatchFigures, BatchRow, CorrectionReport, format_batch_table, format_correction_summary};

pub mod pipeline;

pub use pipeline::{CorrectConfig, RunOutput, TargetOutput};

/// Entry point for the `cbv` binary.
pub fn run() -> Result<(), AppError> {
    init_logging();
    let cli = crate::cli::Cli::parse();

    match cli.command {
        Command::Correct(args) => handle_correct(args),
        Command::Demo(args) => handle_demo(args),
    }
}

/// Log to stderr so stdout carries only summaries; `RUST_LOG` overrides `info`.
fn init_logging() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    // A second install (e.g. from tests) is harmless.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn handle_correct(args: CorrectArgs) -> Result<(), AppError> {
    let config = correct_config_from_args(&args)?;
    let run = pipeline::run_correction(&config)?;
    present(&run, &config.options, config.quiet);
    export(&run, &config)?;
    first_failure(&run)
}

fn handle_demo(args: DemoArgs) -> Result<(), AppError> {
    let synth = SyntheticConfig {
        seed: args.seed,
        cadences: args.cadences,
        vectors: args.vectors,
        targets: args.targets,
        noise_ppm: args.noise_ppm,
        ..SyntheticConfig::default()
    };
    let data = generate(&synth)?;

    ensure_dir(&args.output_dir)?;
    let cbv_path = args.output_dir.join("cbv.csv");
    write_basis_csv(&cbv_path, &data.basis)?;
    for target in &data.targets {
        let label = target.series.label().unwrap_or("synthetic");
        write_light_curve_csv(&args.output_dir.join(format!("{label}.csv")), &target.series)?;
    }
    info!(
        dir = %args.output_dir.display(),
        targets = data.targets.len(),
        vectors = data.basis.ids().len(),
        "wrote synthetic inputs"
    );

    if !args.correct {
        println!(
            "Wrote {} light curve(s) and {} to {}.\nTry: cbv correct -l {}/synthetic-001.csv --cbv {} --auto --robust",
            data.targets.len(),
            cbv_path.display(),
            args.output_dir.display(),
            args.output_dir.display(),
            cbv_path.display(),
        );
        return Ok(());
    }

    let options = CorrectionOptions {
        fit: FitOptions {
            robust: true,
            ..FitOptions::default()
        },
        ..CorrectionOptions::default()
    };
    let truths: Vec<Vec<(u32, f64)>> = data.targets.iter().map(|t| t.true_coefficients.clone()).collect();
    let series = data.targets.into_iter().map(|t| t.series).collect();
    let run = pipeline::run_correction_on(data.basis, series, &Selection::Automatic, &options);
    present(&run, &options, false);

    for (target, truth) in run.targets.iter().zip(&truths) {
        let Ok(correction) = &target.result else {
            continue;
        };
        println!("Recovered vs injected ({}):", target.target);
        for (id, c_true) in truth {
            let fitted = correction
                .ids
                .iter()
                .position(|x| x == id)
                .map(|col| correction.fit.coefficients[col] * correction.flux_scale / synth.flux_level);
            match fitted {
                Some(f) => println!("  CBV {id:>3}  injected {c_true:+.5}  recovered {f:+.5}"),
                None => println!("  CBV {id:>3}  injected {c_true:+.5}  (not selected)"),
            }
        }
    }
    first_failure(&run)
}

/// Map CLI arguments onto the library's option types.
pub fn correct_config_from_args(args: &CorrectArgs) -> Result<CorrectConfig, AppError> {
    let selection = if args.auto {
        Selection::Automatic
    } else {
        Selection::Explicit(args.ids.clone())
    };

    let options = CorrectionOptions {
        exclude_mask: args.exclude_mask.unwrap_or(DEFAULT_EXCLUDE_MASK),
        fit: FitOptions {
            add_constant_offset: !args.no_offset,
            robust: args.robust,
            max_iterations: args.max_iterations,
            convergence_tolerance: args.tolerance,
            l2_penalty: args.l2,
        },
        use_uncertainties: args.use_uncertainties,
        normalization: args.normalize,
        reject_non_converged: args.reject_non_converged,
        max_auto_vectors: args.max_auto_vectors,
    };
    // Catch bad flags before any file is read.
    options.fit.validate()?;
    if args.auto && args.max_auto_vectors == 0 {
        return Err(AppError::new(2, "--max-auto-vectors must be >= 1."));
    }

    Ok(CorrectConfig {
        lightcurves: args.lightcurves.clone(),
        cbv: args.cbv.clone(),
        selection,
        options,
        output_dir: args.output_dir.clone(),
        report: args.report.clone(),
        quiet: args.quiet,
    })
}

fn present(run: &RunOutput, options: &CorrectionOptions, quiet: bool) {
    if !quiet {
        for target in &run.targets {
            if let Ok(c) = &target.result {
                println!("{}", format_correction_summary(&target.target, c, options));
            }
        }
    }

    let rows: Vec<BatchRow> = run
        .targets
        .iter()
        .map(|t| BatchRow {
            target: t.target.clone(),
            outcome: t
                .result
                .as_ref()
                .map(BatchFigures::from_correction)
                .map_err(|e| e.to_string()),
        })
        .collect();
    println!("{}", format_batch_table(&rows));
}

fn export(run: &RunOutput, config: &CorrectConfig) -> Result<(), AppError> {
    if let Some(dir) = &config.output_dir {
        ensure_dir(dir)?;
        for target in &run.targets {
            if let Ok(c) = &target.result {
                let path = dir.join(format!("{}_corrected.csv", target.target));
                write_corrected_csv(&path, &target.raw, c)?;
                info!(path = %path.display(), "wrote corrected light curve");
            }
        }
    }

    if let Some(path) = &config.report {
        let reports: Vec<CorrectionReport> = run
            .targets
            .iter()
            .filter_map(|t| {
                t.result
                    .as_ref()
                    .ok()
                    .map(|c| CorrectionReport::new(t.target.clone(), run.basis.segment(), c, &config.options))
            })
            .collect();
        write_reports_json(path, &reports)?;
        info!(path = %path.display(), reports = reports.len(), "wrote report");
    }
    Ok(())
}

/// Successful targets are still written; the exit code reflects the first failure.
fn first_failure(run: &RunOutput) -> Result<(), AppError> {
    let mut failures = run.failures();
    let Some(first) = failures.next() else {
        return Ok(());
    };
    let Err(cause) = &first.result else {
        return Ok(());
    };
    let failed = 1 + failures.count();
    let err = AppError::from(cause.clone());
    Err(AppError::new(
        err.exit_code(),
        format!("{failed} of {} target(s) failed; first: {}: {err}", run.targets.len(), first.target),
    ))
}

fn ensure_dir(dir: &Path) -> Result<(), AppError> {
    fs::create_dir_all(dir)
        .map_err(|e| AppError::new(2, format!("Failed to create output directory '{}': {e}", dir.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Normalization;

    fn args(extra: &[&str]) -> CorrectArgs {
        let mut argv = vec!["cbv", "correct", "-l", "a.csv", "--cbv", "q.csv"];
        argv.extend_from_slice(extra);
        match crate::cli::Cli::parse_from(argv).command {
            Command::Correct(a) => a,
            Command::Demo(_) => unreachable!(),
        }
    }

    #[test]
    fn flags_map_onto_options() {
        let config = correct_config_from_args(&args(&[
            "--ids",
            "3,1",
            "--robust",
            "--no-offset",
            "--l2",
            "0.5",
            "--exclude-mask",
            "0x2",
            "--normalize",
            "median",
        ]))
        .unwrap();

        assert_eq!(config.selection, Selection::Explicit(vec![3, 1]));
        assert!(config.options.fit.robust);
        assert!(!config.options.fit.add_constant_offset);
        assert_eq!(config.options.fit.l2_penalty, 0.5);
        assert_eq!(config.options.exclude_mask, 2);
        assert_eq!(config.options.normalization, Normalization::Median);
    }

    #[test]
    fn defaults_match_library_defaults() {
        let config = correct_config_from_args(&args(&["--auto"])).unwrap();
        assert_eq!(config.selection, Selection::Automatic);
        assert_eq!(config.options, CorrectionOptions::default());
    }

    #[test]
    fn exit_code_follows_the_first_failed_target() {
        use crate::domain::{BasisVectorSet, TimeSeries};

        let set = BasisVectorSet::new(vec![1, 2, 3], vec![(1, vec![0.0, 1.0, 2.0])]).unwrap();
        let good = TimeSeries::from_flux(vec![0.0, 1.0, 2.0], vec![1, 2, 3], vec![1.0, 2.0, 3.0]).unwrap();
        let disjoint = TimeSeries::from_flux(vec![0.0], vec![99], vec![1.0]).unwrap().with_label("far");
        let mut options = CorrectionOptions::default();
        options.fit.add_constant_offset = false;

        let run = pipeline::run_correction_on(set.clone(), vec![good.clone()], &Selection::Explicit(vec![1]), &options);
        assert!(first_failure(&run).is_ok());

        let run = pipeline::run_correction_on(set, vec![good, disjoint], &Selection::Explicit(vec![1]), &options);
        let err = first_failure(&run).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().contains("1 of 2 target(s) failed; first: far"));
    }

    #[test]
    fn invalid_flags_fail_as_usage_errors() {
        let err = correct_config_from_args(&args(&["--auto", "--l2=-1"])).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
