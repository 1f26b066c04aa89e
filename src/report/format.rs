//! Formatted terminal output.
//!
//! Formatting lives here so the fitting code stays free of presentation
//! details and output changes stay localized.

use crate::correct::{Correction, CorrectionOptions};
use crate::domain::{Normalization, describe};

/// Outcome of one target in a batch, as shown in the summary table.
#[derive(Debug, Clone)]
pub struct BatchRow {
    pub target: String,
    pub outcome: Result<BatchFigures, String>,
}

/// Headline numbers for one corrected target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchFigures {
    pub used: usize,
    pub total: usize,
    pub vectors: usize,
    pub rmse: f64,
    pub converged: bool,
}

impl BatchFigures {
    pub fn from_correction(correction: &Correction) -> Self {
        Self {
            used: correction.alignment.used,
            total: correction.alignment.total,
            vectors: correction.ids.len(),
            rmse: correction.fit.quality.rmse * correction.flux_scale.abs(),
            converged: correction.fit.converged,
        }
    }
}

/// Format the detailed summary for a single corrected target.
pub fn format_correction_summary(target: &str, correction: &Correction, options: &CorrectionOptions) -> String {
    let fit = &correction.fit;
    let stats = &correction.alignment;
    let mut out = String::new();

    out.push_str(&format!("=== cbv - {target} ===\n"));
    out.push_str(&format!(
        "Cadences: used {}/{} (masked {}, quality {}, no basis {}, bad basis {})\n",
        stats.used, stats.total, stats.masked_flux, stats.quality_excluded, stats.missing_cadence, stats.invalid_basis
    ));
    let excluded = describe(options.exclude_mask);
    out.push_str(&format!(
        "Quality mask {:#06x}: {}\n",
        options.exclude_mask,
        if excluded.is_empty() { "(none)".to_string() } else { excluded.join(", ") }
    ));
    out.push_str(&format!(
        "Fit: {} | offset={} | l2={} | normalize={}\n",
        if options.fit.robust { "robust (bisquare)" } else { "least squares" },
        options.fit.add_constant_offset,
        options.fit.l2_penalty,
        match options.normalization {
            Normalization::None => "none",
            Normalization::Median => "median",
        },
    ));
    out.push_str(&format!(
        "Solves: {} | converged: {} | cond={:.3e}{}\n",
        fit.iterations,
        if fit.converged { "yes" } else { "NO" },
        fit.condition_number,
        if fit.rescaled { " (rescaled)" } else { "" },
    ));
    out.push_str(&format!(
        "SSE={:.6e} RMSE={:.6e} BIC={:.3} (n={}, k={})\n",
        fit.quality.sse, fit.quality.rmse, fit.quality.bic, fit.quality.n, fit.quality.k
    ));

    out.push_str("\nCoefficients:\n");
    if correction.ids.is_empty() {
        out.push_str("  (none)\n");
    }
    for (id, beta) in correction.ids.iter().zip(&fit.coefficients) {
        out.push_str(&format!("  CBV {id:>3}  {beta:+.6e}\n"));
    }
    if let Some(c) = fit.offset {
        out.push_str(&format!("  offset   {c:+.6e}\n"));
    }

    if let Some(auto) = &correction.auto_selection {
        out.push_str("\nAutomatic selection:\n");
        for step in &auto.steps {
            let mark = if step.accepted { "*" } else { "x" };
            out.push_str(&format!(
                "{mark} {:<24} SSE={:.6e} BIC={:.3}\n",
                fmt_ids(&step.ids),
                step.sse,
                step.bic
            ));
        }
    }

    out
}

/// Format a one-line-per-target batch table.
pub fn format_batch_table(rows: &[BatchRow]) -> String {
    let width = rows.iter().map(|r| r.target.len()).max().unwrap_or(6).max(6);
    let mut out = String::new();
    out.push_str(&format!(
        "{:<width$}  {:>11}  {:>4}  {:>12}  {}\n",
        "target", "used/total", "cbvs", "rmse", "status"
    ));
    for row in rows {
        match &row.outcome {
            Ok(f) => out.push_str(&format!(
                "{:<width$}  {:>11}  {:>4}  {:>12.4e}  {}\n",
                row.target,
                format!("{}/{}", f.used, f.total),
                f.vectors,
                f.rmse,
                if f.converged { "ok" } else { "not converged" },
            )),
            Err(msg) => out.push_str(&format!("{:<width$}  FAILED: {msg}\n", row.target)),
        }
    }
    out
}

fn fmt_ids(ids: &[u32]) -> String {
    let inner = ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(",");
    format!("[{inner}]")
}
