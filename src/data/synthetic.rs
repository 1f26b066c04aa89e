//! Synthetic Kepler-like light curves and cotrending basis vectors.
//!
//! Used by `cbv demo` and by tests that need realistic inputs:
//! - basis vectors are zero-mean and orthonormal, ordered by "rank"
//! - each target is `level * (1 + Σ c_j v_j)` plus stellar variability,
//!   white noise, a few outliers, flagged events, and a NaN gap
//!
//! Generation is fully determined by the seed.

use std::f64::consts::TAU;

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::{BasisVectorSet, DESAT, SAFE_MODE, TimeSeries};
use crate::error::AppError;

/// First cadence number of the synthetic segment.
pub const FIRST_CADENCE: i64 = 1105;
/// Kepler long-cadence spacing in days.
pub const CADENCE_DAYS: f64 = 0.020_433_8;
const START_TIME: f64 = 131.512;

#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticConfig {
    pub seed: u64,
    pub cadences: usize,
    pub vectors: usize,
    pub targets: usize,
    /// Median flux level in e-/s.
    pub flux_level: f64,
    /// White noise in parts per million of the flux level.
    pub noise_ppm: f64,
    /// Relative amplitude of the intrinsic stellar signal.
    pub stellar_amplitude: f64,
    /// Fraction of cadences hit by a large outlier.
    pub outlier_fraction: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            cadences: 4000,
            vectors: 8,
            targets: 1,
            flux_level: 2.0e4,
            noise_ppm: 100.0,
            stellar_amplitude: 5.0e-4,
            outlier_fraction: 0.002,
        }
    }
}

/// One generated target and the coefficients used to build it.
#[derive(Debug, Clone)]
pub struct SyntheticTarget {
    pub series: TimeSeries,
    /// `(id, c_j)` in relative flux units.
    pub true_coefficients: Vec<(u32, f64)>,
}

#[derive(Debug, Clone)]
pub struct SyntheticData {
    pub basis: BasisVectorSet,
    pub targets: Vec<SyntheticTarget>,
}

pub fn generate(config: &SyntheticConfig) -> Result<SyntheticData, AppError> {
    validate(config)?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let n = config.cadences;
    let cadence: Vec<i64> = (0..n as i64).map(|i| FIRST_CADENCE + i).collect();
    let time: Vec<f64> = (0..n).map(|i| START_TIME + i as f64 * CADENCE_DAYS).collect();

    let raw: Vec<Vec<f64>> = (0..config.vectors).map(|j| raw_trend(&mut rng, j, n)).collect();
    let vectors = orthonormalize(raw)?;
    let ids: Vec<u32> = (1..=config.vectors as u32).collect();

    let basis = BasisVectorSet::new(cadence.clone(), ids.iter().copied().zip(vectors.iter().cloned()).collect())
        .map_err(|e| AppError::new(4, format!("Synthetic basis vectors: {e}")))?
        .with_segment("synthetic");

    let sigma = config.flux_level * config.noise_ppm * 1e-6;
    let noise = Normal::new(0.0, sigma).map_err(|e| AppError::new(2, format!("Noise distribution error: {e}")))?;

    let mut targets = Vec::with_capacity(config.targets);
    for t in 0..config.targets {
        // Leading vectors carry most of the systematics, as in real CBV sets.
        let true_coefficients: Vec<(u32, f64)> = ids
            .iter()
            .map(|&id| (id, rng.gen_range(-0.05..0.05) / id as f64))
            .collect();

        let period = rng.gen_range(1.5..12.0);
        let phase = rng.gen_range(0.0..TAU);

        let mut flux = Vec::with_capacity(n);
        let mut quality = vec![0u32; n];
        for i in 0..n {
            let systematic: f64 = true_coefficients
                .iter()
                .zip(&vectors)
                .map(|((_, c), v)| c * v[i])
                .sum();
            let stellar = config.stellar_amplitude * (TAU * (time[i] - START_TIME) / period + phase).sin();
            let mut f = config.flux_level * (1.0 + systematic + stellar) + noise.sample(&mut rng);
            if rng.gen_bool(config.outlier_fraction) {
                let sign = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
                f += sign * rng.gen_range(20.0..60.0) * sigma;
            }
            flux.push(f);
        }

        // Momentum dumps: flagged and visibly disturbed.
        for i in (n / 7..n).step_by((n / 5).max(1)) {
            quality[i] |= DESAT;
            flux[i] += 30.0 * sigma;
        }

        // A short safe-mode excursion.
        let safe_start = n / 2;
        for i in safe_start..(safe_start + n / 100 + 1).min(n) {
            quality[i] |= SAFE_MODE;
            flux[i] *= 0.97;
        }

        // Data gap with no flux.
        let gap_start = (3 * n) / 4;
        for f in flux.iter_mut().skip(gap_start).take(n / 200 + 1) {
            *f = f64::NAN;
        }

        let flux_err = flux.iter().map(|f| if f.is_nan() { f64::NAN } else { sigma }).collect();
        let series = TimeSeries::new(time.clone(), cadence.clone(), flux, flux_err, quality)
            .map_err(|e| AppError::new(4, format!("Synthetic light curve: {e}")))?
            .with_label(format!("synthetic-{:03}", t + 1));

        targets.push(SyntheticTarget {
            series,
            true_coefficients,
        });
    }

    Ok(SyntheticData { basis, targets })
}

fn validate(config: &SyntheticConfig) -> Result<(), AppError> {
    if config.cadences < 50 {
        return Err(AppError::new(2, "Synthetic data needs at least 50 cadences."));
    }
    if config.vectors == 0 || config.vectors > config.cadences / 10 {
        return Err(AppError::new(
            2,
            format!("Vector count must be in 1..={}.", config.cadences / 10),
        ));
    }
    if !(config.flux_level.is_finite() && config.flux_level > 0.0) {
        return Err(AppError::new(2, "Flux level must be > 0."));
    }
    if !(config.noise_ppm.is_finite() && config.noise_ppm > 0.0) {
        return Err(AppError::new(2, "Noise must be > 0 ppm."));
    }
    if !(config.stellar_amplitude.is_finite() && config.stellar_amplitude >= 0.0) {
        return Err(AppError::new(2, "Stellar amplitude must be >= 0."));
    }
    if !(0.0..0.5).contains(&config.outlier_fraction) {
        return Err(AppError::new(2, "Outlier fraction must be in [0, 0.5)."));
    }
    Ok(())
}

/// A smooth trend for rank `j`: a thermal settle for the first vector, slow
/// drifts with a small jump for the rest.
fn raw_trend(rng: &mut StdRng, j: usize, n: usize) -> Vec<f64> {
    let freq = 0.5 + j as f64 + rng.gen_range(0.0..0.5);
    let phase = rng.gen_range(0.0..TAU);
    let step_at = rng.gen_range(0.1..0.9);
    let step = rng.gen_range(-0.3..0.3);

    (0..n)
        .map(|i| {
            let x = i as f64 / n as f64;
            if j == 0 {
                (x - 0.5) + 0.4 * (-x / 0.04).exp()
            } else {
                let jump = if x >= step_at { step } else { 0.0 };
                (TAU * freq * x + phase).sin() + jump
            }
        })
        .collect()
}

/// Modified Gram-Schmidt on zero-mean copies of `raw`.
fn orthonormalize(raw: Vec<Vec<f64>>) -> Result<Vec<Vec<f64>>, AppError> {
    let mut out: Vec<Vec<f64>> = Vec::with_capacity(raw.len());
    for mut v in raw {
        let mean = v.iter().sum::<f64>() / v.len() as f64;
        v.iter_mut().for_each(|x| *x -= mean);
        for q in &out {
            let proj: f64 = v.iter().zip(q).map(|(a, b)| a * b).sum();
            v.iter_mut().zip(q).for_each(|(a, b)| *a -= proj * b);
        }
        let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm < 1e-9 {
            return Err(AppError::new(4, "Synthetic basis vectors are degenerate."));
        }
        v.iter_mut().for_each(|x| *x /= norm);
        out.push(v);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_data() {
        let config = SyntheticConfig {
            cadences: 400,
            vectors: 4,
            targets: 2,
            ..SyntheticConfig::default()
        };
        let a = generate(&config).unwrap();
        let b = generate(&config).unwrap();
        assert_eq!(a.basis.vector(3), b.basis.vector(3));
        for (x, y) in a.targets.iter().zip(&b.targets) {
            assert_eq!(x.true_coefficients, y.true_coefficients);
            let fx: Vec<u64> = x.series.flux().iter().map(|f| f.to_bits()).collect();
            let fy: Vec<u64> = y.series.flux().iter().map(|f| f.to_bits()).collect();
            assert_eq!(fx, fy);
        }
        assert_eq!(a.targets[1].series.label(), Some("synthetic-002"));
    }

    #[test]
    fn basis_is_orthonormal_and_zero_mean() {
        let config = SyntheticConfig {
            cadences: 500,
            vectors: 5,
            ..SyntheticConfig::default()
        };
        let data = generate(&config).unwrap();
        let ids = data.basis.ids().to_vec();
        for &a in &ids {
            let va = data.basis.vector(a).unwrap();
            assert!(va.iter().sum::<f64>().abs() < 1e-9);
            for &b in &ids {
                let vb = data.basis.vector(b).unwrap();
                let dot: f64 = va.iter().zip(vb).map(|(x, y)| x * y).sum();
                let expected = if a == b { 1.0 } else { 0.0 };
                assert!((dot - expected).abs() < 1e-9, "<{a},{b}> = {dot}");
            }
        }
    }

    #[test]
    fn targets_carry_flags_and_gaps() {
        let data = generate(&SyntheticConfig {
            cadences: 1000,
            vectors: 3,
            ..SyntheticConfig::default()
        })
        .unwrap();
        let s = &data.targets[0].series;
        assert_eq!(s.len(), 1000);
        assert_eq!(s.cadence()[0], FIRST_CADENCE);
        assert!(s.quality().iter().any(|q| q & DESAT != 0));
        assert!(s.quality().iter().any(|q| q & SAFE_MODE != 0));
        assert!(s.flux().iter().any(|f| f.is_nan()));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = generate(&SyntheticConfig {
            vectors: 0,
            ..SyntheticConfig::default()
        })
        .unwrap_err();
        assert_eq!(err.exit_code(), 2);

        let err = generate(&SyntheticConfig {
            outlier_fraction: 0.7,
            ..SyntheticConfig::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("Outlier"));
    }
}
