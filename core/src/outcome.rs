//! Synthetic outcome generation.
//!
//! Each replicate perturbs the real outcome by a known effect, so the
//! estimate can later be compared to ground truth. The recipe depends
//! on the identification method:
//!   - ReducedForm / Rdd: treated rows gain a Poisson(λ) count with
//!     λ = percent_effect% of the mean outcome.
//!   - Ols: the exposure coefficient of a fitted model is replaced by
//!     the target β and the residuals are permuted.
//!   - Iv:  the exposure is shifted by γ = iv_strength · sd(x) on
//!     instrumented rows and the outcome by β · γ on the same rows.
//!
//! β is expressed per unit of exposure: percent_effect% of the mean
//! outcome for a one-standard-deviation increase in the exposure.
//!
//! RULE: every output series has the length and order of the sample rows.

use crate::{
    error::{SimError, SimResult},
    estimate::{self, NamedColumn},
    model::{IdentificationMethod, ModelSpec},
    panel::Observation,
    rng::ReplicateRng,
    stats,
    treatment::{AlertThreshold, Assignment, TreatmentDraw},
};
use rand::seq::SliceRandom;

#[derive(Debug, Clone)]
pub struct SyntheticData {
    /// Synthetic outcome, one value per sample row.
    pub outcome: Vec<f64>,
    /// Exposure as seen by the estimator (perturbed under IV).
    /// NaN where the exposure is missing and not needed.
    pub exposure: Vec<f64>,
    pub assignments: Vec<Assignment>,
    pub threshold: Option<AlertThreshold>,
    /// The effect the data was generated with, in the units of the
    /// coefficient the estimator reports.
    pub true_effect: f64,
}

impl SyntheticData {
    pub fn len(&self) -> usize {
        self.outcome.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcome.is_empty()
    }
}

pub fn generate(
    rows: &[&Observation],
    draw: TreatmentDraw,
    spec: &ModelSpec,
    method: IdentificationMethod,
    percent_effect: f64,
    iv_strength: f64,
    rng: &mut ReplicateRng,
) -> SimResult<SyntheticData> {
    if draw.assignments.len() != rows.len() {
        return Err(SimError::InvalidModel {
            reason: format!(
                "{} assignments for {} sample rows",
                draw.assignments.len(),
                rows.len()
            ),
        });
    }
    let y = rows
        .iter()
        .map(|row| row.require(spec.outcome()))
        .collect::<SimResult<Vec<f64>>>()?;
    let mean_y = stats::mean(&y).ok_or_else(|| SimError::EmptySample {
        reason: "no rows to generate an outcome for".to_string(),
    })?;

    let exposure = if method == IdentificationMethod::ReducedForm {
        rows.iter()
            .map(|row| row.value(spec.exposure()).unwrap_or(f64::NAN))
            .collect()
    } else {
        rows.iter()
            .map(|row| row.require(spec.exposure()))
            .collect::<SimResult<Vec<f64>>>()?
    };

    match method {
        IdentificationMethod::ReducedForm | IdentificationMethod::Rdd => {
            let lambda = percent_effect / 100.0 * mean_y;
            let (outcome, true_effect) = add_poisson_effect(&y, &draw.assignments, lambda, rng);
            Ok(SyntheticData {
                outcome,
                exposure,
                assignments: draw.assignments,
                threshold: draw.threshold,
                true_effect,
            })
        }
        IdentificationMethod::Ols => {
            let beta = coefficient_for(percent_effect, mean_y, &exposure)?;
            let keep = vec![true; rows.len()];
            let input = spec.regression_input(
                rows,
                &keep,
                &y,
                NamedColumn::new(spec.exposure().name(), exposure.clone()),
                None,
                Vec::new(),
            )?;
            let (beta_hat, residuals) = estimate::fit_ols_residuals(&input)?;
            let mut permuted = residuals.clone();
            permuted.shuffle(rng);
            let outcome = (0..rows.len())
                .map(|i| y[i] + (beta - beta_hat) * exposure[i] - residuals[i] + permuted[i])
                .collect();
            Ok(SyntheticData {
                outcome,
                exposure,
                assignments: draw.assignments,
                threshold: draw.threshold,
                true_effect: beta,
            })
        }
        IdentificationMethod::Iv => {
            let beta = coefficient_for(percent_effect, mean_y, &exposure)?;
            let gamma = iv_strength * sd_of(&exposure)?;
            let shifted: Vec<f64> = exposure
                .iter()
                .zip(&draw.assignments)
                .map(|(x, a)| x + gamma * a.dummy())
                .collect();
            let outcome = y
                .iter()
                .zip(&draw.assignments)
                .map(|(v, a)| v + beta * gamma * a.dummy())
                .collect();
            Ok(SyntheticData {
                outcome,
                exposure: shifted,
                assignments: draw.assignments,
                threshold: draw.threshold,
                true_effect: beta,
            })
        }
    }
}

/// Add a Poisson(λ) count to every treated row. Returns the new series
/// and the mean count actually added to treated rows.
pub fn add_poisson_effect(
    y: &[f64],
    assignments: &[Assignment],
    lambda: f64,
    rng: &mut ReplicateRng,
) -> (Vec<f64>, f64) {
    let mut added_total = 0.0;
    let mut n_treated = 0usize;
    let outcome = y
        .iter()
        .zip(assignments)
        .map(|(&v, a)| {
            if a.is_treated() {
                let added = rng.poisson(lambda) as f64;
                added_total += added;
                n_treated += 1;
                v + added
            } else {
                v
            }
        })
        .collect();
    let true_effect = if n_treated > 0 {
        added_total / n_treated as f64
    } else {
        0.0
    };
    (outcome, true_effect)
}

fn sd_of(exposure: &[f64]) -> SimResult<f64> {
    match stats::sample_sd(exposure) {
        Some(sd) if sd > 0.0 && sd.is_finite() => Ok(sd),
        _ => Err(SimError::EmptySample {
            reason: "exposure has no variation in the sample".to_string(),
        }),
    }
}

fn coefficient_for(percent_effect: f64, mean_y: f64, exposure: &[f64]) -> SimResult<f64> {
    Ok(percent_effect / 100.0 * mean_y / sd_of(exposure)?)
}
