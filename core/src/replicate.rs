//! One Monte Carlo replicate: sample → assign → synthesize → estimate.
//!
//! A replicate is a pure function of (panel, cell, model, rng).
//! It touches no shared state, so the driver can run any number
//! of them concurrently.

use crate::{
    error::SimResult,
    estimate::{self, Estimate, NamedColumn},
    grid::ParameterCell,
    model::{IdentificationMethod, ModelSpec},
    outcome::{self, SyntheticData},
    panel::{Observation, Panel},
    rng::ReplicateRng,
    sampler::sample_study,
    treatment,
    types::{CellIndex, ReplicateIndex},
};
use serde::{Deserialize, Serialize};

/// Result of one successful replicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicateResult {
    pub cell_index: CellIndex,
    pub replicate: ReplicateIndex,
    pub estimate: f64,
    pub std_error: f64,
    pub p_value: f64,
    pub n_obs: usize,
    /// The effect the synthetic data was generated with.
    pub true_effect: f64,
    pub first_stage_f: Option<f64>,
    /// Treated share of the sampled rows, undefined rows included.
    pub proportion_treated: f64,
}

/// A replicate that failed numerically and is dropped from aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicateFailure {
    pub cell_index: CellIndex,
    pub replicate: ReplicateIndex,
    pub kind: String,
    pub message: String,
}

pub fn run_replicate(
    panel: &Panel,
    cell_index: CellIndex,
    replicate: ReplicateIndex,
    cell: &ParameterCell,
    spec: &ModelSpec,
    rng: &mut ReplicateRng,
) -> SimResult<ReplicateResult> {
    let sample = sample_study(panel, cell.n_days, cell.n_cities, rng)?;
    let design = cell.method.treatment_design(cell.p_treat, spec.exposure());
    let draw = treatment::assign(design, &sample.rows, rng)?;
    let proportion_treated = draw.realized_proportion();
    let data = outcome::generate(
        &sample.rows,
        draw,
        spec,
        cell.method,
        cell.percent_effect,
        cell.iv_strength,
        rng,
    )?;
    let estimate = estimate_synthetic(&sample.rows, &data, spec, cell.method)?;

    Ok(ReplicateResult {
        cell_index,
        replicate,
        estimate: estimate.coefficient,
        std_error: estimate.std_error,
        p_value: estimate.p_value,
        n_obs: estimate.n_obs,
        true_effect: data.true_effect,
        first_stage_f: estimate.first_stage_f,
        proportion_treated,
    })
}

/// Re-estimate the effect on synthetic data. Undefined rows are dropped.
pub fn estimate_synthetic(
    rows: &[&Observation],
    data: &SyntheticData,
    spec: &ModelSpec,
    method: IdentificationMethod,
) -> SimResult<Estimate> {
    let keep: Vec<bool> = data.assignments.iter().map(|a| a.is_defined()).collect();
    let treated: Vec<f64> = data.assignments.iter().map(|a| a.dummy()).collect();

    let (regressor, instrument, extra_controls) = match method {
        IdentificationMethod::ReducedForm => {
            (NamedColumn::new("treated", treated), None, Vec::new())
        }
        IdentificationMethod::Rdd => {
            let cutoff = data.threshold.map(|t| t.threshold).unwrap_or(0.0);
            let running = data.exposure.iter().map(|x| x - cutoff).collect();
            (
                NamedColumn::new("treated", treated),
                None,
                vec![NamedColumn::new("running", running)],
            )
        }
        IdentificationMethod::Ols => (
            NamedColumn::new(spec.exposure().name(), data.exposure.clone()),
            None,
            Vec::new(),
        ),
        IdentificationMethod::Iv => (
            NamedColumn::new(spec.exposure().name(), data.exposure.clone()),
            Some(NamedColumn::new("instrument", treated)),
            Vec::new(),
        ),
    };

    let input = spec.regression_input(
        rows,
        &keep,
        &data.outcome,
        regressor,
        instrument,
        extra_controls,
    )?;
    estimate::fit(&input)
}
