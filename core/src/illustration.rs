//! The "mad scientist" illustration.
//!
//! A lone researcher randomizes treatment over a year of daily death
//! counts drawn from a negative binomial, adds a tiny true effect to
//! treated days and estimates it with a difference in means. Repeated
//! many times, the significant estimates are several times too large
//! and a visible share of them have the wrong sign.

use crate::{
    config::IllustrationConfig,
    error::{invalid_parameter, SimResult},
    estimate::{self, NamedColumn, RegressionInput},
    grid::ParameterCell,
    model::IdentificationMethod,
    replicate::ReplicateResult,
    rng::{ReplicateRng, SeedBank, StreamSlot},
    summary::{summarize_cell, SummaryRecord},
    treatment::assign_bernoulli,
    types::ReplicateIndex,
};
use rand::RngCore;
use rayon::prelude::*;

/// Run the illustration. Replicates where one arm ends up with fewer
/// than two days cannot be estimated and are counted as failed.
pub fn mad_scientist(
    config: &IllustrationConfig,
    seed: u64,
    alpha: f64,
) -> SimResult<SummaryRecord> {
    if config.n_days < 2 || config.n_reps == 0 {
        return Err(invalid_parameter(
            "illustration",
            "needs at least 2 days and 1 repetition",
        ));
    }
    let base_seed = SeedBank::new(seed)
        .for_stream(StreamSlot::Illustration)
        .next_u64();

    let outcomes: Vec<Option<ReplicateResult>> = (0..config.n_reps)
        .into_par_iter()
        .map(|rep| {
            let mut rng = ReplicateRng::new(base_seed, 0, rep);
            one_replicate(config, rep, &mut rng)
        })
        .collect();

    let n_failed = outcomes.iter().filter(|o| o.is_none()).count() as u64;
    let results: Vec<&ReplicateResult> = outcomes.iter().flatten().collect();
    let cell = ParameterCell {
        n_days: config.n_days,
        n_cities: 1,
        p_treat: config.p_treat,
        percent_effect: 100.0 * config.effect / config.mean_deaths,
        method: IdentificationMethod::ReducedForm,
        iv_strength: 0.0,
        formula: "difference_in_means".to_string(),
    };
    let summary = summarize_cell(0, &cell, &results, n_failed, alpha);
    log::info!(
        "mad scientist: power={:?} type_m={:?} type_s={:?} over {} replicates",
        summary.power,
        summary.type_m,
        summary.type_s,
        summary.n_valid
    );
    Ok(summary)
}

fn one_replicate(
    config: &IllustrationConfig,
    rep: ReplicateIndex,
    rng: &mut ReplicateRng,
) -> Option<ReplicateResult> {
    let assignments = assign_bernoulli(config.n_days, config.p_treat, rng);
    let deaths: Vec<f64> = assignments
        .iter()
        .map(|a| rng.neg_binomial(config.mean_deaths, config.dispersion) as f64 + config.effect * a.dummy())
        .collect();
    let n_treated = assignments.iter().filter(|a| a.is_treated()).count();
    if n_treated < 2 || config.n_days - n_treated < 2 {
        return None;
    }

    let input = RegressionInput {
        dependent: deaths,
        regressor: NamedColumn::new("treated", assignments.iter().map(|a| a.dummy()).collect()),
        instrument: None,
        controls: Vec::new(),
        fixed_effects: Vec::new(),
    };
    let fit = estimate::fit(&input).ok()?;
    Some(ReplicateResult {
        cell_index: 0,
        replicate: rep,
        estimate: fit.coefficient,
        std_error: fit.std_error,
        p_value: fit.p_value,
        n_obs: fit.n_obs,
        true_effect: config.effect,
        first_stage_f: None,
        proportion_treated: n_treated as f64 / config.n_days as f64,
    })
}
