//! Aggregation of replicates into per-cell power, type M, type S
//! and coverage statistics.
//!
//! RULE: ratios are computed against the true effect each replicate
//! carries, never against another estimate. A ratio whose
//! denominator group is empty is None (exported as NA), not 0.

use crate::{
    grid::ParameterCell,
    replicate::{ReplicateFailure, ReplicateResult},
    types::CellIndex,
};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub cell_index: CellIndex,
    pub cell: ParameterCell,
    pub significance_level: f64,
    /// Replicates that produced an estimate.
    pub n_valid: u64,
    /// Replicates dropped after a numerical failure.
    pub n_failed: u64,
    pub n_significant: u64,
    /// Significant replicates with a non-zero true effect; the
    /// denominator of type M and type S.
    pub n_signed: u64,
    /// Replicates reporting a first-stage F statistic.
    pub n_f_stat: u64,
    pub power: Option<f64>,
    pub type_m: Option<f64>,
    pub type_s: Option<f64>,
    pub coverage_rate: Option<f64>,
    pub mean_f_stat: Option<f64>,
    pub mean_estimate: Option<f64>,
    pub mean_true_effect: Option<f64>,
    pub mean_std_error: Option<f64>,
    pub mean_proportion_treated: Option<f64>,
}

/// Critical value of a two-sided normal interval at level `alpha`.
pub fn normal_critical_value(alpha: f64) -> f64 {
    Normal::new(0.0, 1.0)
        .map(|n| n.inverse_cdf(1.0 - alpha / 2.0))
        .unwrap_or(1.959_963_984_540_054)
}

fn ratio(numerator: f64, denominator: u64) -> Option<f64> {
    if denominator == 0 {
        None
    } else {
        Some(numerator / denominator as f64)
    }
}

/// Summarize every cell. Cells without any replicate still get a
/// record (all ratios None) so failed scenarios stay visible.
pub fn summarize(
    cells: &[(CellIndex, ParameterCell)],
    replicates: &[ReplicateResult],
    failures: &[ReplicateFailure],
    alpha: f64,
) -> Vec<SummaryRecord> {
    let mut by_cell: HashMap<CellIndex, Vec<&ReplicateResult>> = HashMap::new();
    for r in replicates {
        by_cell.entry(r.cell_index).or_default().push(r);
    }
    let mut failed: HashMap<CellIndex, u64> = HashMap::new();
    for f in failures {
        *failed.entry(f.cell_index).or_default() += 1;
    }

    cells
        .iter()
        .map(|(index, cell)| {
            let rows = by_cell.get(index).map(Vec::as_slice).unwrap_or(&[]);
            summarize_cell(
                *index,
                cell,
                rows,
                failed.get(index).copied().unwrap_or(0),
                alpha,
            )
        })
        .collect()
}

pub fn summarize_cell(
    cell_index: CellIndex,
    cell: &ParameterCell,
    replicates: &[&ReplicateResult],
    n_failed: u64,
    alpha: f64,
) -> SummaryRecord {
    let z = normal_critical_value(alpha);
    let n_valid = replicates.len() as u64;

    let mut n_significant = 0u64;
    let mut n_signed = 0u64;
    let mut exaggeration_sum = 0.0;
    let mut wrong_sign = 0u64;
    let mut covered = 0u64;
    let mut n_f_stat = 0u64;
    let mut f_sum = 0.0;
    let mut estimate_sum = 0.0;
    let mut true_sum = 0.0;
    let mut se_sum = 0.0;
    let mut treated_sum = 0.0;

    for r in replicates {
        estimate_sum += r.estimate;
        true_sum += r.true_effect;
        se_sum += r.std_error;
        treated_sum += r.proportion_treated;

        let lower = r.estimate - z * r.std_error;
        let upper = r.estimate + z * r.std_error;
        if lower <= r.true_effect && r.true_effect <= upper {
            covered += 1;
        }
        if let Some(f) = r.first_stage_f {
            n_f_stat += 1;
            f_sum += f;
        }
        if r.p_value <= alpha {
            n_significant += 1;
            if r.true_effect != 0.0 {
                n_signed += 1;
                exaggeration_sum += (r.estimate / r.true_effect).abs();
                if r.estimate.signum() != r.true_effect.signum() {
                    wrong_sign += 1;
                }
            }
        }
    }

    SummaryRecord {
        cell_index,
        cell: cell.clone(),
        significance_level: alpha,
        n_valid,
        n_failed,
        n_significant,
        n_signed,
        n_f_stat,
        power: ratio(n_significant as f64, n_valid),
        type_m: ratio(exaggeration_sum, n_signed),
        type_s: ratio(wrong_sign as f64, n_signed),
        coverage_rate: ratio(covered as f64, n_valid),
        mean_f_stat: ratio(f_sum, n_f_stat),
        mean_estimate: ratio(estimate_sum, n_valid),
        mean_true_effect: ratio(true_sum, n_valid),
        mean_std_error: ratio(se_sum, n_valid),
        mean_proportion_treated: ratio(treated_sum, n_valid),
    }
}

/// Combine summaries of the same cell (e.g. runs split across machines),
/// weighting every statistic by its own denominator. A cell that
/// appears once is returned unchanged, so reaggregating an aggregated
/// table is the identity.
pub fn reaggregate(records: &[SummaryRecord]) -> Vec<SummaryRecord> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<&SummaryRecord>> = HashMap::new();
    for record in records {
        let key = format!("{}|alpha={}", record.cell.key(), record.significance_level);
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(record);
    }

    order
        .iter()
        .filter_map(|key| groups.get(key))
        .map(|group| match group.as_slice() {
            [single] => (*single).clone(),
            _ => combine(group),
        })
        .collect()
}

fn combine(group: &[&SummaryRecord]) -> SummaryRecord {
    let first = group[0];
    let sum = |f: &dyn Fn(&SummaryRecord) -> u64| group.iter().map(|r| f(r)).sum::<u64>();
    let weighted = |value: &dyn Fn(&SummaryRecord) -> Option<f64>,
                    weight: &dyn Fn(&SummaryRecord) -> u64| {
        let mut total = 0.0;
        let mut weights = 0u64;
        for r in group {
            if let Some(v) = value(r) {
                total += v * weight(r) as f64;
                weights += weight(r);
            }
        }
        ratio(total, weights)
    };

    SummaryRecord {
        cell_index: first.cell_index,
        cell: first.cell.clone(),
        significance_level: first.significance_level,
        n_valid: sum(&|r| r.n_valid),
        n_failed: sum(&|r| r.n_failed),
        n_significant: sum(&|r| r.n_significant),
        n_signed: sum(&|r| r.n_signed),
        n_f_stat: sum(&|r| r.n_f_stat),
        power: weighted(&|r| r.power, &|r| r.n_valid),
        type_m: weighted(&|r| r.type_m, &|r| r.n_signed),
        type_s: weighted(&|r| r.type_s, &|r| r.n_signed),
        coverage_rate: weighted(&|r| r.coverage_rate, &|r| r.n_valid),
        mean_f_stat: weighted(&|r| r.mean_f_stat, &|r| r.n_f_stat),
        mean_estimate: weighted(&|r| r.mean_estimate, &|r| r.n_valid),
        mean_true_effect: weighted(&|r| r.mean_true_effect, &|r| r.n_valid),
        mean_std_error: weighted(&|r| r.mean_std_error, &|r| r.n_valid),
        mean_proportion_treated: weighted(&|r| r.mean_proportion_treated, &|r| r.n_valid),
    }
}

/// CSV export, one row per cell. Missing ratios are written as NA.
pub fn to_csv(records: &[SummaryRecord]) -> String {
    let na = |v: Option<f64>| v.map(|x| format!("{x:.6}")).unwrap_or_else(|| "NA".into());
    let mut out = String::from(
        "cell_index,n_days,n_cities,p_treat,percent_effect,method,iv_strength,formula,\
         n_valid,n_failed,n_significant,power,type_m,type_s,coverage_rate,mean_f_stat,\
         mean_estimate,mean_true_effect,mean_std_error,mean_proportion_treated\n",
    );
    for r in records {
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}\n",
            r.cell_index,
            r.cell.n_days,
            r.cell.n_cities,
            r.cell.p_treat,
            r.cell.percent_effect,
            r.cell.method.name(),
            r.cell.iv_strength,
            csv_field(&r.cell.formula),
            r.n_valid,
            r.n_failed,
            r.n_significant,
            na(r.power),
            na(r.type_m),
            na(r.type_s),
            na(r.coverage_rate),
            na(r.mean_f_stat),
            na(r.mean_estimate),
            na(r.mean_true_effect),
            na(r.mean_std_error),
            na(r.mean_proportion_treated),
        ));
    }
    out
}

/// Quote a text field when it holds a separator, a quote or a line break.
fn csv_field(text: &str) -> String {
    if text.contains(|c| matches!(c, ',' | '"' | '\n' | '\r')) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}
