//! Treatment assignment.
//!
//! Three designs:
//!   - RandomDays: independent Bernoulli(p) draw per observation.
//!   - Alert:      a pollutant crossing a jittered quantile threshold;
//!                 only observations inside a quantile band around the
//!                 threshold are defined, the rest are Undefined. The
//!                 band is split so that a share p of it lies above
//!                 the threshold.
//!   - None:       every observation treated (no quasi-experiment).
//!
//! Undefined observations are kept in the assignment vector so that
//! it always lines up with the sample rows. Estimation drops them.

use crate::{
    error::{invalid_parameter, SimResult},
    panel::{Column, Observation},
    rng::ReplicateRng,
};
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "design", rename_all = "snake_case")]
pub enum TreatmentDesign {
    RandomDays { p: f64 },
    Alert { column: Column, p: f64 },
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assignment {
    Treated,
    Control,
    Undefined,
}

impl Assignment {
    pub fn is_treated(&self) -> bool {
        matches!(self, Assignment::Treated)
    }

    pub fn is_defined(&self) -> bool {
        !matches!(self, Assignment::Undefined)
    }

    /// Treatment dummy; Undefined maps to 0 but is never estimated on.
    pub fn dummy(&self) -> f64 {
        if self.is_treated() {
            1.0
        } else {
            0.0
        }
    }
}

/// The alert threshold drawn for one replicate, in both quantile
/// and pollutant units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertThreshold {
    pub quantile: f64,
    /// Total band width in quantile units, at most 1.
    pub bandwidth: f64,
    pub threshold: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone)]
pub struct TreatmentDraw {
    pub assignments: Vec<Assignment>,
    /// Present for the Alert design only.
    pub threshold: Option<AlertThreshold>,
}

impl TreatmentDraw {
    /// Treated share of the whole sample, Undefined rows included
    /// in the denominator.
    pub fn realized_proportion(&self) -> f64 {
        realized_proportion(&self.assignments)
    }
}

pub fn assign(
    design: TreatmentDesign,
    rows: &[&Observation],
    rng: &mut ReplicateRng,
) -> SimResult<TreatmentDraw> {
    match design {
        TreatmentDesign::RandomDays { p } => {
            check_proportion(p)?;
            Ok(TreatmentDraw {
                assignments: assign_bernoulli(rows.len(), p, rng),
                threshold: None,
            })
        }
        TreatmentDesign::Alert { column, p } => {
            check_proportion(p)?;
            let values = rows
                .iter()
                .map(|row| row.require(column))
                .collect::<SimResult<Vec<f64>>>()?;
            let (assignments, threshold) = assign_alert(&values, p, rng);
            Ok(TreatmentDraw {
                assignments,
                threshold: Some(threshold),
            })
        }
        TreatmentDesign::None => Ok(TreatmentDraw {
            assignments: vec![Assignment::Treated; rows.len()],
            threshold: None,
        }),
    }
}

pub fn assign_bernoulli(n: usize, p: f64, rng: &mut ReplicateRng) -> Vec<Assignment> {
    (0..n)
        .map(|_| {
            if rng.chance(p) {
                Assignment::Treated
            } else {
                Assignment::Control
            }
        })
        .collect()
}

/// Threshold assignment on a running variable.
///
/// The band width is `w = min(2p, 1)` in quantile space. Control is
/// `[q(τ - (1-p)w), q(τ)]` and treated is `(q(τ), q(τ + pw)]`, so the
/// treated share among defined observations is p. The threshold
/// position τ is drawn in `[(1-p)w, 1 - pw]`, which keeps the band
/// inside the quantile range.
pub fn assign_alert(
    values: &[f64],
    p: f64,
    rng: &mut ReplicateRng,
) -> (Vec<Assignment>, AlertThreshold) {
    let bandwidth = (2.0 * p).min(1.0);
    let below = (1.0 - p) * bandwidth;
    let above = p * bandwidth;
    let quantile = rng.uniform(below, (1.0 - above).max(below));

    let mut data = Data::new(values.to_vec());
    let mut at = |prob: f64| {
        if values.is_empty() {
            f64::NAN
        } else {
            data.quantile(prob.clamp(0.0, 1.0))
        }
    };
    let threshold = AlertThreshold {
        quantile,
        bandwidth,
        threshold: at(quantile),
        lower: at(quantile - below),
        upper: at(quantile + above),
    };

    let assignments = values
        .iter()
        .map(|&v| {
            if v > threshold.threshold && v <= threshold.upper {
                Assignment::Treated
            } else if v >= threshold.lower && v <= threshold.threshold {
                Assignment::Control
            } else {
                Assignment::Undefined
            }
        })
        .collect();
    (assignments, threshold)
}

pub fn realized_proportion(assignments: &[Assignment]) -> f64 {
    if assignments.is_empty() {
        return 0.0;
    }
    let treated = assignments.iter().filter(|a| a.is_treated()).count();
    treated as f64 / assignments.len() as f64
}

fn check_proportion(p: f64) -> SimResult<()> {
    if p > 0.0 && p <= 1.0 {
        Ok(())
    } else {
        Err(invalid_parameter("p_treat", format!("{p} is outside (0, 1]")))
    }
}
