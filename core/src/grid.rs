//! Parameter grid construction.
//!
//! A grid is built from one baseline cell and optional vectors of
//! alternative values per dimension. Two modes:
//!   - Full:        Cartesian product; a dimension without a vector
//!                  contributes its baseline value only.
//!   - OneAtATime:  the baseline, then every single-dimension
//!                  variation around it.
//! Duplicate cells are removed, first occurrence wins, so cell order
//! (and therefore cell indices and seeds) is stable for a given config.

use crate::model::IdentificationMethod;
use serde::{Deserialize, Serialize};

/// One simulation scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterCell {
    pub n_days: usize,
    pub n_cities: usize,
    pub p_treat: f64,
    pub percent_effect: f64,
    pub method: IdentificationMethod,
    pub iv_strength: f64,
    /// Name of a model specification in the configuration.
    pub formula: String,
}

impl ParameterCell {
    /// Stable textual key, used to match stored cells and group summaries.
    pub fn key(&self) -> String {
        format!(
            "days={}|cities={}|p={}|effect={}|method={}|iv={}|formula={}",
            self.n_days,
            self.n_cities,
            self.p_treat,
            self.percent_effect,
            self.method.name(),
            self.iv_strength,
            self.formula
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterOverrides {
    #[serde(default)]
    pub n_days: Option<Vec<usize>>,
    #[serde(default)]
    pub n_cities: Option<Vec<usize>>,
    #[serde(default)]
    pub p_treat: Option<Vec<f64>>,
    #[serde(default)]
    pub percent_effect: Option<Vec<f64>>,
    #[serde(default)]
    pub method: Option<Vec<IdentificationMethod>>,
    #[serde(default)]
    pub iv_strength: Option<Vec<f64>>,
    #[serde(default)]
    pub formula: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridMode {
    #[default]
    Full,
    OneAtATime,
}

pub fn build_grid(
    baseline: &ParameterCell,
    overrides: &ParameterOverrides,
    mode: GridMode,
) -> Vec<ParameterCell> {
    let cells = match mode {
        GridMode::Full => full_grid(baseline, overrides),
        GridMode::OneAtATime => one_at_a_time(baseline, overrides),
    };
    dedup_preserving_order(cells)
}

fn values_or<T: Clone>(vector: &Option<Vec<T>>, baseline: &T) -> Vec<T> {
    match vector {
        Some(v) if !v.is_empty() => v.clone(),
        _ => vec![baseline.clone()],
    }
}

fn full_grid(b: &ParameterCell, o: &ParameterOverrides) -> Vec<ParameterCell> {
    let mut cells = Vec::new();
    for n_days in values_or(&o.n_days, &b.n_days) {
        for n_cities in values_or(&o.n_cities, &b.n_cities) {
            for p_treat in values_or(&o.p_treat, &b.p_treat) {
                for percent_effect in values_or(&o.percent_effect, &b.percent_effect) {
                    for method in values_or(&o.method, &b.method) {
                        for iv_strength in values_or(&o.iv_strength, &b.iv_strength) {
                            for formula in values_or(&o.formula, &b.formula) {
                                cells.push(ParameterCell {
                                    n_days,
                                    n_cities,
                                    p_treat,
                                    percent_effect,
                                    method,
                                    iv_strength,
                                    formula,
                                });
                            }
                        }
                    }
                }
            }
        }
    }
    cells
}

fn one_at_a_time(b: &ParameterCell, o: &ParameterOverrides) -> Vec<ParameterCell> {
    let mut cells = vec![b.clone()];
    let vary = |cells: &mut Vec<ParameterCell>, f: &dyn Fn(&mut ParameterCell)| {
        let mut cell = b.clone();
        f(&mut cell);
        cells.push(cell);
    };
    for &v in o.n_days.iter().flatten() {
        vary(&mut cells, &|c: &mut ParameterCell| c.n_days = v);
    }
    for &v in o.n_cities.iter().flatten() {
        vary(&mut cells, &|c: &mut ParameterCell| c.n_cities = v);
    }
    for &v in o.p_treat.iter().flatten() {
        vary(&mut cells, &|c: &mut ParameterCell| c.p_treat = v);
    }
    for &v in o.percent_effect.iter().flatten() {
        vary(&mut cells, &|c: &mut ParameterCell| c.percent_effect = v);
    }
    for &v in o.method.iter().flatten() {
        vary(&mut cells, &|c: &mut ParameterCell| c.method = v);
    }
    for &v in o.iv_strength.iter().flatten() {
        vary(&mut cells, &|c: &mut ParameterCell| c.iv_strength = v);
    }
    for v in o.formula.iter().flatten() {
        vary(&mut cells, &|c: &mut ParameterCell| c.formula = v.clone());
    }
    cells
}

fn dedup_preserving_order(cells: Vec<ParameterCell>) -> Vec<ParameterCell> {
    let mut unique: Vec<ParameterCell> = Vec::with_capacity(cells.len());
    for cell in cells {
        if !unique.contains(&cell) {
            unique.push(cell);
        }
    }
    unique
}
