//! Linear and instrumented-linear estimation with fixed effects.
//!
//! RULE: The regressor of interest is always the first column of
//! the design. Only its coefficient, robust standard error and
//! p-value are reported, so only the first column of (X'X)⁻¹ is
//! ever solved for.
//!
//! Fixed effects enter as 0/1 dummies (first level of each group
//! dropped, intercept kept). Dummies are stored as the active column
//! index per row, so X'X costs O(n · nnz²) instead of O(n · k²). The
//! normal equations are then factored with nalgebra.

use crate::error::{SimError, SimResult};
use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use std::collections::{BTreeMap, BTreeSet};

/// Relative pivot tolerance below which a column is considered
/// a linear combination of the ones before it.
const PIVOT_TOLERANCE: f64 = 1e-10;

#[derive(Debug, Clone)]
pub struct NamedColumn {
    pub name: String,
    pub values: Vec<f64>,
}

impl NamedColumn {
    pub fn new(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GroupColumn {
    pub name: String,
    pub labels: Vec<String>,
}

/// Everything the estimator needs, already restricted to the rows
/// that enter the regression.
#[derive(Debug, Clone)]
pub struct RegressionInput {
    pub dependent: Vec<f64>,
    pub regressor: NamedColumn,
    /// Excluded instrument for the regressor (two-stage least squares).
    pub instrument: Option<NamedColumn>,
    pub controls: Vec<NamedColumn>,
    pub fixed_effects: Vec<GroupColumn>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub coefficient: f64,
    pub std_error: f64,
    pub t_stat: f64,
    pub p_value: f64,
    pub n_obs: usize,
    pub df_resid: usize,
    /// Robust Wald F of the excluded instrument (IV only).
    pub first_stage_f: Option<f64>,
}

impl Estimate {
    /// Two-sided confidence interval using the normal critical value.
    pub fn confidence_interval(&self, z: f64) -> (f64, f64) {
        (
            self.coefficient - z * self.std_error,
            self.coefficient + z * self.std_error,
        )
    }
}

/// Fit the model: OLS when there is no instrument, 2SLS otherwise.
pub fn fit(input: &RegressionInput) -> SimResult<Estimate> {
    let n = input.dependent.len();
    check_lengths(input, n)?;
    let exog = Exogenous::build(&input.controls, &input.fixed_effects, n);
    let k = 1 + exog.width();
    if n <= k {
        return Err(SimError::EmptySample {
            reason: format!("{n} observations for {k} parameters"),
        });
    }

    match &input.instrument {
        None => {
            let design = Design::new(&input.regressor, &exog);
            let fit = LeastSquares::solve(&design, &input.dependent)?;
            let residuals = design.residuals(&input.dependent, &fit.beta);
            let se = fit.robust_se_first(&design, &residuals);
            finish(fit.beta[0], se, n, k, None)
        }
        Some(instrument) => {
            let first_design = Design::new(instrument, &exog);
            let first = LeastSquares::solve(&first_design, &input.regressor.values)?;
            let first_residuals = first_design.residuals(&input.regressor.values, &first.beta);
            let first_se = first.robust_se_first(&first_design, &first_residuals);
            let first_stage_f = (first.beta[0] / first_se).powi(2);

            let fitted = NamedColumn::new(
                input.regressor.name.clone(),
                (0..n)
                    .map(|i| first_design.dot_row(i, first.beta.as_slice()))
                    .collect(),
            );
            let second_design = Design::new(&fitted, &exog);
            let second = LeastSquares::solve(&second_design, &input.dependent)?;
            // Structural residuals use the observed regressor, not its projection.
            let structural = Design::new(&input.regressor, &exog);
            let residuals = structural.residuals(&input.dependent, &second.beta);
            let se = second.robust_se_first(&second_design, &residuals);
            finish(second.beta[0], se, n, k, Some(first_stage_f))
        }
    }
}

/// Plain OLS returning the coefficient of interest together with the
/// residuals of every row, for re-parameterising a fitted model.
pub fn fit_ols_residuals(input: &RegressionInput) -> SimResult<(f64, Vec<f64>)> {
    let n = input.dependent.len();
    check_lengths(input, n)?;
    let exog = Exogenous::build(&input.controls, &input.fixed_effects, n);
    let k = 1 + exog.width();
    if n <= k {
        return Err(SimError::EmptySample {
            reason: format!("{n} observations for {k} parameters"),
        });
    }
    let design = Design::new(&input.regressor, &exog);
    let fit = LeastSquares::solve(&design, &input.dependent)?;
    let residuals = design.residuals(&input.dependent, &fit.beta);
    Ok((fit.beta[0], residuals))
}

fn check_lengths(input: &RegressionInput, n: usize) -> SimResult<()> {
    let mismatch = |name: &str, len: usize| SimError::InvalidModel {
        reason: format!("column '{name}' has {len} rows, dependent has {n}"),
    };
    if input.regressor.values.len() != n {
        return Err(mismatch(&input.regressor.name, input.regressor.values.len()));
    }
    if let Some(z) = &input.instrument {
        if z.values.len() != n {
            return Err(mismatch(&z.name, z.values.len()));
        }
    }
    for c in &input.controls {
        if c.values.len() != n {
            return Err(mismatch(&c.name, c.values.len()));
        }
    }
    for g in &input.fixed_effects {
        if g.labels.len() != n {
            return Err(mismatch(&g.name, g.labels.len()));
        }
    }
    Ok(())
}

fn finish(
    coefficient: f64,
    std_error: f64,
    n: usize,
    k: usize,
    first_stage_f: Option<f64>,
) -> SimResult<Estimate> {
    if !std_error.is_finite() || !coefficient.is_finite() {
        return Err(SimError::RankDeficient {
            column: "regressor of interest".to_string(),
        });
    }
    if std_error <= 0.0 {
        return Err(SimError::DegenerateFit {
            reason: format!("zero standard error for coefficient {coefficient}"),
        });
    }
    let df_resid = n - k;
    let t_stat = coefficient / std_error;
    Ok(Estimate {
        coefficient,
        std_error,
        t_stat,
        p_value: two_sided_p(t_stat, df_resid),
        n_obs: n,
        df_resid,
        first_stage_f,
    })
}

/// Two-sided p-value of a t statistic with `df` degrees of freedom.
pub fn two_sided_p(t_stat: f64, df: usize) -> f64 {
    if !t_stat.is_finite() {
        return 0.0;
    }
    match StudentsT::new(0.0, 1.0, df.max(1) as f64) {
        Ok(dist) => (2.0 * (1.0 - dist.cdf(t_stat.abs()))).clamp(0.0, 1.0),
        Err(_) => f64::NAN,
    }
}

/// Intercept, controls and fixed-effect dummies shared by every stage.
struct Exogenous<'a> {
    names: Vec<String>,
    dense: Vec<&'a [f64]>,
    /// Per fixed effect, per row: the dummy column (relative to the
    /// first dummy) or None for the dropped base level.
    dummies: Vec<Vec<Option<usize>>>,
    n_dummies: usize,
}

impl<'a> Exogenous<'a> {
    fn build(controls: &'a [NamedColumn], groups: &[GroupColumn], n: usize) -> Self {
        let mut names = vec!["(intercept)".to_string()];
        let mut dense: Vec<&'a [f64]> = Vec::with_capacity(controls.len());
        for c in controls {
            names.push(c.name.clone());
            dense.push(&c.values);
        }

        let mut dummies = Vec::with_capacity(groups.len());
        let mut next = 0usize;
        for group in groups {
            let levels: BTreeSet<&str> = group.labels.iter().map(String::as_str).collect();
            let mut index: BTreeMap<&str, Option<usize>> = BTreeMap::new();
            for (i, &level) in levels.iter().enumerate() {
                if i == 0 {
                    index.insert(level, None);
                } else {
                    names.push(format!("{}::{}", group.name, level));
                    index.insert(level, Some(next));
                    next += 1;
                }
            }
            let column: Vec<Option<usize>> = (0..n)
                .map(|i| index.get(group.labels[i].as_str()).copied().flatten())
                .collect();
            dummies.push(column);
        }

        Self {
            names,
            dense,
            dummies,
            n_dummies: next,
        }
    }

    /// Number of exogenous columns, intercept included.
    fn width(&self) -> usize {
        1 + self.dense.len() + self.n_dummies
    }
}

/// A design whose first column is the regressor of interest.
struct Design<'a, 'e> {
    first: &'a [f64],
    exog: &'e Exogenous<'e>,
    names: Vec<String>,
}

impl<'a, 'e> Design<'a, 'e> {
    fn new(first: &'a NamedColumn, exog: &'e Exogenous<'e>) -> Self {
        let mut names = Vec::with_capacity(1 + exog.width());
        names.push(first.name.clone());
        names.extend(exog.names.iter().cloned());
        Self {
            first: &first.values,
            exog,
            names,
        }
    }

    fn k(&self) -> usize {
        self.names.len()
    }

    fn n(&self) -> usize {
        self.first.len()
    }

    /// Non-zero entries of row i as (column, value).
    fn row_entries(&self, i: usize, out: &mut Vec<(usize, f64)>) {
        out.clear();
        out.push((0, self.first[i]));
        out.push((1, 1.0));
        for (j, col) in self.exog.dense.iter().enumerate() {
            out.push((2 + j, col[i]));
        }
        let dummy_base = 2 + self.exog.dense.len();
        for group in &self.exog.dummies {
            if let Some(d) = group[i] {
                out.push((dummy_base + d, 1.0));
            }
        }
    }

    fn dot_row(&self, i: usize, coef: &[f64]) -> f64 {
        let mut acc = self.first[i] * coef[0] + coef[1];
        for (j, col) in self.exog.dense.iter().enumerate() {
            acc += col[i] * coef[2 + j];
        }
        let dummy_base = 2 + self.exog.dense.len();
        for group in &self.exog.dummies {
            if let Some(d) = group[i] {
                acc += coef[dummy_base + d];
            }
        }
        acc
    }

    fn residuals(&self, y: &[f64], beta: &DVector<f64>) -> Vec<f64> {
        (0..self.n())
            .map(|i| y[i] - self.dot_row(i, beta.as_slice()))
            .collect()
    }

    /// X'X and X'y. Only the lower triangle is accumulated.
    fn cross_products(&self, y: &[f64]) -> (DMatrix<f64>, DVector<f64>) {
        let k = self.k();
        let mut xtx = DMatrix::<f64>::zeros(k, k);
        let mut xty = DVector::<f64>::zeros(k);
        let mut entries = Vec::with_capacity(k.min(64));
        for i in 0..self.n() {
            self.row_entries(i, &mut entries);
            for &(a, va) in &entries {
                xty[a] += va * y[i];
                for &(b, vb) in &entries {
                    if b <= a {
                        xtx[(a, b)] += va * vb;
                    }
                }
            }
        }
        xtx.fill_upper_triangle_with_lower_triangle();
        (xtx, xty)
    }
}

struct LeastSquares {
    beta: DVector<f64>,
    /// First column of (X'X)⁻¹.
    inv_first: DVector<f64>,
}

impl LeastSquares {
    fn solve(design: &Design<'_, '_>, y: &[f64]) -> SimResult<Self> {
        let (xtx, xty) = design.cross_products(y);
        let normal = NormalEquations::factor(&xtx).map_err(|j| SimError::RankDeficient {
            column: design.names[j].clone(),
        })?;
        let beta = normal.solve(&xty);
        let mut e0 = DVector::<f64>::zeros(design.k());
        e0[0] = 1.0;
        let inv_first = normal.solve(&e0);
        Ok(Self { beta, inv_first })
    }

    /// HC1 standard error of the first coefficient:
    /// sqrt(n/(n−k) · Σ uᵢ² (xᵢ·a)²) with a the first column of (X'X)⁻¹.
    fn robust_se_first(&self, design: &Design<'_, '_>, residuals: &[f64]) -> f64 {
        let n = design.n();
        let k = design.k();
        let meat: f64 = (0..n)
            .map(|i| {
                let h = design.dot_row(i, self.inv_first.as_slice());
                residuals[i] * residuals[i] * h * h
            })
            .sum();
        let correction = n as f64 / (n - k) as f64;
        (correction * meat).sqrt()
    }
}

/// Cholesky factor of X'X rescaled to a unit diagonal. Each squared
/// pivot is then the share of a column not explained by the columns
/// before it.
struct NormalEquations {
    chol: Cholesky<f64, Dyn>,
    scale: DVector<f64>,
}

impl NormalEquations {
    /// On failure returns the index of the first column whose pivot vanished.
    fn factor(xtx: &DMatrix<f64>) -> Result<Self, usize> {
        let k = xtx.nrows();
        let scale = DVector::from_iterator(
            k,
            xtx.diagonal()
                .iter()
                .map(|d| 1.0 / d.max(f64::MIN_POSITIVE).sqrt()),
        );
        let scaled = DMatrix::from_fn(k, k, |i, j| xtx[(i, j)] * scale[i] * scale[j]);
        match factor_checked(&scaled) {
            Some(chol) => Ok(Self { chol, scale }),
            None => Err(first_dependent_column(&scaled)),
        }
    }

    fn solve(&self, b: &DVector<f64>) -> DVector<f64> {
        let mut x = self.chol.solve(&b.component_mul(&self.scale));
        x.component_mul_assign(&self.scale);
        x
    }
}

fn factor_checked(a: &DMatrix<f64>) -> Option<Cholesky<f64, Dyn>> {
    let chol = a.clone().cholesky()?;
    let pivots_ok = chol
        .l_dirty()
        .diagonal()
        .iter()
        .all(|&d| d * d > PIVOT_TOLERANCE);
    pivots_ok.then_some(chol)
}

/// Leading blocks factor cleanly up to the first dependent column and
/// fail from there on, so that column is found by bisection.
fn first_dependent_column(a: &DMatrix<f64>) -> usize {
    let leading = |m: usize| DMatrix::from_fn(m, m, |i, j| a[(i, j)]);
    let (mut lo, mut hi) = (1, a.nrows());
    while lo < hi {
        let mid = (lo + hi) / 2;
        if factor_checked(&leading(mid)).is_some() {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo.saturating_sub(1)
}
