use crate::{
    error::{invalid_parameter, SimError, SimResult},
    grid::{build_grid, GridMode, ParameterCell, ParameterOverrides},
    model::{FixedEffect, IdentificationMethod, ModelSpec},
    panel::Column,
};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

fn default_significance_level() -> f64 {
    0.05
}

fn default_checkpoint_every() -> usize {
    500
}

/// Parameters of the negative-binomial "mad scientist" illustration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IllustrationConfig {
    pub n_days: usize,
    pub p_treat: f64,
    /// Deaths added to each treated day.
    pub effect: f64,
    pub mean_deaths: f64,
    pub dispersion: f64,
    pub n_reps: u64,
}

impl Default for IllustrationConfig {
    fn default() -> Self {
        Self {
            n_days: 366,
            p_treat: 0.5,
            effect: 1.0,
            mean_deaths: 106.0,
            dispersion: 38.0,
            n_reps: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    pub seed: u64,
    /// Monte Carlo repetitions per parameter cell.
    pub n_reps: u64,
    /// Replicates per parallel batch; each batch is one checkpoint.
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: usize,
    #[serde(default = "default_significance_level")]
    pub significance_level: f64,
    #[serde(default)]
    pub grid_mode: GridMode,
    pub baseline: ParameterCell,
    #[serde(default)]
    pub overrides: ParameterOverrides,
    pub formulas: BTreeMap<String, ModelSpec>,
    /// Worker threads; None lets rayon decide.
    #[serde(default)]
    pub threads: Option<usize>,
    #[serde(default)]
    pub illustration: IllustrationConfig,
}

impl SimConfig {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: SimConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    /// The parameter grid described by this configuration.
    pub fn cells(&self) -> Vec<ParameterCell> {
        build_grid(&self.baseline, &self.overrides, self.grid_mode)
    }

    pub fn formula(&self, name: &str) -> SimResult<&ModelSpec> {
        self.formulas.get(name).ok_or_else(|| SimError::InvalidModel {
            reason: format!("formula '{name}' is not defined"),
        })
    }

    pub fn validate(&self) -> SimResult<()> {
        if self.n_reps == 0 {
            return Err(invalid_parameter("n_reps", "must be at least 1"));
        }
        if self.checkpoint_every == 0 {
            return Err(invalid_parameter("checkpoint_every", "must be at least 1"));
        }
        if !(self.significance_level > 0.0 && self.significance_level < 1.0) {
            return Err(invalid_parameter(
                "significance_level",
                format!("{} is outside (0, 1)", self.significance_level),
            ));
        }
        if self.threads == Some(0) {
            return Err(invalid_parameter("threads", "must be at least 1"));
        }
        for cell in self.cells() {
            validate_cell(&cell)?;
            self.formula(&cell.formula)?;
        }
        let ill = &self.illustration;
        if ill.n_days < 2 || ill.n_reps == 0 {
            return Err(invalid_parameter(
                "illustration",
                "needs at least 2 days and 1 repetition",
            ));
        }
        if !(ill.p_treat > 0.0 && ill.p_treat < 1.0) {
            return Err(invalid_parameter("illustration.p_treat", "must be in (0, 1)"));
        }
        if !(ill.mean_deaths > 0.0 && ill.dispersion > 0.0) {
            return Err(invalid_parameter(
                "illustration",
                "mean_deaths and dispersion must be positive",
            ));
        }
        Ok(())
    }

    /// Config with hardcoded defaults for use in unit tests:
    /// a few cells, few repetitions, small checkpoints.
    pub fn default_test() -> Self {
        let mut formulas = BTreeMap::new();
        formulas.insert("baseline".to_string(), default_test_spec());
        Self {
            seed: 42,
            n_reps: 20,
            checkpoint_every: 15,
            significance_level: 0.05,
            grid_mode: GridMode::Full,
            baseline: ParameterCell {
                n_days: 200,
                n_cities: 3,
                p_treat: 0.5,
                percent_effect: 5.0,
                method: IdentificationMethod::ReducedForm,
                iv_strength: 0.5,
                formula: "baseline".to_string(),
            },
            overrides: ParameterOverrides {
                method: Some(vec![
                    IdentificationMethod::ReducedForm,
                    IdentificationMethod::Rdd,
                ]),
                ..ParameterOverrides::default()
            },
            formulas,
            threads: Some(2),
            illustration: IllustrationConfig {
                n_reps: 500,
                ..IllustrationConfig::default()
            },
        }
    }
}

fn default_test_spec() -> ModelSpec {
    ModelSpec::new(
        Column::DeathTotal,
        Column::Pm10,
        vec![Column::Temperature],
        vec![FixedEffect::City, FixedEffect::Month, FixedEffect::DayOfWeek],
    )
    .unwrap_or_else(|e| unreachable!("built-in test model is valid: {e}"))
}

fn validate_cell(cell: &ParameterCell) -> SimResult<()> {
    if cell.n_days == 0 {
        return Err(invalid_parameter("n_days", "must be at least 1"));
    }
    if cell.n_cities == 0 {
        return Err(invalid_parameter("n_cities", "must be at least 1"));
    }
    if !(cell.p_treat > 0.0 && cell.p_treat <= 1.0) {
        return Err(invalid_parameter(
            "p_treat",
            format!("{} is outside (0, 1]", cell.p_treat),
        ));
    }
    if !cell.percent_effect.is_finite() {
        return Err(invalid_parameter("percent_effect", "must be finite"));
    }
    if !(cell.iv_strength.is_finite() && cell.iv_strength >= 0.0) {
        return Err(invalid_parameter("iv_strength", "must be finite and non-negative"));
    }
    Ok(())
}
