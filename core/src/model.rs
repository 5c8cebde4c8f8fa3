//! Structured model specifications.
//!
//! A ModelSpec replaces a free-form formula string: the outcome,
//! the exposure, the controls and the fixed-effect groups are named
//! explicitly and validated once, when the spec is built.
//! Which regressor is "of interest" and whether it is instrumented
//! follows from the IdentificationMethod, not from the spec.

use crate::{
    error::{SimError, SimResult},
    estimate::{GroupColumn, NamedColumn, RegressionInput},
    panel::{Column, Observation},
    treatment::TreatmentDesign,
};
use chrono::Datelike;
use serde::{Deserialize, Serialize};

/// A fixed-effect grouping of panel rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixedEffect {
    City,
    Year,
    Month,
    DayOfWeek,
    CityYear,
}

impl FixedEffect {
    pub fn name(&self) -> &'static str {
        match self {
            Self::City => "city",
            Self::Year => "year",
            Self::Month => "month",
            Self::DayOfWeek => "day_of_week",
            Self::CityYear => "city_year",
        }
    }

    /// Group label of a row for this fixed effect.
    pub fn label(&self, row: &Observation) -> String {
        match self {
            Self::City => row.city.clone(),
            Self::Year => row.year().to_string(),
            Self::Month => row.month().to_string(),
            Self::DayOfWeek => row.weekday().num_days_from_monday().to_string(),
            Self::CityYear => format!("{}:{}", row.city, row.date.year()),
        }
    }
}

/// How the treatment effect is identified and re-estimated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentificationMethod {
    /// Random treated days, outcome regressed on the treatment dummy.
    ReducedForm,
    /// Pollution alerts: treatment by crossing a pollutant threshold,
    /// estimated within the bandwidth around it.
    Rdd,
    /// Outcome regressed directly on the exposure.
    Ols,
    /// Exposure instrumented by a randomly assigned binary instrument.
    Iv,
}

impl IdentificationMethod {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReducedForm => "reduced_form",
            Self::Rdd => "rdd",
            Self::Ols => "ols",
            Self::Iv => "iv",
        }
    }

    /// The assignment mechanism this method is simulated under.
    pub fn treatment_design(&self, p_treat: f64, exposure: Column) -> TreatmentDesign {
        match self {
            Self::ReducedForm | Self::Iv => TreatmentDesign::RandomDays { p: p_treat },
            Self::Rdd => TreatmentDesign::Alert {
                column: exposure,
                p: p_treat,
            },
            Self::Ols => TreatmentDesign::None,
        }
    }

    /// True when the regressor of interest is the treatment dummy
    /// rather than the exposure itself.
    pub fn uses_treatment_dummy(&self) -> bool {
        matches!(self, Self::ReducedForm | Self::Rdd)
    }

    pub fn is_instrumented(&self) -> bool {
        matches!(self, Self::Iv)
    }
}

/// Wire form of a model specification, as written in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpecConfig {
    pub outcome: Column,
    pub exposure: Column,
    #[serde(default)]
    pub covariates: Vec<Column>,
    #[serde(default)]
    pub fixed_effects: Vec<FixedEffect>,
}

/// A validated model specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ModelSpecConfig", into = "ModelSpecConfig")]
pub struct ModelSpec {
    outcome: Column,
    exposure: Column,
    covariates: Vec<Column>,
    fixed_effects: Vec<FixedEffect>,
}

impl ModelSpec {
    pub fn new(
        outcome: Column,
        exposure: Column,
        covariates: Vec<Column>,
        fixed_effects: Vec<FixedEffect>,
    ) -> SimResult<Self> {
        let reject = |reason: String| Err(SimError::InvalidModel { reason });

        if !outcome.is_outcome() {
            return reject(format!("outcome '{}' is not a death count", outcome.name()));
        }
        if !exposure.is_pollutant() {
            return reject(format!("exposure '{}' is not a pollutant", exposure.name()));
        }
        for (i, covariate) in covariates.iter().enumerate() {
            if *covariate == outcome {
                return reject(format!("outcome '{}' used as a covariate", outcome.name()));
            }
            if *covariate == exposure {
                return reject(format!("exposure '{}' used as a covariate", exposure.name()));
            }
            if covariates[..i].contains(covariate) {
                return reject(format!("covariate '{}' listed twice", covariate.name()));
            }
        }
        for (i, fe) in fixed_effects.iter().enumerate() {
            if fixed_effects[..i].contains(fe) {
                return reject(format!("fixed effect '{}' listed twice", fe.name()));
            }
        }

        Ok(Self {
            outcome,
            exposure,
            covariates,
            fixed_effects,
        })
    }

    pub fn outcome(&self) -> Column {
        self.outcome
    }

    pub fn exposure(&self) -> Column {
        self.exposure
    }

    pub fn covariates(&self) -> &[Column] {
        &self.covariates
    }

    pub fn fixed_effects(&self) -> &[FixedEffect] {
        &self.fixed_effects
    }

    /// Human-readable formula, `y ~ x + controls | fe`, for logs and exports.
    pub fn formula(&self, method: IdentificationMethod) -> String {
        let regressor = if method.uses_treatment_dummy() {
            "treated".to_string()
        } else {
            self.exposure.name().to_string()
        };
        let mut rhs = vec![if method.is_instrumented() {
            format!("({regressor} ~ instrument)")
        } else {
            regressor
        }];
        if method == IdentificationMethod::Rdd {
            rhs.push("running".to_string());
        }
        rhs.extend(self.covariates.iter().map(|c| c.name().to_string()));
        let mut formula = format!("{} ~ {}", self.outcome.name(), rhs.join(" + "));
        if !self.fixed_effects.is_empty() {
            let fe: Vec<&str> = self.fixed_effects.iter().map(FixedEffect::name).collect();
            formula.push_str(" | ");
            formula.push_str(&fe.join(" + "));
        }
        formula
    }

    /// Assemble a regression on the rows flagged in `keep`.
    ///
    /// `dependent`, `regressor`, `instrument` and `extra_controls` are
    /// aligned with `rows`; covariates and fixed-effect labels are read
    /// from the rows themselves. A missing covariate on a kept row is
    /// a `MissingValue` error.
    pub fn regression_input(
        &self,
        rows: &[&Observation],
        keep: &[bool],
        dependent: &[f64],
        regressor: NamedColumn,
        instrument: Option<NamedColumn>,
        extra_controls: Vec<NamedColumn>,
    ) -> SimResult<RegressionInput> {
        let select = |values: &[f64]| -> Vec<f64> {
            values
                .iter()
                .zip(keep)
                .filter(|(_, &k)| k)
                .map(|(&v, _)| v)
                .collect()
        };
        let kept_rows: Vec<&Observation> = rows
            .iter()
            .zip(keep)
            .filter(|(_, &k)| k)
            .map(|(&r, _)| r)
            .collect();

        let mut controls: Vec<NamedColumn> = extra_controls
            .into_iter()
            .map(|c| NamedColumn::new(c.name, select(&c.values)))
            .collect();
        for covariate in &self.covariates {
            let values = kept_rows
                .iter()
                .map(|row| row.require(*covariate))
                .collect::<SimResult<Vec<f64>>>()?;
            controls.push(NamedColumn::new(covariate.name(), values));
        }

        let fixed_effects = self
            .fixed_effects
            .iter()
            .map(|fe| GroupColumn {
                name: fe.name().to_string(),
                labels: kept_rows.iter().map(|row| fe.label(row)).collect(),
            })
            .collect();

        Ok(RegressionInput {
            dependent: select(dependent),
            regressor: NamedColumn::new(regressor.name, select(&regressor.values)),
            instrument: instrument.map(|z| NamedColumn::new(z.name, select(&z.values))),
            controls,
            fixed_effects,
        })
    }
}

impl TryFrom<ModelSpecConfig> for ModelSpec {
    type Error = SimError;

    fn try_from(config: ModelSpecConfig) -> SimResult<Self> {
        ModelSpec::new(
            config.outcome,
            config.exposure,
            config.covariates,
            config.fixed_effects,
        )
    }
}

impl From<ModelSpec> for ModelSpecConfig {
    fn from(spec: ModelSpec) -> Self {
        Self {
            outcome: spec.outcome,
            exposure: spec.exposure,
            covariates: spec.covariates,
            fixed_effects: spec.fixed_effects,
        }
    }
}
