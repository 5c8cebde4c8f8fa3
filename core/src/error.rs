use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid model specification: {reason}")]
    InvalidModel { reason: String },

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Design matrix is rank deficient at column '{column}'")]
    RankDeficient { column: String },

    #[error("Missing value for '{column}' in city {city} on {date}")]
    MissingValue {
        column: String,
        city: String,
        date: chrono::NaiveDate,
    },

    #[error("Degenerate fit: {reason}")]
    DegenerateFit { reason: String },

    #[error("Empty sample: {reason}")]
    EmptySample { reason: String },

    #[error("Checkpoint for run '{run_id}' does not match: {reason}")]
    CheckpointMismatch { run_id: String, reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SimError {
    /// Errors that only invalidate a single Monte Carlo replicate.
    /// The driver drops such replicates instead of aborting the run.
    pub fn is_replicate_failure(&self) -> bool {
        matches!(
            self,
            SimError::RankDeficient { .. }
                | SimError::MissingValue { .. }
                | SimError::DegenerateFit { .. }
                | SimError::EmptySample { .. }
        )
    }

    /// Short stable tag stored alongside failed replicates.
    pub fn kind(&self) -> &'static str {
        match self {
            SimError::Database(_) => "database",
            SimError::Serialization(_) => "serialization",
            SimError::Io(_) => "io",
            SimError::InvalidModel { .. } => "invalid_model",
            SimError::InvalidParameter { .. } => "invalid_parameter",
            SimError::RankDeficient { .. } => "rank_deficient",
            SimError::MissingValue { .. } => "missing_value",
            SimError::DegenerateFit { .. } => "degenerate_fit",
            SimError::EmptySample { .. } => "empty_sample",
            SimError::CheckpointMismatch { .. } => "checkpoint_mismatch",
            SimError::Other(_) => "other",
        }
    }
}

pub type SimResult<T> = Result<T, SimError>;

pub(crate) fn invalid_parameter(name: &str, reason: impl Into<String>) -> SimError {
    SimError::InvalidParameter {
        name: name.to_string(),
        reason: reason.into(),
    }
}
