// 🚨 Pipeline Errors - dataset-level failures
// Row-level problems never land here: they become record::Diagnostic entries.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required column is absent from an input table
    #[error("table '{table}' is missing required column '{column}'")]
    MissingColumn { table: String, column: String },

    /// A required input table was not supplied
    #[error("required table '{0}' was not supplied")]
    MissingTable(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl PipelineError {
    pub fn missing_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        PipelineError::MissingColumn {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Input-shape errors abort the whole run and must name what is missing
    pub fn is_input_shape(&self) -> bool {
        matches!(
            self,
            PipelineError::MissingColumn { .. } | PipelineError::MissingTable(_)
        )
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
