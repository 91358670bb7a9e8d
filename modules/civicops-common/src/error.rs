use thiserror::Error;

#[derive(Error, Debug)]
pub enum CivicOpsError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CivicOpsError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}
