use thiserror::Error;

#[derive(Error, Debug)]
pub enum MarketError {
    #[error("cart {0} has already been split into an order set")]
    DuplicateProcessing(u64),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("commission configuration ambiguity: {0}")]
    ConfigurationAmbiguity(String),
    #[error("payout provider failure: {0}")]
    ExternalProviderFailure(String),
    #[error("validation error: {0}")]
    ValidationError(String),
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

impl MarketError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MarketError>;
