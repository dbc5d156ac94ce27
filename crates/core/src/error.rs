use thiserror::Error;

pub type DripResult<T> = Result<T, DripError>;

#[derive(Error, Debug)]
pub enum DripError {
    /// A raw rule value could not be parsed into any recognised form.
    #[error("Rule value error: {0}")]
    RuleResolution(String),

    /// The rule itself is malformed (field path, lookup, method).
    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    #[error("Template render error: {0}")]
    Render(String),

    #[error("Mail transport error: {0}")]
    Transport(String),

    #[error("A drip named '{0}' already exists")]
    DuplicateName(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Another dispatcher holds the record; nothing was submitted.
    #[error("Record {0} is already being dispatched")]
    InFlight(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DripError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

impl From<config::ConfigError> for DripError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
