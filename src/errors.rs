use thiserror::Error;

/// Errors produced while parsing, binding or evaluating a formula.
#[derive(Debug, Error)]
pub enum CalcError {
    /// The expression text could not be parsed. Unknown function names are
    /// resolved against the registry at parse time, so they surface here.
    #[error("parse error: {0}")]
    Parse(String),

    /// One or more variables had no binding at evaluation time.
    /// `names` is sorted and deduplicated.
    #[error("no value provided for variables: {}", names.join(", "))]
    UnboundVariable { names: Vec<String> },

    /// A function or operator was applied to arguments it does not accept,
    /// or an unsupported cache-invalidation pattern was supplied.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An arithmetic failure inside node evaluation, e.g. division by zero.
    #[error("evaluation error: {0}")]
    Evaluation(String),
}

impl CalcError {
    /// True for the failure kinds the non-strict `evaluate` path swallows.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CalcError::UnboundVariable { .. } | CalcError::InvalidArgument(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CalcError>;
