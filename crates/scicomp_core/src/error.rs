/// Result type for grid, assembly and time-stepping operations.
pub type SolverResult<T> = Result<T, SolverError>;

/// Errors raised by the grid, operator assembly, time discretizer and IVP driver.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SolverError {
    /// Grid bounds or node count cannot describe a domain.
    #[error("Invalid domain: {0}")]
    InvalidDomain(String),
    /// Contradictory or unsupported problem configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// The operator was read before `assemble()` ran (or after it was invalidated).
    #[error("Operator has not been assembled")]
    NotAssembled,
    /// Two inputs that must agree in shape do not.
    #[error("Shape mismatch: {what} (expected {expected}, got {actual})")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    /// A linear solve failed or produced non-finite values.
    #[error("Numerical instability at t = {time}: {reason}")]
    NumericalInstability { time: f64, reason: String },
    /// Argument outside its admissible range.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
