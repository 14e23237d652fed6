use crate::Float;
use thiserror::Error;

/// Errors raised by the solver library. The binary wraps them in `anyhow`
/// with context at the run level.
#[derive(Error, Debug)]
pub enum WakeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown field component '{name}'. Valid components are: {valid}")]
    UnknownComponent { name: String, valid: String },

    #[error(
        "Predictor-corrector loop diverged at slice {islice}: relative B-field error {error:e} \
         after {iterations} iterations exceeds {limit:e}. Try a lower B-field mixing factor \
         (currently {mixing_factor}), a lower tolerance (currently {tolerance}), more \
         iterations (currently {max_iterations}) or a higher longitudinal resolution"
    )]
    PredictorCorrectorDiverged {
        islice: usize,
        error: Float,
        limit: Float,
        iterations: usize,
        mixing_factor: Float,
        tolerance: Float,
        max_iterations: usize,
    },

    #[error("Multigrid did not converge: residual {residual:e} > target {target:e} after {iterations} V-cycles")]
    PoissonNotConverged {
        iterations: usize,
        residual: Float,
        target: Float,
    },

    #[error("Degenerate input: {0}")]
    DegenerateInput(String),

    #[error("Run aborted: {0}")]
    Aborted(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not parse configuration: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type WakeResult<T> = Result<T, WakeError>;
