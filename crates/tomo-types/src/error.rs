use thiserror::Error;

#[derive(Error, Debug)]
pub enum TomoError {
    #[error("Unknown regularization operator: {0}")]
    UnknownOperator(String),

    #[error("Singular system at time step {time_step}, iteration {iteration}: {message}")]
    SingularSystem {
        time_step: usize,
        iteration: usize,
        message: String,
    },

    #[error(
        "Non-finite hyperparameter at time step {time_step}, iteration {iteration}: {name} = {value}"
    )]
    NonFiniteHyperparameter {
        time_step: usize,
        iteration: usize,
        name: &'static str,
        value: f64,
    },

    #[error(
        "No convergence at time step {time_step} after {iterations} iterations \
         (conv = {conv:.3e}, conv_crit = {conv_crit:.3e})"
    )]
    ConvergenceFailure {
        time_step: usize,
        iterations: usize,
        conv: f64,
        conv_crit: f64,
    },

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Linear algebra error: {0}")]
    LinAlg(String),
}

pub type TomoResult<T> = Result<T, TomoError>;
