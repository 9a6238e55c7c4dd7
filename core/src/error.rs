//! Error types for the particles crate.

/// Error type for all fallible operations of the SMC engine, the resampling
/// schemes and the smoothing algorithms.
///
/// Errors raised *inside* model callables are not represented here: a model
/// that panics unwinds straight through [`crate::smc::Smc::step`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SmcError {
    /// Returned when a resampling scheme name is not in the lookup table.
    #[error("{0}: not a valid resampling scheme")]
    UnknownResamplingScheme(String),

    /// Returned when the requested mode needs a model capability that the
    /// model does not provide.
    #[error("method/property {capability} missing in class {model}")]
    MissingCapability {
        /// Name of the missing operation (e.g. `logpt`).
        capability: &'static str,
        /// Type name of the model.
        model: String,
    },

    /// Returned when a construction option is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Returned when every log-weight at a step is `-inf` (or NaN).
    #[error("all log-weights are -inf at t={t}; the weights cannot be normalised")]
    DegenerateWeights {
        /// Time step at which the degeneracy was detected.
        t: usize,
    },

    /// Returned when a resampling scheme produced the wrong number of
    /// ancestors.
    #[error("resampling: wrong size for output (expected {expected}, got {got})")]
    ResamplingFailure {
        /// Requested number of draws.
        expected: usize,
        /// Number of draws produced.
        got: usize,
    },

    /// Returned when more draws are requested from a multinomial queue than it
    /// holds.
    #[error("multinomial queue: requested {requested} draws, capacity is {capacity}")]
    QueueCapacity {
        /// Number of draws requested in one call.
        requested: usize,
        /// Capacity of the queue.
        capacity: usize,
    },

    /// Returned by rejection-based backward sampling when a draw exceeded its
    /// attempt budget and no fallback was allowed.
    #[error("rejection sampling exhausted {attempts} attempts at t={t}")]
    RejectionBudgetExhausted {
        /// Time step of the failed draw.
        t: usize,
        /// Attempts spent on the draw.
        attempts: usize,
    },

    /// Returned when a smoothing algorithm is called on a history that does
    /// not hold the snapshots it needs.
    #[error("incomplete particle history: {0}")]
    IncompleteHistory(String),

    /// Returned when a time index is outside the valid range.
    #[error("time index {t} out of range for history of length {len}")]
    InvalidTimeIndex {
        /// The offending index.
        t: usize,
        /// Length of the history.
        len: usize,
    },

    /// Returned when model parameters are inconsistent (shapes, non
    /// positive-definite covariances, ...).
    #[error("invalid model: {0}")]
    InvalidModel(String),
}
