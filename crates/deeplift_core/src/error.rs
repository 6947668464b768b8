//! Error types for deeplift_core.

use thiserror::Error;

use crate::graph::UnitId;

/// Result type alias using [`ExplainError`].
pub type Result<T> = std::result::Result<T, ExplainError>;

/// Errors that can occur while computing an attribution.
#[derive(Error, Debug)]
pub enum ExplainError {
    /// A rectifying unit's recorded state did not hold exactly the
    /// reference-pass and real-pass observations when its backward rule fired.
    #[error(
        "incomplete reference state for unit {unit}: recorded {inputs} input(s) and {outputs} output(s), expected exactly 2 of each"
    )]
    IncompleteReferenceState {
        /// The unit whose state was consumed.
        unit: UnitId,
        /// Number of recorded pre-activation inputs.
        inputs: usize,
        /// Number of recorded post-activation outputs.
        outputs: usize,
    },

    /// Shape mismatch between the input and what the graph expects.
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch {
        /// Expected shape description.
        expected: String,
        /// Actual shape description.
        got: String,
    },

    /// Target output index outside the graph's output width.
    #[error("target index {target} out of range for {outputs} output(s)")]
    TargetOutOfRange {
        /// Requested target index.
        target: usize,
        /// Number of outputs the graph produces.
        outputs: usize,
    },

    /// The graph contains no units, so it has no defined output.
    #[error("graph has no units")]
    EmptyGraph,

    /// Generic error.
    #[error("{0}")]
    Other(String),
}
