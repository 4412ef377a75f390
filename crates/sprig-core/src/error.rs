use crate::shape::Shape;

/// All errors that can occur within sprig.
///
/// Every variant is fatal for the pruning event that raised it: nothing is
/// retried and no partially pruned model is redeployed. Fixed-point overflow
/// is not an error: the kernels saturate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Shape mismatch between a tensor and the geometry it is used with.
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Shape, got: Shape },

    /// Element count mismatch when creating a tensor or matrix from a vec.
    #[error("element count mismatch: shape {shape} requires {expected} elements, got {got}")]
    ElementCountMismatch {
        shape: Shape,
        expected: usize,
        got: usize,
    },

    /// Matrix multiplication dimension mismatch.
    #[error("matmul shape mismatch: [{m}x{k1}] @ [{k2}x{n}], inner dims must match")]
    MatmulShapeMismatch {
        m: usize,
        k1: usize,
        k2: usize,
        n: usize,
    },

    /// A layer was asked to work on a zero-sized input or output.
    #[error("{layer}: {what} must be non-zero")]
    EmptyDimension {
        layer: &'static str,
        what: &'static str,
    },

    /// More filters requested than the convolution layer has.
    #[error("cannot keep {keep} filters from a layer with {filters}")]
    KeepExceedsFilters { keep: usize, filters: usize },

    /// Selection asked for more records than the ranking holds.
    #[error("ranking exhausted: requested {requested} filters, {available} recorded")]
    RankingExhausted { requested: usize, available: usize },

    /// A ground-truth label outside the class range.
    #[error("label {label} out of range for {classes} classes")]
    LabelOutOfRange { label: usize, classes: usize },

    /// Matrix or buffer storage could not be reserved.
    #[error("allocation of {elements} elements failed")]
    Allocation { elements: usize },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    /// Shape mismatch between two dimension lists.
    pub fn shape_mismatch(expected: &[usize], got: &[usize]) -> Self {
        Error::ShapeMismatch {
            expected: Shape::from(expected),
            got: Shape::from(got),
        }
    }
}

/// Convenience Result type used throughout sprig.
pub type Result<T> = std::result::Result<T, Error>;
