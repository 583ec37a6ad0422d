use thiserror::Error;

/// Why a method body could not be structured. `index` is the offending
/// instruction index, or the block id where no instruction applies.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum StructureError {
    /// The input does not have the shape compiled code has.
    #[error("malformed input at {index}: {message}")]
    Malformed { index: usize, message: String },

    /// Region classification reached a state it should never reach.
    #[error("unreachable structuring state at {index}: {message}")]
    UnreachableState { index: usize, message: String },

    /// A construct the structurer declines to handle.
    #[error("unsupported construct at {index}: {message}")]
    Unsupported { index: usize, message: String },
}

impl StructureError {
    pub fn malformed(index: usize, message: impl Into<String>) -> Self {
        StructureError::Malformed { index, message: message.into() }
    }

    pub fn unreachable(index: usize, message: impl Into<String>) -> Self {
        StructureError::UnreachableState { index, message: message.into() }
    }

    pub fn unsupported(index: usize, message: impl Into<String>) -> Self {
        StructureError::Unsupported { index, message: message.into() }
    }

    /// Unsupported constructs are expected; callers report and move on.
    pub fn is_skippable(&self) -> bool {
        matches!(self, StructureError::Unsupported { .. })
    }
}
