//! Error taxonomy of the decision pipeline.
//!
//! Each failure carries the [`Stage`] it happened in, so a caller can tell a
//! correctable input problem apart from an operational outage (model artifact
//! missing, ledger down).

use std::fmt;

use thiserror::Error;

use crate::ledger::{DecisionId, StoreError};

/// Pipeline stage in which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Raw inputs → feature vector.
    Extraction,
    /// Feature vector → prediction.
    Scoring,
    /// Transactional write of the audit record.
    Recording,
    /// Read of an existing record (replay).
    Lookup,
}

impl Stage {
    /// Stable lowercase name, used in logs and in the CLI protocol.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Scoring => "scoring",
            Self::Recording => "recording",
            Self::Lookup => "lookup",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of one decision request.
#[derive(Debug, Error)]
pub enum DecisionError {
    /// A present input could not be coerced to the type its feature expects.
    #[error("extraction failed: input `{key}` is malformed: {reason}")]
    MalformedInput {
        /// Offending input key.
        key: String,
        /// What was wrong with the value.
        reason: String,
    },

    /// The model artifact could not be loaded or produced an unusable score.
    #[error("scoring failed: model `{model}` unavailable: {reason}")]
    ModelUnavailable {
        /// `name@version` of the expected model.
        model: String,
        /// Underlying cause.
        reason: String,
    },

    /// Feature vector length does not match the model's input dimensionality.
    #[error("scoring failed: feature vector has {actual} values, model expects {expected}")]
    InvalidVector {
        /// Dimensionality declared by the model.
        expected: usize,
        /// Length of the vector that was passed in.
        actual: usize,
    },

    /// The audit ledger rejected or failed the write; nothing was committed.
    #[error("recording failed: {0}")]
    Persistence(#[from] StoreError),

    /// No committed decision has this identifier.
    #[error("lookup failed: decision {0} not found")]
    NotFound(DecisionId),
}

impl DecisionError {
    /// Stage that produced the failure.
    pub fn stage(&self) -> Stage {
        match self {
            Self::MalformedInput { .. } => Stage::Extraction,
            Self::ModelUnavailable { .. } | Self::InvalidVector { .. } => Stage::Scoring,
            Self::Persistence(_) => Stage::Recording,
            Self::NotFound(_) => Stage::Lookup,
        }
    }

    /// `true` when resubmitting a corrected request can succeed.
    ///
    /// Everything else is an operational problem on our side.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::MalformedInput { .. } | Self::NotFound(_))
    }

    pub(crate) fn malformed(key: &str, reason: impl Into<String>) -> Self {
        Self::MalformedInput {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}
