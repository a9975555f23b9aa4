#![forbid(unsafe_code)]
//! Error types for the linear sparse cache.
//!
//! # Error Taxonomy
//!
//! | Variant | Class | Raised by |
//! |---------|-------|-----------|
//! | `NegativeOffset` | caller bug, never retried | `locate`, `get_part`, `del_range`, proxy `get`/`load` |
//! | `OffsetOutsideBlock` | internal contract failure | block splitting |
//! | `MalformedRange` | internal contract failure | range mutations with `end < offset` |
//! | `Io` | backing stream failure | worker reads, `load`, stream adapters |
//! | `UnseekablePosition` | fatal for the stream | unseekable streams asked to move |
//! | `InvalidConfig` | rejected at construction | `ServerConfig`/`ProxyConfig::validate` |
//!
//! "Data not yet available" is never an error: absence is represented
//! structurally by an uncached block.
//!
//! Background I/O failures do not escape the worker that hit them. The
//! affected region stays uncached, the failure is logged and recorded on the
//! proxy, and the next query over that region queues a fresh load.

use thiserror::Error;

/// Unified error type for all cache operations.
#[derive(Debug, Error)]
pub enum LscError {
    /// A caller passed an offset below zero.
    #[error("negative offset: {offset}")]
    NegativeOffset { offset: i64 },

    /// A split was requested at an offset the target block does not span.
    #[error("offset {offset:#x} outside block [{block_offset:#x}, {block_end:#x})")]
    OffsetOutsideBlock {
        offset: u64,
        block_offset: u64,
        block_end: u64,
    },

    /// A range whose end precedes its start, or whose end overflows.
    #[error("malformed range: offset={offset:#x} end={end:#x}")]
    MalformedRange { offset: u64, end: u64 },

    /// Operating system or backing stream I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An unseekable stream was asked to move away from its read position.
    #[error("unseekable stream cannot change position from {current:#x} to {requested:#x}")]
    UnseekablePosition { current: u64, requested: u64 },

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl LscError {
    /// Stable short name of the variant, used as a structured log field.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NegativeOffset { .. } => "negative_offset",
            Self::OffsetOutsideBlock { .. } => "offset_outside_block",
            Self::MalformedRange { .. } => "malformed_range",
            Self::Io(_) => "io",
            Self::UnseekablePosition { .. } => "unseekable_position",
            Self::InvalidConfig(_) => "invalid_config",
        }
    }

    /// Whether the error indicates a broken internal invariant rather than
    /// a caller mistake or an environmental failure.
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::OffsetOutsideBlock { .. } | Self::MalformedRange { .. }
        )
    }
}

impl From<LscError> for std::io::Error {
    fn from(err: LscError) -> Self {
        match err {
            LscError::Io(inner) => inner,
            LscError::NegativeOffset { .. } | LscError::InvalidConfig(_) => {
                Self::new(std::io::ErrorKind::InvalidInput, err)
            }
            LscError::UnseekablePosition { .. } => {
                Self::new(std::io::ErrorKind::Unsupported, err)
            }
            LscError::OffsetOutsideBlock { .. } | LscError::MalformedRange { .. } => {
                Self::other(err)
            }
        }
    }
}

/// Result alias using `LscError`.
pub type Result<T> = std::result::Result<T, LscError>;
