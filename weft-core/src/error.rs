//! Error types for the reactive engine and the reconciler.

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the library.
///
/// Most reactive misuse is not an error: wrapping a scalar is a passthrough,
/// self-triggering effects are suppressed and stopped effects simply run
/// untracked. The variants below cover the cases where a caller asked for
/// something that cannot happen.
#[derive(Error, Debug)]
pub enum Error {
    /// A value was assigned to a computed that has no setter.
    #[error("computed value is read-only")]
    ReadOnlyComputed,

    /// A vnode was patched or unmounted before it was ever mounted.
    #[error("vnode has no host element ({context})")]
    MissingElement { context: &'static str },

    /// The host was handed a node handle it does not own.
    #[error("unknown host node: {0}")]
    UnknownNode(u64),

    /// MessagePack encoding failed.
    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding failed.
    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a missing element error.
    pub fn missing_element(context: &'static str) -> Self {
        Error::MissingElement { context }
    }
}
