use std::io;

/// Every fallible operation in the engine returns this error type.
#[derive(Debug, thiserror::Error)]
pub enum ScoreEngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    /// Reserved for a fallible-allocation path. The default global allocator
    /// aborts the process on real exhaustion rather than returning, so this
    /// variant is never constructed by this crate today; it exists so an
    /// embedder swapping in a fallible allocator has somewhere to report it.
    #[error("out of memory")]
    OutOfMemory,
}

pub type Result<T> = std::result::Result<T, ScoreEngineError>;
