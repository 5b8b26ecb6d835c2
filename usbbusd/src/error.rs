use thiserror::Error;

/// Status codes shared by the device core and its collaborators.
///
/// Transfer responses, protocol operations and lifecycle entry points all
/// speak this one vocabulary, so a completion status can be propagated to a
/// client verbatim.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Error)]
pub enum UsbError {
    #[error("invalid arguments")]
    InvalidArgs,

    #[error("buffer too small")]
    BufferTooSmall,

    #[error("interface already bound")]
    AlreadyBound,

    #[error("bad state")]
    BadState,

    #[error("out of memory")]
    NoMemory,

    #[error("i/o error")]
    Io,

    #[error("timed out")]
    TimedOut,

    #[error("transfer cancelled")]
    Cancelled,

    #[error("not supported")]
    NotSupported,

    #[error("internal error")]
    Internal,
}

pub type Result<T, E = UsbError> = std::result::Result<T, E>;
