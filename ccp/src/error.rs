use ppp_sys::KernelError;
use thiserror::Error;

/// Errors this crate surfaces to the outer PPP engine. Locally recovered
/// faults (id mismatches, a single malformed option, optional ioctl
/// failures) never reach this type — they are logged and handled inline.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CcpError {
    /// A wire-malformed frame that isn't safely recoverable by clamping
    /// (too short for even the CCP header).
    #[error("malformed CCP frame: {0}")]
    Malformed(&'static str),

    /// An option handler returned a fatal verdict while composing a
    /// ConfReq, or while reacting to a ConfAck/ConfRej.
    #[error("option handler reported a fatal error")]
    HandlerFatal,

    /// The option-walk aggregate verdict over a received ConfReq was `Fail`.
    #[error("ConfReq option walk failed")]
    OptionWalkFailed,

    /// Asserting `CCP_OPEN` during `start` failed.
    #[error("failed to set kernel CCP flags: {0}")]
    KernelFlags(#[from] KernelError),
}

pub type CcpResult<T> = Result<T, CcpError>;
