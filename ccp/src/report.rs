//! Upward-facing events a [`crate::layer::CcpLayer`] raises for the
//! embedding PPP engine to react to. Pulled, not pushed: the engine calls
//! `take_reports` after every `recv`/`open`/`close` instead of this crate
//! holding a callback trait of its own, keeping `CcpLayer` free of a
//! second generic parameter.

/// One event raised by a CCP session since the engine last collected
/// reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerReport {
    /// Negotiation reached `Opened`; compression (if any was negotiated)
    /// is now live on the data path.
    Started,
    /// Negotiation dropped out of `Opened`, administratively or because
    /// the peer re-opened negotiation. The data path reverts to
    /// uncompressed.
    Finished,
    /// The link should be torn down: a handler reported a fatal
    /// negotiation error this layer cannot recover from on its own.
    Terminate(&'static str),
    /// A CCP frame arrived while the FSM was `Initial`/`Closed` — CCP
    /// isn't running yet, so this is a protocol-reject case, not ours to
    /// parse. Carries the raw frame for the engine to reflect upstream as
    /// an LCP Protocol-Reject.
    ProtocolReject(Vec<u8>),
}
