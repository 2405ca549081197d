//! The polymorphic contract every option module satisfies, and the Local
//! Option record the CCP layer keeps for each registered handler.
//! Per-session state is type-erased (`Box<dyn Any>`) so a single
//! process-wide, heterogeneous registry of handlers can hand every
//! handler the same opaque slot — this is the Rust rendering of the C
//! original's `container_of` upcast from an embedded `struct
//! ccp_option_t` to the handler's own state struct.

use std::any::Any;
use std::fmt;

use ppp_sys::KernelInterface;

/// Opaque per-session state a handler's `init` hands back and every other
/// method receives for downcasting. `Drop`-ing the `LocalOption` frees it —
/// this crate has no `free(ccp, local)` method because Rust ownership
/// already does that job (see DESIGN.md).
pub type OptionState = Box<dyn Any + Send>;

/// The result of judging one option entry, ordered `Fail < Rej < Nak <
/// Ack` ("most negative wins" — see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CcpVerdict {
    Fail,
    Rej,
    Nak,
    Ack,
}

/// Last-observed negotiation state of a Local or Received Option.
/// Distinct from [`CcpVerdict`] because `None` only makes sense as a rest
/// state, never as a handler return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegState {
    None,
    Ack,
    Nak,
    Rej,
}

impl From<CcpVerdict> for NegState {
    fn from(v: CcpVerdict) -> Self {
        match v {
            CcpVerdict::Ack => NegState::Ack,
            CcpVerdict::Nak => NegState::Nak,
            CcpVerdict::Rej | CcpVerdict::Fail => NegState::Rej,
        }
    }
}

/// Outcome of a handler reacting to a ConfAck/ConfNak/ConfRej it didn't
/// originate acceptance of. `Ok(())` mirrors the C source's `0`; `Err(())`
/// mirrors a nonzero/fatal return.
pub type ReactResult = Result<(), ()>;

/// A process-wide, stateless option module. One instance is shared by
/// every CCP session through the [`crate::registry::OptionRegistry`];
/// all session-specific data lives in the [`OptionState`] each session's
/// `init` call produces.
pub trait OptionHandler: Send + Sync {
    /// Lets a caller holding only `&dyn OptionHandler` recover the
    /// concrete handler type when it needs a capability this trait
    /// doesn't generalize (e.g. the MPPE key-event surface).
    fn as_any(&self) -> &dyn Any;

    /// The CCP option id this handler negotiates (e.g. 18 for MPPE).
    fn option_id(&self) -> u8;

    fn name(&self) -> &'static str;

    /// Creates per-session state, or declines to participate in
    /// negotiation for this session entirely (`None`).
    fn init(&self) -> Option<OptionState>;

    /// The length (header + body) this option occupies in a fully
    /// populated ConfReq. Computed once, at `init` time — callers rely on
    /// this never changing for the lifetime of the session.
    fn encoded_len(&self, state: &OptionState) -> u8;

    /// Writes 0 or more bytes describing this option's proposal at the
    /// start of `out`. Returns the byte count written, or a negative
    /// number on fatal error (mirrors the C original's `int` return).
    fn send_conf_req(
        &self,
        state: &mut OptionState,
        kernel: &mut dyn KernelInterface,
        out: &mut [u8],
    ) -> i32;

    /// Same contract as `send_conf_req`, used to counter-propose when the
    /// peer's ConfReq needs a Nak. Most handlers with only one acceptable
    /// value alias this to `send_conf_req`.
    fn send_conf_nak(
        &self,
        state: &mut OptionState,
        kernel: &mut dyn KernelInterface,
        out: &mut [u8],
    ) -> i32 {
        self.send_conf_req(state, kernel, out)
    }

    /// Pure judgement of one option entry from a peer's ConfReq: decodes
    /// and classifies `data` against this session's policy without
    /// touching the kernel or committing any state change. Walked over
    /// every entry first so the aggregate verdict for the whole ConfReq is
    /// known before anything commits — see `received::walk_conf_req`.
    fn preview_conf_req(&self, state: &OptionState, declared_len: u8, data: &[u8]) -> CcpVerdict;

    /// Judges one option entry from a peer's ConfReq and, since this is
    /// only ever called once the layer has established the whole ConfReq
    /// is acceptable, commits whatever kernel-visible side effects
    /// accepting it requires (installing keys, etc).
    fn recv_conf_req(
        &self,
        state: &mut OptionState,
        kernel: &mut dyn KernelInterface,
        declared_len: u8,
        data: &[u8],
    ) -> CcpVerdict;

    /// Peer Nak'd what we proposed.
    fn recv_conf_nak(&self, state: &mut OptionState, data: &[u8]) -> ReactResult {
        let _ = (state, data);
        Ok(())
    }

    /// Peer rejected what we proposed. `None` means "this handler has no
    /// reaction defined", which callers treat as fatal.
    fn recv_conf_rej(&self, state: &mut OptionState, data: &[u8]) -> Option<ReactResult> {
        let _ = (state, data);
        None
    }

    /// Peer acknowledged what we proposed. Optional confirmation hook.
    fn recv_conf_ack(&self, state: &mut OptionState, data: &[u8]) -> ReactResult {
        let _ = (state, data);
        Ok(())
    }

    /// Human-readable form of the option, for verbose negotiation
    /// logging. `data` is `Some` for a peer-supplied buffer, `None` to
    /// print the local state.
    fn print(&self, state: &OptionState, data: Option<&[u8]>) -> String;
}

/// A registered option, local to one CCP session.
pub struct LocalOption {
    pub id: u8,
    pub len: u8,
    pub handler: std::sync::Arc<dyn OptionHandler>,
    pub state: OptionState,
    pub negotiated: NegState,
}

impl fmt::Debug for LocalOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalOption")
            .field("id", &self.id)
            .field("len", &self.len)
            .field("handler", &self.handler.name())
            .field("negotiated", &self.negotiated)
            .finish()
    }
}
