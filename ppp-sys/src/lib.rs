//! Narrow system boundary a PPP control-protocol layer (CCP, LCP, IPCP...)
//! is written against: the generic negotiation FSM (RFC 1661 §4) and the
//! kernel data-path configuration side-channel. Neither is wired to a real
//! OS here — that wiring belongs to the outer PPP engine that embeds a
//! control-protocol layer built on this crate.

pub mod fsm;
pub mod kernel;

pub use fsm::{Fsm, FsmCallbacks, FsmState};
pub use kernel::{CcpFlags, Direction, KernelError, KernelInterface};
