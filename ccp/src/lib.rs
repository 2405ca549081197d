//! PPP Compression Control Protocol (RFC 1962) negotiation core, with the
//! MPPE option (RFC 3078) restricted to its 128-bit stateless mode. This
//! crate owns the negotiation state machine, the pluggable option
//! registry, and the MPPE option module; it knows nothing about sockets,
//! kernels, or configuration files beyond the narrow [`ppp_sys`] traits it
//! is written against.

pub mod config;
pub mod error;
pub mod layer;
pub mod mppe;
pub mod option;
pub mod received;
pub mod registry;
pub mod report;

pub use config::{CcpConfig, MppePolicy};
pub use error::{CcpError, CcpResult};
pub use layer::CcpLayer;
pub use mppe::{MppeHandler, MppeKeyEvent};
pub use option::{CcpVerdict, LocalOption, NegState, OptionHandler, OptionState};
pub use registry::{OptionRegistry, OptionRegistryBuilder};
pub use report::LayerReport;

/// Builds the standard registry for this core: just MPPE, per the
/// configured policy. An embedding engine that adds other compression
/// options builds its own registry via [`OptionRegistry::builder`]
/// instead of calling this.
pub fn default_registry(mppe_policy: MppePolicy) -> std::sync::Arc<OptionRegistry> {
    std::sync::Arc::new(
        OptionRegistry::builder()
            .register(std::sync::Arc::new(MppeHandler::new(mppe_policy)))
            .build(),
    )
}
