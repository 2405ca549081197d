//! Process-constructed configuration for a CCP instance. This crate never
//! reads a config file itself — reading and parsing config is the outer
//! engine's job — `CcpConfig` just gives that engine a typed place to put
//! the few knobs CCP/MPPE actually have, optionally serializable so it can
//! be embedded in the engine's own config schema.

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CcpConfig {
    /// Do not send the first ConfReq; wait for the peer to speak.
    pub passive: bool,
    /// Operator-declared MPPE stance.
    pub mppe_policy: MppePolicy,
    /// MTU reduction applied once MPPE is accepted, in bytes. Exposed here
    /// (rather than hardcoded) purely for testability; RFC 3078 fixes it
    /// at 4.
    pub mppe_pad: u8,
}

impl Default for CcpConfig {
    fn default() -> Self {
        CcpConfig {
            passive: false,
            mppe_policy: MppePolicy::None,
            mppe_pad: ccp_wire::MPPE_PAD as u8,
        }
    }
}

/// The operator's stance on MPPE.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MppePolicy {
    /// Never negotiate MPPE.
    None,
    /// Negotiate MPPE if the peer wants it.
    Allowed,
    /// The peer must agree to MPPE or the link fails to come up.
    Required,
}

impl MppePolicy {
    pub fn is_required(self) -> bool {
        matches!(self, MppePolicy::Required)
    }

    pub fn is_none(self) -> bool {
        matches!(self, MppePolicy::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_passive_off_and_no_mppe() {
        let cfg = CcpConfig::default();
        assert!(!cfg.passive);
        assert_eq!(cfg.mppe_policy, MppePolicy::None);
        assert_eq!(cfg.mppe_pad, 4);
    }
}
