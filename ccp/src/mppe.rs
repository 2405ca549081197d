//! The MPPE option module: negotiates the single stateless-128 flag
//! combination this core supports, and reacts to key-change events by
//! pushing fresh session keys down through the kernel interface. Grounded
//! on the C original's `ccp_mppe.c`, collapsed to 128-bit stateless only
//! (40/56-bit and stateful mode are out of scope here).

use std::any::Any;

use ccp_wire::{decode_mppe_flags, encode_mppe_option, MPPE_STATELESS_128};
use ppp_sys::{Direction, KernelInterface};
use tracing::{debug, warn};

use crate::config::MppePolicy;
use crate::option::{CcpVerdict, OptionHandler, OptionState, ReactResult};

/// A freshly derived 128-bit session key pair, as produced by whatever
/// authentication exchange ran before CCP (MS-CHAPv2, typically). This
/// core never derives keys itself — it only ever consumes them.
#[derive(Clone, Copy)]
pub struct MppeKeyEvent {
    /// Capability bitmask the key-derivation exchange reported; bit
    /// `0x04` must be set or no 128-bit session keys are actually
    /// available. Grounded on `ev_mppe_keys`'s `ev->type & 0x04` gate.
    pub kind: u8,
    /// The policy that exchange negotiated, which may differ from
    /// whatever stance this session started with (e.g. an operator
    /// "allowed" default, but the auth layer discovered the peer requires
    /// MPPE).
    pub policy: MppePolicy,
    pub send_key: [u8; 16],
    pub recv_key: [u8; 16],
}

impl std::fmt::Debug for MppeKeyEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MppeKeyEvent")
            .field("kind", &self.kind)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Whether this session wants to propose/accept MPPE, independent of
/// `policy` — set by a ConfReq exchange (under `Allowed`) or forced `On`
/// by a `Required` policy or key event. `Unset` means no information yet:
/// under `Allowed`, there's nothing to propose until the peer speaks
/// first or a key event arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MppeDesired {
    Unset,
    On,
    Off,
}

/// Per-session MPPE negotiation state.
struct MppeState {
    policy: MppePolicy,
    desired: MppeDesired,
    /// Set once a ConfReq/ConfAck/ConfNak exchange has settled on
    /// stateless-128, before any key has necessarily arrived yet.
    negotiated: bool,
    send_key: Option<[u8; 16]>,
    recv_key: Option<[u8; 16]>,
}

/// Classifies a peer-proposed flag word against `policy`. Shared by the
/// pure preview pass and the committing `recv_conf_req` so the two never
/// drift apart on what counts as acceptable.
fn classify_flags(policy: MppePolicy, flags: u32) -> CcpVerdict {
    match policy {
        MppePolicy::None => CcpVerdict::Rej,
        MppePolicy::Required | MppePolicy::Allowed => {
            if flags == MPPE_STATELESS_128 {
                CcpVerdict::Ack
            } else {
                CcpVerdict::Nak
            }
        }
    }
}

/// Decodes an option entry's body, rejecting anything that doesn't
/// declare exactly the 6-byte MPPE option layout.
fn decode_option(declared_len: u8, data: &[u8]) -> Option<u32> {
    if declared_len != ccp_wire::MPPE_OPTION_LEN {
        return None;
    }
    decode_mppe_flags(data)
}

/// The process-wide MPPE handler. Stateless itself; all per-session data
/// lives in [`MppeState`] behind the opaque [`OptionState`] the registry
/// hands back.
pub struct MppeHandler {
    policy: MppePolicy,
}

impl MppeHandler {
    pub fn new(policy: MppePolicy) -> Self {
        MppeHandler { policy }
    }

    fn downcast(state: &OptionState) -> &MppeState {
        state
            .downcast_ref::<MppeState>()
            .expect("registry only ever hands MppeHandler its own state type")
    }

    fn downcast_mut(state: &mut OptionState) -> &mut MppeState {
        state
            .downcast_mut::<MppeState>()
            .expect("registry only ever hands MppeHandler its own state type")
    }

    /// Applies a freshly delivered key pair to an already-negotiated
    /// session, pushing both directions down through `kernel`. This is
    /// the Key-Event Subscriber: the outer authentication layer calls it
    /// whenever it derives new keys, independent of the ConfReq/ConfAck
    /// exchange that merely agreed keys of this kind would be used.
    pub fn apply_key_event(
        &self,
        state: &mut OptionState,
        kernel: &mut dyn KernelInterface,
        event: MppeKeyEvent,
    ) -> ReactResult {
        let st = Self::downcast_mut(state);
        if event.kind & 0x04 == 0 {
            warn!(kind = event.kind, "128-bit MPPE session keys not available, disabling mppe");
            return Err(());
        }
        if !st.negotiated {
            warn!("MPPE key event delivered before negotiation completed; ignoring");
            return Err(());
        }
        kernel
            .install_mppe_key(Direction::Transmit, event.send_key)
            .map_err(|e| {
                warn!(error = %e, "failed to install MPPE transmit key");
            })?;
        kernel
            .install_mppe_key(Direction::Receive, event.recv_key)
            .map_err(|e| {
                warn!(error = %e, "failed to install MPPE receive key");
            })?;
        st.send_key = Some(event.send_key);
        st.recv_key = Some(event.recv_key);
        st.policy = event.policy;
        if event.policy.is_required() {
            st.desired = MppeDesired::On;
        }
        debug!("MPPE session keys installed");
        Ok(())
    }
}

impl OptionHandler for MppeHandler {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn option_id(&self) -> u8 {
        ccp_wire::OPT_MPPE
    }

    fn name(&self) -> &'static str {
        "mppe"
    }

    fn init(&self) -> Option<OptionState> {
        if self.policy.is_none() {
            return None;
        }
        Some(Box::new(MppeState {
            policy: self.policy,
            desired: MppeDesired::Unset,
            negotiated: false,
            send_key: None,
            recv_key: None,
        }) as Box<dyn Any + Send>)
    }

    fn encoded_len(&self, _state: &OptionState) -> u8 {
        ccp_wire::MPPE_OPTION_LEN
    }

    /// Returns 0 bytes (proposes nothing) when our policy isn't `required`
    /// and we don't yet know whether we want MPPE. When we do propose,
    /// `desired == off` is honored by proposing bare flags (a session that
    /// decided against MPPE during negotiation keeps saying so); otherwise
    /// we install the receive key — if one has arrived yet — before
    /// proposing stateless-128, withdrawing the proposal entirely if that
    /// installation fails.
    fn send_conf_req(
        &self,
        state: &mut OptionState,
        kernel: &mut dyn KernelInterface,
        out: &mut [u8],
    ) -> i32 {
        let st = Self::downcast_mut(state);
        if !st.policy.is_required() && matches!(st.desired, MppeDesired::Unset) {
            return 0;
        }
        if st.desired == MppeDesired::Off {
            encode_mppe_option(0, out);
            return ccp_wire::MPPE_OPTION_LEN as i32;
        }
        if let Some(key) = st.recv_key {
            if let Err(e) = kernel.install_mppe_key(Direction::Receive, key) {
                warn!(error = %e, "failed to install MPPE receive key; withdrawing proposal");
                return 0;
            }
        }
        encode_mppe_option(MPPE_STATELESS_128, out);
        ccp_wire::MPPE_OPTION_LEN as i32
    }

    fn preview_conf_req(&self, state: &OptionState, declared_len: u8, data: &[u8]) -> CcpVerdict {
        let st = Self::downcast(state);
        match decode_option(declared_len, data) {
            Some(flags) => classify_flags(st.policy, flags),
            None => CcpVerdict::Rej,
        }
    }

    /// Only ever called once the layer has established the whole ConfReq
    /// is acceptable, so it's safe to commit: records what the peer's
    /// flags imply about `desired`, then, if the option itself Acks,
    /// installs the send key (if one has arrived yet) and downgrades to
    /// Rej if that installation fails.
    fn recv_conf_req(
        &self,
        state: &mut OptionState,
        kernel: &mut dyn KernelInterface,
        declared_len: u8,
        data: &[u8],
    ) -> CcpVerdict {
        let st = Self::downcast_mut(state);
        let Some(flags) = decode_option(declared_len, data) else {
            return CcpVerdict::Rej;
        };
        let verdict = classify_flags(st.policy, flags);

        match st.policy {
            MppePolicy::None => {}
            MppePolicy::Required => st.desired = MppeDesired::On,
            MppePolicy::Allowed => {
                st.desired = if flags & MPPE_STATELESS_128 == MPPE_STATELESS_128 {
                    MppeDesired::On
                } else {
                    MppeDesired::Off
                };
            }
        }

        if verdict != CcpVerdict::Ack {
            return verdict;
        }

        match st.send_key {
            Some(key) => {
                if let Err(e) = kernel.install_mppe_key(Direction::Transmit, key) {
                    warn!(error = %e, "failed to install MPPE transmit key");
                    return CcpVerdict::Rej;
                }
            }
            None => debug!("MPPE accepted with no send key staged yet"),
        }
        st.negotiated = true;
        CcpVerdict::Ack
    }

    fn send_conf_nak(
        &self,
        _state: &mut OptionState,
        _kernel: &mut dyn KernelInterface,
        out: &mut [u8],
    ) -> i32 {
        encode_mppe_option(MPPE_STATELESS_128, out);
        ccp_wire::MPPE_OPTION_LEN as i32
    }

    fn recv_conf_nak(&self, state: &mut OptionState, data: &[u8]) -> ReactResult {
        let st = Self::downcast_mut(state);
        match decode_mppe_flags(data) {
            Some(MPPE_STATELESS_128) => {
                // Peer is steering us right back to what we already sent;
                // nothing to change, just try again.
                Ok(())
            }
            Some(_) => {
                if st.policy.is_required() {
                    Err(())
                } else {
                    Ok(())
                }
            }
            None => Err(()),
        }
    }

    fn recv_conf_rej(&self, state: &mut OptionState, _data: &[u8]) -> Option<ReactResult> {
        let st = Self::downcast_mut(state);
        Some(if st.policy.is_required() { Err(()) } else { Ok(()) })
    }

    fn recv_conf_ack(&self, state: &mut OptionState, data: &[u8]) -> ReactResult {
        let st = Self::downcast_mut(state);
        match decode_mppe_flags(data) {
            Some(MPPE_STATELESS_128) => {
                st.negotiated = true;
                Ok(())
            }
            _ => Err(()),
        }
    }

    fn print(&self, state: &OptionState, data: Option<&[u8]>) -> String {
        let st = Self::downcast(state);
        match data.and_then(decode_mppe_flags) {
            Some(flags) => format!("mppe(flags={flags:#010x})"),
            None => format!("mppe(negotiated={}, policy={})", st.negotiated, debug_policy(st.policy)),
        }
    }
}

fn debug_policy(policy: MppePolicy) -> &'static str {
    match policy {
        MppePolicy::None => "none",
        MppePolicy::Allowed => "allowed",
        MppePolicy::Required => "required",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ppp_sys::kernel::fake::FakeKernel;

    fn ack_flags() -> [u8; 4] {
        MPPE_STATELESS_128.to_be_bytes()
    }

    #[test]
    fn init_declines_when_policy_is_none() {
        let h = MppeHandler::new(MppePolicy::None);
        assert!(h.init().is_none());
    }

    fn event(kind: u8, policy: MppePolicy, send_key: [u8; 16], recv_key: [u8; 16]) -> MppeKeyEvent {
        MppeKeyEvent { kind, policy, send_key, recv_key }
    }

    #[test]
    fn stateless_128_request_is_acked() {
        let h = MppeHandler::new(MppePolicy::Allowed);
        let mut state = h.init().unwrap();
        let mut kernel = FakeKernel::with_mtu(1500);
        let verdict = h.recv_conf_req(&mut state, &mut kernel, ccp_wire::MPPE_OPTION_LEN, &ack_flags());
        assert_eq!(verdict, CcpVerdict::Ack);
    }

    #[test]
    fn stateful_bit_is_nakked_not_rejected() {
        let h = MppeHandler::new(MppePolicy::Allowed);
        let mut state = h.init().unwrap();
        let mut kernel = FakeKernel::with_mtu(1500);
        let flags = (MPPE_STATELESS_128 | ccp_wire::MPPE_C).to_be_bytes();
        let verdict = h.recv_conf_req(&mut state, &mut kernel, ccp_wire::MPPE_OPTION_LEN, &flags);
        assert_eq!(verdict, CcpVerdict::Nak);
    }

    /// Flags entirely outside the supported combination are countered,
    /// not outright rejected — only an unknown option id or a malformed
    /// length gets that treatment.
    #[test]
    fn unrelated_flags_are_nakked_and_clear_desired() {
        let h = MppeHandler::new(MppePolicy::Allowed);
        let mut state = h.init().unwrap();
        let mut kernel = FakeKernel::with_mtu(1500);
        let flags = ccp_wire::MPPE_D.to_be_bytes();
        let verdict = h.recv_conf_req(&mut state, &mut kernel, ccp_wire::MPPE_OPTION_LEN, &flags);
        assert_eq!(verdict, CcpVerdict::Nak);
        assert!(matches!(MppeHandler::downcast(&state).desired, MppeDesired::Off));
    }

    /// An exact flags-are-zero proposal under `Allowed` is a real refusal
    /// from the peer, not an accept — it must Nak and remember the peer
    /// doesn't want MPPE, even though a bare zero is technically "within"
    /// every combination bitwise.
    #[test]
    fn exact_zero_flags_under_allowed_is_nakked_not_acked() {
        let h = MppeHandler::new(MppePolicy::Allowed);
        let mut state = h.init().unwrap();
        let mut kernel = FakeKernel::with_mtu(1500);
        let flags = 0u32.to_be_bytes();
        let verdict = h.recv_conf_req(&mut state, &mut kernel, ccp_wire::MPPE_OPTION_LEN, &flags);
        assert_eq!(verdict, CcpVerdict::Nak);
        assert!(matches!(MppeHandler::downcast(&state).desired, MppeDesired::Off));
    }

    /// `Required` disagreeing flags must Nak, counter-proposing our one
    /// supported combination — never an outright Rej, which would make
    /// the peer think we don't support MPPE at all.
    #[test]
    fn required_disagreeing_flags_are_nakked() {
        let h = MppeHandler::new(MppePolicy::Required);
        let mut state = h.init().unwrap();
        let mut kernel = FakeKernel::with_mtu(1500);
        let flags = ccp_wire::MPPE_H.to_be_bytes();
        let verdict = h.recv_conf_req(&mut state, &mut kernel, ccp_wire::MPPE_OPTION_LEN, &flags);
        assert_eq!(verdict, CcpVerdict::Nak);
    }

    #[test]
    fn wrong_declared_length_is_rejected() {
        let h = MppeHandler::new(MppePolicy::Allowed);
        let mut state = h.init().unwrap();
        let mut kernel = FakeKernel::with_mtu(1500);
        let verdict = h.recv_conf_req(&mut state, &mut kernel, 5, &ack_flags());
        assert_eq!(verdict, CcpVerdict::Rej);
    }

    #[test]
    fn key_event_before_negotiation_is_rejected() {
        let h = MppeHandler::new(MppePolicy::Allowed);
        let mut state = h.init().unwrap();
        let mut kernel = FakeKernel::with_mtu(1500);
        let ev = event(0x04, MppePolicy::Allowed, [1; 16], [2; 16]);
        assert!(h.apply_key_event(&mut state, &mut kernel, ev).is_err());
    }

    /// `ev->type & 0x04 == 0` means no 128-bit session keys are actually
    /// present; the event must be declined and must not touch the kernel
    /// or stage any key material, regardless of negotiation state.
    #[test]
    fn key_event_without_128bit_bit_is_declined() {
        let h = MppeHandler::new(MppePolicy::Allowed);
        let mut state = h.init().unwrap();
        let mut kernel = FakeKernel::with_mtu(1500);
        h.recv_conf_ack(&mut state, &ack_flags()).unwrap();
        let ev = event(0x03, MppePolicy::Allowed, [5; 16], [6; 16]);
        assert!(h.apply_key_event(&mut state, &mut kernel, ev).is_err());
        assert_eq!(kernel.tx_key, None);
        assert_eq!(kernel.rx_key, None);
    }

    #[test]
    fn key_event_after_negotiation_installs_both_directions() {
        let h = MppeHandler::new(MppePolicy::Allowed);
        let mut state = h.init().unwrap();
        let mut kernel = FakeKernel::with_mtu(1500);
        h.recv_conf_ack(&mut state, &ack_flags()).unwrap();
        let ev = event(0x04, MppePolicy::Allowed, [7; 16], [9; 16]);
        h.apply_key_event(&mut state, &mut kernel, ev).unwrap();
        assert_eq!(kernel.tx_key, Some([7; 16]));
        assert_eq!(kernel.rx_key, Some([9; 16]));
    }

    /// A key event reporting `Required` must force `desired` on even for
    /// a session that started out merely `Allowed`.
    #[test]
    fn key_event_with_required_policy_forces_desired_on() {
        let h = MppeHandler::new(MppePolicy::Allowed);
        let mut state = h.init().unwrap();
        let mut kernel = FakeKernel::with_mtu(1500);
        h.recv_conf_ack(&mut state, &ack_flags()).unwrap();
        let ev = event(0x04, MppePolicy::Required, [1; 16], [2; 16]);
        h.apply_key_event(&mut state, &mut kernel, ev).unwrap();
        assert!(matches!(MppeHandler::downcast(&state).desired, MppeDesired::On));
    }

    #[test]
    fn rej_is_fatal_only_when_required() {
        let required = MppeHandler::new(MppePolicy::Required);
        let mut st = required.init().unwrap();
        assert_eq!(required.recv_conf_rej(&mut st, &[]), Some(Err(())));

        let allowed = MppeHandler::new(MppePolicy::Allowed);
        let mut st = allowed.init().unwrap();
        assert_eq!(allowed.recv_conf_rej(&mut st, &[]), Some(Ok(())));
    }

    #[test]
    fn send_conf_req_proposes_nothing_until_desired_is_known() {
        let h = MppeHandler::new(MppePolicy::Allowed);
        let mut state = h.init().unwrap();
        let mut kernel = FakeKernel::with_mtu(1500);
        let mut out = [0u8; 6];
        assert_eq!(h.send_conf_req(&mut state, &mut kernel, &mut out), 0);
    }

    #[test]
    fn send_conf_req_proposes_when_required_even_before_any_key() {
        let h = MppeHandler::new(MppePolicy::Required);
        let mut state = h.init().unwrap();
        let mut kernel = FakeKernel::with_mtu(1500);
        let mut out = [0u8; 6];
        let written = h.send_conf_req(&mut state, &mut kernel, &mut out);
        assert_eq!(written, ccp_wire::MPPE_OPTION_LEN as i32);
        assert_eq!(decode_mppe_flags(&out[2..]), Some(MPPE_STATELESS_128));
    }

    /// Not the preview's job to touch the kernel: install failures must
    /// only ever be observed through the committing `recv_conf_req`.
    #[test]
    fn preview_never_touches_kernel_and_matches_recv_conf_req_verdict() {
        let h = MppeHandler::new(MppePolicy::Required);
        let state = h.init().unwrap();
        let preview = h.preview_conf_req(&state, ccp_wire::MPPE_OPTION_LEN, &ack_flags());
        assert_eq!(preview, CcpVerdict::Ack);
    }
}
