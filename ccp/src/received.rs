//! Walking a peer's ConfReq option-by-option against this session's own
//! registered options, and composing the matching ConfAck/ConfNak/ConfRej
//! reply. This is the Rust shape of the C original's `ccp_recv_conf_req`:
//! that function builds three parallel output buffers (ack/nak/rej) in
//! one pass over the input; here the pass produces a `Vec<Judged>` first
//! and the three buffers are assembled from it afterward by the layer,
//! which keeps the per-option decision logic free of buffer-offset
//! bookkeeping.

use ccp_wire::{OptionScan, RawOption};
use ppp_sys::KernelInterface;

use crate::option::{CcpVerdict, LocalOption, NegState};

/// One option entry from a peer's ConfReq, with the matching local option
/// (if any) and its handler's verdict already attached.
pub struct Judged<'a> {
    pub raw: RawOption<'a>,
    pub id: u8,
    pub verdict: CcpVerdict,
}

/// Walks every option in `body` against `locals` — the options this
/// session itself has registered, each carrying its own live per-session
/// state — judging each one via its matching handler. An option id this
/// session never proposed (because no handler registered it, or its
/// handler's `init` declined for this session's policy) is rejected
/// outright, matching the C original's treatment of unknown options as
/// rejects rather than protocol errors.
///
/// Two passes: a pure `preview_conf_req` over every entry first, to learn
/// whether *any* entry in this ConfReq is going to come back Rej/Fail. If
/// one does, every entry is forced to Rej in the reply — including
/// entries that would otherwise have been accepted — and no handler's
/// commit method runs at all, so an option that would Ack on its own
/// never installs keys or otherwise touches the kernel for a ConfReq that
/// aggregates to a reject. Only when the whole proposal clears the
/// preview pass does each matched entry get its real `recv_conf_req`
/// commit call.
///
/// Returns the per-option judgements, the aggregate verdict (the worst of
/// all the individual ones, or `Ack` for an empty option region), and
/// whether a local option transitioned Nak -> Ack during this walk — the
/// signal the layer uses to immediately re-send its own ConfReq rather
/// than waiting idle in AckSent.
pub fn walk_conf_req<'a>(
    locals: &mut [LocalOption],
    kernel: &mut dyn KernelInterface,
    body: &'a [u8],
) -> (Vec<Judged<'a>>, CcpVerdict, bool) {
    struct Entry<'a> {
        raw: RawOption<'a>,
        id: u8,
        local_idx: Option<usize>,
        preview: CcpVerdict,
    }

    let mut entries = Vec::new();
    for raw in OptionScan::new(body) {
        let id = raw.bytes.first().copied().unwrap_or(0);
        let local_idx = locals.iter().position(|l| l.id == id);
        let preview = match local_idx {
            Some(idx) => {
                let data = option_body(&raw);
                locals[idx]
                    .handler
                    .preview_conf_req(&locals[idx].state, raw.declared_len, data)
            }
            None => CcpVerdict::Rej,
        };
        entries.push(Entry { raw, id, local_idx, preview });
    }

    let preview_worst = entries.iter().map(|e| e.preview).min().unwrap_or(CcpVerdict::Ack);
    let reject_everything = matches!(preview_worst, CcpVerdict::Rej | CcpVerdict::Fail);

    let mut judged = Vec::with_capacity(entries.len());
    let mut need_req = false;
    for entry in entries {
        let Entry { raw, id, local_idx, preview } = entry;

        let final_verdict = if reject_everything {
            CcpVerdict::Rej
        } else if let Some(idx) = local_idx {
            let data = option_body(&raw);
            locals[idx]
                .handler
                .recv_conf_req(&mut locals[idx].state, kernel, raw.declared_len, data)
        } else {
            preview
        };

        if let Some(idx) = local_idx {
            if !reject_everything && locals[idx].negotiated == NegState::Nak && preview == CcpVerdict::Ack {
                need_req = true;
            }
            locals[idx].negotiated = final_verdict.into();
        }

        judged.push(Judged { raw, id, verdict: final_verdict });
    }

    let worst = judged.iter().map(|j| j.verdict).min().unwrap_or(CcpVerdict::Ack);
    (judged, worst, need_req)
}

/// The option body past its 2-byte header, clamped the same way
/// [`OptionScan`] clamps the full entry.
fn option_body<'a>(raw: &RawOption<'a>) -> &'a [u8] {
    raw.bytes.get(ccp_wire::OPTION_HEADER_LEN..).unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::option::{CcpVerdict, NegState, OptionState};
    use ppp_sys::kernel::fake::FakeKernel;
    use std::sync::Arc;

    struct AlwaysAck;
    impl crate::option::OptionHandler for AlwaysAck {
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
        fn option_id(&self) -> u8 {
            18
        }
        fn name(&self) -> &'static str {
            "always-ack"
        }
        fn init(&self) -> Option<OptionState> {
            Some(Box::new(()))
        }
        fn encoded_len(&self, _state: &OptionState) -> u8 {
            6
        }
        fn send_conf_req(
            &self,
            _state: &mut OptionState,
            _kernel: &mut dyn KernelInterface,
            _out: &mut [u8],
        ) -> i32 {
            0
        }
        fn preview_conf_req(&self, _state: &OptionState, _declared_len: u8, _data: &[u8]) -> CcpVerdict {
            CcpVerdict::Ack
        }
        fn recv_conf_req(
            &self,
            _state: &mut OptionState,
            _kernel: &mut dyn KernelInterface,
            _declared_len: u8,
            _data: &[u8],
        ) -> CcpVerdict {
            CcpVerdict::Ack
        }
        fn print(&self, _state: &OptionState, _data: Option<&[u8]>) -> String {
            "always-ack".into()
        }
    }

    fn local(handler: Arc<dyn crate::option::OptionHandler>) -> LocalOption {
        let state = handler.init().unwrap();
        LocalOption {
            id: handler.option_id(),
            len: handler.encoded_len(&state),
            handler,
            state,
            negotiated: NegState::None,
        }
    }

    #[test]
    fn empty_body_is_trivially_acked() {
        let mut locals: Vec<LocalOption> = Vec::new();
        let mut kernel = FakeKernel::with_mtu(1500);
        let (judged, worst, need_req) = walk_conf_req(&mut locals, &mut kernel, &[]);
        assert!(judged.is_empty());
        assert_eq!(worst, CcpVerdict::Ack);
        assert!(!need_req);
    }

    #[test]
    fn unknown_option_id_is_rejected() {
        let mut locals: Vec<LocalOption> = Vec::new();
        let mut kernel = FakeKernel::with_mtu(1500);
        let body = [99u8, 4, 0xAA, 0xBB];
        let (judged, worst, _) = walk_conf_req(&mut locals, &mut kernel, &body);
        assert_eq!(judged.len(), 1);
        assert_eq!(judged[0].verdict, CcpVerdict::Rej);
        assert_eq!(worst, CcpVerdict::Rej);
    }

    #[test]
    fn registered_handler_judges_its_own_option() {
        let mut locals = vec![local(Arc::new(AlwaysAck))];
        let mut kernel = FakeKernel::with_mtu(1500);
        let body = [18u8, 6, 0x01, 0x00, 0x00, 0x40];
        let (judged, worst, _) = walk_conf_req(&mut locals, &mut kernel, &body);
        assert_eq!(judged.len(), 1);
        assert_eq!(judged[0].verdict, CcpVerdict::Ack);
        assert_eq!(worst, CcpVerdict::Ack);
    }

    /// Unregistered entries force the *entire* ConfReq to Rej, and the
    /// registered-but-otherwise-acceptable entry must be forced down with
    /// it rather than Acked on its own — matching the "one bad apple"
    /// aggregation rule every reply buffer is built from.
    #[test]
    fn worst_verdict_wins_across_multiple_options() {
        let mut locals = vec![local(Arc::new(AlwaysAck))];
        let mut kernel = FakeKernel::with_mtu(1500);
        // first option (18) acked by AlwaysAck, second (unregistered) rejected.
        let body = [18u8, 6, 0x01, 0x00, 0x00, 0x40, 99u8, 2];
        let (judged, worst, _) = walk_conf_req(&mut locals, &mut kernel, &body);
        assert_eq!(judged.len(), 2);
        assert_eq!(worst, CcpVerdict::Rej);
        assert_eq!(judged[0].verdict, CcpVerdict::Rej);
        assert_eq!(judged[1].verdict, CcpVerdict::Rej);
    }

    #[test]
    fn nak_to_ack_transition_requests_resend() {
        let mut locals = vec![local(Arc::new(AlwaysAck))];
        locals[0].negotiated = NegState::Nak;
        let mut kernel = FakeKernel::with_mtu(1500);
        let body = [18u8, 6, 0x01, 0x00, 0x00, 0x40];
        let (_, _, need_req) = walk_conf_req(&mut locals, &mut kernel, &body);
        assert!(need_req);
    }
}
