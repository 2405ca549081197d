//! The CCP layer itself: owns the negotiation FSM, the per-session option
//! list built from the registry at `start`, and the kernel handle each
//! option handler is lent while it runs. Grounded on the C original's
//! `ccp_layer_start`/`ccp_recv`/`ccp_layer_finished`/`ccp_layer_free`
//! quartet — collapsed here into `start`/`recv`/`finish`/`Drop`.

use std::sync::Arc;

use ccp_wire::{Code, Header, HEADER_LEN};
use ppp_sys::{CcpFlags, Fsm, FsmCallbacks, KernelInterface};
use tracing::{debug, info, instrument, warn};

use crate::config::CcpConfig;
use crate::error::{CcpError, CcpResult};
use crate::option::{CcpVerdict, LocalOption, NegState};
use crate::received::{self, Judged};
use crate::registry::OptionRegistry;
use crate::report::LayerReport;

/// One CCP session over a single PPP link. Generic over the kernel
/// data-path handle so it never depends on a concrete OS binding — tests
/// run it against `ppp_sys::kernel::fake::FakeKernel`, a real engine
/// against whatever wraps its ioctls.
pub struct CcpLayer<K: KernelInterface> {
    fsm: Fsm,
    registry: Arc<OptionRegistry>,
    config: CcpConfig,
    kernel: K,
    locals: Vec<LocalOption>,
    next_id: u8,
    /// The `id` byte off the peer's most recent ConfReq/TermReq, echoed
    /// back verbatim in our Ack/Nak/Rej/TermAck.
    rx_id: u8,
    rx_ack_bytes: Vec<u8>,
    rx_nak_bytes: Vec<u8>,
    rx_rej_bytes: Vec<u8>,
    outbound: Vec<Vec<u8>>,
    reports: Vec<LayerReport>,
    mppe_active: bool,
    /// Suppresses the actual ConfReq write in `send_conf_req` while true.
    /// The FSM still runs its ordinary transitions underneath (`open()` is
    /// always called from `start()`); this only silences the one outbound
    /// write, cleared the moment the peer's ConfReq Acks cleanly.
    passive: bool,
    /// Set mid-walk when a local option flips Nak -> Ack while judging the
    /// peer's ConfReq; consumed (and reset) by the next `send_conf_req`.
    need_req: bool,
}

impl<K: KernelInterface> CcpLayer<K> {
    /// Constructs a layer in the `Initial` state. Negotiation doesn't
    /// begin until [`CcpLayer::start`] and [`CcpLayer::lower_up`] (or
    /// `open`) are called — mirroring the C original's separate
    /// `ccp_layer_init`/`ccp_layer_start` split.
    pub fn new(registry: Arc<OptionRegistry>, config: CcpConfig, kernel: K) -> Self {
        let passive = config.passive;
        CcpLayer {
            fsm: Fsm::new(),
            registry,
            config,
            kernel,
            locals: Vec::new(),
            next_id: 0,
            rx_id: 0,
            rx_ack_bytes: Vec::new(),
            rx_nak_bytes: Vec::new(),
            rx_rej_bytes: Vec::new(),
            outbound: Vec::new(),
            reports: Vec::new(),
            mppe_active: false,
            passive,
            need_req: false,
        }
    }

    pub fn state(&self) -> ppp_sys::FsmState {
        self.fsm.state()
    }

    /// Builds this session's local option list from the registry and
    /// brings `CCP_OPEN` up on the kernel side. Per-handler `init` runs
    /// exactly once here, for the life of the session.
    #[instrument(skip(self), fields(options = self.registry.len()))]
    pub fn start(&mut self) -> CcpResult<()> {
        self.locals.clear();
        for handler in self.registry.iter() {
            if let Some(state) = handler.init() {
                let len = handler.encoded_len(&state);
                debug!(option = handler.name(), len, "local option initialized");
                self.locals.push(LocalOption {
                    id: handler.option_id(),
                    len,
                    handler: Arc::clone(handler),
                    state,
                    negotiated: NegState::None,
                });
            }
        }
        self.kernel
            .set_ccp_flags(CcpFlags { ccp_open: true, ccp_up: false })
            .map_err(CcpError::KernelFlags)?;
        // Always drives the FSM open, passive or not — a passive session
        // still advances through ReqSent etc, it's `send_conf_req` itself
        // that swallows the actual outbound write while passive.
        self.with_fsm(|fsm, cb| fsm.open(cb));
        Ok(())
    }

    /// `Up`: the PPP link itself has come up.
    pub fn lower_up(&mut self) {
        self.with_fsm(|fsm, cb| fsm.lower_up(cb));
    }

    /// `Down`: the PPP link itself has gone down.
    pub fn lower_down(&mut self) {
        self.with_fsm(|fsm, cb| fsm.lower_down(cb));
    }

    pub fn open(&mut self) {
        self.with_fsm(|fsm, cb| fsm.open(cb));
    }

    pub fn close(&mut self) {
        self.with_fsm(|fsm, cb| fsm.close(cb));
    }

    /// Tears the session down immediately, without the graceful
    /// Terminate-Request exchange — the outer engine's link is already
    /// gone. No further I/O is produced.
    pub fn finish(&mut self) {
        if self.fsm.state() == ppp_sys::FsmState::Opened {
            self.teardown_kernel_state();
            self.reports.push(LayerReport::Finished);
        }
        self.fsm.force_closed();
    }

    /// Processes one received CCP packet (PPP protocol 0x80FD payload).
    #[instrument(skip(self, pkt), fields(len = pkt.len()))]
    pub fn recv(&mut self, pkt: &[u8]) -> CcpResult<()> {
        if matches!(self.fsm.state(), ppp_sys::FsmState::Initial | ppp_sys::FsmState::Closed) {
            debug!(state = ?self.fsm.state(), "CCP not open; protocol-rejecting frame upstream");
            self.reports.push(LayerReport::ProtocolReject(pkt.to_vec()));
            return Ok(());
        }
        let hdr = Header::parse(pkt).ok_or(CcpError::Malformed("frame shorter than CCP header"))?;
        let end = (hdr.length as usize).clamp(HEADER_LEN, pkt.len());
        let body = &pkt[HEADER_LEN..end];

        match hdr.code {
            Some(Code::ConfReq) => self.handle_conf_req(hdr.id, body),
            Some(Code::ConfAck) => self.handle_conf_ack(hdr.id, body),
            Some(Code::ConfNak) => self.handle_conf_nak(hdr.id, body),
            Some(Code::ConfRej) => self.handle_conf_rej(hdr.id, body),
            Some(Code::TermReq) => {
                self.rx_id = hdr.id;
                self.with_fsm(|fsm, cb| fsm.recv_term_req(cb));
                Ok(())
            }
            Some(Code::TermAck) => {
                self.with_fsm(|fsm, cb| fsm.recv_term_ack(cb));
                Ok(())
            }
            Some(Code::CodeRej) => {
                self.with_fsm(|fsm, cb| fsm.recv_code_rej_bad(cb));
                Ok(())
            }
            None => {
                warn!(code = hdr.code_byte, "unrecognized CCP code");
                self.fsm.recv_unk();
                Ok(())
            }
        }
    }

    /// Drains and returns every CCP packet queued for transmission since
    /// the last call.
    pub fn take_outbound(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.outbound)
    }

    /// Drains and returns every upward report queued since the last call.
    pub fn take_reports(&mut self) -> Vec<LayerReport> {
        std::mem::take(&mut self.reports)
    }

    pub fn kernel_mut(&mut self) -> &mut K {
        &mut self.kernel
    }

    /// Delivers a fresh MPPE key pair to the registered MPPE option, if
    /// one is negotiated on this session. This is the Key-Event
    /// Subscriber surface: the outer authentication layer calls it
    /// whenever it derives new keys, independent of the ConfReq/ConfAck
    /// exchange that only ever agreed *that* stateless-128 keys would be
    /// used, never *which* keys.
    pub fn apply_mppe_key_event(&mut self, event: crate::mppe::MppeKeyEvent) -> CcpResult<()> {
        let Some(local) = self.locals.iter_mut().find(|l| l.id == ccp_wire::OPT_MPPE) else {
            warn!("MPPE key event delivered but MPPE is not a local option on this session");
            return Err(CcpError::HandlerFatal);
        };
        let handler = local
            .handler
            .as_any()
            .downcast_ref::<crate::mppe::MppeHandler>()
            .expect("the option registered under OPT_MPPE must be an MppeHandler");
        handler
            .apply_key_event(&mut local.state, &mut self.kernel, event)
            .map_err(|()| CcpError::HandlerFatal)?;
        self.mppe_active = true;
        Ok(())
    }

    fn handle_conf_req(&mut self, id: u8, body: &[u8]) -> CcpResult<()> {
        self.rx_id = id;
        let (judged, worst, need_req) =
            received::walk_conf_req(&mut self.locals, &mut self.kernel, body);
        self.rebuild_reply_buffers(&judged);
        if need_req {
            self.need_req = true;
        }
        match worst {
            CcpVerdict::Ack => {
                self.with_fsm(|fsm, cb| fsm.recv_conf_req_ack(cb));
                if self.passive {
                    self.passive = false;
                    self.send_conf_req();
                }
            }
            CcpVerdict::Nak => self.with_fsm(|fsm, cb| fsm.recv_conf_req_nak(cb)),
            CcpVerdict::Rej | CcpVerdict::Fail => {
                self.with_fsm(|fsm, cb| fsm.recv_conf_req_rej(cb))
            }
        }
        Ok(())
    }

    fn handle_conf_ack(&mut self, id: u8, body: &[u8]) -> CcpResult<()> {
        if id != self.next_id {
            debug!(id, expected = self.next_id, "ConfAck id mismatch, discarding");
            return Ok(());
        }
        for raw in ccp_wire::OptionScan::new(body) {
            let opt_id = raw.bytes.first().copied().unwrap_or(0);
            let data = raw.bytes.get(ccp_wire::OPTION_HEADER_LEN..).unwrap_or(&[]);
            if let Some(local) = self.locals.iter_mut().find(|l| l.id == opt_id) {
                if local.handler.recv_conf_ack(&mut local.state, data).is_err() {
                    return self.fail_negotiation("option handler rejected its own ConfAck");
                }
                local.negotiated = NegState::Ack;
            }
        }
        self.with_fsm(|fsm, cb| fsm.recv_conf_ack(cb));
        if self.need_req {
            self.send_conf_req();
        }
        Ok(())
    }

    fn handle_conf_nak(&mut self, id: u8, body: &[u8]) -> CcpResult<()> {
        if id != self.next_id {
            debug!(id, expected = self.next_id, "ConfNak id mismatch, discarding");
            return Ok(());
        }
        for raw in ccp_wire::OptionScan::new(body) {
            let opt_id = raw.bytes.first().copied().unwrap_or(0);
            let data = raw.bytes.get(ccp_wire::OPTION_HEADER_LEN..).unwrap_or(&[]);
            if let Some(local) = self.locals.iter_mut().find(|l| l.id == opt_id) {
                if local.handler.recv_conf_nak(&mut local.state, data).is_err() {
                    return self.fail_negotiation("option handler rejected a ConfNak counter-proposal");
                }
                local.negotiated = NegState::Nak;
            }
        }
        self.with_fsm(|fsm, cb| fsm.recv_conf_rej(cb));
        Ok(())
    }

    fn handle_conf_rej(&mut self, id: u8, body: &[u8]) -> CcpResult<()> {
        if id != self.next_id {
            debug!(id, expected = self.next_id, "ConfRej id mismatch, discarding");
            return Ok(());
        }
        for raw in ccp_wire::OptionScan::new(body) {
            let opt_id = raw.bytes.first().copied().unwrap_or(0);
            let data = raw.bytes.get(ccp_wire::OPTION_HEADER_LEN..).unwrap_or(&[]);
            if let Some(local) = self.locals.iter_mut().find(|l| l.id == opt_id) {
                match local.handler.recv_conf_rej(&mut local.state, data) {
                    Some(Ok(())) => local.negotiated = NegState::Rej,
                    Some(Err(())) | None => {
                        return self.fail_negotiation("option handler has no recovery from ConfRej");
                    }
                }
            }
        }
        self.with_fsm(|fsm, cb| fsm.recv_conf_rej(cb));
        Ok(())
    }

    fn fail_negotiation(&mut self, reason: &'static str) -> CcpResult<()> {
        warn!(reason, "CCP negotiation failed");
        self.reports.push(LayerReport::Terminate(reason));
        self.with_fsm(|fsm, cb| fsm.close(cb));
        Err(CcpError::HandlerFatal)
    }

    fn rebuild_reply_buffers(&mut self, judged: &[Judged<'_>]) {
        self.rx_ack_bytes.clear();
        self.rx_nak_bytes.clear();
        self.rx_rej_bytes.clear();
        for j in judged {
            match j.verdict {
                CcpVerdict::Ack => self.rx_ack_bytes.extend_from_slice(j.raw.bytes),
                CcpVerdict::Rej | CcpVerdict::Fail => {
                    self.rx_rej_bytes.extend_from_slice(j.raw.bytes)
                }
                CcpVerdict::Nak => {
                    if let Some(local) = self.locals.iter_mut().find(|l| l.id == j.id) {
                        let mut buf = vec![0u8; local.len as usize];
                        let written =
                            local.handler.send_conf_nak(&mut local.state, &mut self.kernel, &mut buf);
                        if written > 0 {
                            buf.truncate(written as usize);
                            self.rx_nak_bytes.extend_from_slice(&buf);
                        }
                    } else {
                        self.rx_nak_bytes.extend_from_slice(j.raw.bytes);
                    }
                }
            }
        }
    }

    fn teardown_kernel_state(&mut self) {
        if let Err(e) = self.kernel.set_ccp_flags(CcpFlags { ccp_open: true, ccp_up: false }) {
            warn!(error = %e, "failed to clear CCP_UP on teardown");
        }
        if self.mppe_active {
            if let Ok(mtu) = self.kernel.get_mtu() {
                let _ = self.kernel.set_mtu(mtu + self.config.mppe_pad as u32);
            }
            self.mppe_active = false;
        }
    }

    fn with_fsm<F: FnOnce(&mut Fsm, &mut Self)>(&mut self, f: F) {
        let mut fsm = self.fsm;
        f(&mut fsm, self);
        self.fsm = fsm;
    }
}

impl<K: KernelInterface> FsmCallbacks for CcpLayer<K> {
    fn layer_up(&mut self) {
        let mppe_negotiated = self
            .locals
            .iter()
            .any(|l| l.id == ccp_wire::OPT_MPPE && l.negotiated == NegState::Ack);
        if let Err(e) = self.kernel.set_ccp_flags(CcpFlags { ccp_open: true, ccp_up: true }) {
            warn!(error = %e, "failed to set CCP_UP");
        }
        if mppe_negotiated {
            if let Ok(mtu) = self.kernel.get_mtu() {
                let reduced = mtu.saturating_sub(self.config.mppe_pad as u32);
                if self.kernel.set_mtu(reduced).is_ok() {
                    self.mppe_active = true;
                }
            }
        }
        info!(mppe = mppe_negotiated, "CCP layer up");
        self.reports.push(LayerReport::Started);
    }

    fn layer_finished(&mut self) {
        self.teardown_kernel_state();
        info!("CCP layer finished");
        self.reports.push(LayerReport::Finished);
    }

    fn send_conf_req(&mut self) {
        self.need_req = false;
        if self.passive {
            debug!("passive: suppressing outbound ConfReq");
            return;
        }
        self.next_id = self.next_id.wrapping_add(1);
        let total: usize = self.locals.iter().map(|l| l.len as usize).sum();
        let mut pkt = vec![0u8; HEADER_LEN + total];
        let mut offset = HEADER_LEN;
        for local in &mut self.locals {
            let written =
                local.handler.send_conf_req(&mut local.state, &mut self.kernel, &mut pkt[offset..]);
            if written > 0 {
                offset += written as usize;
            }
        }
        pkt.truncate(offset);
        Header::encode(Code::ConfReq, self.next_id, offset as u16, &mut pkt[..HEADER_LEN]);
        debug!(id = self.next_id, len = offset, "sending ConfReq");
        self.outbound.push(pkt);
    }

    fn send_conf_ack(&mut self) {
        let len = HEADER_LEN + self.rx_ack_bytes.len();
        let mut pkt = vec![0u8; len];
        Header::encode(Code::ConfAck, self.rx_id, len as u16, &mut pkt[..HEADER_LEN]);
        pkt[HEADER_LEN..].copy_from_slice(&self.rx_ack_bytes);
        debug!(id = self.rx_id, len, "sending ConfAck");
        self.outbound.push(pkt);
    }

    fn send_conf_nak(&mut self) {
        let len = HEADER_LEN + self.rx_nak_bytes.len();
        let mut pkt = vec![0u8; len];
        Header::encode(Code::ConfNak, self.rx_id, len as u16, &mut pkt[..HEADER_LEN]);
        pkt[HEADER_LEN..].copy_from_slice(&self.rx_nak_bytes);
        debug!(id = self.rx_id, len, "sending ConfNak");
        self.outbound.push(pkt);
    }

    fn send_conf_rej(&mut self) {
        let len = HEADER_LEN + self.rx_rej_bytes.len();
        let mut pkt = vec![0u8; len];
        Header::encode(Code::ConfRej, self.rx_id, len as u16, &mut pkt[..HEADER_LEN]);
        pkt[HEADER_LEN..].copy_from_slice(&self.rx_rej_bytes);
        debug!(id = self.rx_id, len, "sending ConfRej");
        self.outbound.push(pkt);
    }

    fn send_term_req(&mut self) {
        self.next_id = self.next_id.wrapping_add(1);
        let mut pkt = vec![0u8; HEADER_LEN];
        Header::encode(Code::TermReq, self.next_id, HEADER_LEN as u16, &mut pkt);
        self.outbound.push(pkt);
    }

    fn send_term_ack(&mut self) {
        let mut pkt = vec![0u8; HEADER_LEN];
        Header::encode(Code::TermAck, self.rx_id, HEADER_LEN as u16, &mut pkt);
        self.outbound.push(pkt);
    }
}
