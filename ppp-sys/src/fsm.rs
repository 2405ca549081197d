//! The generic PPP control-protocol FSM (RFC 1661 §4, Appendix A). Shared
//! by any control protocol that negotiates via Configure-Request/Ack/Nak/
//! Reject — CCP here, LCP/IPCP elsewhere — hence its home in `ppp-sys`
//! rather than in `ccp`.
//!
//! Retransmission timing (RFC 1661's TO+/TO- restart-counter events) is the
//! driver's responsibility, not this module's: callers that want retries
//! feed [`Fsm::timeout`] themselves on whatever schedule their reactor
//! uses. This type only holds the pure state and the RFC table's actions.

/// One of the ten states of RFC 1661 §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmState {
    Initial,
    Starting,
    Closed,
    Stopped,
    Closing,
    Stopping,
    ReqSent,
    AckRcvd,
    AckSent,
    Opened,
}

/// Callbacks the FSM invokes on its owner: only `layer_up`/`layer_finished`
/// and the six `send_*` actions are exposed — no `layer_down`/
/// `layer_started`, since a CCP layer has no use for them (its "lower
/// layer" is the already-up PPP link).
pub trait FsmCallbacks {
    fn layer_up(&mut self);
    fn layer_finished(&mut self);
    fn send_conf_req(&mut self);
    fn send_conf_ack(&mut self);
    fn send_conf_nak(&mut self);
    fn send_conf_rej(&mut self);
    fn send_term_req(&mut self);
    fn send_term_ack(&mut self);
}

/// A pure, synchronous RFC 1661 control-protocol FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fsm {
    state: FsmState,
}

impl Default for Fsm {
    fn default() -> Self {
        Self::new()
    }
}

impl Fsm {
    pub fn new() -> Self {
        Fsm {
            state: FsmState::Initial,
        }
    }

    pub fn state(&self) -> FsmState {
        self.state
    }

    /// `Up`: the lower layer (the PPP link itself) has come up.
    pub fn lower_up<C: FsmCallbacks>(&mut self, cb: &mut C) {
        self.state = match self.state {
            FsmState::Initial => FsmState::Closed,
            FsmState::Starting => {
                cb.send_conf_req();
                FsmState::ReqSent
            }
            other => other,
        };
    }

    /// `Down`: the lower layer has gone away.
    pub fn lower_down<C: FsmCallbacks>(&mut self, cb: &mut C) {
        self.state = match self.state {
            FsmState::Closed => FsmState::Initial,
            FsmState::Stopped => FsmState::Starting,
            FsmState::Opened => {
                cb.layer_finished();
                FsmState::Starting
            }
            FsmState::Initial | FsmState::Starting => self.state,
            _ => FsmState::Starting,
        };
    }

    /// `Open`: administrative request to begin/continue negotiation.
    pub fn open<C: FsmCallbacks>(&mut self, cb: &mut C) {
        self.state = match self.state {
            FsmState::Initial => FsmState::Starting,
            FsmState::Closed => {
                cb.send_conf_req();
                FsmState::ReqSent
            }
            FsmState::Closing => FsmState::Stopping,
            FsmState::Stopped | FsmState::Stopping => {
                cb.send_conf_req();
                FsmState::ReqSent
            }
            other => other,
        };
    }

    /// `Close`: administrative request to end negotiation / tear down.
    pub fn close<C: FsmCallbacks>(&mut self, cb: &mut C) {
        self.state = match self.state {
            FsmState::Initial => FsmState::Initial,
            FsmState::Starting => FsmState::Initial,
            FsmState::Closed | FsmState::Stopped => FsmState::Closed,
            FsmState::Closing => FsmState::Closing,
            FsmState::Stopping => FsmState::Closing,
            FsmState::ReqSent | FsmState::AckRcvd | FsmState::AckSent => {
                cb.send_term_req();
                FsmState::Closing
            }
            FsmState::Opened => {
                cb.layer_finished();
                cb.send_term_req();
                FsmState::Closing
            }
        };
    }

    /// Forces the FSM straight to `Closed` with no further I/O — used by
    /// a layer's `finish` while the outer engine is tearing the session
    /// down, skipping the graceful Terminate-Request exchange.
    pub fn force_closed(&mut self) {
        self.state = FsmState::Closed;
    }

    /// `RCR+`: our own option walk accepted the peer's ConfReq (in full).
    pub fn recv_conf_req_ack<C: FsmCallbacks>(&mut self, cb: &mut C) {
        self.state = match self.state {
            FsmState::Closed | FsmState::Stopped => {
                cb.send_term_ack();
                self.closed_or_stopped()
            }
            FsmState::ReqSent => {
                cb.send_conf_ack();
                FsmState::AckSent
            }
            FsmState::AckRcvd => {
                cb.send_conf_ack();
                cb.layer_up();
                FsmState::Opened
            }
            FsmState::AckSent => {
                cb.send_conf_ack();
                FsmState::AckSent
            }
            FsmState::Opened => {
                cb.layer_finished();
                cb.send_conf_req();
                FsmState::ReqSent
            }
            other => other,
        };
    }

    /// `RCR-`: our own option walk could not fully accept the peer's
    /// ConfReq (Nak or Rej was needed on at least one option).
    pub fn recv_conf_req_bad<C: FsmCallbacks>(&mut self, cb: &mut C) {
        self.state = match self.state {
            FsmState::Closed | FsmState::Stopped => {
                cb.send_term_ack();
                self.closed_or_stopped()
            }
            FsmState::ReqSent | FsmState::AckSent => {
                cb.send_conf_nak();
                FsmState::ReqSent
            }
            FsmState::AckRcvd => {
                cb.send_conf_nak();
                FsmState::AckRcvd
            }
            FsmState::Opened => {
                cb.layer_finished();
                cb.send_conf_req();
                FsmState::ReqSent
            }
            other => other,
        };
    }

    /// `RCR-` split by verdict into three distinctly named entry points;
    /// Nak and Rej share RFC 1661's RCR- transition (see DESIGN.md).
    pub fn recv_conf_req_nak<C: FsmCallbacks>(&mut self, cb: &mut C) {
        self.recv_conf_req_bad(cb);
    }

    pub fn recv_conf_req_rej<C: FsmCallbacks>(&mut self, cb: &mut C) {
        self.recv_conf_req_bad(cb);
    }

    /// `RCA`: peer acknowledged the ConfReq we sent.
    pub fn recv_conf_ack<C: FsmCallbacks>(&mut self, cb: &mut C) {
        self.state = match self.state {
            FsmState::Closed | FsmState::Stopped => self.state,
            FsmState::ReqSent => FsmState::AckRcvd,
            FsmState::AckRcvd => {
                cb.send_conf_req();
                FsmState::ReqSent
            }
            FsmState::AckSent => {
                cb.layer_up();
                FsmState::Opened
            }
            FsmState::Opened => {
                cb.layer_finished();
                cb.send_conf_req();
                FsmState::ReqSent
            }
            other => other,
        };
    }

    /// `RCN`: peer Nak'd or Rej'd the ConfReq we sent (both ConfNak and
    /// ConfRej map to this one event).
    pub fn recv_conf_rej<C: FsmCallbacks>(&mut self, cb: &mut C) {
        self.state = match self.state {
            FsmState::Closed | FsmState::Stopped => self.state,
            FsmState::ReqSent | FsmState::AckRcvd => {
                cb.send_conf_req();
                FsmState::ReqSent
            }
            FsmState::AckSent => {
                cb.send_conf_req();
                FsmState::ReqSent
            }
            FsmState::Opened => {
                cb.layer_finished();
                cb.send_conf_req();
                FsmState::ReqSent
            }
            other => other,
        };
    }

    /// `RTR`: peer sent a Terminate-Request.
    pub fn recv_term_req<C: FsmCallbacks>(&mut self, cb: &mut C) {
        if self.state == FsmState::Opened {
            cb.layer_finished();
        }
        cb.send_term_ack();
        self.state = match self.state {
            FsmState::Closed | FsmState::Stopped | FsmState::Closing | FsmState::Stopping => {
                self.state
            }
            _ => FsmState::Stopping,
        };
    }

    /// `RTA`: peer acknowledged our Terminate-Request.
    pub fn recv_term_ack<C: FsmCallbacks>(&mut self, cb: &mut C) {
        self.state = match self.state {
            FsmState::Closing => FsmState::Closed,
            FsmState::Stopping => FsmState::Stopped,
            FsmState::ReqSent | FsmState::AckRcvd | FsmState::AckSent => FsmState::ReqSent,
            FsmState::Opened => {
                cb.layer_finished();
                cb.send_conf_req();
                FsmState::ReqSent
            }
            other => other,
        };
    }

    /// `RUC`: an unrecognized code arrived; RFC 1661 just rejects it, no
    /// state change.
    pub fn recv_unk(&mut self) {}

    /// `RXJ-`: a fatal Code-Reject arrived for this protocol.
    pub fn recv_code_rej_bad<C: FsmCallbacks>(&mut self, cb: &mut C) {
        self.state = match self.state {
            FsmState::Closed => FsmState::Closed,
            FsmState::Stopped => FsmState::Stopped,
            FsmState::Closing => FsmState::Closed,
            FsmState::Stopping => FsmState::Stopped,
            FsmState::ReqSent | FsmState::AckRcvd | FsmState::AckSent => {
                cb.layer_finished();
                FsmState::Closed
            }
            FsmState::Opened => {
                cb.layer_finished();
                FsmState::Closed
            }
            FsmState::Initial | FsmState::Starting => self.state,
        };
    }

    fn closed_or_stopped(&self) -> FsmState {
        match self.state {
            FsmState::Stopped => FsmState::Stopped,
            _ => FsmState::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counters {
        ups: u32,
        finishes: u32,
        reqs: u32,
        acks: u32,
        naks: u32,
        rejs: u32,
        term_reqs: u32,
        term_acks: u32,
    }

    impl FsmCallbacks for Counters {
        fn layer_up(&mut self) {
            self.ups += 1;
        }
        fn layer_finished(&mut self) {
            self.finishes += 1;
        }
        fn send_conf_req(&mut self) {
            self.reqs += 1;
        }
        fn send_conf_ack(&mut self) {
            self.acks += 1;
        }
        fn send_conf_nak(&mut self) {
            self.naks += 1;
        }
        fn send_conf_rej(&mut self) {
            self.rejs += 1;
        }
        fn send_term_req(&mut self) {
            self.term_reqs += 1;
        }
        fn send_term_ack(&mut self) {
            self.term_acks += 1;
        }
    }

    #[test]
    fn happy_path_reaches_opened() {
        let mut fsm = Fsm::new();
        let mut cb = Counters::default();
        fsm.lower_up(&mut cb);
        assert_eq!(fsm.state(), FsmState::Closed);
        fsm.open(&mut cb);
        assert_eq!(fsm.state(), FsmState::ReqSent);
        assert_eq!(cb.reqs, 1);
        fsm.recv_conf_req_ack(&mut cb);
        assert_eq!(fsm.state(), FsmState::AckSent);
        assert_eq!(cb.acks, 1);
        fsm.recv_conf_ack(&mut cb);
        assert_eq!(fsm.state(), FsmState::Opened);
        assert_eq!(cb.ups, 1);
    }

    #[test]
    fn nak_loop_keeps_requesting() {
        let mut fsm = Fsm::new();
        let mut cb = Counters::default();
        fsm.lower_up(&mut cb);
        fsm.open(&mut cb);
        fsm.recv_conf_req_nak(&mut cb);
        assert_eq!(fsm.state(), FsmState::ReqSent);
        assert_eq!(cb.naks, 1);
    }

    #[test]
    fn term_req_in_opened_reports_finished_then_acks() {
        let mut fsm = Fsm::new();
        let mut cb = Counters::default();
        fsm.lower_up(&mut cb);
        fsm.open(&mut cb);
        fsm.recv_conf_req_ack(&mut cb);
        fsm.recv_conf_ack(&mut cb);
        assert_eq!(fsm.state(), FsmState::Opened);
        fsm.recv_term_req(&mut cb);
        assert_eq!(cb.finishes, 1);
        assert_eq!(cb.term_acks, 1);
        assert_eq!(fsm.state(), FsmState::Stopping);
    }

    #[test]
    fn finish_forces_closed_without_callbacks() {
        let mut fsm = Fsm::new();
        let mut cb = Counters::default();
        fsm.lower_up(&mut cb);
        fsm.open(&mut cb);
        fsm.recv_conf_req_ack(&mut cb);
        fsm.recv_conf_ack(&mut cb);
        assert_eq!(fsm.state(), FsmState::Opened);
        fsm.force_closed();
        assert_eq!(fsm.state(), FsmState::Closed);
        // no additional finish callback is expected from force_closed; the
        // caller (CcpLayer::finish) reports upward itself.
        assert_eq!(cb.finishes, 0);
    }
}
