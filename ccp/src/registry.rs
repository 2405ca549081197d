//! The process-wide table of known option modules. Built once, immutable
//! after construction, shared by every CCP session via `Arc` — no locking
//! at session time, no global mutable state to reason about. The C
//! original keeps this as a file-scope array of function-pointer structs;
//! here it's an explicit, constructible value the embedding application
//! passes in, rather than a hidden `static`.

use std::sync::Arc;

use crate::option::OptionHandler;

/// An immutable lookup table of option handlers, keyed by CCP option id.
pub struct OptionRegistry {
    handlers: Vec<Arc<dyn OptionHandler>>,
}

impl OptionRegistry {
    pub fn builder() -> OptionRegistryBuilder {
        OptionRegistryBuilder { handlers: Vec::new() }
    }

    pub fn get(&self, option_id: u8) -> Option<&Arc<dyn OptionHandler>> {
        self.handlers.iter().find(|h| h.option_id() == option_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn OptionHandler>> {
        self.handlers.iter()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[derive(Default)]
pub struct OptionRegistryBuilder {
    handlers: Vec<Arc<dyn OptionHandler>>,
}

impl OptionRegistryBuilder {
    /// Registers a handler. Panics if its option id collides with one
    /// already registered — a configuration bug caught at startup, never
    /// at session time.
    pub fn register(mut self, handler: Arc<dyn OptionHandler>) -> Self {
        let id = handler.option_id();
        assert!(
            self.handlers.iter().all(|h| h.option_id() != id),
            "duplicate option id {id} registered twice ({} over existing)",
            handler.name(),
        );
        self.handlers.push(handler);
        self
    }

    pub fn build(self) -> OptionRegistry {
        OptionRegistry { handlers: self.handlers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::option::{CcpVerdict, OptionState};
    use ppp_sys::KernelInterface;

    struct StubHandler(u8, &'static str);

    impl OptionHandler for StubHandler {
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
        fn option_id(&self) -> u8 {
            self.0
        }
        fn name(&self) -> &'static str {
            self.1
        }
        fn init(&self) -> Option<OptionState> {
            Some(Box::new(()))
        }
        fn encoded_len(&self, _state: &OptionState) -> u8 {
            2
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
            self.1.to_string()
        }
    }

    #[test]
    fn looks_up_by_option_id() {
        let reg = OptionRegistry::builder()
            .register(Arc::new(StubHandler(18, "mppe")))
            .register(Arc::new(StubHandler(17, "bsdcomp")))
            .build();
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.get(18).unwrap().name(), "mppe");
        assert_eq!(reg.get(17).unwrap().name(), "bsdcomp");
        assert!(reg.get(99).is_none());
    }

    #[test]
    #[should_panic(expected = "duplicate option id")]
    fn rejects_duplicate_ids() {
        OptionRegistry::builder()
            .register(Arc::new(StubHandler(18, "mppe")))
            .register(Arc::new(StubHandler(18, "mppe-again")))
            .build();
    }
}
