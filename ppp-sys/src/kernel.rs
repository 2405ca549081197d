//! The kernel data-path configuration interface: a narrow side-channel the
//! CCP/MPPE logic calls out to, never implements. A real engine backs this
//! with `ioctl(PPPIOCSFLAGS/PPPIOCSCOMPRESS)` and `SIOC{G,S}IFMTU`; this
//! crate only describes the contract.

use thiserror::Error;

/// Which direction an MPPE key applies to, mirroring the C source's
/// `transmit` boolean on `struct ppp_option_data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Transmit,
    Receive,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("failed to read PPP interface flags")]
    GetFlags,
    #[error("failed to write PPP interface flags")]
    SetFlags,
    #[error("kernel does not support MPPE compression for this link")]
    MppeUnsupported,
    #[error("failed to read interface MTU")]
    GetMtu,
    #[error("failed to write interface MTU")]
    SetMtu,
}

/// The PPP interface flags this crate cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CcpFlags {
    pub ccp_open: bool,
    pub ccp_up: bool,
}

/// Everything CCP/MPPE needs from the data path below. One instance per
/// PPP session, owned by the outer engine and lent to `CcpLayer`.
pub trait KernelInterface {
    /// Sets `CCP_OPEN`/`CCP_UP` on the PPP unit (`PPPIOCSFLAGS`).
    fn set_ccp_flags(&mut self, flags: CcpFlags) -> Result<(), KernelError>;

    /// Installs a 128-bit, stateless MPPE key for one direction
    /// (`PPPIOCSCOMPRESS`). `None` clears/omits the key.
    fn install_mppe_key(&mut self, direction: Direction, key: [u8; 16]) -> Result<(), KernelError>;

    fn get_mtu(&mut self) -> Result<u32, KernelError>;
    fn set_mtu(&mut self, mtu: u32) -> Result<(), KernelError>;
}

/// Test double for [`KernelInterface`]: keeps driver logic compiling and
/// testable against fakes under `#[cfg(test)]` rather than the real OS
/// binding.
#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::*;

    #[derive(Debug, Default)]
    pub struct FakeKernel {
        pub flags: CcpFlags,
        pub tx_key: Option<[u8; 16]>,
        pub rx_key: Option<[u8; 16]>,
        pub mtu: u32,
        pub fail_set_flags: bool,
        pub fail_install_key: Option<Direction>,
        pub fail_mtu: bool,
        pub set_flags_calls: u32,
        pub install_key_calls: u32,
    }

    impl FakeKernel {
        pub fn with_mtu(mtu: u32) -> Self {
            FakeKernel {
                mtu,
                ..Default::default()
            }
        }
    }

    impl KernelInterface for FakeKernel {
        fn set_ccp_flags(&mut self, flags: CcpFlags) -> Result<(), KernelError> {
            self.set_flags_calls += 1;
            if self.fail_set_flags {
                return Err(KernelError::SetFlags);
            }
            self.flags = flags;
            Ok(())
        }

        fn install_mppe_key(
            &mut self,
            direction: Direction,
            key: [u8; 16],
        ) -> Result<(), KernelError> {
            self.install_key_calls += 1;
            if self.fail_install_key == Some(direction) {
                return Err(KernelError::MppeUnsupported);
            }
            match direction {
                Direction::Transmit => self.tx_key = Some(key),
                Direction::Receive => self.rx_key = Some(key),
            }
            Ok(())
        }

        fn get_mtu(&mut self) -> Result<u32, KernelError> {
            if self.fail_mtu {
                return Err(KernelError::GetMtu);
            }
            Ok(self.mtu)
        }

        fn set_mtu(&mut self, mtu: u32) -> Result<(), KernelError> {
            if self.fail_mtu {
                return Err(KernelError::SetMtu);
            }
            self.mtu = mtu;
            Ok(())
        }
    }
}
