//! Wire format for the PPP Compression Control Protocol (RFC 1962) and the
//! MPPE option (RFC 3078). No I/O, no allocation required for decoding;
//! encoding writes into caller-supplied buffers the way the option-handler
//! contract in `ccp` expects.

#![forbid(unsafe_code)]

use num_derive::{FromPrimitive, ToPrimitive};

/// PPP protocol number for CCP frames, as carried in the outer PPP header.
pub const CCP_PROTOCOL_NUMBER: u16 = 0x80FD;

/// `code (1) + id (1) + length (2)`. `length` covers this header plus options.
pub const HEADER_LEN: usize = 4;

/// `opt-id (1) + opt-len (1)`.
pub const OPTION_HEADER_LEN: usize = 2;

/// CCP configure/terminate codes (RFC 1661 §5, reused by CCP per RFC 1962).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum Code {
    ConfReq = 1,
    ConfAck = 2,
    ConfNak = 3,
    ConfRej = 4,
    TermReq = 5,
    TermAck = 6,
    CodeRej = 7,
}

/// A decoded CCP header. `code` is kept as the raw byte alongside the typed
/// `Code` so an unrecognized code can still be routed to a generic
/// "unknown code" handler instead of being dropped at the parse boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub code_byte: u8,
    pub code: Option<Code>,
    pub id: u8,
    /// Declared `length` field, covering header + options.
    pub length: u16,
}

impl Header {
    /// Parses the 4-byte CCP header at the start of `buf`. Returns `None`
    /// if `buf` is shorter than [`HEADER_LEN`].
    pub fn parse(buf: &[u8]) -> Option<Header> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        let code_byte = buf[0];
        let id = buf[1];
        let length = u16::from_be_bytes([buf[2], buf[3]]);
        Some(Header {
            code_byte,
            code: num_traits::FromPrimitive::from_u8(code_byte),
            id,
            length,
        })
    }

    /// Writes the 4-byte header into `out[0..4]`. Panics if `out` is too
    /// short, mirroring the caller-sized-buffer contract used throughout
    /// this crate.
    pub fn encode(code: Code, id: u8, length: u16, out: &mut [u8]) {
        out[0] = num_traits::ToPrimitive::to_u8(&code).expect("Code fits in u8");
        out[1] = id;
        out[2..4].copy_from_slice(&length.to_be_bytes());
    }
}

/// A single `opt-id, opt-len` pair as it appears at the start of an option
/// entry. `len` is the option's own declared length, options-header
/// inclusive (i.e. minimum legal value is [`OPTION_HEADER_LEN`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionHeader {
    pub id: u8,
    pub len: u8,
}

impl OptionHeader {
    pub fn parse(buf: &[u8]) -> Option<OptionHeader> {
        if buf.len() < OPTION_HEADER_LEN {
            return None;
        }
        Some(OptionHeader {
            id: buf[0],
            len: buf[1],
        })
    }
}

/// Iterates raw `(id, len_clamped, declared_len)` triples over an option
/// byte region, clamping each entry's length to the bytes actually
/// remaining so a malformed-but-parseable suffix is preserved rather than
/// aborting the whole scan. Stops as soon as an option header itself
/// doesn't fit.
pub struct OptionScan<'a> {
    rest: &'a [u8],
}

impl<'a> OptionScan<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        OptionScan { rest: buf }
    }
}

/// One raw entry from [`OptionScan`]: the full option slice (header +
/// body) clamped to what remains in the packet, and the originally
/// declared length before clamping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawOption<'a> {
    pub bytes: &'a [u8],
    pub declared_len: u8,
}

impl<'a> Iterator for OptionScan<'a> {
    type Item = RawOption<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        let hdr = OptionHeader::parse(self.rest)?;
        let declared = hdr.len as usize;
        // An option always claims at least its own header; a declared
        // length below that is nonsensical but still clamped rather than
        // treated as a parse failure.
        let take = declared.max(OPTION_HEADER_LEN).min(self.rest.len());
        let (bytes, rest) = self.rest.split_at(take);
        self.rest = rest;
        Some(RawOption {
            bytes,
            declared_len: hdr.len,
        })
    }
}

/// MPPE option id (RFC 3078).
pub const OPT_MPPE: u8 = 18;

/// MPPE option length: 2-byte option header + 4-byte flag word.
pub const MPPE_OPTION_LEN: u8 = 6;

/// MPPE flag bits, as they sit in the big-endian 32-bit flag word.
pub const MPPE_H: u32 = 1 << 24;
pub const MPPE_M: u32 = 1 << 7;
pub const MPPE_S: u32 = 1 << 6;
pub const MPPE_L: u32 = 1 << 5;
pub const MPPE_D: u32 = 1 << 4;
pub const MPPE_C: u32 = 1 << 0;

/// The only combination this core negotiates: stateless, 128-bit keys.
pub const MPPE_STATELESS_128: u32 = MPPE_S | MPPE_H;

/// Fixed MTU padding allowance MPPE consumes once negotiated.
pub const MPPE_PAD: usize = 4;

/// Parses the 4-byte big-endian MPPE flag word out of an option body
/// (i.e. `buf` starts right after the 2-byte option header).
pub fn decode_mppe_flags(buf: &[u8]) -> Option<u32> {
    if buf.len() < 4 {
        return None;
    }
    Some(u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]))
}

/// Encodes a full 6-byte MPPE option (header + flag word) into `out`.
pub fn encode_mppe_option(flags: u32, out: &mut [u8]) {
    out[0] = OPT_MPPE;
    out[1] = MPPE_OPTION_LEN;
    out[2..6].copy_from_slice(&flags.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn header_round_trips() {
        let mut buf = [0u8; HEADER_LEN];
        Header::encode(Code::ConfReq, 0x42, 10, &mut buf);
        let hdr = Header::parse(&buf).unwrap();
        assert_eq!(hdr.code, Some(Code::ConfReq));
        assert_eq!(hdr.id, 0x42);
        assert_eq!(hdr.length, 10);
    }

    #[test]
    fn header_keeps_unknown_code_byte() {
        let buf = [0xEFu8, 1, 0, 4];
        let hdr = Header::parse(&buf).unwrap();
        assert_eq!(hdr.code, None);
        assert_eq!(hdr.code_byte, 0xEF);
    }

    #[test]
    fn header_too_short_is_none() {
        assert!(Header::parse(&[1, 2, 0]).is_none());
    }

    #[test]
    fn mppe_option_round_trips() {
        let mut buf = [0u8; 6];
        encode_mppe_option(MPPE_STATELESS_128, &mut buf);
        assert_eq!(buf, [OPT_MPPE, MPPE_OPTION_LEN, 0x01, 0x00, 0x00, 0x40]);
        assert_eq!(decode_mppe_flags(&buf[2..]), Some(MPPE_STATELESS_128));
    }

    #[test]
    fn option_scan_clamps_declared_len_to_remaining() {
        // declares len=6 but only 3 bytes remain after the header.
        let buf = [18u8, 6, 0xAA];
        let mut scan = OptionScan::new(&buf);
        let entry = scan.next().unwrap();
        assert_eq!(entry.declared_len, 6);
        assert_eq!(entry.bytes.len(), 3);
        assert!(scan.next().is_none());
    }

    #[test]
    fn option_scan_walks_multiple_entries() {
        let buf = [0xFEu8, 4, 0xAA, 0xBB, OPT_MPPE, 6, 0x01, 0x00, 0x00, 0x40];
        let entries: Vec<_> = OptionScan::new(&buf).collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].bytes, &[0xFE, 4, 0xAA, 0xBB]);
        assert_eq!(entries[1].bytes, &buf[4..]);
    }

    proptest! {
        #[test]
        fn header_parse_encode_identity(code_idx in 0u8..7, id in any::<u8>(), length in any::<u16>()) {
            let code = match code_idx {
                0 => Code::ConfReq,
                1 => Code::ConfAck,
                2 => Code::ConfNak,
                3 => Code::ConfRej,
                4 => Code::TermReq,
                5 => Code::TermAck,
                _ => Code::CodeRej,
            };
            let mut buf = [0u8; HEADER_LEN];
            Header::encode(code, id, length, &mut buf);
            let hdr = Header::parse(&buf).unwrap();
            prop_assert_eq!(hdr.code, Some(code));
            prop_assert_eq!(hdr.id, id);
            prop_assert_eq!(hdr.length, length);
        }

        #[test]
        fn option_scan_never_exceeds_input_len(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let total: usize = OptionScan::new(&bytes).map(|e| e.bytes.len()).sum();
            prop_assert!(total <= bytes.len());
        }
    }
}
