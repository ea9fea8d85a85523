//! The fixed rule-entry header.

use std::net::Ipv6Addr;

use crate::{AbiError, IFNAMSIZ, IfacePattern, Result};

/// Presence bit: the protocol field is constrained.
pub const F_PROTO: u8 = 0x01;

/// Invert the input-interface comparison.
pub const INV_VIA_IN: u8 = 0x01;
/// Invert the output-interface comparison.
pub const INV_VIA_OUT: u8 = 0x02;
/// Invert the source-address comparison.
pub const INV_SRCIP: u8 = 0x08;
/// Invert the destination-address comparison.
pub const INV_DSTIP: u8 = 0x10;
/// Invert the protocol comparison.
pub const INV_PROTO: u8 = 0x40;

/// Caching hints stamped into `nfcache` as fields are constrained.
pub const NFC_PROTO: u32 = 0x0001;
pub const NFC_SRC: u32 = 0x0002;
pub const NFC_DST: u32 = 0x0004;
pub const NFC_IF_IN: u32 = 0x0008;
pub const NFC_IF_OUT: u32 = 0x0010;

/// Packet and byte counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counters {
    pub packets: u64,
    pub bytes: u64,
}

/// The fixed-layout header of a rule.
///
/// Encoded layout (little-endian, [`Entry::LEN`] bytes):
///
/// | offset | field                         |
/// |--------|-------------------------------|
/// | 0      | src, dst, smsk, dmsk (16 each)|
/// | 64     | iniface, outiface (16 each)   |
/// | 96     | iniface/outiface mask (16 ea.)|
/// | 128    | proto u16, flags u8, inv u8   |
/// | 132    | nfcache u32                   |
/// | 136    | target_offset u16, next u16   |
/// | 140    | 4 pad bytes                   |
/// | 144    | packet count u64, byte count  |
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
    pub smsk: Ipv6Addr,
    pub dmsk: Ipv6Addr,
    pub iniface: IfacePattern,
    pub outiface: IfacePattern,
    pub proto: u16,
    pub flags: u8,
    pub invflags: u8,
    pub nfcache: u32,
    pub target_offset: u16,
    pub next_offset: u16,
    pub counters: Counters,
}

impl Default for Entry {
    fn default() -> Self {
        Self {
            src: Ipv6Addr::UNSPECIFIED,
            dst: Ipv6Addr::UNSPECIFIED,
            smsk: Ipv6Addr::UNSPECIFIED,
            dmsk: Ipv6Addr::UNSPECIFIED,
            iniface: IfacePattern::any(),
            outiface: IfacePattern::any(),
            proto: 0,
            flags: 0,
            invflags: 0,
            nfcache: 0,
            target_offset: 0,
            next_offset: 0,
            counters: Counters::default(),
        }
    }
}

impl Entry {
    /// Encoded header length; a multiple of the ABI alignment.
    pub const LEN: usize = 160;

    /// Encode into exactly [`Entry::LEN`] bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        buf[0..16].copy_from_slice(&self.src.octets());
        buf[16..32].copy_from_slice(&self.dst.octets());
        buf[32..48].copy_from_slice(&self.smsk.octets());
        buf[48..64].copy_from_slice(&self.dmsk.octets());
        buf[64..80].copy_from_slice(&self.iniface.name);
        buf[80..96].copy_from_slice(&self.outiface.name);
        buf[96..112].copy_from_slice(&self.iniface.mask);
        buf[112..128].copy_from_slice(&self.outiface.mask);
        buf[128..130].copy_from_slice(&self.proto.to_le_bytes());
        buf[130] = self.flags;
        buf[131] = self.invflags;
        buf[132..136].copy_from_slice(&self.nfcache.to_le_bytes());
        buf[136..138].copy_from_slice(&self.target_offset.to_le_bytes());
        buf[138..140].copy_from_slice(&self.next_offset.to_le_bytes());
        buf[144..152].copy_from_slice(&self.counters.packets.to_le_bytes());
        buf[152..160].copy_from_slice(&self.counters.bytes.to_le_bytes());
        buf
    }

    /// Decode an entry header from the front of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::LEN {
            return Err(AbiError::Truncated {
                need: Self::LEN,
                have: buf.len(),
            });
        }
        let addr = |off: usize| {
            let mut a = [0u8; 16];
            a.copy_from_slice(&buf[off..off + 16]);
            Ipv6Addr::from(a)
        };
        let bytes16 = |off: usize| {
            let mut a = [0u8; IFNAMSIZ];
            a.copy_from_slice(&buf[off..off + IFNAMSIZ]);
            a
        };
        let u64_at = |off: usize| {
            let mut a = [0u8; 8];
            a.copy_from_slice(&buf[off..off + 8]);
            u64::from_le_bytes(a)
        };
        Ok(Self {
            src: addr(0),
            dst: addr(16),
            smsk: addr(32),
            dmsk: addr(48),
            iniface: IfacePattern {
                name: bytes16(64),
                mask: bytes16(96),
            },
            outiface: IfacePattern {
                name: bytes16(80),
                mask: bytes16(112),
            },
            proto: u16::from_le_bytes([buf[128], buf[129]]),
            flags: buf[130],
            invflags: buf[131],
            nfcache: u32::from_le_bytes([buf[132], buf[133], buf[134], buf[135]]),
            target_offset: u16::from_le_bytes([buf[136], buf[137]]),
            next_offset: u16::from_le_bytes([buf[138], buf[139]]),
            counters: Counters {
                packets: u64_at(144),
                bytes: u64_at(152),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ALIGNMENT, align_up};

    #[test]
    fn test_len_is_aligned() {
        assert_eq!(align_up(Entry::LEN), Entry::LEN);
        assert_eq!(Entry::LEN % ALIGNMENT, 0);
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let entry = Entry {
            src: "2001:db8::1".parse().unwrap(),
            smsk: crate::prefix_mask(64),
            iniface: IfacePattern::prefix("eth0").unwrap(),
            proto: 6,
            flags: F_PROTO,
            invflags: INV_SRCIP,
            nfcache: NFC_PROTO | NFC_SRC,
            target_offset: 160,
            next_offset: 208,
            counters: Counters {
                packets: 12,
                bytes: 3400,
            },
            ..Entry::default()
        };
        let buf = entry.encode();
        assert_eq!(Entry::decode(&buf).unwrap(), entry);
    }

    #[test]
    fn test_decode_truncated() {
        assert!(matches!(
            Entry::decode(&[0u8; 10]),
            Err(AbiError::Truncated { .. })
        ));
    }

    #[test]
    fn test_default_is_all_zero_predicate() {
        let buf = Entry::default().encode();
        assert!(buf[..128].iter().all(|&b| b == 0));
    }
}
