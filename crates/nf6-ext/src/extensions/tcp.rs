//! The `tcp` match: port ranges and flag tests.

use nf6_abi::Entry;

use super::{format_port_range, parse_port_range};
use crate::{ArgKind, ExtError, MatchExt, OptSpec, Result};

/// Payload layout (12 bytes, little-endian):
/// source port min/max, destination port min/max, option byte,
/// flag mask, flag compare, invert bits.
pub const TCP_SIZE: usize = 12;

/// Invert bits in the payload.
pub const TCP_INV_SRCPT: u8 = 0x01;
pub const TCP_INV_DSTPT: u8 = 0x02;
pub const TCP_INV_FLAGS: u8 = 0x04;

/// TCP header flag bits.
pub const TCP_FLAG_FIN: u8 = 0x01;
pub const TCP_FLAG_SYN: u8 = 0x02;
pub const TCP_FLAG_RST: u8 = 0x04;
pub const TCP_FLAG_ACK: u8 = 0x10;

const OPT_SPORT: u32 = 1;
const OPT_DPORT: u32 = 2;
const OPT_SYN: u32 = 3;

// Parse-state flag bits, one per option seen.
const SEEN_SPORT: u32 = 0x01;
const SEEN_DPORT: u32 = 0x02;
const SEEN_FLAGS: u32 = 0x04;

const OPTS: &[OptSpec] = &[
    OptSpec::new("source-port", ArgKind::Required, OPT_SPORT),
    OptSpec::new("sport", ArgKind::Required, OPT_SPORT),
    OptSpec::new("destination-port", ArgKind::Required, OPT_DPORT),
    OptSpec::new("dport", ArgKind::Required, OPT_DPORT),
    OptSpec::new("syn", ArgKind::None, OPT_SYN),
];

/// `-m tcp`, also implied by `-p tcp`.
pub struct TcpMatch;

#[derive(Clone, Copy)]
struct TcpInfo {
    spts: (u16, u16),
    dpts: (u16, u16),
    flg_mask: u8,
    flg_cmp: u8,
    invflags: u8,
}

impl TcpInfo {
    fn read(data: &[u8]) -> Self {
        let port = |off: usize| u16::from_le_bytes([data[off], data[off + 1]]);
        Self {
            spts: (port(0), port(2)),
            dpts: (port(4), port(6)),
            flg_mask: data[9],
            flg_cmp: data[10],
            invflags: data[11],
        }
    }

    fn write(&self, data: &mut [u8]) {
        data[0..2].copy_from_slice(&self.spts.0.to_le_bytes());
        data[2..4].copy_from_slice(&self.spts.1.to_le_bytes());
        data[4..6].copy_from_slice(&self.dpts.0.to_le_bytes());
        data[6..8].copy_from_slice(&self.dpts.1.to_le_bytes());
        data[9] = self.flg_mask;
        data[10] = self.flg_cmp;
        data[11] = self.invflags;
    }
}

impl MatchExt for TcpMatch {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn size(&self) -> usize {
        TCP_SIZE
    }

    fn options(&self) -> &'static [OptSpec] {
        OPTS
    }

    fn help(&self) -> &'static str {
        "TCP v{version} options:\n\
         \x20 --source-port [!] port[:port]\n\
         \x20--sport ...\n\
         \t\t\t\tmatch source port(s)\n\
         \x20 --destination-port [!] port[:port]\n\
         \x20--dport ...\n\
         \t\t\t\tmatch destination port(s)\n\
         [!] --syn\t\t\tmatch when only SYN flag set\n"
    }

    fn init(&self, data: &mut [u8], _nfcache: &mut u32) {
        TcpInfo {
            spts: (0, 65535),
            dpts: (0, 65535),
            flg_mask: 0,
            flg_cmp: 0,
            invflags: 0,
        }
        .write(data);
    }

    fn parse(
        &self,
        code: u32,
        arg: Option<&str>,
        invert: bool,
        flags: &mut u32,
        _entry: &mut Entry,
        data: &mut [u8],
    ) -> Result<bool> {
        let mut info = TcpInfo::read(data);
        match code {
            OPT_SPORT => {
                if *flags & SEEN_SPORT != 0 {
                    return Err(ExtError::Parameter(
                        "Only one `--source-port' allowed".to_string(),
                    ));
                }
                let arg = require(arg, "--source-port")?;
                info.spts = parse_port_range("tcp", arg)?;
                if invert {
                    info.invflags |= TCP_INV_SRCPT;
                }
                *flags |= SEEN_SPORT;
            }
            OPT_DPORT => {
                if *flags & SEEN_DPORT != 0 {
                    return Err(ExtError::Parameter(
                        "Only one `--destination-port' allowed".to_string(),
                    ));
                }
                let arg = require(arg, "--destination-port")?;
                info.dpts = parse_port_range("tcp", arg)?;
                if invert {
                    info.invflags |= TCP_INV_DSTPT;
                }
                *flags |= SEEN_DPORT;
            }
            OPT_SYN => {
                if *flags & SEEN_FLAGS != 0 {
                    return Err(ExtError::Parameter(
                        "Only one of `--syn' or `--tcp-flags' allowed".to_string(),
                    ));
                }
                info.flg_mask = TCP_FLAG_SYN | TCP_FLAG_RST | TCP_FLAG_ACK;
                info.flg_cmp = TCP_FLAG_SYN;
                if invert {
                    info.invflags |= TCP_INV_FLAGS;
                }
                *flags |= SEEN_FLAGS;
            }
            _ => return Ok(false),
        }
        info.write(data);
        Ok(true)
    }

    fn print(&self, _entry: &Entry, data: &[u8], _numeric: bool) -> String {
        let info = TcpInfo::read(data);
        let mut out = String::from("tcp ");
        if info.spts != (0, 65535) {
            let inv = if info.invflags & TCP_INV_SRCPT != 0 { "!" } else { "" };
            if info.spts.0 == info.spts.1 {
                out.push_str(&format!("spt:{inv}{} ", info.spts.0));
            } else {
                out.push_str(&format!("spts:{inv}{}:{} ", info.spts.0, info.spts.1));
            }
        }
        if info.dpts != (0, 65535) {
            let inv = if info.invflags & TCP_INV_DSTPT != 0 { "!" } else { "" };
            if info.dpts.0 == info.dpts.1 {
                out.push_str(&format!("dpt:{inv}{} ", info.dpts.0));
            } else {
                out.push_str(&format!("dpts:{inv}{}:{} ", info.dpts.0, info.dpts.1));
            }
        }
        if info.flg_mask != 0 {
            let inv = if info.invflags & TCP_INV_FLAGS != 0 { "!" } else { "" };
            out.push_str(&format!(
                "flags:{inv}0x{:02x}/0x{:02x} ",
                info.flg_mask, info.flg_cmp
            ));
        }
        out
    }

    fn save(&self, _entry: &Entry, data: &[u8]) -> String {
        let info = TcpInfo::read(data);
        let mut out = String::new();
        if info.spts != (0, 65535) {
            if info.invflags & TCP_INV_SRCPT != 0 {
                out.push_str("! ");
            }
            out.push_str(&format!(
                "--sport {} ",
                format_port_range(info.spts.0, info.spts.1)
            ));
        }
        if info.dpts != (0, 65535) {
            if info.invflags & TCP_INV_DSTPT != 0 {
                out.push_str("! ");
            }
            out.push_str(&format!(
                "--dport {} ",
                format_port_range(info.dpts.0, info.dpts.1)
            ));
        }
        if info.flg_mask == (TCP_FLAG_SYN | TCP_FLAG_RST | TCP_FLAG_ACK)
            && info.flg_cmp == TCP_FLAG_SYN
        {
            if info.invflags & TCP_INV_FLAGS != 0 {
                out.push_str("! ");
            }
            out.push_str("--syn ");
        }
        out
    }
}

fn require<'a>(arg: Option<&'a str>, opt: &str) -> Result<&'a str> {
    arg.ok_or_else(|| ExtError::Parameter(format!("{opt} requires a value")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> ([u8; TCP_SIZE], u32, Entry) {
        let mut data = [0u8; TCP_SIZE];
        let mut nfcache = 0;
        TcpMatch.init(&mut data, &mut nfcache);
        (data, 0, Entry::default())
    }

    #[test]
    fn test_init_full_ranges() {
        let (data, _, _) = fresh();
        let info = TcpInfo::read(&data);
        assert_eq!(info.spts, (0, 65535));
        assert_eq!(info.dpts, (0, 65535));
    }

    #[test]
    fn test_parse_dport() {
        let (mut data, mut flags, mut entry) = fresh();
        let claimed = TcpMatch
            .parse(OPT_DPORT, Some("80"), false, &mut flags, &mut entry, &mut data)
            .unwrap();
        assert!(claimed);
        assert_eq!(TcpInfo::read(&data).dpts, (80, 80));
    }

    #[test]
    fn test_parse_inverted_sport_range() {
        let (mut data, mut flags, mut entry) = fresh();
        TcpMatch
            .parse(
                OPT_SPORT,
                Some("1024:2048"),
                true,
                &mut flags,
                &mut entry,
                &mut data,
            )
            .unwrap();
        let info = TcpInfo::read(&data);
        assert_eq!(info.spts, (1024, 2048));
        assert_eq!(info.invflags, TCP_INV_SRCPT);
    }

    #[test]
    fn test_duplicate_sport_rejected() {
        let (mut data, mut flags, mut entry) = fresh();
        TcpMatch
            .parse(OPT_SPORT, Some("1"), false, &mut flags, &mut entry, &mut data)
            .unwrap();
        assert!(
            TcpMatch
                .parse(OPT_SPORT, Some("2"), false, &mut flags, &mut entry, &mut data)
                .is_err()
        );
    }

    #[test]
    fn test_syn_flags() {
        let (mut data, mut flags, mut entry) = fresh();
        TcpMatch
            .parse(OPT_SYN, None, false, &mut flags, &mut entry, &mut data)
            .unwrap();
        let info = TcpInfo::read(&data);
        assert_eq!(info.flg_mask, TCP_FLAG_SYN | TCP_FLAG_RST | TCP_FLAG_ACK);
        assert_eq!(info.flg_cmp, TCP_FLAG_SYN);
    }

    #[test]
    fn test_unknown_code_unclaimed() {
        let (mut data, mut flags, mut entry) = fresh();
        let claimed = TcpMatch
            .parse(99, None, false, &mut flags, &mut entry, &mut data)
            .unwrap();
        assert!(!claimed);
    }

    #[test]
    fn test_save_form() {
        let (mut data, mut flags, mut entry) = fresh();
        TcpMatch
            .parse(OPT_DPORT, Some("80"), true, &mut flags, &mut entry, &mut data)
            .unwrap();
        assert_eq!(TcpMatch.save(&entry, &data), "! --dport 80 ");
    }
}
