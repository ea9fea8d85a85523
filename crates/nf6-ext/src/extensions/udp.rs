//! The `udp` match: port ranges.

use nf6_abi::Entry;

use super::{format_port_range, parse_port_range};
use crate::{ArgKind, ExtError, MatchExt, OptSpec, Result};

/// Payload layout (9 bytes): source port min/max, destination port
/// min/max, invert bits.
pub const UDP_SIZE: usize = 9;

pub const UDP_INV_SRCPT: u8 = 0x01;
pub const UDP_INV_DSTPT: u8 = 0x02;

const OPT_SPORT: u32 = 1;
const OPT_DPORT: u32 = 2;

const SEEN_SPORT: u32 = 0x01;
const SEEN_DPORT: u32 = 0x02;

const OPTS: &[OptSpec] = &[
    OptSpec::new("source-port", ArgKind::Required, OPT_SPORT),
    OptSpec::new("sport", ArgKind::Required, OPT_SPORT),
    OptSpec::new("destination-port", ArgKind::Required, OPT_DPORT),
    OptSpec::new("dport", ArgKind::Required, OPT_DPORT),
];

/// `-m udp`, also implied by `-p udp`.
pub struct UdpMatch;

fn read_range(data: &[u8], off: usize) -> (u16, u16) {
    (
        u16::from_le_bytes([data[off], data[off + 1]]),
        u16::from_le_bytes([data[off + 2], data[off + 3]]),
    )
}

fn write_range(data: &mut [u8], off: usize, range: (u16, u16)) {
    data[off..off + 2].copy_from_slice(&range.0.to_le_bytes());
    data[off + 2..off + 4].copy_from_slice(&range.1.to_le_bytes());
}

impl MatchExt for UdpMatch {
    fn name(&self) -> &'static str {
        "udp"
    }

    fn size(&self) -> usize {
        UDP_SIZE
    }

    fn options(&self) -> &'static [OptSpec] {
        OPTS
    }

    fn help(&self) -> &'static str {
        "UDP v{version} options:\n\
         \x20 --source-port [!] port[:port]\n\
         \x20--sport ...\n\
         \t\t\t\tmatch source port(s)\n\
         \x20 --destination-port [!] port[:port]\n\
         \x20--dport ...\n\
         \t\t\t\tmatch destination port(s)\n"
    }

    fn init(&self, data: &mut [u8], _nfcache: &mut u32) {
        write_range(data, 0, (0, 65535));
        write_range(data, 4, (0, 65535));
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
        match code {
            OPT_SPORT => {
                if *flags & SEEN_SPORT != 0 {
                    return Err(ExtError::Parameter(
                        "Only one `--source-port' allowed".to_string(),
                    ));
                }
                let arg = arg.ok_or_else(|| {
                    ExtError::Parameter("--source-port requires a value".to_string())
                })?;
                write_range(data, 0, parse_port_range("udp", arg)?);
                if invert {
                    data[8] |= UDP_INV_SRCPT;
                }
                *flags |= SEEN_SPORT;
            }
            OPT_DPORT => {
                if *flags & SEEN_DPORT != 0 {
                    return Err(ExtError::Parameter(
                        "Only one `--destination-port' allowed".to_string(),
                    ));
                }
                let arg = arg.ok_or_else(|| {
                    ExtError::Parameter("--destination-port requires a value".to_string())
                })?;
                write_range(data, 4, parse_port_range("udp", arg)?);
                if invert {
                    data[8] |= UDP_INV_DSTPT;
                }
                *flags |= SEEN_DPORT;
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn print(&self, _entry: &Entry, data: &[u8], _numeric: bool) -> String {
        let mut out = String::from("udp ");
        let spts = read_range(data, 0);
        let dpts = read_range(data, 4);
        if spts != (0, 65535) {
            let inv = if data[8] & UDP_INV_SRCPT != 0 { "!" } else { "" };
            if spts.0 == spts.1 {
                out.push_str(&format!("spt:{inv}{} ", spts.0));
            } else {
                out.push_str(&format!("spts:{inv}{}:{} ", spts.0, spts.1));
            }
        }
        if dpts != (0, 65535) {
            let inv = if data[8] & UDP_INV_DSTPT != 0 { "!" } else { "" };
            if dpts.0 == dpts.1 {
                out.push_str(&format!("dpt:{inv}{} ", dpts.0));
            } else {
                out.push_str(&format!("dpts:{inv}{}:{} ", dpts.0, dpts.1));
            }
        }
        out
    }

    fn save(&self, _entry: &Entry, data: &[u8]) -> String {
        let mut out = String::new();
        let spts = read_range(data, 0);
        let dpts = read_range(data, 4);
        if spts != (0, 65535) {
            if data[8] & UDP_INV_SRCPT != 0 {
                out.push_str("! ");
            }
            out.push_str(&format!("--sport {} ", format_port_range(spts.0, spts.1)));
        }
        if dpts != (0, 65535) {
            if data[8] & UDP_INV_DSTPT != 0 {
                out.push_str("! ");
            }
            out.push_str(&format!("--dport {} ", format_port_range(dpts.0, dpts.1)));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_save() {
        let mut data = [0u8; UDP_SIZE];
        let mut nfcache = 0;
        UdpMatch.init(&mut data, &mut nfcache);
        let mut flags = 0;
        let mut entry = Entry::default();
        UdpMatch
            .parse(OPT_DPORT, Some("53"), false, &mut flags, &mut entry, &mut data)
            .unwrap();
        assert_eq!(read_range(&data, 4), (53, 53));
        assert_eq!(UdpMatch.save(&entry, &data), "--dport 53 ");
        assert_eq!(UdpMatch.print(&entry, &data, false), "udp dpt:53 ");
    }
}
