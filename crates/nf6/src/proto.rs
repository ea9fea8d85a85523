//! Protocol names and numbers.

use nf6_ext::string_to_number;

use crate::error::{Result, param};

/// A few hardcoded protocols for `all` and in case the system database
/// is unavailable.
const FALLBACK_PROTOS: &[(&str, u8)] = &[("tcp", 6), ("udp", 17), ("icmp", 1), ("all", 0)];

/// The system protocol database collaborator.
pub trait ProtocolDb {
    fn by_name(&self, name: &str) -> Option<u8>;
    fn by_number(&self, proto: u8) -> Option<String>;
}

/// Database backed only by the fallback set.
pub struct BuiltinProtos;

impl ProtocolDb for BuiltinProtos {
    fn by_name(&self, name: &str) -> Option<u8> {
        FALLBACK_PROTOS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|&(_, num)| num)
    }

    fn by_number(&self, proto: u8) -> Option<String> {
        FALLBACK_PROTOS
            .iter()
            .find(|&&(_, num)| num == proto)
            .map(|&(n, _)| n.to_string())
    }
}

/// Parse a protocol given by number or (lower-cased) name.
pub fn parse_protocol(s: &str, db: &dyn ProtocolDb) -> Result<u8> {
    if let Some(n) = string_to_number(s, 0, 255) {
        return Ok(n as u8);
    }
    db.by_name(s)
        .or_else(|| {
            FALLBACK_PROTOS
                .iter()
                .find(|(n, _)| *n == s)
                .map(|&(_, num)| num)
        })
        .ok_or_else(|| param(format!("unknown protocol `{s}' specified")))
}

/// Resolve a protocol number to a printable name.
///
/// With `numeric` set the database is skipped; the fallback set still
/// answers, as `-n` listings keep naming tcp/udp/icmp.
#[must_use]
pub fn proto_to_name(proto: u8, numeric: bool, db: &dyn ProtocolDb) -> Option<String> {
    if proto != 0 && !numeric {
        if let Some(name) = db.by_number(proto) {
            return Some(name);
        }
    }
    FALLBACK_PROTOS
        .iter()
        .find(|&&(_, num)| num == proto)
        .map(|&(n, _)| n.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_by_name_and_number() {
        assert_eq!(parse_protocol("tcp", &BuiltinProtos).unwrap(), 6);
        assert_eq!(parse_protocol("17", &BuiltinProtos).unwrap(), 17);
        assert_eq!(parse_protocol("all", &BuiltinProtos).unwrap(), 0);
    }

    #[test]
    fn test_unknown_protocol() {
        let err = parse_protocol("quic", &BuiltinProtos).unwrap_err();
        assert_eq!(err.to_string(), "unknown protocol `quic' specified");
    }

    #[test]
    fn test_proto_to_name() {
        assert_eq!(proto_to_name(6, false, &BuiltinProtos).as_deref(), Some("tcp"));
        assert_eq!(proto_to_name(6, true, &BuiltinProtos).as_deref(), Some("tcp"));
        assert_eq!(proto_to_name(0, false, &BuiltinProtos).as_deref(), Some("all"));
        assert_eq!(proto_to_name(99, false, &BuiltinProtos), None);
    }
}
