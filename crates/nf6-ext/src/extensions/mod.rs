//! Built-in match and target extensions.
//!
//! These register at startup, exactly as a loadable plugin would; the
//! registry treats them no differently from lazily loaded ones.

mod mpls;
mod standard;
mod tcp;
mod udp;

pub use mpls::MplsTarget;
pub use standard::StandardTarget;
pub use tcp::TcpMatch;
pub use udp::UdpMatch;

use crate::{ExtError, Registry, Result, string_to_number};

/// Register every built-in extension.
pub fn register_builtins(registry: &mut Registry) -> Result<()> {
    registry.register_target(Box::new(StandardTarget))?;
    registry.register_target(Box::new(MplsTarget))?;
    registry.register_match(Box::new(TcpMatch))?;
    registry.register_match(Box::new(UdpMatch))?;
    Ok(())
}

/// Parse a numeric `port[:port]` range.
fn parse_port_range(proto: &str, spec: &str) -> Result<(u16, u16)> {
    let port = |s: &str| {
        string_to_number(s, 0, 65535)
            .map(|n| n as u16)
            .ok_or_else(|| ExtError::Parameter(format!("invalid {proto} port `{s}'")))
    };
    match spec.split_once(':') {
        Some((lo, hi)) => {
            // An open bound keeps its end of the full range.
            let lo = if lo.is_empty() { 0 } else { port(lo)? };
            let hi = if hi.is_empty() { 65535 } else { port(hi)? };
            if lo > hi {
                return Err(ExtError::Parameter(format!(
                    "invalid {proto} port range `{spec}'"
                )));
            }
            Ok((lo, hi))
        }
        None => {
            let p = port(spec)?;
            Ok((p, p))
        }
    }
}

/// Render a port range the way the parser accepts it back.
fn format_port_range(lo: u16, hi: u16) -> String {
    if lo == hi {
        format!("{lo}")
    } else {
        format!("{lo}:{hi}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_port_range() {
        assert_eq!(parse_port_range("tcp", "80").unwrap(), (80, 80));
        assert_eq!(parse_port_range("tcp", "80:90").unwrap(), (80, 90));
        assert_eq!(parse_port_range("tcp", ":1024").unwrap(), (0, 1024));
        assert_eq!(parse_port_range("tcp", "1024:").unwrap(), (1024, 65535));
        assert!(parse_port_range("tcp", "90:80").is_err());
        assert!(parse_port_range("tcp", "http").is_err());
        assert!(parse_port_range("tcp", "70000").is_err());
    }
}
