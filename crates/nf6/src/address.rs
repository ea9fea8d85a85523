//! Host, network, and mask parsing.

use std::net::Ipv6Addr;

use nf6_abi::{mask_addr, prefix_length, prefix_mask};
use nf6_ext::string_to_number;

use crate::error::{Result, param};

/// Hostname resolution collaborator.
pub trait Resolver {
    /// Forward-resolve a host name to one or more addresses.
    fn lookup(&self, host: &str) -> Option<Vec<Ipv6Addr>>;

    /// Reverse-resolve an address to a name.
    fn reverse(&self, addr: &Ipv6Addr) -> Option<String>;
}

/// Resolver that only accepts numeric literals.
pub struct LiteralResolver;

impl Resolver for LiteralResolver {
    fn lookup(&self, host: &str) -> Option<Vec<Ipv6Addr>> {
        host.parse().ok().map(|a| vec![a])
    }

    fn reverse(&self, _addr: &Ipv6Addr) -> Option<String> {
        None
    }
}

/// Parse the mask half of a `host/mask` spec.
///
/// Absent masks default to all-ones; a numeric literal is taken as-is;
/// anything else must be a prefix length `0..=128`.
pub fn parse_mask(mask: Option<&str>) -> Result<Ipv6Addr> {
    let Some(mask) = mask else {
        return Ok(prefix_mask(128));
    };
    if let Ok(addr) = mask.parse::<Ipv6Addr>() {
        return Ok(addr);
    }
    match string_to_number(mask, 0, 128) {
        Some(bits) => Ok(prefix_mask(bits as u8)),
        None => Err(param(format!("invalid mask `{mask}' specified"))),
    }
}

/// Parse `host[/mask]` into the expanded address list and the mask.
///
/// Every returned address is already masked; exact duplicates are
/// dropped, keeping the first occurrence. An all-zero mask matches
/// everything, so the host portion is ignored like in `any/0`.
pub fn parse_hostnetworkmask(
    spec: &str,
    resolver: &dyn Resolver,
) -> Result<(Vec<Ipv6Addr>, Ipv6Addr)> {
    let (host, mask) = match spec.rsplit_once('/') {
        Some((host, mask)) => (host, parse_mask(Some(mask))?),
        None => (spec, parse_mask(None)?),
    };
    let host = if mask == Ipv6Addr::UNSPECIFIED {
        "::"
    } else {
        host
    };

    let addrs = if let Ok(addr) = host.parse::<Ipv6Addr>() {
        vec![addr]
    } else {
        resolver
            .lookup(host)
            .ok_or_else(|| param(format!("host/network `{host}' not found")))?
    };

    let mut out: Vec<Ipv6Addr> = Vec::with_capacity(addrs.len());
    for addr in addrs {
        let masked = mask_addr(&addr, &mask);
        if !out.contains(&masked) {
            out.push(masked);
        }
    }
    Ok((out, mask))
}

/// Numeric form of an address, as an owned string.
#[must_use]
pub fn addr_to_numeric(addr: &Ipv6Addr) -> String {
    addr.to_string()
}

/// Numeric form of a mask: the prefix length when contiguous, the full
/// address otherwise.
#[must_use]
pub fn mask_to_numeric(mask: &Ipv6Addr) -> String {
    match prefix_length(mask) {
        Some(bits) => bits.to_string(),
        None => mask.to_string(),
    }
}

/// Best name for an address: reverse lookup, then numeric.
#[must_use]
pub fn addr_to_anyname(addr: &Ipv6Addr, resolver: &dyn Resolver) -> String {
    resolver
        .reverse(addr)
        .unwrap_or_else(|| addr.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeResolver;

    impl Resolver for FakeResolver {
        fn lookup(&self, host: &str) -> Option<Vec<Ipv6Addr>> {
            match host {
                // Two addresses that collapse under a /64 mask plus a
                // distinct one.
                "multi.example" => Some(vec![
                    "2001:db8::1".parse().unwrap(),
                    "2001:db8::2".parse().unwrap(),
                    "2001:db8:1::1".parse().unwrap(),
                ]),
                _ => None,
            }
        }

        fn reverse(&self, _addr: &Ipv6Addr) -> Option<String> {
            Some("host.example".to_string())
        }
    }

    #[test]
    fn test_literal_with_prefix() {
        let (addrs, mask) = parse_hostnetworkmask("fe80::1/10", &LiteralResolver).unwrap();
        assert_eq!(mask, prefix_mask(10));
        assert_eq!(addrs, vec!["fe80::".parse::<Ipv6Addr>().unwrap()]);
    }

    #[test]
    fn test_missing_mask_is_host_route() {
        let (addrs, mask) = parse_hostnetworkmask("::1", &LiteralResolver).unwrap();
        assert_eq!(mask, prefix_mask(128));
        assert_eq!(addrs, vec!["::1".parse::<Ipv6Addr>().unwrap()]);
    }

    #[test]
    fn test_zero_mask_ignores_host() {
        let (addrs, mask) = parse_hostnetworkmask("nonsense/0", &LiteralResolver).unwrap();
        assert_eq!(mask, Ipv6Addr::UNSPECIFIED);
        assert_eq!(addrs, vec![Ipv6Addr::UNSPECIFIED]);
    }

    #[test]
    fn test_resolver_expansion_dedups() {
        let (addrs, _) = parse_hostnetworkmask("multi.example/64", &FakeResolver).unwrap();
        assert_eq!(
            addrs,
            vec![
                "2001:db8::".parse::<Ipv6Addr>().unwrap(),
                "2001:db8:1::".parse::<Ipv6Addr>().unwrap(),
            ]
        );
        // Masking is idempotent over the produced addresses.
        for a in &addrs {
            assert_eq!(mask_addr(a, &prefix_mask(64)), *a);
        }
    }

    #[test]
    fn test_unknown_host() {
        let err = parse_hostnetworkmask("nosuch.example", &LiteralResolver).unwrap_err();
        assert_eq!(err.to_string(), "host/network `nosuch.example' not found");
    }

    #[test]
    fn test_invalid_mask() {
        let err = parse_hostnetworkmask("::1/129", &LiteralResolver).unwrap_err();
        assert_eq!(err.to_string(), "invalid mask `129' specified");
    }

    #[test]
    fn test_mask_to_numeric() {
        assert_eq!(mask_to_numeric(&prefix_mask(10)), "10");
        assert_eq!(mask_to_numeric(&prefix_mask(128)), "128");
        let holey: Ipv6Addr = "ffff:0:ffff::".parse().unwrap();
        assert_eq!(mask_to_numeric(&holey), "ffff:0:ffff::");
    }
}
