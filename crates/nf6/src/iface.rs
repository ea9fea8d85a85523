//! Interface specification parsing.

use nf6_abi::{IFNAMSIZ, IfacePattern};
use tracing::warn;

use crate::error::{Result, param};

/// Parse an interface spec: empty for any, trailing `+` for a name
/// prefix, otherwise an exact name.
pub fn parse_interface(arg: &str) -> Result<IfacePattern> {
    if arg.len() + 1 > IFNAMSIZ {
        return Err(param(format!(
            "interface name `{arg}' must be shorter than {IFNAMSIZ} characters"
        )));
    }
    let pattern = if arg.is_empty() {
        Ok(IfacePattern::any())
    } else if let Some(stem) = arg.strip_suffix('+') {
        IfacePattern::prefix(stem)
    } else {
        IfacePattern::exact(arg)
    }
    .map_err(|e| param(e.to_string()))?;

    if let Some(weird) = pattern
        .name_str()
        .chars()
        .find(|c| !c.is_ascii_alphanumeric())
    {
        warn!(
            "weird character `{weird}' in interface `{}' (No aliases, :, ! or *)",
            pattern.name_str()
        );
    }
    Ok(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact() {
        let pat = parse_interface("eth0").unwrap();
        assert_eq!(pat.name_str(), "eth0");
        assert!(pat.mask[..5].iter().all(|&b| b == 0xFF));
        assert!(pat.mask[5..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_wildcard_strips_plus() {
        let pat = parse_interface("eth0+").unwrap();
        assert_eq!(pat.name_str(), "eth0");
        assert!(pat.is_wildcard());
        assert!(pat.mask[..4].iter().all(|&b| b == 0xFF));
        assert!(pat.mask[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_empty_matches_any() {
        let pat = parse_interface("").unwrap();
        assert!(pat.is_any());
        assert!(pat.mask.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_too_long() {
        assert!(parse_interface("waylonginterface").is_err());
    }

    #[test]
    fn test_weird_character_accepted() {
        // Warned about, but accepted.
        let pat = parse_interface("eth0:1").unwrap();
        assert_eq!(pat.name_str(), "eth0:1");
    }
}
