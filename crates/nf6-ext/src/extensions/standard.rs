//! The `standard` target: built-in verdicts and jumps to user chains.

use nf6_abi::Entry;

use crate::{OptSpec, Result, TargetExt};

/// Payload: one 32-bit verdict slot the kernel fills when it resolves
/// the label carried in the blob name.
pub const STANDARD_SIZE: usize = 4;

/// Target descriptor behind ACCEPT, DROP, QUEUE, RETURN, the empty
/// fall-through label, and jumps to user chains.
pub struct StandardTarget;

impl TargetExt for StandardTarget {
    fn name(&self) -> &'static str {
        "standard"
    }

    fn size(&self) -> usize {
        STANDARD_SIZE
    }

    fn options(&self) -> &'static [OptSpec] {
        &[]
    }

    fn help(&self) -> &'static str {
        "Standard v{version} options:\n\
         (If target is DROP, ACCEPT, RETURN or nothing)\n"
    }

    fn parse(
        &self,
        _code: u32,
        _arg: Option<&str>,
        _invert: bool,
        _flags: &mut u32,
        _entry: &mut Entry,
        _data: &mut [u8],
    ) -> Result<bool> {
        Ok(false)
    }

    fn print(&self, _entry: &Entry, _data: &[u8], _numeric: bool) -> String {
        String::new()
    }

    fn save(&self, _entry: &Entry, _data: &[u8]) -> String {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_nothing() {
        let mut flags = 0;
        let mut entry = Entry::default();
        let mut data = [0u8; STANDARD_SIZE];
        let claimed = StandardTarget
            .parse(1, Some("x"), false, &mut flags, &mut entry, &mut data)
            .unwrap();
        assert!(!claimed);
        assert_eq!(flags, 0);
    }
}
