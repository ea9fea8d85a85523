//! The assembled contiguous rule buffer.

use std::net::Ipv6Addr;

use crate::{AbiError, ALIGNMENT, Blob, BlobView, Counters, Entry, Result};

/// One complete rule: `entry | match blobs… | target blob`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rule {
    bytes: Vec<u8>,
}

impl Rule {
    /// Assemble a rule, computing `target_offset` and `next_offset`.
    #[must_use]
    pub fn assemble(entry: &Entry, matches: &[Blob], target: &Blob) -> Self {
        let match_len: usize = matches.iter().map(Blob::size).sum();
        let mut entry = entry.clone();
        entry.target_offset = (Entry::LEN + match_len) as u16;
        entry.next_offset = entry.target_offset + target.size() as u16;

        let mut bytes = Vec::with_capacity(entry.next_offset as usize);
        bytes.extend_from_slice(&entry.encode());
        for m in matches {
            m.encode_into(&mut bytes);
        }
        target.encode_into(&mut bytes);
        Self { bytes }
    }

    /// Adopt a raw buffer, validating the offset and alignment invariants.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let entry = Entry::decode(&bytes)?;
        let target = entry.target_offset as usize;
        let next = entry.next_offset as usize;
        if target < Entry::LEN
            || next != bytes.len()
            || target > next
            || target % ALIGNMENT != 0
            || next % ALIGNMENT != 0
        {
            return Err(AbiError::BadOffsets {
                target: entry.target_offset,
                next: entry.next_offset,
                len: bytes.len(),
            });
        }
        // Every match blob must land exactly on target_offset.
        let mut rest = &bytes[Entry::LEN..target];
        while !rest.is_empty() {
            let (_, tail) = BlobView::parse(rest)?;
            rest = tail;
        }
        let (tgt, tail) = BlobView::parse(&bytes[target..])?;
        if usize::from(tgt.size) != next - target || !tail.is_empty() {
            return Err(AbiError::BadOffsets {
                target: entry.target_offset,
                next: entry.next_offset,
                len: bytes.len(),
            });
        }
        Ok(Self { bytes })
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decode the entry header.
    #[must_use]
    pub fn entry(&self) -> Entry {
        // Validated at construction; a rule always holds a full header.
        Entry::decode(&self.bytes).unwrap_or_default()
    }

    /// Re-stamp the source and destination addresses.
    pub fn set_addresses(&mut self, src: &Ipv6Addr, dst: &Ipv6Addr) {
        self.bytes[0..16].copy_from_slice(&src.octets());
        self.bytes[16..32].copy_from_slice(&dst.octets());
    }

    /// Overwrite the counters in place.
    pub fn set_counters(&mut self, counters: Counters) {
        self.bytes[144..152].copy_from_slice(&counters.packets.to_le_bytes());
        self.bytes[152..160].copy_from_slice(&counters.bytes.to_le_bytes());
    }

    /// Iterate the match blobs in layout order.
    pub fn match_blobs(&self) -> impl Iterator<Item = BlobView<'_>> {
        let entry = self.entry();
        BlobIter {
            rest: &self.bytes[Entry::LEN..entry.target_offset as usize],
        }
    }

    /// The target blob.
    #[must_use]
    pub fn target(&self) -> BlobView<'_> {
        let entry = self.entry();
        match BlobView::parse(&self.bytes[entry.target_offset as usize..]) {
            Ok((view, _)) => view,
            // Unreachable after construction-time validation.
            Err(_) => BlobView {
                size: 0,
                name: "",
                revision: 0,
                payload: &[],
            },
        }
    }

    /// The target label carried in the target blob's name field.
    #[must_use]
    pub fn target_name(&self) -> String {
        self.target().name.to_string()
    }
}

struct BlobIter<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for BlobIter<'a> {
    type Item = BlobView<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        match BlobView::parse(self.rest) {
            Ok((view, tail)) => {
                self.rest = tail;
                Some(view)
            }
            Err(_) => {
                self.rest = &[];
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rule() -> Rule {
        let mut tcp = Blob::new("tcp", 12, 0).unwrap();
        tcp.data[0] = 0x50;
        let target = Blob::new("ACCEPT", 4, 0).unwrap();
        Rule::assemble(&Entry::default(), &[tcp], &target)
    }

    #[test]
    fn test_offsets_invariant() {
        let rule = sample_rule();
        let entry = rule.entry();
        // tcp payload pads to 16, so the match blob is 40 + 16.
        assert_eq!(entry.target_offset as usize, Entry::LEN + 56);
        assert_eq!(
            entry.next_offset,
            entry.target_offset + rule.target().size
        );
        assert_eq!(entry.next_offset as usize, rule.len());
        assert_eq!(entry.target_offset as usize % ALIGNMENT, 0);
        assert_eq!(entry.next_offset as usize % ALIGNMENT, 0);
    }

    #[test]
    fn test_no_matches() {
        let target = Blob::new("DROP", 4, 0).unwrap();
        let rule = Rule::assemble(&Entry::default(), &[], &target);
        assert_eq!(rule.entry().target_offset as usize, Entry::LEN);
        assert_eq!(rule.match_blobs().count(), 0);
        assert_eq!(rule.target_name(), "DROP");
    }

    #[test]
    fn test_from_bytes_roundtrip() {
        let rule = sample_rule();
        let reparsed = Rule::from_bytes(rule.as_bytes().to_vec()).unwrap();
        assert_eq!(reparsed, rule);
        let names: Vec<_> = reparsed.match_blobs().map(|b| b.name.to_string()).collect();
        assert_eq!(names, ["tcp"]);
    }

    #[test]
    fn test_from_bytes_rejects_bad_offsets() {
        let rule = sample_rule();
        let mut bytes = rule.as_bytes().to_vec();
        bytes.truncate(bytes.len() - 8);
        assert!(Rule::from_bytes(bytes).is_err());
    }

    #[test]
    fn test_set_addresses() {
        let mut rule = sample_rule();
        let src: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let dst: Ipv6Addr = "2001:db8::2".parse().unwrap();
        rule.set_addresses(&src, &dst);
        let entry = rule.entry();
        assert_eq!(entry.src, src);
        assert_eq!(entry.dst, dst);
    }
}
