//! Match and target blobs.
//!
//! Both kinds share one header shape: `{u16 size, name[32], u8 revision}`
//! padded to the ABI alignment, followed by an extension-defined payload.

use crate::{AbiError, ALIGNMENT, EXT_NAME_LEN, Result, align_up};

/// An owned match or target blob under construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Blob {
    name: String,
    revision: u8,
    /// Payload bytes, already padded to the ABI alignment.
    pub data: Vec<u8>,
}

impl Blob {
    /// Encoded header length (2 + 32 + 1 rounded up to the alignment).
    pub const HEADER_LEN: usize = align_up(2 + EXT_NAME_LEN + 1);

    /// Allocate a zero-filled blob for a payload of `payload_len` bytes.
    pub fn new(name: &str, payload_len: usize, revision: u8) -> Result<Self> {
        if name.len() >= EXT_NAME_LEN {
            return Err(AbiError::NameTooLong(name.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            revision,
            data: vec![0; align_up(payload_len)],
        })
    }

    /// The blob name carried in the header.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn revision(&self) -> u8 {
        self.revision
    }

    /// Total encoded size: header plus padded payload.
    #[must_use]
    pub fn size(&self) -> usize {
        Self::HEADER_LEN + self.data.len()
    }

    /// Append the encoded blob to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let size = self.size() as u16;
        out.extend_from_slice(&size.to_le_bytes());
        let mut name = [0u8; EXT_NAME_LEN];
        name[..self.name.len()].copy_from_slice(self.name.as_bytes());
        out.extend_from_slice(&name);
        out.push(self.revision);
        out.resize(out.len() + (Self::HEADER_LEN - 2 - EXT_NAME_LEN - 1), 0);
        out.extend_from_slice(&self.data);
    }
}

/// A decoded view of one blob inside a rule buffer.
#[derive(Clone, Copy, Debug)]
pub struct BlobView<'a> {
    pub size: u16,
    pub name: &'a str,
    pub revision: u8,
    pub payload: &'a [u8],
}

impl<'a> BlobView<'a> {
    /// Parse one blob from the front of `buf`, returning it and the rest.
    pub fn parse(buf: &'a [u8]) -> Result<(Self, &'a [u8])> {
        if buf.len() < Blob::HEADER_LEN {
            return Err(AbiError::Truncated {
                need: Blob::HEADER_LEN,
                have: buf.len(),
            });
        }
        let size = u16::from_le_bytes([buf[0], buf[1]]);
        if size as usize % ALIGNMENT != 0 || (size as usize) < Blob::HEADER_LEN {
            return Err(AbiError::Misaligned(size));
        }
        if buf.len() < size as usize {
            return Err(AbiError::Truncated {
                need: size as usize,
                have: buf.len(),
            });
        }
        let raw_name = &buf[2..2 + EXT_NAME_LEN];
        let name_len = raw_name.iter().position(|&b| b == 0).unwrap_or(EXT_NAME_LEN);
        let name = std::str::from_utf8(&raw_name[..name_len]).unwrap_or("");
        Ok((
            Self {
                size,
                name,
                revision: buf[2 + EXT_NAME_LEN],
                payload: &buf[Blob::HEADER_LEN..size as usize],
            },
            &buf[size as usize..],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_len() {
        assert_eq!(Blob::HEADER_LEN, 40);
    }

    #[test]
    fn test_payload_is_padded() {
        let blob = Blob::new("MPLS", 4, 0).unwrap();
        assert_eq!(blob.data.len(), 8);
        assert_eq!(blob.size(), 48);
    }

    #[test]
    fn test_encode_parse_roundtrip() {
        let mut blob = Blob::new("tcp", 12, 1).unwrap();
        blob.data[0] = 0xAB;
        let mut out = Vec::new();
        blob.encode_into(&mut out);
        assert_eq!(out.len(), blob.size());

        let (view, rest) = BlobView::parse(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(view.name, "tcp");
        assert_eq!(view.revision, 1);
        assert_eq!(view.size as usize, blob.size());
        assert_eq!(view.payload, &blob.data[..]);
    }

    #[test]
    fn test_name_too_long() {
        assert!(Blob::new(&"x".repeat(EXT_NAME_LEN), 0, 0).is_err());
    }

    #[test]
    fn test_parse_rejects_misaligned_size() {
        let blob = Blob::new("t", 0, 0).unwrap();
        let mut out = Vec::new();
        blob.encode_into(&mut out);
        out[0] = 41; // corrupt the size field
        assert!(matches!(
            BlobView::parse(&out),
            Err(AbiError::Misaligned(41))
        ));
    }
}
