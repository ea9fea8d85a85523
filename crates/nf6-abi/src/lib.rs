//! Kernel ABI byte layouts for the IPv6 packet filter.
//!
//! A rule travels to the kernel as one contiguous little-endian buffer:
//! a fixed [`Entry`] header, zero or more match blobs, and exactly one
//! target blob. This crate owns the byte-exact encode/decode for those
//! layouts plus the prefix-mask and interface-pattern math they depend on.

mod addr;
mod blob;
mod entry;
mod iface;
mod rule;

pub use addr::{mask_addr, prefix_length, prefix_mask};
pub use blob::{Blob, BlobView};
pub use entry::{
    Counters, Entry, F_PROTO, INV_DSTIP, INV_PROTO, INV_SRCIP, INV_VIA_IN, INV_VIA_OUT, NFC_DST,
    NFC_IF_IN, NFC_IF_OUT, NFC_PROTO, NFC_SRC,
};
pub use iface::IfacePattern;
pub use rule::Rule;

use thiserror::Error;

/// Alignment of every entry header and blob, in bytes.
pub const ALIGNMENT: usize = 8;

/// Interface name buffer length, including the nul terminator.
pub const IFNAMSIZ: usize = 16;

/// Extension name field length in blob headers.
pub const EXT_NAME_LEN: usize = 32;

/// Longest chain label, excluding the nul terminator.
pub const CHAIN_MAXNAMELEN: usize = 31;

/// Round `n` up to the next multiple of [`ALIGNMENT`].
#[must_use]
pub const fn align_up(n: usize) -> usize {
    (n + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

/// ABI layout errors.
#[derive(Error, Debug)]
pub enum AbiError {
    #[error("rule buffer truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("blob size {0} is not a multiple of the ABI alignment")]
    Misaligned(u16),
    #[error("entry offsets inconsistent: target_offset {target}, next_offset {next}, length {len}")]
    BadOffsets { target: u16, next: u16, len: usize },
    #[error("name `{0}` does not fit the ABI name field")]
    NameTooLong(String),
}

pub type Result<T> = std::result::Result<T, AbiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0), 0);
        assert_eq!(align_up(1), 8);
        assert_eq!(align_up(8), 8);
        assert_eq!(align_up(35), 40);
        assert_eq!(align_up(160), 160);
    }
}
