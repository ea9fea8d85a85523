//! Match and target extensions.
//!
//! Every predicate fragment beyond the entry header, and every action a
//! rule can take, is an extension: a descriptor advertising its name, its
//! per-rule blob size, an option table merged into the global grammar at
//! registration, and the parse/check/print callbacks the compiler and the
//! listing formatter drive. Built-in extensions register at startup; others
//! load lazily by name through the [`ExtensionLoader`].

mod loader;
mod options;
mod registry;

pub mod extensions;

pub use loader::{DylibLoader, LoadedExtensions, NullLoader};
pub use options::{ArgKind, LongOpt, OPTION_OFFSET, OptSpec, OptionComposer};
pub use registry::{ExtensionLoader, LoadPolicy, OptionOwner, Registry};

use nf6_abi::Entry;
use thiserror::Error;

/// Host version string; extensions must match it exactly.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default directory searched for loadable extension libraries.
pub const EXT_LIB_DIR: &str = "/usr/local/lib/nf6";

/// Extension errors. Everything here is reported as a parameter or
/// version problem by the caller.
#[derive(Error, Debug)]
pub enum ExtError {
    #[error("{0}")]
    Parameter(String),
    #[error("{kind} `{name}' v{got} (I'm v{host})")]
    Version {
        kind: &'static str,
        name: String,
        got: String,
        host: String,
    },
    #[error("{kind} `{name}' already registered")]
    AlreadyRegistered { kind: &'static str, name: String },
    #[error("couldn't load {kind} `{name}'")]
    CouldntLoad { kind: &'static str, name: String },
    #[error(transparent)]
    Abi(#[from] nf6_abi::AbiError),
}

pub type Result<T> = std::result::Result<T, ExtError>;

/// A pluggable predicate fragment over packet fields.
///
/// `data` in the callbacks is the blob payload (header excluded), zeroed
/// and alignment-padded by the compiler before `init` runs.
pub trait MatchExt {
    /// Extension name; also the blob header name.
    fn name(&self) -> &'static str;

    /// Must equal the host [`VERSION`].
    fn version(&self) -> &'static str {
        VERSION
    }

    /// Payload size in bytes, before alignment padding.
    fn size(&self) -> usize;

    /// Payload bytes significant for rule comparison.
    fn userspace_size(&self) -> usize {
        self.size()
    }

    /// Blob header revision.
    fn revision(&self) -> u8 {
        0
    }

    /// Option table contributed to the global grammar.
    fn options(&self) -> &'static [OptSpec];

    /// Usage text printed by `-h`.
    fn help(&self) -> &'static str;

    /// Initialize a fresh payload and caching hints.
    fn init(&self, _data: &mut [u8], _nfcache: &mut u32) {}

    /// Try to consume option `code` (extension-local numbering).
    ///
    /// Returns `Ok(true)` when the option was claimed.
    fn parse(
        &self,
        code: u32,
        arg: Option<&str>,
        invert: bool,
        flags: &mut u32,
        entry: &mut Entry,
        data: &mut [u8],
    ) -> Result<bool>;

    /// Validate accumulated `flags` once argv is exhausted.
    fn final_check(&self, _flags: u32) -> Result<()> {
        Ok(())
    }

    /// Listing fragment for this payload.
    fn print(&self, entry: &Entry, data: &[u8], numeric: bool) -> String;

    /// Parsable `--option value` form for this payload.
    fn save(&self, entry: &Entry, data: &[u8]) -> String;
}

/// The action taken when a rule matches.
///
/// Same shape as [`MatchExt`]; exactly one target blob ends every rule.
pub trait TargetExt {
    fn name(&self) -> &'static str;

    fn version(&self) -> &'static str {
        VERSION
    }

    fn size(&self) -> usize;

    fn userspace_size(&self) -> usize {
        self.size()
    }

    fn revision(&self) -> u8 {
        0
    }

    fn options(&self) -> &'static [OptSpec];

    fn help(&self) -> &'static str;

    fn init(&self, _data: &mut [u8], _nfcache: &mut u32) {}

    fn parse(
        &self,
        code: u32,
        arg: Option<&str>,
        invert: bool,
        flags: &mut u32,
        entry: &mut Entry,
        data: &mut [u8],
    ) -> Result<bool>;

    fn final_check(&self, _flags: u32) -> Result<()> {
        Ok(())
    }

    fn print(&self, entry: &Entry, data: &[u8], numeric: bool) -> String;

    fn save(&self, entry: &Entry, data: &[u8]) -> String;
}

/// Parse a number the way `strtol(…, 0)` does: decimal, `0x` hex, or
/// `0`-prefixed octal, then range-check it.
#[must_use]
pub fn string_to_number(s: &str, min: u64, max: u64) -> Option<u64> {
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else if s.len() > 1 && s.starts_with('0') {
        u64::from_str_radix(&s[1..], 8)
    } else {
        s.parse()
    };
    match parsed {
        Ok(n) if (min..=max).contains(&n) => Some(n),
        _ => None,
    }
}
