//! The dynamically composed long-option grammar.
//!
//! Each extension contributes its own option table at registration time.
//! The composer appends those entries after shifting their codes by a
//! fresh numeric offset, so an incoming option code identifies its owning
//! extension by range. Core options keep their natural codes below the
//! first offset.

/// Numeric distance between consecutive extension option ranges.
pub const OPTION_OFFSET: u32 = 256;

/// Whether an option takes a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgKind {
    None,
    Required,
    Optional,
}

/// One entry of an option table, with extension-local code.
#[derive(Clone, Copy, Debug)]
pub struct OptSpec {
    pub name: &'static str,
    pub arg: ArgKind,
    pub code: u32,
}

impl OptSpec {
    #[must_use]
    pub const fn new(name: &'static str, arg: ArgKind, code: u32) -> Self {
        Self { name, arg, code }
    }
}

/// One entry of the merged grammar, with globally unique code.
#[derive(Clone, Copy, Debug)]
pub struct LongOpt {
    pub name: &'static str,
    pub arg: ArgKind,
    pub code: u32,
}

/// Owns the merged long-option list and the monotonically growing offset.
#[derive(Debug)]
pub struct OptionComposer {
    opts: Vec<LongOpt>,
    global_offset: u32,
}

impl OptionComposer {
    /// Start from the core option table (codes below [`OPTION_OFFSET`]).
    #[must_use]
    pub fn new(core: &'static [OptSpec]) -> Self {
        Self {
            opts: core
                .iter()
                .map(|o| LongOpt {
                    name: o.name,
                    arg: o.arg,
                    code: o.code,
                })
                .collect(),
            global_offset: 0,
        }
    }

    /// Append an extension's options under a fresh offset.
    ///
    /// Returns the offset assigned to this block; offsets only grow and
    /// are never reused.
    pub fn merge(&mut self, extra: &'static [OptSpec]) -> u32 {
        self.global_offset += OPTION_OFFSET;
        for o in extra {
            self.opts.push(LongOpt {
                name: o.name,
                arg: o.arg,
                code: o.code + self.global_offset,
            });
        }
        self.global_offset
    }

    /// Resolve a long option name to its merged entry.
    ///
    /// Names are not unique across extensions (tcp and udp both speak
    /// `--sport`); this returns the first registered entry, so callers
    /// that know which extension is in scope must resolve against that
    /// extension's own table instead.
    #[must_use]
    pub fn find_long(&self, name: &str) -> Option<&LongOpt> {
        self.opts.iter().find(|o| o.name == name)
    }
}
