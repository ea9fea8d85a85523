//! The extension registry.

use crate::loader::LoadedExtensions;
use crate::options::{OPTION_OFFSET, LongOpt, OptSpec, OptionComposer};
use crate::{ExtError, MatchExt, Result, TargetExt, VERSION};

/// Standard verdict labels that alias to the `standard` target.
const STANDARD_ALIASES: &[&str] = &["", "ACCEPT", "DROP", "QUEUE", "RETURN"];

/// How hard to try when a lookup misses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadPolicy {
    DontLoad,
    TryLoad,
    MustLoad,
}

/// Collaborator that maps a canonical plugin name to its extensions.
///
/// A successful load returns the extensions the plugin registers; the
/// registry completes the registration itself.
pub trait ExtensionLoader {
    fn load(&mut self, name: &str) -> Option<LoadedExtensions>;
}

/// Which part of the grammar owns an option code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptionOwner {
    Core,
    Match(usize),
    Target(usize),
}

struct RegisteredMatch {
    ext: Box<dyn MatchExt>,
    offset: u32,
}

struct RegisteredTarget {
    ext: Box<dyn TargetExt>,
    offset: u32,
}

/// Owns every loaded extension and the merged option grammar.
///
/// Extensions register once per process and persist; lookups by name may
/// trigger the [`ExtensionLoader`] depending on the [`LoadPolicy`].
pub struct Registry {
    matches: Vec<RegisteredMatch>,
    targets: Vec<RegisteredTarget>,
    composer: OptionComposer,
    loader: Box<dyn ExtensionLoader>,
}

impl Registry {
    /// Create a registry seeded with the core option table.
    #[must_use]
    pub fn new(core_opts: &'static [OptSpec], loader: Box<dyn ExtensionLoader>) -> Self {
        Self {
            matches: Vec::new(),
            targets: Vec::new(),
            composer: OptionComposer::new(core_opts),
            loader,
        }
    }

    /// Register a match extension, merging its options into the grammar.
    pub fn register_match(&mut self, ext: Box<dyn MatchExt>) -> Result<()> {
        if ext.version() != VERSION {
            return Err(ExtError::Version {
                kind: "match",
                name: ext.name().to_string(),
                got: ext.version().to_string(),
                host: VERSION.to_string(),
            });
        }
        if self.lookup_match(ext.name()).is_some() {
            return Err(ExtError::AlreadyRegistered {
                kind: "match",
                name: ext.name().to_string(),
            });
        }
        let offset = self.composer.merge(ext.options());
        self.matches.push(RegisteredMatch { ext, offset });
        Ok(())
    }

    /// Register a target extension, merging its options into the grammar.
    pub fn register_target(&mut self, ext: Box<dyn TargetExt>) -> Result<()> {
        if ext.version() != VERSION {
            return Err(ExtError::Version {
                kind: "target",
                name: ext.name().to_string(),
                got: ext.version().to_string(),
                host: VERSION.to_string(),
            });
        }
        if self.lookup_target(ext.name()).is_some() {
            return Err(ExtError::AlreadyRegistered {
                kind: "target",
                name: ext.name().to_string(),
            });
        }
        let offset = self.composer.merge(ext.options());
        self.targets.push(RegisteredTarget { ext, offset });
        Ok(())
    }

    fn lookup_match(&self, name: &str) -> Option<usize> {
        self.matches.iter().position(|m| m.ext.name() == name)
    }

    fn lookup_target(&self, name: &str) -> Option<usize> {
        self.targets.iter().position(|t| t.ext.name() == name)
    }

    /// Find a match by name, lazily loading per `policy`.
    pub fn find_match(&mut self, name: &str, policy: LoadPolicy) -> Result<Option<usize>> {
        if let Some(idx) = self.lookup_match(name) {
            return Ok(Some(idx));
        }
        if policy == LoadPolicy::DontLoad {
            return Ok(None);
        }
        if let Some(loaded) = self.loader.load(name) {
            self.adopt(loaded)?;
            // The library loaded but did not register a match of this
            // name; maybe they specified a target as match.
            return match self.lookup_match(name) {
                Some(idx) => Ok(Some(idx)),
                None => Err(ExtError::CouldntLoad {
                    kind: "match",
                    name: name.to_string(),
                }),
            };
        }
        if policy == LoadPolicy::MustLoad {
            return Err(ExtError::CouldntLoad {
                kind: "match",
                name: name.to_string(),
            });
        }
        Ok(None)
    }

    /// Find a target by name, lazily loading per `policy`.
    ///
    /// The standard verdict labels all alias to the `standard` target.
    pub fn find_target(&mut self, name: &str, policy: LoadPolicy) -> Result<Option<usize>> {
        let name = if STANDARD_ALIASES.contains(&name) {
            "standard"
        } else {
            name
        };
        if let Some(idx) = self.lookup_target(name) {
            return Ok(Some(idx));
        }
        if policy == LoadPolicy::DontLoad {
            return Ok(None);
        }
        if let Some(loaded) = self.loader.load(name) {
            self.adopt(loaded)?;
            return match self.lookup_target(name) {
                Some(idx) => Ok(Some(idx)),
                None => Err(ExtError::CouldntLoad {
                    kind: "target",
                    name: name.to_string(),
                }),
            };
        }
        if policy == LoadPolicy::MustLoad {
            return Err(ExtError::CouldntLoad {
                kind: "target",
                name: name.to_string(),
            });
        }
        Ok(None)
    }

    fn adopt(&mut self, loaded: LoadedExtensions) -> Result<()> {
        for m in loaded.matches {
            self.register_match(m)?;
        }
        for t in loaded.targets {
            self.register_target(t)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn match_at(&self, idx: usize) -> &dyn MatchExt {
        &*self.matches[idx].ext
    }

    #[must_use]
    pub fn target_at(&self, idx: usize) -> &dyn TargetExt {
        &*self.targets[idx].ext
    }

    #[must_use]
    pub fn match_offset(&self, idx: usize) -> u32 {
        self.matches[idx].offset
    }

    #[must_use]
    pub fn target_offset(&self, idx: usize) -> u32 {
        self.targets[idx].offset
    }

    /// All registered matches, in registration order.
    pub fn matches(&self) -> impl Iterator<Item = &dyn MatchExt> {
        self.matches.iter().map(|m| &*m.ext)
    }

    /// All registered targets, in registration order.
    pub fn targets(&self) -> impl Iterator<Item = &dyn TargetExt> {
        self.targets.iter().map(|t| &*t.ext)
    }

    /// Resolve a long option name against the merged grammar.
    ///
    /// Returns the first registered entry for the name; when an
    /// extension is already in scope, prefer [`Registry::match_option`]
    /// or [`Registry::target_option`], which cannot be shadowed by an
    /// earlier extension using the same name.
    #[must_use]
    pub fn find_long(&self, name: &str) -> Option<&LongOpt> {
        self.composer.find_long(name)
    }

    /// Resolve `name` against one match's own option table, yielding
    /// its merged (offset-shifted) entry.
    #[must_use]
    pub fn match_option(&self, idx: usize, name: &str) -> Option<LongOpt> {
        let m = &self.matches[idx];
        m.ext.options().iter().find(|o| o.name == name).map(|o| LongOpt {
            name: o.name,
            arg: o.arg,
            code: o.code + m.offset,
        })
    }

    /// Resolve `name` against one target's own option table, yielding
    /// its merged (offset-shifted) entry.
    #[must_use]
    pub fn target_option(&self, idx: usize, name: &str) -> Option<LongOpt> {
        let t = &self.targets[idx];
        t.ext.options().iter().find(|o| o.name == name).map(|o| LongOpt {
            name: o.name,
            arg: o.arg,
            code: o.code + t.offset,
        })
    }

    /// Identify the extension whose option range contains `code`.
    #[must_use]
    pub fn owner_of(&self, code: u32) -> Option<OptionOwner> {
        if code < OPTION_OFFSET {
            return Some(OptionOwner::Core);
        }
        let in_range = |offset: u32| code > offset && code - offset < OPTION_OFFSET;
        if let Some(idx) = self.matches.iter().position(|m| in_range(m.offset)) {
            return Some(OptionOwner::Match(idx));
        }
        if let Some(idx) = self.targets.iter().position(|t| in_range(t.offset)) {
            return Some(OptionOwner::Target(idx));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::{MplsTarget, StandardTarget, TcpMatch, UdpMatch};
    use crate::loader::NullLoader;

    fn registry() -> Registry {
        let mut reg = Registry::new(&[], Box::new(NullLoader));
        reg.register_target(Box::new(StandardTarget)).unwrap();
        reg.register_target(Box::new(MplsTarget)).unwrap();
        reg.register_match(Box::new(TcpMatch)).unwrap();
        reg
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut reg = registry();
        assert!(matches!(
            reg.register_match(Box::new(TcpMatch)),
            Err(ExtError::AlreadyRegistered { .. })
        ));
    }

    #[test]
    fn test_standard_aliases() {
        let mut reg = registry();
        for label in ["", "ACCEPT", "DROP", "QUEUE", "RETURN", "standard"] {
            let idx = reg.find_target(label, LoadPolicy::DontLoad).unwrap();
            assert_eq!(idx, Some(0), "label {label:?}");
        }
    }

    #[test]
    fn test_must_load_miss() {
        let mut reg = registry();
        let err = reg.find_match("nosuch", LoadPolicy::MustLoad).unwrap_err();
        assert_eq!(err.to_string(), "couldn't load match `nosuch'");
        assert!(
            reg.find_match("nosuch", LoadPolicy::TryLoad)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_option_ranges_disjoint() {
        let reg = registry();
        // MPLS --nhlfe merged second (offset 512), tcp third (768).
        let nhlfe = reg.find_long("nhlfe").unwrap().code;
        let sport = reg.find_long("source-port").unwrap().code;
        assert_eq!(reg.owner_of(nhlfe), Some(OptionOwner::Target(1)));
        assert_eq!(reg.owner_of(sport), Some(OptionOwner::Match(0)));
        assert_eq!(reg.owner_of('j' as u32), Some(OptionOwner::Core));
        // Exactly one owner for every extension code in the grammar.
        for opt in [nhlfe, sport] {
            let owners = [reg.owner_of(opt)];
            assert_eq!(owners.iter().flatten().count(), 1);
        }
    }

    #[test]
    fn test_scoped_option_resolution() {
        let mut reg = registry();
        reg.register_match(Box::new(UdpMatch)).unwrap();

        // tcp and udp both speak `sport`: the global lookup answers
        // with the first registration, the scoped lookups each answer
        // with their own shifted code.
        let tcp = reg.find_match("tcp", LoadPolicy::DontLoad).unwrap().unwrap();
        let udp = reg.find_match("udp", LoadPolicy::DontLoad).unwrap().unwrap();
        let global = reg.find_long("sport").unwrap().code;
        let tcp_code = reg.match_option(tcp, "sport").unwrap().code;
        let udp_code = reg.match_option(udp, "sport").unwrap().code;
        assert_eq!(global, tcp_code);
        assert_ne!(tcp_code, udp_code);
        assert_eq!(reg.owner_of(tcp_code), Some(OptionOwner::Match(tcp)));
        assert_eq!(reg.owner_of(udp_code), Some(OptionOwner::Match(udp)));

        assert_eq!(
            reg.target_option(1, "nhlfe").unwrap().code,
            reg.find_long("nhlfe").unwrap().code
        );
        assert!(reg.match_option(tcp, "nhlfe").is_none());
    }

    #[test]
    fn test_version_mismatch_rejected() {
        struct OldMatch;
        impl crate::MatchExt for OldMatch {
            fn name(&self) -> &'static str {
                "old"
            }
            fn version(&self) -> &'static str {
                "0.0.1"
            }
            fn size(&self) -> usize {
                0
            }
            fn options(&self) -> &'static [crate::OptSpec] {
                &[]
            }
            fn help(&self) -> &'static str {
                ""
            }
            fn parse(
                &self,
                _: u32,
                _: Option<&str>,
                _: bool,
                _: &mut u32,
                _: &mut nf6_abi::Entry,
                _: &mut [u8],
            ) -> Result<bool> {
                Ok(false)
            }
            fn print(&self, _: &nf6_abi::Entry, _: &[u8], _: bool) -> String {
                String::new()
            }
            fn save(&self, _: &nf6_abi::Entry, _: &[u8]) -> String {
                String::new()
            }
        }
        let mut reg = registry();
        assert!(matches!(
            reg.register_match(Box::new(OldMatch)),
            Err(ExtError::Version { .. })
        ));
    }
}
