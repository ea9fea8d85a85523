//! Lazy extension loading from shared libraries.

use std::path::PathBuf;

use libloading::{Library, Symbol};
use tracing::debug;

use crate::registry::ExtensionLoader;
use crate::{MatchExt, TargetExt};

/// Extensions produced by one plugin load.
#[derive(Default)]
pub struct LoadedExtensions {
    pub matches: Vec<Box<dyn MatchExt>>,
    pub targets: Vec<Box<dyn TargetExt>>,
}

impl LoadedExtensions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_match(mut self, ext: Box<dyn MatchExt>) -> Self {
        self.matches.push(ext);
        self
    }

    #[must_use]
    pub fn with_target(mut self, ext: Box<dyn TargetExt>) -> Self {
        self.targets.push(ext);
        self
    }
}

/// Entry point every loadable plugin exports.
type RegisterFn = unsafe extern "Rust" fn() -> LoadedExtensions;

/// Loads `libnf6_<name>.so` from the extension directory.
///
/// Libraries stay mapped for the life of the loader; the returned trait
/// objects point into them.
pub struct DylibLoader {
    dir: PathBuf,
    libs: Vec<Library>,
}

impl DylibLoader {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            libs: Vec::new(),
        }
    }

    fn library_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("libnf6_{name}.so"))
    }
}

impl ExtensionLoader for DylibLoader {
    fn load(&mut self, name: &str) -> Option<LoadedExtensions> {
        let path = self.library_path(name);
        let lib = unsafe { Library::new(&path) }.ok()?;
        let loaded = unsafe {
            let register: Symbol<RegisterFn> = lib.get(b"nf6_register").ok()?;
            register()
        };
        debug!(plugin = name, path = %path.display(), "loaded extension library");
        self.libs.push(lib);
        Some(loaded)
    }
}

/// Loader that never finds anything.
pub struct NullLoader;

impl ExtensionLoader for NullLoader {
    fn load(&mut self, _name: &str) -> Option<LoadedExtensions> {
        None
    }
}
