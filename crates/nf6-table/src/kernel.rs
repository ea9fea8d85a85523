//! The kernel seam: snapshot exchange with the filter core.
//!
//! The wire encoding to the real kernel lives behind [`KernelBackend`];
//! this crate only requires that a whole-table snapshot can be fetched
//! and a modified one swapped in atomically.

use nf6_abi::{Counters, Rule};
use rustc_hash::FxHashMap;

use crate::{Policy, Result, TableError};

/// One chain as it crosses the kernel boundary.
#[derive(Clone, Debug)]
pub struct ChainState {
    pub name: String,
    /// `Some` for built-in chains.
    pub policy: Option<Policy>,
    /// Policy counters (built-in chains).
    pub counters: Counters,
    pub rules: Vec<Rule>,
}

impl ChainState {
    #[must_use]
    pub fn builtin(name: &str, policy: Policy) -> Self {
        Self {
            name: name.to_string(),
            policy: Some(policy),
            counters: Counters::default(),
            rules: Vec::new(),
        }
    }

    #[must_use]
    pub fn user(name: &str) -> Self {
        Self {
            name: name.to_string(),
            policy: None,
            counters: Counters::default(),
            rules: Vec::new(),
        }
    }
}

/// All chains of one table, in kernel order.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    pub chains: Vec<ChainState>,
}

/// Transport for table snapshots.
pub trait KernelBackend {
    /// Fetch the current snapshot of `table`.
    fn fetch(&mut self, table: &str) -> Result<Snapshot>;

    /// Atomically replace `table` with `snapshot`.
    fn commit(&mut self, table: &str, snapshot: &Snapshot) -> Result<()>;
}

/// In-memory stand-in for the kernel, holding the standard `filter`
/// table. Used by tests and as the development backend.
#[derive(Default)]
pub struct MemoryBackend {
    tables: FxHashMap<String, Snapshot>,
}

impl MemoryBackend {
    /// A backend with an empty `filter` table and ACCEPT policies.
    #[must_use]
    pub fn new() -> Self {
        let filter = Snapshot {
            chains: vec![
                ChainState::builtin("INPUT", Policy::Accept),
                ChainState::builtin("FORWARD", Policy::Accept),
                ChainState::builtin("OUTPUT", Policy::Accept),
            ],
        };
        let mut tables = FxHashMap::default();
        tables.insert("filter".to_string(), filter);
        Self { tables }
    }

    /// Inspect a committed table.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&Snapshot> {
        self.tables.get(name)
    }
}

impl KernelBackend for MemoryBackend {
    fn fetch(&mut self, table: &str) -> Result<Snapshot> {
        self.tables
            .get(table)
            .cloned()
            .ok_or_else(|| TableError::NoTable(table.to_string()))
    }

    fn commit(&mut self, table: &str, snapshot: &Snapshot) -> Result<()> {
        if !self.tables.contains_key(table) {
            return Err(TableError::NoTable(table.to_string()));
        }
        self.tables.insert(table.to_string(), snapshot.clone());
        Ok(())
    }
}

// A handle owns its backend; sharing one (to observe commits, or to run
// several invocations against the same kernel) goes through Rc<RefCell>.
impl<B: KernelBackend> KernelBackend for std::rc::Rc<std::cell::RefCell<B>> {
    fn fetch(&mut self, table: &str) -> Result<Snapshot> {
        self.borrow_mut().fetch(table)
    }

    fn commit(&mut self, table: &str, snapshot: &Snapshot) -> Result<()> {
        self.borrow_mut().commit(table, snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_backend_filter_table() {
        let mut backend = MemoryBackend::new();
        let snap = backend.fetch("filter").unwrap();
        let names: Vec<_> = snap.chains.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["INPUT", "FORWARD", "OUTPUT"]);
        assert!(snap.chains.iter().all(|c| c.policy == Some(Policy::Accept)));
    }

    #[test]
    fn test_unknown_table() {
        let mut backend = MemoryBackend::new();
        assert!(matches!(
            backend.fetch("mangle"),
            Err(TableError::NoTable(_))
        ));
    }
}
