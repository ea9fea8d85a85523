//! The table handle and its rule operations.

use nf6_abi::{
    Counters, Entry, INV_DSTIP, INV_PROTO, INV_SRCIP, INV_VIA_IN, INV_VIA_OUT, Rule, mask_addr,
};

use crate::kernel::{ChainState, KernelBackend, Snapshot};
use crate::{Policy, Result, TableError};

/// A buffered, transactional view of one table.
///
/// All mutations land in the local buffer; [`TableHandle::commit`]
/// pushes them to the kernel in one swap. Dropping the handle without
/// committing discards every pending change.
pub struct TableHandle {
    table: String,
    chains: Vec<ChainState>,
    backend: Box<dyn KernelBackend>,
}

impl TableHandle {
    /// Acquire a handle for `table`, fetching its current snapshot.
    pub fn init(table: &str, mut backend: Box<dyn KernelBackend>) -> Result<Self> {
        let snapshot = backend.fetch(table)?;
        Ok(Self {
            table: table.to_string(),
            chains: snapshot.chains,
            backend,
        })
    }

    /// The table this handle is bound to.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Chain names in kernel order.
    pub fn chain_names(&self) -> impl Iterator<Item = &str> {
        self.chains.iter().map(|c| c.name.as_str())
    }

    /// All chains, in kernel order.
    pub fn chains(&self) -> impl Iterator<Item = &ChainState> {
        self.chains.iter()
    }

    #[must_use]
    pub fn is_chain(&self, name: &str) -> bool {
        self.chains.iter().any(|c| c.name == name)
    }

    #[must_use]
    pub fn is_builtin(&self, name: &str) -> bool {
        self.chains
            .iter()
            .any(|c| c.name == name && c.policy.is_some())
    }

    fn chain(&self, name: &str) -> Result<&ChainState> {
        self.chains
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| TableError::NoChain(name.to_string()))
    }

    fn chain_mut(&mut self, name: &str) -> Result<&mut ChainState> {
        self.chains
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| TableError::NoChain(name.to_string()))
    }

    /// Rules of a chain.
    pub fn rules(&self, chain: &str) -> Result<&[Rule]> {
        Ok(&self.chain(chain)?.rules)
    }

    /// Policy and policy counters; `None` for user chains.
    pub fn policy(&self, chain: &str) -> Result<Option<(Policy, Counters)>> {
        let c = self.chain(chain)?;
        Ok(c.policy.map(|p| (p, c.counters)))
    }

    /// Number of jump references to a chain.
    pub fn references(&self, chain: &str) -> Result<usize> {
        let _ = self.chain(chain)?;
        Ok(self
            .chains
            .iter()
            .flat_map(|c| &c.rules)
            .filter(|r| r.target_name() == chain)
            .count())
    }

    // ========================================================================
    // Rule operations
    // ========================================================================

    /// Append a rule to the end of a chain.
    pub fn append(&mut self, chain: &str, rule: Rule) -> Result<()> {
        self.chain_mut(chain)?.rules.push(rule);
        Ok(())
    }

    /// Insert a rule at a 0-based position.
    pub fn insert(&mut self, chain: &str, rulenum: usize, rule: Rule) -> Result<()> {
        let c = self.chain_mut(chain)?;
        if rulenum > c.rules.len() {
            return Err(TableError::BadRuleNumber(rulenum));
        }
        c.rules.insert(rulenum, rule);
        Ok(())
    }

    /// Replace the rule at a 0-based position.
    pub fn replace(&mut self, chain: &str, rulenum: usize, rule: Rule) -> Result<()> {
        let c = self.chain_mut(chain)?;
        match c.rules.get_mut(rulenum) {
            Some(slot) => {
                *slot = rule;
                Ok(())
            }
            None => Err(TableError::BadRuleNumber(rulenum)),
        }
    }

    /// Delete the first rule whose bytes equal `rule` under `mask`.
    pub fn delete(&mut self, chain: &str, rule: &Rule, mask: &[u8]) -> Result<()> {
        let c = self.chain_mut(chain)?;
        let pos = c
            .rules
            .iter()
            .position(|r| masked_eq(r.as_bytes(), rule.as_bytes(), mask))
            .ok_or(TableError::NoMatchingRule)?;
        c.rules.remove(pos);
        Ok(())
    }

    /// Delete the rule at a 0-based position.
    pub fn delete_num(&mut self, chain: &str, rulenum: usize) -> Result<()> {
        let c = self.chain_mut(chain)?;
        if rulenum >= c.rules.len() {
            return Err(TableError::BadRuleNumber(rulenum));
        }
        c.rules.remove(rulenum);
        Ok(())
    }

    /// Dry-run a probe entry down a chain; report the winning verdict.
    ///
    /// The first rule whose header predicate selects the probe decides:
    /// its target label is the verdict, an empty label falls through, and
    /// RETURN stops the walk. With no decision the chain policy answers
    /// (user chains answer RETURN).
    pub fn check_packet(&self, chain: &str, probe: &Entry) -> Result<String> {
        let c = self.chain(chain)?;
        for rule in &c.rules {
            if entry_selects(&rule.entry(), probe) {
                let label = rule.target_name();
                match label.as_str() {
                    "" => {}
                    "RETURN" => break,
                    _ => return Ok(label),
                }
            }
        }
        Ok(c.policy
            .map_or_else(|| "RETURN".to_string(), |p| p.as_str().to_string()))
    }

    // ========================================================================
    // Chain operations
    // ========================================================================

    /// Create a user chain.
    pub fn create_chain(&mut self, name: &str) -> Result<()> {
        if self.is_chain(name) {
            return Err(TableError::ChainExists(name.to_string()));
        }
        self.chains.push(ChainState::user(name));
        Ok(())
    }

    /// Delete an empty, unreferenced user chain.
    pub fn delete_chain(&mut self, name: &str) -> Result<()> {
        if self.is_builtin(name) {
            return Err(TableError::BuiltinChain(name.to_string()));
        }
        if !self.chain(name)?.rules.is_empty() {
            return Err(TableError::ChainNotEmpty(name.to_string()));
        }
        if self.references(name)? > 0 {
            return Err(TableError::ChainInUse(name.to_string()));
        }
        self.chains.retain(|c| c.name != name);
        Ok(())
    }

    /// Rename a user chain, moving any references.
    pub fn rename_chain(&mut self, old: &str, new: &str) -> Result<()> {
        if self.is_builtin(old) {
            return Err(TableError::BuiltinChain(old.to_string()));
        }
        if self.is_chain(new) {
            return Err(TableError::ChainExists(new.to_string()));
        }
        let _ = self.chain(old)?;
        // Jump labels carry the chain name; rewriting them preserves the
        // references across the rename. Labels live in the target blob
        // name field, so rebuild those rules.
        for chain in &mut self.chains {
            for rule in &mut chain.rules {
                if rule.target_name() == old {
                    rename_target_label(rule, new);
                }
            }
        }
        self.chain_mut(old)?.name = new.to_string();
        Ok(())
    }

    /// Set the default policy of a built-in chain.
    pub fn set_policy(&mut self, chain: &str, policy: Policy) -> Result<()> {
        if !self.is_builtin(chain) {
            let _ = self.chain(chain)?;
            return Err(TableError::PolicyOnUserChain(chain.to_string()));
        }
        self.chain_mut(chain)?.policy = Some(policy);
        Ok(())
    }

    /// Remove all rules from a chain.
    pub fn flush(&mut self, chain: &str) -> Result<()> {
        self.chain_mut(chain)?.rules.clear();
        Ok(())
    }

    /// Zero the policy counters and every rule counter of a chain.
    pub fn zero(&mut self, chain: &str) -> Result<()> {
        let c = self.chain_mut(chain)?;
        c.counters = Counters::default();
        for rule in &mut c.rules {
            rule.set_counters(Counters::default());
        }
        Ok(())
    }

    /// Push the buffered table back to the kernel atomically.
    pub fn commit(&mut self) -> Result<()> {
        let snapshot = Snapshot {
            chains: self.chains.clone(),
        };
        self.backend.commit(&self.table, &snapshot)
    }
}

/// Byte equality under a comparison mask; lengths must agree.
fn masked_eq(a: &[u8], b: &[u8], mask: &[u8]) -> bool {
    a.len() == b.len()
        && a.len() == mask.len()
        && a.iter()
            .zip(b)
            .zip(mask)
            .all(|((x, y), m)| (x ^ y) & m == 0)
}

/// Whether a rule's header predicate selects the probe entry.
fn entry_selects(rule: &Entry, probe: &Entry) -> bool {
    let inv = |bit: u8| rule.invflags & bit != 0;
    let proto_ok = rule.proto == 0 || ((probe.proto == rule.proto) != inv(INV_PROTO));
    let src_ok = (mask_addr(&probe.src, &rule.smsk) == rule.src) != inv(INV_SRCIP);
    let dst_ok = (mask_addr(&probe.dst, &rule.dmsk) == rule.dst) != inv(INV_DSTIP);
    let in_ok = rule.iniface.matches(probe.iniface.name_str()) != inv(INV_VIA_IN);
    let out_ok = rule.outiface.matches(probe.outiface.name_str()) != inv(INV_VIA_OUT);
    proto_ok && src_ok && dst_ok && in_ok && out_ok
}

/// Rewrite the label in a rule's target blob name field.
fn rename_target_label(rule: &mut Rule, new: &str) {
    let entry = rule.entry();
    let target = rule.target();
    if let Ok(mut blob) = nf6_abi::Blob::new(new, target.payload.len(), target.revision) {
        blob.data.copy_from_slice(target.payload);
        let matches: Vec<nf6_abi::Blob> = rule
            .match_blobs()
            .filter_map(|m| {
                nf6_abi::Blob::new(m.name, m.payload.len(), m.revision)
                    .map(|mut b| {
                        b.data.copy_from_slice(m.payload);
                        b
                    })
                    .ok()
            })
            .collect();
        *rule = Rule::assemble(&entry, &matches, &blob);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBackend;
    use nf6_abi::Blob;

    fn rule_to(label: &str) -> Rule {
        let target = Blob::new(label, 4, 0).unwrap();
        Rule::assemble(&Entry::default(), &[], &target)
    }

    fn handle() -> TableHandle {
        TableHandle::init("filter", Box::new(MemoryBackend::new())).unwrap()
    }

    #[test]
    fn test_init_unknown_table() {
        assert!(matches!(
            TableHandle::init("mangle", Box::new(MemoryBackend::new())),
            Err(TableError::NoTable(_))
        ));
    }

    #[test]
    fn test_append_insert_replace_delete_num() {
        let mut h = handle();
        h.append("FORWARD", rule_to("ACCEPT")).unwrap();
        h.append("FORWARD", rule_to("DROP")).unwrap();
        h.insert("FORWARD", 1, rule_to("QUEUE")).unwrap();
        let labels: Vec<_> = h
            .rules("FORWARD")
            .unwrap()
            .iter()
            .map(Rule::target_name)
            .collect();
        assert_eq!(labels, ["ACCEPT", "QUEUE", "DROP"]);

        h.replace("FORWARD", 0, rule_to("RETURN")).unwrap();
        assert_eq!(h.rules("FORWARD").unwrap()[0].target_name(), "RETURN");

        h.delete_num("FORWARD", 1).unwrap();
        assert_eq!(h.rules("FORWARD").unwrap().len(), 2);
        assert!(matches!(
            h.delete_num("FORWARD", 5),
            Err(TableError::BadRuleNumber(5))
        ));
    }

    #[test]
    fn test_delete_by_mask() {
        let mut h = handle();
        h.append("FORWARD", rule_to("ACCEPT")).unwrap();
        let probe = rule_to("ACCEPT");
        let mask = vec![0xFF; probe.len()];
        h.delete("FORWARD", &probe, &mask).unwrap();
        assert!(h.rules("FORWARD").unwrap().is_empty());
        assert!(matches!(
            h.delete("FORWARD", &probe, &mask),
            Err(TableError::NoMatchingRule)
        ));
    }

    #[test]
    fn test_chain_lifecycle_and_references() {
        let mut h = handle();
        h.create_chain("logdrop").unwrap();
        assert!(h.is_chain("logdrop"));
        assert!(!h.is_builtin("logdrop"));
        assert!(matches!(
            h.create_chain("logdrop"),
            Err(TableError::ChainExists(_))
        ));

        h.append("FORWARD", rule_to("logdrop")).unwrap();
        assert_eq!(h.references("logdrop").unwrap(), 1);
        assert!(matches!(
            h.delete_chain("logdrop"),
            Err(TableError::ChainInUse(_))
        ));

        h.flush("FORWARD").unwrap();
        h.delete_chain("logdrop").unwrap();
        assert!(!h.is_chain("logdrop"));
        assert!(matches!(
            h.delete_chain("INPUT"),
            Err(TableError::BuiltinChain(_))
        ));
    }

    #[test]
    fn test_rename_moves_references() {
        let mut h = handle();
        h.create_chain("old").unwrap();
        h.append("FORWARD", rule_to("old")).unwrap();
        h.rename_chain("old", "new").unwrap();
        assert!(h.is_chain("new"));
        assert!(!h.is_chain("old"));
        assert_eq!(h.references("new").unwrap(), 1);
        assert_eq!(h.rules("FORWARD").unwrap()[0].target_name(), "new");
    }

    #[test]
    fn test_set_policy() {
        let mut h = handle();
        h.set_policy("INPUT", Policy::Drop).unwrap();
        assert_eq!(h.policy("INPUT").unwrap().unwrap().0, Policy::Drop);
        h.create_chain("user").unwrap();
        assert!(matches!(
            h.set_policy("user", Policy::Drop),
            Err(TableError::PolicyOnUserChain(_))
        ));
    }

    #[test]
    fn test_commit_roundtrip() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let backend = Rc::new(RefCell::new(MemoryBackend::new()));
        {
            let mut h = TableHandle::init("filter", Box::new(Rc::clone(&backend))).unwrap();
            h.append("OUTPUT", rule_to("DROP")).unwrap();
            // Dropped without commit: nothing reaches the kernel.
        }
        assert!(
            backend.borrow().table("filter").unwrap().chains[2]
                .rules
                .is_empty()
        );

        let mut h = TableHandle::init("filter", Box::new(Rc::clone(&backend))).unwrap();
        h.append("OUTPUT", rule_to("DROP")).unwrap();
        h.commit().unwrap();
        assert_eq!(
            backend.borrow().table("filter").unwrap().chains[2].rules.len(),
            1
        );
    }

    #[test]
    fn test_check_packet_verdicts() {
        let mut h = handle();
        let mut drop_tcp = Entry {
            proto: 6,
            ..Entry::default()
        };
        drop_tcp.flags = nf6_abi::F_PROTO;
        let target = Blob::new("DROP", 4, 0).unwrap();
        h.append("INPUT", Rule::assemble(&drop_tcp, &[], &target))
            .unwrap();

        let tcp_probe = Entry {
            proto: 6,
            ..Entry::default()
        };
        assert_eq!(h.check_packet("INPUT", &tcp_probe).unwrap(), "DROP");

        let udp_probe = Entry {
            proto: 17,
            ..Entry::default()
        };
        assert_eq!(h.check_packet("INPUT", &udp_probe).unwrap(), "ACCEPT");
    }

    #[test]
    fn test_zero_clears_counters() {
        let mut h = handle();
        let mut rule = rule_to("ACCEPT");
        rule.set_counters(Counters {
            packets: 7,
            bytes: 900,
        });
        h.append("INPUT", rule).unwrap();
        h.zero("INPUT").unwrap();
        assert_eq!(
            h.rules("INPUT").unwrap()[0].entry().counters,
            Counters::default()
        );
    }
}
