//! The operation dispatcher.
//!
//! Rule commands iterate the Cartesian product of source × destination
//! addresses (source-major), stamping each pair into the assembled rule.
//! Per-pair failures are aggregated so every pair is attempted before
//! the command reports; chain-scope commands without a chain fan out
//! over every chain in the table.

use std::io::Write;

use nf6_abi::{Blob, Entry, align_up};
use nf6_ext::LoadPolicy;
use nf6_table::{Policy, TableError, TableHandle};
use tracing::warn;

use crate::command::{
    CMD_APPEND, CMD_CHECK, CMD_DELETE, CMD_DELETE_CHAIN, CMD_DELETE_NUM, CMD_FLUSH, CMD_INSERT,
    CMD_LIST, CMD_NEW_CHAIN, CMD_RENAME_CHAIN, CMD_REPLACE, CMD_RULE, CMD_SET_POLICY, CMD_ZERO,
    OPT_EXPANDED, OPT_LINENUMBERS, OPT_NUMERIC, OPT_VERBOSE, OPT_VIANAMEIN, OPT_VIANAMEOUT,
};
use crate::compiler::{Context, Invocation, PendingTarget};
use crate::error::{Error, Result, param};
use crate::listing::{
    FMT_KILOMEGAGIGA, FMT_LINENUMBERS, FMT_NOCOUNTS, FMT_NUMERIC, FMT_OPTIONS, FMT_VIA,
    list_entries, print_rule_line,
};

/// Execute a compiled invocation against an acquired table handle.
///
/// Returns `Err` when any per-pair operation failed; the caller skips
/// the commit in that case.
pub fn execute(
    inv: &mut Invocation,
    ctx: &mut Context,
    handle: &mut TableHandle,
    out: &mut dyn Write,
) -> Result<()> {
    if inv.command & CMD_RULE != 0 {
        resolve_rule_target(inv, ctx, handle)?;
    }

    let verbose = inv.options & OPT_VERBOSE != 0;
    match inv.command {
        CMD_APPEND | CMD_INSERT | CMD_DELETE | CMD_REPLACE | CMD_CHECK => {
            rule_command(inv, ctx, handle, out)
        }
        CMD_DELETE_NUM => {
            let chain = required_chain(inv)?;
            handle.delete_num(&chain, inv.rulenum - 1)?;
            Ok(())
        }
        CMD_LIST => {
            list_entries(out, handle, ctx, inv.chain.as_deref(), list_format(inv))?;
            Ok(())
        }
        CMD_FLUSH => flush_chains(inv, handle, verbose, out),
        CMD_ZERO => zero_chains(inv, handle, verbose, out),
        cmd if cmd == (CMD_LIST | CMD_ZERO) => {
            list_entries(out, handle, ctx, inv.chain.as_deref(), list_format(inv))?;
            zero_chains(inv, handle, verbose, out)
        }
        CMD_NEW_CHAIN => {
            let chain = required_chain(inv)?;
            handle.create_chain(&chain)?;
            Ok(())
        }
        CMD_DELETE_CHAIN => delete_chains(inv, handle, verbose, out),
        CMD_RENAME_CHAIN => {
            let chain = required_chain(inv)?;
            let newname = inv
                .newname
                .clone()
                .ok_or_else(|| param("no new chain name specified"))?;
            handle.rename_chain(&chain, &newname)?;
            Ok(())
        }
        CMD_SET_POLICY => {
            let chain = required_chain(inv)?;
            let name = inv
                .policy_name
                .clone()
                .ok_or_else(|| param("no policy specified"))?;
            let policy: Policy = name.parse()?;
            handle.set_policy(&chain, policy)?;
            Ok(())
        }
        _ => Err(param("no command specified")),
    }
}

fn required_chain(inv: &Invocation) -> Result<String> {
    inv.chain
        .clone()
        .ok_or_else(|| param("no chain specified"))
}

/// Settle the target blob now that the table is visible: jumps to real
/// chains use the standard target, and a rule-adding command must name
/// a loadable extension.
fn resolve_rule_target(
    inv: &mut Invocation,
    ctx: &mut Context,
    handle: &TableHandle,
) -> Result<()> {
    let chain = required_chain(inv)?;

    // Direction-bound chains reject the opposite interface option.
    if inv.options & OPT_VIANAMEOUT != 0 && (chain == "PREROUTING" || chain == "INPUT") {
        return Err(param(format!("Can't use -o with {chain}")));
    }
    if inv.options & OPT_VIANAMEIN != 0 && (chain == "POSTROUTING" || chain == "OUTPUT") {
        return Err(param(format!("Can't use -i with {chain}")));
    }

    // A user chain named like a target extension wins over the
    // extension.
    if inv.target.is_some() && handle.is_chain(&inv.jumpto) {
        warn!("using chain {}, not extension", inv.jumpto);
        inv.target = None;
    }

    if inv.target.is_none() && (inv.jumpto.is_empty() || handle.is_chain(&inv.jumpto)) {
        let idx = ctx
            .registry
            .find_target("standard", LoadPolicy::MustLoad)?
            .ok_or_else(|| param("couldn't load target `standard'"))?;
        let ext = ctx.registry.target_at(idx);
        let mut data = vec![0u8; align_up(ext.size())];
        ext.init(&mut data, &mut inv.entry.nfcache);
        inv.target = Some(PendingTarget {
            idx: Some(idx),
            label: inv.jumpto.clone(),
            flags: 0,
            data,
        });
    }

    // Deleting may still refer to an extension that is no longer
    // around (the rule assembles with a bare target header); anything
    // that adds rules needs the real thing.
    if inv.target.is_none() && inv.command != CMD_DELETE {
        ctx.registry.find_target(&inv.jumpto, LoadPolicy::MustLoad)?;
    }
    Ok(())
}

fn rule_command(
    inv: &Invocation,
    ctx: &mut Context,
    handle: &mut TableHandle,
    out: &mut dyn Write,
) -> Result<()> {
    let chain = required_chain(inv)?;
    let mut rule = inv.generate_entry(&ctx.registry)?;
    let verbose = inv.options & OPT_VERBOSE != 0;

    if inv.command == CMD_REPLACE {
        rule.set_addresses(&inv.saddrs[0], &inv.daddrs[0]);
        if verbose {
            print_rule_line(out, &rule, handle, ctx)?;
        }
        handle.replace(&chain, inv.rulenum - 1, rule)?;
        return Ok(());
    }

    let delete_mask = if inv.command == CMD_DELETE {
        Some(make_delete_mask(inv, ctx, rule.len()))
    } else {
        None
    };

    let mut failure: Option<TableError> = None;
    for saddr in &inv.saddrs {
        for daddr in &inv.daddrs {
            rule.set_addresses(saddr, daddr);
            if verbose {
                print_rule_line(out, &rule, handle, ctx)?;
            }
            let result = match inv.command {
                CMD_APPEND => handle.append(&chain, rule.clone()),
                CMD_INSERT => handle.insert(&chain, inv.rulenum - 1, rule.clone()),
                CMD_DELETE => match &delete_mask {
                    Some(mask) => handle.delete(&chain, &rule, mask),
                    None => Err(TableError::NoMatchingRule),
                },
                CMD_CHECK => match handle.check_packet(&chain, &rule.entry()) {
                    Ok(verdict) => {
                        writeln!(out, "{verdict}")?;
                        Ok(())
                    }
                    Err(e) => Err(e),
                },
                _ => Err(TableError::NoMatchingRule),
            };
            // Keep going: the remaining pairs must still be attempted.
            if let Err(e) = result {
                failure = Some(e);
            }
        }
    }
    match failure {
        Some(e) => Err(Error::Table(e)),
        None => Ok(()),
    }
}

/// The comparison mask for delete-by-content: entry header bytes all
/// set; for each blob the header plus its userspace-visible payload.
fn make_delete_mask(inv: &Invocation, ctx: &Context, total_len: usize) -> Vec<u8> {
    let mut mask = vec![0u8; total_len];
    mask[..Entry::LEN].fill(0xFF);

    let mut off = Entry::LEN;
    for m in &inv.matches {
        let ext = ctx.registry.match_at(m.idx);
        let visible = Blob::HEADER_LEN + ext.userspace_size();
        mask[off..off + visible].fill(0xFF);
        off += Blob::HEADER_LEN + m.data.len();
    }

    let target_visible = inv
        .target
        .as_ref()
        .and_then(|t| t.idx)
        .map_or(0, |idx| ctx.registry.target_at(idx).userspace_size());
    mask[off..off + Blob::HEADER_LEN + target_visible].fill(0xFF);
    mask
}

fn list_format(inv: &Invocation) -> u16 {
    let mut format = FMT_OPTIONS;
    if inv.options & OPT_VERBOSE == 0 {
        format |= FMT_NOCOUNTS;
    } else {
        format |= FMT_VIA;
    }
    if inv.options & OPT_NUMERIC != 0 {
        format |= FMT_NUMERIC;
    }
    if inv.options & OPT_EXPANDED == 0 {
        format |= FMT_KILOMEGAGIGA;
    }
    if inv.options & OPT_LINENUMBERS != 0 {
        format |= FMT_LINENUMBERS;
    }
    format
}

fn flush_chains(
    inv: &Invocation,
    handle: &mut TableHandle,
    verbose: bool,
    out: &mut dyn Write,
) -> Result<()> {
    for chain in selected_chains(inv, handle, true) {
        if verbose {
            writeln!(out, "Flushing chain `{chain}'")?;
        }
        handle.flush(&chain)?;
    }
    Ok(())
}

fn zero_chains(
    inv: &Invocation,
    handle: &mut TableHandle,
    verbose: bool,
    out: &mut dyn Write,
) -> Result<()> {
    for chain in selected_chains(inv, handle, true) {
        if verbose {
            writeln!(out, "Zeroing chain `{chain}'")?;
        }
        handle.zero(&chain)?;
    }
    Ok(())
}

fn delete_chains(
    inv: &Invocation,
    handle: &mut TableHandle,
    verbose: bool,
    out: &mut dyn Write,
) -> Result<()> {
    for chain in selected_chains(inv, handle, false) {
        if verbose {
            writeln!(out, "Deleting chain `{chain}'")?;
        }
        handle.delete_chain(&chain)?;
    }
    Ok(())
}

/// The selected chain, or every chain in the table (optionally keeping
/// built-ins out, for delete-chain).
fn selected_chains(inv: &Invocation, handle: &TableHandle, builtins_too: bool) -> Vec<String> {
    match &inv.chain {
        Some(chain) => vec![chain.clone()],
        None => handle
            .chain_names()
            .filter(|name| builtins_too || !handle.is_builtin(name))
            .map(ToString::to_string)
            .collect(),
    }
}
