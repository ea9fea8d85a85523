//! The listing formatter.
//!
//! Walks chains and rules from the table handle, printing the fixed
//! columns and handing each match and target blob to its extension's
//! print callback. Address strings are materialized before any column
//! formatting happens.

use std::io::Write;
use std::net::Ipv6Addr;

use nf6_abi::{Blob, INV_DSTIP, INV_PROTO, INV_SRCIP, INV_VIA_IN, INV_VIA_OUT, IfacePattern, Rule,
    prefix_length};
use nf6_ext::LoadPolicy;
use nf6_table::TableHandle;

use crate::address::{addr_to_anyname, addr_to_numeric, mask_to_numeric};
use crate::compiler::Context;
use crate::error::Result;
use crate::proto::proto_to_name;

pub const FMT_NUMERIC: u16 = 0x0001;
pub const FMT_NOCOUNTS: u16 = 0x0002;
pub const FMT_KILOMEGAGIGA: u16 = 0x0004;
pub const FMT_OPTIONS: u16 = 0x0008;
pub const FMT_NOTABLE: u16 = 0x0010;
pub const FMT_NOTARGET: u16 = 0x0020;
pub const FMT_VIA: u16 = 0x0040;
pub const FMT_NONEWLINE: u16 = 0x0080;
pub const FMT_LINENUMBERS: u16 = 0x0100;

/// Single-line rule echo, as used by verbose rule commands.
pub const FMT_PRINT_RULE: u16 =
    FMT_NOCOUNTS | FMT_OPTIONS | FMT_VIA | FMT_NUMERIC | FMT_NOTABLE;

/// Pick the tabular or the free-form variant of a column.
fn fmt<'a>(format: u16, tab: &'a str, notab: &'a str) -> &'a str {
    if format & FMT_NOTABLE != 0 { notab } else { tab }
}

/// Counter rendering: exact, or the K/M/G cascade with half-up
/// rounding once a count exceeds 99999.
fn print_num(out: &mut dyn Write, number: u64, format: u16) -> std::io::Result<()> {
    if format & FMT_KILOMEGAGIGA != 0 {
        if number > 99_999 {
            let (scaled, suffix) = scale_counter(number);
            if format & FMT_NOTABLE != 0 {
                write!(out, "{scaled}{suffix} ")
            } else {
                write!(out, "{scaled:>4}{suffix} ")
            }
        } else if format & FMT_NOTABLE != 0 {
            write!(out, "{number} ")
        } else {
            write!(out, "{number:>5} ")
        }
    } else if format & FMT_NOTABLE != 0 {
        write!(out, "{number} ")
    } else {
        write!(out, "{number:>8} ")
    }
}

fn scale_counter(number: u64) -> (u64, char) {
    let k = (number + 500) / 1000;
    if k <= 9999 {
        return (k, 'K');
    }
    let m = (k + 500) / 1000;
    if m <= 9999 {
        return (m, 'M');
    }
    ((m + 500) / 1000, 'G')
}

/// Chain header: policy and counters for built-ins, reference count for
/// user chains, then the column captions.
fn print_header(
    out: &mut dyn Write,
    format: u16,
    handle: &TableHandle,
    chain: &str,
) -> Result<()> {
    write!(out, "Chain {chain}")?;
    if let Some((policy, counters)) = handle.policy(chain)? {
        write!(out, " (policy {}", policy.as_str())?;
        if format & FMT_NOCOUNTS == 0 {
            write!(out, " {} packets, {} bytes", counters.packets, counters.bytes)?;
        }
        writeln!(out, ")")?;
    } else {
        writeln!(out, " ({} references)", handle.references(chain)?)?;
    }

    if format & FMT_LINENUMBERS != 0 {
        write!(out, "{}", fmt(format, "num  ", "num "))?;
    }
    if format & FMT_NOCOUNTS == 0 {
        if format & FMT_KILOMEGAGIGA != 0 {
            write!(out, "{:>5} {:>5} ", "pkts", "bytes")?;
        } else {
            write!(out, "{:>8} {:>10} ", "pkts", "bytes")?;
        }
    }
    if format & FMT_NOTARGET == 0 {
        write!(out, "{:<9} ", "target")?;
    }
    write!(out, " prot ")?;
    if format & FMT_OPTIONS != 0 {
        write!(out, "opt")?;
    }
    if format & FMT_VIA != 0 {
        write!(out, " {:<6} {:<6} ", "in", "out")?;
    }
    write!(out, " {:<19} ", "source")?;
    writeln!(out, " {:<19} ", "destination")?;
    Ok(())
}

fn iface_column(pattern: &IfacePattern, inverted: bool, numeric: bool) -> String {
    let mut s = String::new();
    if inverted {
        s.push('!');
    }
    if pattern.is_any() {
        s.push_str(if numeric { "*" } else { "any" });
    } else {
        s.push_str(pattern.name_str());
        if pattern.is_wildcard() {
            s.push('+');
        }
    }
    s
}

fn addr_column(
    addr: &Ipv6Addr,
    mask: &Ipv6Addr,
    format: u16,
    ctx: &Context,
) -> String {
    if *mask == Ipv6Addr::UNSPECIFIED && format & FMT_NUMERIC == 0 {
        return "anywhere".to_string();
    }
    let host = if format & FMT_NUMERIC != 0 {
        addr_to_numeric(addr)
    } else {
        addr_to_anyname(addr, &*ctx.resolver)
    };
    format!("{host}/{}", mask_to_numeric(mask))
}

/// Print one rule.
pub(crate) fn print_rule(
    out: &mut dyn Write,
    rule: &Rule,
    num: usize,
    format: u16,
    handle: &TableHandle,
    ctx: &mut Context,
) -> Result<()> {
    let entry = rule.entry();
    let label = rule.target_name();

    // A user chain with a target's name overrides the extension.
    let target_ext = if handle.is_chain(&label) {
        None
    } else {
        ctx.registry
            .find_target(&label, LoadPolicy::TryLoad)
            .unwrap_or(None)
    };

    if format & FMT_LINENUMBERS != 0 {
        write!(out, "{}", pad(format, &(num + 1).to_string(), 4))?;
    }
    if format & FMT_NOCOUNTS == 0 {
        print_num(out, entry.counters.packets, format)?;
        print_num(out, entry.counters.bytes, format)?;
    }
    if format & FMT_NOTARGET == 0 {
        write!(out, "{}", pad(format, &label, 9))?;
    }

    write!(out, "{}", if entry.invflags & INV_PROTO != 0 { '!' } else { ' ' })?;
    let numeric = format & FMT_NUMERIC != 0;
    match proto_to_name(entry.proto as u8, numeric, &*ctx.protos) {
        Some(name) => write!(out, "{}", pad5(format, &name))?,
        None => write!(out, "{}", pad5(format, &entry.proto.to_string()))?,
    }

    if format & FMT_OPTIONS != 0 {
        if format & FMT_NOTABLE != 0 {
            write!(out, "opt ")?;
        }
        write!(out, "   ")?;
    }

    if format & FMT_VIA != 0 {
        let in_col = iface_column(&entry.iniface, entry.invflags & INV_VIA_IN != 0, numeric);
        let out_col = iface_column(&entry.outiface, entry.invflags & INV_VIA_OUT != 0, numeric);
        if format & FMT_NOTABLE != 0 {
            write!(out, "in {in_col} out {out_col} ")?;
        } else {
            write!(out, " {in_col:<6} {out_col:<6} ")?;
        }
    }

    write!(out, "{}", if entry.invflags & INV_SRCIP != 0 { '!' } else { ' ' })?;
    let src = addr_column(&entry.src, &entry.smsk, format, ctx);
    write!(out, "{}", pad(format, &src, 19))?;

    write!(out, "{}", if entry.invflags & INV_DSTIP != 0 { '!' } else { ' ' })?;
    let dst = addr_column(&entry.dst, &entry.dmsk, format, ctx);
    if format & FMT_NOTABLE != 0 {
        write!(out, "-> {dst}")?;
    } else {
        write!(out, "{dst:<19}")?;
    }

    if format & FMT_NOTABLE != 0 {
        write!(out, "  ")?;
    }

    for blob in rule.match_blobs() {
        match ctx
            .registry
            .find_match(blob.name, LoadPolicy::TryLoad)
            .unwrap_or(None)
        {
            Some(idx) => {
                let text = ctx.registry.match_at(idx).print(&entry, blob.payload, numeric);
                write!(out, "{text}")?;
            }
            None => {
                if !blob.name.is_empty() {
                    write!(out, "UNKNOWN match `{}' ", blob.name)?;
                }
            }
        }
    }

    let target = rule.target();
    if let Some(idx) = target_ext {
        let text = ctx
            .registry
            .target_at(idx)
            .print(&entry, target.payload, numeric);
        write!(out, "{text}")?;
    } else if !handle.is_chain(&label) && usize::from(target.size) != Blob::HEADER_LEN {
        write!(out, "[{} bytes of unknown target data] ", target.payload.len())?;
    }

    if format & FMT_NONEWLINE == 0 {
        writeln!(out)?;
    }
    Ok(())
}

fn pad(format: u16, s: &str, width: usize) -> String {
    if format & FMT_NOTABLE != 0 {
        format!("{s} ")
    } else {
        format!("{s:<width$} ")
    }
}

fn pad5(format: u16, s: &str) -> String {
    if format & FMT_NOTABLE != 0 {
        format!("{s} ")
    } else {
        format!("{s:<5}")
    }
}

/// Echo a rule on one line, the way verbose rule commands do.
pub(crate) fn print_rule_line(
    out: &mut dyn Write,
    rule: &Rule,
    handle: &TableHandle,
    ctx: &mut Context,
) -> Result<()> {
    print_rule(out, rule, 0, FMT_PRINT_RULE, handle, ctx)
}

/// List the selected chain, or every chain of the table.
pub(crate) fn list_entries(
    out: &mut dyn Write,
    handle: &TableHandle,
    ctx: &mut Context,
    chain: Option<&str>,
    format: u16,
) -> Result<()> {
    let names: Vec<String> = handle.chain_names().map(ToString::to_string).collect();
    let mut found = false;
    for name in &names {
        if let Some(selected) = chain {
            if selected != name {
                continue;
            }
        }
        if found {
            writeln!(out)?;
        }
        print_header(out, format, handle, name)?;
        for (num, rule) in handle.rules(name)?.iter().enumerate() {
            print_rule(out, rule, num, format, handle, ctx)?;
        }
        found = true;
    }
    if !found {
        if let Some(selected) = chain {
            return Err(nf6_table::TableError::NoChain(selected.to_string()).into());
        }
    }
    Ok(())
}

/// Render a rule back into the canonical `-A chain …` argv form, using
/// the extensions' save callbacks.
pub fn save_rule(chain: &str, rule: &Rule, ctx: &mut Context) -> String {
    let entry = rule.entry();
    let mut out = format!("-A {chain} ");

    let addr_part = |flag: u8, opt: &str, addr: &Ipv6Addr, mask: &Ipv6Addr| -> String {
        if *mask == Ipv6Addr::UNSPECIFIED {
            return String::new();
        }
        let inv = if entry.invflags & flag != 0 { "! " } else { "" };
        // A host mask is suppressed, matching what the parser defaults.
        match prefix_length(mask) {
            Some(128) => format!("{inv}{opt} {addr} "),
            _ => format!("{inv}{opt} {addr}/{} ", mask_to_numeric(mask)),
        }
    };
    out.push_str(&addr_part(INV_SRCIP, "-s", &entry.src, &entry.smsk));
    out.push_str(&addr_part(INV_DSTIP, "-d", &entry.dst, &entry.dmsk));

    let iface_part = |flag: u8, opt: &str, pattern: &IfacePattern| -> String {
        if pattern.is_any() {
            return String::new();
        }
        let inv = if entry.invflags & flag != 0 { "! " } else { "" };
        let plus = if pattern.is_wildcard() { "+" } else { "" };
        format!("{inv}{opt} {}{plus} ", pattern.name_str())
    };
    out.push_str(&iface_part(INV_VIA_IN, "-i", &entry.iniface));
    out.push_str(&iface_part(INV_VIA_OUT, "-o", &entry.outiface));

    if entry.flags & nf6_abi::F_PROTO != 0 {
        let inv = if entry.invflags & INV_PROTO != 0 { "! " } else { "" };
        let name = proto_to_name(entry.proto as u8, false, &*ctx.protos)
            .unwrap_or_else(|| entry.proto.to_string());
        out.push_str(&format!("{inv}-p {name} "));
    }

    for blob in rule.match_blobs() {
        if let Ok(Some(idx)) = ctx.registry.find_match(blob.name, LoadPolicy::TryLoad) {
            out.push_str(&format!("-m {} ", blob.name));
            out.push_str(&ctx.registry.match_at(idx).save(&entry, blob.payload));
        }
    }

    let label = rule.target_name();
    if !label.is_empty() {
        out.push_str(&format!("-j {label} "));
        let target = rule.target();
        if let Ok(Some(idx)) = ctx.registry.find_target(&label, LoadPolicy::TryLoad) {
            out.push_str(&ctx.registry.target_at(idx).save(&entry, target.payload));
        }
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_counter_cascade() {
        assert_eq!(scale_counter(100_000), (100, 'K'));
        assert_eq!(scale_counter(5_499_600), (5500, 'K'));
        assert_eq!(scale_counter(9_999_000), (9999, 'K'));
        assert_eq!(scale_counter(10_000_000), (10, 'M'));
        assert_eq!(scale_counter(12_000_000_000), (12, 'G'));
    }

    #[test]
    fn test_print_num_widths() {
        let mut buf = Vec::new();
        print_num(&mut buf, 42, 0).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "      42 ");

        let mut buf = Vec::new();
        print_num(&mut buf, 123_456, FMT_KILOMEGAGIGA).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), " 123K ");

        let mut buf = Vec::new();
        print_num(&mut buf, 99_999, FMT_KILOMEGAGIGA).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "99999 ");
    }

    #[test]
    fn test_iface_column_forms() {
        let any = IfacePattern::any();
        assert_eq!(iface_column(&any, false, false), "any");
        assert_eq!(iface_column(&any, false, true), "*");
        let eth = IfacePattern::prefix("eth0").unwrap();
        assert_eq!(iface_column(&eth, false, false), "eth0+");
        assert_eq!(iface_column(&eth, true, false), "!eth0+");
    }
}
