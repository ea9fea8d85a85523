//! Usage text for `-h`.

use std::fmt::Write;

use crate::compiler::Context;
use crate::{PROGRAM_NAME, VERSION};

/// Build the full help text: core usage, then every registered target's
/// and match's own help.
#[must_use]
pub fn build_help(ctx: &Context) -> String {
    let p = PROGRAM_NAME;
    let mut out = format!(
        "{p} v{VERSION}\n\n\
         Usage: {p} -[ADC] chain rule-specification [options]\n\
         \x20      {p} -[RI] chain rulenum rule-specification [options]\n\
         \x20      {p} -D chain rulenum [options]\n\
         \x20      {p} -[LFZ] [chain] [options]\n\
         \x20      {p} -[NX] chain\n\
         \x20      {p} -E old-chain-name new-chain-name\n\
         \x20      {p} -P chain target [options]\n\
         \x20      {p} -h (print this help information)\n\n"
    );
    out.push_str(
        "Commands:\n\
         Either long or short options are allowed.\n\
         \x20 --append  -A chain\t\tAppend to chain\n\
         \x20 --delete  -D chain\t\tDelete matching rule from chain\n\
         \x20 --delete  -D chain rulenum\n\
         \t\t\t\tDelete rule rulenum (1 = first) from chain\n\
         \x20 --insert  -I chain [rulenum]\n\
         \t\t\t\tInsert in chain as rulenum (default 1=first)\n\
         \x20 --replace -R chain rulenum\n\
         \t\t\t\tReplace rule rulenum (1 = first) in chain\n\
         \x20 --list    -L [chain]\t\tList the rules in a chain or all chains\n\
         \x20 --flush   -F [chain]\t\tDelete all rules in  chain or all chains\n\
         \x20 --zero    -Z [chain]\t\tZero counters in chain or all chains\n\
         \x20 --check   -C chain\t\tTest this packet on chain\n\
         \x20 --new     -N chain\t\tCreate a new user-defined chain\n\
         \x20 --delete-chain\n\
         \x20           -X [chain]\t\tDelete a user-defined chain\n\
         \x20 --policy  -P chain target\n\
         \t\t\t\tChange policy on chain to target\n\
         \x20 --rename-chain\n\
         \x20           -E old-chain new-chain\n\
         \t\t\t\tChange chain name, (moving any references)\n\
         Options:\n\
         \x20 --proto\t-p [!] proto\tprotocol: by number or name, eg. `tcp'\n\
         \x20 --source\t-s [!] address[/mask]\n\
         \t\t\t\tsource specification\n\
         \x20 --destination -d [!] address[/mask]\n\
         \t\t\t\tdestination specification\n\
         \x20 --in-interface -i [!] input name[+]\n\
         \t\t\t\tnetwork interface name ([+] for wildcard)\n\
         \x20 --jump\t-j target\n\
         \t\t\t\ttarget for rule\n\
         \x20 --numeric\t-n\t\tnumeric output of addresses and ports\n\
         \x20 --out-interface -o [!] output name[+]\n\
         \t\t\t\tnetwork interface name ([+] for wildcard)\n\
         \x20 --table\t-t table\ttable to manipulate (default: `filter')\n\
         \x20 --verbose\t-v\t\tverbose mode\n\
         \x20 --exact\t-x\t\texpand numbers (display exact values)\n\
         \x20 --line-numbers\t\tprint line numbers when listing\n\
         [!] --version\t-V\t\tprint package version.\n",
    );

    // Every extension gets to describe its own options.
    for target in ctx.registry.targets() {
        let _ = write!(out, "\n{}", target.help().replace("{version}", VERSION));
    }
    for m in ctx.registry.matches() {
        let _ = write!(out, "\n{}", m.help().replace("{version}", VERSION));
    }
    out
}
