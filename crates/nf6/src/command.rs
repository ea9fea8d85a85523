//! Command and option bookkeeping: bit sets, the command×option
//! compatibility matrix, and inversion rules.

use nf6_abi::{INV_DSTIP, INV_PROTO, INV_SRCIP, INV_VIA_IN, INV_VIA_OUT};

use crate::error::{Result, param};

pub const CMD_NONE: u16 = 0x0000;
pub const CMD_INSERT: u16 = 0x0001;
pub const CMD_DELETE: u16 = 0x0002;
pub const CMD_DELETE_NUM: u16 = 0x0004;
pub const CMD_REPLACE: u16 = 0x0008;
pub const CMD_APPEND: u16 = 0x0010;
pub const CMD_LIST: u16 = 0x0020;
pub const CMD_FLUSH: u16 = 0x0040;
pub const CMD_ZERO: u16 = 0x0080;
pub const CMD_NEW_CHAIN: u16 = 0x0100;
pub const CMD_DELETE_CHAIN: u16 = 0x0200;
pub const CMD_SET_POLICY: u16 = 0x0400;
pub const CMD_CHECK: u16 = 0x0800;
pub const CMD_RENAME_CHAIN: u16 = 0x1000;

const NUM_COMMANDS: usize = 13;
const CMD_CHARS: [char; NUM_COMMANDS] = [
    'I', 'D', 'D', 'R', 'A', 'L', 'F', 'Z', 'N', 'X', 'P', 'C', 'E',
];

/// Commands that modify rules and therefore need an assembled entry.
pub const CMD_RULE: u16 = CMD_APPEND | CMD_INSERT | CMD_DELETE | CMD_REPLACE | CMD_CHECK;

pub const OPT_NUMERIC: u16 = 0x0001;
pub const OPT_SOURCE: u16 = 0x0002;
pub const OPT_DESTINATION: u16 = 0x0004;
pub const OPT_PROTOCOL: u16 = 0x0008;
pub const OPT_JUMP: u16 = 0x0010;
pub const OPT_VERBOSE: u16 = 0x0020;
pub const OPT_EXPANDED: u16 = 0x0040;
pub const OPT_VIANAMEIN: u16 = 0x0080;
pub const OPT_VIANAMEOUT: u16 = 0x0100;
pub const OPT_LINENUMBERS: u16 = 0x0200;

const NUM_OPTIONS: usize = 10;
const OPT_LABELS: [&str; NUM_OPTIONS] = [
    "-n",
    "-s",
    "-d",
    "-p",
    "-j",
    "-v",
    "-x",
    "-i",
    "-o",
    "--line-numbers",
];

/// Invert bit each option may set; zero marks a non-invertible option.
const INVERSE_FOR_OPTIONS: [u8; NUM_OPTIONS] = [
    0,          // -n
    INV_SRCIP,  // -s
    INV_DSTIP,  // -d
    INV_PROTO,  // -p
    0,          // -j
    0,          // -v
    0,          // -x
    INV_VIA_IN, // -i
    INV_VIA_OUT, // -o
    0,          // --line-numbers
];

/// Legal combinations of commands and options. An option legal with any
/// of the given commands is legal overall (this matters for -L -Z only).
///
/// `+` compulsory, `x` illegal, space optional.
#[rustfmt::skip]
const COMMANDS_V_OPTIONS: [[char; NUM_OPTIONS]; NUM_COMMANDS] = [
    /*               -n   -s   -d   -p   -j   -v   -x   -i   -o  --line */
    /* INSERT */    ['x', ' ', ' ', ' ', ' ', ' ', 'x', ' ', ' ', 'x'],
    /* DELETE */    ['x', ' ', ' ', ' ', ' ', ' ', 'x', ' ', ' ', 'x'],
    /* DELETE_NUM */['x', 'x', 'x', 'x', 'x', ' ', 'x', 'x', 'x', 'x'],
    /* REPLACE */   ['x', ' ', ' ', ' ', ' ', ' ', 'x', ' ', ' ', 'x'],
    /* APPEND */    ['x', ' ', ' ', ' ', ' ', ' ', 'x', ' ', ' ', 'x'],
    /* LIST */      [' ', 'x', 'x', 'x', 'x', ' ', ' ', 'x', 'x', ' '],
    /* FLUSH */     ['x', 'x', 'x', 'x', 'x', ' ', 'x', 'x', 'x', 'x'],
    /* ZERO */      ['x', 'x', 'x', 'x', 'x', ' ', 'x', 'x', 'x', 'x'],
    /* NEW_CHAIN */ ['x', 'x', 'x', 'x', 'x', ' ', 'x', 'x', 'x', 'x'],
    /* DEL_CHAIN */ ['x', 'x', 'x', 'x', 'x', ' ', 'x', 'x', 'x', 'x'],
    /* SET_POLICY */['x', 'x', 'x', 'x', 'x', ' ', 'x', 'x', 'x', 'x'],
    /* CHECK */     ['x', '+', '+', '+', 'x', ' ', 'x', '+', '+', 'x'],
    /* RENAME */    ['x', 'x', 'x', 'x', 'x', ' ', 'x', 'x', 'x', 'x'],
];

/// Letter of the lowest command bit set.
#[must_use]
pub fn cmd_char(command: u16) -> char {
    let idx = command.trailing_zeros() as usize;
    CMD_CHARS.get(idx).copied().unwrap_or('?')
}

/// Accumulate a command letter.
///
/// A new command is accepted only when every already-present command is
/// in `othercmds`; `!` never applies to commands.
pub fn add_command(command: &mut u16, newcmd: u16, othercmds: u16, invert: bool) -> Result<()> {
    if invert {
        return Err(param("unexpected ! flag"));
    }
    if *command & !othercmds != 0 {
        return Err(param(format!(
            "Can't use -{} with -{}",
            cmd_char(newcmd),
            cmd_char(*command & !othercmds)
        )));
    }
    *command |= newcmd;
    Ok(())
}

/// Record an option bit, rejecting repeats and illegal inversion.
pub fn set_option(options: &mut u16, option: u16, invflags: &mut u8, invert: bool) -> Result<()> {
    let idx = option.trailing_zeros() as usize;
    if *options & option != 0 {
        return Err(param(format!(
            "multiple {} flags not allowed",
            OPT_LABELS[idx]
        )));
    }
    *options |= option;

    if invert {
        let bit = INVERSE_FOR_OPTIONS[idx];
        if bit == 0 {
            return Err(param(format!("cannot have ! before {}", OPT_LABELS[idx])));
        }
        *invflags |= bit;
    }
    Ok(())
}

/// Enforce the command×option matrix after argv is consumed.
pub fn check_options(command: u16, options: u16) -> Result<()> {
    for (i, label) in OPT_LABELS.iter().enumerate() {
        // -1 illegal, 1 legal, 0 undecided.
        let mut legal = 0i8;
        for (j, row) in COMMANDS_V_OPTIONS.iter().enumerate() {
            if command & (1u16 << j) == 0 {
                continue;
            }
            if options & (1u16 << i) == 0 {
                if row[i] == '+' {
                    return Err(param(format!(
                        "You need to supply the `{label}' option for this command"
                    )));
                }
            } else if row[i] == 'x' {
                if legal == 0 {
                    legal = -1;
                }
            } else {
                legal = 1;
            }
        }
        if legal == -1 {
            return Err(param(format!(
                "Illegal option `{label}' with this command"
            )));
        }
    }
    Ok(())
}
