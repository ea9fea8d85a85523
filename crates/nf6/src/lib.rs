//! nf6 — administration tool for the kernel IPv6 packet filter.
//!
//! Translates an administrator's textual rule specification into the
//! kernel's fixed-layout binary rule and issues commands against the
//! table of rule chains. The compiler walks argv once over a grammar
//! composed at runtime from the loaded extensions; the dispatcher plays
//! the parsed command against a buffered table handle that commits
//! atomically.

pub mod address;
pub mod command;
mod compiler;
mod dispatch;
mod error;
mod help;
pub mod iface;
pub mod listing;
pub mod proto;

pub use compiler::{Compiled, Context, Invocation, compile};
pub use error::{EXIT_FAILURE, EXIT_PARAMETER, EXIT_SUCCESS, Error, Result, report};

use std::io::Write;

use nf6_table::{KernelBackend, TableHandle};

/// Program name used in messages and error prefixes.
pub const PROGRAM_NAME: &str = "nf6";

/// Host version string, shared with extensions.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Compile argv and execute it against a table over `backend`.
///
/// `-h`/`-V` print to `out` without touching the table. For everything
/// else the handle is acquired only after validation, mutated by the
/// dispatcher, and committed when every per-pair operation succeeded.
pub fn run(
    args: &[String],
    ctx: &mut Context,
    backend: Box<dyn KernelBackend>,
    out: &mut dyn Write,
) -> Result<()> {
    match compile(args, ctx)? {
        Compiled::Message(message) => {
            writeln!(out, "{message}")?;
            Ok(())
        }
        Compiled::Run(mut inv) => {
            let mut handle = TableHandle::init(&inv.table, backend)
                .map_err(|e| Error::Version(e.to_string()))?;
            dispatch::execute(&mut inv, ctx, &mut handle, out)?;
            handle.commit()?;
            Ok(())
        }
    }
}
