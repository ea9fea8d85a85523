//! nf6 CLI — IPv6 packet filter administration.

use std::io::Write;

use tracing_subscriber::EnvFilter;

use nf6::address::LiteralResolver;
use nf6::proto::BuiltinProtos;
use nf6::{Context, EXIT_SUCCESS, report};
use nf6_ext::{DylibLoader, EXT_LIB_DIR};
use nf6_table::MemoryBackend;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("nf6=warn".parse().unwrap()))
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut ctx = match Context::new(
        Box::new(DylibLoader::new(EXT_LIB_DIR)),
        Box::new(LiteralResolver),
        Box::new(BuiltinProtos),
    ) {
        Ok(ctx) => ctx,
        Err(err) => {
            report(&err);
            std::process::exit(err.exit_code());
        }
    };

    let mut stdout = std::io::stdout().lock();
    let exit_code = match nf6::run(
        &args,
        &mut ctx,
        Box::new(MemoryBackend::new()),
        &mut stdout,
    ) {
        Ok(()) => EXIT_SUCCESS,
        Err(err) => {
            let _ = stdout.flush();
            report(&err);
            err.exit_code()
        }
    };
    std::process::exit(exit_code);
}
