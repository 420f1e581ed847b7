//! rmtest - compile a Redis test module and run its suite.
//!
//! Builds the module with `make`, starts a disposable server with the module
//! loaded, and runs `TM.RUNTESTS <filter>` against it. The process exits with
//! an error unless the suite reports zero failures.

mod runner;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "rmtest")]
#[command(about = "Compile a Redis test module and run its tests")]
struct Args {
    /// C module source
    #[arg(short = 'i', long, default_value = "testmodule.c")]
    source: PathBuf,

    /// Module shared object to build and load
    #[arg(short, long, env = "TESTMODULE_SO", default_value = "__testmodule.so")]
    module: PathBuf,

    /// Filter expression for tests (trailing `*` matches a prefix)
    #[arg(short, long, default_value = "*")]
    filter: String,

    /// Don't compile the module, just run the tests
    #[arg(short = 'N', long)]
    no_compile: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Extra prerequisites passed through to the module build rule
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    build_inputs: Vec<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let options = runner::SuiteOptions {
        source: args.source,
        module: args.module,
        filter: args.filter,
        compile: !args.no_compile,
        build_inputs: args.build_inputs,
    };

    runner::run_suite(&options)?;
    info!("All module tests passed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["rmtest"]).unwrap();
        assert_eq!(args.source, PathBuf::from("testmodule.c"));
        assert_eq!(args.filter, "*");
        assert!(!args.no_compile);
        assert!(args.build_inputs.is_empty());
        if std::env::var_os("TESTMODULE_SO").is_none() {
            assert_eq!(args.module, PathBuf::from("__testmodule.so"));
        }
    }

    #[test]
    fn test_short_flags_and_trailing_inputs() {
        let args = Args::try_parse_from([
            "rmtest", "-i", "mod.c", "-m", "mod.so", "-f", "string.*", "-N", "librmutil.a",
        ])
        .unwrap();
        assert_eq!(args.source, PathBuf::from("mod.c"));
        assert_eq!(args.module, PathBuf::from("mod.so"));
        assert_eq!(args.filter, "string.*");
        assert!(args.no_compile);
        assert_eq!(args.build_inputs, vec!["librmutil.a".to_string()]);
    }
}
