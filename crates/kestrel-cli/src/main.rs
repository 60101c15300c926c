//! Bounded model checker CLI.
//!
//! Provides the `kestrel` binary. The `check` subcommand loads a
//! JSON-serialized IR function, runs the bounded model checking pipeline
//! against the bundled propagation solver, prints the verdict (and the
//! counterexample trace on failure), and exits with:
//!
//! - `0`: safe within the bound
//! - `1`: unsafe, a counterexample was produced
//! - `2`: unknown or solver timeout
//! - `3`: internal error (bad input, unsupported instruction)

use std::fs;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use kestrel_bmc::{
    BmcError, BmcOptions, BoundedModelChecker, HavocMemoryModel, IntRepresentation,
    PropagationSolverFactory, SafetyResult,
};
use kestrel_core::Context;
use kestrel_ir::Function;

/// Bounded software model checker.
#[derive(Parser)]
#[command(name = "kestrel", about = "Bounded software model checker")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Check a function for reachable error calls up to a bound.
    Check {
        /// Path to the JSON-serialized IR function.
        program: PathBuf,

        /// Loop-unwinding depth.
        #[arg(short, long, default_value_t = 10)]
        bound: u32,

        /// Do not eliminate temporary variables.
        #[arg(long)]
        no_elim_vars: bool,

        /// Assume that floating-point operations never return NaN.
        #[arg(long)]
        assume_no_nan: bool,

        /// Use mathematical integers instead of bit-vectors.
        #[arg(long)]
        use_math_int: bool,

        /// Dump the encoded program formula to stderr.
        #[arg(long)]
        dump_formula: bool,

        /// Dump the formula in the solver's format to stderr.
        #[arg(long)]
        dump_solver_formula: bool,

        /// Dump the solver's satisfying model to stderr.
        #[arg(long)]
        dump_model: bool,
    },
}

fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Check {
            program,
            bound,
            no_elim_vars,
            assume_no_nan,
            use_math_int,
            dump_formula,
            dump_solver_formula,
            dump_model,
        } => {
            let options = BmcOptions {
                bound,
                no_elim_vars,
                assume_no_nan,
                int_representation: if use_math_int {
                    IntRepresentation::MathInt
                } else {
                    IntRepresentation::BitVector
                },
                dump_formula,
                dump_solver_formula,
                dump_model,
            };
            process::exit(run_check(&program, options));
        }
    }
}

/// Execute the check subcommand.
///
/// Returns exit code: 0 = safe within bound, 1 = counterexample found,
/// 2 = unknown/timeout, 3 = internal error.
fn run_check(program: &PathBuf, options: BmcOptions) -> i32 {
    let text = match fs::read_to_string(program) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("Error: failed to read '{}': {}", program.display(), e);
            return 3;
        }
    };
    let function: Function = match serde_json::from_str(&text) {
        Ok(function) => function,
        Err(e) => {
            eprintln!("Error: failed to parse '{}': {}", program.display(), e);
            return 3;
        }
    };

    let mut ctx = Context::new();
    let factory = PropagationSolverFactory;
    let checker = BoundedModelChecker::new(options, &factory);

    match checker.run(&mut ctx, &function, Box::new(HavocMemoryModel)) {
        Ok(SafetyResult::Success) => {
            println!("Verification SUCCESSFUL: no error location is reachable within the bound.");
            0
        }
        Ok(SafetyResult::Fail { error_code, trace }) => {
            println!("Verification FAILED (error code {}).", error_code);
            println!("Counterexample:");
            print!("{}", trace);
            1
        }
        Err(BmcError::Solver(e)) => {
            eprintln!("Verification INCONCLUSIVE: {}", e);
            2
        }
        Err(BmcError::Cancelled) => {
            eprintln!("Verification cancelled.");
            2
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            3
        }
    }
}
