//! Vortex - static analysis for the Vortex language
//!
//! Programs are parsed, validated, and then evaluated by an abstract
//! interpreter that reports what it can prove as diagnostic notes.

pub mod token;
pub mod lexer;
pub mod parser;
pub mod ast;
pub mod stack;
pub mod note;
pub mod scope;
pub mod error;
pub mod value;
pub mod operators;
pub mod methods;
pub mod walk;
pub mod validate;
pub mod analyzer;
pub mod package;
pub mod compiler;
pub mod console;

use std::sync::Once;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub use analyzer::Analyzer;
pub use compiler::{compile, CompileOptions, Compilation};
pub use error::{Result, VortexError};
pub use note::{Level, Note, Pos};
pub use package::{FsReader, MemoryReader, SourceReader};
pub use value::{Outcome, Value};

/// Canonical name of the single file compiled by `run`.
pub const MAIN_FILE: &str = "@/main.vx";

static TRACING: Once = Once::new();

/// Install the `RUST_LOG`-driven subscriber. Does nothing when `RUST_LOG`
/// is unset, or after the first call.
pub fn init_tracing() {
    if std::env::var_os("RUST_LOG").is_none() {
        return;
    }

    TRACING.call_once(|| {
        let _ = tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_target(true).with_level(true))
            .with(EnvFilter::from_default_env())
            .try_init();
    });
}

/// Convenience function to analyze a single-file program
pub fn run(source: &str) -> Result<Value> {
    run_with(source, &CompileOptions::default())
}

pub fn run_with(source: &str, options: &CompileOptions) -> Result<Value> {
    let reader = MemoryReader::new().with(MAIN_FILE, source);
    let compilation = compile(&[MAIN_FILE.to_string()], &reader, options);

    match compilation.outcome(MAIN_FILE) {
        Some(Outcome::Exception(ex)) => Err(VortexError::Uncaught(Box::new(
            ex.clone().into_note(Pos::file(MAIN_FILE)),
        ))),
        Some(Outcome::Value(value)) if !compilation.has_errors() => Ok(value.clone()),
        _ => Err(VortexError::Rejected(
            compilation.notes_at(Level::Error).cloned().collect(),
        )),
    }
}

/// Version of the Vortex analyzer
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
