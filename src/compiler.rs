//! Compile session
//!
//! Collects a package, validates every file, then analyzes the entry files.
//! Internal faults are turned into notes so that one bad file does not stop
//! the rest of the batch.

use std::time::Instant;

use tracing::{instrument, warn};

use crate::analyzer::Analyzer;
use crate::error::VortexError;
use crate::note::{has_errors, Level, Note, Pos};
use crate::package::{Package, SourceReader};
use crate::validate::validate;
use crate::value::{Func, Outcome, Value};

/// Pseudo file for notes about the session itself.
const COMPILER_FILE: &str = "(compiler)";

#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Evaluation steps allowed per entry file. `None` is unlimited.
    pub step_limit: Option<u64>,
}

/// The result of a compile: every note, and the analyzer holding each
/// module's outcome.
pub struct Compilation {
    pub package: Package,
    pub analyzer: Analyzer,
    pub notes: Vec<Note>,
}

impl Compilation {
    pub fn outcome(&self, file: &str) -> Option<&Outcome> {
        self.analyzer.outcome(file)
    }

    pub fn has_errors(&self) -> bool {
        has_errors(&self.notes)
    }

    /// Top-level notes at `level` or above.
    pub fn notes_at(&self, level: Level) -> impl Iterator<Item = &Note> {
        self.notes.iter().filter(move |n| n.level >= level)
    }

    /// Text of a module, for rendering excerpts.
    pub fn source(&self, file: &str) -> Option<&str> {
        self.package.module(file).and_then(|m| m.text.as_deref())
    }

    /// Notes rendered for a terminal, with source excerpts.
    pub fn render_notes(&self, level: Level) -> String {
        self.notes_at(level)
            .map(|note| note.render(self.source(&note.pos.file)))
            .collect()
    }

    /// Call a function value produced by this compilation.
    pub fn call(
        &mut self,
        func: &std::rc::Rc<Func>,
        args: Vec<Value>,
    ) -> crate::error::Result<Outcome> {
        self.analyzer.call(func, args)
    }
}

#[instrument(level = "debug", skip_all, fields(entries = ?entries))]
pub fn compile(
    entries: &[String],
    reader: &dyn SourceReader,
    options: &CompileOptions,
) -> Compilation {
    let start = Instant::now();

    let package = Package::collect(entries, reader);
    let mut analyzer = Analyzer::new(&package, options.step_limit);
    let mut notes = Vec::new();

    for module in package.modules() {
        notes.extend(module.notes.iter().cloned());

        let Some(program) = &module.program else {
            continue;
        };

        match validate(program, &module.file) {
            Ok(found) => {
                if has_errors(&found) {
                    analyzer.reject(&module.file);
                }
                notes.extend(found);
            }
            Err(err) => {
                warn!(file = %module.file, error = %err, "validator fault");
                analyzer.reject(&module.file);
                notes.push(internal_note(&module.file, &err));
            }
        }
    }

    for entry in &package.entries {
        if !analyzer.is_runnable(entry) {
            continue;
        }

        analyzer.reset_steps();
        if let Err(err) = analyzer.run_file(entry) {
            warn!(file = %entry, error = %err, "analyzer fault");
            notes.push(internal_note(entry, &err));
        }
    }

    let files = package.modules().count();
    for module in package.modules() {
        notes.extend(analyzer.notes(&module.file).iter().cloned());
    }

    notes.push(Note::new(
        Pos::file(COMPILER_FILE),
        Level::Info,
        &["statistics", "compile-time"],
        format!(
            "Compiled {} file(s) in {:.3}ms",
            files,
            start.elapsed().as_secs_f64() * 1000.0
        ),
    ));

    Compilation {
        package,
        analyzer,
        notes,
    }
}

fn internal_note(file: &str, err: &VortexError) -> Note {
    let detail = match err {
        VortexError::Internal(message) => message.clone(),
        other => other.to_string(),
    };

    Note::new(
        Pos::file(file),
        Level::Error,
        &["internal"],
        format!("Internal error (please report): {}", detail),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::MemoryReader;
    use pretty_assertions::assert_eq;

    fn compile_files(files: &[(&str, &str)]) -> Compilation {
        let mut reader = MemoryReader::new();
        for (file, text) in files {
            reader.insert(*file, *text);
        }
        compile(
            &[files[0].0.to_string()],
            &reader,
            &CompileOptions {
                step_limit: Some(100_000),
            },
        )
    }

    fn tags_of(compilation: &Compilation, level: Level) -> Vec<Vec<&'static str>> {
        compilation
            .notes_at(level)
            .filter(|n| !n.has_tag("statistics"))
            .map(|n| n.tags.iter().copied().collect())
            .collect()
    }

    #[test]
    fn test_clean_compile_has_outcome_and_statistics() {
        let c = compile_files(&[("@/main.vx", "return 1 + 1;")]);
        assert!(!c.has_errors());
        assert_eq!(c.outcome("@/main.vx").map(|o| o.to_string()), Some("2".to_string()));

        let stats = c.notes.last().unwrap();
        assert!(stats.has_tag("compile-time"));
        assert!(stats.message.starts_with("Compiled 1 file(s) in "));
    }

    #[test]
    fn test_validation_errors_block_evaluation() {
        let c = compile_files(&[("@/main.vx", "return y;")]);
        assert!(c.has_errors());
        assert!(c.outcome("@/main.vx").is_none());
        assert!(c.notes.iter().any(|n| n.has_tag("not-found")));
    }

    #[test]
    fn test_invalid_import_is_an_exception() {
        let c = compile_files(&[
            ("@/main.vx", "import lib; return lib;"),
            ("@/lib.vx", "return x;"),
        ]);
        let Some(Outcome::Exception(ex)) = c.outcome("@/main.vx") else {
            panic!("expected an exception");
        };
        assert!(ex.has_tag("invalid-module"));
    }

    #[test]
    fn test_module_exception_becomes_note() {
        let c = compile_files(&[("@/main.vx", "x := [1];\nreturn x[4];")]);
        let note = c
            .notes
            .iter()
            .find(|n| n.message.starts_with("Threw exception: "))
            .unwrap();
        assert_eq!(note.level, Level::Error);
        assert_eq!(note.pos.line(), Some(2));
        assert!(note.has_tag("analyzer"));
    }

    #[test]
    fn test_syntax_error_note() {
        let c = compile_files(&[("@/main.vx", "return (1;")]);
        assert_eq!(tags_of(&c, Level::Error).len(), 1);
        assert!(c.notes[0].has_tag("syntax-error"));
    }

    #[test]
    fn test_each_entry_has_its_own_step_budget() {
        let source = "total := 0;\nfor (i := 0; i < 30; i++) {\n  total += i;\n}\nreturn total;";
        let mut reader = MemoryReader::new();
        reader.insert("@/a.vx", source);
        reader.insert("@/b.vx", source);

        let alone = compile(&["@/b.vx".to_string()], &reader, &CompileOptions { step_limit: None });
        let needed = alone.analyzer.steps();
        assert_eq!(alone.outcome("@/b.vx").map(|o| o.to_string()), Some("435".to_string()));

        let options = CompileOptions {
            step_limit: Some(needed + 10),
        };
        let c = compile(&["@/a.vx".to_string(), "@/b.vx".to_string()], &reader, &options);
        assert_eq!(c.outcome("@/a.vx").map(|o| o.to_string()), Some("435".to_string()));
        assert_eq!(c.outcome("@/b.vx").map(|o| o.to_string()), Some("435".to_string()));
    }

    #[test]
    fn test_function_equality_is_an_internal_note() {
        let c = compile_files(&[("@/main.vx", "f := func() => 1;\nreturn f == f;")]);
        let note = c.notes.iter().find(|n| n.has_tag("internal")).unwrap();
        assert_eq!(
            note.message,
            "Internal error (please report): equality of functions is not defined"
        );
        assert!(c.outcome("@/main.vx").is_none());
    }

    #[test]
    fn test_internal_note_message() {
        let note = internal_note("@/main.vx", &VortexError::internal("lost track"));
        assert_eq!(note.message, "Internal error (please report): lost track");
        assert!(note.has_tag("internal"));
    }
}
