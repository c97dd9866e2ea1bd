//! Console app harness
//!
//! A console app is a module whose outcome is `{reduce, render}`. The
//! harness keeps a state, feeds it actions through `reduce`, and shows what
//! `render` makes of each new state. The first action is a random number,
//! and every later action is a line of user input.

use std::rc::Rc;

use rand::Rng;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::analyzer::Analyzer;
use crate::error::{Result, VortexError};
use crate::note::{Note, Pos};
use crate::value::{Func, Outcome, Value};

/// Where the harness shows output and reads actions.
pub trait ConsoleIo {
    fn display(&mut self, text: &str) -> Result<()>;

    /// The next action, or `None` when the user is done.
    fn input(&mut self) -> Result<Option<String>>;
}

/// Terminal I/O through rustyline.
pub struct TerminalIo {
    editor: DefaultEditor,
}

impl TerminalIo {
    pub fn new() -> Result<Self> {
        let editor = DefaultEditor::new().map_err(|e| VortexError::Console(e.to_string()))?;
        Ok(TerminalIo { editor })
    }
}

impl ConsoleIo for TerminalIo {
    fn display(&mut self, text: &str) -> Result<()> {
        println!("{}", text);
        Ok(())
    }

    fn input(&mut self) -> Result<Option<String>> {
        match self.editor.readline("> ") {
            Ok(line) => {
                let _ = self.editor.add_history_entry(line.as_str());
                Ok(Some(line))
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => Ok(None),
            Err(err) => Err(VortexError::Console(err.to_string())),
        }
    }
}

/// How a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// Input ran out.
    Closed,
    /// `reduce` or `render` threw.
    Threw(Note),
}

/// A random first action.
pub fn random_action() -> Value {
    Value::Number(rand::thread_rng().gen::<f64>())
}

pub fn run_console_app(
    analyzer: &mut Analyzer,
    app: &Value,
    first_action: Value,
    io: &mut dyn ConsoleIo,
) -> Result<SessionEnd> {
    let Value::Object(entries) = app else {
        return Err(VortexError::Console(format!(
            "app is a(n) {} instead of an Object",
            app.method_type_name()
        )));
    };

    let reduce = app_func(entries, "reduce")?;
    let render = app_func(entries, "render")?;

    let mut state = Value::Null;
    let mut action = first_action;

    loop {
        if !state.is_concrete() {
            return Err(VortexError::Console(format!(
                "state is not fully known: {}",
                state
            )));
        }

        state = match analyzer.call(&reduce, vec![state, action])? {
            Outcome::Value(next @ Value::Object(_)) => next,
            Outcome::Value(other) => {
                return Err(VortexError::Console(format!(
                    "reduce returned a(n) {} instead of an Object",
                    other.method_type_name()
                )))
            }
            Outcome::Exception(ex) => {
                return Ok(SessionEnd::Threw(ex.into_note(Pos::file("(reduce)"))))
            }
        };

        match analyzer.call(&render, vec![state.clone()])? {
            Outcome::Value(Value::String(text)) => io.display(&text)?,
            Outcome::Value(other) => {
                return Err(VortexError::Console(format!(
                    "render returned a(n) {} instead of a String",
                    other.method_type_name()
                )))
            }
            Outcome::Exception(ex) => {
                return Ok(SessionEnd::Threw(ex.into_note(Pos::file("(render)"))))
            }
        }

        match io.input()? {
            Some(line) => action = Value::String(line),
            None => return Ok(SessionEnd::Closed),
        }
    }
}

fn app_func(entries: &std::collections::BTreeMap<String, Value>, key: &str) -> Result<Rc<Func>> {
    match entries.get(key) {
        Some(Value::Func(func)) => Ok(func.clone()),
        Some(other) => Err(VortexError::Console(format!(
            "{} is a(n) {} instead of a Func",
            key,
            other.method_type_name()
        ))),
        None => Err(VortexError::Console(format!("Missing key {} in app", key))),
    }
}
