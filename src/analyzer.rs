//! The analyzer
//!
//! Evaluates a package's modules to `Outcome`s. Evaluation is an abstract
//! interpretation: anything that cannot be determined becomes `Unknown`,
//! failures become located `Exception`s, and diagnostics collect per module.
//!
//! Function calls go through a trampoline. A call in tail position, the value
//! of a `return` or of an expression body, is handed back to the nearest
//! driving loop as a `Step::Call` instead of being made in place, so tail
//! recursion runs in constant native stack.
//!
//! Scope frames follow `walk` exactly: the validator has already checked
//! every name against that shape, so a failed lookup here is an internal
//! fault.

use std::collections::BTreeMap;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::{debug, instrument, trace};

use crate::ast::{
    AssignOp, BinaryOp, Block, Expr, ForControl, FuncBody, FuncExpr, Ident, Import, IncDecOp,
    Program, Stmt, SwitchCase, UnaryOp,
};
use crate::error::{Result, VortexError};
use crate::methods::{call_method, method_lookup, Method};
use crate::note::{Level, Note, Pos};
use crate::operators::{eval_vanilla_operator, same_type, typed_equal};
use crate::package::{resolve_import, Package, Target};
use crate::scope::Scope;
use crate::stack::ensure_sufficient_stack;
use crate::token::Span;
use crate::value::{Control, Exception, Func, FuncDef, Outcome, Value};

/// Unwrap a value, or return its exception from the enclosing function.
macro_rules! try_value {
    ($outcome:expr) => {
        match $outcome {
            Outcome::Value(value) => value,
            Outcome::Exception(ex) => return Ok(Outcome::Exception(ex).into()),
        }
    };
}

/// What a name is bound to at runtime.
#[derive(Debug, Clone)]
pub enum Binding {
    Value(Value),
    /// A hoisted function. It becomes a closure over the scope it is read
    /// from.
    FuncRef(Rc<FuncExpr>),
    /// An import statement, resolved when the name is first read.
    ImportRef(Rc<Import>),
}

/// One step of the trampoline.
pub(crate) enum Step {
    Done(Outcome),
    Call(Call),
}

/// A call whose callee and arguments are already evaluated and checked.
pub(crate) struct Call {
    func: Rc<Func>,
    args: Vec<Value>,
    /// Where bare exceptions raised by the callee are reported.
    pos: Pos,
}

impl From<Outcome> for Step {
    fn from(outcome: Outcome) -> Self {
        Step::Done(outcome)
    }
}

/// How a statement finished.
enum Completion {
    /// Fell through to the next statement.
    Normal,
    /// A return value or exception, ending the enclosing body.
    Return(Step),
    Control(Control),
}

impl From<Outcome> for Completion {
    fn from(outcome: Outcome) -> Self {
        Completion::Return(Step::Done(outcome))
    }
}

/// A step on the path to the part of a value being assigned.
#[derive(Debug, Clone)]
enum Access {
    Key(String),
    Index(f64),
    Unknown(Level),
}

impl Access {
    fn kind(&self) -> &'static str {
        match self {
            Access::Key(_) => "string",
            Access::Index(_) => "number",
            Access::Unknown(_) => "unknown",
        }
    }
}

#[derive(Debug)]
enum ModuleState {
    Ready(Rc<Program>),
    /// Could not be read.
    Missing,
    /// Did not parse or validate.
    Invalid,
}

#[derive(Debug)]
struct Module {
    state: ModuleState,
    /// Set once the module has run.
    outcome: Option<Outcome>,
    notes: Vec<Note>,
}

pub struct Analyzer {
    modules: FxHashMap<String, Module>,
    /// Modules currently running, outermost first.
    file_stack: Vec<String>,
    scope: Scope<Binding>,
    /// File of the code being evaluated.
    file: Rc<str>,
    steps: u64,
    step_limit: Option<u64>,
}

impl Analyzer {
    pub fn new(package: &Package, step_limit: Option<u64>) -> Self {
        let modules = package
            .modules()
            .map(|m| {
                let state = match (&m.program, &m.text) {
                    (Some(program), _) => ModuleState::Ready(program.clone()),
                    (None, Some(_)) => ModuleState::Invalid,
                    (None, None) => ModuleState::Missing,
                };
                let module = Module {
                    state,
                    outcome: None,
                    notes: Vec::new(),
                };
                (m.file.clone(), module)
            })
            .collect();

        Analyzer {
            modules,
            file_stack: Vec::new(),
            scope: Scope::new(),
            file: Rc::from(""),
            steps: 0,
            step_limit,
        }
    }

    /// Keep a module that failed validation from running.
    pub fn reject(&mut self, file: &str) {
        if let Some(module) = self.modules.get_mut(file) {
            module.state = ModuleState::Invalid;
        }
    }

    /// Whether `file` parsed, validated and can be run.
    pub fn is_runnable(&self, file: &str) -> bool {
        matches!(self.modules.get(file).map(|m| &m.state), Some(ModuleState::Ready(_)))
    }

    pub fn outcome(&self, file: &str) -> Option<&Outcome> {
        self.modules.get(file).and_then(|m| m.outcome.as_ref())
    }

    /// Notes the analyzer produced for `file`.
    pub fn notes(&self, file: &str) -> &[Note] {
        self.modules.get(file).map_or(&[], |m| m.notes.as_slice())
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn set_step_limit(&mut self, step_limit: Option<u64>) {
        self.step_limit = step_limit;
    }

    /// Start a fresh step budget.
    pub(crate) fn reset_steps(&mut self) {
        self.steps = 0;
    }

    /// Call a function value from outside the language, with a fresh step
    /// budget.
    pub fn call(&mut self, func: &Rc<Func>, args: Vec<Value>) -> Result<Outcome> {
        self.reset_steps();
        let pos = Pos::file("(call)");
        self.call_value(func, args, &pos)
    }

    /// Run a module, or return its memoized outcome.
    #[instrument(level = "debug", skip_all, fields(file = %file))]
    pub fn run_file(&mut self, file: &str) -> Result<Outcome> {
        let module = self
            .modules
            .get(file)
            .ok_or_else(|| VortexError::internal(format!("run of unknown module {}", file)))?;

        if let Some(outcome) = &module.outcome {
            debug!("memo hit");
            return Ok(outcome.clone());
        }

        let program = match &module.state {
            ModuleState::Ready(program) => program.clone(),
            _ => {
                return Err(VortexError::internal(format!(
                    "run of module {} which did not compile",
                    file
                )))
            }
        };

        self.file_stack.push(file.to_string());
        let saved_scope = std::mem::take(&mut self.scope);
        let saved_file = std::mem::replace(&mut self.file, Rc::from(file));

        let result = self.body(&program.body).and_then(|step| self.drive(step));

        self.scope = saved_scope;
        self.file = saved_file;
        self.file_stack.pop();

        let outcome = result?;
        let module = self
            .modules
            .get_mut(file)
            .ok_or_else(|| VortexError::internal(format!("module {} disappeared", file)))?;

        if let Outcome::Exception(ex) = &outcome {
            let mut note = ex.clone().into_note(Pos::file(file));
            note.message = format!("Threw exception: {}", note.message);
            note.add_tags(["analyzer"]);
            module.notes.push(note);
        }

        module.outcome = Some(outcome.clone());
        Ok(outcome)
    }

    fn pos(&self, span: Span) -> Pos {
        Pos::new(&*self.file, span)
    }

    /// An exception located at `span`.
    fn fail(&self, tags: &[&'static str], message: impl Into<String>, span: Span) -> Outcome {
        Outcome::Exception(Exception::new(tags, message).locate(self.pos(span)))
    }

    fn add_note(&mut self, mut note: Note) -> Result<()> {
        note.add_tags(["analyzer"]);
        let module = self
            .modules
            .get_mut(&*self.file)
            .ok_or_else(|| VortexError::internal("note for a file outside the package"))?;
        module.notes.push(note);
        Ok(())
    }

    /// Count one step. Past the limit every step fails.
    fn tick(&mut self) -> Option<Exception> {
        self.steps += 1;

        match self.step_limit {
            Some(limit) if self.steps > limit => {
                if self.steps == limit + 1 {
                    debug!(limit, "step limit reached");
                }
                Some(Exception::new(
                    &["step-limit"],
                    format!("Step limit reached: {}", limit),
                ))
            }
            _ => None,
        }
    }

    // ==================== Statements ====================

    /// A function or module body. It must end by returning.
    fn body(&mut self, block: &Block) -> Result<Step> {
        match self.block(block)? {
            Completion::Return(step) => Ok(step),
            Completion::Normal => Err(VortexError::internal(
                "body finished without returning a value",
            )),
            Completion::Control(_) => {
                Err(VortexError::internal("break or continue escaped its loop"))
            }
        }
    }

    fn block(&mut self, block: &Block) -> Result<Completion> {
        self.scope.push();
        let result = self.block_contents(block);
        self.scope.pop()?;
        result
    }

    fn block_contents(&mut self, block: &Block) -> Result<Completion> {
        for func in block.hoisted_functions() {
            if let Some(name) = &func.name {
                self.scope.add(name.clone(), Binding::FuncRef(func.clone()))?;
            }
        }

        for stmt in &block.stmts {
            if stmt.hoisted_function().is_some() {
                continue;
            }

            match self.stmt(stmt)? {
                Completion::Normal => {}
                other => return Ok(other),
            }
        }

        Ok(Completion::Normal)
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<Completion> {
        Ok(match self.exec(stmt)? {
            Completion::Return(Step::Done(Outcome::Exception(ex))) => {
                Outcome::Exception(ex.unwind(self.pos(stmt.span()))).into()
            }
            other => other,
        })
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<Completion> {
        match stmt {
            Stmt::Expr { expr, .. } => self.top_expression(expr),
            Stmt::Return { value, .. } => Ok(Completion::Return(self.tailable(value)?)),
            Stmt::Assert { expr, .. } => self.assert(expr),
            Stmt::Log { level, expr, span } => {
                let value = try_value!(self.expr(expr)?);
                let step = Note::new(
                    Pos::file(&*self.file),
                    Level::Info,
                    &["log", "step-count"],
                    format!("Logged at step {}", self.steps),
                );
                let note = Note::new(self.pos(*span), *level, &["log"], value.long_string())
                    .with_subnote(step);
                self.add_note(note)?;
                Ok(Completion::Normal)
            }
            Stmt::Break { .. } => Ok(Completion::Control(Control::Break)),
            Stmt::Continue { .. } => Ok(Completion::Control(Control::Continue)),
            Stmt::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => match try_value!(self.expr(condition)?) {
                Value::Bool(true) => self.block(then_branch),
                Value::Bool(false) => match else_branch {
                    Some(block) => self.block(block),
                    None => Ok(Completion::Normal),
                },
                other => Ok(self
                    .fail(
                        &["type-error", "non-bool-condition", "if-condition"],
                        format!("Type error: Non-bool condition: {}", other.method_type_name()),
                        condition.span(),
                    )
                    .into()),
            },
            Stmt::For { control, body, span } => {
                self.scope.push();
                let result = self.for_loop(control.as_ref(), body, *span);
                self.scope.pop()?;
                result
            }
            Stmt::Import { import, .. } => {
                self.scope
                    .add(import.name.clone(), Binding::ImportRef(import.clone()))?;
                Ok(Completion::Normal)
            }
        }
    }

    /// An expression in statement position. Mutations are only allowed here.
    fn top_expression(&mut self, expr: &Expr) -> Result<Completion> {
        match expr {
            Expr::Assign {
                target,
                op,
                value,
                span,
            } => {
                let value = match op {
                    AssignOp::Create | AssignOp::Set => try_value!(self.expr(value)?),
                    AssignOp::Compound(bin) => {
                        let current = try_value!(self.expr(target)?);
                        let right = try_value!(self.expr(value)?);
                        match eval_vanilla_operator(*bin, &current, &right)? {
                            Outcome::Value(value) => value,
                            Outcome::Exception(ex) => {
                                return Ok(Outcome::Exception(ex.locate(self.pos(*span))).into())
                            }
                        }
                    }
                };
                self.assign(target, *op == AssignOp::Create, value)
            }
            Expr::IncDec { target, op, span } => {
                let next = match try_value!(self.expr(target)?) {
                    Value::Number(n) => Value::Number(match op {
                        IncDecOp::Inc => n + 1.0,
                        IncDecOp::Dec => n - 1.0,
                    }),
                    unknown @ Value::Unknown(_) => unknown,
                    other => {
                        return Ok(self
                            .fail(
                                &["type-error", "inc-dec"],
                                format!("Type error: {}{}", other.method_type_name(), op.symbol()),
                                *span,
                            )
                            .into())
                    }
                };
                self.assign(target, false, next)
            }
            // Named function statements are hoisted. An anonymous one does
            // nothing.
            Expr::Func(_) => Ok(Completion::Normal),
            other => {
                try_value!(self.expr(other)?);
                Ok(Completion::Normal)
            }
        }
    }

    fn assert(&mut self, expr: &Expr) -> Result<Completion> {
        let (outcome, description) = match expr {
            Expr::Binary { left, op, right, span } => {
                self.asserted_binary(left, *op, right, *span)?
            }
            other => {
                let outcome = self.expr(other)?;
                let description = outcome.to_string();
                (outcome, description)
            }
        };

        match try_value!(outcome) {
            Value::Bool(true) | Value::Unknown(_) => Ok(Completion::Normal),
            Value::Bool(false) => Ok(self
                .fail(&["assert-false"], format!("Asserted {}", description), expr.span())
                .into()),
            other => {
                let note = Note::new(
                    self.pos(expr.span()),
                    Level::Error,
                    &["type-error", "assert-non-bool"],
                    format!("Type error: assert {}", other.method_type_name()),
                );
                self.add_note(note)?;
                Ok(Completion::Normal)
            }
        }
    }

    /// A binary assertion, evaluated once. Returns the outcome and a
    /// description built from the operand values, e.g. `(3 == 4)`.
    fn asserted_binary(
        &mut self,
        left: &Expr,
        op: BinaryOp,
        right: &Expr,
        span: Span,
    ) -> Result<(Outcome, String)> {
        if let Some(ex) = self.tick() {
            return Ok((Outcome::Exception(ex.locate(self.pos(span))), String::new()));
        }

        let left = match self.expr(left)? {
            Outcome::Value(value) => value,
            ex => return Ok((ex, String::new())),
        };

        if let (BinaryOp::And | BinaryOp::Or, Value::Bool(b)) = (op, &left) {
            if *b == (op == BinaryOp::Or) {
                return Ok((Value::Bool(*b).into(), format!("({} {} ...)", left, op)));
            }
        }

        let right = match self.expr(right)? {
            Outcome::Value(value) => value,
            ex => return Ok((ex, String::new())),
        };

        let description = format!("({} {} {})", left, op, right);
        let outcome = match eval_vanilla_operator(op, &left, &right)? {
            Outcome::Exception(ex) => Outcome::Exception(ex.locate(self.pos(span))),
            value => value,
        };
        Ok((outcome, description))
    }

    /// The loop itself. The caller has opened the loop's frame.
    fn for_loop(
        &mut self,
        control: Option<&ForControl>,
        body: &Block,
        span: Span,
    ) -> Result<Completion> {
        let mut range = None;

        match control {
            Some(ForControl::Classic { setup, .. }) => {
                if let done @ Completion::Return(_) = self.top_expression(setup)? {
                    return Ok(done);
                }
            }
            Some(ForControl::Range { source, .. }) => match try_value!(self.expr(source)?) {
                Value::Array(items) => range = Some(items),
                other => {
                    return Ok(self
                        .fail(
                            &["type-error", "for-control"],
                            format!("Type error: for (_ of {}) {{}}", other.method_type_name()),
                            source.span(),
                        )
                        .into())
                }
            },
            _ => {}
        }

        let condition = match control {
            Some(ForControl::Condition(condition))
            | Some(ForControl::Classic { condition, .. }) => {
                Some(condition)
            }
            _ => None,
        };

        let mut iteration = 0;

        loop {
            if let Some(ex) = self.tick() {
                return Ok(Outcome::Exception(ex.locate(self.pos(span))).into());
            }

            if let Some(condition) = condition {
                match try_value!(self.expr(condition)?) {
                    Value::Bool(true) => {}
                    Value::Bool(false) => break,
                    other => {
                        return Ok(self
                            .fail(
                                &["type-error", "non-bool-condition", "for-condition"],
                                format!(
                                    "Type error: Non-bool condition: {}",
                                    other.method_type_name()
                                ),
                                condition.span(),
                            )
                            .into())
                    }
                }
            }

            let completion = match (&range, control) {
                (Some(items), Some(ForControl::Range { target, .. })) => {
                    let Some(item) = items.get(iteration) else {
                        break;
                    };

                    self.scope.push();
                    let completion = match self.create_or_assign(target, true, item.clone())? {
                        Some(ex) => Completion::from(Outcome::Exception(ex)),
                        None => self.block_contents(body)?,
                    };
                    self.scope.pop()?;
                    completion
                }
                _ => self.block(body)?,
            };

            iteration += 1;

            match completion {
                Completion::Normal | Completion::Control(Control::Continue) => {
                    if let Some(ForControl::Classic { next, .. }) = control {
                        if let done @ Completion::Return(_) = self.top_expression(next)? {
                            return Ok(done);
                        }
                    }
                }
                Completion::Control(Control::Break) => break,
                done @ Completion::Return(_) => return Ok(done),
            }
        }

        Ok(Completion::Normal)
    }

    // ==================== Assignment ====================

    fn assign(&mut self, target: &Expr, create: bool, value: Value) -> Result<Completion> {
        Ok(match self.create_or_assign(target, create, value)? {
            Some(ex) => Outcome::Exception(ex).into(),
            None => Completion::Normal,
        })
    }

    /// Bind `value` to a target: a name, an access chain, or a destructuring
    /// pattern. `create` is `:=`, which must introduce new names and keys.
    fn create_or_assign(
        &mut self,
        target: &Expr,
        create: bool,
        value: Value,
    ) -> Result<Option<Exception>> {
        match target {
            Expr::Array { items, span } => {
                let values = match &value {
                    Value::Array(values) => values.clone(),
                    other => return Ok(Some(self.destructure_mismatch("Array", other, *span))),
                };

                let checked =
                    self.check_destructurable("Array", &value, items.len(), values.len(), *span);
                if let Some(ex) = checked {
                    return Ok(Some(ex));
                }

                for (item, value) in items.iter().zip(values.iter()) {
                    if let Some(ex) = self.create_or_assign(item, create, value.clone())? {
                        return Ok(Some(ex));
                    }
                }

                Ok(None)
            }
            Expr::Object { entries, span } => {
                let values = match &value {
                    Value::Object(values) => values.clone(),
                    other => return Ok(Some(self.destructure_mismatch("Object", other, *span))),
                };

                let checked =
                    self.check_destructurable("Object", &value, entries.len(), values.len(), *span);
                if let Some(ex) = checked {
                    return Ok(Some(ex));
                }

                for (key, item) in entries {
                    let Some(value) = values.get(&key.name) else {
                        return Ok(Some(
                            Exception::new(
                                &["type-error", "destructuring-mismatch", "key-not-found"],
                                format!(
                                    "Key {} from object destructuring expression not found \
                                     in the object on the right",
                                    key.name
                                ),
                            )
                            .locate(self.pos(key.span)),
                        ));
                    };

                    if let Some(ex) = self.create_or_assign(item, create, value.clone())? {
                        return Ok(Some(ex));
                    }
                }

                Ok(None)
            }
            _ => self.assign_chain(target, create, value),
        }
    }

    fn destructure_mismatch(&self, pattern: &str, value: &Value, span: Span) -> Exception {
        Exception::new(
            &["type-error", "destructuring-mismatch"],
            format!(
                "Assignment target is an {} but the value is a(n) {}",
                pattern,
                value.method_type_name()
            ),
        )
        .locate(self.pos(span))
    }

    fn check_destructurable(
        &self,
        pattern: &str,
        value: &Value,
        targets: usize,
        values: usize,
        span: Span,
    ) -> Option<Exception> {
        if !value.is_concrete() {
            return Some(
                Exception::new(
                    &["type-error", "destructuring-mismatch"],
                    format!("Assignment target is an {} but the value is not fully known", pattern),
                )
                .locate(self.pos(span)),
            );
        }

        if targets != values {
            return Some(
                Exception::new(
                    &["type-error", "destructuring-mismatch", "length-mismatch"],
                    format!(
                        "Destructuring length mismatch: {} targets but {} values",
                        targets, values
                    ),
                )
                .locate(self.pos(span)),
            );
        }

        None
    }

    /// Assign through `a`, `a.b`, `a[i].c` and so on. The root variable is
    /// rebound to a rebuilt value.
    fn assign_chain(
        &mut self,
        target: &Expr,
        create: bool,
        value: Value,
    ) -> Result<Option<Exception>> {
        let mut chain = Vec::new();
        let mut base = target;

        let root = loop {
            match base {
                Expr::Ident(ident) => break ident,
                Expr::Member { object, name, .. } => {
                    chain.push(Access::Key(name.name.clone()));
                    base = object;
                }
                Expr::Subscript { object, index, .. } => {
                    let access = match self.expr(index)? {
                        Outcome::Exception(ex) => return Ok(Some(ex)),
                        Outcome::Value(Value::String(key)) => Access::Key(key),
                        Outcome::Value(Value::Number(n)) => Access::Index(n),
                        Outcome::Value(Value::Unknown(level)) => Access::Unknown(level),
                        Outcome::Value(other) => {
                            return Ok(Some(
                                Exception::new(
                                    &["type-error", "subscript"],
                                    format!("Type error: {} subscript", other.method_type_name()),
                                )
                                .locate(self.pos(index.span())),
                            ))
                        }
                    };
                    chain.push(access);
                    base = object;
                }
                other => {
                    return Err(VortexError::internal(format!(
                        "invalid assignment target reached the analyzer: {} expression",
                        other.kind_name()
                    )))
                }
            }
        };
        chain.reverse();

        if chain.is_empty() {
            if create {
                self.scope.add(root.clone(), Binding::Value(value))?;
            } else {
                self.scope.set(&root.name, |binding| *binding = Binding::Value(value))?;
            }
            return Ok(None);
        }

        let existing = match self.lookup(root)? {
            Outcome::Value(existing) => existing,
            Outcome::Exception(ex) => return Ok(Some(ex)),
        };

        match modify_chain(existing, &chain, value, create) {
            Ok(updated) => {
                self.scope.set(&root.name, |binding| *binding = Binding::Value(updated))?;
                Ok(None)
            }
            Err(ex) => Ok(Some(ex.locate(self.pos(target.span())))),
        }
    }

    // ==================== Expressions ====================

    /// Evaluate an expression. Exceptions come back located at it.
    fn expr(&mut self, expr: &Expr) -> Result<Outcome> {
        if let Some(ex) = self.tick() {
            return Ok(Outcome::Exception(ex.locate(self.pos(expr.span()))));
        }

        let out = ensure_sufficient_stack(|| self.eval(expr))?;

        Ok(match out {
            Outcome::Exception(ex) => Outcome::Exception(ex.locate(self.pos(expr.span()))),
            value => value,
        })
    }

    fn eval(&mut self, expr: &Expr) -> Result<Outcome> {
        let value = match expr {
            Expr::Number { value, .. } => Value::Number(*value),
            Expr::String { value, .. } => Value::String(value.clone()),
            Expr::Bool { value, .. } => Value::Bool(*value),
            Expr::Null { .. } => Value::Null,
            Expr::Ident(ident) => return self.lookup(ident),
            Expr::Binary { left, op, right, .. } => return self.binary(left, *op, right),
            Expr::Unary { op, operand, .. } => {
                let operand = try_value!(self.expr(operand)?);
                return Ok(unary(*op, operand));
            }
            Expr::Call { callee, args, span } => {
                let step = self.call_expr(callee, args, *span)?;
                return self.drive(step);
            }
            Expr::Member { object, name, .. } => {
                let object = try_value!(self.expr(object)?);
                return Ok(subscript(&object, &Value::string(name.name.as_str())));
            }
            Expr::Subscript { object, index, .. } => {
                let object = try_value!(self.expr(object)?);
                let index = try_value!(self.expr(index)?);
                return Ok(subscript(&object, &index));
            }
            Expr::MethodLookup { base, name, .. } => {
                let base = try_value!(self.expr(base)?);
                return Ok(method_lookup(base, &name.name));
            }
            Expr::Func(func) => self.closure(func, self.scope.clone()),
            Expr::Array { items, .. } => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(try_value!(self.expr(item)?));
                }
                Value::array(values)
            }
            Expr::Object { entries, .. } => {
                let mut values = BTreeMap::new();
                for (key, item) in entries {
                    let value = try_value!(self.expr(item)?);
                    values.insert(key.name.clone(), value);
                }
                Value::object(values)
            }
            Expr::Switch { subject, cases, .. } => return self.switch(subject.as_deref(), cases),
            Expr::Import(import) => return self.retrieve_import(import),
            Expr::Operator { op, .. } => Value::Func(Rc::new(Func::new(FuncDef::Operator(*op)))),
            Expr::Assign { .. } | Expr::IncDec { .. } => {
                return Err(VortexError::internal(format!(
                    "mutation in a subexpression at {}",
                    self.pos(expr.span())
                )))
            }
        };

        Ok(Outcome::Value(value))
    }

    fn lookup(&mut self, ident: &Ident) -> Result<Outcome> {
        let binding = self
            .scope
            .get_with_distance(&ident.name)
            .map(|(entry, distance)| (entry.data.clone(), distance));

        match binding {
            Some((Binding::Value(value), _)) => Ok(value.into()),
            // A hoisted function closes over the block that declares it.
            Some((Binding::FuncRef(func), distance)) => {
                Ok(self.closure(&func, self.scope.outer(distance)).into())
            }
            Some((Binding::ImportRef(import), _)) => self.retrieve_import(&import),
            None => Err(VortexError::internal(format!(
                "variable {} does not exist at {}",
                ident.name,
                self.pos(ident.span)
            ))),
        }
    }

    fn closure(&self, func: &Rc<FuncExpr>, scope: Scope<Binding>) -> Value {
        Value::Func(Rc::new(Func::new(FuncDef::Plain {
            expr: func.clone(),
            scope,
            file: self.file.clone(),
        })))
    }

    fn binary(&mut self, left: &Expr, op: BinaryOp, right: &Expr) -> Result<Outcome> {
        let left = try_value!(self.expr(left)?);

        if let (BinaryOp::And | BinaryOp::Or, Value::Bool(b)) = (op, &left) {
            if *b == (op == BinaryOp::Or) {
                return Ok(Value::Bool(*b).into());
            }
        }

        let right = try_value!(self.expr(right)?);
        eval_vanilla_operator(op, &left, &right)
    }

    fn switch(&mut self, subject: Option<&Expr>, cases: &[SwitchCase]) -> Result<Outcome> {
        let subject = match subject {
            Some(expr) => {
                let value = try_value!(self.expr(expr)?);
                // Comparison needs concrete values.
                if !value.is_concrete() {
                    return Ok(Value::Unknown(value.unknown_level().unwrap_or(Level::Warn)).into());
                }
                Some(value)
            }
            None => None,
        };

        for case in cases {
            let label = try_value!(self.expr(&case.test)?);

            if let Value::Unknown(level) = label {
                return Ok(Value::Unknown(level).into());
            }

            let matched = match &subject {
                Some(subject) => {
                    if !label.is_concrete() {
                        let level = label.unknown_level().unwrap_or(Level::Warn);
                        return Ok(Value::Unknown(level).into());
                    }
                    if !same_type(subject, &label) {
                        continue;
                    }
                    typed_equal(subject, &label)?
                }
                None => label.clone().into(),
            };

            match matched {
                Outcome::Value(Value::Bool(true)) => return self.expr(&case.value),
                Outcome::Value(Value::Bool(false)) => {}
                _ => {
                    return Ok(self.fail(
                        &["type-error", "non-bool-switch-case"],
                        format!(
                            "Switch case was type {{{}}} instead of {{bool}}",
                            label.type_name()
                        ),
                        case.test.span(),
                    ))
                }
            }
        }

        Ok(Outcome::exception(
            &["incomplete-switch"],
            "Switch did not handle every possibility",
        ))
    }

    // ==================== Calls ====================

    /// A `return` value or expression body: calls are left to the caller's
    /// trampoline.
    fn tailable(&mut self, expr: &Expr) -> Result<Step> {
        match expr {
            Expr::Call { callee, args, span } => {
                if let Some(ex) = self.tick() {
                    return Ok(Outcome::Exception(ex.locate(self.pos(*span))).into());
                }
                self.call_expr(callee, args, *span)
            }
            _ => Ok(Step::Done(self.expr(expr)?)),
        }
    }

    /// Evaluate callee and arguments, check them, and suspend the call.
    fn call_expr(&mut self, callee: &Expr, args: &[Expr], span: Span) -> Result<Step> {
        let callee_value = try_value!(self.expr(callee)?);

        let func = match &callee_value {
            Value::Func(func) => Some(func.clone()),
            Value::Unknown(_) => None,
            other => {
                return Ok(self
                    .fail(
                        &["type-error", "call-non-function"],
                        format!(
                            "Type error: attempt to call a {} as a function",
                            other.method_type_name()
                        ),
                        callee.span(),
                    )
                    .into())
            }
        };

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(try_value!(self.expr(arg)?));
        }

        let Some(func) = func else {
            return Ok(Step::Done(callee_value.into()));
        };

        if func.arg_length() != values.len() {
            let ex = arity_mismatch(&func, values.len());
            return Ok(Outcome::Exception(ex.locate(self.pos(span))).into());
        }

        Ok(Step::Call(Call {
            func,
            args: values,
            pos: self.pos(span),
        }))
    }

    /// Run the trampoline until it produces an outcome.
    fn drive(&mut self, mut step: Step) -> Result<Outcome> {
        loop {
            let call = match step {
                Step::Done(outcome) => return Ok(outcome),
                Step::Call(call) => call,
            };

            trace!(func = %call.func, args = call.args.len(), "trampoline step");

            if let Some(ex) = self.tick() {
                return Ok(Outcome::Exception(ex.locate(call.pos)));
            }

            let pos = call.pos.clone();
            step = match self.step_call(call)? {
                Step::Done(Outcome::Exception(ex)) => {
                    Step::Done(Outcome::Exception(ex.locate(pos)))
                }
                other => other,
            };
        }
    }

    /// Call a function value with arguments that still need checking.
    fn call_value(&mut self, func: &Rc<Func>, args: Vec<Value>, pos: &Pos) -> Result<Outcome> {
        if func.arg_length() != args.len() {
            return Ok(Outcome::Exception(arity_mismatch(func, args.len()).locate(pos.clone())));
        }

        self.drive(Step::Call(Call {
            func: func.clone(),
            args,
            pos: pos.clone(),
        }))
    }

    /// Make one call. A plain function may hand back another suspended call.
    fn step_call(&mut self, call: Call) -> Result<Step> {
        let Call { func, args, pos } = call;

        let mut all = func.binds.clone();
        all.extend(args);

        match &func.def {
            FuncDef::Plain { expr, scope, file } => {
                let saved_scope = std::mem::replace(&mut self.scope, scope.clone());
                let saved_file = std::mem::replace(&mut self.file, file.clone());

                let result = self.enter(&func, expr, all);

                self.scope = saved_scope;
                self.file = saved_file;
                result
            }
            FuncDef::Method { base, method } if method.is_reentrant() => {
                Ok(Step::Done(self.reentrant_method(base, *method, all, &pos)?))
            }
            FuncDef::Method { base, method } => Ok(Step::Done(call_method(base, *method, &all)?)),
            FuncDef::Operator(op) => match all.as_slice() {
                [left, right] => Ok(Step::Done(eval_vanilla_operator(*op, left, right)?)),
                _ => Err(VortexError::internal(format!(
                    "operator {} called with {} arguments",
                    op,
                    all.len()
                ))),
            },
        }
    }

    /// Bind parameters in the closure scope and evaluate the body.
    fn enter(&mut self, func: &Rc<Func>, expr: &Rc<FuncExpr>, args: Vec<Value>) -> Result<Step> {
        self.scope.push();

        // Hoisted functions can already see their own name.
        if let Some(name) = &expr.name {
            if self.scope.get(&name.name).is_none() {
                let unbound = Value::Func(Rc::new(Func::new(func.def.clone())));
                self.scope.add(name.clone(), Binding::Value(unbound))?;
            }
        }

        for (param, arg) in expr.params.iter().zip(args) {
            if let Some(ex) = self.create_or_assign(param, true, arg)? {
                return Ok(Outcome::Exception(ex).into());
            }
        }

        match &expr.body {
            FuncBody::Expr(body) => self.tailable(body),
            FuncBody::Block(block) => self.body(block),
        }
    }

    /// `map`, `filter`, `reduce` and `reduceFrom`, which call back into
    /// user functions.
    fn reentrant_method(
        &mut self,
        base: &Value,
        method: Method,
        args: Vec<Value>,
        pos: &Pos,
    ) -> Result<Outcome> {
        let Value::Array(items) = base else {
            return Err(VortexError::internal(format!(
                "{} on a {}",
                method.name(),
                base.method_type_name()
            )));
        };

        let mut args = args.into_iter();

        match method {
            Method::Map => {
                let f = match callback(args.next())? {
                    Ok(f) => f,
                    Err(out) => return Ok(out),
                };
                let with_index = f.arg_length() == 2;

                let mut mapped = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let args = element_args(item, i, with_index);
                    mapped.push(try_value!(self.call_value(&f, args, pos)?));
                }
                Ok(Value::array(mapped).into())
            }
            Method::Filter => {
                let f = match callback(args.next())? {
                    Ok(f) => f,
                    Err(out) => return Ok(out),
                };
                let with_index = f.arg_length() == 2;

                let mut kept = Vec::new();
                let mut unknown: Option<Level> = None;

                for (i, item) in items.iter().enumerate() {
                    match try_value!(self.call_value(&f, element_args(item, i, with_index), pos)?) {
                        Value::Bool(true) => kept.push(item.clone()),
                        Value::Bool(false) => {}
                        Value::Unknown(level) => unknown = unknown.max(Some(level)),
                        other => {
                            return Ok(Outcome::exception(
                                &["type-error", "filter-non-bool"],
                                format!(
                                    "Type error: filter function returned {} instead of Bool",
                                    other.method_type_name()
                                ),
                            ))
                        }
                    }
                }

                Ok(unknown.map_or_else(|| Value::array(kept), Value::Unknown).into())
            }
            Method::Reduce => {
                let f = match callback(args.next())? {
                    Ok(f) => f,
                    Err(out) => return Ok(out),
                };

                let mut iter = items.iter();
                let Some(first) = iter.next() else {
                    return Err(VortexError::internal("reduce of an empty array"));
                };

                let mut acc = first.clone();
                for item in iter {
                    acc = try_value!(self.call_value(&f, vec![acc, item.clone()], pos)?);
                }
                Ok(acc.into())
            }
            Method::ReduceFrom => {
                let mut acc = args
                    .next()
                    .ok_or_else(|| VortexError::internal("reduceFrom without an initial value"))?;
                let f = match callback(args.next())? {
                    Ok(f) => f,
                    Err(out) => return Ok(out),
                };

                for item in items.iter() {
                    acc = try_value!(self.call_value(&f, vec![acc, item.clone()], pos)?);
                }
                Ok(acc.into())
            }
            other => Err(VortexError::internal(format!(
                "{} is not a reentrant method",
                other.name()
            ))),
        }
    }

    // ==================== Imports ====================

    fn retrieve_import(&mut self, import: &Import) -> Result<Outcome> {
        let path = match resolve_import(&self.file, import) {
            Ok(Target::Local(path)) => path,
            Ok(Target::Remote { package, .. }) => {
                return Ok(self.fail(
                    &["not-implemented"],
                    format!("Not implemented: external packages ({})", package),
                    import.span,
                ))
            }
            Err(note) => {
                return Ok(self.fail(
                    &["import", "invalid-import-source"],
                    note.message,
                    import.span,
                ))
            }
        };

        debug!(from = %self.file, to = %path, "resolving import");

        let Some(module) = self.modules.get(&path) else {
            return Ok(self.fail(
                &["import", "not-found"],
                format!("Import not found: {}", path),
                import.span,
            ));
        };

        if let Some(outcome) = &module.outcome {
            debug!(file = %path, "import memo hit");
            return Ok(outcome.clone());
        }

        match module.state {
            ModuleState::Ready(_) => {}
            ModuleState::Missing => {
                return Ok(self.fail(
                    &["import", "not-found"],
                    format!("Import not found: {}", path),
                    import.span,
                ))
            }
            ModuleState::Invalid => {
                return Ok(self.fail(
                    &["import", "invalid-module"],
                    format!("Imported module {} failed to compile", path),
                    import.span,
                ))
            }
        }

        if self.file_stack.contains(&path) {
            let description = describe_loop(&self.file_stack, &path);
            debug!(cycle = %description, "import loop");

            let note = Note::new(
                self.pos(import.span),
                Level::Error,
                &["import-loop", "infinite-loop"],
                format!("Import loop detected: {}", description),
            );
            self.add_note(note)?;

            return Ok(Value::Unknown(Level::Error).into());
        }

        self.run_file(&path)
    }
}

fn arity_mismatch(func: &Func, provided: usize) -> Exception {
    Exception::new(
        &["type-error", "arguments-length-mismatch"],
        format!(
            "Arguments length mismatch: {} requires {} arguments but {} were provided",
            func,
            func.arg_length(),
            provided
        ),
    )
}

/// The function argument of a reentrant method.
fn callback(arg: Option<Value>) -> Result<std::result::Result<Rc<Func>, Outcome>> {
    match arg {
        Some(Value::Func(f)) => Ok(Ok(f)),
        Some(other) => Ok(Err(Outcome::exception(
            &["type-error", "call-non-function"],
            format!(
                "Type error: attempt to call a {} as a function",
                other.method_type_name()
            ),
        ))),
        None => Err(VortexError::internal("method called without its function argument")),
    }
}

fn element_args(item: &Value, index: usize, with_index: bool) -> Vec<Value> {
    if with_index {
        vec![item.clone(), Value::Number(index as f64)]
    } else {
        vec![item.clone()]
    }
}

fn unary(op: UnaryOp, operand: Value) -> Outcome {
    match (op, operand) {
        (_, unknown @ Value::Unknown(_)) => unknown.into(),
        (UnaryOp::Neg, Value::Number(n)) => Value::Number(-n).into(),
        (UnaryOp::Plus, Value::Number(n)) => Value::Number(n).into(),
        (UnaryOp::Not, Value::Bool(b)) => Value::Bool(!b).into(),
        (UnaryOp::Not, other) => Outcome::exception(
            &["type-error", "unary-not"],
            format!("Type error: !{}", other.method_type_name()),
        ),
        (op, other) => Outcome::exception(
            &["type-error", "unary-plus-minus"],
            format!("Type error: {}{}", op.symbol(), other.method_type_name()),
        ),
    }
}

/// `container[index]`, also used for `container.name`.
fn subscript(container: &Value, index: &Value) -> Outcome {
    match (container, index) {
        (Value::Unknown(level), _) | (_, Value::Unknown(level)) => Value::Unknown(*level).into(),
        (Value::Array(items), Value::Number(n)) => {
            if *n < 0.0 || n.fract() != 0.0 {
                return Outcome::exception(
                    &["subscript", "out-of-bounds", "index-bad"],
                    format!("Invalid array index: {}", index),
                );
            }

            match items.get(*n as usize) {
                Some(item) => item.clone().into(),
                None => Outcome::exception(
                    &["out-of-bounds", "index-too-large"],
                    format!(
                        "Out of bounds: index {} but array is only length {}",
                        index,
                        items.len()
                    ),
                ),
            }
        }
        (Value::Array(_), other) => Outcome::exception(
            &["type-error", "subscript"],
            format!("Type error: Array[{}]", other.method_type_name()),
        ),
        (Value::Object(entries), Value::String(key)) => match entries.get(key) {
            Some(value) => value.clone().into(),
            None => {
                Outcome::exception(&["key-not-found"], format!("Object key not found: {}", key))
            }
        },
        (Value::Object(_), other) => Outcome::exception(
            &["type-error", "object-subscript"],
            format!("Type error: Object[{}]", other.method_type_name()),
        ),
        (other, index) => Outcome::exception(
            &["type-error", "subscript"],
            format!(
                "Type error: {}[{}]",
                other.method_type_name(),
                index.method_type_name()
            ),
        ),
    }
}

/// `old` with the part at `chain` replaced by `new`.
fn modify_chain(
    old: Value,
    chain: &[Access],
    new: Value,
    create: bool,
) -> std::result::Result<Value, Exception> {
    let Some((access, rest)) = chain.split_first() else {
        return Ok(new);
    };
    let last = rest.is_empty();

    if let Access::Unknown(level) = access {
        return Ok(Value::Unknown(*level));
    }

    match old {
        Value::Unknown(level) => Ok(Value::Unknown(level)),
        Value::Object(mut entries) => {
            let Access::Key(key) = access else {
                return Err(index_type_error("Object", access));
            };

            let existing = entries.get(key).cloned();
            match (&existing, last && create) {
                (Some(_), true) => {
                    return Err(Exception::new(
                        &["duplicate", "duplicate-key"],
                        format!("Trying to add key {} that already exists", key),
                    ))
                }
                (None, false) => {
                    return Err(Exception::new(
                        &["key-not-found"],
                        format!("Key not found: {}", key),
                    ))
                }
                _ => {}
            }

            let updated = modify_chain(existing.unwrap_or(Value::Null), rest, new, create)?;
            Rc::make_mut(&mut entries).insert(key.clone(), updated);
            Ok(Value::Object(entries))
        }
        Value::Array(mut items) => {
            let &Access::Index(index) = access else {
                return Err(index_type_error("Array", access));
            };

            if index < 0.0 || index.fract() != 0.0 {
                return Err(Exception::new(
                    &["out-of-bounds", "index-bad"],
                    format!("Invalid index: {}", Value::Number(index)),
                ));
            }

            let i = index as usize;
            if i >= items.len() {
                return Err(Exception::new(
                    &["out-of-bounds", "index-too-large"],
                    format!(
                        "Out of bounds: index {} but array is only length {}",
                        i,
                        items.len()
                    ),
                ));
            }

            if last && create {
                return Err(Exception::new(
                    &["duplicate", "duplicate-index"],
                    format!(
                        "Attempt to add duplicate index {} to array (the creation operator := \
                         never works with an array subscript on the left)",
                        i
                    ),
                ));
            }

            let updated = modify_chain(items[i].clone(), rest, new, create)?;
            Rc::make_mut(&mut items)[i] = updated;
            Ok(Value::Array(items))
        }
        other => Err(index_type_error(other.method_type_name(), access)),
    }
}

fn index_type_error(container: &str, access: &Access) -> Exception {
    Exception::new(
        &["type-error", "index-bad"],
        format!("Type error: attempt to index {} with a {}", container, access.kind()),
    )
}

/// `@/(main.vx -> [a.vx] -> b.vx -> [a.vx])`: the files of the loop with
/// their common directory pulled out and the repeated file bracketed.
fn describe_loop(stack: &[String], repeated: &str) -> String {
    let mut files: Vec<&str> = stack.iter().map(String::as_str).collect();
    files.push(repeated);

    let prefix = files
        .iter()
        .map(|f| dirname(f))
        .reduce(common_prefix)
        .unwrap_or_default();

    let joined = files
        .iter()
        .map(|f| {
            let short = &f[prefix.len()..];
            if *f == repeated {
                format!("[{}]", short)
            } else {
                short.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" -> ");

    if prefix.is_empty() {
        joined
    } else {
        format!("{}({})", prefix, joined)
    }
}

/// Directory part of a path, with its trailing `/`.
fn dirname(file: &str) -> &str {
    file.rfind('/').map_or("", |i| &file[..=i])
}

fn common_prefix<'a>(a: &'a str, b: &'a str) -> &'a str {
    let len = a
        .char_indices()
        .zip(b.chars())
        .take_while(|((_, x), y)| x == y)
        .last()
        .map_or(0, |((i, c), _)| i + c.len_utf8());
    &a[..len]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::MemoryReader;
    use pretty_assertions::assert_eq;

    fn analyzer(files: &[(&str, &str)], step_limit: Option<u64>) -> Analyzer {
        let mut reader = MemoryReader::new();
        for (file, text) in files {
            reader.insert(*file, *text);
        }
        let package = Package::collect(&[files[0].0.to_string()], &reader);
        Analyzer::new(&package, step_limit)
    }

    fn eval(source: &str) -> Outcome {
        let mut az = analyzer(&[("@/main.vx", source)], Some(1_000_000));
        az.run_file("@/main.vx").unwrap()
    }

    fn value(source: &str) -> String {
        match eval(source) {
            Outcome::Value(value) => value.to_string(),
            Outcome::Exception(ex) => panic!("unexpected exception: {}", ex.message()),
        }
    }

    fn exception(source: &str) -> Exception {
        match eval(source) {
            Outcome::Exception(ex) => ex,
            Outcome::Value(value) => panic!("expected exception, got {}", value),
        }
    }

    #[test]
    fn test_arithmetic_and_precedence() {
        assert_eq!(value("return 1 + 2 * 3 ** 2;"), "19");
        assert_eq!(value("x := 2; x += 3; x++; return x;"), "6");
        assert_eq!(value("return 'a' ++ 'b';"), "'ab'");
    }

    #[test]
    fn test_value_semantics() {
        assert_eq!(
            value("x := [5, 6, 7]; y := x; y[1] *= 10; return [x, y];"),
            "[[5, 6, 7], [5, 60, 7]]"
        );
        assert_eq!(
            value("a := {b: {c: 1}}; z := a; z.b.c = 2; return [a.b.c, z.b.c];"),
            "[1, 2]"
        );
    }

    #[test]
    fn test_hoisting() {
        assert_eq!(
            value("x := doublePlus1(10); func doublePlus1(y) => 2 * y + 1; return x;"),
            "21"
        );
    }

    #[test]
    fn test_closures_capture_definition_scope() {
        let source = "
            func adder(n) {
                return func(x) => x + n;
            }
            add2 := adder(2);
            return add2(40);
        ";
        assert_eq!(value(source), "42");
    }

    #[test]
    fn test_function_expression_sees_its_own_name() {
        let source =
            "fact := func f(n) => switch { (n <= 1) => 1; true => n * f(n - 1); }; return fact(5);";
        assert_eq!(value(source), "120");
    }

    #[test]
    fn test_tail_recursion_is_stack_safe() {
        let source = "
            func count(n, acc) {
                if (n == 0) {
                    return acc;
                }
                return count(n - 1, acc + 1);
            }
            return count(200000, 0);
        ";
        let mut az = analyzer(&[("@/main.vx", source)], None);
        assert_eq!(az.run_file("@/main.vx").unwrap(), Outcome::Value(Value::Number(200000.0)));
    }

    #[test]
    fn test_step_limit() {
        let mut az = analyzer(&[("@/main.vx", "x := 0; for { x++; } return x;")], Some(500));
        let ex = match az.run_file("@/main.vx").unwrap() {
            Outcome::Exception(ex) => ex,
            other => panic!("expected exception, got {}", other),
        };
        assert!(ex.has_tag("step-limit"));
        assert_eq!(ex.message(), "Step limit reached: 500");
    }

    #[test]
    fn test_loops() {
        assert_eq!(
            value(
                "sum := 0; for (i := 0; i < 5; i++) { if (i == 2) { continue; } sum += i; } \
                 return sum;"
            ),
            "8"
        );
        assert_eq!(value("n := 0; for { n++; if (n == 7) { break; } } return n;"), "7");
        assert_eq!(value("n := 0; for (n < 3) { n++; } return n;"), "3");
        assert_eq!(
            value("xs := [1, 2, 3]; t := 0; for (x of xs) { xs = []; t += x; } return t;"),
            "6"
        );
        assert_eq!(
            value("t := ''; for ([k, v] of {a: 1, b: 2}:Entries()) { t ++= k; } return t;"),
            "'ab'"
        );
        assert_eq!(value("for { return 'done'; }"), "'done'");
    }

    #[test]
    fn test_destructuring() {
        assert_eq!(
            value("[a, {b, c: d}] := [1, {b: 2, c: 3}]; return a + b + d;"),
            "6"
        );
        assert_eq!(value("a := 1; b := 2; [a, b] = [b, a]; return [a, b];"), "[2, 1]");

        let ex = exception("[a, b] := [1]; return a;");
        assert!(ex.has_tag("length-mismatch"));
        assert!(exception("{z} := {a: 1}; return z;").has_tag("key-not-found"));
        assert!(exception("[a] := {a: 1}; return a;").has_tag("destructuring-mismatch"));
    }

    #[test]
    fn test_chain_assignment_errors() {
        assert_eq!(
            exception("x := [1]; x[3] = 2; return x;").message(),
            "Out of bounds: index 3 but array is only length 1"
        );
        assert!(exception("x := {a: 1}; x.a := 2; return x;").has_tag("duplicate-key"));
        assert!(exception("x := [1]; x[0] := 2; return x;").has_tag("duplicate-index"));
        assert!(exception("x := {}; x.a = 2; return x;").has_tag("key-not-found"));
        assert_eq!(value("x := {}; x.a := 2; return x;"), "{a: 2}");
    }

    #[test]
    fn test_subscript_errors() {
        assert_eq!(exception("return [1, 2][-1];").message(), "Invalid array index: -1");
        assert_eq!(exception("return [1, 2]['a'];").message(), "Type error: Array[String]");
        assert_eq!(exception("return {a: 1}.b;").message(), "Object key not found: b");
        assert_eq!(exception("return {a: 1}[0];").message(), "Type error: Object[Number]");
    }

    #[test]
    fn test_switch() {
        assert_eq!(value("return switch (2) { 1 => 'a'; 2 => 'b'; };"), "'b'");
        assert_eq!(value("return switch ('x') { 1 => 'a'; 'x' => 'b'; };"), "'b'");
        assert_eq!(
            value("x := 5; return switch { (x < 3) => 'low'; (x >= 3) => 'high'; };"),
            "'high'"
        );

        let ex = exception("return switch (3) { 1 => 'a'; };");
        assert!(ex.has_tag("incomplete-switch"));
        assert_eq!(
            exception("return switch { 1 => 'a'; };").message(),
            "Switch case was type {number} instead of {bool}"
        );
    }

    #[test]
    fn test_calls() {
        assert_eq!(
            exception("f := func(a, b) => a; return f(1);").message(),
            "Arguments length mismatch: <func (anonymous)> requires 2 arguments but 1 were provided"
        );
        assert_eq!(
            exception("x := 3; return x(1);").message(),
            "Type error: attempt to call a Number as a function"
        );
        assert_eq!(value("f := func(a, b) => a - b; g := f:bind(10); return g(3);"), "7");
        assert_eq!(value("add := (+); return add(1, 2);"), "3");
    }

    #[test]
    fn test_reentrant_methods() {
        assert_eq!(value("return [1, 2, 3]:map(func(x) => x * 2);"), "[2, 4, 6]");
        assert_eq!(value("return [5, 6]:map(func(x, i) => i);"), "[0, 1]");
        assert_eq!(value("return [1, 2, 3, 4]:filter(func(x) => x % 2 == 0);"), "[2, 4]");
        assert_eq!(value("return [1, 2, 3]:reduce(+);"), "6");
        assert_eq!(
            value("return [1, 2, 3]:reduceFrom('', func(acc, x) => acc ++ x:String());"),
            "'123'"
        );
        assert!(exception("return [1]:map(3);").has_tag("call-non-function"));
        assert!(exception("return [1]:filter(func(x) => x);").has_tag("filter-non-bool"));
    }

    #[test]
    fn test_short_circuit() {
        assert_eq!(value("return false && [][0];"), "false");
        assert_eq!(value("return true || [][0];"), "true");
        assert!(exception("return true && [][0];").has_tag("out-of-bounds"));
    }

    #[test]
    fn test_assert() {
        let ex = exception("x := 3; assert x == 4; return x;");
        assert_eq!(ex.message(), "Asserted (3 == 4)");
        assert!(ex.has_tag("assert-false"));

        let mut az = analyzer(&[("@/main.vx", "assert 1; return 2;")], None);
        assert_eq!(az.run_file("@/main.vx").unwrap(), Outcome::Value(Value::Number(2.0)));
        assert!(az.notes("@/main.vx")[0].has_tag("assert-non-bool"));
    }

    #[test]
    fn test_failed_assert_evaluates_operands_once() {
        let source =
            "func f() {\n  log.info 'called';\n  return 2;\n}\nassert f() == 1;\nreturn 0;";
        let mut az = analyzer(&[("@/main.vx", source)], None);
        let Outcome::Exception(ex) = az.run_file("@/main.vx").unwrap() else {
            panic!("expected the assert to fail");
        };
        assert_eq!(ex.message(), "Asserted (2 == 1)");

        let logged: Vec<_> = az
            .notes("@/main.vx")
            .iter()
            .filter(|n| n.has_tag("log"))
            .map(|n| n.message.as_str())
            .collect();
        assert_eq!(logged, vec!["'called'"]);

        assert_eq!(
            exception("assert false && [][0]; return 0;").message(),
            "Asserted (false && ...)"
        );
    }

    #[test]
    fn test_log_records_note() {
        let mut az = analyzer(&[("@/main.vx", "log.warn [1, 2]; return 1;")], None);
        az.run_file("@/main.vx").unwrap();
        let note = &az.notes("@/main.vx")[0];
        assert_eq!(note.level, Level::Warn);
        assert_eq!(note.message, "[1, 2]");
        assert!(note.subnotes[0].message.starts_with("Logged at step "));
    }

    #[test]
    fn test_exception_traces_once_per_line() {
        let ex = exception("if (true) { if (true) { if (true) { return [1][3]; } } }\nreturn 0;");
        let Exception::Located(note) = ex else {
            panic!("exception was never located");
        };
        assert_eq!(note.pos.line(), Some(1));
        assert_eq!(note.subnotes.iter().filter(|n| n.pos.line() == Some(1)).count(), 1);
    }

    #[test]
    fn test_exception_unwinds_through_callers() {
        let ex = exception("func f() {\n  return [][0];\n}\nx := f();\nreturn x;");
        let Exception::Located(note) = ex else {
            panic!("exception was never located");
        };
        assert_eq!(note.pos.line(), Some(2));
        let lines: Vec<_> = note.subnotes.iter().filter_map(|n| n.pos.line()).collect();
        assert_eq!(lines, vec![2, 4]);
    }

    #[test]
    fn test_imports_memoize_and_detect_loops() {
        let mut az = analyzer(
            &[
                ("@/main.vx", "import a; import b; return [a, b];"),
                ("@/a.vx", "import b; return b + 1;"),
                ("@/b.vx", "return 10;"),
            ],
            None,
        );
        assert_eq!(az.run_file("@/main.vx").unwrap().to_string(), "[11, 10]");

        let mut az = analyzer(
            &[
                ("@/main.vx", "import a; return a;"),
                ("@/a.vx", "import main; return main;"),
            ],
            None,
        );
        assert_eq!(az.run_file("@/main.vx").unwrap(), Outcome::Value(Value::Unknown(Level::Error)));
        let note = &az.notes("@/a.vx")[0];
        assert!(note.has_tag("import-loop"));
        assert_eq!(note.message, "Import loop detected: @/([main.vx] -> a.vx -> [main.vx])");
    }

    #[test]
    fn test_import_failures_point_at_the_import() {
        let mut az = analyzer(&[("@/main.vx", "import lib;\nx := 1;\nreturn [x, lib];")], None);
        let Outcome::Exception(Exception::Located(note)) = az.run_file("@/main.vx").unwrap() else {
            panic!("expected a located exception");
        };
        assert_eq!(note.message, "Import not found: @/lib.vx");
        assert_eq!(note.pos.line(), Some(1));
    }

    #[test]
    fn test_describe_loop() {
        let stack = vec![
            "@/main.vx".to_string(),
            "@/lib/a.vx".to_string(),
            "@/lib/b.vx".to_string(),
        ];
        assert_eq!(
            describe_loop(&stack, "@/lib/a.vx"),
            "@/(main.vx -> [lib/a.vx] -> lib/b.vx -> [lib/a.vx])"
        );
        let stack = vec!["@/lib/a.vx".to_string(), "@/lib/b.vx".to_string()];
        assert_eq!(describe_loop(&stack, "@/lib/a.vx"), "@/lib/([a.vx] -> b.vx -> [a.vx])");
    }

    #[test]
    fn test_call_entry_point() {
        let mut az = analyzer(&[("@/main.vx", "return func(a, b) => a * b;")], None);
        let Outcome::Value(Value::Func(f)) = az.run_file("@/main.vx").unwrap() else {
            panic!("expected a function");
        };
        let out = az.call(&f, vec![Value::Number(6.0), Value::Number(7.0)]).unwrap();
        assert_eq!(out, Outcome::Value(Value::Number(42.0)));
        assert!(az.call(&f, vec![]).unwrap().is_exception());
    }
}
