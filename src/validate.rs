//! Validation pass
//!
//! Runs on one file before it is analyzed. Any error note here keeps the
//! file from being evaluated. Two passes:
//!
//! - structural checks on bodies, statements and expressions;
//! - scope checks, driven by the shared walker in `walk`, which also work
//!   out function closures and reject calls of hoisted functions that would
//!   see an incomplete closure.

use std::rc::Rc;

use rustc_hash::FxHashSet;
use tracing::debug;

use crate::ast::{AssignOp, Block, Expr, ForControl, FuncBody, FuncExpr, Ident, Program, Stmt};
use crate::error::Result;
use crate::note::{format_location, Level, Note, Pos};
use crate::scope::Scope;
use crate::token::Span;
use crate::walk::{walk_func, walk_program, Creation, ScopeVisitor};

/// Validate a parsed file. `Err` means the validator itself is broken.
pub fn validate(program: &Program, file: &str) -> Result<Vec<Note>> {
    let mut structure = StructureCheck {
        file,
        notes: Vec::new(),
        loop_depth: 0,
    };
    structure.body(&program.body);
    structure.block(&program.body);

    let mut scopes = ScopeCheck::new(file);
    walk_program(&mut scopes, program)?;

    let mut notes = structure.notes;
    notes.extend(scopes.notes);

    debug!(file, notes = notes.len(), "validated");
    Ok(notes)
}

// ==================== Structure ====================

struct StructureCheck<'f> {
    file: &'f str,
    notes: Vec<Note>,
    loop_depth: usize,
}

impl StructureCheck<'_> {
    fn note(
        &mut self,
        span: Span,
        level: Level,
        tags: &[&'static str],
        message: impl Into<String>,
    ) {
        let mut note = Note::new(Pos::new(self.file, span), level, tags, message);
        note.add_tags(["validation"]);
        self.notes.push(note);
    }

    /// Module top level and block-bodied functions must end by returning.
    fn body(&mut self, block: &Block) {
        match block.stmts.last() {
            None => self.note(
                block.span,
                Level::Error,
                &["control-flow", "return-failure", "empty-body"],
                "Empty body",
            ),
            Some(last) => self.will_return(last),
        }
    }

    fn will_return(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Return { .. } => {}
            Stmt::If {
                then_branch,
                else_branch: Some(else_branch),
                ..
            } => {
                self.body(then_branch);
                self.body(else_branch);
            }
            Stmt::For {
                control, body, span, ..
            } => {
                if !has_return(body) {
                    self.note(
                        *span,
                        Level::Error,
                        &["control-flow", "return-failure", "for-return", "no-inner-return"],
                        "For loop doesn't return a value since it doesn't have any return \
                         statements",
                    );
                }

                match control {
                    None => {
                        for brk in find_breaks(body) {
                            self.note(
                                brk,
                                Level::Error,
                                &[
                                    "control-flow",
                                    "return-failure",
                                    "for-return",
                                    "break-prevents-return",
                                ],
                                "Break statement not allowed in for loop which needs to return a \
                                 value (either add a return statement after the loop or remove it)",
                            );
                        }
                    }
                    Some(control) => self.note(
                        *span,
                        Level::Error,
                        &[
                            "control-flow",
                            "return-failure",
                            "for-return",
                            "control-clause-prevents-return",
                        ],
                        format!(
                            "({}) clause not allowed in for loop which needs to return a value \
                             (either add a return statement after the loop or remove ({}))",
                            control.kind_name(),
                            control.kind_name()
                        ),
                    ),
                }
            }
            other => self.note(
                other.span(),
                Level::Error,
                &["control-flow", "return-failure"],
                "Last statement of body does not return",
            ),
        }
    }

    fn block(&mut self, block: &Block) {
        let mut terminated = false;

        for stmt in &block.stmts {
            if terminated {
                self.note(
                    stmt.span(),
                    Level::Error,
                    &["control-flow", "unreachable"],
                    "Statement is unreachable",
                );
            }

            self.stmt(stmt);

            if matches!(stmt, Stmt::Return { .. } | Stmt::Break { .. } | Stmt::Continue { .. }) {
                terminated = true;
            }
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr { expr, span } => {
                let effective =
                    expr.is_mutation() || matches!(expr, Expr::Func(_) | Expr::Import(_));
                if !effective {
                    self.note(
                        *span,
                        Level::Warn,
                        &["no-effect", "top-expression"],
                        "Statement has no effect",
                    );
                }
                self.expr(expr, true);
            }
            Stmt::Return { value: expr, .. }
            | Stmt::Assert { expr, .. }
            | Stmt::Log { expr, .. } => {
                self.expr(expr, false)
            }
            Stmt::Break { span } | Stmt::Continue { span } => {
                if self.loop_depth == 0 {
                    let keyword = match stmt {
                        Stmt::Break { .. } => "break",
                        _ => "continue",
                    };
                    self.note(
                        *span,
                        Level::Error,
                        &["control-flow", "control-outside-loop"],
                        format!("'{}' outside of a loop", keyword),
                    );
                }
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                self.expr(condition, false);
                self.block(then_branch);
                if let Some(block) = else_branch {
                    self.block(block);
                }
            }
            Stmt::For { control, body, .. } => {
                match control {
                    None => {}
                    Some(ForControl::Condition(condition)) => self.expr(condition, false),
                    Some(ForControl::Classic {
                        setup,
                        condition,
                        next,
                    }) => {
                        self.expr(setup, true);
                        self.expr(condition, false);
                        self.expr(next, true);
                    }
                    Some(ForControl::Range { target, source }) => {
                        self.targets(target, AssignOp::Create);
                        self.expr(source, false);
                    }
                }

                self.loop_depth += 1;
                self.block(body);
                self.loop_depth -= 1;
            }
            Stmt::Import { .. } => {}
        }
    }

    /// `top` is true where a mutation may appear: directly as a statement,
    /// or as the setup or next clause of a loop.
    fn expr(&mut self, expr: &Expr, top: bool) {
        match expr {
            Expr::Assign {
                target, op, value, span,
            } => {
                if !top {
                    let action = if *op == AssignOp::Create { "Creating" } else { "Assigning to" };
                    self.note(
                        *span,
                        Level::Error,
                        &["scope", "subexpression-mutation"],
                        format!("{} a variable in a subexpression is not allowed", action),
                    );
                }
                self.targets(target, *op);
                self.expr(value, false);
            }
            Expr::IncDec { target, span, .. } => {
                if !top {
                    self.note(
                        *span,
                        Level::Error,
                        &["scope", "subexpression-mutation"],
                        "Assigning to a variable in a subexpression is not allowed",
                    );
                }
                if !is_access_chain(target) {
                    self.invalid_target(target);
                }
                self.chain_indices(target);
            }
            Expr::Object { entries, .. } => {
                let mut seen = FxHashSet::default();
                for (key, value) in entries {
                    if !seen.insert(key.name.as_str()) {
                        self.note(
                            key.span,
                            Level::Error,
                            &["object", "duplicate", "duplicate-key"],
                            format!("Duplicate key '{}' in object literal", key.name),
                        );
                    }
                    self.expr(value, false);
                }
            }
            Expr::Func(func) => self.func(func),
            Expr::Number { .. }
            | Expr::String { .. }
            | Expr::Bool { .. }
            | Expr::Null { .. }
            | Expr::Ident(_)
            | Expr::Import(_)
            | Expr::Operator { .. } => {}
            Expr::Binary { left, right, .. } => {
                self.expr(left, false);
                self.expr(right, false);
            }
            Expr::Unary { operand, .. } => self.expr(operand, false),
            Expr::Call { callee, args, .. } => {
                self.expr(callee, false);
                for arg in args {
                    self.expr(arg, false);
                }
            }
            Expr::Member { object, .. } | Expr::MethodLookup { base: object, .. } => {
                self.expr(object, false)
            }
            Expr::Subscript { object, index, .. } => {
                self.expr(object, false);
                self.expr(index, false);
            }
            Expr::Array { items, .. } => {
                for item in items {
                    self.expr(item, false);
                }
            }
            Expr::Switch { subject, cases, .. } => {
                if let Some(subject) = subject {
                    self.expr(subject, false);
                }
                for case in cases {
                    self.expr(&case.test, false);
                    self.expr(&case.value, false);
                }
            }
        }
    }

    fn func(&mut self, func: &FuncExpr) {
        for param in &func.params {
            self.targets(param, AssignOp::Create);
        }

        // Loops do not reach into function bodies.
        let loop_depth = std::mem::replace(&mut self.loop_depth, 0);
        match &func.body {
            FuncBody::Block(block) => {
                self.body(block);
                self.block(block);
            }
            FuncBody::Expr(expr) => self.expr(expr, false),
        }
        self.loop_depth = loop_depth;
    }

    fn targets(&mut self, target: &Expr, op: AssignOp) {
        match target {
            Expr::Ident(_) => {}
            Expr::Array { items, .. } if !items.is_empty() => {
                for item in items {
                    self.targets(item, op);
                }
            }
            Expr::Object { entries, .. } if !entries.is_empty() => {
                let mut seen = FxHashSet::default();
                for (key, item) in entries {
                    if !seen.insert(key.name.as_str()) {
                        self.note(
                            key.span,
                            Level::Error,
                            &["object", "duplicate", "duplicate-key"],
                            format!("Duplicate key '{}' in object literal", key.name),
                        );
                    }
                    self.targets(item, op);
                }
            }
            Expr::Member { .. } | Expr::Subscript { .. } if is_access_chain(target) => {
                self.chain_indices(target)
            }
            other => self.invalid_target(other),
        }
    }

    fn invalid_target(&mut self, target: &Expr) {
        self.note(
            target.span(),
            Level::Error,
            &["invalid-assignment-target"],
            format!("Invalid assignment target: {} expression", target.kind_name()),
        );
    }

    /// Subscript expressions inside an access chain target.
    fn chain_indices(&mut self, target: &Expr) {
        match target {
            Expr::Member { object, .. } => self.chain_indices(object),
            Expr::Subscript { object, index, .. } => {
                self.chain_indices(object);
                self.expr(index, false);
            }
            _ => {}
        }
    }
}

/// An identifier, or member and subscript accesses rooted at one.
fn is_access_chain(expr: &Expr) -> bool {
    match expr {
        Expr::Ident(_) => true,
        Expr::Member { object, .. } | Expr::Subscript { object, .. } => is_access_chain(object),
        _ => false,
    }
}

fn has_return(block: &Block) -> bool {
    block.stmts.iter().any(|stmt| match stmt {
        Stmt::Return { .. } => true,
        Stmt::If {
            then_branch,
            else_branch,
            ..
        } => has_return(then_branch) || else_branch.as_ref().is_some_and(has_return),
        Stmt::For { body, .. } => has_return(body),
        _ => false,
    })
}

/// Breaks that would leave this loop. Nested loops catch their own.
fn find_breaks(block: &Block) -> Vec<Span> {
    let mut found = Vec::new();
    for stmt in &block.stmts {
        match stmt {
            Stmt::Break { span } => found.push(*span),
            Stmt::If {
                then_branch,
                else_branch,
                ..
            } => {
                found.extend(find_breaks(then_branch));
                if let Some(block) = else_branch {
                    found.extend(find_breaks(block));
                }
            }
            _ => {}
        }
    }
    found
}

// ==================== Scope ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VarKind {
    Variable,
    Param,
    SelfName,
    Import,
    /// Index into `ScopeCheck::hoisted`.
    Function(usize),
}

#[derive(Debug, Clone)]
struct Var {
    kind: VarKind,
    /// Function nesting depth at creation, 0 for the module.
    level: usize,
    used: bool,
    assigned: bool,
}

/// A name a function uses from outside itself.
#[derive(Debug, Clone)]
struct Capture<'a> {
    at: &'a Ident,
    origin: Ident,
    hoist: Option<usize>,
}

struct Hoisted<'a> {
    func: &'a Rc<FuncExpr>,
    name: &'a str,
    /// Known once the body has been walked.
    closure: Option<Vec<Capture<'a>>>,
}

/// A function whose body is being walked.
struct FunctionContext<'a> {
    level: usize,
    hoist: Option<usize>,
    captures: Vec<Capture<'a>>,
}

/// A place where a hoisted function is resolved against a scope. Every name
/// in its closure must exist there.
struct PendingUse<'a> {
    hoist: usize,
    site: Scope<Var>,
    at: &'a Ident,
    via: Vec<&'a str>,
}

struct ScopeCheck<'a> {
    file: &'a str,
    scope: Scope<Var>,
    functions: Vec<FunctionContext<'a>>,
    hoisted: Vec<Hoisted<'a>>,
    pending: Vec<PendingUse<'a>>,
    notes: Vec<Note>,
}

impl<'a> ScopeCheck<'a> {
    fn new(file: &'a str) -> Self {
        ScopeCheck {
            file,
            scope: Scope::new(),
            functions: Vec::new(),
            hoisted: Vec::new(),
            pending: Vec::new(),
            notes: Vec::new(),
        }
    }

    fn depth(&self) -> usize {
        self.functions.len()
    }

    fn pos(&self, span: Span) -> Pos {
        Pos::new(self.file, span)
    }

    fn note(
        &mut self,
        span: Span,
        level: Level,
        tags: &[&'static str],
        message: impl Into<String>,
    ) -> &mut Note {
        let mut note = Note::new(self.pos(span), level, tags, message);
        note.add_tags(["validation", "scope"]);
        self.notes.push(note);
        let last = self.notes.len() - 1;
        &mut self.notes[last]
    }

    /// Every function being walked that `level` is outside of captures the
    /// binding.
    fn record_capture(&mut self, at: &'a Ident, origin: &Ident, var: &Var) {
        let hoist = match var.kind {
            VarKind::Function(index) => Some(index),
            _ => None,
        };

        for context in self.functions.iter_mut().filter(|c| c.level > var.level) {
            if !context.captures.iter().any(|c| c.at.name == at.name) {
                context.captures.push(Capture {
                    at,
                    origin: origin.clone(),
                    hoist,
                });
            }
        }
    }

    /// Check every pending use whose function's closure is now known.
    fn check_pending(&mut self) {
        loop {
            let Some(i) = self
                .pending
                .iter()
                .position(|u| self.hoisted[u.hoist].closure.is_some())
            else {
                break;
            };

            let use_ = self.pending.swap_remove(i);
            self.check_use(use_);
        }
    }

    fn check_use(&mut self, use_: PendingUse<'a>) {
        let hoisted = &self.hoisted[use_.hoist];
        let Some(closure) = hoisted.closure.clone() else {
            self.pending.push(use_);
            return;
        };
        let name = hoisted.name;

        for capture in closure {
            let captured = capture.at.name.as_str();

            if use_.site.get(captured).is_none() {
                let via = if use_.via.is_empty() {
                    String::new()
                } else {
                    format!(" (via {})", use_.via.join(" -> "))
                };
                let origin = format_location(&self.pos(capture.origin.span));
                let capture_pos = self.pos(capture.at.span);

                let note = self.note(
                    use_.at.span,
                    Level::Error,
                    &["incomplete-closure"],
                    format!(
                        "Function {}{} is used before its closure is complete: it captures {}, \
                         which is created at {}",
                        name, via, captured, origin
                    ),
                );
                note.subnotes.push(Note::new(
                    capture_pos,
                    Level::Info,
                    &["validation", "scope", "incomplete-closure", "capture"],
                    format!("{} is captured here", captured),
                ));
                continue;
            }

            if let Some(next) = capture.hoist {
                let visited = next == use_.hoist || use_.via.contains(&self.hoisted[next].name);
                if !visited {
                    let mut via = use_.via.clone();
                    via.push(name);
                    self.pending.push(PendingUse {
                        hoist: next,
                        site: use_.site.clone(),
                        at: use_.at,
                        via,
                    });
                }
            }
        }
    }
}

impl<'a> ScopeVisitor<'a> for ScopeCheck<'a> {
    fn push(&mut self) -> Result<()> {
        self.scope.push();
        Ok(())
    }

    fn pop(&mut self) -> Result<()> {
        let mut unused: Vec<_> = self
            .scope
            .innermost()
            .filter(|entry| {
                matches!(entry.data.kind, VarKind::Variable | VarKind::Import)
                    && !entry.data.used
                    && !entry.origin.name.starts_with('_')
            })
            .map(|entry| (entry.origin.clone(), entry.data.assigned))
            .collect();
        unused.sort_by_key(|(origin, _)| origin.span.start);

        for (origin, assigned) in unused {
            if assigned {
                self.note(
                    origin.span,
                    Level::Warn,
                    &["no-effect", "unused", "assigned"],
                    format!(
                        "Variable {} is assigned but never used, so it can't affect the \
                         return value",
                        origin.name
                    ),
                );
            } else {
                self.note(
                    origin.span,
                    Level::Warn,
                    &["no-effect", "unused"],
                    format!("Variable {} is not used", origin.name),
                );
            }
        }

        self.scope.pop()
    }

    fn create(&mut self, ident: &'a Ident, creation: Creation<'a>) -> Result<()> {
        if let Some(existing) = self.scope.get(&ident.name) {
            let original = self.pos(existing.origin.span);
            let again = format_location(&self.pos(ident.span));

            let note = self.note(
                ident.span,
                Level::Error,
                &["duplicate"],
                format!("Can't create variable {} that already exists", ident.name),
            );
            note.subnotes.push(Note::new(
                original,
                Level::Info,
                &["validation", "scope", "is-duplicated"],
                format!("Attempt to create this variable again at {}", again),
            ));
            return Ok(());
        }

        let kind = match creation {
            Creation::Variable => VarKind::Variable,
            Creation::Param => VarKind::Param,
            Creation::SelfName => VarKind::SelfName,
            Creation::Import => VarKind::Import,
            Creation::Hoisted(func) => {
                self.hoisted.push(Hoisted {
                    func,
                    name: &ident.name,
                    closure: None,
                });
                VarKind::Function(self.hoisted.len() - 1)
            }
        };

        self.scope.add(
            ident.clone(),
            Var {
                kind,
                level: self.depth(),
                used: false,
                assigned: false,
            },
        )
    }

    fn read(&mut self, ident: &'a Ident) -> Result<()> {
        let Some(entry) = self.scope.get(&ident.name) else {
            self.note(
                ident.span,
                Level::Error,
                &["not-found"],
                format!("Variable {} does not exist", ident.name),
            );
            return Ok(());
        };

        let var = entry.data.clone();
        let origin = entry.origin.clone();
        self.record_capture(ident, &origin, &var);

        // Resolving a hoisted function here fixes the scope it closes over.
        if let VarKind::Function(hoist) = var.kind {
            if var.level == self.depth() {
                self.pending.push(PendingUse {
                    hoist,
                    site: self.scope.clone(),
                    at: ident,
                    via: Vec::new(),
                });
                self.check_pending();
            }
        }

        self.scope.set(&ident.name, |v| v.used = true)
    }

    fn mutate(&mut self, ident: &'a Ident) -> Result<()> {
        let Some(entry) = self.scope.get(&ident.name) else {
            self.note(
                ident.span,
                Level::Error,
                &["not-found", "assign-target"],
                format!("Variable {} does not exist", ident.name),
            );
            return Ok(());
        };

        let var = entry.data.clone();
        let origin = entry.origin.clone();

        if var.level < self.depth() {
            let origin_pos = self.pos(origin.span);
            let note = self.note(
                ident.span,
                Level::Error,
                &["capture-mutation"],
                format!("Captured variable {} cannot be mutated", ident.name),
            );
            note.subnotes.push(Note::new(
                origin_pos,
                Level::Info,
                &["validation", "scope", "capture-mutation"],
                format!("{} is created here, outside the function", ident.name),
            ));
            self.record_capture(ident, &origin, &var);
        }

        self.scope.set(&ident.name, |v| v.assigned = true)
    }

    fn func(&mut self, func: &'a Rc<FuncExpr>, hoisted: bool) -> Result<()> {
        let hoist = if hoisted {
            self.hoisted.iter().rposition(|h| Rc::ptr_eq(h.func, func))
        } else {
            None
        };

        self.functions.push(FunctionContext {
            level: self.depth() + 1,
            hoist,
            captures: Vec::new(),
        });
        walk_func(self, func, hoisted)?;
        let Some(context) = self.functions.pop() else {
            return Ok(());
        };

        match context.hoist {
            Some(index) => {
                self.hoisted[index].closure = Some(context.captures);
            }
            None => {
                // A function value closes over the scope it is created in,
                // so any hoisted function it uses is resolved here.
                for capture in context.captures {
                    if let Some(hoist) = capture.hoist {
                        if self.scope.get(&capture.at.name).is_some() {
                            self.pending.push(PendingUse {
                                hoist,
                                site: self.scope.clone(),
                                at: capture.at,
                                via: Vec::new(),
                            });
                        }
                    }
                }
            }
        }

        self.check_pending();
        Ok(())
    }
}
