//! Scope shape of a program
//!
//! The walker visits a syntax tree in evaluation order and reports the scope
//! events the analyzer goes through at runtime: frames opened and closed,
//! names created, read and mutated. Frames follow the analyzer exactly:
//!
//! - every block opens a frame, and its named function statements are
//!   created before its first statement runs;
//! - a function call opens a frame holding the function's own name (for
//!   function expressions) and its parameters, and the body block opens
//!   another;
//! - a `for` loop opens a frame for its setup, and each iteration opens a
//!   frame holding the range target and the body's bindings.
//!
//! Bodies of hoisted functions are visited at the end of their block, when
//! every name the block creates exists.

use std::rc::Rc;

use crate::ast::{AssignOp, Block, Expr, ForControl, FuncBody, FuncExpr, Ident, Program, Stmt};
use crate::error::Result;

/// How a name came into scope.
#[derive(Debug, Clone, Copy)]
pub enum Creation<'a> {
    Variable,
    Param,
    /// A named function statement.
    Hoisted(&'a Rc<FuncExpr>),
    /// The name of a function expression, visible inside its own body.
    SelfName,
    Import,
}

pub trait ScopeVisitor<'a> {
    fn push(&mut self) -> Result<()>;

    fn pop(&mut self) -> Result<()>;

    fn create(&mut self, ident: &'a Ident, creation: Creation<'a>) -> Result<()>;

    fn read(&mut self, ident: &'a Ident) -> Result<()>;

    fn mutate(&mut self, ident: &'a Ident) -> Result<()>;

    /// A function literal. Override to track function boundaries, and call
    /// `walk_func` to descend.
    fn func(&mut self, func: &'a Rc<FuncExpr>, hoisted: bool) -> Result<()> {
        walk_func(self, func, hoisted)
    }
}

pub fn walk_program<'a, V: ScopeVisitor<'a> + ?Sized>(
    v: &mut V,
    program: &'a Program,
) -> Result<()> {
    walk_block(v, &program.body)
}

pub fn walk_block<'a, V: ScopeVisitor<'a> + ?Sized>(v: &mut V, block: &'a Block) -> Result<()> {
    v.push()?;
    walk_block_contents(v, block)?;
    v.pop()
}

/// A block's statements inside a frame the caller has opened.
pub fn walk_block_contents<'a, V: ScopeVisitor<'a> + ?Sized>(
    v: &mut V,
    block: &'a Block,
) -> Result<()> {
    for func in block.hoisted_functions() {
        if let Some(name) = &func.name {
            v.create(name, Creation::Hoisted(func))?;
        }
    }

    for stmt in &block.stmts {
        walk_stmt(v, stmt)?;
    }

    for func in block.hoisted_functions() {
        v.func(func, true)?;
    }

    Ok(())
}

pub fn walk_func<'a, V: ScopeVisitor<'a> + ?Sized>(
    v: &mut V,
    func: &'a Rc<FuncExpr>,
    hoisted: bool,
) -> Result<()> {
    v.push()?;

    if !hoisted {
        if let Some(name) = &func.name {
            v.create(name, Creation::SelfName)?;
        }
    }

    for param in &func.params {
        walk_pattern(v, param, Creation::Param)?;
    }

    match &func.body {
        FuncBody::Block(block) => walk_block(v, block)?,
        FuncBody::Expr(expr) => walk_expr(v, expr)?,
    }

    v.pop()
}

fn walk_stmt<'a, V: ScopeVisitor<'a> + ?Sized>(v: &mut V, stmt: &'a Stmt) -> Result<()> {
    match stmt {
        Stmt::Expr { .. } if stmt.hoisted_function().is_some() => Ok(()),
        Stmt::Expr { expr, .. }
        | Stmt::Return { value: expr, .. }
        | Stmt::Assert { expr, .. }
        | Stmt::Log { expr, .. } => walk_expr(v, expr),
        Stmt::Break { .. } | Stmt::Continue { .. } => Ok(()),
        Stmt::If {
            condition,
            then_branch,
            else_branch,
            ..
        } => {
            walk_expr(v, condition)?;
            walk_block(v, then_branch)?;
            match else_branch {
                Some(block) => walk_block(v, block),
                None => Ok(()),
            }
        }
        Stmt::For { control, body, .. } => {
            v.push()?;

            match control {
                None => walk_block(v, body)?,
                Some(ForControl::Condition(condition)) => {
                    walk_expr(v, condition)?;
                    walk_block(v, body)?;
                }
                Some(ForControl::Classic {
                    setup,
                    condition,
                    next,
                }) => {
                    walk_expr(v, setup)?;
                    walk_expr(v, condition)?;
                    walk_block(v, body)?;
                    walk_expr(v, next)?;
                }
                Some(ForControl::Range { target, source }) => {
                    walk_expr(v, source)?;
                    v.push()?;
                    walk_pattern(v, target, Creation::Variable)?;
                    walk_block_contents(v, body)?;
                    v.pop()?;
                }
            }

            v.pop()
        }
        Stmt::Import { import, .. } => v.create(&import.name, Creation::Import),
    }
}

/// Names created by a pattern. Access chains inside a pattern modify an
/// existing variable instead.
fn walk_pattern<'a, V: ScopeVisitor<'a> + ?Sized>(
    v: &mut V,
    pattern: &'a Expr,
    creation: Creation<'a>,
) -> Result<()> {
    match pattern {
        Expr::Ident(ident) => v.create(ident, creation),
        Expr::Array { items, .. } => {
            for item in items {
                walk_pattern(v, item, creation)?;
            }
            Ok(())
        }
        Expr::Object { entries, .. } => {
            for (_, target) in entries {
                walk_pattern(v, target, creation)?;
            }
            Ok(())
        }
        Expr::Member { .. } | Expr::Subscript { .. } if !matches!(creation, Creation::Param) => {
            walk_mutation_target(v, pattern)
        }
        _ => Ok(()),
    }
}

fn walk_mutation_target<'a, V: ScopeVisitor<'a> + ?Sized>(
    v: &mut V,
    target: &'a Expr,
) -> Result<()> {
    match target {
        Expr::Ident(ident) => v.mutate(ident),
        Expr::Member { object, .. } => walk_mutation_target(v, object),
        Expr::Subscript { object, index, .. } => {
            walk_expr(v, index)?;
            walk_mutation_target(v, object)
        }
        Expr::Array { items, .. } => {
            for item in items {
                walk_mutation_target(v, item)?;
            }
            Ok(())
        }
        Expr::Object { entries, .. } => {
            for (_, item) in entries {
                walk_mutation_target(v, item)?;
            }
            Ok(())
        }
        other => walk_expr(v, other),
    }
}

pub fn walk_expr<'a, V: ScopeVisitor<'a> + ?Sized>(v: &mut V, expr: &'a Expr) -> Result<()> {
    match expr {
        Expr::Number { .. }
        | Expr::String { .. }
        | Expr::Bool { .. }
        | Expr::Null { .. }
        | Expr::Import(_)
        | Expr::Operator { .. } => Ok(()),
        Expr::Ident(ident) => v.read(ident),
        Expr::Binary { left, right, .. } => {
            walk_expr(v, left)?;
            walk_expr(v, right)
        }
        Expr::Unary { operand, .. } => walk_expr(v, operand),
        Expr::Assign {
            target, op, value, ..
        } => {
            walk_expr(v, value)?;
            match op {
                AssignOp::Create => walk_pattern(v, target, Creation::Variable),
                AssignOp::Set | AssignOp::Compound(_) => walk_mutation_target(v, target),
            }
        }
        Expr::IncDec { target, .. } => walk_mutation_target(v, target),
        Expr::Call { callee, args, .. } => {
            walk_expr(v, callee)?;
            for arg in args {
                walk_expr(v, arg)?;
            }
            Ok(())
        }
        Expr::Member { object, .. } => walk_expr(v, object),
        Expr::Subscript { object, index, .. } => {
            walk_expr(v, object)?;
            walk_expr(v, index)
        }
        Expr::MethodLookup { base, .. } => walk_expr(v, base),
        Expr::Func(func) => v.func(func, false),
        Expr::Array { items, .. } => {
            for item in items {
                walk_expr(v, item)?;
            }
            Ok(())
        }
        Expr::Object { entries, .. } => {
            for (_, value) in entries {
                walk_expr(v, value)?;
            }
            Ok(())
        }
        Expr::Switch { subject, cases, .. } => {
            if let Some(subject) = subject {
                walk_expr(v, subject)?;
            }
            for case in cases {
                walk_expr(v, &case.test)?;
                walk_expr(v, &case.value)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;
    use pretty_assertions::assert_eq;

    /// Records events as strings.
    #[derive(Default)]
    struct Trace {
        events: Vec<String>,
    }

    impl<'a> ScopeVisitor<'a> for Trace {
        fn push(&mut self) -> Result<()> {
            self.events.push("{".into());
            Ok(())
        }

        fn pop(&mut self) -> Result<()> {
            self.events.push("}".into());
            Ok(())
        }

        fn create(&mut self, ident: &'a Ident, creation: Creation<'a>) -> Result<()> {
            let kind = match creation {
                Creation::Variable => "var",
                Creation::Param => "param",
                Creation::Hoisted(_) => "hoist",
                Creation::SelfName => "self",
                Creation::Import => "import",
            };
            self.events.push(format!("{} {}", kind, ident.name));
            Ok(())
        }

        fn read(&mut self, ident: &'a Ident) -> Result<()> {
            self.events.push(format!("read {}", ident.name));
            Ok(())
        }

        fn mutate(&mut self, ident: &'a Ident) -> Result<()> {
            self.events.push(format!("mutate {}", ident.name));
            Ok(())
        }
    }

    fn trace(source: &str) -> String {
        let program = parse_source(source).unwrap();
        let mut t = Trace::default();
        walk_program(&mut t, &program).unwrap();
        t.events.join(", ")
    }

    #[test]
    fn test_hoisted_body_is_walked_last() {
        assert_eq!(
            trace("x := f(1); func f(a) => a + y; y := 2; return x;"),
            "{, hoist f, read f, var x, var y, read x, {, param a, read a, read y, }, }"
        );
    }

    #[test]
    fn test_assignment_reads_value_first() {
        assert_eq!(
            trace("a := [1]; a[i] += b; return a;"),
            "{, var a, read b, read i, mutate a, read a, }"
        );
    }

    #[test]
    fn test_function_expression_self_name_and_patterns() {
        assert_eq!(
            trace("g := func g([a, {b}]) => g; return g;"),
            "{, {, self g, param a, param b, read g, }, var g, read g, }"
        );
    }

    #[test]
    fn test_range_loop_frames() {
        assert_eq!(
            trace("for ([k, v] of xs) { t := k; } return 1;"),
            "{, {, read xs, {, var k, var v, read k, var t, }, }, }"
        );
    }
}
