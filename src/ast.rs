//! Abstract Syntax Tree definitions for Vortex
//!
//! Represents the structure of programs after parsing. Nodes carry spans but
//! not file names; the module layer attaches the file.

use std::fmt;
use std::rc::Rc;

use crate::note::Level;
use crate::token::{is_identifier, Span};

/// An identifier occurrence. Bindings remember the `Ident` that created them.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

impl Ident {
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Self {
            name: name.into(),
            span,
        }
    }
}

/// Expression nodes
#[derive(Debug, Clone)]
pub enum Expr {
    /// Number literal: 42, 3.14
    Number { value: f64, span: Span },

    /// String literal: 'hello'
    String { value: String, span: Span },

    /// Boolean literal: true, false
    Bool { value: bool, span: Span },

    /// Null literal
    Null { span: Span },

    /// Variable reference: foo
    Ident(Ident),

    /// Binary operation: a + b, x ++ y, m * n
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
        span: Span,
    },

    /// Unary operation: -x, +x, !y
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },

    /// Creation or assignment: a := 1, a.b[2] += 3, [x, y] = [y, x]
    Assign {
        target: Box<Expr>,
        op: AssignOp,
        value: Box<Expr>,
        span: Span,
    },

    /// x++ / x--
    IncDec {
        target: Box<Expr>,
        op: IncDecOp,
        span: Span,
    },

    /// Function call: foo(a, b)
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        span: Span,
    },

    /// Field access: obj.field
    Member {
        object: Box<Expr>,
        name: Ident,
        span: Span,
    },

    /// Subscript: arr[i], obj['key']
    Subscript {
        object: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },

    /// Method lookup: arr:map
    MethodLookup {
        base: Box<Expr>,
        name: Ident,
        span: Span,
    },

    Func(Rc<FuncExpr>),

    Array { items: Vec<Expr>, span: Span },

    /// Object literal. Shorthand `{a}` is stored as `(a, Ident(a))`.
    Object { entries: Vec<(Ident, Expr)>, span: Span },

    /// `switch (subject) { label => value; }` or `switch { cond => value; }`
    Switch {
        subject: Option<Box<Expr>>,
        cases: Vec<SwitchCase>,
        span: Span,
    },

    /// `import name` used as an expression
    Import(Rc<Import>),

    /// A binary operator as a value: (+)
    Operator { op: BinaryOp, span: Span },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Number { span, .. }
            | Expr::String { span, .. }
            | Expr::Bool { span, .. }
            | Expr::Null { span }
            | Expr::Binary { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Assign { span, .. }
            | Expr::IncDec { span, .. }
            | Expr::Call { span, .. }
            | Expr::Member { span, .. }
            | Expr::Subscript { span, .. }
            | Expr::MethodLookup { span, .. }
            | Expr::Array { span, .. }
            | Expr::Object { span, .. }
            | Expr::Switch { span, .. }
            | Expr::Operator { span, .. } => *span,
            Expr::Ident(ident) => ident.span,
            Expr::Func(func) => func.span,
            Expr::Import(import) => import.span,
        }
    }

    /// Assignment, creation, increment and decrement.
    pub fn is_mutation(&self) -> bool {
        matches!(self, Expr::Assign { .. } | Expr::IncDec { .. })
    }

    /// Short name of the node kind, used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Expr::Number { .. } => "number",
            Expr::String { .. } => "string",
            Expr::Bool { .. } => "bool",
            Expr::Null { .. } => "null",
            Expr::Ident(_) => "identifier",
            Expr::Binary { .. } => "operator",
            Expr::Unary { .. } => "unary operator",
            Expr::Assign { .. } => "assignment",
            Expr::IncDec { .. } => "increment",
            Expr::Call { .. } => "call",
            Expr::Member { .. } => "member",
            Expr::Subscript { .. } => "subscript",
            Expr::MethodLookup { .. } => "method lookup",
            Expr::Func(_) => "func",
            Expr::Array { .. } => "array",
            Expr::Object { .. } => "object",
            Expr::Switch { .. } => "switch",
            Expr::Import(_) => "import",
            Expr::Operator { .. } => "operator value",
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Assign { .. } => 0,
            Expr::Binary { op, .. } => op.precedence(),
            Expr::Unary { .. } => 12,
            _ => 13,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SwitchCase {
    pub test: Expr,
    pub value: Expr,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,    // +
    Sub,    // -
    Mul,    // *
    Div,    // /
    Mod,    // %
    Pow,    // **
    Concat, // ++
    Shl,    // <<
    Shr,    // >>
    BitAnd, // &
    BitOr,  // |
    BitXor, // ^
    And,    // &&
    Or,     // ||
    Eq,     // ==
    Ne,     // !=
    Lt,     // <
    Le,     // <=
    Gt,     // >
    Ge,     // >=
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
            BinaryOp::Concat => "++",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    /// Binding strength, higher binds tighter.
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::BitOr => 3,
            BinaryOp::BitXor => 4,
            BinaryOp::BitAnd => 5,
            BinaryOp::Eq | BinaryOp::Ne => 6,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 7,
            BinaryOp::Shl | BinaryOp::Shr => 8,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Concat => 9,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 10,
            BinaryOp::Pow => 11,
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,  // -
    Plus, // +
    Not,  // !
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Plus => "+",
            UnaryOp::Not => "!",
        }
    }
}

/// `:=`, `=`, or a compound assignment such as `+=`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Create,
    Set,
    Compound(BinaryOp),
}

impl fmt::Display for AssignOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssignOp::Create => f.write_str(":="),
            AssignOp::Set => f.write_str("="),
            AssignOp::Compound(op) => write!(f, "{}=", op),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncDecOp {
    Inc,
    Dec,
}

impl IncDecOp {
    pub fn symbol(self) -> &'static str {
        match self {
            IncDecOp::Inc => "++",
            IncDecOp::Dec => "--",
        }
    }

    pub fn binary_op(self) -> BinaryOp {
        match self {
            IncDecOp::Inc => BinaryOp::Add,
            IncDecOp::Dec => BinaryOp::Sub,
        }
    }
}

/// A function literal or declaration
#[derive(Debug, Clone)]
pub struct FuncExpr {
    pub name: Option<Ident>,
    /// Parameter patterns: identifiers or array/object destructuring.
    pub params: Vec<Expr>,
    pub body: FuncBody,
    pub span: Span,
}

impl FuncExpr {
    pub fn display_name(&self) -> &str {
        self.name.as_ref().map_or("(anonymous)", |n| n.name.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum FuncBody {
    Block(Block),
    Expr(Box<Expr>),
}

/// `import name` or `import name from 'source'`
#[derive(Debug, Clone)]
pub struct Import {
    pub name: Ident,
    pub source: Option<(String, Span)>,
    pub span: Span,
}

/// Loop control clause
#[derive(Debug, Clone)]
pub enum ForControl {
    /// for (cond) { }
    Condition(Expr),
    /// for (pattern of source) { }
    Range { target: Expr, source: Expr },
    /// for (setup; cond; next) { }
    Classic {
        setup: Expr,
        condition: Expr,
        next: Expr,
    },
}

impl ForControl {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ForControl::Condition(_) => "condition",
            ForControl::Range { .. } => "range",
            ForControl::Classic { .. } => "setup; condition; next",
        }
    }
}

/// Statement nodes
#[derive(Debug, Clone)]
pub enum Stmt {
    /// Expression statement
    Expr { expr: Expr, span: Span },

    Return { value: Expr, span: Span },

    Assert { expr: Expr, span: Span },

    /// log.info / log.warn / log.error
    Log { level: Level, expr: Expr, span: Span },

    Break { span: Span },

    Continue { span: Span },

    /// `else if` is stored as an else block holding a single `If`.
    If {
        condition: Expr,
        then_branch: Block,
        else_branch: Option<Block>,
        span: Span,
    },

    For {
        control: Option<ForControl>,
        body: Block,
        span: Span,
    },

    Import { import: Rc<Import>, span: Span },
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Expr { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::Assert { span, .. }
            | Stmt::Log { span, .. }
            | Stmt::Break { span }
            | Stmt::Continue { span }
            | Stmt::If { span, .. }
            | Stmt::For { span, .. }
            | Stmt::Import { span, .. } => *span,
        }
    }

    /// The declared function, if this is a named function statement.
    pub fn hoisted_function(&self) -> Option<&Rc<FuncExpr>> {
        match self {
            Stmt::Expr {
                expr: Expr::Func(func),
                ..
            } if func.name.is_some() => Some(func),
            _ => None,
        }
    }
}

/// `{ stmt* }`
#[derive(Debug, Clone)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

impl Block {
    pub fn new(stmts: Vec<Stmt>, span: Span) -> Self {
        Self { stmts, span }
    }

    /// Named function statements, registered before the block runs.
    pub fn hoisted_functions(&self) -> impl Iterator<Item = &Rc<FuncExpr>> {
        self.stmts.iter().filter_map(Stmt::hoisted_function)
    }
}

/// A complete program: the top-level block of one file
#[derive(Debug, Clone)]
pub struct Program {
    pub body: Block,
}

impl Program {
    pub fn new(body: Block) -> Self {
        Self { body }
    }

    /// Every import in the program, statement or expression form.
    pub fn imports(&self) -> Vec<Rc<Import>> {
        let mut found = Vec::new();
        collect_block_imports(&self.body, &mut found);
        found
    }
}

fn collect_block_imports(block: &Block, found: &mut Vec<Rc<Import>>) {
    for stmt in &block.stmts {
        match stmt {
            Stmt::Import { import, .. } => found.push(import.clone()),
            Stmt::Expr { expr, .. }
            | Stmt::Return { value: expr, .. }
            | Stmt::Assert { expr, .. }
            | Stmt::Log { expr, .. } => collect_expr_imports(expr, found),
            Stmt::Break { .. } | Stmt::Continue { .. } => {}
            Stmt::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                collect_expr_imports(condition, found);
                collect_block_imports(then_branch, found);
                if let Some(block) = else_branch {
                    collect_block_imports(block, found);
                }
            }
            Stmt::For { control, body, .. } => {
                match control {
                    Some(ForControl::Condition(cond)) => collect_expr_imports(cond, found),
                    Some(ForControl::Range { target, source }) => {
                        collect_expr_imports(target, found);
                        collect_expr_imports(source, found);
                    }
                    Some(ForControl::Classic {
                        setup,
                        condition,
                        next,
                    }) => {
                        collect_expr_imports(setup, found);
                        collect_expr_imports(condition, found);
                        collect_expr_imports(next, found);
                    }
                    None => {}
                }
                collect_block_imports(body, found);
            }
        }
    }
}

fn collect_expr_imports(expr: &Expr, found: &mut Vec<Rc<Import>>) {
    match expr {
        Expr::Import(import) => found.push(import.clone()),
        Expr::Number { .. }
        | Expr::String { .. }
        | Expr::Bool { .. }
        | Expr::Null { .. }
        | Expr::Ident(_)
        | Expr::Operator { .. } => {}
        Expr::Binary { left, right, .. } => {
            collect_expr_imports(left, found);
            collect_expr_imports(right, found);
        }
        Expr::Unary { operand, .. } => collect_expr_imports(operand, found),
        Expr::Assign { target, value, .. } => {
            collect_expr_imports(target, found);
            collect_expr_imports(value, found);
        }
        Expr::IncDec { target, .. } => collect_expr_imports(target, found),
        Expr::Call { callee, args, .. } => {
            collect_expr_imports(callee, found);
            for arg in args {
                collect_expr_imports(arg, found);
            }
        }
        Expr::Member { object, .. } => collect_expr_imports(object, found),
        Expr::Subscript { object, index, .. } => {
            collect_expr_imports(object, found);
            collect_expr_imports(index, found);
        }
        Expr::MethodLookup { base, .. } => collect_expr_imports(base, found),
        Expr::Func(func) => match &func.body {
            FuncBody::Block(block) => collect_block_imports(block, found),
            FuncBody::Expr(body) => collect_expr_imports(body, found),
        },
        Expr::Array { items, .. } => {
            for item in items {
                collect_expr_imports(item, found);
            }
        }
        Expr::Object { entries, .. } => {
            for (_, value) in entries {
                collect_expr_imports(value, found);
            }
        }
        Expr::Switch { subject, cases, .. } => {
            if let Some(subject) = subject {
                collect_expr_imports(subject, found);
            }
            for case in cases {
                collect_expr_imports(&case.test, found);
                collect_expr_imports(&case.value, found);
            }
        }
    }
}

/// Writes an object key bare when possible, quoted otherwise.
pub(crate) fn write_key(f: &mut impl fmt::Write, key: &str) -> fmt::Result {
    if is_identifier(key) {
        f.write_str(key)
    } else {
        write_quoted(f, key)
    }
}

/// Writes a single-quoted string literal.
pub(crate) fn write_quoted(f: &mut impl fmt::Write, s: &str) -> fmt::Result {
    f.write_char('\'')?;
    for c in s.chars() {
        match c {
            '\'' => f.write_str("\\'")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            c => f.write_char(c)?,
        }
    }
    f.write_char('\'')
}

fn write_child(f: &mut fmt::Formatter<'_>, child: &Expr, min: u8) -> fmt::Result {
    if child.precedence() < min {
        write!(f, "({})", child)
    } else {
        write!(f, "{}", child)
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

/// Source-like rendering, used when a diagnostic quotes an expression.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number { value, .. } => write!(f, "{}", value),
            Expr::String { value, .. } => write_quoted(f, value),
            Expr::Bool { value, .. } => write!(f, "{}", value),
            Expr::Null { .. } => f.write_str("null"),
            Expr::Ident(ident) => f.write_str(&ident.name),
            Expr::Binary {
                left, op, right, ..
            } => {
                let prec = op.precedence();
                // ** groups to the right, everything else to the left.
                let (lmin, rmin) = if *op == BinaryOp::Pow {
                    (prec + 1, prec)
                } else {
                    (prec, prec + 1)
                };
                write_child(f, left, lmin)?;
                write!(f, " {} ", op)?;
                write_child(f, right, rmin)
            }
            Expr::Unary { op, operand, .. } => {
                f.write_str(op.symbol())?;
                write_child(f, operand, 12)
            }
            Expr::Assign {
                target, op, value, ..
            } => write!(f, "{} {} {}", target, op, value),
            Expr::IncDec { target, op, .. } => write!(f, "{}{}", target, op.symbol()),
            Expr::Call { callee, args, .. } => {
                write_child(f, callee, 13)?;
                f.write_str("(")?;
                write_list(f, args)?;
                f.write_str(")")
            }
            Expr::Member { object, name, .. } => {
                write_child(f, object, 13)?;
                write!(f, ".{}", name.name)
            }
            Expr::Subscript { object, index, .. } => {
                write_child(f, object, 13)?;
                write!(f, "[{}]", index)
            }
            Expr::MethodLookup { base, name, .. } => {
                write_child(f, base, 13)?;
                write!(f, ":{}", name.name)
            }
            Expr::Func(func) => {
                f.write_str("func")?;
                if let Some(name) = &func.name {
                    write!(f, " {}", name.name)?;
                }
                f.write_str("(")?;
                write_list(f, &func.params)?;
                match &func.body {
                    FuncBody::Expr(body) => write!(f, ") => {}", body),
                    FuncBody::Block(_) => f.write_str(") { ... }"),
                }
            }
            Expr::Array { items, .. } => {
                f.write_str("[")?;
                write_list(f, items)?;
                f.write_str("]")
            }
            Expr::Object { entries, .. } => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match value {
                        Expr::Ident(v) if v.name == key.name => f.write_str(&key.name)?,
                        _ => {
                            write_key(f, &key.name)?;
                            write!(f, ": {}", value)?;
                        }
                    }
                }
                f.write_str("}")
            }
            Expr::Switch { subject, cases, .. } => {
                f.write_str("switch ")?;
                if let Some(subject) = subject {
                    write!(f, "({}) ", subject)?;
                }
                f.write_str("{")?;
                for case in cases {
                    write!(f, " {} => {};", case.test, case.value)?;
                }
                f.write_str(" }")
            }
            Expr::Import(import) => write!(f, "import {}", import.name.name),
            Expr::Operator { op, .. } => write!(f, "({})", op),
        }
    }
}
