//! Parser for Vortex
//!
//! Converts tokens into an Abstract Syntax Tree.

use std::rc::Rc;

use crate::ast::{
    AssignOp, BinaryOp, Block, Expr, ForControl, FuncBody, FuncExpr, Ident, Import, IncDecOp,
    Program, Stmt, SwitchCase, UnaryOp,
};
use crate::error::{Result, VortexError};
use crate::note::Level;
use crate::stack::ensure_sufficient_stack;
use crate::token::{is_identifier, Span, Token, TokenKind};

/// Parse a whole source file.
pub fn parse_source(source: &str) -> Result<Program> {
    let tokens = crate::lexer::Lexer::new(source)
        .tokenize()
        .map_err(|e| e.with_source(source))?;
    Parser::new(tokens).parse().map_err(|e| e.with_source(source))
}

/// The parser state
pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
}

impl Parser {
    /// Create a new parser from tokens
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, current: 0 }
    }

    /// Parse the tokens into a program
    pub fn parse(&mut self) -> Result<Program> {
        let start = self.peek().span;
        let mut stmts = Vec::new();

        while !self.is_at_end() {
            stmts.push(self.statement()?);
        }

        let span = start.to(self.previous_or_eof_span());
        Ok(Program::new(Block::new(stmts, span)))
    }

    // ==================== Statements ====================

    fn statement(&mut self) -> Result<Stmt> {
        match self.peek().kind {
            TokenKind::If => self.if_statement(),
            TokenKind::For => self.for_statement(),
            TokenKind::Return => self.return_statement(),
            TokenKind::Break => {
                let start = self.advance().span;
                let end = self.terminator()?;
                Ok(Stmt::Break { span: start.to(end) })
            }
            TokenKind::Continue => {
                let start = self.advance().span;
                let end = self.terminator()?;
                Ok(Stmt::Continue { span: start.to(end) })
            }
            TokenKind::Assert => {
                let start = self.advance().span;
                let expr = self.expression()?;
                let end = self.terminator()?;
                Ok(Stmt::Assert { expr, span: start.to(end) })
            }
            TokenKind::Log => self.log_statement(),
            TokenKind::Import => {
                let import = Rc::new(self.import_clause()?);
                let end = self.terminator()?;
                let span = import.span.to(end);
                Ok(Stmt::Import { import, span })
            }
            _ => self.expression_statement(),
        }
    }

    fn expression_statement(&mut self) -> Result<Stmt> {
        let expr = self.expression()?;

        // The ';' after a block-bodied function declaration is optional.
        let block_func = matches!(&expr, Expr::Func(f) if matches!(f.body, FuncBody::Block(_)));
        let end = if block_func && !self.check(&TokenKind::Semicolon) {
            expr.span()
        } else {
            self.terminator()?
        };

        let span = expr.span().to(end);
        Ok(Stmt::Expr { expr, span })
    }

    fn if_statement(&mut self) -> Result<Stmt> {
        let start = self.advance().span; // consume 'if'

        self.expect(&TokenKind::LeftParen, "expected '(' after 'if'")?;
        let condition = self.expression()?;
        self.expect(&TokenKind::RightParen, "expected ')' after if condition")?;

        let then_branch = self.block()?;

        let else_branch = if self.match_token(&TokenKind::Else) {
            if self.check(&TokenKind::If) {
                let nested = self.if_statement()?;
                let span = nested.span();
                Some(Block::new(vec![nested], span))
            } else {
                Some(self.block()?)
            }
        } else {
            None
        };

        let end = else_branch.as_ref().map_or(then_branch.span, |b| b.span);
        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
            span: start.to(end),
        })
    }

    fn for_statement(&mut self) -> Result<Stmt> {
        let start = self.advance().span; // consume 'for'

        let control = if self.match_token(&TokenKind::LeftParen) {
            let first = self.expression()?;

            let control = if self.match_token(&TokenKind::Of) {
                let source = self.expression()?;
                ForControl::Range {
                    target: first,
                    source,
                }
            } else if self.match_token(&TokenKind::Semicolon) {
                let condition = self.expression()?;
                self.expect(&TokenKind::Semicolon, "expected ';' after loop condition")?;
                let next = self.expression()?;
                ForControl::Classic {
                    setup: first,
                    condition,
                    next,
                }
            } else {
                ForControl::Condition(first)
            };

            self.expect(&TokenKind::RightParen, "expected ')' after loop control")?;
            Some(control)
        } else {
            None
        };

        let body = self.block()?;
        let span = start.to(body.span);

        Ok(Stmt::For {
            control,
            body,
            span,
        })
    }

    fn return_statement(&mut self) -> Result<Stmt> {
        let start = self.advance().span; // consume 'return'
        let value = self.expression()?;
        let end = self.terminator()?;
        Ok(Stmt::Return {
            value,
            span: start.to(end),
        })
    }

    fn log_statement(&mut self) -> Result<Stmt> {
        let start = self.advance().span; // consume 'log'
        self.expect(&TokenKind::Dot, "expected '.' after 'log'")?;

        let channel = self.ident("expected log level (info, warn, error)")?;
        let level = match channel.name.as_str() {
            "info" => Level::Info,
            "warn" => Level::Warn,
            "error" => Level::Error,
            other => {
                return Err(VortexError::syntax(
                    format!("unknown log level '{}'", other),
                    channel.span,
                ))
            }
        };

        let expr = self.expression()?;
        let end = self.terminator()?;

        Ok(Stmt::Log {
            level,
            expr,
            span: start.to(end),
        })
    }

    fn block(&mut self) -> Result<Block> {
        let start = self.expect(&TokenKind::LeftBrace, "expected '{'")?.span;

        let mut stmts = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            stmts.push(self.statement()?);
        }

        let end = self.expect(&TokenKind::RightBrace, "expected '}' after block")?.span;
        Ok(Block::new(stmts, start.to(end)))
    }

    fn terminator(&mut self) -> Result<Span> {
        Ok(self.expect(&TokenKind::Semicolon, "expected ';'")?.span)
    }

    /// `import name`, `import name from 'source'`, or `import ./path/name.vx`
    fn import_clause(&mut self) -> Result<Import> {
        let start = self.advance().span; // consume 'import'

        if let TokenKind::ImportPath(path) = &self.peek().kind {
            let path = path.clone();
            let span = self.advance().span;
            let stem = path
                .rsplit('/')
                .next()
                .and_then(|file| file.strip_suffix(".vx"))
                .unwrap_or_default();

            if !is_identifier(stem) {
                return Err(VortexError::syntax(
                    format!("cannot name module from '{}', use 'import name from' instead", path),
                    span,
                ));
            }

            return Ok(Import {
                name: Ident::new(stem, span),
                source: Some((path, span)),
                span: start.to(span),
            });
        }

        let name = self.ident("expected module name after 'import'")?;
        let mut end = name.span;

        let source = if self.match_token(&TokenKind::From) {
            match &self.peek().kind {
                TokenKind::String(s) => {
                    let s = s.clone();
                    let span = self.advance().span;
                    end = span;
                    Some((s, span))
                }
                _ => return Err(self.error_here("expected source string after 'from'")),
            }
        } else {
            None
        };

        Ok(Import {
            name,
            source,
            span: start.to(end),
        })
    }

    // ==================== Expressions ====================

    fn expression(&mut self) -> Result<Expr> {
        ensure_sufficient_stack(|| self.assignment())
    }

    fn assignment(&mut self) -> Result<Expr> {
        let target = self.or_expr()?;

        let op = match self.peek().kind {
            TokenKind::ColonEqual => AssignOp::Create,
            TokenKind::Equal => AssignOp::Set,
            TokenKind::PlusEqual => AssignOp::Compound(BinaryOp::Add),
            TokenKind::MinusEqual => AssignOp::Compound(BinaryOp::Sub),
            TokenKind::StarEqual => AssignOp::Compound(BinaryOp::Mul),
            TokenKind::StarStarEqual => AssignOp::Compound(BinaryOp::Pow),
            TokenKind::SlashEqual => AssignOp::Compound(BinaryOp::Div),
            TokenKind::PercentEqual => AssignOp::Compound(BinaryOp::Mod),
            TokenKind::ShlEqual => AssignOp::Compound(BinaryOp::Shl),
            TokenKind::ShrEqual => AssignOp::Compound(BinaryOp::Shr),
            TokenKind::AmpEqual => AssignOp::Compound(BinaryOp::BitAnd),
            TokenKind::AmpAmpEqual => AssignOp::Compound(BinaryOp::And),
            TokenKind::PipeEqual => AssignOp::Compound(BinaryOp::BitOr),
            TokenKind::PipePipeEqual => AssignOp::Compound(BinaryOp::Or),
            TokenKind::CaretEqual => AssignOp::Compound(BinaryOp::BitXor),
            TokenKind::PlusPlusEqual => AssignOp::Compound(BinaryOp::Concat),
            _ => return Ok(target),
        };
        self.advance();

        let value = self.assignment()?;
        let span = target.span().to(value.span());

        Ok(Expr::Assign {
            target: Box::new(target),
            op,
            value: Box::new(value),
            span,
        })
    }

    /// One left-associative precedence level.
    fn binary_level(
        &mut self,
        ops: &[(TokenKind, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr>,
    ) -> Result<Expr> {
        let mut left = next(self)?;

        'chain: loop {
            for (kind, op) in ops {
                if self.match_token(kind) {
                    let right = next(self)?;
                    let span = left.span().to(right.span());
                    left = Expr::Binary {
                        left: Box::new(left),
                        op: *op,
                        right: Box::new(right),
                        span,
                    };
                    continue 'chain;
                }
            }
            break;
        }

        Ok(left)
    }

    fn or_expr(&mut self) -> Result<Expr> {
        self.binary_level(&[(TokenKind::PipePipe, BinaryOp::Or)], Self::and_expr)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        self.binary_level(&[(TokenKind::AmpAmp, BinaryOp::And)], Self::bit_or)
    }

    fn bit_or(&mut self) -> Result<Expr> {
        self.binary_level(&[(TokenKind::Pipe, BinaryOp::BitOr)], Self::bit_xor)
    }

    fn bit_xor(&mut self) -> Result<Expr> {
        self.binary_level(&[(TokenKind::Caret, BinaryOp::BitXor)], Self::bit_and)
    }

    fn bit_and(&mut self) -> Result<Expr> {
        self.binary_level(&[(TokenKind::Amp, BinaryOp::BitAnd)], Self::equality)
    }

    fn equality(&mut self) -> Result<Expr> {
        self.binary_level(
            &[
                (TokenKind::EqualEqual, BinaryOp::Eq),
                (TokenKind::BangEqual, BinaryOp::Ne),
            ],
            Self::comparison,
        )
    }

    fn comparison(&mut self) -> Result<Expr> {
        self.binary_level(
            &[
                (TokenKind::Less, BinaryOp::Lt),
                (TokenKind::LessEqual, BinaryOp::Le),
                (TokenKind::Greater, BinaryOp::Gt),
                (TokenKind::GreaterEqual, BinaryOp::Ge),
            ],
            Self::shift,
        )
    }

    fn shift(&mut self) -> Result<Expr> {
        self.binary_level(
            &[
                (TokenKind::Shl, BinaryOp::Shl),
                (TokenKind::Shr, BinaryOp::Shr),
            ],
            Self::term,
        )
    }

    fn term(&mut self) -> Result<Expr> {
        self.binary_level(
            &[
                (TokenKind::Plus, BinaryOp::Add),
                (TokenKind::Minus, BinaryOp::Sub),
                (TokenKind::PlusPlus, BinaryOp::Concat),
            ],
            Self::factor,
        )
    }

    fn factor(&mut self) -> Result<Expr> {
        self.binary_level(
            &[
                (TokenKind::Star, BinaryOp::Mul),
                (TokenKind::Slash, BinaryOp::Div),
                (TokenKind::Percent, BinaryOp::Mod),
            ],
            Self::power,
        )
    }

    /// `**` is right associative.
    fn power(&mut self) -> Result<Expr> {
        let base = self.unary()?;

        if self.match_token(&TokenKind::StarStar) {
            let exponent = self.power()?;
            let span = base.span().to(exponent.span());
            return Ok(Expr::Binary {
                left: Box::new(base),
                op: BinaryOp::Pow,
                right: Box::new(exponent),
                span,
            });
        }

        Ok(base)
    }

    fn unary(&mut self) -> Result<Expr> {
        let op = match self.peek().kind {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Plus => UnaryOp::Plus,
            TokenKind::Bang => UnaryOp::Not,
            _ => return self.postfix(),
        };

        let start = self.advance().span;
        let operand = ensure_sufficient_stack(|| self.unary())?;
        let span = start.to(operand.span());

        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
            span,
        })
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;

        loop {
            if self.match_token(&TokenKind::LeftParen) {
                expr = self.finish_call(expr)?;
            } else if self.match_token(&TokenKind::Dot) {
                let name = self.ident("expected field name after '.'")?;
                let span = expr.span().to(name.span);
                expr = Expr::Member {
                    object: Box::new(expr),
                    name,
                    span,
                };
            } else if self.match_token(&TokenKind::LeftBracket) {
                let index = self.expression()?;
                let end = self
                    .expect(&TokenKind::RightBracket, "expected ']' after subscript")?
                    .span;
                let span = expr.span().to(end);
                expr = Expr::Subscript {
                    object: Box::new(expr),
                    index: Box::new(index),
                    span,
                };
            } else if self.check(&TokenKind::Colon)
                && matches!(self.peek_next().map(|t| &t.kind), Some(TokenKind::Ident(_)))
            {
                self.advance(); // consume ':'
                let name = self.ident("expected method name after ':'")?;
                let span = expr.span().to(name.span);
                expr = Expr::MethodLookup {
                    base: Box::new(expr),
                    name,
                    span,
                };
            } else if let Some(op) = self.postfix_inc_dec() {
                let end = self.advance().span;
                let span = expr.span().to(end);
                expr = Expr::IncDec {
                    target: Box::new(expr),
                    op,
                    span,
                };
            } else {
                break;
            }
        }

        Ok(expr)
    }

    /// `x++` is an increment only when nothing follows it; otherwise `++` is
    /// concatenation.
    fn postfix_inc_dec(&self) -> Option<IncDecOp> {
        let op = match self.peek().kind {
            TokenKind::PlusPlus => IncDecOp::Inc,
            TokenKind::MinusMinus => IncDecOp::Dec,
            _ => return None,
        };

        let ends = matches!(
            self.peek_next().map(|t| &t.kind),
            Some(
                TokenKind::Semicolon
                    | TokenKind::RightParen
                    | TokenKind::RightBracket
                    | TokenKind::RightBrace
                    | TokenKind::Comma
                    | TokenKind::Eof
            )
        );

        ends.then_some(op)
    }

    fn finish_call(&mut self, callee: Expr) -> Result<Expr> {
        let mut args = Vec::new();

        while !self.check(&TokenKind::RightParen) && !self.is_at_end() {
            // A lone operator is an operator value: xs:reduce(+)
            let bare = binary_op_of(&self.peek().kind).filter(|_| {
                matches!(
                    self.peek_next().map(|t| &t.kind),
                    Some(TokenKind::Comma | TokenKind::RightParen)
                )
            });

            match bare {
                Some(op) => {
                    let span = self.advance().span;
                    args.push(Expr::Operator { op, span });
                }
                None => args.push(self.expression()?),
            }

            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }

        let end = self
            .expect(&TokenKind::RightParen, "expected ')' after arguments")?
            .span;
        let span = callee.span().to(end);

        Ok(Expr::Call {
            callee: Box::new(callee),
            args,
            span,
        })
    }

    /// Comma separated expressions up to (not including) `close`. Trailing
    /// commas are allowed.
    fn comma_list(&mut self, close: &TokenKind) -> Result<Vec<Expr>> {
        let mut items = Vec::new();

        while !self.check(close) && !self.is_at_end() {
            items.push(self.expression()?);
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }

        Ok(items)
    }

    fn primary(&mut self) -> Result<Expr> {
        let token = self.peek().clone();

        match &token.kind {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Number {
                    value: *n,
                    span: token.span,
                })
            }
            TokenKind::String(s) => {
                self.advance();
                Ok(Expr::String {
                    value: s.clone(),
                    span: token.span,
                })
            }
            TokenKind::True | TokenKind::False => {
                self.advance();
                Ok(Expr::Bool {
                    value: token.kind == TokenKind::True,
                    span: token.span,
                })
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::Null { span: token.span })
            }
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Expr::Ident(Ident::new(name.clone(), token.span)))
            }
            TokenKind::LeftParen => {
                if let Some(op) = self.operator_value() {
                    self.advance(); // (
                    self.advance(); // operator
                    let end = self.advance().span; // )
                    return Ok(Expr::Operator {
                        op,
                        span: token.span.to(end),
                    });
                }

                self.advance();
                let expr = self.expression()?;
                self.expect(&TokenKind::RightParen, "expected ')' after expression")?;
                Ok(expr)
            }
            TokenKind::LeftBracket => {
                self.advance();
                let items = self.comma_list(&TokenKind::RightBracket)?;
                let end = self
                    .expect(&TokenKind::RightBracket, "expected ']' after array items")?
                    .span;
                Ok(Expr::Array {
                    items,
                    span: token.span.to(end),
                })
            }
            TokenKind::LeftBrace => self.object_literal(),
            TokenKind::Func => self.func_expression(),
            TokenKind::Switch => self.switch_expression(),
            TokenKind::Import => Ok(Expr::Import(Rc::new(self.import_clause()?))),
            _ => Err(self.error_here("expected expression")),
        }
    }

    /// `(op)` where op is a binary operator.
    fn operator_value(&self) -> Option<BinaryOp> {
        let closes = matches!(
            self.tokens.get(self.current + 2).map(|t| &t.kind),
            Some(TokenKind::RightParen)
        );
        if !closes {
            return None;
        }

        binary_op_of(&self.peek_next()?.kind)
    }

    fn object_literal(&mut self) -> Result<Expr> {
        let start = self.advance().span; // consume '{'
        let mut entries = Vec::new();

        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            let token = self.advance().clone();

            let (key, quoted) = match token.kind {
                TokenKind::Ident(name) => (Ident::new(name, token.span), false),
                TokenKind::String(name) => (Ident::new(name, token.span), true),
                _ => {
                    return Err(VortexError::syntax(
                        format!("expected object key, got '{}'", token.kind),
                        token.span,
                    ))
                }
            };

            let value = if self.match_token(&TokenKind::Colon) {
                self.expression()?
            } else if quoted {
                return Err(self.error_here("expected ':' after quoted key"));
            } else {
                Expr::Ident(key.clone())
            };

            entries.push((key, value));

            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }

        let end = self
            .expect(&TokenKind::RightBrace, "expected '}' after object entries")?
            .span;

        Ok(Expr::Object {
            entries,
            span: start.to(end),
        })
    }

    fn func_expression(&mut self) -> Result<Expr> {
        let start = self.advance().span; // consume 'func'

        let name = if matches!(self.peek().kind, TokenKind::Ident(_)) {
            Some(self.ident("expected function name")?)
        } else {
            None
        };

        self.expect(&TokenKind::LeftParen, "expected '(' before parameters")?;
        let params = self.comma_list(&TokenKind::RightParen)?;
        self.expect(&TokenKind::RightParen, "expected ')' after parameters")?;

        let body = if self.match_token(&TokenKind::FatArrow) {
            FuncBody::Expr(Box::new(self.expression()?))
        } else {
            FuncBody::Block(self.block()?)
        };

        let end = match &body {
            FuncBody::Block(block) => block.span,
            FuncBody::Expr(expr) => expr.span(),
        };

        Ok(Expr::Func(Rc::new(FuncExpr {
            name,
            params,
            body,
            span: start.to(end),
        })))
    }

    fn switch_expression(&mut self) -> Result<Expr> {
        let start = self.advance().span; // consume 'switch'

        let subject = if self.match_token(&TokenKind::LeftParen) {
            let subject = self.expression()?;
            self.expect(&TokenKind::RightParen, "expected ')' after switch subject")?;
            Some(Box::new(subject))
        } else {
            None
        };

        self.expect(&TokenKind::LeftBrace, "expected '{' after switch")?;

        let mut cases = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            let test = self.expression()?;
            self.expect(&TokenKind::FatArrow, "expected '=>' after switch case")?;
            let value = self.expression()?;
            cases.push(SwitchCase { test, value });

            if !self.match_token(&TokenKind::Semicolon) {
                break;
            }
        }

        let end = self
            .expect(&TokenKind::RightBrace, "expected '}' after switch cases")?
            .span;

        Ok(Expr::Switch {
            subject,
            cases,
            span: start.to(end),
        })
    }

    // ==================== Helpers ====================

    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn peek_next(&self) -> Option<&Token> {
        self.tokens.get(self.current + 1)
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }

    fn previous_or_eof_span(&self) -> Span {
        if self.current == 0 {
            self.peek().span
        } else {
            self.previous().span
        }
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind)
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, message: &str) -> Result<&Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error_here(message))
        }
    }

    fn ident(&mut self, message: &str) -> Result<Ident> {
        if let TokenKind::Ident(name) = &self.peek().kind {
            let ident = Ident::new(name.clone(), self.peek().span);
            self.advance();
            Ok(ident)
        } else {
            Err(self.error_here(message))
        }
    }

    fn error_here(&self, message: &str) -> VortexError {
        VortexError::syntax(
            format!("{}, got '{}'", message, self.peek().kind),
            self.peek().span,
        )
    }
}

/// The binary operator a token spells, if any.
fn binary_op_of(kind: &TokenKind) -> Option<BinaryOp> {
    let op = match kind {
        TokenKind::Plus => BinaryOp::Add,
        TokenKind::Minus => BinaryOp::Sub,
        TokenKind::Star => BinaryOp::Mul,
        TokenKind::Slash => BinaryOp::Div,
        TokenKind::Percent => BinaryOp::Mod,
        TokenKind::StarStar => BinaryOp::Pow,
        TokenKind::PlusPlus => BinaryOp::Concat,
        TokenKind::Shl => BinaryOp::Shl,
        TokenKind::Shr => BinaryOp::Shr,
        TokenKind::Amp => BinaryOp::BitAnd,
        TokenKind::Pipe => BinaryOp::BitOr,
        TokenKind::Caret => BinaryOp::BitXor,
        TokenKind::AmpAmp => BinaryOp::And,
        TokenKind::PipePipe => BinaryOp::Or,
        TokenKind::EqualEqual => BinaryOp::Eq,
        TokenKind::BangEqual => BinaryOp::Ne,
        TokenKind::Less => BinaryOp::Lt,
        TokenKind::LessEqual => BinaryOp::Le,
        TokenKind::Greater => BinaryOp::Gt,
        TokenKind::GreaterEqual => BinaryOp::Ge,
        _ => return None,
    };

    Some(op)
}
