//! Recursive-descent parser producing the [`Program`] AST.

use std::rc::Rc;

use super::ast::*;
use super::lexer::{Kw, Lexer, Op, Tok, Token};
use super::InterpreterError;

pub fn parse(source: &str) -> Result<Program, InterpreterError> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser { tokens, pos: 0 };
    parser.parse_program()
}

/// Parse a single expression (used for f-string interpolations).
pub fn parse_expression(source: &str) -> Result<Expr, InterpreterError> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_testlist()?;
    parser.skip_newlines();
    if !matches!(parser.peek(), Tok::EndOfFile) {
        return Err(parser.error("unexpected trailing tokens in expression"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].tok
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)].tok
    }

    fn line(&self) -> u32 {
        self.tokens[self.pos.min(self.tokens.len() - 1)].line
    }

    fn advance(&mut self) -> Tok {
        let tok = self.tokens[self.pos.min(self.tokens.len() - 1)].tok.clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn error(&self, message: impl Into<String>) -> InterpreterError {
        InterpreterError::syntax(self.line(), message)
    }

    fn eat_op(&mut self, op: Op) -> bool {
        if *self.peek() == Tok::Op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: Op) -> Result<(), InterpreterError> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(format!("expected {:?}, found {:?}", op, self.peek())))
        }
    }

    fn eat_kw(&mut self, kw: Kw) -> bool {
        if *self.peek() == Tok::Keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_kw(&mut self, kw: Kw) -> Result<(), InterpreterError> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected {:?}, found {:?}", kw, self.peek())))
        }
    }

    fn expect_name(&mut self) -> Result<String, InterpreterError> {
        match self.advance() {
            Tok::Name(name) => Ok(name),
            other => Err(self.error(format!("expected identifier, found {:?}", other))),
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), Tok::Newline) {
            self.advance();
        }
    }

    fn expect_newline(&mut self) -> Result<(), InterpreterError> {
        match self.peek() {
            Tok::Newline => {
                self.advance();
                Ok(())
            }
            Tok::EndOfFile | Tok::Dedent => Ok(()),
            Tok::Op(Op::Semicolon) => {
                self.advance();
                Ok(())
            }
            other => Err(self.error(format!("expected end of statement, found {:?}", other))),
        }
    }

    fn parse_program(&mut self) -> Result<Program, InterpreterError> {
        let mut body = Vec::new();
        self.skip_newlines();
        while !matches!(self.peek(), Tok::EndOfFile) {
            body.push(self.parse_statement()?);
            self.skip_newlines();
        }
        Ok(Program { body })
    }

    /// An indented statement block following a `:`.
    fn parse_block(&mut self) -> Result<Vec<Stmt>, InterpreterError> {
        self.expect_op(Op::Colon)?;
        if !matches!(self.peek(), Tok::Newline) {
            // single-line suite: `if x: y = 1`
            let mut body = vec![self.parse_simple_statement()?];
            while self.eat_op(Op::Semicolon) && !matches!(self.peek(), Tok::Newline | Tok::EndOfFile)
            {
                body.push(self.parse_simple_statement()?);
            }
            self.expect_newline()?;
            return Ok(body);
        }
        self.advance(); // newline
        self.skip_newlines();
        if !matches!(self.peek(), Tok::Indent) {
            return Err(self.error("expected an indented block"));
        }
        self.advance();
        let mut body = Vec::new();
        self.skip_newlines();
        while !matches!(self.peek(), Tok::Dedent | Tok::EndOfFile) {
            body.push(self.parse_statement()?);
            self.skip_newlines();
        }
        if matches!(self.peek(), Tok::Dedent) {
            self.advance();
        }
        Ok(body)
    }

    fn parse_statement(&mut self) -> Result<Stmt, InterpreterError> {
        let line = self.line();
        match self.peek().clone() {
            Tok::Keyword(Kw::If) => self.parse_if(),
            Tok::Keyword(Kw::While) => self.parse_while(),
            Tok::Keyword(Kw::For) => self.parse_for(),
            Tok::Keyword(Kw::Def) => self.parse_funcdef(false),
            Tok::Keyword(Kw::Async) => {
                self.advance();
                match self.peek() {
                    Tok::Keyword(Kw::Def) => self.parse_funcdef(true),
                    Tok::Keyword(Kw::For) => self.parse_for(),
                    Tok::Keyword(Kw::With) => self.parse_with(),
                    _ => Err(self.error("expected 'def', 'for' or 'with' after 'async'")),
                }
            }
            Tok::Keyword(Kw::Class) => self.parse_classdef(),
            Tok::Keyword(Kw::Try) => self.parse_try(),
            Tok::Keyword(Kw::With) => self.parse_with(),
            Tok::Op(Op::At) => {
                // decorators are parsed and discarded; the bare function is kept
                while self.eat_op(Op::At) {
                    self.parse_test()?;
                    self.expect_newline()?;
                    self.skip_newlines();
                }
                let is_async = self.eat_kw(Kw::Async);
                self.parse_funcdef(is_async)
            }
            _ => {
                let stmt = self.parse_simple_statement()?;
                // additional `;`-separated statements on the same line are
                // folded into the surrounding block by the caller loop
                if self.eat_op(Op::Semicolon) {
                    if matches!(self.peek(), Tok::Newline | Tok::EndOfFile) {
                        self.expect_newline()?;
                        return Ok(stmt);
                    }
                    // wrap the rest of the line into a synthetic block
                    let mut body = vec![stmt];
                    loop {
                        body.push(self.parse_simple_statement()?);
                        if !self.eat_op(Op::Semicolon)
                            || matches!(self.peek(), Tok::Newline | Tok::EndOfFile)
                        {
                            break;
                        }
                    }
                    self.expect_newline()?;
                    return Ok(Stmt {
                        line,
                        kind: StmtKind::If {
                            cond: Expr {
                                line,
                                kind: ExprKind::Bool(true),
                            },
                            body,
                            orelse: Vec::new(),
                        },
                    });
                }
                self.expect_newline()?;
                Ok(stmt)
            }
        }
    }

    fn parse_simple_statement(&mut self) -> Result<Stmt, InterpreterError> {
        let line = self.line();
        let kind = match self.peek().clone() {
            Tok::Keyword(Kw::Return) => {
                self.advance();
                if matches!(self.peek(), Tok::Newline | Tok::EndOfFile | Tok::Op(Op::Semicolon)) {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.parse_testlist()?))
                }
            }
            Tok::Keyword(Kw::Break) => {
                self.advance();
                StmtKind::Break
            }
            Tok::Keyword(Kw::Continue) => {
                self.advance();
                StmtKind::Continue
            }
            Tok::Keyword(Kw::Pass) => {
                self.advance();
                StmtKind::Pass
            }
            Tok::Keyword(Kw::Import) => {
                self.advance();
                let module = self.parse_dotted_name()?;
                let alias = if self.eat_kw(Kw::As) {
                    Some(self.expect_name()?)
                } else {
                    None
                };
                StmtKind::Import { module, alias }
            }
            Tok::Keyword(Kw::From) => {
                self.advance();
                let module = self.parse_dotted_name()?;
                self.expect_kw(Kw::Import)?;
                let mut names = Vec::new();
                if self.eat_op(Op::Star) {
                    names.push(("*".to_string(), None));
                } else {
                    let parenthesized = self.eat_op(Op::LParen);
                    loop {
                        let name = self.expect_name()?;
                        let alias = if self.eat_kw(Kw::As) {
                            Some(self.expect_name()?)
                        } else {
                            None
                        };
                        names.push((name, alias));
                        if !self.eat_op(Op::Comma) {
                            break;
                        }
                    }
                    if parenthesized {
                        self.expect_op(Op::RParen)?;
                    }
                }
                StmtKind::FromImport { module, names }
            }
            Tok::Keyword(Kw::Raise) => {
                self.advance();
                if matches!(self.peek(), Tok::Newline | Tok::EndOfFile | Tok::Op(Op::Semicolon)) {
                    StmtKind::Raise { exc: None }
                } else {
                    let exc = self.parse_test()?;
                    // `raise X from Y` — the cause is parsed and discarded
                    if self.eat_kw(Kw::From) {
                        self.parse_test()?;
                    }
                    StmtKind::Raise { exc: Some(exc) }
                }
            }
            Tok::Keyword(Kw::Assert) => {
                self.advance();
                let test = self.parse_test()?;
                let msg = if self.eat_op(Op::Comma) {
                    Some(self.parse_test()?)
                } else {
                    None
                };
                StmtKind::Assert { test, msg }
            }
            Tok::Keyword(Kw::Del) => {
                self.advance();
                let mut targets = vec![self.parse_test()?];
                while self.eat_op(Op::Comma) {
                    targets.push(self.parse_test()?);
                }
                StmtKind::Del(targets)
            }
            Tok::Keyword(Kw::Global) => {
                self.advance();
                let mut names = vec![self.expect_name()?];
                while self.eat_op(Op::Comma) {
                    names.push(self.expect_name()?);
                }
                StmtKind::Global(names)
            }
            _ => return self.parse_expr_statement(),
        };
        Ok(Stmt { line, kind })
    }

    fn parse_expr_statement(&mut self) -> Result<Stmt, InterpreterError> {
        let line = self.line();
        let first = self.parse_testlist()?;

        // augmented assignment
        let aug_op = match self.peek() {
            Tok::Op(Op::PlusAssign) => Some(BinOp::Add),
            Tok::Op(Op::MinusAssign) => Some(BinOp::Sub),
            Tok::Op(Op::StarAssign) => Some(BinOp::Mul),
            Tok::Op(Op::SlashAssign) => Some(BinOp::Div),
            Tok::Op(Op::DoubleSlashAssign) => Some(BinOp::FloorDiv),
            Tok::Op(Op::PercentAssign) => Some(BinOp::Mod),
            Tok::Op(Op::DoubleStarAssign) => Some(BinOp::Pow),
            Tok::Op(Op::AmpAssign) => Some(BinOp::BitAnd),
            Tok::Op(Op::PipeAssign) => Some(BinOp::BitOr),
            Tok::Op(Op::CaretAssign) => Some(BinOp::BitXor),
            _ => None,
        };
        if let Some(op) = aug_op {
            self.advance();
            let value = self.parse_testlist()?;
            return Ok(Stmt {
                line,
                kind: StmtKind::AugAssign {
                    target: first,
                    op,
                    value,
                },
            });
        }

        // chained assignment: a = b = expr
        if *self.peek() == Tok::Op(Op::Assign) {
            let mut targets = vec![first];
            let mut value;
            loop {
                self.advance();
                value = self.parse_testlist()?;
                if *self.peek() == Tok::Op(Op::Assign) {
                    targets.push(value);
                } else {
                    break;
                }
            }
            // type annotations `x: int = v` are not supported; `:` ends up a
            // syntax error earlier, which is intentional for this subset
            return Ok(Stmt {
                line,
                kind: StmtKind::Assign { targets, value },
            });
        }

        Ok(Stmt {
            line,
            kind: StmtKind::Expr(first),
        })
    }

    fn parse_dotted_name(&mut self) -> Result<String, InterpreterError> {
        let mut name = self.expect_name()?;
        while self.eat_op(Op::Dot) {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn parse_if(&mut self) -> Result<Stmt, InterpreterError> {
        let line = self.line();
        self.expect_kw(Kw::If)?;
        let cond = self.parse_test()?;
        let body = self.parse_block()?;
        self.skip_newlines();
        let orelse = if self.eat_kw(Kw::Elif) {
            // rebuild an `if` from the elif chain
            self.pos -= 1;
            self.tokens[self.pos] = Token {
                tok: Tok::Keyword(Kw::If),
                line: self.line(),
            };
            vec![self.parse_if()?]
        } else if self.eat_kw(Kw::Else) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            line,
            kind: StmtKind::If { cond, body, orelse },
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, InterpreterError> {
        let line = self.line();
        self.expect_kw(Kw::While)?;
        let cond = self.parse_test()?;
        let body = self.parse_block()?;
        self.skip_newlines();
        let orelse = if self.eat_kw(Kw::Else) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            line,
            kind: StmtKind::While { cond, body, orelse },
        })
    }

    fn parse_for(&mut self) -> Result<Stmt, InterpreterError> {
        let line = self.line();
        self.expect_kw(Kw::For)?;
        let target = self.parse_target_list()?;
        self.expect_kw(Kw::In)?;
        let iter = self.parse_testlist()?;
        let body = self.parse_block()?;
        self.skip_newlines();
        let orelse = if self.eat_kw(Kw::Else) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            line,
            kind: StmtKind::For {
                target,
                iter,
                body,
                orelse,
            },
        })
    }

    fn parse_funcdef(&mut self, is_async: bool) -> Result<Stmt, InterpreterError> {
        let line = self.line();
        self.expect_kw(Kw::Def)?;
        let name = self.expect_name()?;
        self.expect_op(Op::LParen)?;
        let params = self.parse_params()?;
        self.expect_op(Op::RParen)?;
        if self.eat_op(Op::Arrow) {
            self.parse_test()?; // return annotation, discarded
        }
        let body = self.parse_block()?;
        let docstring = match body.first() {
            Some(Stmt {
                kind: StmtKind::Expr(Expr {
                    kind: ExprKind::Str(s),
                    ..
                }),
                ..
            }) => Some(s.clone()),
            _ => None,
        };
        Ok(Stmt {
            line,
            kind: StmtKind::FuncDef(Rc::new(FuncDecl {
                name,
                params,
                body,
                is_async,
                docstring,
            })),
        })
    }

    fn parse_params(&mut self) -> Result<Params, InterpreterError> {
        let mut params = Params::default();
        loop {
            match self.peek().clone() {
                Tok::Op(Op::RParen) => break,
                Tok::Op(Op::Star) => {
                    self.advance();
                    if let Tok::Name(_) = self.peek() {
                        params.vararg = Some(self.expect_name()?);
                    }
                    // bare `*` (keyword-only marker) is tolerated
                }
                Tok::Op(Op::DoubleStar) => {
                    self.advance();
                    params.kwarg = Some(self.expect_name()?);
                }
                Tok::Name(_) => {
                    let name = self.expect_name()?;
                    if self.eat_op(Op::Colon) {
                        self.parse_test()?; // annotation, discarded
                    }
                    params.names.push(name);
                    if self.eat_op(Op::Assign) {
                        params.defaults.push(self.parse_test()?);
                    } else if !params.defaults.is_empty() {
                        return Err(self.error("non-default argument follows default argument"));
                    }
                }
                other => return Err(self.error(format!("unexpected token in parameter list: {:?}", other))),
            }
            if !self.eat_op(Op::Comma) {
                break;
            }
        }
        Ok(params)
    }

    fn parse_classdef(&mut self) -> Result<Stmt, InterpreterError> {
        let line = self.line();
        self.expect_kw(Kw::Class)?;
        let name = self.expect_name()?;
        let mut bases = Vec::new();
        if self.eat_op(Op::LParen) {
            while !matches!(self.peek(), Tok::Op(Op::RParen)) {
                bases.push(self.parse_test()?);
                if !self.eat_op(Op::Comma) {
                    break;
                }
            }
            self.expect_op(Op::RParen)?;
        }
        let body = self.parse_block()?;
        Ok(Stmt {
            line,
            kind: StmtKind::ClassDef { name, bases, body },
        })
    }

    fn parse_try(&mut self) -> Result<Stmt, InterpreterError> {
        let line = self.line();
        self.expect_kw(Kw::Try)?;
        let body = self.parse_block()?;
        self.skip_newlines();
        let mut handlers = Vec::new();
        while self.eat_kw(Kw::Except) {
            let mut kinds = Vec::new();
            let mut binding = None;
            if !matches!(self.peek(), Tok::Op(Op::Colon)) {
                if self.eat_op(Op::LParen) {
                    loop {
                        kinds.push(self.expect_name()?);
                        if !self.eat_op(Op::Comma) {
                            break;
                        }
                    }
                    self.expect_op(Op::RParen)?;
                } else {
                    kinds.push(self.expect_name()?);
                }
                if self.eat_kw(Kw::As) {
                    binding = Some(self.expect_name()?);
                }
            }
            let handler_body = self.parse_block()?;
            self.skip_newlines();
            handlers.push(ExceptHandler {
                kinds,
                binding,
                body: handler_body,
            });
        }
        let orelse = if self.eat_kw(Kw::Else) {
            let b = self.parse_block()?;
            self.skip_newlines();
            b
        } else {
            Vec::new()
        };
        let finally = if self.eat_kw(Kw::Finally) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finally.is_empty() {
            return Err(self.error("try statement must have at least one except or finally clause"));
        }
        Ok(Stmt {
            line,
            kind: StmtKind::Try {
                body,
                handlers,
                orelse,
                finally,
            },
        })
    }

    fn parse_with(&mut self) -> Result<Stmt, InterpreterError> {
        let line = self.line();
        self.expect_kw(Kw::With)?;
        let mut items = Vec::new();
        loop {
            let ctx = self.parse_test()?;
            let binding = if self.eat_kw(Kw::As) {
                Some(self.parse_target_list()?)
            } else {
                None
            };
            items.push((ctx, binding));
            if !self.eat_op(Op::Comma) {
                break;
            }
        }
        let body = self.parse_block()?;
        Ok(Stmt {
            line,
            kind: StmtKind::With { items, body },
        })
    }

    /// A for/with target: one or more names/subscripts, comma-joined into a
    /// tuple target.
    fn parse_target_list(&mut self) -> Result<Expr, InterpreterError> {
        let line = self.line();
        let first = self.parse_or_expr()?;
        if !matches!(self.peek(), Tok::Op(Op::Comma)) {
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.eat_op(Op::Comma) {
            if matches!(
                self.peek(),
                Tok::Keyword(Kw::In) | Tok::Op(Op::Colon) | Tok::Op(Op::Assign)
            ) {
                break;
            }
            elts.push(self.parse_or_expr()?);
        }
        Ok(Expr {
            line,
            kind: ExprKind::Tuple(elts),
        })
    }

    /// testlist: test (',' test)* — a bare comma list becomes a tuple.
    fn parse_testlist(&mut self) -> Result<Expr, InterpreterError> {
        let line = self.line();
        let first = self.parse_test()?;
        if !matches!(self.peek(), Tok::Op(Op::Comma)) {
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.eat_op(Op::Comma) {
            if matches!(
                self.peek(),
                Tok::Newline
                    | Tok::EndOfFile
                    | Tok::Op(Op::Assign)
                    | Tok::Op(Op::RParen)
                    | Tok::Op(Op::RBracket)
                    | Tok::Op(Op::RBrace)
                    | Tok::Op(Op::Colon)
                    | Tok::Op(Op::Semicolon)
            ) {
                break;
            }
            elts.push(self.parse_test()?);
        }
        Ok(Expr {
            line,
            kind: ExprKind::Tuple(elts),
        })
    }

    /// test: lambda | or_test ['if' or_test 'else' test]
    fn parse_test(&mut self) -> Result<Expr, InterpreterError> {
        if matches!(self.peek(), Tok::Keyword(Kw::Lambda)) {
            return self.parse_lambda();
        }
        let line = self.line();
        let expr = self.parse_or_test()?;
        if self.eat_kw(Kw::If) {
            let cond = self.parse_or_test()?;
            self.expect_kw(Kw::Else)?;
            let orelse = self.parse_test()?;
            return Ok(Expr {
                line,
                kind: ExprKind::IfExp {
                    cond: Box::new(cond),
                    then: Box::new(expr),
                    orelse: Box::new(orelse),
                },
            });
        }
        Ok(expr)
    }

    fn parse_lambda(&mut self) -> Result<Expr, InterpreterError> {
        let line = self.line();
        self.expect_kw(Kw::Lambda)?;
        let mut params = Params::default();
        if !matches!(self.peek(), Tok::Op(Op::Colon)) {
            loop {
                match self.peek().clone() {
                    Tok::Op(Op::Star) => {
                        self.advance();
                        params.vararg = Some(self.expect_name()?);
                    }
                    Tok::Op(Op::DoubleStar) => {
                        self.advance();
                        params.kwarg = Some(self.expect_name()?);
                    }
                    _ => {
                        let name = self.expect_name()?;
                        params.names.push(name);
                        if self.eat_op(Op::Assign) {
                            params.defaults.push(self.parse_test()?);
                        }
                    }
                }
                if !self.eat_op(Op::Comma) {
                    break;
                }
            }
        }
        self.expect_op(Op::Colon)?;
        let body = self.parse_test()?;
        Ok(Expr {
            line,
            kind: ExprKind::Lambda {
                params: Rc::new(params),
                body: Rc::new(body),
            },
        })
    }

    fn parse_or_test(&mut self) -> Result<Expr, InterpreterError> {
        let line = self.line();
        let first = self.parse_and_test()?;
        if !matches!(self.peek(), Tok::Keyword(Kw::Or)) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_kw(Kw::Or) {
            values.push(self.parse_and_test()?);
        }
        Ok(Expr {
            line,
            kind: ExprKind::BoolOp {
                op: BoolOpKind::Or,
                values,
            },
        })
    }

    fn parse_and_test(&mut self) -> Result<Expr, InterpreterError> {
        let line = self.line();
        let first = self.parse_not_test()?;
        if !matches!(self.peek(), Tok::Keyword(Kw::And)) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_kw(Kw::And) {
            values.push(self.parse_not_test()?);
        }
        Ok(Expr {
            line,
            kind: ExprKind::BoolOp {
                op: BoolOpKind::And,
                values,
            },
        })
    }

    fn parse_not_test(&mut self) -> Result<Expr, InterpreterError> {
        let line = self.line();
        if self.eat_kw(Kw::Not) {
            let operand = self.parse_not_test()?;
            return Ok(Expr {
                line,
                kind: ExprKind::UnaryOp {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, InterpreterError> {
        let line = self.line();
        let left = self.parse_or_expr()?;
        let mut ops = Vec::new();
        loop {
            let op = match self.peek() {
                Tok::Op(Op::EqEq) => CmpOp::Eq,
                Tok::Op(Op::NotEq) => CmpOp::NotEq,
                Tok::Op(Op::Lt) => CmpOp::Lt,
                Tok::Op(Op::LtE) => CmpOp::LtE,
                Tok::Op(Op::Gt) => CmpOp::Gt,
                Tok::Op(Op::GtE) => CmpOp::GtE,
                Tok::Keyword(Kw::In) => CmpOp::In,
                Tok::Keyword(Kw::Is) => {
                    self.advance();
                    let op = if self.eat_kw(Kw::Not) {
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    };
                    ops.push((op, self.parse_or_expr()?));
                    continue;
                }
                Tok::Keyword(Kw::Not) if *self.peek_at(1) == Tok::Keyword(Kw::In) => {
                    self.advance();
                    self.advance();
                    ops.push((CmpOp::NotIn, self.parse_or_expr()?));
                    continue;
                }
                _ => break,
            };
            self.advance();
            ops.push((op, self.parse_or_expr()?));
        }
        if ops.is_empty() {
            Ok(left)
        } else {
            Ok(Expr {
                line,
                kind: ExprKind::Compare {
                    left: Box::new(left),
                    ops,
                },
            })
        }
    }

    fn parse_or_expr(&mut self) -> Result<Expr, InterpreterError> {
        let mut left = self.parse_xor_expr()?;
        while *self.peek() == Tok::Op(Op::Pipe) {
            let line = self.line();
            self.advance();
            let right = self.parse_xor_expr()?;
            left = bin(line, left, BinOp::BitOr, right);
        }
        Ok(left)
    }

    fn parse_xor_expr(&mut self) -> Result<Expr, InterpreterError> {
        let mut left = self.parse_and_expr()?;
        while *self.peek() == Tok::Op(Op::Caret) {
            let line = self.line();
            self.advance();
            let right = self.parse_and_expr()?;
            left = bin(line, left, BinOp::BitXor, right);
        }
        Ok(left)
    }

    fn parse_and_expr(&mut self) -> Result<Expr, InterpreterError> {
        let mut left = self.parse_shift_expr()?;
        while *self.peek() == Tok::Op(Op::Amp) {
            let line = self.line();
            self.advance();
            let right = self.parse_shift_expr()?;
            left = bin(line, left, BinOp::BitAnd, right);
        }
        Ok(left)
    }

    fn parse_shift_expr(&mut self) -> Result<Expr, InterpreterError> {
        let mut left = self.parse_arith_expr()?;
        loop {
            let op = match self.peek() {
                Tok::Op(Op::LShift) => BinOp::LShift,
                Tok::Op(Op::RShift) => BinOp::RShift,
                _ => break,
            };
            let line = self.line();
            self.advance();
            let right = self.parse_arith_expr()?;
            left = bin(line, left, op, right);
        }
        Ok(left)
    }

    fn parse_arith_expr(&mut self) -> Result<Expr, InterpreterError> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Tok::Op(Op::Plus) => BinOp::Add,
                Tok::Op(Op::Minus) => BinOp::Sub,
                _ => break,
            };
            let line = self.line();
            self.advance();
            let right = self.parse_term()?;
            left = bin(line, left, op, right);
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, InterpreterError> {
        let mut left = self.parse_factor()?;
        loop {
            let op = match self.peek() {
                Tok::Op(Op::Star) => BinOp::Mul,
                Tok::Op(Op::Slash) => BinOp::Div,
                Tok::Op(Op::DoubleSlash) => BinOp::FloorDiv,
                Tok::Op(Op::Percent) => BinOp::Mod,
                Tok::Op(Op::At) => return Err(self.error("matrix multiplication is not supported")),
                _ => break,
            };
            let line = self.line();
            self.advance();
            let right = self.parse_factor()?;
            left = bin(line, left, op, right);
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Expr, InterpreterError> {
        let line = self.line();
        let op = match self.peek() {
            Tok::Op(Op::Minus) => Some(UnaryOp::Neg),
            Tok::Op(Op::Plus) => Some(UnaryOp::Pos),
            Tok::Op(Op::Tilde) => Some(UnaryOp::Invert),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_factor()?;
            return Ok(Expr {
                line,
                kind: ExprKind::UnaryOp {
                    op,
                    operand: Box::new(operand),
                },
            });
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr, InterpreterError> {
        let left = self.parse_unary_postfix()?;
        if *self.peek() == Tok::Op(Op::DoubleStar) {
            let line = self.line();
            self.advance();
            // right-associative
            let right = self.parse_factor()?;
            return Ok(bin(line, left, BinOp::Pow, right));
        }
        Ok(left)
    }

    fn parse_unary_postfix(&mut self) -> Result<Expr, InterpreterError> {
        if matches!(self.peek(), Tok::Keyword(Kw::Await)) {
            let line = self.line();
            self.advance();
            let value = self.parse_unary_postfix()?;
            return Ok(Expr {
                line,
                kind: ExprKind::Await(Box::new(value)),
            });
        }
        let mut expr = self.parse_atom()?;
        loop {
            match self.peek() {
                Tok::Op(Op::LParen) => {
                    let line = self.line();
                    self.advance();
                    let args = self.parse_call_args()?;
                    expr = Expr {
                        line,
                        kind: ExprKind::Call {
                            func: Box::new(expr),
                            args,
                        },
                    };
                }
                Tok::Op(Op::LBracket) => {
                    let line = self.line();
                    self.advance();
                    let index = self.parse_subscript()?;
                    self.expect_op(Op::RBracket)?;
                    expr = Expr {
                        line,
                        kind: ExprKind::Subscript {
                            value: Box::new(expr),
                            index: Box::new(index),
                        },
                    };
                }
                Tok::Op(Op::Dot) => {
                    let line = self.line();
                    self.advance();
                    let attr = self.expect_name()?;
                    expr = Expr {
                        line,
                        kind: ExprKind::Attribute {
                            value: Box::new(expr),
                            attr,
                        },
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> Result<Vec<CallArg>, InterpreterError> {
        let mut args = Vec::new();
        while !matches!(self.peek(), Tok::Op(Op::RParen)) {
            match self.peek().clone() {
                Tok::Op(Op::Star) => {
                    self.advance();
                    args.push(CallArg::Star(self.parse_test()?));
                }
                Tok::Op(Op::DoubleStar) => {
                    self.advance();
                    args.push(CallArg::DoubleStar(self.parse_test()?));
                }
                Tok::Name(name) if *self.peek_at(1) == Tok::Op(Op::Assign) => {
                    self.advance();
                    self.advance();
                    args.push(CallArg::Keyword(name, self.parse_test()?));
                }
                _ => {
                    let value = self.parse_test()?;
                    // generator argument: f(x for x in y)
                    if matches!(self.peek(), Tok::Keyword(Kw::For)) {
                        let generators = self.parse_comp_generators()?;
                        let line = value.line;
                        args.push(CallArg::Positional(Expr {
                            line,
                            kind: ExprKind::Comprehension {
                                kind: ComprehensionKind::Generator,
                                elt: vec![value],
                                generators,
                            },
                        }));
                    } else {
                        args.push(CallArg::Positional(value));
                    }
                }
            }
            if !self.eat_op(Op::Comma) {
                break;
            }
        }
        self.expect_op(Op::RParen)?;
        Ok(args)
    }

    fn parse_subscript(&mut self) -> Result<Expr, InterpreterError> {
        let line = self.line();
        let mut lower = None;
        if !matches!(self.peek(), Tok::Op(Op::Colon)) {
            let first = self.parse_test()?;
            if !matches!(self.peek(), Tok::Op(Op::Colon)) {
                // plain index; tuple indices like d[1, 2] parse as a tuple
                if self.eat_op(Op::Comma) {
                    let mut elts = vec![first];
                    while !matches!(self.peek(), Tok::Op(Op::RBracket)) {
                        elts.push(self.parse_test()?);
                        if !self.eat_op(Op::Comma) {
                            break;
                        }
                    }
                    return Ok(Expr {
                        line,
                        kind: ExprKind::Tuple(elts),
                    });
                }
                return Ok(first);
            }
            lower = Some(Box::new(first));
        }
        self.expect_op(Op::Colon)?;
        let mut upper = None;
        if !matches!(self.peek(), Tok::Op(Op::RBracket) | Tok::Op(Op::Colon)) {
            upper = Some(Box::new(self.parse_test()?));
        }
        let mut step = None;
        if self.eat_op(Op::Colon) && !matches!(self.peek(), Tok::Op(Op::RBracket)) {
            step = Some(Box::new(self.parse_test()?));
        }
        Ok(Expr {
            line,
            kind: ExprKind::Slice { lower, upper, step },
        })
    }

    fn parse_comp_generators(&mut self) -> Result<Vec<Generator>, InterpreterError> {
        let mut generators = Vec::new();
        while self.eat_kw(Kw::For) {
            let target = self.parse_target_list()?;
            self.expect_kw(Kw::In)?;
            let iter = self.parse_or_test()?;
            let mut ifs = Vec::new();
            while self.eat_kw(Kw::If) {
                ifs.push(self.parse_or_test()?);
            }
            generators.push(Generator { target, iter, ifs });
        }
        Ok(generators)
    }

    fn parse_atom(&mut self) -> Result<Expr, InterpreterError> {
        let line = self.line();
        match self.advance() {
            Tok::Int(v) => Ok(Expr {
                line,
                kind: ExprKind::Int(v),
            }),
            Tok::Float(v) => Ok(Expr {
                line,
                kind: ExprKind::Float(v),
            }),
            Tok::Str(mut s) => {
                // adjacent string literal concatenation
                while let Tok::Str(next) = self.peek() {
                    s.push_str(next);
                    self.advance();
                }
                Ok(Expr {
                    line,
                    kind: ExprKind::Str(s),
                })
            }
            Tok::FStr(body) => {
                let parts = parse_fstring_parts(&body, line)?;
                Ok(Expr {
                    line,
                    kind: ExprKind::FString(parts),
                })
            }
            Tok::Keyword(Kw::True) => Ok(Expr {
                line,
                kind: ExprKind::Bool(true),
            }),
            Tok::Keyword(Kw::False) => Ok(Expr {
                line,
                kind: ExprKind::Bool(false),
            }),
            Tok::Keyword(Kw::None) => Ok(Expr {
                line,
                kind: ExprKind::NoneLit,
            }),
            Tok::Name(name) => Ok(Expr {
                line,
                kind: ExprKind::Name(name),
            }),
            Tok::Keyword(Kw::Lambda) => {
                self.pos -= 1;
                self.parse_lambda()
            }
            Tok::Op(Op::LParen) => {
                if self.eat_op(Op::RParen) {
                    return Ok(Expr {
                        line,
                        kind: ExprKind::Tuple(Vec::new()),
                    });
                }
                let first = self.parse_test()?;
                if matches!(self.peek(), Tok::Keyword(Kw::For)) {
                    let generators = self.parse_comp_generators()?;
                    self.expect_op(Op::RParen)?;
                    return Ok(Expr {
                        line,
                        kind: ExprKind::Comprehension {
                            kind: ComprehensionKind::Generator,
                            elt: vec![first],
                            generators,
                        },
                    });
                }
                if matches!(self.peek(), Tok::Op(Op::Comma)) {
                    let mut elts = vec![first];
                    while self.eat_op(Op::Comma) {
                        if matches!(self.peek(), Tok::Op(Op::RParen)) {
                            break;
                        }
                        elts.push(self.parse_test()?);
                    }
                    self.expect_op(Op::RParen)?;
                    return Ok(Expr {
                        line,
                        kind: ExprKind::Tuple(elts),
                    });
                }
                self.expect_op(Op::RParen)?;
                Ok(first)
            }
            Tok::Op(Op::LBracket) => {
                if self.eat_op(Op::RBracket) {
                    return Ok(Expr {
                        line,
                        kind: ExprKind::List(Vec::new()),
                    });
                }
                let first = if matches!(self.peek(), Tok::Op(Op::Star)) {
                    self.advance();
                    Expr {
                        line,
                        kind: ExprKind::Starred(Box::new(self.parse_test()?)),
                    }
                } else {
                    self.parse_test()?
                };
                if matches!(self.peek(), Tok::Keyword(Kw::For)) {
                    let generators = self.parse_comp_generators()?;
                    self.expect_op(Op::RBracket)?;
                    return Ok(Expr {
                        line,
                        kind: ExprKind::Comprehension {
                            kind: ComprehensionKind::List,
                            elt: vec![first],
                            generators,
                        },
                    });
                }
                let mut elts = vec![first];
                while self.eat_op(Op::Comma) {
                    if matches!(self.peek(), Tok::Op(Op::RBracket)) {
                        break;
                    }
                    if matches!(self.peek(), Tok::Op(Op::Star)) {
                        self.advance();
                        elts.push(Expr {
                            line,
                            kind: ExprKind::Starred(Box::new(self.parse_test()?)),
                        });
                    } else {
                        elts.push(self.parse_test()?);
                    }
                }
                self.expect_op(Op::RBracket)?;
                Ok(Expr {
                    line,
                    kind: ExprKind::List(elts),
                })
            }
            Tok::Op(Op::LBrace) => {
                if self.eat_op(Op::RBrace) {
                    return Ok(Expr {
                        line,
                        kind: ExprKind::Dict {
                            keys: Vec::new(),
                            values: Vec::new(),
                        },
                    });
                }
                let first = self.parse_test()?;
                if self.eat_op(Op::Colon) {
                    let first_value = self.parse_test()?;
                    if matches!(self.peek(), Tok::Keyword(Kw::For)) {
                        let generators = self.parse_comp_generators()?;
                        self.expect_op(Op::RBrace)?;
                        return Ok(Expr {
                            line,
                            kind: ExprKind::Comprehension {
                                kind: ComprehensionKind::Dict,
                                elt: vec![first, first_value],
                                generators,
                            },
                        });
                    }
                    let mut keys = vec![first];
                    let mut values = vec![first_value];
                    while self.eat_op(Op::Comma) {
                        if matches!(self.peek(), Tok::Op(Op::RBrace)) {
                            break;
                        }
                        keys.push(self.parse_test()?);
                        self.expect_op(Op::Colon)?;
                        values.push(self.parse_test()?);
                    }
                    self.expect_op(Op::RBrace)?;
                    return Ok(Expr {
                        line,
                        kind: ExprKind::Dict { keys, values },
                    });
                }
                if matches!(self.peek(), Tok::Keyword(Kw::For)) {
                    let generators = self.parse_comp_generators()?;
                    self.expect_op(Op::RBrace)?;
                    return Ok(Expr {
                        line,
                        kind: ExprKind::Comprehension {
                            kind: ComprehensionKind::Set,
                            elt: vec![first],
                            generators,
                        },
                    });
                }
                let mut elts = vec![first];
                while self.eat_op(Op::Comma) {
                    if matches!(self.peek(), Tok::Op(Op::RBrace)) {
                        break;
                    }
                    elts.push(self.parse_test()?);
                }
                self.expect_op(Op::RBrace)?;
                Ok(Expr {
                    line,
                    kind: ExprKind::Set(elts),
                })
            }
            other => Err(InterpreterError::syntax(
                line,
                format!("unexpected token: {:?}", other),
            )),
        }
    }
}

fn bin(line: u32, left: Expr, op: BinOp, right: Expr) -> Expr {
    Expr {
        line,
        kind: ExprKind::BinOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        },
    }
}

/// Split an f-string body into literal and interpolated parts.
fn parse_fstring_parts(body: &str, line: u32) -> Result<Vec<FStringPart>, InterpreterError> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let chars: Vec<char> = body.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '{' if chars.get(i + 1) == Some(&'{') => {
                literal.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                literal.push('}');
                i += 2;
            }
            '{' => {
                if !literal.is_empty() {
                    parts.push(FStringPart::Literal(std::mem::take(&mut literal)));
                }
                // find matching close brace
                let mut depth = 1;
                let mut j = i + 1;
                while j < chars.len() && depth > 0 {
                    match chars[j] {
                        '{' => depth += 1,
                        '}' => depth -= 1,
                        _ => {}
                    }
                    if depth > 0 {
                        j += 1;
                    }
                }
                if depth != 0 {
                    return Err(InterpreterError::syntax(line, "unterminated f-string expression"));
                }
                let inner: String = chars[i + 1..j].iter().collect();
                // split off a format spec at the first top-level colon;
                // `!r`-style conversions are dropped
                let (expr_src, spec) = split_format_spec(&inner);
                let expr_src = expr_src.split('!').next().unwrap_or(expr_src);
                let expr = parse_expression(expr_src.trim())?;
                parts.push(FStringPart::Expr {
                    expr: Box::new(expr),
                    spec,
                });
                i = j + 1;
            }
            _ => {
                literal.push(c);
                i += 1;
            }
        }
    }
    if !literal.is_empty() {
        parts.push(FStringPart::Literal(literal));
    }
    Ok(parts)
}

fn split_format_spec(inner: &str) -> (&str, Option<String>) {
    let mut depth = 0;
    for (idx, c) in inner.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ':' if depth == 0 => {
                return (&inner[..idx], Some(inner[idx + 1..].to_string()));
            }
            _ => {}
        }
    }
    (inner, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assignment_and_call() {
        let program = parse("x = foo(1, b=2)\n").unwrap();
        assert_eq!(program.body.len(), 1);
        match &program.body[0].kind {
            StmtKind::Assign { targets, value } => {
                assert_eq!(targets.len(), 1);
                assert!(matches!(value.kind, ExprKind::Call { .. }));
            }
            other => panic!("unexpected stmt: {:?}", other),
        }
    }

    #[test]
    fn test_parse_if_elif_else() {
        let program = parse("if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n").unwrap();
        match &program.body[0].kind {
            StmtKind::If { orelse, .. } => {
                assert_eq!(orelse.len(), 1);
                assert!(matches!(orelse[0].kind, StmtKind::If { .. }));
            }
            other => panic!("unexpected stmt: {:?}", other),
        }
    }

    #[test]
    fn test_parse_function_with_defaults() {
        let program = parse("def f(a, b=2, *rest, **kw):\n    return a + b\n").unwrap();
        match &program.body[0].kind {
            StmtKind::FuncDef(decl) => {
                assert_eq!(decl.params.names, vec!["a", "b"]);
                assert_eq!(decl.params.defaults.len(), 1);
                assert_eq!(decl.params.vararg.as_deref(), Some("rest"));
                assert_eq!(decl.params.kwarg.as_deref(), Some("kw"));
            }
            other => panic!("unexpected stmt: {:?}", other),
        }
    }

    #[test]
    fn test_parse_comprehension() {
        let program = parse("[x * 2 for x in items if x > 0]\n").unwrap();
        match &program.body[0].kind {
            StmtKind::Expr(Expr {
                kind: ExprKind::Comprehension { kind, generators, .. },
                ..
            }) => {
                assert_eq!(*kind, ComprehensionKind::List);
                assert_eq!(generators[0].ifs.len(), 1);
            }
            other => panic!("unexpected stmt: {:?}", other),
        }
    }

    #[test]
    fn test_parse_slice() {
        let program = parse("xs[1:10:2]\n").unwrap();
        match &program.body[0].kind {
            StmtKind::Expr(Expr {
                kind: ExprKind::Subscript { index, .. },
                ..
            }) => assert!(matches!(index.kind, ExprKind::Slice { .. })),
            other => panic!("unexpected stmt: {:?}", other),
        }
    }

    #[test]
    fn test_parse_try_except_finally() {
        let program =
            parse("try:\n    x = 1\nexcept ValueError as e:\n    x = 2\nfinally:\n    y = 3\n")
                .unwrap();
        match &program.body[0].kind {
            StmtKind::Try {
                handlers, finally, ..
            } => {
                assert_eq!(handlers[0].kinds, vec!["ValueError"]);
                assert_eq!(handlers[0].binding.as_deref(), Some("e"));
                assert_eq!(finally.len(), 1);
            }
            other => panic!("unexpected stmt: {:?}", other),
        }
    }

    #[test]
    fn test_parse_fstring() {
        let program = parse("f\"total={n + 1} and {pi:.2f}\"\n").unwrap();
        match &program.body[0].kind {
            StmtKind::Expr(Expr {
                kind: ExprKind::FString(parts),
                ..
            }) => {
                assert_eq!(parts.len(), 4);
                assert!(matches!(&parts[3], FStringPart::Expr { spec: Some(s), .. } if s == ".2f"));
            }
            other => panic!("unexpected stmt: {:?}", other),
        }
    }

    #[test]
    fn test_parse_chained_comparison() {
        let program = parse("1 < x <= 10\n").unwrap();
        match &program.body[0].kind {
            StmtKind::Expr(Expr {
                kind: ExprKind::Compare { ops, .. },
                ..
            }) => assert_eq!(ops.len(), 2),
            other => panic!("unexpected stmt: {:?}", other),
        }
    }

    #[test]
    fn test_tuple_unpacking_assignment() {
        let program = parse("a, b = 1, 2\n").unwrap();
        match &program.body[0].kind {
            StmtKind::Assign { targets, value } => {
                assert!(matches!(targets[0].kind, ExprKind::Tuple(_)));
                assert!(matches!(value.kind, ExprKind::Tuple(_)));
            }
            other => panic!("unexpected stmt: {:?}", other),
        }
    }
}
