//! Pratt parser: token stream to [`crate::ast`] tree.
//!
//! Grammar follows `spec.md` §4.2's precedence ladder (assignment → ternary → or → and →
//! equality → comparison (`is`/`in`) → additive → multiplicative → unary → call/postfix)
//! plus panic-mode error recovery synchronizing at statement-starting keywords, matching
//! the teacher's recursive-descent-with-a-synchronize-set shape.

use std::rc::Rc;

use crate::ast::*;
use crate::error::CompileError;
use crate::scanner::TokenIter;
use crate::token::{Token, TokenKind};

const MAX_BINDINGS: usize = 255;
const MAX_COLLECTION_ITEMS: usize = 65535;

const SYNC_SET: [TokenKind; 7] =
    [TokenKind::Cls, TokenKind::Fn, TokenKind::Let, TokenKind::Const, TokenKind::For, TokenKind::If, TokenKind::While];

pub struct Parser<'src> {
    tokens: Vec<Token<'src>>,
    pos: usize,
    pub errors: CompileError,
    panic_mode: bool,
}

type PResult<T> = Result<T, ()>;

impl<'src> Parser<'src> {
    pub fn new(source: &'src str) -> Self {
        let tokens: Vec<Token<'src>> = TokenIter::new(source).collect();
        Self { tokens, pos: 0, errors: CompileError::default(), panic_mode: false }
    }

    pub fn parse(mut self) -> (Root, CompileError) {
        let mut body = Vec::new();
        while !self.check(TokenKind::Eof) {
            match self.declaration() {
                Ok(node) => body.push(node),
                Err(()) => self.synchronize(),
            }
        }
        (Root { body }, self.errors)
    }

    // --- token stream helpers ---

    fn peek(&self) -> Token<'src> {
        self.tokens[self.pos]
    }

    fn previous(&self) -> Token<'src> {
        self.tokens[self.pos - 1]
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn advance(&mut self) -> Token<'src> {
        if !self.check(TokenKind::Eof) {
            self.pos += 1;
        }
        self.previous()
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> PResult<Token<'src>> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error_at_current(message))
        }
    }

    fn span_of(&self, tok: Token<'src>) -> SourceSpan {
        let (start, end) = tok.span();
        SourceSpan { start, end, line: tok.line }
    }

    fn error_at_current(&mut self, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        let tok = self.peek();
        self.errors.push(self.span_of(tok), message.to_string());
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while !self.check(TokenKind::Eof) {
            if self.previous().kind == TokenKind::Semicolon {
                return;
            }
            if SYNC_SET.contains(&self.peek().kind) || self.peek().kind == TokenKind::Print || self.peek().kind == TokenKind::Ret || self.peek().kind == TokenKind::Try {
                return;
            }
            self.advance();
        }
    }

    fn id_from(&self, tok: Token<'src>) -> Id {
        Id { name: Rc::from(tok.lexeme), span: self.span_of(tok) }
    }

    // --- declarations ---

    fn declaration(&mut self) -> PResult<Node> {
        if self.matches(TokenKind::Cls) {
            return self.class_declaration().map(Node::Decl);
        }
        if self.matches(TokenKind::Fn) {
            let decl = self.function_decl(FnKind::Function)?;
            return Ok(Node::Decl(Decl::Fn(Rc::new(decl))));
        }
        if self.matches(TokenKind::Let) || self.check(TokenKind::Const) {
            let is_const = self.matches(TokenKind::Const);
            return self.var_declaration(is_const).map(Node::Decl);
        }
        self.statement().map(Node::Stmt)
    }

    fn class_declaration(&mut self) -> PResult<Decl> {
        let start = self.span_of(self.previous());
        let name_tok = self.consume(TokenKind::Identifier, "expected class name")?;
        let name: Name = Rc::from(name_tok.lexeme);

        let base_name = if self.matches(TokenKind::Less) {
            let base_tok = self.consume(TokenKind::Identifier, "expected base class name")?;
            Some(Rc::from(base_tok.lexeme) as Name)
        } else {
            None
        };

        self.consume(TokenKind::LBrace, "expected '{' before class body")?;
        let mut methods = Vec::new();
        let mut ctor = None;
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            if self.matches(TokenKind::Ctor) {
                ctor = Some(self.function_decl(FnKind::Constructor)?);
            } else {
                methods.push(self.function_decl(FnKind::Method)?);
            }
        }
        let end = self.span_of(self.consume(TokenKind::RBrace, "expected '}' after class body")?);

        Ok(Decl::Class(Rc::new(ClassDecl { name, base_name, methods, ctor, span: start.join(end) })))
    }

    fn function_decl(&mut self, kind: FnKind) -> PResult<FnDecl> {
        let start_tok = self.previous();
        let start = self.span_of(start_tok);
        let name = if kind == FnKind::Constructor {
            None
        } else {
            Some(Rc::from(self.consume(TokenKind::Identifier, "expected function name")?.lexeme) as Name)
        };
        self.consume(TokenKind::LParen, "expected '(' after function name")?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                if params.len() >= MAX_BINDINGS {
                    self.error_at_current("too many parameters (max 255)");
                }
                let tok = self.consume(TokenKind::Identifier, "expected parameter name")?;
                params.push(self.id_from(tok));
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "expected ')' after parameters")?;
        self.consume(TokenKind::LBrace, "expected '{' before function body")?;
        let body = self.block_contents()?;
        let end = self.span_of(self.previous());
        Ok(FnDecl { name, kind, params: FnParams { params }, body, span: start.join(end) })
    }

    fn var_declaration(&mut self, is_const: bool) -> PResult<Decl> {
        let start = self.span_of(self.previous());
        let target = if self.check(TokenKind::LBrace) || self.check(TokenKind::LBracket) || self.check(TokenKind::LParen) {
            VarTarget::Pattern(self.pattern()?)
        } else {
            let tok = self.consume(TokenKind::Identifier, "expected variable name")?;
            VarTarget::Name(self.id_from(tok))
        };
        let init = if self.matches(TokenKind::Equal) { Some(self.expression()?) } else { None };
        let end = self.span_of(self.previous());
        self.terminate_statement()?;
        Ok(Decl::Variable { is_const, target, init, span: start.join(end) })
    }

    fn pattern(&mut self) -> PResult<Pattern> {
        if self.matches(TokenKind::LBracket) {
            let (items, rest) = self.pattern_list(TokenKind::RBracket)?;
            return Ok(Pattern::Seq(items, rest));
        }
        if self.matches(TokenKind::LParen) {
            let (items, rest) = self.pattern_list(TokenKind::RParen)?;
            return Ok(Pattern::Tuple(items, rest));
        }
        if self.matches(TokenKind::LBrace) {
            let mut entries = Vec::new();
            while !self.check(TokenKind::RBrace) {
                let key_tok = self.consume(TokenKind::Identifier, "expected object pattern key")?;
                let key: Name = Rc::from(key_tok.lexeme);
                let binding = if self.matches(TokenKind::Colon) {
                    self.pattern()?
                } else {
                    Pattern::Binding(self.id_from(key_tok))
                };
                entries.push((key, binding));
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
            self.consume(TokenKind::RBrace, "expected '}' after object pattern")?;
            return Ok(Pattern::Obj(entries));
        }
        if self.matches(TokenKind::Ellipsis) {
            let tok = self.consume(TokenKind::Identifier, "expected rest binding name")?;
            return Ok(Pattern::Rest(self.id_from(tok)));
        }
        let tok = self.consume(TokenKind::Identifier, "expected binding name")?;
        Ok(Pattern::Binding(self.id_from(tok)))
    }

    fn pattern_list(&mut self, close: TokenKind) -> PResult<(Vec<Pattern>, Option<Box<Pattern>>)> {
        let mut items = Vec::new();
        let mut rest = None;
        while !self.check(close) {
            let p = self.pattern()?;
            if let Pattern::Rest(_) = p {
                if rest.is_some() {
                    self.error_at_current("only one rest binding allowed, and it must be last");
                }
                rest = Some(Box::new(p));
                if self.matches(TokenKind::Comma) {
                    self.error_at_current("rest binding must be the last element");
                }
                break;
            }
            if items.len() >= MAX_BINDINGS {
                self.error_at_current("too many bindings in pattern (max 255)");
            }
            items.push(p);
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.consume(close, "expected closing bracket after pattern list")?;
        Ok((items, rest))
    }

    // --- statements ---

    fn statement(&mut self) -> PResult<Stmt> {
        if self.matches(TokenKind::Import) {
            return self.import_statement();
        }
        if self.matches(TokenKind::LBrace) {
            let start = self.span_of(self.previous());
            let body = self.block_contents()?;
            let end = self.span_of(self.previous());
            return Ok(Stmt::Block(body, start.join(end)));
        }
        if self.matches(TokenKind::If) {
            return self.if_statement();
        }
        if self.matches(TokenKind::While) {
            return self.while_statement();
        }
        if self.matches(TokenKind::For) {
            return self.for_statement();
        }
        if self.matches(TokenKind::Ret) {
            return self.return_statement();
        }
        if self.matches(TokenKind::Print) {
            return self.print_statement();
        }
        if self.matches(TokenKind::Break) {
            let span = self.span_of(self.previous());
            self.terminate_statement()?;
            return Ok(Stmt::Break(span));
        }
        if self.matches(TokenKind::Skip) {
            let span = self.span_of(self.previous());
            self.terminate_statement()?;
            return Ok(Stmt::Skip(span));
        }
        if self.matches(TokenKind::Throw) {
            return self.throw_statement();
        }
        if self.matches(TokenKind::Try) {
            return self.try_statement();
        }
        self.expr_statement()
    }

    fn block_contents(&mut self) -> PResult<Vec<Node>> {
        let mut body = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            match self.declaration() {
                Ok(node) => body.push(node),
                Err(()) => self.synchronize(),
            }
        }
        self.consume(TokenKind::RBrace, "expected '}' after block")?;
        Ok(body)
    }

    fn import_statement(&mut self) -> PResult<Stmt> {
        let start = self.span_of(self.previous());
        let name_tok = self.consume(TokenKind::Identifier, "expected module name")?;
        let name: Name = Rc::from(name_tok.lexeme);
        let mut bindings = None;
        if self.matches(TokenKind::Colon) {
            let mut names = Vec::new();
            let mut rest = None;
            loop {
                if self.matches(TokenKind::Ellipsis) {
                    let tok = self.consume(TokenKind::Identifier, "expected rest binding name")?;
                    rest = Some(Rc::from(tok.lexeme) as Name);
                } else {
                    let tok = self.consume(TokenKind::Identifier, "expected imported name")?;
                    names.push(Rc::from(tok.lexeme) as Name);
                }
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
            bindings = Some((names, rest));
        }
        let path = if self.matches(TokenKind::From) {
            let tok = self.consume(TokenKind::String, "expected module path string")?;
            Some(decode_string_lexeme(tok.lexeme))
        } else {
            None
        };
        let end = self.span_of(self.previous());
        self.terminate_statement()?;
        Ok(Stmt::Import { name, path, bindings, span: start.join(end) })
    }

    fn if_statement(&mut self) -> PResult<Stmt> {
        let start = self.span_of(self.previous());
        let cond = self.expression()?;
        self.consume(TokenKind::LBrace, "expected '{' after if condition")?;
        let then_span_start = self.span_of(self.previous());
        let then_body = self.block_contents()?;
        let then_branch = Box::new(Node::Stmt(Stmt::Block(then_body, then_span_start)));
        let else_branch = if self.matches(TokenKind::Else) {
            if self.matches(TokenKind::If) {
                Some(Box::new(Node::Stmt(self.if_statement()?)))
            } else {
                self.consume(TokenKind::LBrace, "expected '{' after else")?;
                let span = self.span_of(self.previous());
                let body = self.block_contents()?;
                Some(Box::new(Node::Stmt(Stmt::Block(body, span))))
            }
        } else {
            None
        };
        let end = self.span_of(self.previous());
        Ok(Stmt::If { cond, then_branch, else_branch, span: start.join(end) })
    }

    fn while_statement(&mut self) -> PResult<Stmt> {
        let start = self.span_of(self.previous());
        let cond = self.expression()?;
        self.consume(TokenKind::LBrace, "expected '{' after while condition")?;
        let span = self.span_of(self.previous());
        let body = Box::new(Node::Stmt(Stmt::Block(self.block_contents()?, span)));
        let end = self.span_of(self.previous());
        Ok(Stmt::While { cond, body, span: start.join(end) })
    }

    fn for_statement(&mut self) -> PResult<Stmt> {
        let start = self.span_of(self.previous());
        self.consume(TokenKind::LParen, "expected '(' after 'for'")?;
        let init = if self.matches(TokenKind::Semicolon) {
            None
        } else if self.matches(TokenKind::Let) {
            Some(Box::new(Node::Decl(self.var_declaration(false)?)))
        } else {
            let stmt = self.expr_statement()?;
            Some(Box::new(Node::Stmt(stmt)))
        };
        let cond = if self.check(TokenKind::Semicolon) { None } else { Some(self.expression()?) };
        self.consume(TokenKind::Semicolon, "expected ';' after loop condition")?;
        let incr = if self.check(TokenKind::RParen) { None } else { Some(self.expression()?) };
        self.consume(TokenKind::RParen, "expected ')' after for clauses")?;
        self.consume(TokenKind::LBrace, "expected '{' before for body")?;
        let span = self.span_of(self.previous());
        let body = Box::new(Node::Stmt(Stmt::Block(self.block_contents()?, span)));
        let end = self.span_of(self.previous());
        Ok(Stmt::For { init, cond, incr, body, span: start.join(end) })
    }

    fn return_statement(&mut self) -> PResult<Stmt> {
        let start = self.span_of(self.previous());
        let value = if self.check(TokenKind::Semicolon) || self.peek().first_on_line { None } else { Some(self.expression()?) };
        let end = self.span_of(self.previous());
        self.terminate_statement()?;
        Ok(Stmt::Return(value, start.join(end)))
    }

    fn print_statement(&mut self) -> PResult<Stmt> {
        let start = self.span_of(self.previous());
        let expr = self.expression()?;
        let end = self.span_of(self.previous());
        self.terminate_statement()?;
        Ok(Stmt::Print(expr, start.join(end)))
    }

    fn throw_statement(&mut self) -> PResult<Stmt> {
        let start = self.span_of(self.previous());
        let expr = self.expression()?;
        let end = self.span_of(self.previous());
        self.terminate_statement()?;
        Ok(Stmt::Throw(expr, start.join(end)))
    }

    fn try_statement(&mut self) -> PResult<Stmt> {
        let start = self.span_of(self.previous());
        self.consume(TokenKind::LBrace, "expected '{' after try")?;
        let try_span = self.span_of(self.previous());
        let try_block = Box::new(Node::Stmt(Stmt::Block(self.block_contents()?, try_span)));
        self.consume(TokenKind::Catch, "expected 'catch' after try block")?;
        self.consume(TokenKind::LBrace, "expected '{' after catch")?;
        let catch_span = self.span_of(self.previous());
        let catch_block = Box::new(Node::Stmt(Stmt::Block(self.block_contents()?, catch_span)));
        let end = self.span_of(self.previous());
        Ok(Stmt::Try { try_block, catch_block, span: start.join(end) })
    }

    fn expr_statement(&mut self) -> PResult<Stmt> {
        let expr = self.expression()?;
        let span = expr.span();
        self.terminate_statement()?;
        Ok(Stmt::Expr(expr, span))
    }

    /// Statements end at a `;` or at a newline boundary (the next token being the first
    /// on its line); this mirrors the scanner's `first_on_line` flag feeding forward into
    /// the parser rather than requiring an explicit terminator everywhere.
    fn terminate_statement(&mut self) -> PResult<()> {
        if self.matches(TokenKind::Semicolon) {
            return Ok(());
        }
        if self.check(TokenKind::Eof) || self.check(TokenKind::RBrace) || self.peek().first_on_line {
            return Ok(());
        }
        self.error_at_current("expected newline or ';' after statement");
        Err(())
    }

    // --- expressions ---

    fn expression(&mut self) -> PResult<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> PResult<Expr> {
        let target = self.ternary()?;
        let op = match self.peek().kind {
            TokenKind::Equal => Some(AssignOp::Assign),
            TokenKind::PlusAssign => Some(AssignOp::Add),
            TokenKind::MinusAssign => Some(AssignOp::Sub),
            TokenKind::StarAssign => Some(AssignOp::Mul),
            TokenKind::SlashAssign => Some(AssignOp::Div),
            TokenKind::PercentAssign => Some(AssignOp::Mod),
            _ => None,
        };
        let Some(op) = op else { return Ok(target) };
        self.advance();
        if !matches!(target, Expr::Variable(_) | Expr::Dot { .. } | Expr::Subscript { .. }) {
            self.error_at_current("invalid assignment target");
            return Err(());
        }
        let value = self.assignment()?;
        let span = target.span().join(value.span());
        Ok(Expr::Assign { op, target: Box::new(target), value: Box::new(value), span })
    }

    fn ternary(&mut self) -> PResult<Expr> {
        let cond = self.logic_or()?;
        if self.matches(TokenKind::Question) {
            let then_expr = self.expression()?;
            self.consume(TokenKind::Colon, "expected ':' in ternary expression")?;
            let else_expr = self.expression()?;
            let span = cond.span().join(else_expr.span());
            return Ok(Expr::Ternary { cond: Box::new(cond), then_expr: Box::new(then_expr), else_expr: Box::new(else_expr), span });
        }
        Ok(cond)
    }

    fn logic_or(&mut self) -> PResult<Expr> {
        let mut left = self.logic_and()?;
        while self.matches(TokenKind::Or) {
            let right = self.logic_and()?;
            let span = left.span().join(right.span());
            left = Expr::Or(Box::new(left), Box::new(right), span);
        }
        Ok(left)
    }

    fn logic_and(&mut self) -> PResult<Expr> {
        let mut left = self.equality()?;
        while self.matches(TokenKind::And) {
            let right = self.equality()?;
            let span = left.span().join(right.span());
            left = Expr::And(Box::new(left), Box::new(right), span);
        }
        Ok(left)
    }

    fn equality(&mut self) -> PResult<Expr> {
        let mut left = self.comparison()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::EqualEqual => BinaryOp::Eq,
                TokenKind::BangEqual => BinaryOp::Neq,
                _ => break,
            };
            let op_tok = self.advance();
            let right = self.comparison()?;
            let span = left.span().join(right.span());
            left = Expr::Binary { op, op_span: self.span_of(op_tok), left: Box::new(left), right: Box::new(right), span };
        }
        Ok(left)
    }

    fn comparison(&mut self) -> PResult<Expr> {
        let mut left = self.additive()?;
        loop {
            if self.matches(TokenKind::Is) {
                let right = self.additive()?;
                let span = left.span().join(right.span());
                left = Expr::Is(Box::new(left), Box::new(right), span);
                continue;
            }
            if self.matches(TokenKind::In) {
                let right = self.additive()?;
                let span = left.span().join(right.span());
                left = Expr::In(Box::new(left), Box::new(right), span);
                continue;
            }
            let op = match self.peek().kind {
                TokenKind::Less => BinaryOp::Lt,
                TokenKind::LessEqual => BinaryOp::Lteq,
                TokenKind::Greater => BinaryOp::Gt,
                TokenKind::GreaterEqual => BinaryOp::Gteq,
                _ => break,
            };
            let op_tok = self.advance();
            let right = self.additive()?;
            let span = left.span().join(right.span());
            left = Expr::Binary { op, op_span: self.span_of(op_tok), left: Box::new(left), right: Box::new(right), span };
        }
        Ok(left)
    }

    fn additive(&mut self) -> PResult<Expr> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            let op_tok = self.advance();
            let right = self.multiplicative()?;
            let span = left.span().join(right.span());
            left = Expr::Binary { op, op_span: self.span_of(op_tok), left: Box::new(left), right: Box::new(right), span };
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> PResult<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            let op_tok = self.advance();
            let right = self.unary()?;
            let span = left.span().join(right.span());
            left = Expr::Binary { op, op_span: self.span_of(op_tok), left: Box::new(left), right: Box::new(right), span };
        }
        Ok(left)
    }

    fn unary(&mut self) -> PResult<Expr> {
        let op = match self.peek().kind {
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::Minus => Some(UnaryOp::Negate),
            TokenKind::PlusPlus => Some(UnaryOp::PreIncrement),
            TokenKind::MinusMinus => Some(UnaryOp::PreDecrement),
            _ => None,
        };
        if let Some(op) = op {
            let tok = self.advance();
            let inner = self.unary()?;
            let span = self.span_of(tok).join(inner.span());
            return Ok(Expr::Unary { op, inner: Box::new(inner), span });
        }
        self.call_or_postfix()
    }

    fn call_or_postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.matches(TokenKind::LParen) {
                let mut args = Vec::new();
                if !self.check(TokenKind::RParen) {
                    loop {
                        args.push(self.expression()?);
                        if !self.matches(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                let end = self.span_of(self.consume(TokenKind::RParen, "expected ')' after arguments")?);
                let span = expr.span().join(end);
                expr = Expr::Call { callee: Box::new(expr), args, span };
                continue;
            }
            if self.matches(TokenKind::Dot) {
                let tok = self.consume(TokenKind::Identifier, "expected property name after '.'")?;
                let span = expr.span().join(self.span_of(tok));
                expr = Expr::Dot { target: Box::new(expr), prop: self.id_from(tok), span };
                continue;
            }
            if self.matches(TokenKind::LBracket) {
                if self.matches(TokenKind::DotDot) {
                    let end_expr = if self.check(TokenKind::RBracket) { None } else { Some(Box::new(self.expression()?)) };
                    let end = self.span_of(self.consume(TokenKind::RBracket, "expected ']' after slice")?);
                    let span = expr.span().join(end);
                    expr = Expr::Slice { target: Box::new(expr), start: None, end: end_expr, span };
                    continue;
                }
                let first = self.expression()?;
                if self.matches(TokenKind::DotDot) {
                    let end_expr = if self.check(TokenKind::RBracket) { None } else { Some(Box::new(self.expression()?)) };
                    let end = self.span_of(self.consume(TokenKind::RBracket, "expected ']' after slice")?);
                    let span = expr.span().join(end);
                    expr = Expr::Slice { target: Box::new(expr), start: Some(Box::new(first)), end: end_expr, span };
                    continue;
                }
                let end = self.span_of(self.consume(TokenKind::RBracket, "expected ']' after subscript")?);
                let span = expr.span().join(end);
                expr = Expr::Subscript { target: Box::new(expr), index: Box::new(first), span };
                continue;
            }
            if self.matches(TokenKind::PlusPlus) {
                let span = expr.span().join(self.span_of(self.previous()));
                expr = Expr::Postfix { op: PostfixOp::Increment, inner: Box::new(expr), span };
                continue;
            }
            if self.matches(TokenKind::MinusMinus) {
                let span = expr.span().join(self.span_of(self.previous()));
                expr = Expr::Postfix { op: PostfixOp::Decrement, inner: Box::new(expr), span };
                continue;
            }
            if self.matches(TokenKind::Question) && self.peek().kind != TokenKind::Colon {
                // `expr?` bare try-expression: only applies directly after a call, so
                // this is deliberately checked after call/subscript/dot parsing above.
                let else_expr = None;
                let span = expr.span();
                expr = Expr::Try { expr: Box::new(expr), else_expr, span };
                continue;
            }
            break;
        }
        Ok(expr)
    }

    fn primary(&mut self) -> PResult<Expr> {
        let tok = self.peek();
        let span = self.span_of(tok);
        match tok.kind {
            TokenKind::True => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(true), span))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(false), span))
            }
            TokenKind::Nil => {
                self.advance();
                Ok(Expr::Literal(Literal::Nil, span))
            }
            TokenKind::Number => {
                self.advance();
                let (value, is_int) = parse_number(tok.lexeme);
                Ok(Expr::Literal(Literal::Number(value, is_int), span))
            }
            TokenKind::String => {
                self.advance();
                Ok(Expr::Literal(Literal::String(Rc::from(decode_string_lexeme(tok.lexeme).as_str())), span))
            }
            TokenKind::Identifier => {
                self.advance();
                Ok(Expr::Variable(self.id_from(tok)))
            }
            TokenKind::This => {
                self.advance();
                Ok(Expr::This(span))
            }
            TokenKind::Base => {
                self.advance();
                Ok(Expr::Base(span))
            }
            TokenKind::LParen => {
                self.advance();
                if self.check(TokenKind::RParen) {
                    let end = self.span_of(self.consume(TokenKind::RParen, "expected ')'")?);
                    return Ok(Expr::Literal(Literal::Tuple(Vec::new()), span.join(end)));
                }
                let first = self.expression()?;
                if self.matches(TokenKind::Comma) {
                    let mut items = vec![first];
                    while !self.check(TokenKind::RParen) {
                        if items.len() >= MAX_COLLECTION_ITEMS {
                            self.error_at_current("too many tuple items (max 65535)");
                        }
                        items.push(self.expression()?);
                        if !self.matches(TokenKind::Comma) {
                            break;
                        }
                    }
                    let end = self.span_of(self.consume(TokenKind::RParen, "expected ')' after tuple")?);
                    return Ok(Expr::Literal(Literal::Tuple(items), span.join(end)));
                }
                let end = self.span_of(self.consume(TokenKind::RParen, "expected ')' after expression")?);
                Ok(Expr::Grouping(Box::new(first), span.join(end)))
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while !self.check(TokenKind::RBracket) {
                    if items.len() >= MAX_COLLECTION_ITEMS {
                        self.error_at_current("too many sequence items (max 65535)");
                    }
                    items.push(self.expression()?);
                    if !self.matches(TokenKind::Comma) {
                        break;
                    }
                }
                let end = self.span_of(self.consume(TokenKind::RBracket, "expected ']' after sequence")?);
                Ok(Expr::Literal(Literal::Seq(items), span.join(end)))
            }
            TokenKind::LBrace => {
                self.advance();
                let mut entries = Vec::new();
                while !self.check(TokenKind::RBrace) {
                    let key = if self.check(TokenKind::Identifier) {
                        let key_tok = self.advance();
                        Expr::Literal(Literal::String(Rc::from(key_tok.lexeme)), self.span_of(key_tok))
                    } else {
                        self.expression()?
                    };
                    self.consume(TokenKind::Colon, "expected ':' after object key")?;
                    let value = self.expression()?;
                    entries.push((key, value));
                    if !self.matches(TokenKind::Comma) {
                        break;
                    }
                }
                let end = self.span_of(self.consume(TokenKind::RBrace, "expected '}' after object")?);
                Ok(Expr::Literal(Literal::Obj(entries), span.join(end)))
            }
            TokenKind::Fn => {
                self.advance();
                let decl = self.function_decl(FnKind::Anonymous)?;
                Ok(Expr::Lambda(Rc::new(decl)))
            }
            _ => {
                self.error_at_current("expected expression");
                Err(())
            }
        }
    }
}

fn parse_number(lexeme: &str) -> (f64, bool) {
    if let Some(rest) = lexeme.strip_prefix("0x").or_else(|| lexeme.strip_prefix("0X")) {
        return (i64::from_str_radix(rest, 16).unwrap_or(0) as f64, true);
    }
    if let Some(rest) = lexeme.strip_prefix("0b").or_else(|| lexeme.strip_prefix("0B")) {
        return (i64::from_str_radix(rest, 2).unwrap_or(0) as f64, true);
    }
    if let Some(rest) = lexeme.strip_prefix("0o").or_else(|| lexeme.strip_prefix("0O")) {
        return (i64::from_str_radix(rest, 8).unwrap_or(0) as f64, true);
    }
    if lexeme.contains('.') {
        (lexeme.parse().unwrap_or(0.0), false)
    } else {
        (lexeme.parse::<i64>().map(|i| i as f64).unwrap_or(0.0), true)
    }
}

/// Decodes the seven backslash escapes the scanner recognizes but leaves undecoded:
/// `\n \t \r \\ \" \0 \e`.
fn decode_string_lexeme(lexeme: &str) -> String {
    let inner = &lexeme[1..lexeme.len().saturating_sub(1)];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('0') => out.push('\0'),
            Some('e') => out.push('\x1b'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_function_and_call() {
        let src = "fn add(a, b) { ret a + b }\nprint add(1, 2)";
        let (root, errors) = Parser::new(src).parse();
        assert!(errors.is_empty(), "{:?}", errors.diagnostics);
        assert_eq!(root.body.len(), 2);
    }

    #[test]
    fn parses_class_with_ctor_and_base() {
        let src = "cls A { ctor(x) { this.x = x } }\ncls B < A { ctor(x) { base.ctor(x) } }";
        let (root, errors) = Parser::new(src).parse();
        assert!(errors.is_empty(), "{:?}", errors.diagnostics);
        assert_eq!(root.body.len(), 2);
    }

    #[test]
    fn parses_destructuring_with_rest() {
        let src = "let [a, b, ...rest] = [1, 2, 3, 4]";
        let (root, errors) = Parser::new(src).parse();
        assert!(errors.is_empty(), "{:?}", errors.diagnostics);
        assert_eq!(root.body.len(), 1);
    }

    #[test]
    fn parses_try_catch() {
        let src = "try { throw 1 } catch { print 2 }";
        let (root, errors) = Parser::new(src).parse();
        assert!(errors.is_empty(), "{:?}", errors.diagnostics);
        assert_eq!(root.body.len(), 1);
    }

    #[test]
    fn reports_error_for_unterminated_expression() {
        let src = "let x = ";
        let (_root, errors) = Parser::new(src).parse();
        assert!(!errors.is_empty());
    }

    #[test]
    fn decodes_string_escapes() {
        assert_eq!(decode_string_lexeme("\"a\\nb\""), "a\nb");
    }
}
