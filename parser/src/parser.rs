use thiserror::Error;

use crate::ast::{Arg, BlockLit, Body, Expr, ExprKind, MethodDef, Params, Program, Target};
use crate::lexer::Lexer;
use crate::span::{Pos, Span};
use crate::token::{Keyword, StrPart, Token, TokenKind};

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} at {span}")]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl ParseError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

type ParseResult<T> = Result<T, ParseError>;

/// Local variables visible in one lexical scope.
struct Scope {
    params: Vec<String>,
    locals: Vec<String>,
    /// Block scopes see the locals of their enclosing scope.
    transparent: bool,
}

/// The left-hand side of an assignment.
enum Place {
    Var(Target),
    Index { receiver: Expr, args: Vec<Arg> },
    Attr { receiver: Expr, name: String },
}

/// Recursive-descent parser over a token stream.
///
/// Identifiers are resolved while parsing: a name assigned earlier in the
/// same scope (or an enclosing block's) reads as [`ExprKind::Local`],
/// anything else is a method call on `self`.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    prev_span: Span,
    scopes: Vec<Scope>,
    /// Set while parsing `while` conditions and paren-less arguments, where
    /// a `do` belongs to the enclosing construct.
    no_do: bool,
}

const BINARY_EQUALITY: &[&str] = &["==", "!=", "===", "=~"];
const BINARY_COMPARISON: &[&str] = &["<", ">", "<=", ">=", "<=>"];
const BINARY_SHIFT: &[&str] = &["<<", ">>"];
const BINARY_ADDITIVE: &[&str] = &["+", "-"];
const BINARY_MULTIPLICATIVE: &[&str] = &["*", "/", "%"];
const OP_ASSIGN: &[&str] = &["+=", "-=", "*=", "/=", "%=", "<<=", "||=", "&&="];
const OPERATOR_METHODS: &[&str] = &[
    "+", "-", "*", "/", "%", "==", "!=", "===", "=~", "<", ">", "<=", ">=", "<=>", "<<",
    ">>", "!",
];

impl Parser {
    pub fn new<I: IntoIterator<Item = Token>>(tokens: I) -> Self {
        let mut tokens: Vec<Token> = tokens.into_iter().filter(|t| !t.is_comment()).collect();
        if !tokens.last().is_some_and(Token::is_eof) {
            let end = tokens.last().map_or(Span::point(Pos::origin()), |t| t.span);
            tokens.push(Token::new(TokenKind::Eof, end, ""));
        }
        Self {
            tokens,
            pos: 0,
            prev_span: Span::point(Pos::origin()),
            scopes: Vec::new(),
            no_do: false,
        }
    }

    /// Parse a whole source file.
    pub fn parse_program(mut self) -> ParseResult<Program> {
        self.push_scope(false);
        let body = self.parse_statements()?;
        if !self.peek().is_eof() {
            return Err(self.unexpected());
        }
        let scope = self.pop_scope();
        Ok(Program {
            locals: scope.locals,
            body,
        })
    }

    // ───────────────────────────────────────────────────────────
    //  Token access
    // ───────────────────────────────────────────────────────────

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, n: usize) -> &Token {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)]
    }

    fn kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if !tok.is_eof() {
            self.pos += 1;
        }
        self.prev_span = tok.span;
        tok
    }

    fn at_punct(&self, p: &str) -> bool {
        self.kind().is_punct(p)
    }

    fn at_kw(&self, kw: Keyword) -> bool {
        self.kind().is_keyword(kw)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        let found = self.at_punct(p);
        if found {
            self.advance();
        }
        found
    }

    fn eat_kw(&mut self, kw: Keyword) -> bool {
        let found = self.at_kw(kw);
        if found {
            self.advance();
        }
        found
    }

    fn expect_punct(&mut self, p: &str) -> ParseResult<Span> {
        if self.at_punct(p) {
            Ok(self.advance().span)
        } else {
            Err(self.expected(&format!("`{p}`")))
        }
    }

    fn expect_kw(&mut self, kw: Keyword) -> ParseResult<Span> {
        if self.at_kw(kw) {
            Ok(self.advance().span)
        } else {
            let name = format!("{kw:?}").to_lowercase();
            Err(self.expected(&format!("`{name}`")))
        }
    }

    fn at_term(&self) -> bool {
        matches!(self.kind(), TokenKind::Newline) || self.at_punct(";")
    }

    fn skip_terms(&mut self) {
        while self.at_term() {
            self.advance();
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.kind(), TokenKind::Newline) {
            self.advance();
        }
    }

    fn at_body_end(&self) -> bool {
        match self.kind() {
            TokenKind::Eof => true,
            TokenKind::Keyword(Keyword::End | Keyword::Else | Keyword::Elsif) => true,
            TokenKind::Punct("}" | ")") => true,
            _ => false,
        }
    }

    fn span_from(&self, start: Span) -> Span {
        start.merge(self.prev_span)
    }

    fn unexpected(&self) -> ParseError {
        let tok = self.peek();
        match &tok.kind {
            TokenKind::Error(msg) => ParseError::new(msg.clone(), tok.span),
            kind => ParseError::new(format!("unexpected {}", kind.name()), tok.span),
        }
    }

    fn expected(&self, what: &str) -> ParseError {
        let tok = self.peek();
        match &tok.kind {
            TokenKind::Error(msg) => ParseError::new(msg.clone(), tok.span),
            kind => ParseError::new(format!("expected {what}, found {}", kind.name()), tok.span),
        }
    }

    fn with_no_do<T>(&mut self, no_do: bool, f: impl FnOnce(&mut Self) -> T) -> T {
        let saved = std::mem::replace(&mut self.no_do, no_do);
        let result = f(self);
        self.no_do = saved;
        result
    }

    // ───────────────────────────────────────────────────────────
    //  Local scopes
    // ───────────────────────────────────────────────────────────

    fn push_scope(&mut self, transparent: bool) {
        self.scopes.push(Scope {
            params: Vec::new(),
            locals: Vec::new(),
            transparent,
        });
    }

    fn pop_scope(&mut self) -> Scope {
        self.scopes.pop().unwrap_or(Scope {
            params: Vec::new(),
            locals: Vec::new(),
            transparent: false,
        })
    }

    fn is_local(&self, name: &str) -> bool {
        for scope in self.scopes.iter().rev() {
            if scope.params.iter().chain(&scope.locals).any(|n| n == name) {
                return true;
            }
            if !scope.transparent {
                break;
            }
        }
        false
    }

    fn declare(&mut self, name: &str) {
        if self.is_local(name) {
            return;
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.locals.push(name.to_string());
        }
    }

    fn declare_param(&mut self, name: &str, span: Span) -> ParseResult<()> {
        let Some(scope) = self.scopes.last_mut() else {
            return Ok(());
        };
        if scope.params.iter().any(|n| n == name) {
            return Err(ParseError::new(format!("duplicated argument name `{name}`"), span));
        }
        scope.params.push(name.to_string());
        Ok(())
    }

    // ───────────────────────────────────────────────────────────
    //  Statements
    // ───────────────────────────────────────────────────────────

    fn parse_statements(&mut self) -> ParseResult<Vec<Expr>> {
        let mut body = Vec::new();
        loop {
            self.skip_terms();
            if self.at_body_end() {
                return Ok(body);
            }
            body.push(self.parse_statement()?);
            if !self.at_term() && !self.at_body_end() {
                return Err(self.unexpected());
            }
        }
    }

    fn parse_body(&mut self) -> ParseResult<Expr> {
        let start = self.peek().span;
        let body = self.parse_statements()?;
        Ok(Expr::sequence(body, self.span_from(start)))
    }

    fn parse_statement(&mut self) -> ParseResult<Expr> {
        let start = self.peek().span;
        let mut expr = self.parse_expr_stmt()?;
        loop {
            let kw = match self.kind() {
                TokenKind::Keyword(
                    kw @ (Keyword::If | Keyword::Unless | Keyword::While | Keyword::Until),
                ) => *kw,
                _ => return Ok(expr),
            };
            self.advance();
            let cond = self.parse_expr_stmt()?;
            let span = self.span_from(start);
            expr = match kw {
                Keyword::If | Keyword::Unless => {
                    let cond = if kw == Keyword::Unless { negate(cond) } else { cond };
                    Expr::new(
                        ExprKind::If {
                            cond: Box::new(cond),
                            then: Box::new(expr),
                            otherwise: None,
                        },
                        span,
                    )
                }
                _ => Expr::new(
                    ExprKind::While {
                        cond: Box::new(cond),
                        body: Box::new(expr),
                        until: kw == Keyword::Until,
                    },
                    span,
                ),
            };
        }
    }

    /// `not`, `and`, `or`: the loosest operators.
    fn parse_expr_stmt(&mut self) -> ParseResult<Expr> {
        let start = self.peek().span;
        let mut left = self.parse_not()?;
        loop {
            let and = if self.eat_kw(Keyword::And) {
                true
            } else if self.eat_kw(Keyword::Or) {
                false
            } else {
                return Ok(left);
            };
            self.skip_newlines();
            let right = self.parse_not()?;
            let span = self.span_from(start);
            left = if and {
                Expr::new(ExprKind::And(Box::new(left), Box::new(right)), span)
            } else {
                Expr::new(ExprKind::Or(Box::new(left), Box::new(right)), span)
            };
        }
    }

    fn parse_not(&mut self) -> ParseResult<Expr> {
        if self.at_kw(Keyword::Not) {
            let start = self.advance().span;
            let operand = self.parse_not()?;
            return Ok(Expr::new(ExprKind::Not(Box::new(operand)), self.span_from(start)));
        }
        self.parse_expr()
    }

    // ───────────────────────────────────────────────────────────
    //  Expressions
    // ───────────────────────────────────────────────────────────

    pub fn parse_expr(&mut self) -> ParseResult<Expr> {
        let start = self.peek().span;
        let left = self.parse_range()?;

        if self.at_punct("=") {
            self.advance();
            self.skip_newlines();
            let place = self.place(left)?;
            let value = self.parse_expr()?;
            return Ok(assign(place, value, self.span_from(start)));
        }

        let op = match self.kind() {
            TokenKind::Punct(p) if OP_ASSIGN.contains(p) => *p,
            _ => return Ok(left),
        };
        self.advance();
        self.skip_newlines();
        let place = self.place(left)?;
        let current = read_place(&place, start);
        let value = self.parse_expr()?;
        let span = self.span_from(start);
        let binop = &op[..op.len() - 1];
        Ok(match binop {
            "||" => Expr::new(
                ExprKind::Or(Box::new(current), Box::new(assign(place, value, span))),
                span,
            ),
            "&&" => Expr::new(
                ExprKind::And(Box::new(current), Box::new(assign(place, value, span))),
                span,
            ),
            _ => assign(place, call(current, binop, vec![value], span), span),
        })
    }

    /// Turn a parsed expression into an assignable place, declaring a new
    /// local when needed.
    fn place(&mut self, expr: Expr) -> ParseResult<Place> {
        let span = expr.span;
        match expr.kind {
            ExprKind::Local(name) => Ok(Place::Var(Target::Local(name))),
            ExprKind::Ivar(name) => Ok(Place::Var(Target::Ivar(name))),
            ExprKind::Cvar(name) => Ok(Place::Var(Target::Cvar(name))),
            ExprKind::Global(name) => Ok(Place::Var(Target::Global(name))),
            ExprKind::Const(name) => Ok(Place::Var(Target::Const(name))),
            ExprKind::Call {
                receiver: None,
                name,
                args,
                block: None,
            } if args.is_empty() && is_local_name(&name) => {
                self.declare(&name);
                Ok(Place::Var(Target::Local(name)))
            }
            ExprKind::Call {
                receiver: Some(receiver),
                name,
                args,
                block: None,
            } if name == "[]" => Ok(Place::Index {
                receiver: *receiver,
                args,
            }),
            ExprKind::Call {
                receiver: Some(receiver),
                name,
                args,
                block: None,
            } if args.is_empty() && is_local_name(&name) => Ok(Place::Attr {
                receiver: *receiver,
                name,
            }),
            _ => Err(ParseError::new("cannot assign to this expression", span)),
        }
    }

    fn parse_range(&mut self) -> ParseResult<Expr> {
        let start = self.peek().span;
        let first = self.parse_oror()?;
        let exclusive = if self.at_punct("..") {
            false
        } else if self.at_punct("...") {
            true
        } else {
            return Ok(first);
        };
        self.advance();
        let last = self.parse_oror()?;
        Ok(Expr::new(
            ExprKind::Range {
                first: Box::new(first),
                last: Box::new(last),
                exclusive,
            },
            self.span_from(start),
        ))
    }

    fn parse_oror(&mut self) -> ParseResult<Expr> {
        let start = self.peek().span;
        let mut left = self.parse_andand()?;
        while self.eat_punct("||") {
            self.skip_newlines();
            let right = self.parse_andand()?;
            left = Expr::new(ExprKind::Or(Box::new(left), Box::new(right)), self.span_from(start));
        }
        Ok(left)
    }

    fn parse_andand(&mut self) -> ParseResult<Expr> {
        let start = self.peek().span;
        let mut left = self.parse_binary(0)?;
        while self.eat_punct("&&") {
            self.skip_newlines();
            let right = self.parse_binary(0)?;
            left = Expr::new(ExprKind::And(Box::new(left), Box::new(right)), self.span_from(start));
        }
        Ok(left)
    }

    /// Left-associative binary operator tiers, loosest first.
    fn parse_binary(&mut self, tier: usize) -> ParseResult<Expr> {
        const TIERS: &[&[&str]] = &[
            BINARY_EQUALITY,
            BINARY_COMPARISON,
            BINARY_SHIFT,
            BINARY_ADDITIVE,
            BINARY_MULTIPLICATIVE,
        ];
        if tier == TIERS.len() {
            return self.parse_unary();
        }
        let start = self.peek().span;
        let mut left = self.parse_binary(tier + 1)?;
        loop {
            let op = match self.kind() {
                TokenKind::Punct(p) if TIERS[tier].contains(p) => *p,
                _ => return Ok(left),
            };
            self.advance();
            self.skip_newlines();
            let right = self.parse_binary(tier + 1)?;
            let span = self.span_from(start);
            left = match op {
                "!=" => negate(call(left, "==", vec![right], span)),
                _ => call(left, op, vec![right], span),
            };
        }
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        let start = self.peek().span;
        if self.at_punct("-") {
            self.advance();
            let next = self.peek();
            if let TokenKind::Integer(n) = next.kind {
                if !next.space_before {
                    self.advance();
                    let literal = Expr::new(ExprKind::Integer(-n), self.span_from(start));
                    return self.parse_postfix(literal);
                }
            }
            let operand = self.parse_unary()?;
            let span = self.span_from(start);
            return Ok(call(operand, "-@", Vec::new(), span));
        }
        if self.at_punct("!") {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::new(ExprKind::Not(Box::new(operand)), self.span_from(start)));
        }
        let primary = self.parse_primary()?;
        self.parse_postfix(primary)
    }

    fn parse_postfix(&mut self, mut expr: Expr) -> ParseResult<Expr> {
        loop {
            let start = expr.span;
            if self.at_punct(".") {
                self.advance();
                self.skip_newlines();
                let tok = self.advance();
                let name = match tok.kind {
                    TokenKind::Identifier(name) | TokenKind::Constant(name) => name,
                    TokenKind::Keyword(_) => tok.lexeme,
                    _ => {
                        return Err(ParseError::new(
                            format!("expected a method name, found {}", tok.kind.name()),
                            tok.span,
                        ));
                    }
                };
                expr = self.parse_call_rest(Some(expr), name, start)?;
            } else if self.at_punct("[") && !self.peek().space_before {
                self.advance();
                let args = self.parse_arg_list(Some("]"))?;
                let span = self.span_from(start);
                expr = Expr::new(
                    ExprKind::Call {
                        receiver: Some(Box::new(expr)),
                        name: "[]".into(),
                        args,
                        block: None,
                    },
                    span,
                );
            } else {
                return Ok(expr);
            }
        }
    }

    /// Arguments and block of a call whose receiver and name are parsed.
    fn parse_call_rest(
        &mut self,
        receiver: Option<Expr>,
        name: String,
        start: Span,
    ) -> ParseResult<Expr> {
        let args = if self.at_punct("(") && !self.peek().space_before {
            self.advance();
            self.parse_arg_list(Some(")"))?
        } else if self.at_command_arg() {
            self.with_no_do(true, |p| p.parse_arg_list(None))?
        } else {
            Vec::new()
        };
        let block = self.parse_block_literal()?;
        Ok(Expr::new(
            ExprKind::Call {
                receiver: receiver.map(Box::new),
                name,
                args,
                block: block.map(Box::new),
            },
            self.span_from(start),
        ))
    }

    /// Whether the next token starts a paren-less argument list.
    fn at_command_arg(&self) -> bool {
        let tok = self.peek();
        if !tok.space_before {
            return false;
        }
        match &tok.kind {
            TokenKind::Integer(_)
            | TokenKind::String(_)
            | TokenKind::InterpString(_)
            | TokenKind::Symbol(_)
            | TokenKind::Identifier(_)
            | TokenKind::Constant(_)
            | TokenKind::Ivar(_)
            | TokenKind::Cvar(_)
            | TokenKind::Global(_)
            | TokenKind::Label(_) => true,
            TokenKind::Keyword(kw) => matches!(
                kw,
                Keyword::Nil
                    | Keyword::True
                    | Keyword::False
                    | Keyword::SelfKw
                    | Keyword::Not
                    | Keyword::Yield
            ),
            TokenKind::Punct("[" | "(" | "::") => true,
            TokenKind::Punct("-" | "*" | "!") => !self.peek_at(1).space_before,
            _ => false,
        }
    }

    /// Comma-separated arguments, up to `close` when given. Trailing
    /// `key => value` and `label: value` pairs are gathered into one hash.
    fn parse_arg_list(&mut self, close: Option<&'static str>) -> ParseResult<Vec<Arg>> {
        let inner = |p: &mut Self| -> ParseResult<Vec<Arg>> {
            let mut args = Vec::new();
            let mut pairs = Vec::new();
            let start = p.peek().span;
            if let Some(close) = close {
                p.skip_newlines();
                if p.eat_punct(close) {
                    return Ok(args);
                }
            }
            loop {
                if p.at_punct("&") {
                    return Err(ParseError::new(
                        "block arguments are not supported",
                        p.peek().span,
                    ));
                }
                if p.eat_punct("*") {
                    args.push(Arg::Splat(p.parse_expr()?));
                } else if let TokenKind::Label(label) = p.kind().clone() {
                    let tok = p.advance();
                    p.skip_newlines();
                    let key = Expr::new(ExprKind::Symbol(label), tok.span);
                    pairs.push((key, p.parse_expr()?));
                } else {
                    let expr = p.parse_expr()?;
                    if p.eat_punct("=>") {
                        p.skip_newlines();
                        pairs.push((expr, p.parse_expr()?));
                    } else {
                        args.push(Arg::Plain(expr));
                    }
                }
                if close.is_some() {
                    p.skip_newlines();
                }
                if !p.eat_punct(",") {
                    break;
                }
                p.skip_newlines();
                if close.is_some_and(|c| p.at_punct(c)) {
                    break;
                }
            }
            if !pairs.is_empty() {
                let span = p.span_from(start);
                args.push(Arg::Plain(Expr::new(ExprKind::Hash(pairs), span)));
            }
            if let Some(close) = close {
                p.expect_punct(close)?;
            }
            Ok(args)
        };
        if close.is_some() {
            self.with_no_do(false, inner)
        } else {
            inner(self)
        }
    }

    fn parse_block_literal(&mut self) -> ParseResult<Option<BlockLit>> {
        let (close, start) = if self.at_punct("{") {
            ("}", self.advance().span)
        } else if self.at_kw(Keyword::Do) && !self.no_do {
            ("end", self.advance().span)
        } else {
            return Ok(None);
        };
        self.with_no_do(false, |p| {
            p.push_scope(true);
            let params = p.parse_block_params()?;
            let body = p.parse_body()?;
            if close == "}" {
                p.expect_punct("}")?;
            } else {
                p.expect_kw(Keyword::End)?;
            }
            let scope = p.pop_scope();
            Ok(Some(BlockLit {
                params,
                body: Body {
                    locals: scope.locals,
                    body,
                },
                span: p.span_from(start),
            }))
        })
    }

    fn parse_block_params(&mut self) -> ParseResult<Params> {
        let mut params = Params::default();
        self.skip_newlines();
        if self.eat_punct("||") || !self.eat_punct("|") {
            return Ok(params);
        }
        loop {
            let splat = self.eat_punct("*");
            let tok = self.advance();
            let TokenKind::Identifier(name) = tok.kind else {
                return Err(ParseError::new(
                    format!("expected a block parameter, found {}", tok.kind.name()),
                    tok.span,
                ));
            };
            self.declare_param(&name, tok.span)?;
            if splat {
                params.splat = Some(name);
            } else if params.splat.is_some() {
                return Err(ParseError::new("parameter after splat", tok.span));
            } else {
                params.required.push(name);
            }
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct("|")?;
        Ok(params)
    }

    // ───────────────────────────────────────────────────────────
    //  Primaries
    // ───────────────────────────────────────────────────────────

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let tok = self.peek().clone();
        let span = tok.span;
        let simple = |kind| Ok(Expr::new(kind, span));
        match tok.kind {
            TokenKind::Integer(n) => {
                self.advance();
                simple(ExprKind::Integer(n))
            }
            TokenKind::String(s) => {
                self.advance();
                simple(ExprKind::String(s))
            }
            TokenKind::InterpString(parts) => {
                self.advance();
                self.interpolate(parts, span)
            }
            TokenKind::Symbol(s) => {
                self.advance();
                simple(ExprKind::Symbol(s))
            }
            TokenKind::Ivar(name) => {
                self.advance();
                simple(ExprKind::Ivar(name))
            }
            TokenKind::Cvar(name) => {
                self.advance();
                simple(ExprKind::Cvar(name))
            }
            TokenKind::Global(name) => {
                self.advance();
                simple(ExprKind::Global(name))
            }
            TokenKind::Constant(name) => {
                self.advance();
                if self.at_punct("(") && !self.peek().space_before {
                    return self.parse_call_rest(None, name, span);
                }
                simple(ExprKind::Const(name))
            }
            TokenKind::Identifier(name) => {
                self.advance();
                let call_syntax = self.at_punct("(") && !self.peek().space_before;
                if !call_syntax && self.is_local(&name) {
                    return simple(ExprKind::Local(name));
                }
                self.parse_call_rest(None, name, span)
            }
            TokenKind::Keyword(kw) => self.parse_keyword(kw, span),
            TokenKind::Punct("(") => {
                self.advance();
                self.with_no_do(false, |p| {
                    let body = p.parse_statements()?;
                    p.expect_punct(")")?;
                    Ok(Expr::sequence(body, p.span_from(span)))
                })
            }
            TokenKind::Punct("[") => {
                self.advance();
                let items = self.parse_arg_list(Some("]"))?;
                Ok(Expr::new(ExprKind::Array(items), self.span_from(span)))
            }
            TokenKind::Punct("{") => {
                self.advance();
                self.with_no_do(false, |p| p.parse_hash(span))
            }
            TokenKind::Punct("::") => {
                self.advance();
                let tok = self.advance();
                match tok.kind {
                    TokenKind::Constant(name) => {
                        Ok(Expr::new(ExprKind::Const(name), self.span_from(span)))
                    }
                    _ => Err(ParseError::new("expected a constant after `::`", tok.span)),
                }
            }
            _ => Err(self.unexpected()),
        }
    }

    fn parse_keyword(&mut self, kw: Keyword, span: Span) -> ParseResult<Expr> {
        match kw {
            Keyword::Nil => {
                self.advance();
                Ok(Expr::new(ExprKind::Nil, span))
            }
            Keyword::True => {
                self.advance();
                Ok(Expr::new(ExprKind::True, span))
            }
            Keyword::False => {
                self.advance();
                Ok(Expr::new(ExprKind::False, span))
            }
            Keyword::SelfKw => {
                self.advance();
                Ok(Expr::new(ExprKind::SelfRef, span))
            }
            Keyword::Not => {
                self.advance();
                let operand = self.parse_expr()?;
                Ok(Expr::new(ExprKind::Not(Box::new(operand)), self.span_from(span)))
            }
            Keyword::If | Keyword::Unless => {
                self.advance();
                self.parse_if_rest(kw == Keyword::Unless, span)
            }
            Keyword::While | Keyword::Until => {
                self.advance();
                self.parse_while_rest(kw == Keyword::Until, span)
            }
            Keyword::Begin => {
                self.advance();
                let body = self.with_no_do(false, Self::parse_body)?;
                self.expect_kw(Keyword::End)?;
                Ok(Expr::new(ExprKind::Begin(vec![body]), self.span_from(span)))
            }
            Keyword::Return | Keyword::Break | Keyword::Next => {
                self.advance();
                let value = self.parse_jump_value()?.map(Box::new);
                let span = self.span_from(span);
                Ok(Expr::new(
                    match kw {
                        Keyword::Return => ExprKind::Return(value),
                        Keyword::Break => ExprKind::Break(value),
                        _ => ExprKind::Next(value),
                    },
                    span,
                ))
            }
            Keyword::Yield => {
                self.advance();
                let args = if self.at_punct("(") && !self.peek().space_before {
                    self.advance();
                    self.parse_arg_list(Some(")"))?
                } else if self.at_command_arg() {
                    self.with_no_do(true, |p| p.parse_arg_list(None))?
                } else {
                    Vec::new()
                };
                Ok(Expr::new(ExprKind::Yield(args), self.span_from(span)))
            }
            Keyword::Def => {
                self.advance();
                self.parse_def(span)
            }
            Keyword::Class => {
                self.advance();
                self.parse_class(span)
            }
            Keyword::Module => {
                self.advance();
                self.parse_module(span)
            }
            _ => Err(self.unexpected()),
        }
    }

    /// The optional value of `return`, `break` and `next`. Several values
    /// are returned as an array.
    fn parse_jump_value(&mut self) -> ParseResult<Option<Expr>> {
        if self.at_term() || self.at_body_end() {
            return Ok(None);
        }
        if let TokenKind::Keyword(
            Keyword::If | Keyword::Unless | Keyword::While | Keyword::Until,
        ) = self.kind()
        {
            return Ok(None);
        }
        let start = self.peek().span;
        let first = self.parse_expr()?;
        if !self.at_punct(",") {
            return Ok(Some(first));
        }
        let mut items = vec![Arg::Plain(first)];
        while self.eat_punct(",") {
            self.skip_newlines();
            items.push(Arg::Plain(self.parse_expr()?));
        }
        Ok(Some(Expr::new(ExprKind::Array(items), self.span_from(start))))
    }

    fn parse_then(&mut self) {
        self.skip_terms();
        if self.eat_kw(Keyword::Then) {
            self.skip_terms();
        }
    }

    fn parse_if_rest(&mut self, unless: bool, start: Span) -> ParseResult<Expr> {
        let cond = self.parse_expr_stmt()?;
        let cond = if unless { negate(cond) } else { cond };
        self.parse_then();
        let then = self.parse_body()?;
        let otherwise = if !unless && self.at_kw(Keyword::Elsif) {
            let elsif = self.advance().span;
            Some(self.parse_if_rest(false, elsif)?)
        } else if self.eat_kw(Keyword::Else) {
            let body = self.parse_body()?;
            self.expect_kw(Keyword::End)?;
            Some(body)
        } else {
            self.expect_kw(Keyword::End)?;
            None
        };
        Ok(Expr::new(
            ExprKind::If {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: otherwise.map(Box::new),
            },
            self.span_from(start),
        ))
    }

    fn parse_while_rest(&mut self, until: bool, start: Span) -> ParseResult<Expr> {
        let cond = self.with_no_do(true, Self::parse_expr_stmt)?;
        self.skip_terms();
        if self.eat_kw(Keyword::Do) {
            self.skip_terms();
        }
        let body = self.with_no_do(false, Self::parse_body)?;
        self.expect_kw(Keyword::End)?;
        Ok(Expr::new(
            ExprKind::While {
                cond: Box::new(cond),
                body: Box::new(body),
                until,
            },
            self.span_from(start),
        ))
    }

    fn parse_hash(&mut self, start: Span) -> ParseResult<Expr> {
        let mut pairs = Vec::new();
        loop {
            self.skip_newlines();
            if self.eat_punct("}") {
                break;
            }
            if let TokenKind::Label(label) = self.kind().clone() {
                let tok = self.advance();
                self.skip_newlines();
                let key = Expr::new(ExprKind::Symbol(label), tok.span);
                pairs.push((key, self.parse_expr()?));
            } else {
                let key = self.parse_expr()?;
                self.skip_newlines();
                self.expect_punct("=>")?;
                self.skip_newlines();
                pairs.push((key, self.parse_expr()?));
            }
            self.skip_newlines();
            if !self.eat_punct(",") {
                self.expect_punct("}")?;
                break;
            }
        }
        Ok(Expr::new(ExprKind::Hash(pairs), self.span_from(start)))
    }

    /// `"a#{b}c"` becomes `"a" + b.to_s + "c"`.
    fn interpolate(&mut self, parts: Vec<StrPart>, span: Span) -> ParseResult<Expr> {
        let mut result: Option<Expr> = None;
        for part in parts {
            let piece = match part {
                StrPart::Literal(text) => Expr::new(ExprKind::String(text), span),
                StrPart::Code(source) => {
                    let inner = self.parse_embedded(&source, span)?;
                    call(inner, "to_s", Vec::new(), span)
                }
            };
            result = Some(match result {
                None => piece,
                Some(acc) => call(acc, "+", vec![piece], span),
            });
        }
        Ok(result.unwrap_or_else(|| Expr::new(ExprKind::String(String::new()), span)))
    }

    /// Parse the code of an interpolation in the current local scope.
    fn parse_embedded(&mut self, source: &str, at: Span) -> ParseResult<Expr> {
        let line_offset = at.start.line.saturating_sub(1);
        let tokens = Lexer::from_str(source).map(|mut tok| {
            tok.span.start.line += line_offset;
            tok.span.end.line += line_offset;
            tok
        });
        let mut sub = Parser::new(tokens);
        sub.scopes = std::mem::take(&mut self.scopes);
        let body = sub.parse_statements();
        let trailing = (!sub.peek().is_eof()).then(|| sub.unexpected());
        self.scopes = std::mem::take(&mut sub.scopes);
        let body = body?;
        if let Some(err) = trailing {
            return Err(err);
        }
        Ok(Expr::sequence(body, at))
    }

    // ───────────────────────────────────────────────────────────
    //  Definitions
    // ───────────────────────────────────────────────────────────

    fn parse_def(&mut self, start: Span) -> ParseResult<Expr> {
        let singleton = match (self.kind(), &self.peek_at(1).kind) {
            (TokenKind::Keyword(Keyword::SelfKw), TokenKind::Punct(".")) => {
                let tok = self.advance();
                self.advance();
                Some(Expr::new(ExprKind::SelfRef, tok.span))
            }
            (TokenKind::Constant(name), TokenKind::Punct(".")) => {
                let receiver = ExprKind::Const(name.clone());
                let tok = self.advance();
                self.advance();
                Some(Expr::new(receiver, tok.span))
            }
            _ => None,
        };
        let name = self.parse_def_name()?;

        self.push_scope(false);
        let params = if self.at_punct("(") {
            self.advance();
            let params = self.parse_params(Some(")"))?;
            self.expect_punct(")")?;
            params
        } else if self.at_term() {
            Params::default()
        } else {
            self.parse_params(None)?
        };
        let body = self.with_no_do(false, Self::parse_body);
        let scope = self.pop_scope();
        let body = body?;
        self.expect_kw(Keyword::End)?;

        let def = MethodDef {
            singleton,
            name,
            params,
            body: Body {
                locals: scope.locals,
                body,
            },
        };
        Ok(Expr::new(ExprKind::Def(Box::new(def)), self.span_from(start)))
    }

    fn parse_def_name(&mut self) -> ParseResult<String> {
        let tok = self.advance();
        match tok.kind {
            TokenKind::Identifier(name) => {
                let setter = self.at_punct("=")
                    && !self.peek().space_before
                    && self.peek_at(1).kind.is_punct("(");
                if setter {
                    self.advance();
                    return Ok(format!("{name}="));
                }
                Ok(name)
            }
            TokenKind::Constant(name) => Ok(name),
            TokenKind::Keyword(_) => Ok(tok.lexeme),
            TokenKind::Punct("[") => {
                self.expect_punct("]")?;
                if self.at_punct("=") && !self.peek().space_before {
                    self.advance();
                    return Ok("[]=".into());
                }
                Ok("[]".into())
            }
            TokenKind::Punct(op) if OPERATOR_METHODS.contains(&op) => Ok(op.to_string()),
            kind => Err(ParseError::new(
                format!("expected a method name, found {}", kind.name()),
                tok.span,
            )),
        }
    }

    fn parse_params(&mut self, close: Option<&str>) -> ParseResult<Params> {
        let mut params = Params::default();
        if close.is_some_and(|c| self.at_punct(c)) {
            return Ok(params);
        }
        loop {
            self.skip_newlines();
            if self.at_punct("&") {
                return Err(ParseError::new(
                    "block parameters are not supported",
                    self.peek().span,
                ));
            }
            let splat = self.eat_punct("*");
            let tok = self.advance();
            let TokenKind::Identifier(name) = tok.kind else {
                return Err(ParseError::new(
                    format!("expected a parameter name, found {}", tok.kind.name()),
                    tok.span,
                ));
            };
            self.declare_param(&name, tok.span)?;
            if params.splat.is_some() {
                return Err(ParseError::new("parameter after splat", tok.span));
            }
            if splat {
                params.splat = Some(name);
            } else if self.eat_punct("=") {
                let default = self.parse_expr()?;
                params.optional.push((name, default));
            } else if !params.optional.is_empty() {
                return Err(ParseError::new(
                    "required parameter after optional parameters",
                    tok.span,
                ));
            } else {
                params.required.push(name);
            }
            if close.is_some() {
                self.skip_newlines();
            }
            if !self.eat_punct(",") {
                return Ok(params);
            }
        }
    }

    fn parse_class(&mut self, start: Span) -> ParseResult<Expr> {
        if self.at_punct("<<") {
            return Err(ParseError::new(
                "singleton class bodies are not supported",
                self.peek().span,
            ));
        }
        let name = self.parse_constant_name()?;
        let superclass = if self.eat_punct("<") {
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };
        let body = self.parse_scoped_body()?;
        Ok(Expr::new(
            ExprKind::Class {
                name,
                superclass,
                body: Box::new(body),
            },
            self.span_from(start),
        ))
    }

    fn parse_module(&mut self, start: Span) -> ParseResult<Expr> {
        let name = self.parse_constant_name()?;
        let body = self.parse_scoped_body()?;
        Ok(Expr::new(
            ExprKind::Module {
                name,
                body: Box::new(body),
            },
            self.span_from(start),
        ))
    }

    fn parse_constant_name(&mut self) -> ParseResult<String> {
        let tok = self.advance();
        match tok.kind {
            TokenKind::Constant(name) => Ok(name),
            kind => Err(ParseError::new(
                format!("expected a constant name, found {}", kind.name()),
                tok.span,
            )),
        }
    }

    /// A `class`/`module` body up to and including its `end`.
    fn parse_scoped_body(&mut self) -> ParseResult<Body> {
        self.push_scope(false);
        let body = self.with_no_do(false, Self::parse_body);
        let scope = self.pop_scope();
        let body = body?;
        self.expect_kw(Keyword::End)?;
        Ok(Body {
            locals: scope.locals,
            body,
        })
    }
}

fn is_local_name(name: &str) -> bool {
    name.starts_with(|c: char| c.is_lowercase() || c == '_')
        && !name.ends_with(['?', '!', '='])
}

fn negate(expr: Expr) -> Expr {
    let span = expr.span;
    Expr::new(ExprKind::Not(Box::new(expr)), span)
}

fn call(receiver: Expr, name: &str, args: Vec<Expr>, span: Span) -> Expr {
    Expr::new(
        ExprKind::Call {
            receiver: Some(Box::new(receiver)),
            name: name.to_string(),
            args: args.into_iter().map(Arg::Plain).collect(),
            block: None,
        },
        span,
    )
}

fn assign(place: Place, value: Expr, span: Span) -> Expr {
    match place {
        Place::Var(target) => Expr::new(
            ExprKind::Assign {
                target,
                value: Box::new(value),
            },
            span,
        ),
        Place::Index { receiver, mut args } => {
            args.push(Arg::Plain(value));
            Expr::new(
                ExprKind::Call {
                    receiver: Some(Box::new(receiver)),
                    name: "[]=".into(),
                    args,
                    block: None,
                },
                span,
            )
        }
        Place::Attr { receiver, name } => call(receiver, &format!("{name}="), vec![value], span),
    }
}

/// The current value of a place, for compound assignment.
fn read_place(place: &Place, span: Span) -> Expr {
    match place {
        Place::Var(target) => Expr::new(
            match target {
                Target::Local(n) => ExprKind::Local(n.clone()),
                Target::Ivar(n) => ExprKind::Ivar(n.clone()),
                Target::Cvar(n) => ExprKind::Cvar(n.clone()),
                Target::Global(n) => ExprKind::Global(n.clone()),
                Target::Const(n) => ExprKind::Const(n.clone()),
            },
            span,
        ),
        Place::Index { receiver, args } => Expr::new(
            ExprKind::Call {
                receiver: Some(Box::new(receiver.clone())),
                name: "[]".into(),
                args: args.clone(),
                block: None,
            },
            span,
        ),
        Place::Attr { receiver, name } => call(receiver.clone(), name, Vec::new(), span),
    }
}
