/// Abstract syntax tree nodes.
///
/// The parser desugars as it goes: binary operators, index access and
/// attribute writes all become [`ExprKind::Call`]; string interpolation
/// becomes `+` and `to_s` calls; `a += b` becomes `a = a + b`. What remains
/// is a small core the compiler lowers directly.
///
/// Every scope-introducing node (the program, `def`, `class`/`module`
/// bodies and block literals) records the local variables first assigned
/// inside it, in order of appearance.
use crate::span::Span;

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn nil(span: Span) -> Self {
        Self::new(ExprKind::Nil, span)
    }

    /// Wrap a statement list; a single statement is returned as is.
    pub fn sequence(mut body: Vec<Expr>, span: Span) -> Self {
        if body.len() == 1 {
            if let Some(only) = body.pop() {
                return only;
            }
        }
        Self::new(ExprKind::Begin(body), span)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Nil,
    True,
    False,
    SelfRef,
    Integer(i64),
    String(String),
    Symbol(String),
    Array(Vec<Arg>),
    Hash(Vec<(Expr, Expr)>),
    Range {
        first: Box<Expr>,
        last: Box<Expr>,
        exclusive: bool,
    },

    /// A read of a local variable known at this point.
    Local(String),
    Ivar(String),
    Cvar(String),
    Global(String),
    Const(String),

    Assign {
        target: Target,
        value: Box<Expr>,
    },

    /// A message send. `receiver: None` sends to `self`.
    Call {
        receiver: Option<Box<Expr>>,
        name: String,
        args: Vec<Arg>,
        block: Option<Box<BlockLit>>,
    },

    /// `!expr` and `not expr`: truthiness negation, never a send.
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),

    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Option<Box<Expr>>,
    },
    While {
        cond: Box<Expr>,
        body: Box<Expr>,
        /// `until`: loop while the condition is falsy.
        until: bool,
    },
    Return(Option<Box<Expr>>),
    Break(Option<Box<Expr>>),
    Next(Option<Box<Expr>>),
    Yield(Vec<Arg>),

    Def(Box<MethodDef>),
    Class {
        name: String,
        superclass: Option<Box<Expr>>,
        body: Box<Body>,
    },
    Module {
        name: String,
        body: Box<Body>,
    },

    /// A statement sequence; evaluates to its last statement or `nil`.
    Begin(Vec<Expr>),
}

/// Assignable places. Index and attribute writes are calls instead.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Local(String),
    Ivar(String),
    Cvar(String),
    Global(String),
    Const(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Plain(Expr),
    /// `*expr`: expanded into positional arguments at the call.
    Splat(Expr),
}

impl Arg {
    pub fn expr(&self) -> &Expr {
        match self {
            Arg::Plain(e) | Arg::Splat(e) => e,
        }
    }
}

/// Formal parameters, in the order `required, optional = default, *splat`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    pub required: Vec<String>,
    pub optional: Vec<(String, Expr)>,
    pub splat: Option<String>,
}

impl Params {
    /// Parameter names in register order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.required
            .iter()
            .map(String::as_str)
            .chain(self.optional.iter().map(|(n, _)| n.as_str()))
            .chain(self.splat.as_deref())
    }

    pub fn len(&self) -> usize {
        self.required.len() + self.optional.len() + self.splat.is_some() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A body together with the locals it introduces.
#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    pub locals: Vec<String>,
    pub body: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    /// `def self.name` / `def Const.name`.
    pub singleton: Option<Expr>,
    pub name: String,
    pub params: Params,
    pub body: Body,
}

/// `{ |params| body }` or `do |params| body end`.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockLit {
    pub params: Params,
    pub body: Body,
    pub span: Span,
}

/// A parsed source file.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub locals: Vec<String>,
    pub body: Vec<Expr>,
}
