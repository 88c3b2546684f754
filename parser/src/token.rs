/// Token types produced by the lexer.
use crate::span::Span;

/// Reserved words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    And,
    Begin,
    Break,
    Class,
    Def,
    Do,
    Else,
    Elsif,
    End,
    False,
    If,
    Module,
    Next,
    Nil,
    Not,
    Or,
    Return,
    SelfKw,
    Then,
    True,
    Unless,
    Until,
    While,
    Yield,
}

impl Keyword {
    pub fn from_ident(ident: &str) -> Option<Self> {
        Some(match ident {
            "and" => Self::And,
            "begin" => Self::Begin,
            "break" => Self::Break,
            "class" => Self::Class,
            "def" => Self::Def,
            "do" => Self::Do,
            "else" => Self::Else,
            "elsif" => Self::Elsif,
            "end" => Self::End,
            "false" => Self::False,
            "if" => Self::If,
            "module" => Self::Module,
            "next" => Self::Next,
            "nil" => Self::Nil,
            "not" => Self::Not,
            "or" => Self::Or,
            "return" => Self::Return,
            "self" => Self::SelfKw,
            "then" => Self::Then,
            "true" => Self::True,
            "unless" => Self::Unless,
            "until" => Self::Until,
            "while" => Self::While,
            "yield" => Self::Yield,
            _ => return None,
        })
    }
}

/// One piece of a double-quoted string.
#[derive(Debug, Clone, PartialEq)]
pub enum StrPart {
    Literal(std::string::String),
    /// The raw source between `#{` and `}`.
    Code(std::string::String),
}

/// The kind of a lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Integer literal, e.g. `42`, `1_000`.
    Integer(i64),
    /// String literal without interpolation (contents without quotes).
    String(std::string::String),
    /// Double-quoted string containing at least one `#{...}`.
    InterpString(Vec<StrPart>),
    /// Symbol literal without the leading colon, e.g. `:each` → `each`.
    Symbol(std::string::String),

    /// A lowercase-starting identifier, possibly ending in `?` or `!`.
    Identifier(std::string::String),
    /// An uppercase-starting identifier.
    Constant(std::string::String),
    /// `@name`, including the sigil.
    Ivar(std::string::String),
    /// `@@name`, including the sigil.
    Cvar(std::string::String),
    /// `$name`, including the sigil.
    Global(std::string::String),
    /// `name:` used as a hash key.
    Label(std::string::String),
    Keyword(Keyword),

    /// Operators and delimiters, e.g. `+`, `<=`, `(`, `...`.
    Punct(&'static str),

    /// A significant line break.
    Newline,
    /// A line comment: `# ...` (text does NOT include the leading `#`).
    Comment(std::string::String),

    /// End of input.
    Eof,
    /// An unrecognized character or malformed token.
    Error(std::string::String),
}

impl TokenKind {
    /// Human-readable name for error messages.
    pub fn name(&self) -> std::string::String {
        match self {
            Self::Integer(_) => "integer".into(),
            Self::String(_) | Self::InterpString(_) => "string".into(),
            Self::Symbol(_) => "symbol".into(),
            Self::Identifier(name) => format!("identifier `{name}`"),
            Self::Constant(name) => format!("constant `{name}`"),
            Self::Ivar(name) | Self::Cvar(name) | Self::Global(name) => {
                format!("variable `{name}`")
            }
            Self::Label(name) => format!("label `{name}:`"),
            Self::Keyword(kw) => format!("keyword `{}`", format!("{kw:?}").to_lowercase()),
            Self::Punct(p) => format!("`{p}`"),
            Self::Newline => "newline".into(),
            Self::Comment(_) => "comment".into(),
            Self::Eof => "end of input".into(),
            Self::Error(msg) => msg.clone(),
        }
    }

    pub fn is_comment(&self) -> bool {
        matches!(self, Self::Comment(_))
    }

    pub fn is_punct(&self, p: &str) -> bool {
        matches!(self, Self::Punct(q) if *q == p)
    }

    pub fn is_keyword(&self, kw: Keyword) -> bool {
        matches!(self, Self::Keyword(k) if *k == kw)
    }
}

/// A token with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    /// The original source text of this token.
    pub lexeme: std::string::String,
    /// Whether whitespace separated this token from the previous one.
    /// Distinguishes `foo -1` (argument) from `foo - 1` (subtraction).
    pub space_before: bool,
}

impl Token {
    pub fn new(
        kind: TokenKind,
        span: Span,
        lexeme: impl Into<std::string::String>,
    ) -> Self {
        Self {
            kind,
            span,
            lexeme: lexeme.into(),
            space_before: false,
        }
    }

    pub fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::Eof)
    }

    pub fn is_comment(&self) -> bool {
        self.kind.is_comment()
    }
}
