/// Streaming lexer for the scripting language.
///
/// The [`Lexer`] consumes bytes from any [`std::io::Read`] source and
/// implements [`Iterator`] over [`Token`]s. It tracks byte offset, line,
/// and column for every token it produces.
///
/// # Line structure
///
/// Line breaks are significant: they are reported as
/// [`TokenKind::Newline`], collapsed so that blank lines and comment-only
/// lines yield at most one. A backslash immediately before the line break
/// joins the two lines.
///
/// # Strings
///
/// | Syntax      | Escapes                        | Interpolation |
/// |-------------|--------------------------------|---------------|
/// | `"…"`       | `\n \t \r \0 \e \s \\ \" \#`   | `#{expr}`     |
/// | `'…'`       | `\\ \'`                        | none          |
///
/// The body of each `#{…}` is captured as raw source text; the parser lexes
/// it again on its own.
use std::io::Read;

use crate::span::{Pos, Span};
use crate::token::{Keyword, StrPart, Token, TokenKind};

/// Operators and delimiters, longest first so that the first match wins.
const PUNCTUATION: &[&str] = &[
    "...", "<=>", "===", "<<=", "||=", "&&=", "**", "..", "::", "==", "!=",
    "<=", ">=", "<<", ">>", "&&", "||", "+=", "-=", "*=", "/=", "%=", "=>",
    "=~", "+", "-", "*", "/", "%", "<", ">", "=", "!", "(", ")", "[", "]",
    "{", "}", ",", ".", ";", "|", "&", "?", ":", "^", "~",
];

/// Method names that may follow a `:` to form an operator symbol.
const OPERATOR_SYMBOLS: &[&str] = &[
    "[]=", "<=>", "===", "[]", "==", "<=", ">=", "<<", ">>", "-@", "+@", "+",
    "-", "*", "/", "%", "<", ">", "!",
];

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b >= 0x80
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

// ═══════════════════════════════════════════════════════════════════
// Read buffer: one-byte-at-a-time abstraction over Read
// ═══════════════════════════════════════════════════════════════════

/// Enough lookahead for the longest punctuation plus one byte.
const LOOKAHEAD: usize = 4;

struct ReadBuf<R: Read> {
    reader: R,
    buf: [u8; LOOKAHEAD],
    /// How many valid bytes are in `buf` starting from index 0.
    filled: usize,
    reader_eof: bool,
    offset: usize,
    line: usize,
    column: usize,
}

impl<R: Read> ReadBuf<R> {
    fn new(reader: R) -> Self {
        let mut rb = Self {
            reader,
            buf: [0u8; LOOKAHEAD],
            filled: 0,
            reader_eof: false,
            offset: 0,
            line: 1,
            column: 1,
        };
        rb.fill();
        rb
    }

    fn fill(&mut self) {
        while !self.reader_eof && self.filled < LOOKAHEAD {
            let mut one = [0u8; 1];
            match self.reader.read(&mut one) {
                Ok(0) | Err(_) => self.reader_eof = true,
                Ok(_) => {
                    self.buf[self.filled] = one[0];
                    self.filled += 1;
                }
            }
        }
    }

    fn pos(&self) -> Pos {
        Pos::new(self.offset, self.line, self.column)
    }

    fn peek_ahead(&self, n: usize) -> Option<u8> {
        (n < self.filled).then(|| self.buf[n])
    }

    fn advance(&mut self) -> Option<u8> {
        if self.filled == 0 {
            return None;
        }
        let b = self.buf[0];
        self.buf.copy_within(1..self.filled, 0);
        self.filled -= 1;
        self.fill();

        self.offset += 1;
        if b == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(b)
    }
}

// ═══════════════════════════════════════════════════════════════════
// Lexer
// ═══════════════════════════════════════════════════════════════════

/// A streaming lexer over any [`Read`].
///
/// ```rust
/// use parser::{Lexer, TokenKind};
///
/// let kinds: Vec<TokenKind> = Lexer::from_str("puts 1").map(|t| t.kind).collect();
/// assert_eq!(kinds.len(), 3);
/// ```
pub struct Lexer<R: Read> {
    rb: ReadBuf<R>,
    emitted_eof: bool,
    /// Suppresses repeated and leading newlines.
    at_line_start: bool,
}

impl<R: Read> Lexer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            rb: ReadBuf::new(reader),
            emitted_eof: false,
            at_line_start: true,
        }
    }
}

impl<'a> Lexer<&'a [u8]> {
    /// Create a new lexer from a source string.
    pub fn from_str(source: &'a str) -> Self {
        Self::new(source.as_bytes())
    }
}

impl<R: Read> Lexer<R> {
    fn pos(&self) -> Pos {
        self.rb.pos()
    }

    fn peek(&self) -> Option<u8> {
        self.rb.peek_ahead(0)
    }

    fn peek_ahead(&self, n: usize) -> Option<u8> {
        self.rb.peek_ahead(n)
    }

    fn advance(&mut self) -> Option<u8> {
        self.rb.advance()
    }

    fn starts_with(&self, text: &str) -> bool {
        text.bytes()
            .enumerate()
            .all(|(i, b)| self.peek_ahead(i) == Some(b))
    }

    fn token(&self, kind: TokenKind, start: Pos, raw: impl Into<String>) -> Token {
        Token::new(kind, Span::new(start, self.pos()), raw)
    }

    fn error(&self, message: impl Into<String>, start: Pos, raw: impl Into<String>) -> Token {
        self.token(TokenKind::Error(message.into()), start, raw)
    }

    // ───────────────────────────────────────────────────────────
    //  Whitespace and comments
    // ───────────────────────────────────────────────────────────

    /// Skip blanks and line continuations; returns whether anything was
    /// skipped.
    fn skip_blanks(&mut self) -> bool {
        let mut skipped = false;
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r' | 0x0B | 0x0C) => {
                    self.advance();
                }
                Some(b'\\') if self.peek_ahead(1) == Some(b'\n') => {
                    self.advance();
                    self.advance();
                }
                Some(b'\\')
                    if self.peek_ahead(1) == Some(b'\r')
                        && self.peek_ahead(2) == Some(b'\n') =>
                {
                    self.advance();
                    self.advance();
                    self.advance();
                }
                _ => return skipped,
            }
            skipped = true;
        }
    }

    fn lex_comment(&mut self) -> Token {
        let start = self.pos();
        self.advance(); // `#`
        let mut text = Vec::new();
        while let Some(b) = self.peek() {
            if b == b'\n' {
                break;
            }
            text.push(b);
            self.advance();
        }
        let text = String::from_utf8_lossy(&text).into_owned();
        let raw = format!("#{text}");
        self.token(TokenKind::Comment(text), start, raw)
    }

    // ───────────────────────────────────────────────────────────
    //  Strings
    // ───────────────────────────────────────────────────────────

    fn lex_single_quoted(&mut self) -> Token {
        let start = self.pos();
        self.advance(); // `'`
        let mut value = Vec::new();
        loop {
            match self.advance() {
                Some(b'\'') => break,
                Some(b'\\') if matches!(self.peek(), Some(b'\\' | b'\'')) => {
                    value.extend(self.advance());
                }
                Some(b) => value.push(b),
                None => return self.error("unterminated string", start, "'"),
            }
        }
        let value = String::from_utf8_lossy(&value).into_owned();
        let raw = format!("'{value}'");
        self.token(TokenKind::String(value), start, raw)
    }

    fn lex_double_quoted(&mut self) -> Token {
        let start = self.pos();
        self.advance(); // `"`
        let mut parts = Vec::new();
        let mut literal = Vec::new();
        loop {
            match self.advance() {
                Some(b'"') => break,
                Some(b'\\') => match self.advance() {
                    Some(b'n') => literal.push(b'\n'),
                    Some(b't') => literal.push(b'\t'),
                    Some(b'r') => literal.push(b'\r'),
                    Some(b'0') => literal.push(0),
                    Some(b'e') => literal.push(0x1b),
                    Some(b's') => literal.push(b' '),
                    Some(b) => literal.push(b),
                    None => {
                        return self.error("unterminated string escape", start, "\"");
                    }
                },
                Some(b'#') if self.peek() == Some(b'{') => {
                    self.advance();
                    if !literal.is_empty() {
                        parts.push(StrPart::Literal(
                            String::from_utf8_lossy(&literal).into_owned(),
                        ));
                        literal.clear();
                    }
                    match self.interpolated_code() {
                        Some(code) => parts.push(StrPart::Code(code)),
                        None => {
                            return self.error("unterminated interpolation", start, "\"");
                        }
                    }
                }
                Some(b) => literal.push(b),
                None => return self.error("unterminated string", start, "\""),
            }
        }
        let literal = String::from_utf8_lossy(&literal).into_owned();
        if parts.is_empty() {
            let raw = format!("\"{literal}\"");
            return self.token(TokenKind::String(literal), start, raw);
        }
        if !literal.is_empty() {
            parts.push(StrPart::Literal(literal));
        }
        self.token(TokenKind::InterpString(parts), start, "\"…\"")
    }

    /// Collect the source of a `#{…}` body up to its matching brace.
    fn interpolated_code(&mut self) -> Option<String> {
        let mut code = Vec::new();
        let mut depth = 0usize;
        loop {
            let b = self.advance()?;
            match b {
                b'{' => depth += 1,
                b'}' if depth == 0 => break,
                b'}' => depth -= 1,
                b'"' | b'\'' => {
                    code.push(b);
                    loop {
                        let c = self.advance()?;
                        code.push(c);
                        if c == b'\\' {
                            code.push(self.advance()?);
                        } else if c == b {
                            break;
                        }
                    }
                    continue;
                }
                _ => {}
            }
            code.push(b);
        }
        Some(String::from_utf8_lossy(&code).into_owned())
    }

    // ───────────────────────────────────────────────────────────
    //  Numbers
    // ───────────────────────────────────────────────────────────

    fn lex_number(&mut self) -> Token {
        let start = self.pos();
        let mut raw = String::new();
        while let Some(b) = self.peek() {
            if b.is_ascii_digit() || (b == b'_' && !raw.is_empty()) {
                raw.push(b as char);
                self.advance();
            } else {
                break;
            }
        }
        let normalized: String = raw.chars().filter(|c| *c != '_').collect();
        match normalized.parse::<i64>() {
            Ok(v) => self.token(TokenKind::Integer(v), start, raw),
            Err(e) => self.error(format!("invalid integer: {e}"), start, raw),
        }
    }

    // ───────────────────────────────────────────────────────────
    //  Identifiers and variables
    // ───────────────────────────────────────────────────────────

    fn take_name(&mut self) -> String {
        let mut name = Vec::new();
        while let Some(b) = self.peek() {
            if !is_ident_char(b) {
                break;
            }
            name.push(b);
            self.advance();
        }
        String::from_utf8_lossy(&name).into_owned()
    }

    /// Consume a trailing `?` or `!` that belongs to a method name.
    fn take_predicate_suffix(&mut self, name: &mut String) {
        if let Some(b @ (b'?' | b'!')) = self.peek() {
            if self.peek_ahead(1) != Some(b'=') {
                name.push(b as char);
                self.advance();
            }
        }
    }

    fn lex_identifier(&mut self) -> Token {
        let start = self.pos();
        let mut name = self.take_name();
        let constant = name.starts_with(|c: char| c.is_ascii_uppercase());
        if !constant {
            self.take_predicate_suffix(&mut name);
        }

        if self.peek() == Some(b':') && self.peek_ahead(1) != Some(b':') {
            self.advance();
            let raw = format!("{name}:");
            return self.token(TokenKind::Label(name), start, raw);
        }

        let kind = if constant {
            TokenKind::Constant(name.clone())
        } else if let Some(kw) = Keyword::from_ident(&name) {
            TokenKind::Keyword(kw)
        } else {
            TokenKind::Identifier(name.clone())
        };
        self.token(kind, start, name)
    }

    fn lex_variable(&mut self) -> Token {
        let start = self.pos();
        let mut sigil = String::new();
        while let Some(b @ (b'@' | b'$')) = self.peek() {
            if sigil.len() == 2 || (b == b'$' && !sigil.is_empty()) {
                break;
            }
            sigil.push(b as char);
            self.advance();
        }
        if !self.peek().is_some_and(is_ident_start) {
            return self.error(format!("expected a name after `{sigil}`"), start, sigil);
        }
        let name = format!("{sigil}{}", self.take_name());
        let kind = match sigil.as_str() {
            "@" => TokenKind::Ivar(name.clone()),
            "@@" => TokenKind::Cvar(name.clone()),
            _ => TokenKind::Global(name.clone()),
        };
        self.token(kind, start, name)
    }

    // ───────────────────────────────────────────────────────────
    //  `:`: symbols and scope resolution
    // ───────────────────────────────────────────────────────────

    fn lex_colon(&mut self) -> Token {
        let start = self.pos();
        if self.peek_ahead(1) == Some(b':') {
            self.advance();
            self.advance();
            return self.token(TokenKind::Punct("::"), start, "::");
        }
        match self.peek_ahead(1) {
            Some(b) if is_ident_start(b) => {
                self.advance();
                let mut name = self.take_name();
                self.take_predicate_suffix(&mut name);
                if self.peek() == Some(b'=')
                    && !matches!(self.peek_ahead(1), Some(b'=' | b'>' | b'~'))
                {
                    self.advance();
                    name.push('=');
                }
                let raw = format!(":{name}");
                self.token(TokenKind::Symbol(name), start, raw)
            }
            Some(b'"') => {
                self.advance();
                match self.lex_double_quoted().kind {
                    TokenKind::String(name) => {
                        let raw = format!(":\"{name}\"");
                        self.token(TokenKind::Symbol(name), start, raw)
                    }
                    TokenKind::Error(msg) => self.error(msg, start, ":\""),
                    _ => self.error("interpolated symbols are not supported", start, ":\""),
                }
            }
            _ => {
                self.advance();
                if let Some(op) = OPERATOR_SYMBOLS.iter().find(|op| self.starts_with(op)) {
                    for _ in 0..op.len() {
                        self.advance();
                    }
                    return self.token(TokenKind::Symbol(op.to_string()), start, format!(":{op}"));
                }
                self.token(TokenKind::Punct(":"), start, ":")
            }
        }
    }

    // ───────────────────────────────────────────────────────────
    //  Main dispatch
    // ───────────────────────────────────────────────────────────

    /// Produce the next token from the stream.
    pub fn next_token(&mut self) -> Token {
        loop {
            let space_before = self.skip_blanks();
            let mut tok = self.lex_one();
            match tok.kind {
                TokenKind::Newline if self.at_line_start => continue,
                TokenKind::Newline => self.at_line_start = true,
                // Comments never end a line on their own.
                TokenKind::Comment(_) => {}
                _ => self.at_line_start = false,
            }
            tok.space_before = space_before;
            return tok;
        }
    }

    fn lex_one(&mut self) -> Token {
        let start = self.pos();
        let Some(b) = self.peek() else {
            self.emitted_eof = true;
            return Token::new(TokenKind::Eof, Span::point(start), "");
        };

        match b {
            b'\n' => {
                self.advance();
                self.token(TokenKind::Newline, start, "\n")
            }
            b'#' => self.lex_comment(),
            b'"' => self.lex_double_quoted(),
            b'\'' => self.lex_single_quoted(),
            b'0'..=b'9' => self.lex_number(),
            b'@' | b'$' => self.lex_variable(),
            b':' => self.lex_colon(),
            _ if is_ident_start(b) => self.lex_identifier(),
            _ => match PUNCTUATION.iter().find(|p| self.starts_with(p)) {
                Some(&p) => {
                    for _ in 0..p.len() {
                        self.advance();
                    }
                    self.token(TokenKind::Punct(p), start, p)
                }
                None => {
                    self.advance();
                    self.error(
                        format!("unexpected character: {:?}", b as char),
                        start,
                        (b as char).to_string(),
                    )
                }
            },
        }
    }
}

impl<R: Read> Iterator for Lexer<R> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if self.emitted_eof {
            return None;
        }
        let tok = self.next_token();
        if tok.is_eof() {
            self.emitted_eof = true;
        }
        Some(tok)
    }
}

// ═══════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn tokens(src: &str) -> Vec<Token> {
        Lexer::from_str(src).collect()
    }

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokens(src).into_iter().map(|t| t.kind).collect()
    }

    fn ident(name: &str) -> TokenKind {
        TokenKind::Identifier(name.into())
    }

    #[test]
    fn lex_integer() {
        assert_eq!(kinds("42"), vec![TokenKind::Integer(42), TokenKind::Eof]);
        assert_eq!(kinds("1_000"), vec![TokenKind::Integer(1000), TokenKind::Eof]);
    }

    #[test]
    fn minus_is_punctuation() {
        assert_eq!(
            kinds("-7"),
            vec![TokenKind::Punct("-"), TokenKind::Integer(7), TokenKind::Eof]
        );
    }

    #[test]
    fn method_call_on_integer() {
        assert_eq!(
            kinds("1.to_s"),
            vec![
                TokenKind::Integer(1),
                TokenKind::Punct("."),
                ident("to_s"),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(
            kinds("def empty? end"),
            vec![
                TokenKind::Keyword(Keyword::Def),
                ident("empty?"),
                TokenKind::Keyword(Keyword::End),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn bang_equals_is_not_a_suffix() {
        assert_eq!(
            kinds("a!=b"),
            vec![ident("a"), TokenKind::Punct("!="), ident("b"), TokenKind::Eof]
        );
    }

    #[test]
    fn variables() {
        assert_eq!(
            kinds("@a @@b $c Const"),
            vec![
                TokenKind::Ivar("@a".into()),
                TokenKind::Cvar("@@b".into()),
                TokenKind::Global("$c".into()),
                TokenKind::Constant("Const".into()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn symbols() {
        assert_eq!(
            kinds(":each :name= :+ :[]= A::B"),
            vec![
                TokenKind::Symbol("each".into()),
                TokenKind::Symbol("name=".into()),
                TokenKind::Symbol("+".into()),
                TokenKind::Symbol("[]=".into()),
                TokenKind::Constant("A".into()),
                TokenKind::Punct("::"),
                TokenKind::Constant("B".into()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn labels() {
        assert_eq!(
            kinds("{a: 1}"),
            vec![
                TokenKind::Punct("{"),
                TokenKind::Label("a".into()),
                TokenKind::Integer(1),
                TokenKind::Punct("}"),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn strings_and_escapes() {
        assert_eq!(
            kinds(r#""a\tb\n" 'c\'d\n'"#),
            vec![
                TokenKind::String("a\tb\n".into()),
                TokenKind::String("c'd\\n".into()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn interpolation_captures_code() {
        assert_eq!(
            kinds(r#""x=#{h["k"] + {}.size}!""#),
            vec![
                TokenKind::InterpString(vec![
                    StrPart::Literal("x=".into()),
                    StrPart::Code(r#"h["k"] + {}.size"#.into()),
                    StrPart::Literal("!".into()),
                ]),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn unterminated_string_is_an_error() {
        assert!(matches!(kinds("\"abc")[0], TokenKind::Error(_)));
    }

    #[test]
    fn longest_punctuation_wins() {
        assert_eq!(
            kinds("a ||= 1...2 <=> x"),
            vec![
                ident("a"),
                TokenKind::Punct("||="),
                TokenKind::Integer(1),
                TokenKind::Punct("..."),
                TokenKind::Integer(2),
                TokenKind::Punct("<=>"),
                ident("x"),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn newlines_collapse() {
        assert_eq!(
            kinds("\n\na # note\n\n  b\n"),
            vec![
                ident("a"),
                TokenKind::Comment(" note".into()),
                TokenKind::Newline,
                ident("b"),
                TokenKind::Newline,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn line_continuation() {
        assert_eq!(
            kinds("a \\\n + b"),
            vec![ident("a"), TokenKind::Punct("+"), ident("b"), TokenKind::Eof]
        );
    }

    #[test]
    fn space_before_is_tracked() {
        let toks = tokens("foo -1 - 2");
        assert!(!toks[0].space_before);
        assert!(toks[1].space_before);
        assert!(!toks[2].space_before);
        assert!(toks[3].space_before);
    }

    #[test]
    fn spans_track_lines() {
        let toks = tokens("a\n  bb");
        assert_eq!(toks[2].span.start.line, 2);
        assert_eq!(toks[2].span.start.column, 3);
        assert_eq!(toks[2].span.end.offset, 6);
    }

    #[test]
    fn streams_from_any_reader() {
        let lexer = Lexer::new(Cursor::new(b"x = 1".to_vec()));
        let kinds: Vec<_> = lexer.map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![ident("x"), TokenKind::Punct("="), TokenKind::Integer(1), TokenKind::Eof]
        );
    }
}
