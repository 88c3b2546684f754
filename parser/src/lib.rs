//! # Parser
//!
//! A streaming lexer and a recursive-descent parser for the scripting
//! language run by the VM.
//!
//! ## Architecture
//!
//! ```text
//!  impl Read (file, &[u8], …)
//!      │
//!      ▼
//!  ┌────────┐    Token stream     ┌────────┐
//!  │ Lexer  │ ──────────────────▶ │ Parser │ ──────────▶ Program
//!  └────────┘  (impl Iterator)    └────────┘
//! ```
//!
//! ```rust
//! let program = parser::parse("x = 1 + 2\nputs x").unwrap();
//! assert_eq!(program.body.len(), 2);
//! assert_eq!(program.locals, vec!["x".to_string()]);
//! ```

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod span;
pub mod token;

pub use ast::{Arg, BlockLit, Body, Expr, ExprKind, MethodDef, Params, Program, Target};
pub use lexer::Lexer;
pub use parser::{ParseError, Parser};
pub use span::{Pos, Span};
pub use token::{Keyword, StrPart, Token, TokenKind};

/// Parse a complete source text.
pub fn parse(source: &str) -> Result<Program, ParseError> {
    Parser::new(Lexer::from_str(source)).parse_program()
}
