//! Lightweight T-SQL tokenizer using logos.
//!
//! This is a lexical scanner, not a parser: it recognises identifiers,
//! quoted names, literals, comments and the handful of punctuation marks the
//! enhancer and the plan builder need. Anything else is skipped.

use super::span::Span;
use logos::Logos;

/// Token types for T-SQL scripts.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum Token {
    // Comments
    #[regex(r"--[^\n]*")]
    LineComment,
    #[regex(r"/\*([^*]|\*+[^*/])*\*+/")]
    BlockComment,

    // Bare word: keyword, identifier, @variable or #temp name
    #[regex(r"[A-Za-z_@#][A-Za-z0-9_@#$]*", |lex| lex.slice().to_string())]
    Word(String),

    // [bracketed identifier]
    #[regex(r"\[([^\]]|\]\])*\]", |lex| unquote(lex.slice(), ']'))]
    BracketIdent(String),

    // "quoted identifier"
    #[regex(r#""([^"]|"")*""#, |lex| unquote(lex.slice(), '"'))]
    QuotedIdent(String),

    // 'string' or N'unicode string'
    #[regex(r"[Nn]?'([^']|'')*'", |lex| string_body(lex.slice()))]
    StringLit(String),

    #[regex(r"[0-9]+(\.[0-9]+)?")]
    Number,

    // Punctuation
    #[token(";")]
    Semicolon,
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("=")]
    Eq,
}

impl Token {
    /// Check whether this is the given keyword (case-insensitive).
    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Word(w) if w.eq_ignore_ascii_case(keyword))
    }

    /// The identifier text, if this token can name an object.
    pub fn ident(&self) -> Option<&str> {
        match self {
            Token::Word(w) => Some(w),
            Token::BracketIdent(s) | Token::QuotedIdent(s) => Some(s),
            _ => None,
        }
    }

    /// Check if this token is a comment.
    pub fn is_comment(&self) -> bool {
        matches!(self, Token::LineComment | Token::BlockComment)
    }
}

/// Strip the surrounding quote characters and undouble embedded closers.
fn unquote(s: &str, closer: char) -> String {
    let inner = &s[1..s.len() - 1];
    let doubled: String = [closer, closer].iter().collect();
    inner.replace(&doubled, &closer.to_string())
}

fn string_body(s: &str) -> String {
    let s = s.strip_prefix(['N', 'n']).unwrap_or(s);
    unquote(s, '\'')
}

/// A token with its span in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// Lexer that produces spanned tokens.
pub struct Lexer<'source> {
    inner: logos::Lexer<'source, Token>,
}

impl<'source> Lexer<'source> {
    /// Create a new lexer for the given source.
    pub fn new(source: &'source str) -> Self {
        Self {
            inner: Token::lexer(source),
        }
    }

    /// Get the source string.
    pub fn source(&self) -> &'source str {
        self.inner.source()
    }
}

impl Iterator for Lexer<'_> {
    type Item = SpannedToken;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Ok(token) => {
                    return Some(SpannedToken {
                        token,
                        span: self.inner.span().into(),
                    })
                }
                // Operators and other symbols carry no naming information
                Err(()) => continue,
            }
        }
    }
}

/// Tokenize a script, comments included.
pub fn tokenize(source: &str) -> Vec<SpannedToken> {
    Lexer::new(source).collect()
}

/// Tokenize a script, dropping comments.
pub fn significant_tokens(source: &str) -> Vec<SpannedToken> {
    Lexer::new(source).filter(|t| !t.token.is_comment()).collect()
}

/// Replace every comment with spaces, keeping byte offsets and line breaks.
pub fn mask_comments(source: &str) -> String {
    let mut masked = source.as_bytes().to_vec();
    for token in Lexer::new(source).filter(|t| t.token.is_comment()) {
        for byte in &mut masked[token.span.start..token.span.end] {
            if *byte != b'\n' {
                *byte = b' ';
            }
        }
    }
    // Comment bytes became ASCII spaces, so the buffer is still UTF-8.
    String::from_utf8_lossy(&masked).into_owned()
}

/// Check whether the script contains a `GO` batch separator line outside
/// comments.
pub fn has_batch_separator(source: &str) -> bool {
    let comments: Vec<Span> = Lexer::new(source)
        .filter(|t| t.token == Token::BlockComment)
        .map(|t| t.span)
        .collect();

    let mut offset = 0;
    for line in source.split_inclusive('\n') {
        let start = offset;
        offset += line.len();
        let inside_comment = comments.iter().any(|c| c.start < start && start < c.end);
        if inside_comment {
            continue;
        }
        let mut words = line.split_whitespace();
        let is_go = matches!(words.next(), Some(w) if w.eq_ignore_ascii_case("go"))
            && words.all(|w| w.chars().all(|c| c.is_ascii_digit()) || w.starts_with("--"));
        if is_go {
            return true;
        }
    }
    false
}
