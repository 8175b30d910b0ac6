//! # Lexer
//!
//! Turns a command string into a stream of tokens.
//!
//! Recognized tokens:
//! - bare values (`node1`, `account:user1`, `level*`)
//! - single or double quoted literals, quote excluded from the value
//! - brace blocks `{ ... }` whose trimmed content is kept verbatim
//! - punctuation `= , ; [ ] ( ) |` and the stage connectors `->`, `->>`
//!   and `<-`
//!
//! Lexing never fails. An unclosed quote or block produces an
//! `Unterminated` token that the parser turns into a parse error.

use std::fmt;

/// Token categories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// Unquoted identifier or value.
    Value(String),
    /// Quoted literal, quotes stripped.
    Quoted(String),
    /// Content of a `{ ... }` block, trimmed.
    Block(String),
    Equal,
    Comma,
    Semicolon,
    OpenBracket,
    CloseBracket,
    OpenParen,
    CloseParen,
    Pipe,
    /// `->`
    ArrowRight,
    /// `->>`
    ArrowForward,
    /// `<-`
    ArrowLeft,
    /// A literal opened by this character was never closed.
    Unterminated(char),
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => write!(f, "'{}'", v),
            Self::Quoted(v) => write!(f, "quoted '{}'", v),
            Self::Block(_) => f.write_str("block"),
            Self::Equal => f.write_str("'='"),
            Self::Comma => f.write_str("','"),
            Self::Semicolon => f.write_str("';'"),
            Self::OpenBracket => f.write_str("'['"),
            Self::CloseBracket => f.write_str("']'"),
            Self::OpenParen => f.write_str("'('"),
            Self::CloseParen => f.write_str("')'"),
            Self::Pipe => f.write_str("'|'"),
            Self::ArrowRight => f.write_str("'->'"),
            Self::ArrowForward => f.write_str("'->>'"),
            Self::ArrowLeft => f.write_str("'<-'"),
            Self::Unterminated(c) => write!(f, "unterminated {}", c),
        }
    }
}

/// A token and the byte offset where it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub offset: usize,
}

/// Characters that always end a bare value.
const DELIMITERS: &[char] = &['=', ',', ';', '[', ']', '(', ')', '|', '{', '}', '\'', '"'];

/// True if `c` may appear inside a bare value.
pub fn is_value_char(c: char) -> bool {
    !c.is_whitespace() && !DELIMITERS.contains(&c)
}

/// Streaming tokenizer over a borrowed command string.
pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        let trimmed = rest.trim_start();
        self.pos += rest.len() - trimmed.len();
    }

    fn starts_connector(text: &str) -> bool {
        text.starts_with("->") || text.starts_with("<-")
    }

    /// Read up to `close`; returns the enclosed text, or `None` if the
    /// input ends first (the position is then moved to the end).
    fn read_until(&mut self, close: char) -> Option<&'a str> {
        let rest = self.rest();
        match rest.find(close) {
            Some(end) => {
                self.pos += end + close.len_utf8();
                Some(&rest[..end])
            }
            None => {
                self.pos = self.input.len();
                None
            }
        }
    }

    fn read_value(&mut self) -> &'a str {
        let rest = self.rest();
        let mut end = 0;
        for (i, c) in rest.char_indices() {
            if !is_value_char(c) || (i > 0 && Self::starts_connector(&rest[i..])) {
                break;
            }
            end = i + c.len_utf8();
        }
        self.pos += end;
        &rest[..end]
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        self.skip_whitespace();
        let offset = self.pos;
        let rest = self.rest();
        let c = rest.chars().next()?;

        let punct = match c {
            '=' => Some(TokenKind::Equal),
            ',' => Some(TokenKind::Comma),
            ';' => Some(TokenKind::Semicolon),
            '[' => Some(TokenKind::OpenBracket),
            ']' => Some(TokenKind::CloseBracket),
            '(' => Some(TokenKind::OpenParen),
            ')' => Some(TokenKind::CloseParen),
            '|' => Some(TokenKind::Pipe),
            _ => None,
        };
        if let Some(kind) = punct {
            self.pos += 1;
            return Some(Token { kind, offset });
        }

        let connector = if rest.starts_with("->>") {
            Some((TokenKind::ArrowForward, 3))
        } else if rest.starts_with("->") {
            Some((TokenKind::ArrowRight, 2))
        } else if rest.starts_with("<-") {
            Some((TokenKind::ArrowLeft, 2))
        } else {
            None
        };
        if let Some((kind, len)) = connector {
            self.pos += len;
            return Some(Token { kind, offset });
        }

        let kind = match c {
            '\'' | '"' => {
                self.pos += 1;
                match self.read_until(c) {
                    Some(text) => TokenKind::Quoted(text.to_string()),
                    None => TokenKind::Unterminated(c),
                }
            }
            '{' => {
                self.pos += 1;
                match self.read_until('}') {
                    Some(text) => TokenKind::Block(text.trim().to_string()),
                    None => TokenKind::Unterminated(c),
                }
            }
            '}' => {
                // Stray close brace: surface it as an unterminated block so
                // the parser reports it at this offset.
                self.pos += 1;
                TokenKind::Unterminated(c)
            }
            _ => TokenKind::Value(self.read_value().to_string()),
        };
        Some(Token { kind, offset })
    }
}

/// Tokenize a whole command string.
pub fn tokenize(input: &str) -> Vec<Token> {
    Lexer::new(input).collect()
}

// =============================================================================
// TESTS
// =============================================================================
