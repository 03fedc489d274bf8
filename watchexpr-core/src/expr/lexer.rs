//! Tokenizer for watch expressions

use std::fmt;

use super::error::EvalError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Ident(String),
    Number(i64),
    Plus,
    Minus,
    Star,
    Amp,
    Dot,
    Arrow,
    ColonColon,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Ident(name) => write!(f, "`{}`", name),
            TokenKind::Number(value) => write!(f, "`{}`", value),
            TokenKind::Plus => write!(f, "`+`"),
            TokenKind::Minus => write!(f, "`-`"),
            TokenKind::Star => write!(f, "`*`"),
            TokenKind::Amp => write!(f, "`&`"),
            TokenKind::Dot => write!(f, "`.`"),
            TokenKind::Arrow => write!(f, "`->`"),
            TokenKind::ColonColon => write!(f, "`::`"),
            TokenKind::LParen => write!(f, "`(`"),
            TokenKind::RParen => write!(f, "`)`"),
            TokenKind::LBracket => write!(f, "`[`"),
            TokenKind::RBracket => write!(f, "`]`"),
            TokenKind::LBrace => write!(f, "`{{`"),
            TokenKind::RBrace => write!(f, "`}}`"),
            TokenKind::Eof => write!(f, "end of input"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the first character
    pub offset: usize,
}

/// Split `input` into tokens. The returned vector always ends with `Eof`.
pub fn tokenize(input: &str) -> Result<Vec<Token>, EvalError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        let start = pos;
        let kind = match c {
            b'+' => TokenKind::Plus,
            b'*' => TokenKind::Star,
            b'&' => TokenKind::Amp,
            b'.' => TokenKind::Dot,
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'[' => TokenKind::LBracket,
            b']' => TokenKind::RBracket,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b'-' if bytes.get(pos + 1) == Some(&b'>') => {
                pos += 1;
                TokenKind::Arrow
            }
            b'-' => TokenKind::Minus,
            b':' if bytes.get(pos + 1) == Some(&b':') => {
                pos += 1;
                TokenKind::ColonColon
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                while pos < bytes.len() && is_word_byte(bytes[pos]) {
                    pos += 1;
                }
                tokens.push(Token {
                    kind: TokenKind::Ident(input[start..pos].to_string()),
                    offset: start,
                });
                continue;
            }
            c if c.is_ascii_digit() => {
                while pos < bytes.len() && is_word_byte(bytes[pos]) {
                    pos += 1;
                }
                let value = parse_number(&input[start..pos], start)?;
                tokens.push(Token {
                    kind: TokenKind::Number(value),
                    offset: start,
                });
                continue;
            }
            _ => {
                let found = input[start..].chars().next().unwrap_or_default();
                return Err(EvalError::parse_failure(
                    start,
                    format!("`{}`", found),
                    "unexpected character",
                ));
            }
        };
        pos += 1;
        tokens.push(Token {
            kind,
            offset: start,
        });
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        offset: input.len(),
    });
    Ok(tokens)
}

fn is_word_byte(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

/// Decimal, `0x` hex or `0b` binary, with `_` separators anywhere after the prefix.
fn parse_number(text: &str, offset: usize) -> Result<i64, EvalError> {
    let (digits, radix) = if let Some(rest) = text.strip_prefix("0x") {
        (rest, 16)
    } else if let Some(rest) = text.strip_prefix("0b") {
        (rest, 2)
    } else {
        (text, 10)
    };

    let invalid = || EvalError::parse_failure(offset, format!("`{}`", text), "invalid numeric literal");

    let cleaned: String = digits.chars().filter(|&c| c != '_').collect();
    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_digit(radix)) {
        return Err(invalid());
    }

    let value = u64::from_str_radix(&cleaned, radix).map_err(|_| {
        EvalError::parse_failure(offset, format!("`{}`", text), "integer literal out of range")
    })?;
    i64::try_from(value).map_err(|_| {
        EvalError::parse_failure(offset, format!("`{}`", text), "integer literal out of range")
    })
}
