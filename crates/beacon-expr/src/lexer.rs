//! Tokenizer

use crate::error::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Str(String),
    Number(f64),
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Dot,
    EqEq,
    NotEq,
    AndAnd,
    OrOr,
    Bang,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset into the source
    pub pos: usize,
}

impl Token {
    /// True if this is the bare word `word`
    pub fn is_word(&self, word: &str) -> bool {
        matches!(&self.kind, TokenKind::Ident(w) if w == word)
    }
}

/// Split `src` into tokens, always ending with [`TokenKind::Eof`]
pub fn tokenize(src: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let bytes = src.as_bytes();
    let mut chars = src.char_indices().peekable();

    while let Some(&(pos, ch)) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }

        let two = |next: u8| bytes.get(pos + 1) == Some(&next);
        let kind = match ch {
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            '=' if two(b'=') => {
                chars.next();
                TokenKind::EqEq
            }
            '!' if two(b'=') => {
                chars.next();
                TokenKind::NotEq
            }
            '!' => TokenKind::Bang,
            '&' if two(b'&') => {
                chars.next();
                TokenKind::AndAnd
            }
            '|' if two(b'|') => {
                chars.next();
                TokenKind::OrOr
            }
            '\'' | '"' => {
                chars.next();
                let s = read_string(&mut chars, ch, pos)?;
                tokens.push(Token {
                    kind: TokenKind::Str(s),
                    pos,
                });
                continue;
            }
            c if c.is_ascii_digit() || (c == '-' && bytes.get(pos + 1).is_some_and(u8::is_ascii_digit)) => {
                let text = read_while(src, &mut chars, |c| {
                    c.is_ascii_digit() || c == '.' || c == '-' || c == 'e' || c == 'E'
                });
                let value = text.parse::<f64>().map_err(|_| ExprError::InvalidNumber {
                    text: text.to_string(),
                    pos,
                })?;
                tokens.push(Token {
                    kind: TokenKind::Number(value),
                    pos,
                });
                continue;
            }
            c if c.is_alphabetic() || c == '_' => {
                let text = read_while(src, &mut chars, |c| c.is_alphanumeric() || c == '_');
                tokens.push(Token {
                    kind: TokenKind::Ident(text.to_string()),
                    pos,
                });
                continue;
            }
            other => return Err(ExprError::UnexpectedChar { ch: other, pos }),
        };

        chars.next();
        tokens.push(Token { kind, pos });
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        pos: src.len(),
    });
    Ok(tokens)
}

fn read_while<'a>(
    src: &'a str,
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    pred: impl Fn(char) -> bool,
) -> &'a str {
    let start = chars.peek().map_or(src.len(), |&(i, _)| i);
    let mut end = start;
    // first char is already known to match
    if let Some((i, c)) = chars.next() {
        end = i + c.len_utf8();
    }
    while let Some(&(i, c)) = chars.peek() {
        if !pred(c) {
            break;
        }
        end = i + c.len_utf8();
        chars.next();
    }
    &src[start..end]
}

fn read_string(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    quote: char,
    start: usize,
) -> Result<String, ExprError> {
    let mut out = String::new();
    while let Some((_, c)) = chars.next() {
        match c {
            c if c == quote => return Ok(out),
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, 'r')) => out.push('\r'),
                Some((_, other)) => out.push(other),
                None => break,
            },
            c => out.push(c),
        }
    }
    Err(ExprError::UnterminatedString(start))
}
