//! Tokenizer for the expression language.

use crate::error::{EvalError, EvalResult};

/// A lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    True,
    False,
    LParen,
    RParen,
    Comma,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    NotEq,
    AndAnd,
    OrOr,
    Bang,
}

/// A token together with its byte offset in the source.
pub type Spanned = (usize, Token);

/// Split `source` into tokens.
pub fn tokenize(source: &str) -> EvalResult<Vec<Spanned>> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        let start = pos;

        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == b'.' && bytes.get(pos + 1).is_some_and(u8::is_ascii_digit)) {
            let (token, len) = lex_number(&source[pos..], start)?;
            tokens.push((start, token));
            pos += len;
            continue;
        }

        if c.is_ascii_alphabetic() || c == b'_' {
            while pos < bytes.len()
                && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_' || bytes[pos] == b'.')
            {
                pos += 1;
            }
            tokens.push((start, keyword_or_ident(&source[start..pos])));
            continue;
        }

        if c == b'"' || c == b'\'' {
            let (text, len) = lex_string(&source[pos..], start)?;
            tokens.push((start, Token::Str(text)));
            pos += len;
            continue;
        }

        let next = bytes.get(pos + 1).copied();
        let (token, len) = match (c, next) {
            (b'&', Some(b'&')) => (Token::AndAnd, 2),
            (b'|', Some(b'|')) => (Token::OrOr, 2),
            (b'=', Some(b'=')) => (Token::EqEq, 2),
            (b'!', Some(b'=')) => (Token::NotEq, 2),
            (b'<', Some(b'=')) => (Token::Le, 2),
            (b'>', Some(b'=')) => (Token::Ge, 2),
            (b'<', _) => (Token::Lt, 1),
            (b'>', _) => (Token::Gt, 1),
            (b'!', _) => (Token::Bang, 1),
            (b'(', _) => (Token::LParen, 1),
            (b')', _) => (Token::RParen, 1),
            (b',', _) => (Token::Comma, 1),
            (b'+', _) => (Token::Plus, 1),
            (b'-', _) => (Token::Minus, 1),
            (b'*', _) => (Token::Star, 1),
            (b'/', _) => (Token::Slash, 1),
            (b'%', _) => (Token::Percent, 1),
            _ => {
                let ch = source[pos..].chars().next().unwrap_or('?');
                return Err(EvalError::syntax(start, format!("unexpected character `{ch}`")));
            }
        };
        tokens.push((start, token));
        pos += len;
    }

    Ok(tokens)
}

fn keyword_or_ident(word: &str) -> Token {
    match word.to_ascii_lowercase().as_str() {
        "true" => Token::True,
        "false" => Token::False,
        "and" => Token::AndAnd,
        "or" => Token::OrOr,
        "not" => Token::Bang,
        _ => Token::Ident(word.to_string()),
    }
}

fn lex_number(rest: &str, offset: usize) -> EvalResult<(Token, usize)> {
    let bytes = rest.as_bytes();
    let mut len = 0;
    let mut seen_dot = false;
    while len < bytes.len() {
        match bytes[len] {
            b'0'..=b'9' => len += 1,
            b'.' if !seen_dot => {
                seen_dot = true;
                len += 1;
            }
            _ => break,
        }
    }

    let text = &rest[..len];
    let token = if seen_dot {
        text.parse::<f64>()
            .map(Token::Float)
            .map_err(|e| EvalError::syntax(offset, format!("invalid number `{text}`: {e}")))?
    } else {
        text.parse::<i64>()
            .map(Token::Int)
            .map_err(|e| EvalError::syntax(offset, format!("invalid number `{text}`: {e}")))?
    };
    Ok((token, len))
}

fn lex_string(rest: &str, offset: usize) -> EvalResult<(String, usize)> {
    let mut chars = rest.char_indices();
    let Some((_, quote)) = chars.next() else {
        return Err(EvalError::syntax(offset, "expected string"));
    };

    let mut text = String::new();
    let mut escaped = false;
    for (i, ch) in chars {
        if escaped {
            text.push(match ch {
                'n' => '\n',
                't' => '\t',
                other => other,
            });
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == quote {
            return Ok((text, i + ch.len_utf8()));
        } else {
            text.push(ch);
        }
    }
    Err(EvalError::syntax(offset, "unterminated string literal"))
}
