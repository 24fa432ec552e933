//! Recursive-descent parser producing the expression tree.

use crate::error::{EvalError, EvalResult};
use crate::lexer::{Spanned, Token, tokenize};
use crate::value::Value;

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    NotEq,
    And,
    Or,
}

/// A node of the parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Literal(Value),
    Ident(String),
    Unary(UnaryOp, Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
    Call(String, Vec<Node>),
}

/// Deepest nesting of parentheses, calls and unary operators.
pub const MAX_DEPTH: usize = 64;

/// Longest accepted expression, in tokens. Bounds the depth of operator
/// chains, which the tree stores left-nested.
pub const MAX_TOKENS: usize = 1024;

/// Parse `source` into a tree.
pub fn parse(source: &str) -> EvalResult<Node> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(EvalError::syntax(0, "empty expression"));
    }
    if tokens.len() > MAX_TOKENS {
        return Err(EvalError::syntax(
            tokens[MAX_TOKENS].0,
            format!("expression longer than {MAX_TOKENS} tokens"),
        ));
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        end: source.len(),
        depth: 0,
    };
    let node = parser.or()?;
    if let Some((offset, token)) = parser.tokens.get(parser.pos) {
        return Err(EvalError::syntax(
            *offset,
            format!("unexpected token {token:?} after expression"),
        ));
    }
    Ok(node)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    /// Offset reported for errors at end of input.
    end: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(o, _)| *o).unwrap_or(self.end)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token, what: &str) -> EvalResult<()> {
        if self.peek() == Some(&expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(EvalError::syntax(self.offset(), format!("expected {what}")))
        }
    }

    /// Run `inner` one nesting level deeper.
    fn nested(&mut self, inner: fn(&mut Self) -> EvalResult<Node>) -> EvalResult<Node> {
        if self.depth >= MAX_DEPTH {
            return Err(EvalError::syntax(self.offset(), "expression nested too deeply"));
        }
        self.depth += 1;
        let node = inner(self);
        self.depth -= 1;
        node
    }

    /// Parse one left-associative precedence level.
    fn level(
        &mut self,
        operand: fn(&mut Self) -> EvalResult<Node>,
        operator: fn(&Token) -> Option<BinaryOp>,
    ) -> EvalResult<Node> {
        let mut lhs = operand(self)?;
        while let Some(op) = self.peek().and_then(operator) {
            self.pos += 1;
            let rhs = operand(self)?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn or(&mut self) -> EvalResult<Node> {
        self.level(Self::and, |t| (*t == Token::OrOr).then_some(BinaryOp::Or))
    }

    fn and(&mut self) -> EvalResult<Node> {
        self.level(Self::comparison, |t| {
            (*t == Token::AndAnd).then_some(BinaryOp::And)
        })
    }

    fn comparison(&mut self) -> EvalResult<Node> {
        self.level(Self::sum, |t| match t {
            Token::Lt => Some(BinaryOp::Lt),
            Token::Le => Some(BinaryOp::Le),
            Token::Gt => Some(BinaryOp::Gt),
            Token::Ge => Some(BinaryOp::Ge),
            Token::EqEq => Some(BinaryOp::Eq),
            Token::NotEq => Some(BinaryOp::NotEq),
            _ => None,
        })
    }

    fn sum(&mut self) -> EvalResult<Node> {
        self.level(Self::product, |t| match t {
            Token::Plus => Some(BinaryOp::Add),
            Token::Minus => Some(BinaryOp::Sub),
            _ => None,
        })
    }

    fn product(&mut self) -> EvalResult<Node> {
        self.level(Self::unary, |t| match t {
            Token::Star => Some(BinaryOp::Mul),
            Token::Slash => Some(BinaryOp::Div),
            Token::Percent => Some(BinaryOp::Rem),
            _ => None,
        })
    }

    fn unary(&mut self) -> EvalResult<Node> {
        let op = match self.peek() {
            Some(Token::Minus) => UnaryOp::Neg,
            Some(Token::Bang) => UnaryOp::Not,
            _ => return self.primary(),
        };
        self.pos += 1;
        let operand = self.nested(Self::unary)?;
        Ok(Node::Unary(op, Box::new(operand)))
    }

    fn primary(&mut self) -> EvalResult<Node> {
        let offset = self.offset();
        match self.next() {
            Some(Token::Int(i)) => Ok(Node::Literal(Value::Int(i))),
            Some(Token::Float(f)) => Ok(Node::Literal(Value::Float(f))),
            Some(Token::Str(s)) => Ok(Node::Literal(Value::Str(s))),
            Some(Token::True) => Ok(Node::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Node::Literal(Value::Bool(false))),
            Some(Token::LParen) => {
                let inner = self.nested(Self::or)?;
                self.expect(Token::RParen, "`)`")?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let args = self.arguments()?;
                    Ok(Node::Call(name, args))
                } else {
                    Ok(Node::Ident(name))
                }
            }
            Some(token) => Err(EvalError::syntax(
                offset,
                format!("unexpected token {token:?}"),
            )),
            None => Err(EvalError::syntax(offset, "unexpected end of expression")),
        }
    }

    fn arguments(&mut self) -> EvalResult<Vec<Node>> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.nested(Self::or)?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                _ => {
                    return Err(EvalError::syntax(
                        self.offset(),
                        "expected `,` or `)` in argument list",
                    ));
                }
            }
        }
    }
}
