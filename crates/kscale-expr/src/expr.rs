//! Expression evaluation.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::error::{EvalError, EvalResult};
use crate::parser::{BinaryOp, Node, UnaryOp, parse};
use crate::value::{Context, Value, is_integral};

/// A compiled predicate or formula.
pub trait CompiledExpr: Send + Sync + fmt::Debug {
    /// The source text it was compiled from.
    fn source(&self) -> &str;

    fn evaluate(&self, context: &Context) -> EvalResult<Value>;
}

/// Compiles expression text into something that can be evaluated.
///
/// Handlers compile their `when` and `by` options through this trait
/// once at `init`, then evaluate the result for every point.
pub trait Evaluator: Send + Sync {
    fn compile(&self, source: &str) -> EvalResult<Arc<dyn CompiledExpr>>;

    /// Compile and evaluate in one step.
    fn evaluate(&self, source: &str, context: &Context) -> EvalResult<Value> {
        self.compile(source)?.evaluate(context)
    }
}

/// The built-in evaluator for the language in this crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExprEvaluator;

impl Evaluator for ExprEvaluator {
    fn compile(&self, source: &str) -> EvalResult<Arc<dyn CompiledExpr>> {
        Ok(Arc::new(Expression::parse(source)?))
    }
}

/// A parsed expression, ready to be evaluated many times.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Node,
}

impl Expression {
    /// Parse an expression.
    pub fn parse(source: &str) -> EvalResult<Self> {
        Ok(Self {
            source: source.to_string(),
            root: parse(source)?,
        })
    }

    /// The original source text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against the given context.
    pub fn evaluate(&self, context: &Context) -> EvalResult<Value> {
        eval(&self.root, context)
    }
}

impl CompiledExpr for Expression {
    fn source(&self) -> &str {
        Expression::source(self)
    }

    fn evaluate(&self, context: &Context) -> EvalResult<Value> {
        Expression::evaluate(self, context)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn eval(node: &Node, ctx: &Context) -> EvalResult<Value> {
    match node {
        Node::Literal(v) => Ok(v.clone()),
        Node::Ident(name) => ctx
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::UnknownIdentifier(name.clone())),
        Node::Unary(UnaryOp::Not, operand) => Ok(Value::Bool(!eval(operand, ctx)?.as_bool()?)),
        Node::Unary(UnaryOp::Neg, operand) => match eval(operand, ctx)? {
            Value::Int(i) => i.checked_neg().map(Value::Int).ok_or(EvalError::Overflow),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(other.type_error("number")),
        },
        // Short-circuit: the right side is only evaluated when needed.
        Node::Binary(BinaryOp::And, lhs, rhs) => {
            if !eval(lhs, ctx)?.as_bool()? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(eval(rhs, ctx)?.as_bool()?))
        }
        Node::Binary(BinaryOp::Or, lhs, rhs) => {
            if eval(lhs, ctx)?.as_bool()? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(eval(rhs, ctx)?.as_bool()?))
        }
        Node::Binary(op, lhs, rhs) => {
            let lhs = eval(lhs, ctx)?;
            let rhs = eval(rhs, ctx)?;
            binary(*op, lhs, rhs)
        }
        Node::Call(name, args) => {
            let args = args
                .iter()
                .map(|a| eval(a, ctx))
                .collect::<EvalResult<Vec<_>>>()?;
            call(name, args)
        }
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> EvalResult<Value> {
    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            arithmetic(op, lhs, rhs)
        }
        BinaryOp::Eq => Ok(Value::Bool(equals(&lhs, &rhs)?)),
        BinaryOp::NotEq => Ok(Value::Bool(!equals(&lhs, &rhs)?)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ord = compare(&lhs, &rhs)?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::Le => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }))
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("logical operators short-circuit in eval"),
    }
}

fn arithmetic(op: BinaryOp, lhs: Value, rhs: Value) -> EvalResult<Value> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => int_arithmetic(op, a, b),
        (Value::Str(a), Value::Str(b)) if op == BinaryOp::Add => Ok(Value::Str(a + &b)),
        (lhs, rhs) => {
            let a = lhs.as_f64().ok_or_else(|| lhs.type_error("number"))?;
            let b = rhs.as_f64().ok_or_else(|| rhs.type_error("number"))?;
            let v = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div if b == 0.0 => return Err(EvalError::DivisionByZero),
                BinaryOp::Div => a / b,
                BinaryOp::Rem if b == 0.0 => return Err(EvalError::DivisionByZero),
                _ => a % b,
            };
            Ok(Value::Float(v))
        }
    }
}

fn int_arithmetic(op: BinaryOp, a: i64, b: i64) -> EvalResult<Value> {
    if matches!(op, BinaryOp::Div | BinaryOp::Rem) && b == 0 {
        return Err(EvalError::DivisionByZero);
    }
    let v = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        // Inexact integer division yields a float, so `current / 2` keeps
        // the fraction until the formula rounds it.
        BinaryOp::Div if a.checked_rem(b).is_some_and(|r| r != 0) => {
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinaryOp::Div => a.checked_div(b),
        _ => a.checked_rem(b),
    };
    v.map(Value::Int).ok_or(EvalError::Overflow)
}

fn equals(lhs: &Value, rhs: &Value) -> EvalResult<bool> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(a == b),
        (Value::Bool(a), Value::Bool(b)) => Ok(a == b),
        (Value::Str(a), Value::Str(b)) => Ok(a == b),
        _ => Ok(compare(lhs, rhs)? == Ordering::Equal),
    }
}

fn compare(lhs: &Value, rhs: &Value) -> EvalResult<Ordering> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        _ => {
            let a = lhs.as_f64().ok_or_else(|| lhs.type_error("number"))?;
            let b = rhs.as_f64().ok_or_else(|| rhs.type_error("number"))?;
            a.partial_cmp(&b).ok_or_else(|| EvalError::Type {
                expected: "comparable numbers",
                found: format!("{a} and {b}"),
            })
        }
    }
}

fn call(name: &str, args: Vec<Value>) -> EvalResult<Value> {
    let upper = name.to_ascii_uppercase();
    match upper.as_str() {
        "ROUND" | "FLOOR" | "CEIL" => {
            let arg = single(name, args)?;
            let f = match arg {
                Value::Int(i) => return Ok(Value::Int(i)),
                Value::Float(f) => f,
                other => return Err(other.type_error("number")),
            };
            let rounded = match upper.as_str() {
                "ROUND" => f.round(),
                "FLOOR" => f.floor(),
                _ => f.ceil(),
            };
            if !is_integral(rounded) {
                return Err(EvalError::Overflow);
            }
            Ok(Value::Int(rounded as i64))
        }
        "ABS" => match single(name, args)? {
            Value::Int(i) => i.checked_abs().map(Value::Int).ok_or(EvalError::Overflow),
            Value::Float(f) => Ok(Value::Float(f.abs())),
            other => Err(other.type_error("number")),
        },
        "MIN" | "MAX" => {
            if args.is_empty() {
                return Err(EvalError::Arity {
                    name: name.to_string(),
                    expected: "at least 1",
                    got: 0,
                });
            }
            let want = if upper == "MIN" {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            let mut best: Option<Value> = None;
            let mut any_float = false;
            for arg in args {
                if arg.as_f64().is_none() {
                    return Err(arg.type_error("number"));
                }
                any_float |= matches!(arg, Value::Float(_));
                best = match best {
                    Some(current) if compare(&arg, &current)? != want => Some(current),
                    _ => Some(arg),
                };
            }
            match best {
                Some(v) if any_float => Ok(Value::Float(v.as_f64().unwrap_or_default())),
                Some(v) => Ok(v),
                None => Err(EvalError::Overflow),
            }
        }
        _ => Err(EvalError::UnknownFunction(name.to_string())),
    }
}

fn single(name: &str, mut args: Vec<Value>) -> EvalResult<Value> {
    if args.len() != 1 {
        return Err(EvalError::Arity {
            name: name.to_string(),
            expected: "1",
            got: args.len(),
        });
    }
    Ok(args.remove(0))
}
