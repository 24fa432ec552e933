//! kscale-expr — a small expression language for scaling rules.
//!
//! Two kinds of expressions drive a scaling handler: a `when` predicate
//! evaluated against the numeric fields of an incoming point, and a `by`
//! formula evaluated against the service's live state (`current`).
//!
//! ```text
//! when: cpu_usage > 80 && queue_size >= 10
//! by:   MIN(current * 2, current + 5)
//! ```
//!
//! # Values
//!
//! Expressions are dynamically typed over [`Value`]. Conversions to the
//! type a caller needs are explicit ([`Value::as_bool`], [`Value::as_int`])
//! and fail with [`EvalError::Type`] instead of coercing silently.
//!
//! # Grammar
//!
//! ```text
//! or      := and ( ("||" | "or") and )*
//! and     := cmp ( ("&&" | "and") cmp )*
//! cmp     := sum ( ("<" | "<=" | ">" | ">=" | "==" | "!=") sum )*
//! sum     := product ( ("+" | "-") product )*
//! product := unary ( ("*" | "/" | "%") unary )*
//! unary   := ("-" | "!" | "not") unary | primary
//! primary := number | string | "true" | "false"
//!          | ident | ident "(" args ")" | "(" or ")"
//! ```

pub mod error;
pub mod expr;
pub mod lexer;
pub mod parser;
pub mod value;

pub use error::{EvalError, EvalResult};
pub use expr::{CompiledExpr, Evaluator, ExprEvaluator, Expression};
pub use value::{Context, Value};
