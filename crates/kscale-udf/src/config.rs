//! Handler options and their validation.
//!
//! Options arrive once per connection in the `init` request. Defaults
//! are applied first, then every supplied option is type-checked, then
//! the result is validated. All problems are reported together.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use kscale_autoscale::ScalePolicy;
use kscale_expr::{CompiledExpr, Evaluator, ExprEvaluator};

use crate::error::{ConfigError, ConfigResult};
use crate::protocol::{OptionSpec, OptionValue, ValueType};

/// Raw handler options, after defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerConfig {
    /// Service to scale.
    pub id: String,
    /// Predicate over the point's fields.
    pub when: String,
    /// Target formula over `current`.
    pub by: String,
    pub min_instances: i64,
    pub max_instances: i64,
    /// Go-style duration string, e.g. `"1m"`.
    pub cooldown: String,
    pub simulate: bool,
    pub debug: bool,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            when: String::new(),
            by: "current + 1".to_string(),
            min_instances: 1,
            max_instances: 3,
            cooldown: "1m".to_string(),
            simulate: false,
            debug: false,
        }
    }
}

/// A validated, compiled configuration.
#[derive(Debug, Clone)]
pub struct ScaleRule {
    pub service_id: String,
    pub when: Arc<dyn CompiledExpr>,
    pub by: Arc<dyn CompiledExpr>,
    pub policy: ScalePolicy,
    pub debug: bool,
}

impl ScaleRule {
    /// Build a rule from `init` options, or report every problem found.
    pub fn from_options(options: &[OptionSpec]) -> ConfigResult<Self> {
        Self::from_options_with(options, &ExprEvaluator)
    }

    /// Like [`ScaleRule::from_options`], compiling expressions with
    /// `evaluator`.
    pub fn from_options_with(
        options: &[OptionSpec],
        evaluator: &dyn Evaluator,
    ) -> ConfigResult<Self> {
        let (config, mut errors) = HandlerConfig::from_options(options);
        match config.compile_with(evaluator) {
            Ok(rule) if errors.is_empty() => Ok(rule),
            Ok(_) => Err(ConfigError(errors)),
            Err(ConfigError(more)) => {
                errors.extend(more);
                Err(ConfigError(errors))
            }
        }
    }
}

impl HandlerConfig {
    /// Option names and the value types each accepts.
    pub fn option_types() -> BTreeMap<String, Vec<ValueType>> {
        [
            ("id", vec![ValueType::String]),
            ("when", vec![ValueType::String]),
            ("by", vec![ValueType::String]),
            ("min_instances", vec![ValueType::Int]),
            ("max_instances", vec![ValueType::Int]),
            ("cooldown", vec![ValueType::String, ValueType::Duration]),
            ("simulate", vec![ValueType::Bool]),
            ("debug", vec![ValueType::Bool]),
        ]
        .into_iter()
        .map(|(name, types)| (name.to_string(), types))
        .collect()
    }

    /// Apply `options` over the defaults.
    ///
    /// Returns the resulting config along with one message per unknown
    /// or mistyped option; such options are left at their default.
    pub fn from_options(options: &[OptionSpec]) -> (Self, Vec<String>) {
        let mut config = Self::default();
        let mut errors = Vec::new();

        for opt in options {
            let value = match opt.values.as_slice() {
                [value] => value,
                values => {
                    errors.push(format!(
                        "option `{}` expects exactly one value, got {}",
                        opt.name,
                        values.len()
                    ));
                    continue;
                }
            };

            let name = opt.name.as_str();
            match (name, value) {
                ("id", OptionValue::String(s)) => config.id = s.clone(),
                ("when", OptionValue::String(s)) => config.when = s.clone(),
                ("by", OptionValue::String(s)) => config.by = s.clone(),
                ("min_instances", OptionValue::Int(n)) => config.min_instances = *n,
                ("max_instances", OptionValue::Int(n)) => config.max_instances = *n,
                ("cooldown", OptionValue::String(s)) => config.cooldown = s.clone(),
                ("cooldown", OptionValue::Duration(ns)) => config.cooldown = format!("{ns}ns"),
                ("simulate", OptionValue::Bool(b)) => config.simulate = *b,
                ("debug", OptionValue::Bool(b)) => config.debug = *b,
                _ if Self::option_types().contains_key(name) => errors.push(format!(
                    "option `{name}` has the wrong type {:?}",
                    value.value_type()
                )),
                _ => errors.push(format!("unknown option `{name}`")),
            }
        }

        (config, errors)
    }

    /// Validate and compile into a [`ScaleRule`].
    pub fn compile(&self) -> ConfigResult<ScaleRule> {
        self.compile_with(&ExprEvaluator)
    }

    pub fn compile_with(&self, evaluator: &dyn Evaluator) -> ConfigResult<ScaleRule> {
        let mut errors = Vec::new();

        if self.id.is_empty() {
            errors.push("must supply `id` of the service to scale".to_string());
        }
        let when = compile_expression(evaluator, "when", &self.when, &mut errors);
        let by = compile_expression(evaluator, "by", &self.by, &mut errors);

        if self.min_instances < 0 {
            errors.push("`min_instances` must be greater or equal 0".to_string());
        }
        if self.max_instances < 0 {
            errors.push("`max_instances` must be greater or equal 0".to_string());
        }
        if self.max_instances < self.min_instances {
            errors.push("`max_instances` must be greater or equal `min_instances`".to_string());
        }

        let cooldown = match parse_duration(&self.cooldown) {
            Ok(d) => Some(d),
            Err(e) => {
                errors.push(format!("`cooldown` '{}' {e}", self.cooldown));
                None
            }
        };

        match (when, by, cooldown) {
            (Some(when), Some(by), Some(cooldown)) if errors.is_empty() => Ok(ScaleRule {
                service_id: self.id.clone(),
                when,
                by,
                policy: ScalePolicy {
                    min_instances: self.min_instances,
                    max_instances: self.max_instances,
                    cooldown,
                    simulate: self.simulate,
                },
                debug: self.debug,
            }),
            _ => Err(ConfigError(errors)),
        }
    }
}

fn compile_expression(
    evaluator: &dyn Evaluator,
    name: &str,
    source: &str,
    errors: &mut Vec<String>,
) -> Option<Arc<dyn CompiledExpr>> {
    if source.trim().is_empty() {
        errors.push(format!("must supply `{name}` expression"));
        return None;
    }
    match evaluator.compile(source) {
        Ok(expr) => Some(expr),
        Err(e) => {
            errors.push(format!("`{name}` expression '{source}' is invalid: {e}"));
            None
        }
    }
}

/// Parse a Go-style duration such as `"1m"`, `"1h30m"`, `"1.5s"` or
/// `"250ms"`. Negative durations are rejected.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (negative, mut rest) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        return Err("has an invalid format: empty duration".to_string());
    }

    let mut total: u128 = 0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let number = &rest[..number_len];
        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if (whole.is_empty() && fraction.is_empty()) || fraction.contains('.') {
            return Err(format!("has an invalid format: bad number at '{rest}'"));
        }
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit_nanos: u128 = match &rest[..unit_len] {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60_000_000_000,
            "h" => 3_600_000_000_000,
            "" => return Err("has an invalid format: missing unit".to_string()),
            unit => return Err(format!("has an invalid format: unknown unit '{unit}'")),
        };
        rest = &rest[unit_len..];

        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| "is out of range".to_string())?
        };
        let mut nanos = whole
            .checked_mul(unit_nanos)
            .ok_or_else(|| "is out of range".to_string())?;
        // Digits past nanosecond precision are dropped.
        let mut scale = unit_nanos;
        for digit in fraction.bytes() {
            scale /= 10;
            if scale == 0 {
                break;
            }
            nanos += u128::from(digit - b'0') * scale;
        }
        total = total
            .checked_add(nanos)
            .ok_or_else(|| "is out of range".to_string())?;
    }

    if negative && total > 0 {
        return Err("must be greater or equal 0s".to_string());
    }
    let secs = u64::try_from(total / 1_000_000_000).map_err(|_| "is out of range".to_string())?;
    Ok(Duration::new(secs, (total % 1_000_000_000) as u32))
}
