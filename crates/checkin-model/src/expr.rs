//! Style expressions
//!
//! A small subset of the engine-side expression language. Layers describe
//! icon and label choices with these instead of resolving them in application
//! code, so a missing avatar falls back inside the engine at draw time.
//!
//! Expressions serialize to the array form engines accept, e.g.
//! `["coalesce", ["image", ["get", "iconId"]], "fallback"]`.

use serde::{Serialize, Serializer};
use serde_json::{json, Value};

/// Data an expression is evaluated against
pub trait EvalContext {
    /// Feature property by name
    fn property(&self, name: &str) -> Option<Value>;

    /// Whether the image atlas holds `id`
    fn has_image(&self, id: &str) -> bool;
}

/// Engine-evaluated style expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Constant value
    Literal(Value),
    /// Feature property, `null` when absent
    Get(String),
    /// Whether a feature property is present
    Has(String),
    /// Boolean negation; anything but `true` negates to `true`
    Not(Box<Expr>),
    /// String conversion; numbers without fraction print as integers
    ToString(Box<Expr>),
    /// String concatenation of every operand
    Concat(Vec<Expr>),
    /// Numeric subtraction
    Sub(Box<Expr>, Box<Expr>),
    /// Numeric greater-than
    Gt(Box<Expr>, Box<Expr>),
    /// First branch whose condition is `true`, else `otherwise`
    Case {
        /// `(condition, output)` pairs
        branches: Vec<(Expr, Expr)>,
        /// Output when no condition holds
        otherwise: Box<Expr>,
    },
    /// Piecewise-constant lookup on a numeric input
    Step {
        /// Numeric input
        input: Box<Expr>,
        /// Output below the first stop
        base: Box<Expr>,
        /// Ascending `(threshold, output)` stops
        stops: Vec<(f64, Expr)>,
    },
    /// First non-null operand
    Coalesce(Vec<Expr>),
    /// Image id when present in the atlas, otherwise `null`
    Image(Box<Expr>),
}

impl Expr {
    /// String literal
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self::Literal(Value::String(value.into()))
    }

    /// Numeric literal
    #[must_use]
    pub fn number(value: f64) -> Self {
        Self::Literal(json!(value))
    }

    /// Property lookup
    #[must_use]
    pub fn get(name: impl Into<String>) -> Self {
        Self::Get(name.into())
    }

    /// Evaluate against a feature and the current atlas
    #[must_use]
    pub fn evaluate(&self, ctx: &dyn EvalContext) -> Value {
        match self {
            Self::Literal(v) => v.clone(),
            Self::Get(name) => ctx.property(name).unwrap_or(Value::Null),
            Self::Has(name) => Value::Bool(ctx.property(name).is_some()),
            Self::Not(inner) => Value::Bool(inner.evaluate(ctx) != Value::Bool(true)),
            Self::ToString(inner) => Value::String(stringify(&inner.evaluate(ctx))),
            Self::Concat(parts) => Value::String(
                parts
                    .iter()
                    .map(|p| stringify(&p.evaluate(ctx)))
                    .collect(),
            ),
            Self::Sub(a, b) => match (number(&a.evaluate(ctx)), number(&b.evaluate(ctx))) {
                (Some(a), Some(b)) => json!(a - b),
                _ => Value::Null,
            },
            Self::Gt(a, b) => match (number(&a.evaluate(ctx)), number(&b.evaluate(ctx))) {
                (Some(a), Some(b)) => Value::Bool(a > b),
                _ => Value::Bool(false),
            },
            Self::Case {
                branches,
                otherwise,
            } => branches
                .iter()
                .find(|(cond, _)| cond.evaluate(ctx) == Value::Bool(true))
                .map_or_else(|| otherwise.evaluate(ctx), |(_, out)| out.evaluate(ctx)),
            Self::Step { input, base, stops } => {
                let Some(x) = number(&input.evaluate(ctx)) else {
                    return base.evaluate(ctx);
                };
                stops
                    .iter()
                    .take_while(|(threshold, _)| x >= *threshold)
                    .last()
                    .map_or_else(|| base.evaluate(ctx), |(_, out)| out.evaluate(ctx))
            }
            Self::Coalesce(options) => options
                .iter()
                .map(|o| o.evaluate(ctx))
                .find(|v| !v.is_null())
                .unwrap_or(Value::Null),
            Self::Image(inner) => match inner.evaluate(ctx) {
                Value::String(id) if ctx.has_image(&id) => Value::String(id),
                _ => Value::Null,
            },
        }
    }

    /// Array form understood by engines
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Literal(v) => v.clone(),
            Self::Get(name) => json!(["get", name]),
            Self::Has(name) => json!(["has", name]),
            Self::Not(inner) => json!(["!", inner.to_json()]),
            Self::ToString(inner) => json!(["to-string", inner.to_json()]),
            Self::Concat(parts) => op("concat", parts.iter().map(Expr::to_json)),
            Self::Sub(a, b) => json!(["-", a.to_json(), b.to_json()]),
            Self::Gt(a, b) => json!([">", a.to_json(), b.to_json()]),
            Self::Case {
                branches,
                otherwise,
            } => op(
                "case",
                branches
                    .iter()
                    .flat_map(|(c, o)| [c.to_json(), o.to_json()])
                    .chain(std::iter::once(otherwise.to_json())),
            ),
            Self::Step { input, base, stops } => op(
                "step",
                [input.to_json(), base.to_json()].into_iter().chain(
                    stops
                        .iter()
                        .flat_map(|(t, o)| [json!(t), o.to_json()]),
                ),
            ),
            Self::Coalesce(options) => op("coalesce", options.iter().map(Expr::to_json)),
            Self::Image(inner) => json!(["image", inner.to_json()]),
        }
    }
}

impl Serialize for Expr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

fn op(name: &str, args: impl Iterator<Item = Value>) -> Value {
    Value::Array(std::iter::once(Value::from(name)).chain(args).collect())
}

fn number(value: &Value) -> Option<f64> {
    value.as_f64()
}

#[allow(clippy::cast_possible_truncation)]
fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}
