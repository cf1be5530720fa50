//! Evaluator: renders a parsed template against a JSON context
//!
//! Path resolution distinguishes an explicit `null` (an optional object that
//! is absent, e.g. no runtime context) from a missing key. `null` renders as
//! the empty string and is false in conditions; a missing key is an error in
//! output position and false in conditions.

use serde_json::Value;

use crate::error::{TemplateError, TemplateResult};
use crate::parser::{Expr, Func, Node};

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
enum Resolved {
    Missing,
    Value(Value),
}

impl Resolved {
    fn into_value(self) -> Value {
        match self {
            Self::Missing => Value::Null,
            Self::Value(v) => v,
        }
    }

    fn truthy(&self) -> bool {
        match self {
            Self::Missing => false,
            Self::Value(v) => is_truthy(v),
        }
    }
}

/// Render a node list into `out`.
pub(crate) fn render_nodes(nodes: &[Node], ctx: &Value, out: &mut String) -> TemplateResult<()> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Output(expr) => match eval(expr, ctx)? {
                Resolved::Missing => {
                    return Err(TemplateError::MissingField {
                        path: expr.describe(),
                    });
                }
                Resolved::Value(value) => write_value(&value, out),
            },
            Node::If {
                branches,
                otherwise,
            } => {
                let mut taken = false;
                for (condition, body) in branches {
                    if eval(condition, ctx)?.truthy() {
                        render_nodes(body, ctx, out)?;
                        taken = true;
                        break;
                    }
                }
                if !taken {
                    render_nodes(otherwise, ctx, out)?;
                }
            }
        }
    }
    Ok(())
}

fn eval(expr: &Expr, ctx: &Value) -> TemplateResult<Resolved> {
    match expr {
        Expr::Path(segments) => Ok(resolve(ctx, segments)),
        Expr::Literal(value) => Ok(Resolved::Value(value.clone())),
        Expr::Call { func, args } => call(*func, args, ctx).map(Resolved::Value),
    }
}

fn resolve(ctx: &Value, segments: &[String]) -> Resolved {
    let mut current = ctx;
    for segment in segments {
        match current {
            Value::Null => return Resolved::Value(Value::Null),
            Value::Object(map) => match map.get(segment) {
                Some(next) => current = next,
                None => return Resolved::Missing,
            },
            _ => return Resolved::Missing,
        }
    }
    Resolved::Value(current.clone())
}

fn call(func: Func, args: &[Expr], ctx: &Value) -> TemplateResult<Value> {
    match func {
        Func::Eq => {
            let first = eval(&args[0], ctx)?.into_value();
            for other in &args[1..] {
                if values_equal(&first, &eval(other, ctx)?.into_value()) {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        Func::Ne => {
            let a = eval(&args[0], ctx)?.into_value();
            let b = eval(&args[1], ctx)?.into_value();
            Ok(Value::Bool(!values_equal(&a, &b)))
        }
        Func::Not => Ok(Value::Bool(!eval(&args[0], ctx)?.truthy())),
        Func::And => {
            let mut last = Resolved::Missing;
            for arg in args {
                last = eval(arg, ctx)?;
                if !last.truthy() {
                    break;
                }
            }
            Ok(last.into_value())
        }
        Func::Or => {
            let mut last = Resolved::Missing;
            for arg in args {
                last = eval(arg, ctx)?;
                if last.truthy() {
                    break;
                }
            }
            Ok(last.into_value())
        }
        Func::Default => {
            let value = eval(&args[1], ctx)?;
            if value.truthy() {
                Ok(value.into_value())
            } else {
                Ok(eval(&args[0], ctx)?.into_value())
            }
        }
        Func::Json => match eval(&args[0], ctx)? {
            Resolved::Missing => Err(TemplateError::MissingField {
                path: args[0].describe(),
            }),
            Resolved::Value(value) => serde_json::to_string(&value)
                .map(Value::String)
                .map_err(|e| TemplateError::Function {
                    name: func.name().to_string(),
                    message: e.to_string(),
                }),
        },
        Func::Len => match eval(&args[0], ctx)?.into_value() {
            Value::Null => Ok(Value::from(0)),
            Value::String(s) => Ok(Value::from(s.chars().count())),
            Value::Array(items) => Ok(Value::from(items.len())),
            Value::Object(map) => Ok(Value::from(map.len())),
            other => Err(TemplateError::Function {
                name: func.name().to_string(),
                message: format!("len of {other} is undefined"),
            }),
        },
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => {}
        Value::String(s) => out.push_str(s),
        // Scalars via Display; arrays and objects as compact JSON.
        other => out.push_str(&other.to_string()),
    }
}
