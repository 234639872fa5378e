// elspeth-expr/src/eval.rs
// ============================================================================
// Module: Evaluator
// Description: Walks a parsed `Expr` against a row, producing a JSON value.
// Purpose: Keep evaluation total and side-effect free (§4.3): every `Expr`
//          variant maps to exactly one evaluation rule, and a registered
//          function is the only place arbitrary logic can run, behind a
//          signature the caller controls.
// Dependencies: crate::{ast, error}, serde_json::Value
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::ast::CompareOp;
use crate::ast::Expr;
use crate::error::EvalError;

/// A registered predicate function, callable from expression source via
/// `name(args...)`.
pub type PredicateFn = dyn Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync;

/// The set of functions a particular gate's expression may call, keyed by
/// the name it is registered under.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, Arc<PredicateFn>>,
}

impl FunctionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a function under `name`, replacing any existing
    /// registration with that name.
    pub fn register(&mut self, name: impl Into<String>, func: impl Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync + 'static) {
        self.functions.insert(name.into(), Arc::new(func));
    }

    /// Returns the set of registered names, for building a parser's
    /// `allowed_functions` set.
    #[must_use]
    pub fn names(&self) -> std::collections::BTreeSet<String> {
        self.functions.keys().cloned().collect()
    }
}

/// Evaluates `expr` against `row`, using `functions` to resolve any call
/// nodes.
///
/// # Errors
///
/// Returns [`EvalError`] when a comparison, membership test, or function
/// call cannot be completed against the values actually present in `row` —
/// the only failures possible here are ones the parser could not have
/// anticipated without knowing the row's runtime shape.
pub fn evaluate(expr: &Expr, row: &serde_json::Map<String, Value>, functions: &FunctionRegistry) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Attribute(path) => Ok(resolve_attribute(row, path)),
        Expr::Not(inner) => {
            let value = evaluate(inner, row, functions)?;
            Ok(Value::Bool(!truthy(&value)))
        }
        Expr::And(lhs, rhs) => {
            let left = evaluate(lhs, row, functions)?;
            if !truthy(&left) {
                return Ok(Value::Bool(false));
            }
            let right = evaluate(rhs, row, functions)?;
            Ok(Value::Bool(truthy(&right)))
        }
        Expr::Or(lhs, rhs) => {
            let left = evaluate(lhs, row, functions)?;
            if truthy(&left) {
                return Ok(Value::Bool(true));
            }
            let right = evaluate(rhs, row, functions)?;
            Ok(Value::Bool(truthy(&right)))
        }
        Expr::Compare(lhs, op, rhs) => {
            let left = evaluate(lhs, row, functions)?;
            let right = evaluate(rhs, row, functions)?;
            compare(&left, *op, &right).map(Value::Bool)
        }
        Expr::In(lhs, rhs) => {
            let needle = evaluate(lhs, row, functions)?;
            let haystack = evaluate(rhs, row, functions)?;
            membership(&needle, &haystack).map(Value::Bool)
        }
        Expr::Len(inner) => {
            let value = evaluate(inner, row, functions)?;
            length_of(&value).map(|n| Value::Number(n.into()))
        }
        Expr::Call(name, arg_exprs) => {
            let args: Vec<Value> =
                arg_exprs.iter().map(|a| evaluate(a, row, functions)).collect::<Result<_, _>>()?;
            let func = functions.functions.get(name).ok_or_else(|| EvalError::FunctionFailed {
                name: name.clone(),
                message: "function not registered at evaluation time".to_string(),
            })?;
            func(&args)
        }
    }
}

/// Evaluates `expr` and coerces the result to a `bool`, treating any
/// non-boolean, non-null result as an evaluator type error.
///
/// # Errors
///
/// Returns [`EvalError::TypeMismatch`] when the expression evaluates to a
/// non-boolean value, and any error `evaluate` itself returns.
pub fn evaluate_predicate(expr: &Expr, row: &serde_json::Map<String, Value>, functions: &FunctionRegistry) -> Result<bool, EvalError> {
    match evaluate(expr, row, functions)? {
        Value::Bool(b) => Ok(b),
        _ => Err(EvalError::TypeMismatch { operation: "gate predicate result (expected boolean)" }),
    }
}

fn resolve_attribute(row: &serde_json::Map<String, Value>, path: &[String]) -> Value {
    let mut current = row.get(path[0].as_str()).cloned().unwrap_or(Value::Null);
    for segment in &path[1..] {
        current = match current {
            Value::Object(ref map) => map.get(segment.as_str()).cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        };
    }
    current
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn compare(lhs: &Value, op: CompareOp, rhs: &Value) -> Result<bool, EvalError> {
    if matches!(op, CompareOp::Eq) {
        return Ok(lhs == rhs);
    }
    if matches!(op, CompareOp::Ne) {
        return Ok(lhs != rhs);
    }
    let (Value::Number(l), Value::Number(r)) = (lhs, rhs) else {
        return Err(EvalError::TypeMismatch { operation: "ordered comparison (expected two numbers)" });
    };
    let (l, r) = (l.as_f64().unwrap_or(f64::NAN), r.as_f64().unwrap_or(f64::NAN));
    Ok(match op {
        CompareOp::Lt => l < r,
        CompareOp::Le => l <= r,
        CompareOp::Gt => l > r,
        CompareOp::Ge => l >= r,
        CompareOp::Eq | CompareOp::Ne => unreachable!("handled above"),
    })
}

fn membership(needle: &Value, haystack: &Value) -> Result<bool, EvalError> {
    match haystack {
        Value::Array(items) => Ok(items.contains(needle)),
        Value::String(s) => match needle {
            Value::String(n) => Ok(s.contains(n.as_str())),
            _ => Err(EvalError::TypeMismatch { operation: "`in` on a string (expected a string needle)" }),
        },
        _ => Err(EvalError::TypeMismatch { operation: "`in` (expected an array or string)" }),
    }
}

fn length_of(value: &Value) -> Result<u64, EvalError> {
    match value {
        Value::Array(items) => Ok(items.len() as u64),
        Value::String(s) => Ok(s.chars().count() as u64),
        Value::Object(map) => Ok(map.len() as u64),
        _ => Err(EvalError::TypeMismatch { operation: "len() (expected an array, string, or object)" }),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::FunctionRegistry;
    use super::evaluate_predicate;
    use crate::parser::parse;
    use std::collections::BTreeSet;

    #[test]
    fn evaluates_comparison_against_row() {
        let row = json!({"age": 21}).as_object().unwrap().clone();
        let attrs: BTreeSet<String> = ["age".to_string()].into_iter().collect();
        let expr = parse("age >= 18", &attrs, &BTreeSet::new()).expect("parse");
        assert!(evaluate_predicate(&expr, &row, &FunctionRegistry::new()).expect("eval"));
    }

    #[test]
    fn evaluates_membership() {
        let row = json!({"tags": ["vip", "eu"]}).as_object().unwrap().clone();
        let attrs: BTreeSet<String> = ["tags".to_string()].into_iter().collect();
        let expr = parse("\"vip\" in tags", &attrs, &BTreeSet::new()).expect("parse");
        assert!(evaluate_predicate(&expr, &row, &FunctionRegistry::new()).expect("eval"));
    }

    #[test]
    fn calls_registered_function() {
        let row = json!({"score": 5}).as_object().unwrap().clone();
        let attrs: BTreeSet<String> = ["score".to_string()].into_iter().collect();
        let mut functions = FunctionRegistry::new();
        functions.register("is_even", |args| match args {
            [serde_json::Value::Number(n)] => Ok(serde_json::Value::Bool((n.as_i64().unwrap_or(1)) % 2 == 0)),
            _ => Err(crate::error::EvalError::ArityMismatch { name: "is_even".to_string(), expected: 1, found: args.len() }),
        });
        let names = functions.names();
        let expr = parse("not is_even(score)", &attrs, &names).expect("parse");
        assert!(evaluate_predicate(&expr, &row, &functions).expect("eval"));
    }
}
