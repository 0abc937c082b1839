//! Builtin functions
//!
//! Assertions delegate to the run's [`AssertionEngine`](trance_test::AssertionEngine);
//! fixture, parameter, mock and metric builtins go through the
//! [`RunContext`]. Every assertion accepts an optional trailing message.
//!
//! ## Assertions
//! - `assert(cond)`, `assert_true(v)`, `assert_false(v)`
//! - `assert_equal(a, b)`, `assert_not_equal(a, b)`
//! - `assert_greater`, `assert_greater_equal`, `assert_less`, `assert_less_equal`
//! - `assert_float_equal(a, b[, tolerance])`
//! - `assert_null`, `assert_not_null`, `assert_empty`, `assert_not_empty`
//! - `assert_contains(haystack, needle)`, `assert_not_contains`, `assert_length(v, n)`
//! - `assert_starts_with(s, prefix)`, `assert_ends_with(s, suffix)`
//! - `assert_throws(fn)`, `assert_does_not_throw(fn)`, `assert_throws_with_message(fn, text)`
//!
//! ## Fixtures, parameters, mocks, metrics
//! - `set_fixture(k, v)`, `fixture(k)`, `has_fixture(k)`, `acquire(k, fn)`,
//!   `acquire_global(k, fn)`, `on_teardown(fn)`
//! - `params()`, `param(i)`
//! - `mock(name, fn)`, `unmock(name)`, `is_mocked(name)`
//! - `record_metric(name, v)`, `record_sample(name, v)`, `now_ms()`
//!
//! ## Misc
//! - `print`, `len`, `str`, `throw`, `range`, `push`, `keys`, `contains`,
//!   `upper`, `lower`, `sqrt`, `abs`, `floor`

use crate::error::RuntimeError;
use chrono::Utc;
use trance_test::{Callable, RunContext, ScriptError, Value};

/// Every builtin name, in the order listed above
pub const BUILTINS: &[&str] = &[
    "assert",
    "assert_true",
    "assert_false",
    "assert_equal",
    "assert_not_equal",
    "assert_greater",
    "assert_greater_equal",
    "assert_less",
    "assert_less_equal",
    "assert_float_equal",
    "assert_null",
    "assert_not_null",
    "assert_empty",
    "assert_not_empty",
    "assert_contains",
    "assert_not_contains",
    "assert_length",
    "assert_starts_with",
    "assert_ends_with",
    "assert_throws",
    "assert_does_not_throw",
    "assert_throws_with_message",
    "set_fixture",
    "fixture",
    "has_fixture",
    "acquire",
    "acquire_global",
    "on_teardown",
    "params",
    "param",
    "mock",
    "unmock",
    "is_mocked",
    "record_metric",
    "record_sample",
    "now_ms",
    "print",
    "len",
    "str",
    "throw",
    "range",
    "push",
    "keys",
    "contains",
    "upper",
    "lower",
    "sqrt",
    "abs",
    "floor",
];

/// Check if a function name is a builtin
pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// Builtin as a first-class value, e.g. when passed to `mock` or `acquire`
pub fn builtin_value(name: &str) -> Option<Value> {
    let name = BUILTINS.iter().find(|b| **b == name)?;
    Some(Value::Function(Callable::native(*name, move |ctx, args| {
        call_builtin(name, ctx, args)
    })))
}

/// Call a builtin function by name
pub fn call_builtin(name: &str, ctx: &RunContext, args: Vec<Value>) -> Result<Value, ScriptError> {
    let engine = ctx.assertions();
    match name {
        // Single-value assertions
        "assert" | "assert_true" => {
            let msg = unary_assertion(name, &args)?;
            engine.assert_true(&args[0], msg)?;
        }
        "assert_false" => {
            let msg = unary_assertion(name, &args)?;
            engine.assert_false(&args[0], msg)?;
        }
        "assert_null" => {
            let msg = unary_assertion(name, &args)?;
            engine.assert_null(&args[0], msg)?;
        }
        "assert_not_null" => {
            let msg = unary_assertion(name, &args)?;
            engine.assert_not_null(&args[0], msg)?;
        }
        "assert_empty" => {
            let msg = unary_assertion(name, &args)?;
            engine.assert_empty(&args[0], msg)?;
        }
        "assert_not_empty" => {
            let msg = unary_assertion(name, &args)?;
            engine.assert_not_empty(&args[0], msg)?;
        }

        // Two-value assertions
        "assert_equal" => {
            let msg = binary_assertion(name, &args)?;
            engine.assert_equal(&args[0], &args[1], msg)?;
        }
        "assert_not_equal" => {
            let msg = binary_assertion(name, &args)?;
            engine.assert_not_equal(&args[0], &args[1], msg)?;
        }
        "assert_greater" => {
            let msg = binary_assertion(name, &args)?;
            engine.assert_greater(&args[0], &args[1], msg)?;
        }
        "assert_greater_equal" => {
            let msg = binary_assertion(name, &args)?;
            engine.assert_greater_equal(&args[0], &args[1], msg)?;
        }
        "assert_less" => {
            let msg = binary_assertion(name, &args)?;
            engine.assert_less(&args[0], &args[1], msg)?;
        }
        "assert_less_equal" => {
            let msg = binary_assertion(name, &args)?;
            engine.assert_less_equal(&args[0], &args[1], msg)?;
        }
        "assert_contains" => {
            let msg = binary_assertion(name, &args)?;
            engine.assert_contains(&args[0], &args[1], msg)?;
        }
        "assert_not_contains" => {
            let msg = binary_assertion(name, &args)?;
            engine.assert_not_contains(&args[0], &args[1], msg)?;
        }
        "assert_float_equal" => {
            check_arity(name, &args, 2, 4)?;
            // Third argument is a tolerance when numeric, else the message
            let (tolerance, msg) = match args.get(2) {
                Some(Value::Number(tol)) => (Some(*tol), optional_string(name, &args, 3)?),
                _ => {
                    check_arity(name, &args, 2, 3)?;
                    (None, optional_string(name, &args, 2)?)
                }
            };
            engine.assert_float_equal(&args[0], &args[1], tolerance, msg)?;
        }
        "assert_length" => {
            check_arity(name, &args, 2, 3)?;
            let expected = index_arg(name, &args, 1)?;
            let msg = optional_string(name, &args, 2)?;
            engine.assert_length(&args[0], expected, msg)?;
        }
        "assert_starts_with" => {
            check_arity(name, &args, 2, 3)?;
            let prefix = string_arg(name, &args, 1)?;
            let msg = optional_string(name, &args, 2)?;
            engine.assert_starts_with(&args[0], prefix, msg)?;
        }
        "assert_ends_with" => {
            check_arity(name, &args, 2, 3)?;
            let suffix = string_arg(name, &args, 1)?;
            let msg = optional_string(name, &args, 2)?;
            engine.assert_ends_with(&args[0], suffix, msg)?;
        }

        // Error assertions invoke a zero-argument function
        "assert_throws" => {
            check_arity(name, &args, 1, 2)?;
            let f = function_arg(name, &args, 0)?;
            let msg = optional_string(name, &args, 1)?;
            engine.assert_throws(|| f.call(ctx, Vec::new()), msg)?;
        }
        "assert_does_not_throw" => {
            check_arity(name, &args, 1, 2)?;
            let f = function_arg(name, &args, 0)?;
            let msg = optional_string(name, &args, 1)?;
            engine.assert_does_not_throw(|| f.call(ctx, Vec::new()), msg)?;
        }
        "assert_throws_with_message" => {
            check_arity(name, &args, 2, 3)?;
            let f = function_arg(name, &args, 0)?;
            let expected = string_arg(name, &args, 1)?;
            let msg = optional_string(name, &args, 2)?;
            engine.assert_throws_with_message(|| f.call(ctx, Vec::new()), expected, msg)?;
        }

        // Fixtures
        "set_fixture" => {
            check_arity(name, &args, 2, 2)?;
            let key = string_arg(name, &args, 0)?;
            ctx.set_fixture(key, args[1].clone())?;
        }
        "fixture" => {
            check_arity(name, &args, 1, 1)?;
            let key = string_arg(name, &args, 0)?;
            return ctx.fixture(key).ok_or_else(|| {
                ScriptError::raised(format!("no fixture value named '{}'", key))
            });
        }
        "has_fixture" => {
            check_arity(name, &args, 1, 1)?;
            let key = string_arg(name, &args, 0)?;
            return Ok(Value::Bool(ctx.has_fixture(key)));
        }
        "acquire" | "acquire_global" => {
            check_arity(name, &args, 2, 2)?;
            let key = string_arg(name, &args, 0)?;
            let factory = function_arg(name, &args, 1)?;
            let build = || factory.call(ctx, Vec::new());
            let value = if name == "acquire" {
                ctx.acquire(key, build)?
            } else {
                ctx.acquire_global(key, build)?
            };
            return Ok(value);
        }
        "on_teardown" => {
            check_arity(name, &args, 1, 1)?;
            let callback = function_arg(name, &args, 0)?;
            ctx.on_teardown(callback.name().to_string(), callback);
        }

        // Parameters
        "params" => {
            check_arity(name, &args, 0, 0)?;
            return Ok(Value::Array(ctx.params().to_vec()));
        }
        "param" => {
            check_arity(name, &args, 1, 1)?;
            let index = index_arg(name, &args, 0)?;
            return ctx.param(index).cloned().ok_or_else(|| {
                ScriptError::raised(format!(
                    "parameter index {} out of range ({} parameters)",
                    index,
                    ctx.params().len()
                ))
            });
        }

        // Mocks
        "mock" => {
            check_arity(name, &args, 2, 2)?;
            let target = string_arg(name, &args, 0)?;
            let replacement = function_arg(name, &args, 1)?;
            ctx.mock(target, replacement);
        }
        "unmock" => {
            check_arity(name, &args, 1, 1)?;
            let target = string_arg(name, &args, 0)?;
            return Ok(Value::Bool(ctx.unmock(target)));
        }
        "is_mocked" => {
            check_arity(name, &args, 1, 1)?;
            let target = string_arg(name, &args, 0)?;
            return Ok(Value::Bool(ctx.is_mocked(target)));
        }

        // Metrics
        "record_metric" | "record_sample" => {
            check_arity(name, &args, 2, 2)?;
            let metric = string_arg(name, &args, 0)?.to_string();
            let value = number_arg(name, &args, 1)?;
            if name == "record_metric" {
                ctx.record_metric(metric, value);
            } else {
                ctx.record_sample(metric, value);
            }
        }
        "now_ms" => {
            check_arity(name, &args, 0, 0)?;
            return Ok(Value::Number(Utc::now().timestamp_micros() as f64 / 1000.0));
        }

        // Misc
        "print" => {
            let parts: Vec<String> = args.iter().map(Value::to_string).collect();
            ctx.print(&parts.join(" "));
        }
        "len" => {
            check_arity(name, &args, 1, 1)?;
            let length = args[0].length().ok_or_else(|| {
                RuntimeError::type_error(format!("len: {} has no length", args[0].type_name()))
            })?;
            return Ok(Value::Number(length as f64));
        }
        "str" => {
            check_arity(name, &args, 1, 1)?;
            return Ok(Value::String(args[0].to_string()));
        }
        "throw" => {
            check_arity(name, &args, 1, 1)?;
            return Err(ScriptError::raised(args[0].to_string()));
        }
        "range" => return range(&args),
        "push" => {
            check_arity(name, &args, 2, 2)?;
            let mut items = match &args[0] {
                Value::Array(items) => items.clone(),
                other => return Err(expected_type(name, "array", other).into()),
            };
            items.push(args[1].clone());
            return Ok(Value::Array(items));
        }
        "keys" => {
            check_arity(name, &args, 1, 1)?;
            return match &args[0] {
                Value::Record(fields) => Ok(Value::Array(
                    fields.keys().map(|k| Value::String(k.clone())).collect(),
                )),
                other => Err(expected_type(name, "record", other).into()),
            };
        }
        "contains" => {
            check_arity(name, &args, 2, 2)?;
            let found = match (&args[0], &args[1]) {
                (Value::String(s), Value::String(sub)) => s.contains(sub.as_str()),
                (Value::Array(items), needle) => items.contains(needle),
                (Value::Record(fields), Value::String(key)) => fields.contains_key(key),
                (other, _) => {
                    return Err(expected_type(name, "string, array or record", other).into())
                }
            };
            return Ok(Value::Bool(found));
        }
        "upper" | "lower" => {
            check_arity(name, &args, 1, 1)?;
            let s = string_arg(name, &args, 0)?;
            let converted = if name == "upper" {
                s.to_uppercase()
            } else {
                s.to_lowercase()
            };
            return Ok(Value::String(converted));
        }
        "sqrt" | "abs" | "floor" => {
            check_arity(name, &args, 1, 1)?;
            let n = number_arg(name, &args, 0)?;
            let result = match name {
                "sqrt" => n.sqrt(),
                "abs" => n.abs(),
                _ => n.floor(),
            };
            return Ok(Value::Number(result));
        }

        _ => return Err(RuntimeError::UndefinedFunction(name.to_string()).into()),
    }
    Ok(Value::Null)
}

/// Longest array `range` will build
const MAX_RANGE_LEN: u64 = 1_000_000;

/// Integers up to this magnitude are exact in an f64
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// `range(end)` or `range(start, end)`: integers, end exclusive
fn range(args: &[Value]) -> Result<Value, ScriptError> {
    check_arity("range", args, 1, 2)?;
    let (start, end) = if args.len() == 1 {
        (0.0, number_arg("range", args, 0)?)
    } else {
        (number_arg("range", args, 0)?, number_arg("range", args, 1)?)
    };
    let start = start.floor();
    for bound in [start, end] {
        if !bound.is_finite() || bound.abs() > MAX_SAFE_INTEGER {
            return Err(ScriptError::raised(format!(
                "range bound {} is not a safe integer",
                Value::Number(bound).repr()
            )));
        }
    }

    let len = (end - start).ceil().max(0.0) as u64;
    if len > MAX_RANGE_LEN {
        return Err(ScriptError::raised(format!(
            "range of {} elements exceeds the limit of {}",
            len, MAX_RANGE_LEN
        )));
    }
    let items = (0..len).map(|k| Value::Number(start + k as f64)).collect();
    Ok(Value::Array(items))
}

// ============================================================================
// Argument helpers
// ============================================================================

fn check_arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), RuntimeError> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("{} argument{}", min, if min == 1 { "" } else { "s" })
        } else {
            format!("{} to {} arguments", min, max)
        };
        return Err(RuntimeError::Arity {
            function: name.to_string(),
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

/// `(value[, message])`
fn unary_assertion<'a>(name: &str, args: &'a [Value]) -> Result<Option<&'a str>, RuntimeError> {
    check_arity(name, args, 1, 2)?;
    optional_string(name, args, 1)
}

/// `(actual, expected[, message])`
fn binary_assertion<'a>(name: &str, args: &'a [Value]) -> Result<Option<&'a str>, RuntimeError> {
    check_arity(name, args, 2, 3)?;
    optional_string(name, args, 2)
}

fn expected_type(name: &str, expected: &str, found: &Value) -> RuntimeError {
    RuntimeError::type_error(format!(
        "{} expects {}, got {}",
        name,
        expected,
        found.type_name()
    ))
}

fn string_arg<'a>(name: &str, args: &'a [Value], index: usize) -> Result<&'a str, RuntimeError> {
    match args.get(index) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(expected_type(name, "string", other)),
        None => Err(expected_type(name, "string", &Value::Null)),
    }
}

fn optional_string<'a>(
    name: &str,
    args: &'a [Value],
    index: usize,
) -> Result<Option<&'a str>, RuntimeError> {
    match args.get(index) {
        None => Ok(None),
        Some(_) => string_arg(name, args, index).map(Some),
    }
}

fn number_arg(name: &str, args: &[Value], index: usize) -> Result<f64, RuntimeError> {
    match args.get(index) {
        Some(Value::Number(n)) => Ok(*n),
        Some(other) => Err(expected_type(name, "number", other)),
        None => Err(expected_type(name, "number", &Value::Null)),
    }
}

/// Non-negative integer argument
fn index_arg(name: &str, args: &[Value], index: usize) -> Result<usize, RuntimeError> {
    let n = number_arg(name, args, index)?;
    if n < 0.0 || n.fract() != 0.0 || !n.is_finite() {
        return Err(RuntimeError::type_error(format!(
            "{} expects a non-negative integer, got {}",
            name,
            Value::Number(n)
        )));
    }
    Ok(n as usize)
}

fn function_arg(name: &str, args: &[Value], index: usize) -> Result<Callable, RuntimeError> {
    match args.get(index) {
        Some(Value::Function(f)) => Ok(f.clone()),
        Some(other) => Err(expected_type(name, "function", other)),
        None => Err(expected_type(name, "function", &Value::Null)),
    }
}
