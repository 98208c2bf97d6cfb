use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use serde_json::Value;

use crate::errors::{CalcError, Result};

/// Trait for pluggable functions callable from formulas.
pub trait Function: Send + Sync {
    fn name(&self) -> &'static str;
    fn arity(&self) -> RangeInclusive<usize>;
    fn call(&self, args: &[Value]) -> Result<Value>;
}

/// Thread-safe function registry. Cloning is cheap; registering on a clone
/// copies on write, so per-calculator additions never leak into the
/// process-wide default instance.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<HashMap<&'static str, Arc<dyn Function>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut map: HashMap<&'static str, Arc<dyn Function>> = HashMap::new();
        map.insert("min", Arc::new(builtins::Min));
        map.insert("max", Arc::new(builtins::Max));
        map.insert("sum", Arc::new(builtins::Sum));
        map.insert("round", Arc::new(builtins::Round));
        map.insert("abs", Arc::new(builtins::Abs));
        map.insert("if", Arc::new(builtins::If));
        map.insert("concat", Arc::new(builtins::Concat));
        map.insert("lower", Arc::new(builtins::Lower));
        map.insert("upper", Arc::new(builtins::Upper));
        Self {
            inner: Arc::new(map),
        }
    }

    /// A snapshot of the process-wide default instance; new calculators
    /// start from one unless the constructor was given another registry.
    /// Cloning is cheap, and later `register_global` calls never alter a
    /// snapshot already taken.
    pub fn default_global() -> Registry {
        DEFAULT.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn register<F: Function + 'static>(&mut self, f: F) {
        let map = Arc::make_mut(&mut self.inner);
        map.insert(f.name(), Arc::new(f));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Function>> {
        self.inner.get(name).cloned()
    }
}

static DEFAULT: Lazy<RwLock<Registry>> = Lazy::new(|| RwLock::new(Registry::with_builtins()));

/// Register a function into the process-wide default registry. Every
/// calculator constructed afterwards picks it up; existing calculators and
/// registry snapshots are unaffected.
pub fn register_global<F: Function + 'static>(f: F) {
    DEFAULT.write().unwrap_or_else(|e| e.into_inner()).register(f);
}

fn arg<'a>(args: &'a [Value], i: usize, fname: &str) -> Result<&'a Value> {
    args.get(i).ok_or_else(|| {
        CalcError::InvalidArgument(format!("{fname}() is missing argument {}", i + 1))
    })
}

fn number(arg: &Value, fname: &str) -> Result<f64> {
    arg.as_f64().ok_or_else(|| {
        CalcError::InvalidArgument(format!("{fname}() expects numeric arguments, got {arg}"))
    })
}

fn numbers(args: &[Value], fname: &str) -> Result<Vec<f64>> {
    args.iter().map(|a| number(a, fname)).collect()
}

/// Emit an integer when the result is exactly integral.
pub(crate) fn number_value(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < (1i64 << 53) as f64 {
        Value::from(f as i64)
    } else {
        Value::from(f)
    }
}

pub mod builtins {
    use super::*;

    pub struct Min;
    impl Function for Min {
        fn name(&self) -> &'static str {
            "min"
        }
        fn arity(&self) -> RangeInclusive<usize> {
            1..=usize::MAX
        }
        fn call(&self, args: &[Value]) -> Result<Value> {
            let ns = numbers(args, "min")?;
            Ok(number_value(ns.into_iter().fold(f64::INFINITY, f64::min)))
        }
    }

    pub struct Max;
    impl Function for Max {
        fn name(&self) -> &'static str {
            "max"
        }
        fn arity(&self) -> RangeInclusive<usize> {
            1..=usize::MAX
        }
        fn call(&self, args: &[Value]) -> Result<Value> {
            let ns = numbers(args, "max")?;
            Ok(number_value(ns.into_iter().fold(f64::NEG_INFINITY, f64::max)))
        }
    }

    pub struct Sum;
    impl Function for Sum {
        fn name(&self) -> &'static str {
            "sum"
        }
        fn arity(&self) -> RangeInclusive<usize> {
            1..=usize::MAX
        }
        fn call(&self, args: &[Value]) -> Result<Value> {
            let ns = numbers(args, "sum")?;
            Ok(number_value(ns.into_iter().sum()))
        }
    }

    /// round(x) or round(x, places)
    pub struct Round;
    impl Function for Round {
        fn name(&self) -> &'static str {
            "round"
        }
        fn arity(&self) -> RangeInclusive<usize> {
            1..=2
        }
        fn call(&self, args: &[Value]) -> Result<Value> {
            let x = number(arg(args, 0, "round")?, "round")?;
            let places = match args.get(1) {
                Some(p) => number(p, "round")? as i32,
                None => 0,
            };
            let factor = 10f64.powi(places);
            Ok(number_value((x * factor).round() / factor))
        }
    }

    pub struct Abs;
    impl Function for Abs {
        fn name(&self) -> &'static str {
            "abs"
        }
        fn arity(&self) -> RangeInclusive<usize> {
            1..=1
        }
        fn call(&self, args: &[Value]) -> Result<Value> {
            Ok(number_value(number(arg(args, 0, "abs")?, "abs")?.abs()))
        }
    }

    /// if(condition, then, else); arguments arrive already evaluated.
    pub struct If;
    impl Function for If {
        fn name(&self) -> &'static str {
            "if"
        }
        fn arity(&self) -> RangeInclusive<usize> {
            3..=3
        }
        fn call(&self, args: &[Value]) -> Result<Value> {
            let cond = arg(args, 0, "if")?.as_bool().ok_or_else(|| {
                CalcError::InvalidArgument(format!(
                    "if() expects a boolean condition, got {}",
                    args[0]
                ))
            })?;
            let branch = if cond { 1 } else { 2 };
            Ok(arg(args, branch, "if")?.clone())
        }
    }

    pub struct Concat;
    impl Function for Concat {
        fn name(&self) -> &'static str {
            "concat"
        }
        fn arity(&self) -> RangeInclusive<usize> {
            1..=usize::MAX
        }
        fn call(&self, args: &[Value]) -> Result<Value> {
            let mut out = String::new();
            for arg in args {
                match arg {
                    Value::String(s) => out.push_str(s),
                    other => out.push_str(&other.to_string()),
                }
            }
            Ok(Value::String(out))
        }
    }

    pub struct Lower;
    impl Function for Lower {
        fn name(&self) -> &'static str {
            "lower"
        }
        fn arity(&self) -> RangeInclusive<usize> {
            1..=1
        }
        fn call(&self, args: &[Value]) -> Result<Value> {
            Ok(match arg(args, 0, "lower")? {
                Value::String(t) => Value::String(t.to_lowercase()),
                other => other.clone(),
            })
        }
    }

    pub struct Upper;
    impl Function for Upper {
        fn name(&self) -> &'static str {
            "upper"
        }
        fn arity(&self) -> RangeInclusive<usize> {
            1..=1
        }
        fn call(&self, args: &[Value]) -> Result<Value> {
            Ok(match arg(args, 0, "upper")? {
                Value::String(t) => Value::String(t.to_uppercase()),
                other => other.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn builtin_dispatch() {
        let registry = Registry::with_builtins();
        let min = registry.get("min").unwrap();
        assert_eq!(min.call(&[json!(3), json!(1), json!(2)]).unwrap(), json!(1));
        let upper = registry.get("upper").unwrap();
        assert_eq!(upper.call(&[json!("abc")]).unwrap(), json!("ABC"));
    }

    #[test]
    fn register_on_clone_leaves_default_untouched() {
        struct Touched;
        impl Function for Touched {
            fn name(&self) -> &'static str {
                "touched"
            }
            fn arity(&self) -> RangeInclusive<usize> {
                0..=0
            }
            fn call(&self, _args: &[Value]) -> Result<Value> {
                Ok(json!(true))
            }
        }
        let mut local = Registry::default_global();
        local.register(Touched);
        assert!(local.get("touched").is_some());
        assert!(Registry::default_global().get("touched").is_none());
    }

    #[test]
    fn global_registration_reaches_later_snapshots() {
        struct Triple;
        impl Function for Triple {
            fn name(&self) -> &'static str {
                "triple"
            }
            fn arity(&self) -> RangeInclusive<usize> {
                1..=1
            }
            fn call(&self, args: &[Value]) -> Result<Value> {
                let n = number(arg(args, 0, "triple")?, "triple")?;
                Ok(number_value(n * 3.0))
            }
        }
        let before = Registry::default_global();
        register_global(Triple);
        assert!(before.get("triple").is_none());
        let after = Registry::default_global();
        let triple = after.get("triple").unwrap();
        assert_eq!(triple.call(&[json!(7)]).unwrap(), json!(21));
    }

    #[test]
    fn non_numeric_argument_is_invalid() {
        let registry = Registry::with_builtins();
        let sum = registry.get("sum").unwrap();
        let err = sum.call(&[json!(1), json!("x")]).unwrap_err();
        assert!(matches!(err, CalcError::InvalidArgument(_)));
    }

    #[test]
    fn round_to_places() {
        let registry = Registry::with_builtins();
        let round = registry.get("round").unwrap();
        assert_eq!(
            round.call(&[json!(3.14159), json!(2)]).unwrap(),
            json!(3.14)
        );
        assert_eq!(round.call(&[json!(2.5)]).unwrap(), json!(3));
    }
}
