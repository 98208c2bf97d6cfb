//! A formula calculator: bind named data, evaluate expressions against it.
//!
//! ```ignore
//! use formula_calc::Calculator;
//! use serde_json::json;
//!
//! let mut calc = Calculator::new();
//! let total = calc.evaluate_strict("price * (1 + vat)", &json!({
//!     "price": 100,
//!     "vat": 0.2,
//! }))?;
//! ```
//!
//! Bind data may be arbitrarily nested; nested levels flatten into dotted
//! names (`{"order": {"total": 5}}` binds `order.total`). Bindings made for
//! one evaluation are rolled back when it finishes, parsed expressions are
//! cached by their text, and functions dispatch through a pluggable
//! registry.

pub mod ast;
pub mod cache;
pub mod comparison;
pub mod errors;
pub mod flat;
pub mod functions;
pub mod memory;
pub mod parser;
pub mod solver;

use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;
use tracing::debug;

use ast::{Ast, ParseOptions};
use cache::{AstCache, BypassGuard, CachePattern};
use errors::{CalcError, Result};
use functions::{Function, Registry};
use memory::Memory;

pub use functions::register_global;
pub use solver::BulkSolver;

/// Input to evaluation: literal text (cached/parsed lazily) or an
/// already-resolved node (used as-is).
#[derive(Debug, Clone)]
pub enum Expression {
    Text(String),
    Node(Rc<Ast>),
}

impl From<&str> for Expression {
    fn from(text: &str) -> Self {
        Expression::Text(text.to_string())
    }
}

impl From<String> for Expression {
    fn from(text: String) -> Self {
        Expression::Text(text)
    }
}

impl From<Rc<Ast>> for Expression {
    fn from(node: Rc<Ast>) -> Self {
        Expression::Node(node)
    }
}

/// Construction-time configuration.
#[derive(Clone)]
pub struct CalcOptions {
    pub case_sensitive: bool,
    /// Assume bind data carries no nested structures (skips flattening).
    pub ignore_nested: bool,
    /// Alias → canonical function name.
    pub aliases: HashMap<String, String>,
    /// Entries to pre-seed the AST cache with.
    pub cache_seed: Vec<(String, Rc<Ast>)>,
    pub registry: Registry,
}

impl Default for CalcOptions {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            ignore_nested: false,
            aliases: HashMap::new(),
            cache_seed: Vec::new(),
            registry: Registry::default_global(),
        }
    }
}

pub struct Calculator {
    memory: Memory,
    cache: AstCache,
    registry: Registry,
    aliases: HashMap<String, String>,
    case_sensitive: bool,
    ignore_nested: bool,
}

impl Calculator {
    pub fn new() -> Self {
        Self::with_options(CalcOptions::default())
    }

    pub fn with_options(options: CalcOptions) -> Self {
        Self {
            memory: Memory::new(options.case_sensitive),
            cache: AstCache::with_seed(options.cache_seed),
            registry: options.registry,
            aliases: options.aliases,
            case_sensitive: options.case_sensitive,
            ignore_nested: options.ignore_nested,
        }
    }

    /// Register a function on this calculator only.
    pub fn add_function<F: Function + 'static>(&mut self, f: F) -> &mut Self {
        self.registry.register(f);
        self
    }

    /// Evaluate, propagating every failure.
    ///
    /// Opens a binding scope over the flattened `data`, resolves the
    /// expression through the cache, verifies every free variable is bound
    /// and delegates to the node. The scope closes on every exit path, so
    /// a failed evaluation leaves no residual bindings.
    pub fn evaluate_strict(
        &mut self,
        expression: impl Into<Expression>,
        data: &Value,
    ) -> Result<Value> {
        let expression = expression.into();
        self.store_scoped(data, |calc| {
            let node = calc.resolve_expression(&expression)?;
            let unbound = node.dependencies(&calc.memory);
            if !unbound.is_empty() {
                let mut names = unbound;
                names.sort();
                names.dedup();
                return Err(CalcError::UnboundVariable { names });
            }
            node.value(&calc.memory)
        })
    }

    /// Evaluate, swallowing {UnboundVariable, InvalidArgument} failures:
    /// `Ok(None)` means the failure was discarded and no result exists for
    /// this expression. Other failure kinds still propagate.
    pub fn evaluate(
        &mut self,
        expression: impl Into<Expression>,
        data: &Value,
    ) -> Result<Option<Value>> {
        match self.evaluate_strict(expression, data) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_recoverable() => {
                debug!(error = %err, "discarding recoverable evaluation failure");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Like `evaluate`, but a swallowed failure is handed to `handler`,
    /// whose return value stands in as the result.
    pub fn evaluate_with(
        &mut self,
        expression: impl Into<Expression>,
        data: &Value,
        handler: impl FnOnce(&Expression, &CalcError) -> Value,
    ) -> Result<Option<Value>> {
        let expression = expression.into();
        match self.evaluate_strict(expression.clone(), data) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_recoverable() => Ok(Some(handler(&expression, &err))),
            Err(err) => Err(err),
        }
    }

    /// Evaluate each expression independently against the same `data`,
    /// non-strictly; order is preserved and nothing is deduplicated.
    pub fn evaluate_each(
        &mut self,
        expressions: &[Expression],
        data: &Value,
    ) -> Result<Vec<Option<Value>>> {
        expressions
            .iter()
            .map(|e| self.evaluate(e.clone(), data))
            .collect()
    }

    /// `evaluate_each` with a failure handler applied per element.
    pub fn evaluate_each_with(
        &mut self,
        expressions: &[Expression],
        data: &Value,
        mut handler: impl FnMut(&Expression, &CalcError) -> Value,
    ) -> Result<Vec<Option<Value>>> {
        expressions
            .iter()
            .map(|e| self.evaluate_with(e.clone(), data, &mut handler))
            .collect()
    }

    /// The names `expression` still needs before it can evaluate. A name
    /// bound to a formula stands in for that formula's own unbound inputs,
    /// so the result is directly usable for ordering bulk solves.
    pub fn dependencies(&mut self, expression: impl Into<Expression>) -> Result<Vec<String>> {
        let expression = expression.into();
        let node = self.resolve_expression(&expression)?;
        Ok(node.dependencies(&self.memory))
    }

    /// Concatenated dependencies of a sequence, order preserved; a name
    /// needed by several expressions appears once per expression.
    pub fn dependencies_each(&mut self, expressions: &[Expression]) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for expression in expressions {
            out.extend(self.dependencies(expression.clone())?);
        }
        Ok(out)
    }

    /// Resolve to an AST node: exact-text cache hit, parse on miss, or the
    /// node itself if one was passed.
    pub fn resolve(&mut self, expression: impl Into<Expression>) -> Result<Rc<Ast>> {
        let expression = expression.into();
        self.resolve_expression(&expression)
    }

    fn resolve_expression(&mut self, expression: &Expression) -> Result<Rc<Ast>> {
        match expression {
            Expression::Node(node) => Ok(Rc::clone(node)),
            Expression::Text(text) => {
                let Calculator {
                    cache,
                    registry,
                    aliases,
                    case_sensitive,
                    ..
                } = self;
                let opts = ParseOptions {
                    case_sensitive: *case_sensitive,
                    aliases: &*aliases,
                    registry: &*registry,
                };
                cache.resolve(text, &opts)
            }
        }
    }

    /// Merge flattened `data` into the bindings permanently.
    pub fn store(&mut self, data: &Value) -> &mut Self {
        self.memory.store(data, self.ignore_nested);
        self
    }

    /// Bind one name permanently.
    pub fn store_value(&mut self, name: &str, value: Value) -> &mut Self {
        self.memory.store_value(name, value);
        self
    }

    /// Bind `name` to the parsed formula itself; expressions may then
    /// reference `name` as a sub-expression, re-evaluated on each use.
    pub fn store_formula(&mut self, name: &str, formula: &str) -> Result<&mut Self> {
        let node = self.resolve(formula)?;
        self.memory.store_formula(name, node);
        Ok(self)
    }

    /// Run `body` with `data` bound, then restore the bindings that were
    /// in effect before this call, whether `body` returned or failed.
    pub fn store_scoped<T>(
        &mut self,
        data: &Value,
        body: impl FnOnce(&mut Calculator) -> Result<T>,
    ) -> Result<T> {
        let ignore_nested = self.ignore_nested;
        let mut guard = BindScope::new(self);
        guard.calculator().memory.store(data, ignore_nested);
        body(guard.calculator())
    }

    /// Force caching off for the duration of `scope`; the previous setting
    /// comes back afterwards regardless of what `scope` did.
    pub fn with_cache_disabled<T>(&mut self, scope: impl FnOnce(&mut Calculator) -> T) -> T {
        let _guard = BypassGuard::engage(self.cache.bypass_handle());
        scope(self)
    }

    pub fn invalidate_cache(&mut self, pattern: &CachePattern) {
        self.cache.invalidate(pattern);
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Drop every binding.
    pub fn clear(&mut self) {
        self.memory.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }
}

impl Default for Calculator {
    fn default() -> Self {
        Self::new()
    }
}

/// Binding snapshot for one scoped call; dropping it restores the
/// calculator's bindings to the snapshot.
struct BindScope<'a> {
    calculator: &'a mut Calculator,
    snapshot: HashMap<String, memory::Binding>,
}

impl<'a> BindScope<'a> {
    fn new(calculator: &'a mut Calculator) -> Self {
        let snapshot = calculator.memory.snapshot();
        Self {
            calculator,
            snapshot,
        }
    }

    fn calculator(&mut self) -> &mut Calculator {
        self.calculator
    }
}

impl Drop for BindScope<'_> {
    fn drop(&mut self) {
        self.calculator
            .memory
            .restore(std::mem::take(&mut self.snapshot));
    }
}
