//! The binding store: a name → value map with case folding and
//! transactional scoping.

use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;

use crate::ast::Ast;
use crate::errors::Result;
use crate::flat::{self, Node};

/// What a name can be bound to: a plain value, or a formula node stored by
/// `store_formula` and evaluated on reference.
#[derive(Debug, Clone)]
pub enum Binding {
    Value(Value),
    Formula(Rc<Ast>),
}

/// Mutable variable bindings for one calculator instance.
///
/// Case sensitivity is fixed at construction; folding is applied to every
/// key at insertion and at lookup, so keys stay unique under one
/// normalization.
#[derive(Debug, Clone)]
pub struct Memory {
    bindings: HashMap<String, Binding>,
    case_sensitive: bool,
}

impl Memory {
    pub fn new(case_sensitive: bool) -> Self {
        Self {
            bindings: HashMap::new(),
            case_sensitive,
        }
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    fn fold(&self, name: &str) -> String {
        if self.case_sensitive {
            name.to_string()
        } else {
            name.to_lowercase()
        }
    }

    /// Bulk mode: flatten `data` per the `ignore_nested` policy and merge
    /// every resulting binding, overwriting same-named entries. Non-object
    /// data contributes nothing.
    pub fn store(&mut self, data: &Value, ignore_nested: bool) -> &mut Self {
        if let Value::Object(map) = data {
            if ignore_nested {
                for (key, value) in map {
                    self.store_value(key, value.clone());
                }
            } else {
                let nested = flat::from_object(map);
                for (key, node) in flat::flatten(&nested, false) {
                    self.store_value(key.as_str(), node.to_value());
                }
            }
        }
        self
    }

    /// Single mode: bind one case-folded name.
    pub fn store_value(&mut self, name: &str, value: Value) -> &mut Self {
        self.bindings.insert(self.fold(name), Binding::Value(value));
        self
    }

    /// Bind a name to a formula node; referencing the name evaluates the
    /// node against the bindings in effect at that point.
    pub fn store_formula(&mut self, name: &str, node: Rc<Ast>) -> &mut Self {
        self.bindings.insert(self.fold(name), Binding::Formula(node));
        self
    }

    /// Run `body` with whatever bindings it establishes, then restore the
    /// store to its state from just before this call, on success, failure
    /// and panic alike. Failures re-propagate after the restore.
    pub fn scoped<T>(&mut self, body: impl FnOnce(&mut Memory) -> Result<T>) -> Result<T> {
        let mut guard = ScopeGuard::new(self);
        body(guard.memory())
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(&self.fold(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(&self.fold(name))
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub(crate) fn snapshot(&self) -> HashMap<String, Binding> {
        self.bindings.clone()
    }

    pub(crate) fn restore(&mut self, snapshot: HashMap<String, Binding>) {
        self.bindings = snapshot;
    }
}

/// Snapshot-on-entry guard; its drop puts the snapshot back, which makes
/// nested scopes restore in strict reverse order of entry.
struct ScopeGuard<'a> {
    memory: &'a mut Memory,
    snapshot: HashMap<String, Binding>,
}

impl<'a> ScopeGuard<'a> {
    fn new(memory: &'a mut Memory) -> Self {
        let snapshot = memory.snapshot();
        Self { memory, snapshot }
    }

    fn memory(&mut self) -> &mut Memory {
        self.memory
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.memory.restore(std::mem::take(&mut self.snapshot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CalcError;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn value_of(memory: &Memory, name: &str) -> Option<Value> {
        match memory.get(name) {
            Some(Binding::Value(v)) => Some(v.clone()),
            _ => None,
        }
    }

    #[test]
    fn bulk_store_flattens_nested_data() {
        let mut memory = Memory::new(false);
        memory.store(&json!({"x": {"y": 1, "z": 2}, "a": 3}), false);
        assert_eq!(value_of(&memory, "x.y"), Some(json!(1)));
        assert_eq!(value_of(&memory, "x.z"), Some(json!(2)));
        assert_eq!(value_of(&memory, "a"), Some(json!(3)));
        assert!(memory.get("x").is_none());
    }

    #[test]
    fn ignore_nested_stores_objects_verbatim() {
        let mut memory = Memory::new(false);
        memory.store(&json!({"x": {"y": 1}}), true);
        assert_eq!(value_of(&memory, "x"), Some(json!({"y": 1})));
    }

    #[test]
    fn case_folding_applies_at_insert_and_lookup() {
        let mut memory = Memory::new(false);
        memory.store_value("Total", json!(10));
        assert_eq!(value_of(&memory, "total"), Some(json!(10)));
        assert_eq!(value_of(&memory, "TOTAL"), Some(json!(10)));

        let mut sensitive = Memory::new(true);
        sensitive.store_value("Total", json!(10));
        assert!(sensitive.get("total").is_none());
        assert_eq!(value_of(&sensitive, "Total"), Some(json!(10)));
    }

    #[test]
    fn scoped_bindings_roll_back_on_success() {
        let mut memory = Memory::new(false);
        memory.store_value("a", json!(1));
        let out = memory
            .scoped(|m| {
                m.store_value("a", json!(2)).store_value("b", json!(3));
                Ok(value_of(m, "a"))
            })
            .unwrap();
        assert_eq!(out, Some(json!(2)));
        assert_eq!(value_of(&memory, "a"), Some(json!(1)));
        assert!(memory.get("b").is_none());
    }

    #[test]
    fn scoped_bindings_roll_back_on_failure() {
        let mut memory = Memory::new(false);
        memory.store_value("a", json!(1));
        let err = memory
            .scoped(|m| -> Result<()> {
                m.store_value("a", json!(2));
                Err(CalcError::Evaluation("boom".into()))
            })
            .unwrap_err();
        assert!(matches!(err, CalcError::Evaluation(_)));
        assert_eq!(value_of(&memory, "a"), Some(json!(1)));
    }

    #[test]
    fn scopes_nest_without_clobbering() {
        let mut memory = Memory::new(false);
        memory
            .scoped(|outer| {
                outer.store_value("x", json!(1));
                outer.scoped(|inner| {
                    inner.store_value("x", json!(2)).store_value("y", json!(3));
                    Ok(())
                })?;
                assert_eq!(value_of(outer, "x"), Some(json!(1)));
                assert!(outer.get("y").is_none());
                Ok(())
            })
            .unwrap();
        assert!(memory.is_empty());
    }

    #[test]
    fn clear_and_is_empty() {
        let mut memory = Memory::new(false);
        assert!(memory.is_empty());
        memory.store_value("a", json!(1));
        assert!(!memory.is_empty());
        memory.clear();
        assert!(memory.is_empty());
    }
}
