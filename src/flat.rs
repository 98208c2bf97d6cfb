//! Lossless transform between nested key-value structures and flat
//! dotted-path structures.
//!
//! A bind payload like `{x: {y: 1, z: 2}}` becomes `{x.y: 1, x.z: 2}` so
//! that formulas can reference `x.y` directly. `expand` is the inverse.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

pub const SEPARATOR: char = '.';

/// A structure key. The source data may use either plain text keys or an
/// interned/symbolic key form; the distinction is preserved through
/// flatten/expand rather than coerced away.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    Text(String),
    Symbol(String),
}

impl Key {
    pub fn text(s: impl Into<String>) -> Self {
        Key::Text(s.into())
    }

    pub fn symbol(s: impl Into<String>) -> Self {
        Key::Symbol(s.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Key::Text(s) | Key::Symbol(s) => s,
        }
    }

    /// Same representation, different text.
    fn with_text(&self, text: String) -> Key {
        match self {
            Key::Text(_) => Key::Text(text),
            Key::Symbol(_) => Key::Symbol(text),
        }
    }
}

/// A nested value: either a further level of keys or a leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Map(NestedMap),
    Leaf(Value),
}

pub type NestedMap = BTreeMap<Key, Node>;

impl Node {
    /// Convert a JSON value; objects become nested maps with text keys.
    pub fn from_value(value: &Value) -> Node {
        match value {
            Value::Object(map) => Node::Map(from_object(map)),
            other => Node::Leaf(other.clone()),
        }
    }

    /// Convert back to JSON; map levels become objects keyed by key text.
    pub fn to_value(&self) -> Value {
        match self {
            Node::Leaf(v) => v.clone(),
            Node::Map(map) => {
                let mut out = Map::new();
                for (key, node) in map {
                    out.insert(key.as_str().to_string(), node.to_value());
                }
                Value::Object(out)
            }
        }
    }
}

/// Convert a JSON object into a nested map with all-text keys.
pub fn from_object(map: &Map<String, Value>) -> NestedMap {
    map.iter()
        .map(|(k, v)| (Key::text(k.clone()), Node::from_value(v)))
        .collect()
}

/// Flatten nested levels into dotted-path keys.
///
/// With `ignore_nested` set the input is returned unchanged; the caller
/// guarantees no map values exist (a fast path for flat bind data).
/// Leaves are recorded under the path of keys joined with `.`; the joined
/// key takes the representation of its first segment. Single-segment paths
/// keep their key untouched. The input is not mutated.
pub fn flatten(nested: &NestedMap, ignore_nested: bool) -> NestedMap {
    if ignore_nested {
        return nested.clone();
    }
    let mut flat = NestedMap::new();
    for (key, node) in nested {
        descend(key, key, node, &mut Vec::new(), &mut flat);
    }
    flat
}

// `root` is the first-level key of this branch; it owns the representation
// of every flat key produced beneath it.
fn descend(root: &Key, key: &Key, node: &Node, path: &mut Vec<String>, out: &mut NestedMap) {
    match node {
        Node::Map(children) => {
            path.push(key.as_str().to_string());
            for (k, child) in children {
                descend(root, k, child, path, out);
            }
            path.pop();
        }
        Node::Leaf(value) => {
            let flat_key = if path.is_empty() {
                key.clone()
            } else {
                let mut joined = path.join(&SEPARATOR.to_string());
                joined.push(SEPARATOR);
                joined.push_str(key.as_str());
                root.with_text(joined)
            };
            out.insert(flat_key, Node::Leaf(value.clone()));
        }
    }
}

/// Inverse of `flatten`: split each key on `.`, creating intermediate map
/// levels for all but the last segment (with the flat key's representation
/// re-applied to every segment) and assigning the final segment as a leaf.
/// Conflicting assignments are last-write-wins; the structure is built
/// fresh, so no cycles can arise.
pub fn expand(flat: &NestedMap) -> NestedMap {
    let mut out = NestedMap::new();
    for (key, node) in flat {
        let segments: Vec<&str> = key.as_str().split(SEPARATOR).collect();
        // split() always yields at least one segment.
        let Some((last, levels)) = segments.split_last() else {
            continue;
        };
        let mut cursor = &mut out;
        for level in levels {
            let entry = cursor
                .entry(key.with_text(level.to_string()))
                .or_insert_with(|| Node::Map(NestedMap::new()));
            if !matches!(entry, Node::Map(_)) {
                *entry = Node::Map(NestedMap::new());
            }
            cursor = match entry {
                Node::Map(children) => children,
                Node::Leaf(_) => unreachable!(),
            };
        }
        cursor.insert(key.with_text(last.to_string()), node.clone());
    }
    out
}
