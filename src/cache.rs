//! Memoization of parsed expressions by their literal text.

use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

use regex::Regex;
use tracing::debug;

use crate::ast::{self, Ast, ParseOptions};
use crate::errors::{CalcError, Result};

// Process-wide default, off unless enabled; per-cache bypass can only
// further disable.
static CACHE_ENABLED: AtomicBool = AtomicBool::new(false);

/// Toggle the process-wide caching default. Returns the previous setting.
pub fn set_cache_enabled(enabled: bool) -> bool {
    CACHE_ENABLED.swap(enabled, Ordering::SeqCst)
}

pub fn cache_enabled() -> bool {
    CACHE_ENABLED.load(Ordering::SeqCst)
}

/// Which cache entries `invalidate` removes.
#[derive(Debug, Clone)]
pub enum CachePattern {
    /// Every entry.
    All,
    /// Exactly one entry, by literal expression text.
    Exact(String),
    /// Every entry whose text matches.
    Matching(Regex),
}

impl CachePattern {
    pub fn exact(text: impl Into<String>) -> Self {
        CachePattern::Exact(text.into())
    }

    /// Compile a regex pattern; an invalid pattern fails with
    /// InvalidArgument and touches nothing.
    pub fn matching(pattern: &str) -> Result<Self> {
        let re = Regex::new(pattern).map_err(|e| {
            CalcError::InvalidArgument(format!("bad cache pattern `{pattern}`: {e}"))
        })?;
        Ok(CachePattern::Matching(re))
    }
}

/// Expression text → parsed node. Entries may be pre-seeded at
/// construction; pre-seeded entries are served even while caching is
/// disabled, since only insertion is gated.
pub struct AstCache {
    entries: HashMap<String, Rc<Ast>>,
    bypass: Rc<Cell<bool>>,
}

impl AstCache {
    pub fn new() -> Self {
        Self::with_seed(Vec::new())
    }

    pub fn with_seed(seed: Vec<(String, Rc<Ast>)>) -> Self {
        Self {
            entries: seed.into_iter().collect(),
            bypass: Rc::new(Cell::new(false)),
        }
    }

    /// Exact-text hit, or parse on miss. The freshly parsed node is
    /// inserted only while caching is in effect.
    pub fn resolve(&mut self, text: &str, opts: &ParseOptions<'_>) -> Result<Rc<Ast>> {
        if let Some(node) = self.entries.get(text) {
            return Ok(Rc::clone(node));
        }
        debug!(expression = text, "ast cache miss; parsing");
        let node = Rc::new(ast::parse(text, opts)?);
        if cache_enabled() && !self.bypass.get() {
            self.entries.insert(text.to_string(), Rc::clone(&node));
        }
        Ok(node)
    }

    pub fn invalidate(&mut self, pattern: &CachePattern) {
        match pattern {
            CachePattern::All => {
                debug!("clearing ast cache");
                self.entries.clear();
            }
            CachePattern::Exact(text) => {
                self.entries.remove(text);
            }
            CachePattern::Matching(re) => {
                self.entries.retain(|text, _| !re.is_match(text));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn bypass_handle(&self) -> Rc<Cell<bool>> {
        Rc::clone(&self.bypass)
    }
}

impl Default for AstCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Forces caching off for as long as it lives; dropping it puts the
/// previous setting back on every exit path, panics included.
pub(crate) struct BypassGuard {
    flag: Rc<Cell<bool>>,
    previous: bool,
}

impl BypassGuard {
    pub(crate) fn engage(flag: Rc<Cell<bool>>) -> Self {
        let previous = flag.replace(true);
        Self { flag, previous }
    }
}

impl Drop for BypassGuard {
    fn drop(&mut self) {
        self.flag.set(self.previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::Registry;
    use std::collections::HashMap as StdHashMap;

    fn resolve(cache: &mut AstCache, text: &str) -> Rc<Ast> {
        let aliases = StdHashMap::new();
        let registry = Registry::with_builtins();
        let opts = ParseOptions {
            case_sensitive: false,
            aliases: &aliases,
            registry: &registry,
        };
        cache.resolve(text, &opts).unwrap()
    }

    #[test]
    fn preseeded_entries_hit_without_parsing() {
        let mut cache = AstCache::new();
        let seeded = resolve(&mut cache, "1 + 1");
        let mut cache = AstCache::with_seed(vec![("anything".into(), Rc::clone(&seeded))]);
        // "anything" is not parseable; a hit is the only way this resolves.
        let out = resolve(&mut cache, "anything");
        assert!(Rc::ptr_eq(&seeded, &out));
    }

    #[test]
    fn exact_invalidation_removes_one_entry() {
        let node = {
            let mut scratch = AstCache::new();
            resolve(&mut scratch, "1 + 1")
        };
        let mut cache = AstCache::with_seed(vec![
            ("a".into(), Rc::clone(&node)),
            ("b".into(), Rc::clone(&node)),
        ]);
        cache.invalidate(&CachePattern::exact("a"));
        assert_eq!(cache.len(), 1);
        cache.invalidate(&CachePattern::exact("missing"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn matching_invalidation_removes_by_pattern() {
        let node = {
            let mut scratch = AstCache::new();
            resolve(&mut scratch, "1 + 1")
        };
        let mut cache = AstCache::with_seed(vec![
            ("price * 2".into(), Rc::clone(&node)),
            ("price * 3".into(), Rc::clone(&node)),
            ("qty + 1".into(), Rc::clone(&node)),
        ]);
        cache.invalidate(&CachePattern::matching("^price").unwrap());
        assert_eq!(cache.len(), 1);
        cache.invalidate(&CachePattern::All);
        assert!(cache.is_empty());
    }

    #[test]
    fn bad_pattern_is_invalid_argument() {
        assert!(matches!(
            CachePattern::matching("("),
            Err(CalcError::InvalidArgument(_))
        ));
    }
}
