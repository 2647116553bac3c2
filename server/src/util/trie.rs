//! Segmented wildcard trie.
//!
//! Keys are dot-separated strings; a `*` segment matches exactly one
//! segment. The trie answers both directions of the wildcard question:
//! [`Trie::match_pattern`] expands a pattern to the stored keys it covers,
//! [`Trie::matched`] finds the stored patterns covering a concrete name.
//!
//! One coarse reader/writer lock guards the whole tree: reads run in
//! parallel, writes are exclusive.

use std::collections::HashMap;
use std::sync::RwLock;

/// The wildcard segment.
pub const WILDCARD: &str = "*";

/// Key segment delimiter.
pub const DELIM: char = '.';

struct Node<T> {
    value: Option<T>,
    children: HashMap<String, Node<T>>,
}

impl<T> Node<T> {
    fn new() -> Self {
        Self {
            value: None,
            children: HashMap::new(),
        }
    }
}

struct Inner<T> {
    root: Node<T>,
    len: usize,
}

/// A concurrent trie over dot-segmented keys.
pub struct Trie<T> {
    inner: RwLock<Inner<T>>,
}

impl<T: Clone> Default for Trie<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Trie<T> {
    /// Create an empty trie.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                root: Node::new(),
                len: 0,
            }),
        }
    }

    /// Number of keys stored.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len
    }

    /// Returns true if no key is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a key, returning the previously stored value if any.
    pub fn put(&self, key: &str, value: T) -> Option<T> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let mut node = &mut inner.root;
        for part in key.split(DELIM) {
            node = node.children.entry(part.to_owned()).or_insert_with(Node::new);
        }
        let old = node.value.replace(value);
        if old.is_none() {
            inner.len += 1;
        }
        old
    }

    /// Look up an exact key.
    pub fn get(&self, key: &str) -> Option<T> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut node = &inner.root;
        for part in key.split(DELIM) {
            node = node.children.get(part)?;
        }
        node.value.clone()
    }

    /// Returns true if an exact key is stored.
    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Remove a key, returning its value. Empty branches are pruned.
    pub fn pop(&self, key: &str) -> Option<T> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let parts: Vec<&str> = key.split(DELIM).collect();
        let popped = pop_rec(&mut inner.root, &parts);
        if popped.is_some() {
            inner.len -= 1;
        }
        popped
    }

    /// Drop every key.
    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.root.children.clear();
        inner.root.value = None;
        inner.len = 0;
    }

    /// All stored keys matching a wildcard pattern, with their values.
    ///
    /// A `*` in the pattern expands to every child at that level.
    pub fn match_pattern(&self, pattern: &str) -> Vec<(String, T)> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let parts: Vec<&str> = pattern.split(DELIM).collect();
        let mut out = Vec::new();
        let mut keys = Vec::new();
        match_rec(&inner.root, &parts, &mut keys, &mut out);
        out
    }

    /// Values of all stored patterns that match a concrete name.
    ///
    /// Descends the literal edge and the `*` edge at every level and
    /// collects terminals reached at full depth.
    pub fn matched(&self, name: &str) -> Vec<T> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let parts: Vec<&str> = name.split(DELIM).collect();
        let mut out = Vec::new();
        matched_rec(&inner.root, &parts, &mut out);
        out
    }

    /// Dump every `(key, value)` pair.
    pub fn entries(&self) -> Vec<(String, T)> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut out = Vec::new();
        let mut keys = Vec::new();
        entries_rec(&inner.root, &mut keys, &mut out);
        out
    }
}

fn pop_rec<T>(node: &mut Node<T>, parts: &[&str]) -> Option<T> {
    let (first, rest) = parts.split_first()?;
    let child = node.children.get_mut(*first)?;
    let value = if rest.is_empty() {
        child.value.take()
    } else {
        pop_rec(child, rest)
    };
    if child.value.is_none() && child.children.is_empty() {
        node.children.remove(*first);
    }
    value
}

fn match_rec<T: Clone>(
    node: &Node<T>,
    parts: &[&str],
    keys: &mut Vec<String>,
    out: &mut Vec<(String, T)>,
) {
    let Some((first, rest)) = parts.split_first() else {
        if let Some(value) = &node.value {
            out.push((keys.join("."), value.clone()));
        }
        return;
    };
    if *first == WILDCARD {
        for (segment, child) in &node.children {
            keys.push(segment.clone());
            match_rec(child, rest, keys, out);
            keys.pop();
        }
    } else if let Some(child) = node.children.get(*first) {
        keys.push((*first).to_owned());
        match_rec(child, rest, keys, out);
        keys.pop();
    }
}

fn matched_rec<T: Clone>(node: &Node<T>, parts: &[&str], out: &mut Vec<T>) {
    let Some((first, rest)) = parts.split_first() else {
        if let Some(value) = &node.value {
            out.push(value.clone());
        }
        return;
    };
    if let Some(child) = node.children.get(*first) {
        matched_rec(child, rest, out);
    }
    if *first != WILDCARD {
        if let Some(child) = node.children.get(WILDCARD) {
            matched_rec(child, rest, out);
        }
    }
}

fn entries_rec<T: Clone>(node: &Node<T>, keys: &mut Vec<String>, out: &mut Vec<(String, T)>) {
    if let Some(value) = &node.value {
        out.push((keys.join("."), value.clone()));
    }
    for (segment, child) in &node.children {
        keys.push(segment.clone());
        entries_rec(child, keys, out);
        keys.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_pop() {
        let trie = Trie::new();
        assert_eq!(trie.put("a.b.c", 1), None);
        assert_eq!(trie.put("a.b.c", 2), Some(1));
        assert_eq!(trie.len(), 1);
        assert_eq!(trie.get("a.b.c"), Some(2));
        assert_eq!(trie.get("a.b"), None);
        assert!(trie.has("a.b.c"));
        assert_eq!(trie.pop("a.b.c"), Some(2));
        assert_eq!(trie.pop("a.b.c"), None);
        assert_eq!(trie.len(), 0);
    }

    #[test]
    fn test_pop_prunes_empty_branches() {
        let trie = Trie::new();
        trie.put("a.b.c", 1);
        trie.put("a.b", 2);
        trie.pop("a.b.c");
        assert_eq!(trie.get("a.b"), Some(2));
        assert_eq!(trie.len(), 1);
    }

    #[test]
    fn test_match_pattern() {
        let trie = Trie::new();
        trie.put("a.b.c.d", 1);
        trie.put("a.x.c.d", 2);
        trie.put("a.b.c.e", 3);
        let mut keys: Vec<String> = trie
            .match_pattern("a.*.c.d")
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["a.b.c.d".to_owned(), "a.x.c.d".to_owned()]);
        assert!(trie.match_pattern("a.*.c.x").is_empty());
    }

    #[test]
    fn test_matched() {
        let trie = Trie::new();
        trie.put("a.*.c.d", 1);
        trie.put("a.b.*.d", 2);
        trie.put("a.b.c.x", 3);
        let mut values = trie.matched("a.b.c.d");
        values.sort_unstable();
        assert_eq!(values, vec![1, 2]);
        assert!(trie.matched("a.b.c").is_empty());
        assert!(trie.matched("z.b.c.d").is_empty());
    }

    #[test]
    fn test_matched_agrees_with_brute_force() {
        let patterns = [
            "a.b.c", "a.*.c", "*.b.c", "a.b.*", "*.*.c", "a.*.*", "*.*.*", "a.b", "a.b.c.d",
        ];
        let names = ["a.b.c", "x.b.c", "a.y.c", "a.b.z", "a.b", "a.b.c.d"];
        let trie = Trie::new();
        for p in &patterns {
            trie.put(p, (*p).to_owned());
        }
        let brute = |name: &str| -> Vec<String> {
            let mut hits: Vec<String> = patterns
                .iter()
                .filter(|p| {
                    let ps: Vec<&str> = p.split('.').collect();
                    let ns: Vec<&str> = name.split('.').collect();
                    ps.len() == ns.len()
                        && ps.iter().zip(&ns).all(|(a, b)| *a == "*" || a == b)
                })
                .map(|p| (*p).to_owned())
                .collect();
            hits.sort();
            hits
        };
        for name in &names {
            let mut got = trie.matched(name);
            got.sort();
            assert_eq!(got, brute(name), "name {name}");
        }
    }

    #[test]
    fn test_entries_and_clear() {
        let trie = Trie::new();
        trie.put("a.b", 1);
        trie.put("c", 2);
        let mut entries = trie.entries();
        entries.sort();
        assert_eq!(entries, vec![("a.b".to_owned(), 1), ("c".to_owned(), 2)]);
        trie.clear();
        assert!(trie.is_empty());
    }
}
