//! Shared leaf utilities: the wildcard trie, the id pool, statistics
//! helpers and the single-pattern wildcard match.

pub mod idpool;
pub mod stats;
pub mod trie;

/// Test a dot-segmented wildcard pattern against a concrete name.
///
/// A `*` segment matches exactly one name segment; segment counts must
/// agree. This is the same dialect the rule trie speaks, used for the
/// flat pattern lists in configuration (blacklists, fill-zero lists,
/// default threshold tables).
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let mut ps = pattern.split(trie::DELIM);
    let mut ns = name.split(trie::DELIM);
    loop {
        match (ps.next(), ns.next()) {
            (Some(p), Some(n)) => {
                if p != trie::WILDCARD && p != n {
                    return false;
                }
            }
            (None, None) => return true,
            _ => return false,
        }
    }
}
