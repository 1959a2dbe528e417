//! Hierarchical capability patterns over worker identities.
//!
//! A pattern is either an exact identity (`mayor/`, `gastown/witness`), a
//! single-segment wildcard (`gastown/polecats/*`), or the bare `*`.

/// True if `caller` is covered by `pattern`.
///
/// A trailing `/*` matches exactly one further path segment, never a subtree.
pub fn matches(pattern: &str, caller: &str) -> bool {
    if pattern.is_empty() || caller.is_empty() {
        return false;
    }
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*')
        && prefix.ends_with('/')
    {
        return caller
            .strip_prefix(prefix)
            .is_some_and(|rest| !rest.contains('/'));
    }
    pattern == caller
}

/// Default-deny allow-list check: true iff some pattern covers the caller.
pub fn is_eligible_worker<S: AsRef<str>>(caller: &str, patterns: &[S]) -> bool {
    patterns.iter().any(|p| matches(p.as_ref(), caller))
}
