//! Shared `find` semantics (spec §4.2): substring containment, not equality,
//! scanned front-to-back. Every backend's `find` delegates the "does this
//! body match" decision here so the containment rule can't drift between
//! implementations.

/// Mirrors Go's `bytes.Contains`: true if `needle` occurs anywhere in
/// `haystack`, including the case of an empty `needle` (which always
/// matches, same as `bytes.Contains(b, [])`).
pub fn body_matches(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack
        .windows(needle.len())
        .any(|window| window == needle)
}
