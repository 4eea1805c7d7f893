//! Helpers for concatenating formula fragments with a separator.
//!
//! The defect analysis passes propositional formulas around as strings, and
//! nearly every producer builds them as "join these clauses with `&&`".
//! [`StringJoiner`] collects fragments and joins them on demand, silently
//! dropping empty fragments so callers never have to special-case "nothing
//! to add". [`UniqueStringJoiner`] additionally deduplicates while keeping
//! the insertion order, which keeps the generated formulas readable and
//! stable.

use std::collections::HashSet;

/// Ordered collection of string fragments.
///
/// Empty fragments are ignored on insertion, so `join` never produces
/// separators around nothing.
#[derive(Debug, Default, Clone)]
pub struct StringJoiner {
    parts: Vec<String>,
}

impl StringJoiner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment. The empty string is dropped.
    pub fn push(&mut self, part: impl Into<String>) {
        let part = part.into();
        if !part.is_empty() {
            self.parts.push(part);
        }
    }

    /// Prepend a fragment. The empty string is dropped.
    pub fn push_front(&mut self, part: impl Into<String>) {
        let part = part.into();
        if !part.is_empty() {
            self.parts.insert(0, part);
        }
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn clear(&mut self) {
        self.parts.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(String::as_str)
    }

    /// Join all collected fragments, inserting `sep` between each pair.
    ///
    /// ```
    /// use coroner::joiner::StringJoiner;
    ///
    /// let mut sj = StringJoiner::new();
    /// sj.push("A");
    /// sj.push("");
    /// sj.push("B");
    /// assert_eq!(sj.join(" && "), "A && B");
    /// assert_eq!(StringJoiner::new().join(" && "), "");
    /// ```
    pub fn join(&self, sep: &str) -> String {
        self.parts.join(sep)
    }
}

/// A [`StringJoiner`] that keeps only the first occurrence of each fragment.
#[derive(Debug, Default)]
pub struct UniqueStringJoiner {
    inner: StringJoiner,
    seen: HashSet<String>,
}

impl UniqueStringJoiner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment unless an equal one was appended before.
    pub fn push(&mut self, part: impl Into<String>) {
        let part = part.into();
        if part.is_empty() || !self.seen.insert(part.clone()) {
            return;
        }
        self.inner.push(part);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn join(&self, sep: &str) -> String {
        self.inner.join(sep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_join_is_empty_string() {
        assert_eq!(StringJoiner::new().join(" && "), "");
    }

    #[test]
    fn empty_fragments_are_dropped() {
        let mut sj = StringJoiner::new();
        sj.push("");
        sj.push("A");
        sj.push("");
        sj.push("B");
        sj.push_front("");
        assert_eq!(sj.len(), 2);
        assert_eq!(sj.join(" || "), "A || B");
    }

    #[test]
    fn push_front_prepends() {
        let mut sj = StringJoiner::new();
        sj.push("B");
        sj.push_front("A");
        assert_eq!(sj.join("."), "A.B");
    }

    #[test]
    fn single_fragment_has_no_separator() {
        let mut sj = StringJoiner::new();
        sj.push("only");
        assert_eq!(sj.join(" && "), "only");
    }

    #[test]
    fn unique_keeps_first_occurrence() {
        let mut sj = UniqueStringJoiner::new();
        sj.push("A");
        sj.push("B");
        sj.push("A");
        sj.push("C");
        sj.push("B");
        assert_eq!(sj.join(" "), "A B C");
    }
}
