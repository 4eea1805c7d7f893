//! The symbol grammar shared by formulas, models and reports.
//!
//! Every component exchanges propositional formulas as plain strings; this
//! module is the single place that knows what counts as a symbol inside such
//! a string and how the special namespaces are told apart:
//!
//! - block symbols `B<n>` stand for "block n is compiled",
//! - file symbols `FILE_<normalized-path>` stand for "file is built",
//! - `__FREE__<n>` are unconstrained stand-ins for expressions the
//!   propositional fragment cannot express,
//! - `CONFIG_CVALUE_<n>` name constant values compared against options.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

/// Prefix of per-file inference variables.
pub const FILE_VAR_PREFIX: &str = "FILE_";
/// Prefix of unconstrained placeholder symbols.
pub const FREE_PREFIX: &str = "__FREE__";
/// Prefix of constant-value symbols.
pub const CVALUE_PREFIX: &str = "CONFIG_CVALUE_";

fn block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^B\d+$").unwrap())
}

/// `B0`, `B17`, and the synthetic file root `B00`.
pub fn is_block_symbol(name: &str) -> bool {
    block_regex().is_match(name)
}

pub fn is_file_symbol(name: &str) -> bool {
    name.starts_with(FILE_VAR_PREFIX)
}

pub fn is_free_symbol(name: &str) -> bool {
    name.starts_with(FREE_PREFIX)
}

pub fn is_cvalue_symbol(name: &str) -> bool {
    name.starts_with(CVALUE_PREFIX)
}

/// A name a C preprocessor would accept as a macro identifier.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Extract all symbol names referenced in a formula string.
///
/// The tokenizer splits on boolean operators, parentheses and whitespace; a
/// symbol is a maximal word of identifier characters (plus `.`, which marks
/// in-file macro replacements) that does not start with a digit. Bare
/// numbers, in particular the constants `0` and `1`, are not symbols.
///
/// ```
/// use coroner::symbol::items_of_string;
///
/// let items = items_of_string("( B1 <-> ( CONFIG_FOO && ! FOO. ) ) && 1");
/// assert!(items.contains("B1"));
/// assert!(items.contains("CONFIG_FOO"));
/// assert!(items.contains("FOO."));
/// assert_eq!(items.len(), 3);
/// ```
pub fn items_of_string(formula: &str) -> BTreeSet<String> {
    let mut items = BTreeSet::new();
    let mut word = String::new();
    for c in formula.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
            word.push(c);
        } else if !word.is_empty() {
            push_word(&mut items, &mut word);
        }
    }
    if !word.is_empty() {
        push_word(&mut items, &mut word);
    }
    items
}

fn push_word(items: &mut BTreeSet<String>, word: &mut String) {
    let first = word.chars().next().unwrap();
    if first.is_ascii_alphabetic() || first == '_' {
        items.insert(std::mem::take(word));
    } else {
        word.clear();
    }
}

/// Turn a path into the suffix of its `FILE_` variable: every `/` and `-`
/// becomes `_`, everything else (including dots) is kept.
pub fn normalize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| if c == '/' || c == '-' { '_' } else { c })
        .collect()
}

/// The inference variable identifying a source file.
pub fn file_var(filename: &str) -> String {
    format!("{}{}", FILE_VAR_PREFIX, normalize_filename(filename))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_symbols() {
        assert!(is_block_symbol("B0"));
        assert!(is_block_symbol("B00"));
        assert!(is_block_symbol("B42"));
        assert!(!is_block_symbol("B"));
        assert!(!is_block_symbol("B1x"));
        assert!(!is_block_symbol("CONFIG_B1"));
    }

    #[test]
    fn extraction_skips_numbers_and_operators() {
        let items = items_of_string("(A -> (B || !C)) && 0 && 1 && 42");
        assert_eq!(
            items.into_iter().collect::<Vec<_>>(),
            vec!["A".to_string(), "B".to_string(), "C".to_string()]
        );
    }

    #[test]
    fn extraction_keeps_dotted_replacements() {
        let items = items_of_string("FOO. && CONFIG_X");
        assert!(items.contains("FOO."));
        assert!(items.contains("CONFIG_X"));
    }

    #[test]
    fn extraction_of_empty_formula() {
        assert!(items_of_string("").is_empty());
        assert!(items_of_string("( ) && ||").is_empty());
    }

    #[test]
    fn filename_normalization() {
        assert_eq!(normalize_filename("kernel/sched-fair.c"), "kernel_sched_fair.c");
        assert_eq!(file_var("mus_test.c"), "FILE_mus_test.c");
    }

    #[test]
    fn identifier_validity() {
        assert!(is_valid_identifier("_FOO_1"));
        assert!(!is_valid_identifier("1FOO"));
        assert!(!is_valid_identifier("FOO."));
        assert!(!is_valid_identifier(""));
    }
}
