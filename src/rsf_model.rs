//! Textual configuration-model variant.
//!
//! Backed by a keyed-line `.model` file (option → implication formula, plus
//! meta entries) and an optional `.types` companion carrying the declared
//! option types. The intersect preprocessing closes the referenced symbols
//! transitively over the implication map and emits one `(X -> (phi))`
//! fragment per closed symbol.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, Result};
use crate::joiner::StringJoiner;
use crate::model::{
    ConfigurationModel, DEFAULT_SPACE_REGEX, INCOMPLETE_KEY, SPACE_REGEX_KEY,
};
use crate::rsf::{ItemReader, RsfReader};
use crate::symbol;

/// Extension of the companion type file.
pub const TYPES_EXTENSION: &str = "types";

fn item_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^CONFIG_([0-9A-Za-z_]+?)(_MODULE)?$").unwrap())
}

pub struct RsfModel {
    name: String,
    model: RsfReader,
    items: ItemReader,
    space_regex: Regex,
}

impl RsfModel {
    pub fn open(path: &Path) -> Result<Self> {
        let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("model").to_string();
        let model = RsfReader::open(path).map_err(|e| Error::Model {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let companion = path.with_extension(TYPES_EXTENSION);
        let items = match ItemReader::open(&companion) {
            Ok(items) => items,
            Err(_) => {
                log::warn!(
                    "couldn't open {}, checking symbol types will fail",
                    companion.display()
                );
                ItemReader::default()
            }
        };
        Self::from_parts(name, model, items)
    }

    /// Assemble a model from already-parsed readers.
    pub fn from_parts(name: String, model: RsfReader, items: ItemReader) -> Result<Self> {
        let space_regex = match model.meta_value(SPACE_REGEX_KEY) {
            Some(values) if !values.is_empty() => {
                log::info!("set configuration space regex to '{}'", values[0]);
                Regex::new(&values[0]).map_err(|e| Error::Model {
                    path: name.clone(),
                    message: format!("bad {SPACE_REGEX_KEY}: {e}"),
                })?
            }
            _ => Regex::new(DEFAULT_SPACE_REGEX).unwrap(),
        };
        if model.is_empty() {
            log::warn!("model {name} is empty, marking the configuration space incomplete");
            model.add_meta_value(INCOMPLETE_KEY, "1");
        }
        Ok(Self { name, model, items, space_regex })
    }

    /// Transitively extend `set` with every symbol reachable through the
    /// stored implication formulas.
    pub fn extend_with_interesting_items(&self, set: &mut BTreeSet<String>) {
        let mut work: Vec<String> = set.iter().cloned().collect();
        while let Some(item) = work.pop() {
            let Some(value) = self.model.value(&item) else { continue };
            if value.is_empty() {
                continue;
            }
            for referent in symbol::items_of_string(value) {
                if set.insert(referent.clone()) {
                    work.push(referent);
                }
            }
        }
    }

    fn type_of(&self, item: &str) -> Option<&str> {
        let stripped = item.strip_prefix("CONFIG_").unwrap_or(item);
        self.items.value(stripped)
    }
}

impl ConfigurationModel for RsfModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn version_identifier(&self) -> &'static str {
        "rsf"
    }

    fn is_boolean(&self, name: &str) -> bool {
        self.type_of(name) == Some("boolean")
    }

    fn is_tristate(&self, name: &str) -> bool {
        self.type_of(name) == Some("tristate")
    }

    fn get_type(&self, name: &str) -> String {
        let Some(caps) = item_regex().captures(name) else {
            return "#ERROR".to_string();
        };
        match self.items.value(&caps[1]) {
            Some(ty) => ty.to_ascii_uppercase(),
            None => "MISSING".to_string(),
        }
    }

    fn contains_symbol(&self, name: &str) -> bool {
        symbol::is_file_symbol(name) || self.model.contains_key(name)
    }

    fn meta_value(&self, key: &str) -> Option<Vec<String>> {
        self.model.meta_value(key)
    }

    fn add_meta_value(&self, key: &str, value: &str) {
        self.model.add_meta_value(key, value);
    }

    fn config_space_regex(&self) -> &Regex {
        &self.space_regex
    }

    fn intersect_preprocess(
        &self,
        items: &mut BTreeSet<String>,
        slice: &mut StringJoiner,
        exclude: Option<&BTreeSet<String>>,
    ) {
        // ALWAYS_ON symbols and their transitive dependencies always belong
        // into the slice, referenced or not.
        for item in self.whitelist() {
            items.insert(item);
        }
        self.extend_with_interesting_items(items);

        if let Some(exclude) = exclude {
            for item in exclude {
                items.remove(item);
            }
        }

        for item in items.iter() {
            if let Some(value) = self.model.value(item) {
                if !value.is_empty() {
                    slice.push(format!("({item} -> ({value}))"));
                }
            }
        }

        // ALWAYS_OFF symbols contribute negated literals later; only their
        // dependency closure is needed here, not their formulas.
        let blacklist = self.blacklist();
        if !blacklist.is_empty() {
            for item in blacklist {
                items.insert(item);
            }
            self.extend_with_interesting_items(items);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(lines: &str) -> RsfModel {
        let reader = RsfReader::parse(lines.as_bytes());
        let items = ItemReader::parse("Item ACPI tristate\nItem DEBUG boolean\n".as_bytes());
        RsfModel::from_parts("x86".to_string(), reader, items).unwrap()
    }

    #[test]
    fn type_queries_normalize_the_prefix() {
        let m = model("CONFIG_ACPI\nCONFIG_DEBUG\n");
        assert!(m.is_tristate("CONFIG_ACPI"));
        assert!(m.is_tristate("ACPI"));
        assert!(m.is_boolean("DEBUG"));
        assert_eq!(m.get_type("CONFIG_ACPI"), "TRISTATE");
        assert_eq!(m.get_type("CONFIG_ACPI_MODULE"), "TRISTATE");
        assert_eq!(m.get_type("CONFIG_NOSUCH"), "MISSING");
        assert_eq!(m.get_type("not an item"), "#ERROR");
    }

    #[test]
    fn file_symbols_are_always_contained() {
        let m = model("CONFIG_ACPI\n");
        assert!(m.contains_symbol("CONFIG_ACPI"));
        assert!(m.contains_symbol("FILE_drivers_foo.c"));
        assert!(!m.contains_symbol("CONFIG_NOSUCH"));
    }

    #[test]
    fn empty_model_is_incomplete() {
        let m = model("");
        assert!(!m.is_complete());
        let m = model("CONFIG_ACPI\n");
        assert!(m.is_complete());
    }

    #[test]
    fn intersect_closes_over_implications() {
        let m = model("CONFIG_A CONFIG_B\nCONFIG_B CONFIG_C\nCONFIG_C\n");
        let mut missing = BTreeSet::new();
        let mut slice = String::new();
        let items = m.do_intersect("CONFIG_A", None, &mut missing, &mut slice, None);
        assert!(items.contains("CONFIG_A"));
        assert!(items.contains("CONFIG_B"));
        assert!(items.contains("CONFIG_C"));
        assert!(slice.contains("(CONFIG_A -> (CONFIG_B))"));
        assert!(slice.contains("(CONFIG_B -> (CONFIG_C))"));
        assert!(missing.is_empty());
    }

    #[test]
    fn intersect_reports_missing_option_symbols() {
        let m = model("CONFIG_A\n");
        let mut missing = BTreeSet::new();
        let mut slice = String::new();
        m.do_intersect(
            "CONFIG_A && CONFIG_GONE && B1 && __FREE__0 && CONFIG_CVALUE_42",
            None,
            &mut missing,
            &mut slice,
            None,
        );
        assert_eq!(missing.into_iter().collect::<Vec<_>>(), vec!["CONFIG_GONE".to_string()]);
    }

    #[test]
    fn exclude_set_suppresses_slice_entries() {
        let m = model("CONFIG_A CONFIG_B\nCONFIG_B\n");
        let mut missing = BTreeSet::new();
        let mut slice = String::new();
        let exclude: BTreeSet<String> = ["CONFIG_A".to_string()].into();
        m.do_intersect("CONFIG_A", None, &mut missing, &mut slice, Some(&exclude));
        assert!(!slice.contains("CONFIG_A ->"));
    }

    #[test]
    fn whitelist_members_become_positive_literals() {
        let m = model("CONFIG_A\nCONFIG_B\n");
        m.add_to_whitelist("CONFIG_B");
        m.add_to_blacklist("CONFIG_A");
        let mut missing = BTreeSet::new();
        let mut slice = String::new();
        m.do_intersect("CONFIG_A", None, &mut missing, &mut slice, None);
        assert!(slice.contains("CONFIG_B"));
        assert!(slice.contains("!CONFIG_A"));
    }
}
