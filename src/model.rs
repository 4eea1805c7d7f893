//! The configuration-option model interface and the shared intersection.
//!
//! A model answers what the configuration system knows about an option:
//! its type, whether it exists at all, which other options it implies, and
//! the meta lists (`ALWAYS_ON`, `ALWAYS_OFF`, the configuration-space regex,
//! completeness). Two interchangeable storage variants implement the trait:
//! the textual one ([`crate::rsf_model::RsfModel`]) and the clause-level one
//! ([`crate::cnf_model::CnfModel`]).
//!
//! [`ConfigurationModel::do_intersect`] is the shared restriction algorithm:
//! given a code formula it collects the referenced symbols, lets the variant
//! close them under the model's implications and emit the restricted slice,
//! and reports option-space symbols the model does not know as *missing*.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::Path;

use regex::Regex;

use crate::cnf::Cnf;
use crate::error::{Error, Result};
use crate::joiner::StringJoiner;
use crate::symbol;

pub const WHITELIST_KEY: &str = "ALWAYS_ON";
pub const BLACKLIST_KEY: &str = "ALWAYS_OFF";
pub const INCOMPLETE_KEY: &str = "CONFIGURATION_SPACE_INCOMPLETE";
pub const SPACE_REGEX_KEY: &str = "CONFIGURATION_SPACE_REGEX";
pub const DEFAULT_SPACE_REGEX: &str = "^CONFIG_[^ ]+$";

/// Environment variable naming the default main architecture.
pub const MAIN_ARCH_ENV: &str = "CORONER_MAIN_ARCH";

/// Predicate deciding whether a symbol is eligible for model lookup, i.e.
/// not shadowed by an in-file `#define`.
pub type DefineChecker<'a> = &'a dyn Fn(&str) -> bool;

pub trait ConfigurationModel: Send + Sync {
    /// Architecture name, taken from the model file stem.
    fn name(&self) -> &str;

    /// Storage variant tag: `"rsf"` or `"cnf"`.
    fn version_identifier(&self) -> &'static str;

    fn is_boolean(&self, name: &str) -> bool;
    fn is_tristate(&self, name: &str) -> bool;

    /// Canonical type word for a feature name; `CONFIG_X` and
    /// `CONFIG_X_MODULE` both resolve to the entry for `X`. Returns
    /// `MISSING` for unknown options and `#ERROR` for names outside the
    /// option namespace.
    fn get_type(&self, name: &str) -> String;

    /// Whether the model knows the symbol. File symbols are always
    /// considered known; the build system decides their value.
    fn contains_symbol(&self, name: &str) -> bool;

    fn meta_value(&self, key: &str) -> Option<Vec<String>>;
    fn add_meta_value(&self, key: &str, value: &str);

    fn config_space_regex(&self) -> &Regex;

    /// Variant-specific part of [`Self::do_intersect`]: extend `items` and
    /// emit the model slice for them into `slice`.
    fn intersect_preprocess(
        &self,
        items: &mut BTreeSet<String>,
        slice: &mut StringJoiner,
        exclude: Option<&BTreeSet<String>>,
    );

    /// The pre-compiled clause set of CNF-backed models.
    fn cnf(&self) -> Option<&Cnf> {
        None
    }

    fn in_configuration_space(&self, name: &str) -> bool {
        self.config_space_regex().is_match(name)
    }

    fn whitelist(&self) -> Vec<String> {
        self.meta_value(WHITELIST_KEY).unwrap_or_default()
    }

    fn blacklist(&self) -> Vec<String> {
        self.meta_value(BLACKLIST_KEY).unwrap_or_default()
    }

    fn add_to_whitelist(&self, name: &str) {
        self.add_meta_value(WHITELIST_KEY, name);
    }

    fn add_to_blacklist(&self, name: &str) {
        self.add_meta_value(BLACKLIST_KEY, name);
    }

    /// A model is complete unless it was marked otherwise; empty model
    /// files are marked on load.
    fn is_complete(&self) -> bool {
        self.meta_value(INCOMPLETE_KEY).is_none()
    }

    /// Restrict the model to the part relevant for `exp`.
    ///
    /// Returns the closed set of referenced symbols, writes the restricted
    /// model slice into `intersected` and grows `missing` by every
    /// option-space symbol absent from the model. Free and constant-value
    /// symbols are never missing; symbols rejected by `checker` (in-file
    /// macros) and symbols in `exclude` are skipped.
    fn do_intersect(
        &self,
        exp: &str,
        checker: Option<DefineChecker>,
        missing: &mut BTreeSet<String>,
        intersected: &mut String,
        exclude: Option<&BTreeSet<String>>,
    ) -> BTreeSet<String> {
        let mut items = symbol::items_of_string(exp);
        let mut slice = StringJoiner::new();
        self.intersect_preprocess(&mut items, &mut slice, exclude);

        let always_on = self.whitelist();
        let always_off = self.blacklist();
        for item in &items {
            if self.contains_symbol(item) {
                if always_on.iter().any(|s| s == item) {
                    slice.push(item.clone());
                }
                if always_off.iter().any(|s| s == item) {
                    slice.push(format!("!{item}"));
                }
            } else {
                if !self.in_configuration_space(item) {
                    continue;
                }
                if let Some(checker) = checker {
                    if !checker(item) {
                        continue;
                    }
                }
                if symbol::is_free_symbol(item) || symbol::is_cvalue_symbol(item) {
                    continue;
                }
                missing.insert(item.clone());
            }
        }
        *intersected = slice.join("\n&& ");
        log::debug!(
            "intersected {} items against model {}, {} missing",
            items.len(),
            self.name(),
            missing.len()
        );
        items
    }
}

/// `( ! ( m1 || m2 ) )` over the missing set, forcing every missing symbol
/// off; empty when nothing is missing.
pub fn missing_items_constraint(missing: &BTreeSet<String>) -> String {
    if missing.is_empty() {
        return String::new();
    }
    let mut sj = StringJoiner::new();
    for item in missing {
        sj.push(item.clone());
    }
    format!("( ! ( {} ) )", sj.join(" || "))
}

/// All loaded models, keyed by architecture, with one designated as main.
///
/// The registry is created by the entry point and passed to the classifier
/// by reference; models are never mutated after loading apart from the
/// idempotent meta-value appends.
#[derive(Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, Box<dyn ConfigurationModel>>,
    main: Option<String>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, model: Box<dyn ConfigurationModel>) -> String {
        let arch = model.name().to_string();
        if self.models.insert(arch.clone(), model).is_some() {
            log::warn!("model for {arch} was already loaded, replacing it");
        }
        if self.main.is_none() {
            self.main = Some(arch.clone());
        }
        arch
    }

    /// Load a single model file; the variant is picked by extension
    /// (`.cnf` is clause-level, anything else keyed-line).
    pub fn load_file(&mut self, path: &Path) -> Result<String> {
        let model: Box<dyn ConfigurationModel> =
            if path.extension().is_some_and(|e| e == "cnf") {
                Box::new(crate::cnf_model::CnfModel::open(path)?)
            } else {
                Box::new(crate::rsf_model::RsfModel::open(path)?)
            };
        let arch = self.register(model);
        log::info!("loaded {} model for {}", self.models[&arch].version_identifier(), arch);
        Ok(arch)
    }

    /// Load every `*.model` and `*.cnf` file in a directory.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        let mut loaded = 0;
        let mut entries: Vec<_> =
            std::fs::read_dir(dir)?.filter_map(|e| e.ok()).map(|e| e.path()).collect();
        entries.sort();
        for path in entries {
            let by_extension = path.extension().is_some_and(|e| e == "model" || e == "cnf");
            if path.is_file() && by_extension {
                self.load_file(&path)?;
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    pub fn set_main(&mut self, arch: &str) -> Result<()> {
        if !self.models.contains_key(arch) {
            return Err(Error::Model {
                path: arch.to_string(),
                message: "no model loaded for this architecture".into(),
            });
        }
        self.main = Some(arch.to_string());
        Ok(())
    }

    pub fn main_arch(&self) -> Option<&str> {
        self.main.as_deref()
    }

    pub fn main_model(&self) -> Option<&dyn ConfigurationModel> {
        self.main.as_ref().map(|arch| self.models[arch].as_ref())
    }

    pub fn model(&self, arch: &str) -> Option<&dyn ConfigurationModel> {
        self.models.get(arch).map(Box::as_ref)
    }

    pub fn models(&self) -> impl Iterator<Item = (&str, &dyn ConfigurationModel)> {
        self.models.iter().map(|(arch, model)| (arch.as_str(), model.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// True if any loaded model claims the symbol for its option space.
    pub fn in_any_configuration_space(&self, name: &str) -> bool {
        self.models.values().any(|m| m.in_configuration_space(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_constraint_rendering() {
        let mut missing = BTreeSet::new();
        assert_eq!(missing_items_constraint(&missing), "");
        missing.insert("CONFIG_A".to_string());
        assert_eq!(missing_items_constraint(&missing), "( ! ( CONFIG_A ) )");
        missing.insert("CONFIG_B".to_string());
        assert_eq!(missing_items_constraint(&missing), "( ! ( CONFIG_A || CONFIG_B ) )");
    }
}
