//! Clause-level configuration-model variant.
//!
//! Backed by an annotated DIMACS file (see [`crate::cnf`]). The implication
//! structure lives in pre-compiled clauses, so intersect preprocessing emits
//! no textual slice; the SAT adapter merges the clause set directly when a
//! check runs against a CNF model.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::cnf::Cnf;
use crate::error::{Error, Result};
use crate::joiner::StringJoiner;
use crate::model::{
    ConfigurationModel, DEFAULT_SPACE_REGEX, INCOMPLETE_KEY, SPACE_REGEX_KEY,
};
use crate::symbol;
use std::collections::BTreeSet;

fn item_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^CONFIG_([0-9A-Za-z_]+?)(_MODULE)?$").unwrap())
}

pub struct CnfModel {
    name: String,
    cnf: Cnf,
    space_regex: Regex,
}

impl CnfModel {
    pub fn open(path: &Path) -> Result<Self> {
        let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("model").to_string();
        let file = File::open(path).map_err(|e| Error::Model {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let cnf = Cnf::read_dimacs(BufReader::new(file), &path.display().to_string())?;
        Self::from_cnf(name, cnf)
    }

    pub fn from_cnf(name: String, cnf: Cnf) -> Result<Self> {
        let space_regex = match cnf.meta_value(SPACE_REGEX_KEY) {
            Some(values) if !values.is_empty() => {
                log::info!("set configuration space regex to '{}'", values[0]);
                Regex::new(&values[0]).map_err(|e| Error::Model {
                    path: name.clone(),
                    message: format!("bad {SPACE_REGEX_KEY}: {e}"),
                })?
            }
            _ => Regex::new(DEFAULT_SPACE_REGEX).unwrap(),
        };
        if cnf.var_count() == 0 {
            log::warn!("model {name} is empty, marking the configuration space incomplete");
            cnf.add_meta_value(INCOMPLETE_KEY, "1");
        }
        Ok(Self { name, cnf, space_regex })
    }

    fn type_of(&self, name: &str) -> crate::cnf::SymbolType {
        let base = match item_regex().captures(name) {
            Some(caps) => format!("CONFIG_{}", &caps[1]),
            None => name.to_string(),
        };
        self.cnf.symbol_type(&base)
    }
}

impl ConfigurationModel for CnfModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn version_identifier(&self) -> &'static str {
        "cnf"
    }

    fn is_boolean(&self, name: &str) -> bool {
        self.type_of(name) == crate::cnf::SymbolType::Boolean
    }

    fn is_tristate(&self, name: &str) -> bool {
        self.type_of(name) == crate::cnf::SymbolType::Tristate
    }

    fn get_type(&self, name: &str) -> String {
        if item_regex().captures(name).is_none() {
            return "#ERROR".to_string();
        }
        self.type_of(name).word().to_string()
    }

    fn contains_symbol(&self, name: &str) -> bool {
        symbol::is_file_symbol(name) || self.cnf.contains_symbol(name)
    }

    fn meta_value(&self, key: &str) -> Option<Vec<String>> {
        self.cnf.meta_value(key)
    }

    fn add_meta_value(&self, key: &str, value: &str) {
        self.cnf.add_meta_value(key, value);
    }

    fn config_space_regex(&self) -> &Regex {
        &self.space_regex
    }

    fn intersect_preprocess(
        &self,
        items: &mut BTreeSet<String>,
        _slice: &mut StringJoiner,
        exclude: Option<&BTreeSet<String>>,
    ) {
        // The implications are clauses, merged wholesale into the solver by
        // the SAT adapter; only the ALWAYS_ON/ALWAYS_OFF literal emission of
        // the shared loop needs the lists in the working set.
        for item in self.whitelist() {
            items.insert(item);
        }
        for item in self.blacklist() {
            items.insert(item);
        }
        if let Some(exclude) = exclude {
            for item in exclude {
                items.remove(item);
            }
        }
    }

    fn cnf(&self) -> Option<&Cnf> {
        Some(&self.cnf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cnf::SymbolType;

    fn sample() -> CnfModel {
        let mut cnf = Cnf::new();
        let foo = cnf.var_for("CONFIG_FOO");
        let bar = cnf.var_for("CONFIG_BAR");
        cnf.add_clause(&[-foo, bar]);
        cnf.set_symbol_type("CONFIG_FOO", SymbolType::Boolean);
        cnf.set_symbol_type("CONFIG_BAR", SymbolType::Tristate);
        CnfModel::from_cnf("arm".to_string(), cnf).unwrap()
    }

    #[test]
    fn type_queries() {
        let m = sample();
        assert!(m.is_boolean("CONFIG_FOO"));
        assert!(m.is_tristate("CONFIG_BAR"));
        assert_eq!(m.get_type("CONFIG_BAR_MODULE"), "TRISTATE");
        assert_eq!(m.get_type("CONFIG_NOSUCH"), "MISSING");
        assert_eq!(m.get_type("B12"), "#ERROR");
    }

    #[test]
    fn symbols_and_files_are_contained() {
        let m = sample();
        assert!(m.contains_symbol("CONFIG_FOO"));
        assert!(m.contains_symbol("FILE_init_main.c"));
        assert!(!m.contains_symbol("CONFIG_NOSUCH"));
    }

    #[test]
    fn intersect_emits_no_textual_slice() {
        let m = sample();
        let mut missing = BTreeSet::new();
        let mut slice = String::new();
        m.do_intersect("CONFIG_FOO && CONFIG_GONE", None, &mut missing, &mut slice, None);
        assert!(slice.is_empty());
        assert!(missing.contains("CONFIG_GONE"));
        assert!(!missing.contains("CONFIG_FOO"));
    }

    #[test]
    fn empty_cnf_is_incomplete() {
        let m = CnfModel::from_cnf("empty".to_string(), Cnf::new()).unwrap();
        assert!(!m.is_complete());
    }
}
