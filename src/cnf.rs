//! Clause-level representation of formulas and CNF model files.
//!
//! A [`Cnf`] owns clauses in DIMACS integer form together with a
//! bidirectional symbol table (names for the variables that have one; the
//! gate variables introduced by the Tseitin transform stay anonymous),
//! per-symbol type annotations and the meta map of CNF model files.
//!
//! The on-disk format is DIMACS with annotated comments, so stock DIMACS
//! tooling can read the clause part unchanged:
//!
//! ```text
//! c meta CONFIGURATION_SPACE_REGEX "^CONFIG_[^ ]+$"
//! c sym 1 ACPI 2
//! p cnf 2 1
//! -1 2 0
//! ```

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::sync::RwLock;

use crate::error::Error;
use crate::expr::Expr;

/// Declared type of a configuration option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SymbolType {
    #[default]
    Missing,
    Boolean,
    Tristate,
    Integer,
    Hex,
    String,
}

impl SymbolType {
    pub fn from_digit(d: u8) -> Self {
        match d {
            1 => SymbolType::Boolean,
            2 => SymbolType::Tristate,
            3 => SymbolType::Integer,
            4 => SymbolType::Hex,
            5 => SymbolType::String,
            _ => SymbolType::Missing,
        }
    }

    pub fn as_digit(self) -> u8 {
        match self {
            SymbolType::Missing => 0,
            SymbolType::Boolean => 1,
            SymbolType::Tristate => 2,
            SymbolType::Integer => 3,
            SymbolType::Hex => 4,
            SymbolType::String => 5,
        }
    }

    /// Canonical upper-case type word, as reported by type queries.
    pub fn word(self) -> &'static str {
        match self {
            SymbolType::Missing => "MISSING",
            SymbolType::Boolean => "BOOLEAN",
            SymbolType::Tristate => "TRISTATE",
            SymbolType::Integer => "INTEGER",
            SymbolType::Hex => "HEX",
            SymbolType::String => "STRING",
        }
    }

    pub fn from_word(word: &str) -> Self {
        match word.to_ascii_lowercase().as_str() {
            "boolean" | "bool" => SymbolType::Boolean,
            "tristate" => SymbolType::Tristate,
            "integer" | "int" => SymbolType::Integer,
            "hex" => SymbolType::Hex,
            "string" => SymbolType::String,
            _ => SymbolType::Missing,
        }
    }
}

/// How constants `0`/`1` in a formula reach the solver.
///
/// `Free` gives every constant occurrence a fresh unconstrained variable,
/// which is right for code formulas where constants stand for expressions
/// outside the propositional fragment. `Bound` pins them to their truth
/// value, which the base-expression checker needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstantPolicy {
    Free,
    Bound,
}

#[derive(Debug, Default)]
pub struct Cnf {
    var_count: i32,
    clauses: Vec<Vec<i32>>,
    sym_to_var: HashMap<String, i32>,
    var_to_sym: HashMap<i32, String>,
    types: HashMap<String, SymbolType>,
    meta: RwLock<HashMap<String, Vec<String>>>,
    true_var: Option<i32>,
}

impl Cnf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn var_count(&self) -> i32 {
        self.var_count
    }

    pub fn clause_count(&self) -> usize {
        self.clauses.len()
    }

    pub fn clauses(&self) -> &[Vec<i32>] {
        &self.clauses
    }

    pub fn add_clause(&mut self, literals: &[i32]) {
        for &lit in literals {
            debug_assert!(lit != 0 && lit.abs() <= self.var_count);
        }
        self.clauses.push(literals.to_vec());
    }

    pub fn fresh_var(&mut self) -> i32 {
        self.var_count += 1;
        self.var_count
    }

    /// Variable id for a named symbol, interning it on first use.
    pub fn var_for(&mut self, name: &str) -> i32 {
        if let Some(&var) = self.sym_to_var.get(name) {
            return var;
        }
        let var = self.fresh_var();
        self.sym_to_var.insert(name.to_string(), var);
        self.var_to_sym.insert(var, name.to_string());
        var
    }

    pub fn lookup_var(&self, name: &str) -> Option<i32> {
        self.sym_to_var.get(name).copied()
    }

    pub fn symbol_name(&self, var: i32) -> Option<&str> {
        self.var_to_sym.get(&var.abs()).map(String::as_str)
    }

    pub fn symbols(&self) -> impl Iterator<Item = (&str, i32)> {
        self.sym_to_var.iter().map(|(name, &var)| (name.as_str(), var))
    }

    pub fn contains_symbol(&self, name: &str) -> bool {
        self.sym_to_var.contains_key(name)
    }

    pub fn set_symbol_type(&mut self, name: &str, ty: SymbolType) {
        self.types.insert(name.to_string(), ty);
    }

    pub fn symbol_type(&self, name: &str) -> SymbolType {
        self.types.get(name).copied().unwrap_or_default()
    }

    pub fn add_meta_value(&self, key: &str, value: &str) {
        if value.is_empty() {
            return;
        }
        let mut meta = self.meta.write().unwrap();
        let values = meta.entry(key.to_string()).or_default();
        if !values.iter().any(|v| v == value) {
            values.push(value.to_string());
        }
    }

    pub fn meta_value(&self, key: &str) -> Option<Vec<String>> {
        self.meta.read().unwrap().get(key).cloned()
    }

    /// Assert `expr` by Tseitin transformation: every connective gets a gate
    /// variable constrained in both directions, the root literal becomes a
    /// unit clause.
    pub fn add_formula(&mut self, expr: &Expr, policy: ConstantPolicy) {
        let root = self.encode(expr, policy);
        self.add_clause(&[root]);
    }

    fn encode(&mut self, expr: &Expr, policy: ConstantPolicy) -> i32 {
        match expr {
            Expr::Var(name) => self.var_for(name),
            Expr::Const(value) => match policy {
                ConstantPolicy::Free => self.fresh_var(),
                ConstantPolicy::Bound => {
                    let t = self.bound_true();
                    if *value {
                        t
                    } else {
                        -t
                    }
                }
            },
            Expr::Not(inner) => -self.encode(inner, policy),
            Expr::And(lhs, rhs) => {
                let (a, b) = (self.encode(lhs, policy), self.encode(rhs, policy));
                let g = self.fresh_var();
                self.add_clause(&[-g, a]);
                self.add_clause(&[-g, b]);
                self.add_clause(&[g, -a, -b]);
                g
            }
            Expr::Or(lhs, rhs) => {
                let (a, b) = (self.encode(lhs, policy), self.encode(rhs, policy));
                let g = self.fresh_var();
                self.add_clause(&[-g, a, b]);
                self.add_clause(&[g, -a]);
                self.add_clause(&[g, -b]);
                g
            }
            Expr::Imp(lhs, rhs) => {
                let (a, b) = (self.encode(lhs, policy), self.encode(rhs, policy));
                let g = self.fresh_var();
                self.add_clause(&[-g, -a, b]);
                self.add_clause(&[g, a]);
                self.add_clause(&[g, -b]);
                g
            }
            Expr::Iff(lhs, rhs) => {
                let (a, b) = (self.encode(lhs, policy), self.encode(rhs, policy));
                let g = self.fresh_var();
                self.add_clause(&[-g, -a, b]);
                self.add_clause(&[-g, a, -b]);
                self.add_clause(&[g, a, b]);
                self.add_clause(&[g, -a, -b]);
                g
            }
        }
    }

    fn bound_true(&mut self) -> i32 {
        if let Some(t) = self.true_var {
            return t;
        }
        let t = self.fresh_var();
        self.add_clause(&[t]);
        self.true_var = Some(t);
        t
    }

    /// Merge another CNF into this one. Named variables are matched by
    /// symbol name, anonymous ones get fresh ids; clauses, types and meta
    /// entries are copied over.
    pub fn extend_with(&mut self, other: &Cnf) {
        let mut map: HashMap<i32, i32> = HashMap::new();
        for var in 1..=other.var_count {
            let mapped = match other.var_to_sym.get(&var) {
                Some(name) => self.var_for(name),
                None => self.fresh_var(),
            };
            map.insert(var, mapped);
        }
        for clause in &other.clauses {
            let mapped: Vec<i32> =
                clause.iter().map(|&lit| map[&lit.abs()] * lit.signum()).collect();
            self.clauses.push(mapped);
        }
        for (name, &ty) in &other.types {
            self.types.insert(name.clone(), ty);
        }
        let other_meta = other.meta.read().unwrap();
        for (key, values) in other_meta.iter() {
            for value in values {
                self.add_meta_value(key, value);
            }
        }
    }

    /// Write annotated DIMACS.
    pub fn write_dimacs<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        let meta = self.meta.read().unwrap();
        let mut keys: Vec<_> = meta.keys().collect();
        keys.sort();
        for key in keys {
            let values: Vec<String> = meta[key]
                .iter()
                .map(|v| {
                    if v.contains(char::is_whitespace) {
                        format!("\"{v}\"")
                    } else {
                        v.clone()
                    }
                })
                .collect();
            writeln!(out, "c meta {} {}", key, values.join(" "))?;
        }
        let mut vars: Vec<i32> = self.var_to_sym.keys().copied().collect();
        vars.sort();
        for var in vars {
            let name = &self.var_to_sym[&var];
            writeln!(out, "c sym {} {} {}", var, name, self.symbol_type(name).as_digit())?;
        }
        writeln!(out, "p cnf {} {}", self.var_count, self.clauses.len())?;
        for clause in &self.clauses {
            for lit in clause {
                write!(out, "{lit} ")?;
            }
            writeln!(out, "0")?;
        }
        Ok(())
    }

    /// Read annotated DIMACS. Unknown comment lines are skipped, clauses may
    /// span lines.
    pub fn read_dimacs<R: BufRead>(reader: R, path: &str) -> Result<Cnf, Error> {
        let bad = |message: &str| Error::Model { path: path.to_string(), message: message.into() };
        let mut cnf = Cnf::new();
        let mut current: Vec<i32> = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(rest) = line.strip_prefix("c ") {
                let mut tokens = rest.split_whitespace();
                match tokens.next() {
                    Some("meta") => {
                        let mut fields = rest.splitn(3, char::is_whitespace);
                        fields.next();
                        let Some(key) = fields.next() else { continue };
                        let values = fields.next().unwrap_or("");
                        for value in crate::rsf::split_quoted(values) {
                            cnf.add_meta_value(key, &value);
                        }
                    }
                    Some("sym") => {
                        let var: i32 = tokens
                            .next()
                            .and_then(|t| t.parse().ok())
                            .ok_or_else(|| bad("malformed sym line"))?;
                        let name = tokens.next().ok_or_else(|| bad("sym line without name"))?;
                        let digit: u8 = tokens.next().and_then(|t| t.parse().ok()).unwrap_or(0);
                        if var <= 0 {
                            return Err(bad("sym line with non-positive id"));
                        }
                        cnf.var_count = cnf.var_count.max(var);
                        cnf.sym_to_var.insert(name.to_string(), var);
                        cnf.var_to_sym.insert(var, name.to_string());
                        cnf.set_symbol_type(name, SymbolType::from_digit(digit));
                    }
                    _ => {}
                }
                continue;
            }
            if line == "c" {
                continue;
            }
            if let Some(rest) = line.strip_prefix("p ") {
                let mut tokens = rest.split_whitespace();
                if tokens.next() != Some("cnf") {
                    return Err(bad("problem line is not 'p cnf'"));
                }
                let vars: i32 = tokens
                    .next()
                    .and_then(|t| t.parse().ok())
                    .ok_or_else(|| bad("malformed problem line"))?;
                cnf.var_count = cnf.var_count.max(vars);
                continue;
            }
            for token in line.split_whitespace() {
                let lit: i32 = token.parse().map_err(|_| bad("malformed clause literal"))?;
                if lit == 0 {
                    if !current.is_empty() {
                        cnf.var_count =
                            cnf.var_count.max(current.iter().map(|l| l.abs()).max().unwrap_or(0));
                        cnf.clauses.push(std::mem::take(&mut current));
                    }
                } else {
                    current.push(lit);
                }
            }
        }
        if !current.is_empty() {
            return Err(bad("unterminated clause"));
        }
        Ok(cnf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr;

    #[test]
    fn interning_is_stable() {
        let mut cnf = Cnf::new();
        let a = cnf.var_for("A");
        let b = cnf.var_for("B");
        assert_ne!(a, b);
        assert_eq!(cnf.var_for("A"), a);
        assert_eq!(cnf.symbol_name(a), Some("A"));
        assert_eq!(cnf.symbol_name(-a), Some("A"));
        assert_eq!(cnf.lookup_var("C"), None);
    }

    #[test]
    fn formula_encoding_adds_root_unit() {
        let mut cnf = Cnf::new();
        let e = expr::parse("A && !B").unwrap();
        cnf.add_formula(&e, ConstantPolicy::Free);
        // two named vars, one gate, three gate clauses plus the root unit
        assert_eq!(cnf.var_count(), 3);
        assert_eq!(cnf.clause_count(), 4);
        assert_eq!(cnf.clauses().last().unwrap(), &vec![3]);
    }

    #[test]
    fn bound_constants_share_one_variable() {
        let mut cnf = Cnf::new();
        let e = expr::parse("1 && 1").unwrap();
        cnf.add_formula(&e, ConstantPolicy::Bound);
        let units: Vec<_> = cnf.clauses().iter().filter(|c| c.len() == 1).collect();
        // the pinned true variable plus the root gate
        assert_eq!(units.len(), 2);
    }

    #[test]
    fn dimacs_round_trip() {
        let mut cnf = Cnf::new();
        let a = cnf.var_for("ACPI");
        let b = cnf.var_for("PM");
        cnf.set_symbol_type("ACPI", SymbolType::Tristate);
        cnf.set_symbol_type("PM", SymbolType::Boolean);
        cnf.add_clause(&[-a, b]);
        cnf.add_meta_value("CONFIGURATION_SPACE_REGEX", "^CONFIG_[^ ]+$");

        let mut buf = Vec::new();
        cnf.write_dimacs(&mut buf).unwrap();
        let parsed = Cnf::read_dimacs(buf.as_slice(), "test.cnf").unwrap();

        assert_eq!(parsed.var_count(), 2);
        assert_eq!(parsed.clause_count(), 1);
        assert_eq!(parsed.symbol_type("ACPI"), SymbolType::Tristate);
        assert_eq!(parsed.symbol_type("PM"), SymbolType::Boolean);
        let a2 = parsed.lookup_var("ACPI").unwrap();
        let b2 = parsed.lookup_var("PM").unwrap();
        assert_eq!(parsed.clauses()[0], vec![-a2, b2]);
        assert_eq!(
            parsed.meta_value("CONFIGURATION_SPACE_REGEX"),
            Some(vec!["^CONFIG_[^ ]+$".to_string()])
        );
    }

    #[test]
    fn extend_with_matches_by_name() {
        let mut left = Cnf::new();
        let a = left.var_for("A");
        left.add_clause(&[a]);

        let mut right = Cnf::new();
        let ra = right.var_for("A");
        let rb = right.var_for("B");
        right.add_clause(&[-ra, rb]);
        right.set_symbol_type("B", SymbolType::Boolean);

        left.extend_with(&right);
        let b = left.lookup_var("B").unwrap();
        assert_eq!(left.clauses()[1], vec![-a, b]);
        assert_eq!(left.symbol_type("B"), SymbolType::Boolean);
    }
}
