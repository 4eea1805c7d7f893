//! The SAT adapter: formula strings in, verdicts and assignments out.
//!
//! A [`SatChecker`] owns a growing [`Cnf`]; every [`SatChecker::check`] call
//! conjoins another formula and re-decides the whole accumulated problem
//! with a fresh `varisat` solver, which keeps per-check state disjoint (the
//! defect classifier escalates by calling `check` with the increment only).
//! The checker is deliberately not shareable between threads; parallel
//! analyses use one checker per worker.

use std::collections::BTreeMap;
use std::io::Write as IoWrite;
use std::process::{Command, Stdio};

use varisat::{ExtendFormula, Lit, Solver};

use crate::cnf::{Cnf, ConstantPolicy};
use crate::error::{Error, Result};
use crate::expr;
use crate::joiner::{StringJoiner, UniqueStringJoiner};
use crate::model::ConfigurationModel;
use crate::symbol;

/// A satisfying assignment, keyed by symbol name.
///
/// Contains every named variable of the solved problem: block variables,
/// option variables, file variables and the in-file replacement symbols.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignmentMap {
    map: BTreeMap<String, bool>,
}

impl AssignmentMap {
    pub fn insert(&mut self, name: impl Into<String>, value: bool) {
        self.map.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<bool> {
        self.map.get(name).copied()
    }

    /// True iff the symbol is assigned and set.
    pub fn enabled(&self, name: &str) -> bool {
        self.get(name) == Some(true)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.map.iter().map(|(name, &value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[derive(Debug, Clone)]
struct MusData {
    formula: String,
    vars: i32,
    clauses: usize,
    orig_vars: i32,
    orig_clauses: usize,
}

/// Wrapper around one solver instance and the CNF it decides.
#[derive(Default)]
pub struct SatChecker {
    cnf: Cnf,
    assignment: Option<AssignmentMap>,
    mus: Option<MusData>,
}

impl SatChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A checker preloaded with the clause set of a CNF-backed model;
    /// textual models contribute via their formula slices instead.
    pub fn for_model(model: Option<&dyn ConfigurationModel>) -> Self {
        let mut checker = Self::new();
        if let Some(model) = model {
            checker.load_cnf_model(model);
        }
        checker
    }

    /// One-shot satisfiability of a single formula.
    pub fn decide(formula: &str) -> Result<bool> {
        SatChecker::new().check(formula)
    }

    /// Conjoin `formula` (empty input adds nothing) and decide.
    ///
    /// Constants are encoded under the `Free` policy: a `0` or `1` in a code
    /// formula stands for an expression outside the propositional fragment,
    /// not for a fixed truth value.
    pub fn check(&mut self, formula: &str) -> Result<bool> {
        if !formula.trim().is_empty() {
            let parsed = expr::parse(formula)?;
            self.cnf.add_formula(&parsed, ConstantPolicy::Free);
        }
        self.solve(&[])
    }

    /// Merge the clauses of a CNF-backed model; no-op for textual models.
    pub fn load_cnf_model(&mut self, model: &dyn ConfigurationModel) {
        if let Some(cnf) = model.cnf() {
            self.cnf.extend_with(cnf);
        }
    }

    /// The assignment cached by the last satisfiable [`Self::check`].
    pub fn assignment(&self) -> Option<&AssignmentMap> {
        self.assignment.as_ref()
    }

    pub fn cnf(&self) -> &Cnf {
        &self.cnf
    }

    pub(crate) fn cnf_mut(&mut self) -> &mut Cnf {
        &mut self.cnf
    }

    pub(crate) fn solve(&mut self, assumptions: &[i32]) -> Result<bool> {
        let mut solver = Solver::new();
        for clause in self.cnf.clauses() {
            let lits: Vec<Lit> = clause.iter().map(|&l| Lit::from_dimacs(l as isize)).collect();
            solver.add_clause(&lits);
        }
        if !assumptions.is_empty() {
            let lits: Vec<Lit> =
                assumptions.iter().map(|&l| Lit::from_dimacs(l as isize)).collect();
            solver.assume(&lits);
        }
        let sat = solver.solve().map_err(|e| Error::Solver(e.to_string()))?;
        if sat {
            let mut map = AssignmentMap::default();
            for lit in solver.model().unwrap_or_default() {
                let var = lit.to_dimacs().unsigned_abs() as i32;
                if let Some(name) = self.cnf.symbol_name(var) {
                    map.insert(name, lit.is_positive());
                }
            }
            self.assignment = Some(map);
        }
        Ok(sat)
    }

    /// Run the external DIMACS minimizer over the current (unsatisfiable)
    /// clause set and keep a readable rendering of the reduced formula.
    ///
    /// Returns `Ok(false)` and logs when the tool's output does not look
    /// like reduced DIMACS; the defect verdict is unaffected either way.
    pub fn check_mus(&mut self, tool: &str) -> Result<bool> {
        // The minimizer may exit before consuming all of its stdin; the Rust
        // runtime ignores SIGPIPE, so the write then just errors out.
        let mut child = Command::new(tool)
            .arg("-")
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        {
            let stdin = child.stdin.take().expect("child stdin is piped");
            let mut writer = std::io::BufWriter::new(stdin);
            writeln!(writer, "p cnf {} {}", self.cnf.var_count(), self.cnf.clause_count())?;
            for clause in self.cnf.clauses() {
                for lit in clause {
                    write!(writer, "{lit} ")?;
                }
                writeln!(writer, "0")?;
            }
            // dropping the writer closes the pipe before we read
        }
        let output = child.wait_with_output()?;
        let text = String::from_utf8_lossy(&output.stdout);
        // drop the result word on the first line, the rest is reduced DIMACS
        let rest = text.split_once('\n').map(|(_, rest)| rest).unwrap_or("");
        let mut iter = rest.split_whitespace();
        if iter.next() != Some("p") || iter.next() != Some("cnf") {
            log::error!("mismatched output format, skipping MUS analysis");
            return Ok(false);
        }
        let vars: i32 = iter
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| Error::MusFormat("bad variable count".into()))?;
        let clause_count: usize = iter
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| Error::MusFormat("bad clause count".into()))?;

        // Rebuild a readable conjunction of disjunctions. Gate variables
        // introduced by the Tseitin transform have no symbol name and are
        // left out, so the rendering can be incomplete.
        let mut formula = UniqueStringJoiner::new();
        let mut clause = StringJoiner::new();
        for token in iter {
            let lit: i32 = token.parse().map_err(|_| Error::MusFormat("bad literal".into()))?;
            if lit != 0 {
                if let Some(name) = self.cnf.symbol_name(lit) {
                    if lit < 0 {
                        clause.push(format!("!{name}"));
                    } else {
                        clause.push(name.to_string());
                    }
                }
                continue;
            }
            if !clause.is_empty() {
                formula.push(format!("({})", clause.join(" v ")));
                clause.clear();
            }
        }
        self.mus = Some(MusData {
            formula: formula.join(" ^ "),
            vars,
            clauses: clause_count,
            orig_vars: self.cnf.var_count(),
            orig_clauses: self.cnf.clause_count(),
        });
        Ok(true)
    }

    /// Write the reduced formula produced by [`Self::check_mus`].
    pub fn write_mus<W: IoWrite>(&self, out: &mut W, statistics: bool) -> std::io::Result<()> {
        let Some(mus) = &self.mus else { return Ok(()) };
        if statistics {
            writeln!(out, "ATTENTION: This formula _might_ be incomplete or even inconclusive!")?;
            writeln!(out, "Minimized Formula from:")?;
            writeln!(out, "p cnf {} {}", mus.orig_vars, mus.orig_clauses)?;
            writeln!(out, "to")?;
            writeln!(out, "p cnf {} {}", mus.vars, mus.clauses)?;
        }
        writeln!(out, "{}", mus.formula)?;
        Ok(())
    }
}

/// Re-checks one fixed base expression under varying symbol selections.
///
/// The base formula is encoded once with `Bound` constants; every
/// [`Self::check`] pushes the given symbols as assumptions, so the clause
/// set never grows between calls.
pub struct BaseExpressionChecker {
    inner: SatChecker,
}

impl BaseExpressionChecker {
    pub fn new(base_expression: &str, model: Option<&dyn ConfigurationModel>) -> Result<Self> {
        let mut inner = SatChecker::for_model(model);
        if !base_expression.trim().is_empty() {
            let parsed = expr::parse(base_expression)?;
            inner.cnf_mut().add_formula(&parsed, ConstantPolicy::Bound);
        }
        Ok(Self { inner })
    }

    /// Decide the base expression with every listed symbol assumed to the
    /// given polarity.
    pub fn check(&mut self, assumptions: &[(&str, bool)]) -> Result<bool> {
        let lits: Vec<i32> = assumptions
            .iter()
            .map(|&(name, polarity)| {
                let var = self.inner.cnf_mut().var_for(name);
                if polarity {
                    var
                } else {
                    -var
                }
            })
            .collect();
        self.inner.solve(&lits)
    }

    pub fn assignment(&self) -> Option<&AssignmentMap> {
        self.inner.assignment()
    }
}

/// Collect the block numbers enabled in this assignment.
///
/// Index 0 stands for the whole file (`B00`), block `B<n>` sits at index
/// `n + 1`. Bits are only ever set.
pub fn enabled_blocks(assignment: &AssignmentMap, blocks: &mut [bool]) {
    for (name, value) in assignment.iter() {
        if !value || !symbol::is_block_symbol(name) {
            continue;
        }
        if name == "B00" {
            blocks[0] = true;
            continue;
        }
        if let Ok(n) = name[1..].parse::<usize>() {
            if n + 1 < blocks.len() {
                blocks[n + 1] = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_sat_and_unsat() {
        assert!(SatChecker::decide("A && !B").unwrap());
        assert!(!SatChecker::decide("A && !A").unwrap());
        assert!(SatChecker::decide("( A -> B ) && A").unwrap());
        assert!(!SatChecker::decide("( A <-> ! B ) && ( A <-> B )").unwrap());
    }

    #[test]
    fn incremental_checks_conjoin() {
        let mut sc = SatChecker::new();
        assert!(sc.check("A || B").unwrap());
        assert!(sc.check("!A").unwrap());
        assert!(!sc.check("!B").unwrap());
    }

    #[test]
    fn empty_formula_re_solves() {
        let mut sc = SatChecker::new();
        assert!(sc.check("").unwrap());
        assert!(!sc.check("A && !A").unwrap());
        assert!(!sc.check("").unwrap());
    }

    #[test]
    fn assignment_satisfies_formula() {
        let formula = "( A -> B ) && ( C <-> ! A ) && A";
        let mut sc = SatChecker::new();
        assert!(sc.check(formula).unwrap());
        let assignment = sc.assignment().unwrap().clone();
        let parsed = expr::parse(formula).unwrap();
        assert!(parsed.eval(&|name| assignment.enabled(name)));
    }

    #[test]
    fn free_constants_are_unconstrained() {
        // under the free policy a block guarded by 0 is still selectable
        assert!(SatChecker::decide("B1 && ( B1 <-> 0 )").unwrap());
    }

    #[test]
    fn syntax_errors_are_reported() {
        let mut sc = SatChecker::new();
        assert!(matches!(sc.check("A &&"), Err(Error::Formula { .. })));
    }

    #[test]
    fn base_expression_checker_uses_assumptions() {
        let mut bc = BaseExpressionChecker::new("( A -> B ) && ( B -> ! C )", None).unwrap();
        assert!(bc.check(&[("A", true)]).unwrap());
        assert!(!bc.check(&[("A", true), ("C", true)]).unwrap());
        // assumptions do not stick
        assert!(bc.check(&[("C", true)]).unwrap());
    }

    #[test]
    fn bound_constants_pin_truth_values() {
        let mut bc = BaseExpressionChecker::new("A <-> 0", None).unwrap();
        assert!(bc.check(&[("A", false)]).unwrap());
        assert!(!bc.check(&[("A", true)]).unwrap());
    }

    #[test]
    fn enabled_blocks_collects_set_bits() {
        let mut am = AssignmentMap::default();
        am.insert("B00", true);
        am.insert("B0", true);
        am.insert("B2", true);
        am.insert("B1", false);
        am.insert("CONFIG_FOO", true);
        let mut blocks = vec![false; 4];
        enabled_blocks(&am, &mut blocks);
        assert_eq!(blocks, vec![true, true, false, true]);
    }
}
