//! # coroner: dead and undead conditional-compilation blocks
//!
//! **`coroner`** analyzes the `#if`/`#ifdef`/`#elif`/`#else` structure of
//! C-preprocessor sources and proves, with a SAT solver, which blocks can
//! never be compiled (*dead*) or never be removed (*undead*) under the
//! constraints of one or more configuration-option models. Each verdict
//! names the constraint source that kills the block: the preprocessor
//! expressions themselves (`code`), the option model (`kconfig`), the
//! build-system file selection (`kbuild`), symbols absent from the model
//! (`missing`), or a contradiction that never touches a configurable
//! symbol at all (`no_kconfig`).
//!
//! ## How a check works
//!
//! 1. The directive stream of a source file is parsed into a per-file
//!    block tree ([`block::CppFile`]), macro `#define`s included.
//! 2. For a candidate block, [`block::CppFile::code_constraints`] builds
//!    the propositional precondition of its reachability.
//! 3. The option model ([`model::ConfigurationModel`]) is *intersected*
//!    with that formula: only the implications touching referenced
//!    symbols enter the problem, symbols the model does not know are
//!    collected as *missing*.
//! 4. The SAT adapter ([`sat::SatChecker`]) decides the growing
//!    conjunction; the classifier ([`defect::DefectAnalyzer`]) walks the
//!    escalation ladder and writes a report per verdict, optionally with
//!    a minimized unsatisfiable core alongside.
//!
//! ## Example
//!
//! ```
//! use coroner::defect::DefectAnalyzer;
//! use coroner::model::ModelRegistry;
//! use coroner::parse::parse_source;
//!
//! // an #else that can never be reached: CONFIG_BAR is forced on
//! let file = parse_source(
//!     "#ifdef CONFIG_BAR\nint x;\n#else\nint y;\n#endif\n",
//!     "demo.c",
//!     "",
//!     false,
//! );
//! let registry = ModelRegistry::new(); // no models: code analysis only
//! let analyzer = DefectAnalyzer::new(&registry);
//! let verdicts = analyzer.analyze_file(&file);
//! assert!(verdicts.is_empty()); // both arms are selectable
//! ```
//!
//! Formulas travel between components as plain strings (`&&`, `||`, `!`,
//! `->`, `<->` over symbol names), which keeps every intermediate step
//! printable and diffable; [`sat`] owns the only parser.

pub mod assignment;
pub mod block;
pub mod cnf;
pub mod cnf_model;
pub mod coverage;
pub mod defect;
pub mod error;
pub mod expr;
pub mod joiner;
pub mod model;
pub mod parse;
pub mod rsf;
pub mod rsf_model;
pub mod sat;
pub mod symbol;

pub use error::{Error, Result};
