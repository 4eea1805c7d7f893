//! The defect classifier: dead and undead analysis with escalation.
//!
//! For every candidate block the analyzer first tries to prove it *dead*
//! (never compiled), then *undead* (never removable). Each polarity walks
//! the same escalation ladder: code constraints only, then the model slice
//! (`kconfig`), then the build-system precondition (`kbuild`), then the
//! grounded missing symbols (`missing`). The first unsatisfiable step
//! yields the verdict; satisfiable steps conjoin their increment and
//! escalate.
//!
//! A verdict against the main model is then cross-checked against every
//! other loaded model to decide whether the defect is global or local;
//! code-only and no-kconfig contradictions skip the cross-check, they hold
//! everywhere by construction.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use crate::block::{BlockId, BuildConditionProvider, CppFile, FilePresenceProvider};
use crate::error::Result;
use crate::joiner::StringJoiner;
use crate::model::{missing_items_constraint, ConfigurationModel, ModelRegistry};
use crate::sat::SatChecker;
use crate::symbol;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefectKind {
    None,
    Implementation,
    Configuration,
    Referential,
    NoKconfig,
    BuildSystem,
}

impl DefectKind {
    /// Short kind tag used in report filenames.
    pub fn as_str(self) -> &'static str {
        match self {
            DefectKind::None => "",
            DefectKind::Implementation => "code",
            DefectKind::Configuration => "kconfig",
            DefectKind::Referential => "missing",
            DefectKind::NoKconfig => "no_kconfig",
            DefectKind::BuildSystem => "kbuild",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Dead,
    Undead,
}

impl Polarity {
    pub fn as_str(self) -> &'static str {
        match self {
            Polarity::Dead => "dead",
            Polarity::Undead => "undead",
        }
    }
}

/// One classified block.
#[derive(Debug)]
pub struct BlockDefect {
    block: BlockId,
    kind: DefectKind,
    polarity: Polarity,
    global: bool,
    formula: String,
    mus_formula: Option<String>,
    arch_kinds: BTreeMap<String, &'static str>,
}

impl BlockDefect {
    fn new(block: BlockId, polarity: Polarity) -> Self {
        Self {
            block,
            kind: DefectKind::None,
            polarity,
            global: false,
            formula: String::new(),
            mus_formula: None,
            arch_kinds: BTreeMap::new(),
        }
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    pub fn kind(&self) -> DefectKind {
        self.kind
    }

    pub fn polarity(&self) -> Polarity {
        self.polarity
    }

    pub fn is_global(&self) -> bool {
        self.global
    }

    /// The formula proved unsatisfiable for this verdict.
    pub fn formula(&self) -> &str {
        &self.formula
    }

    /// Per-architecture verdict steps, filled by model checks.
    pub fn arch_kinds(&self) -> &BTreeMap<String, &'static str> {
        &self.arch_kinds
    }

    /// Code-only and no-kconfig contradictions hold under every model.
    fn needs_crosscheck(&self) -> bool {
        !matches!(
            self.kind,
            DefectKind::None | DefectKind::Implementation | DefectKind::NoKconfig
        ) && !self.global
    }

    /// `<source>.<block>.<kind>.<scope>.<polarity>`
    pub fn report_filename(&self, file: &CppFile) -> String {
        let mut parts = StringJoiner::new();
        parts.push(file.filename());
        parts.push(file.block(self.block).name());
        parts.push(self.kind.as_str());
        if self.global || self.kind == DefectKind::NoKconfig {
            parts.push("globally");
        } else {
            parts.push("locally");
        }
        parts.push(self.polarity.as_str());
        parts.join(".")
    }
}

/// Configuration and collaborators of one analysis run.
pub struct DefectAnalyzer<'a> {
    registry: &'a ModelRegistry,
    provider: &'a dyn BuildConditionProvider,
    skip_no_kconfig: bool,
    mus_tool: Option<String>,
}

impl<'a> DefectAnalyzer<'a> {
    pub fn new(registry: &'a ModelRegistry) -> Self {
        static DEFAULT_PROVIDER: FilePresenceProvider = FilePresenceProvider;
        Self {
            registry,
            provider: &DEFAULT_PROVIDER,
            skip_no_kconfig: false,
            mus_tool: None,
        }
    }

    pub fn with_provider(mut self, provider: &'a dyn BuildConditionProvider) -> Self {
        self.provider = provider;
        self
    }

    /// Suppress `no_kconfig` reports when writing.
    pub fn skip_no_kconfig(mut self, skip: bool) -> Self {
        self.skip_no_kconfig = skip;
        self
    }

    /// Request `.mus` sibling reports, minimized by the named DIMACS tool.
    pub fn with_mus_tool(mut self, tool: Option<String>) -> Self {
        self.mus_tool = tool;
        self
    }

    /// Classify every real block of the file. Failures are confined to the
    /// affected block: logged, skipped, analysis continues.
    pub fn analyze_file(&self, file: &CppFile) -> Vec<BlockDefect> {
        let mut verdicts = Vec::new();
        let mut kinds: HashMap<BlockId, DefectKind> = HashMap::new();
        for (id, block) in file.blocks() {
            if id == file.root() || block.is_dummy() {
                continue;
            }
            match self.analyze_block(file, id, &kinds) {
                Ok(Some(defect)) => {
                    kinds.insert(id, defect.kind);
                    verdicts.push(defect);
                }
                Ok(None) => {
                    kinds.insert(id, DefectKind::None);
                }
                Err(e) => {
                    log::error!(
                        "couldn't process {}:{}: {}",
                        file.filename(),
                        file.block(id).name(),
                        e
                    );
                }
            }
        }
        verdicts
    }

    /// Classify a single block; `None` means the block is fine.
    pub fn analyze_block(
        &self,
        file: &CppFile,
        id: BlockId,
        kinds: &HashMap<BlockId, DefectKind>,
    ) -> Result<Option<BlockDefect>> {
        let main_model = self.registry.main_model();

        let mut defect = BlockDefect::new(id, Polarity::Dead);
        if !self.is_defect(file, &mut defect, main_model, true)? {
            // not dead; a block without a parent cannot be undead either
            if file.block(id).parent().is_none() {
                return Ok(None);
            }
            defect = BlockDefect::new(id, Polarity::Undead);
            if !self.is_defect(file, &mut defect, main_model, true)? {
                return Ok(None);
            }
        }
        debug_assert!(defect.kind != DefectKind::None);

        if self.is_no_kconfig_defect(file, &defect, kinds) {
            defect.kind = DefectKind::NoKconfig;
        }

        // architecture-specific files cannot be built elsewhere, the defect
        // cannot be contradicted by another model
        if !file.arch().is_empty() {
            defect.global = true;
            return Ok(Some(defect));
        }
        if main_model.is_none() || !defect.needs_crosscheck() {
            return Ok(Some(defect));
        }
        let main_arch = self.registry.main_arch();
        for (arch, model) in self.registry.models() {
            if Some(arch) == main_arch {
                continue;
            }
            if !self.is_defect(file, &mut defect, Some(model), false)? {
                return Ok(Some(defect));
            }
        }
        defect.global = true;
        Ok(Some(defect))
    }

    /// One walk of the escalation ladder for one polarity and one model.
    ///
    /// Sets the defect kind, formula and per-arch step on success. The
    /// formula proved by the first unsatisfiable step against the main
    /// model is kept for MUS reporting and never recomputed.
    fn is_defect(
        &self,
        file: &CppFile,
        defect: &mut BlockDefect,
        model: Option<&dyn ConfigurationModel>,
        is_main: bool,
    ) -> Result<bool> {
        let block = file.block(defect.block);
        let code_formula = file.code_constraints(defect.block);

        let mut parts = StringJoiner::new();
        match defect.polarity {
            Polarity::Dead => parts.push(block.name().to_string()),
            Polarity::Undead => {
                let Some(parent) = block.parent() else { return Ok(false) };
                parts.push(format!("( {} && ! {} )", file.block(parent).name(), block.name()));
            }
        }
        parts.push(code_formula.clone());
        defect.formula = parts.join("\n&&\n");

        let mut checker = SatChecker::new();
        if !checker.check(&defect.formula)? {
            defect.kind = DefectKind::Implementation;
            defect.global = true;
            if defect.polarity == Polarity::Dead {
                defect.mus_formula = Some(defect.formula.clone());
            }
            return Ok(true);
        }
        let Some(model) = model else { return Ok(false) };

        // configuration step: the model slice for the code formula
        let mut missing = BTreeSet::new();
        let mut slice = String::new();
        let checker_fn = file.define_checker();
        let seen_items =
            model.do_intersect(&code_formula, Some(&checker_fn), &mut missing, &mut slice, None);
        parts.push(slice.clone());
        if model.version_identifier() == "cnf" {
            checker.load_cnf_model(model);
        }
        if !checker.check(&slice)? {
            defect.formula = parts.join("\n&&\n");
            if is_main && defect.polarity == Polarity::Dead {
                defect.mus_formula = Some(defect.formula.clone());
            }
            if defect.kind != DefectKind::BuildSystem {
                defect.kind = DefectKind::Configuration;
            }
            defect.arch_kinds.entry(model.name().to_string()).or_insert("kconfig");
            return Ok(true);
        }

        // build-system step: the file precondition and its slice
        let precondition = file.build_system_condition(self.provider);
        let mut build_slice = String::new();
        model.do_intersect(
            &precondition,
            None,
            &mut missing,
            &mut build_slice,
            Some(&seen_items),
        );
        let mut build_formula = build_slice;
        if !build_formula.is_empty() {
            build_formula.push_str("\n&& ");
        }
        build_formula.push_str(&precondition);
        parts.push(build_formula.clone());
        if !checker.check(&build_formula)? {
            defect.formula = parts.join("\n&&\n");
            if is_main && defect.polarity == Polarity::Dead {
                defect.mus_formula = Some(defect.formula.clone());
            }
            defect.kind = DefectKind::BuildSystem;
            defect.arch_kinds.entry(model.name().to_string()).or_insert("kbuild");
            return Ok(true);
        }

        // an incomplete model cannot ground missing symbols
        if !model.is_complete() {
            return Ok(false);
        }
        let missing_formula = missing_items_constraint(&missing);
        if !checker.check(&missing_formula)? {
            parts.push(missing_formula);
            defect.formula = parts.join("\n&&\n");
            if is_main && defect.polarity == Polarity::Dead {
                defect.mus_formula = Some(defect.formula.clone());
            }
            if defect.kind != DefectKind::Configuration && defect.kind != DefectKind::BuildSystem {
                defect.kind = DefectKind::Referential;
            }
            defect.arch_kinds.entry(model.name().to_string()).or_insert("missing");
            return Ok(true);
        }
        Ok(false)
    }

    /// A proved contradiction that never touches the configuration space of
    /// any loaded model is reclassified as `no_kconfig`.
    fn is_no_kconfig_defect(
        &self,
        file: &CppFile,
        defect: &BlockDefect,
        kinds: &HashMap<BlockId, DefectKind>,
    ) -> bool {
        if self.registry.main_model().is_none() {
            return true;
        }
        let block = file.block(defect.block);
        let expression = if block.is_else() {
            // an #else has no expression of its own; it is configuration
            // free iff every prior arm of the chain was
            let mut prev = block.prev();
            while let Some(id) = prev {
                if kinds.get(&id) != Some(&DefectKind::NoKconfig) {
                    return false;
                }
                prev = file.block(id).prev();
            }
            return true;
        } else if defect.block == file.root() {
            defect.formula.clone()
        } else {
            block.expression().to_string()
        };
        for item in symbol::items_of_string(&expression) {
            if self.registry.in_any_configuration_space(&item) {
                return false;
            }
        }
        true
    }

    /// Write the report file for one verdict; returns the path, or `None`
    /// when the verdict is suppressed.
    pub fn write_report(&self, file: &CppFile, defect: &BlockDefect) -> Option<PathBuf> {
        if defect.kind == DefectKind::None
            || (self.skip_no_kconfig && defect.kind == DefectKind::NoKconfig)
        {
            return None;
        }
        let filename = defect.report_filename(file);
        let block = file.block(defect.block);
        let mut out = match File::create(&filename) {
            Ok(out) => out,
            Err(e) => {
                log::error!("failed to open {filename} for writing: {e}");
                return None;
            }
        };
        log::info!("creating {filename}");
        let result = (|| -> std::io::Result<()> {
            writeln!(
                out,
                "#{}:{}:{}:{}:{}:{}:{}:",
                block.name(),
                file.filename(),
                block.start().line,
                block.start().column,
                file.filename(),
                block.end().line,
                block.end().column,
            )?;
            writeln!(out, "{}", defect.formula)?;
            if !defect.global && !defect.arch_kinds.is_empty() {
                writeln!(out)?;
                writeln!(out, "Arch -> Defect Type:")?;
                for (arch, kind) in &defect.arch_kinds {
                    writeln!(out, "{arch} -> {kind}")?;
                }
            }
            Ok(())
        })();
        if let Err(e) = result {
            log::error!("failed to write {filename}: {e}");
            return None;
        }
        let path = PathBuf::from(filename);
        if defect.polarity == Polarity::Dead {
            self.write_mus_report(file, defect, &path);
        }
        Some(path)
    }

    /// Minimize the stored unsat formula and write the `.mus` sibling; any
    /// failure leaves the defect report standing.
    fn write_mus_report(&self, file: &CppFile, defect: &BlockDefect, report: &PathBuf) {
        let Some(tool) = &self.mus_tool else { return };
        let Some(mus_formula) = &defect.mus_formula else { return };
        let main_model = self.registry.main_model();
        let mut checker = SatChecker::for_model(main_model);
        let run = (|| -> Result<bool> {
            checker.check(mus_formula)?;
            checker.check_mus(tool)
        })();
        match run {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                log::error!(
                    "MUS analysis failed for {}:{}: {}",
                    file.filename(),
                    file.block(defect.block).name(),
                    e
                );
                return;
            }
        }
        let mut filename = report.clone().into_os_string();
        filename.push(".mus");
        let path = PathBuf::from(filename);
        let mut out = match File::create(&path) {
            Ok(out) => out,
            Err(e) => {
                log::error!("failed to open {} for writing: {e}", path.display());
                return;
            }
        };
        log::info!("creating {}", path.display());
        if let Err(e) = checker.write_mus(&mut out, true) {
            log::error!("failed to write {}: {e}", path.display());
        }
    }
}

/// The full precondition of one block: code constraints plus, when a model
/// is given, the build condition, the model slice and (for complete
/// models) the grounded missing symbols.
pub fn block_precondition(
    file: &CppFile,
    id: BlockId,
    model: Option<&dyn ConfigurationModel>,
    provider: &dyn BuildConditionProvider,
) -> String {
    let mut formula = StringJoiner::new();
    let code_formula = file.code_constraints(id);
    formula.push(file.block(id).name().to_string());
    formula.push(code_formula.clone());

    if let Some(model) = model {
        let build_condition = file.build_system_condition(provider);
        let combined = format!("{code_formula} && {build_condition}");
        formula.push(build_condition);

        let mut missing = BTreeSet::new();
        let mut slice = String::new();
        let checker = file.define_checker();
        model.do_intersect(&combined, Some(&checker), &mut missing, &mut slice, None);
        formula.push(slice);
        if model.is_complete() {
            formula.push(missing_items_constraint(&missing));
        }
    }
    formula.join("\n&& ")
}
