//! Renderings of a satisfying assignment.
//!
//! A raw assignment talks about every solver variable: block variables,
//! option symbols, module twins, file variables, replacement symbols. Each
//! formatter projects that map onto one audience: a partial kconfig
//! selection, `-D` flags for the preprocessor, the source with disabled
//! blocks commented out, or plain `name=0|1` dumps.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::OnceLock;

use regex::Regex;

use crate::block::CppFile;
use crate::model::ConfigurationModel;
use crate::sat::AssignmentMap;
use crate::symbol;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    No,
    Yes,
    Module,
}

impl State {
    fn of(value: bool) -> Self {
        if value {
            State::Yes
        } else {
            State::No
        }
    }

    fn letter(self) -> char {
        match self {
            State::No => 'n',
            State::Yes => 'y',
            State::Module => 'm',
        }
    }
}

fn module_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^CONFIG_(.*)_MODULE$").unwrap())
}

fn item_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^CONFIG_(.*[^.])$").unwrap())
}

/// Render the assignment as a partial kconfig selection.
///
/// A set `CONFIG_X_MODULE` folds into `CONFIG_X=m`; block and choice
/// variables are dropped; value-typed options (integer, hex, string) are
/// dropped; symbols from the missing set are emitted as comments.
pub fn format_kconfig<W: Write>(
    assignment: &AssignmentMap,
    out: &mut W,
    missing: &BTreeSet<String>,
    model: Option<&dyn ConfigurationModel>,
) -> std::io::Result<usize> {
    let mut selection: BTreeMap<String, State> = BTreeMap::new();
    let mut other: BTreeMap<String, State> = BTreeMap::new();

    for (name, value) in assignment.iter() {
        if value {
            if let Some(caps) = module_regex().captures(name) {
                let basename = format!("CONFIG_{}", &caps[1]);
                if missing.contains(&basename) || missing.contains(name) {
                    log::debug!("ignoring missing module item {name}");
                    other.insert(basename, State::Yes);
                } else {
                    selection.insert(basename, State::Module);
                }
                continue;
            }
        }
        if name.starts_with("CONFIG_CHOICE_") {
            other.insert(name.to_string(), State::of(value));
            continue;
        }
        if item_regex().is_match(name) {
            if missing.contains(name) {
                log::debug!("ignoring missing item {name}");
                other.insert(name.to_string(), State::of(value));
                continue;
            }
            if name.ends_with("_MODULE") {
                // unset module twin, the base name carries the selection
                continue;
            }
            if let Some(model) = model {
                let ty = model.get_type(name);
                if matches!(ty.as_str(), "INTEGER" | "HEX" | "STRING") {
                    log::debug!("ignoring non-boolean item {name}");
                    continue;
                }
            }
            selection.entry(name.to_string()).or_insert(State::of(value));
            continue;
        }
        if symbol::is_block_symbol(name) {
            continue;
        }
        other.insert(name.to_string(), State::of(value));
    }

    for (item, state) in &selection {
        writeln!(out, "{item}={}", state.letter())?;
    }
    for (item, state) in &other {
        if item.ends_with("_MODULE")
            || item.starts_with("CONFIG_CHOICE_")
            || symbol::is_free_symbol(item)
            || item == "CONFIG_n"
            || item == "CONFIG_y"
            || selection.contains_key(item)
        {
            continue;
        }
        writeln!(out, "# {item}={}", state.letter())?;
    }
    Ok(selection.len())
}

/// Every assigned symbol of the model's configuration space, `name=0|1`.
pub fn format_model<W: Write>(
    assignment: &AssignmentMap,
    out: &mut W,
    model: Option<&dyn ConfigurationModel>,
) -> std::io::Result<usize> {
    let mut items = 0;
    for (name, value) in assignment.iter() {
        if let Some(model) = model {
            if !model.in_configuration_space(name) {
                continue;
            }
        }
        writeln!(out, "{name}={}", if value { 1 } else { 0 })?;
        items += 1;
    }
    Ok(items)
}

/// Every assignment, `name=0|1`.
pub fn format_all<W: Write>(assignment: &AssignmentMap, out: &mut W) -> std::io::Result<usize> {
    for (name, value) in assignment.iter() {
        writeln!(out, "{name}={}", if value { 1 } else { 0 })?;
    }
    Ok(assignment.len())
}

/// The positive assignments as preprocessor flags, `-Dname=1` each.
pub fn format_cpp<W: Write>(
    assignment: &AssignmentMap,
    out: &mut W,
    model: Option<&dyn ConfigurationModel>,
) -> std::io::Result<usize> {
    for (name, value) in assignment.iter() {
        if symbol::is_block_symbol(name) {
            continue;
        }
        // symbols rewritten for an in-file #define are not real cpp flags
        if name.ends_with('.') {
            continue;
        }
        if !symbol::is_valid_identifier(name) {
            continue;
        }
        if let Some(model) = model {
            if !model.in_configuration_space(name) {
                continue;
            }
        }
        if !value {
            continue;
        }
        write!(out, " -D{name}=1")?;
    }
    writeln!(out)?;
    Ok(assignment.len())
}

/// Write the source back with every line belonging to a disabled block
/// prefixed by a comment marker. Directive lines are always commented; the
/// line count of the input is preserved exactly.
pub fn format_commented<W: Write>(
    assignment: &AssignmentMap,
    out: &mut W,
    file: &CppFile,
    source: &str,
) -> std::io::Result<usize> {
    let mut directive_lines: BTreeSet<u32> = BTreeSet::new();
    for (id, block) in file.blocks() {
        if id == file.root() || block.is_dummy() {
            continue;
        }
        directive_lines.insert(block.start().line);
        directive_lines.insert(block.end().line);
    }

    for (index, line) in source.lines().enumerate() {
        let line_number = (index + 1) as u32;
        let commented = if directive_lines.contains(&line_number) {
            true
        } else {
            let mut block = file.block_at_position(line_number);
            let mut disabled = false;
            while block != file.root() {
                if !assignment.enabled(file.block(block).name()) {
                    disabled = true;
                    break;
                }
                block = file.block(block).parent().unwrap_or_else(|| file.root());
            }
            disabled
        };
        if commented {
            writeln!(out, "// {line}")?;
        } else {
            writeln!(out, "{line}")?;
        }
    }
    Ok(assignment.len())
}

/// Write the cpp-flag, commented-source and kconfig renderings side by
/// side as `<source>.cppflags<n>`, `<source>.source<n>`, `<source>.config<n>`.
pub fn format_combined(
    assignment: &AssignmentMap,
    file: &CppFile,
    source: &str,
    model: Option<&dyn ConfigurationModel>,
    missing: &BTreeSet<String>,
    number: usize,
) -> std::io::Result<usize> {
    let flags = File::create(format!("{}.cppflags{}", file.filename(), number))?;
    format_cpp(assignment, &mut BufWriter::new(flags), model)?;

    let commented = File::create(format!("{}.source{}", file.filename(), number))?;
    format_commented(assignment, &mut BufWriter::new(commented), file, source)?;

    let config = File::create(format!("{}.config{}", file.filename(), number))?;
    format_kconfig(assignment, &mut BufWriter::new(config), missing, model)?;

    Ok(assignment.len())
}

/// Print what several assignments agree on, then their differences.
pub fn pretty_print_assignments<W: Write>(
    out: &mut W,
    solutions: &[AssignmentMap],
    model: Option<&dyn ConfigurationModel>,
    missing: &BTreeSet<String>,
) -> std::io::Result<()> {
    writeln!(out, "I: Found {} assignments", solutions.len())?;
    writeln!(out, "I: Entries in missingSet: {}", missing.len())?;

    let in_space = |name: &str| match model {
        Some(model) => model.in_configuration_space(name),
        None => true,
    };

    let mut common: BTreeMap<String, bool> = BTreeMap::new();
    if let Some(first) = solutions.first() {
        for (name, value) in first.iter() {
            if in_space(name) {
                common.insert(name.to_string(), value);
            }
        }
        for solution in &solutions[1..] {
            common.retain(|name, value| solution.get(name) == Some(*value));
        }
    }

    writeln!(out, "I: In all assignments the following symbols are equally set")?;
    for (name, value) in &common {
        writeln!(out, "{name}={}", if *value { 1 } else { 0 })?;
    }

    writeln!(out, "I: All differences in the assignments")?;
    for (index, solution) in solutions.iter().enumerate() {
        writeln!(out, "I: Config {index}")?;
        for (name, value) in solution.iter() {
            if !in_space(name) || common.contains_key(name) {
                continue;
            }
            writeln!(out, "{name}={}", if value { 1 } else { 0 })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_source;

    fn render_kconfig(assignment: &AssignmentMap, missing: &BTreeSet<String>) -> String {
        let mut buf = Vec::new();
        format_kconfig(assignment, &mut buf, missing, None).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn module_assignment_folds_to_m() {
        let mut am = AssignmentMap::default();
        am.insert("CONFIG_ACPI_MODULE", true);
        am.insert("CONFIG_ACPI", false);
        let out = render_kconfig(&am, &BTreeSet::new());
        assert!(out.contains("CONFIG_ACPI=m"));
        assert!(!out.contains("CONFIG_ACPI=y"));
        assert!(!out.contains("CONFIG_ACPI=n"));
    }

    #[test]
    fn block_and_choice_variables_are_suppressed() {
        let mut am = AssignmentMap::default();
        am.insert("B0", true);
        am.insert("B00", true);
        am.insert("CONFIG_CHOICE_42", true);
        am.insert("CONFIG_USB", true);
        let out = render_kconfig(&am, &BTreeSet::new());
        assert_eq!(out, "CONFIG_USB=y\n");
    }

    #[test]
    fn missing_items_become_comments() {
        let mut am = AssignmentMap::default();
        am.insert("CONFIG_GONE", true);
        am.insert("CONFIG_HERE", false);
        let missing: BTreeSet<String> = ["CONFIG_GONE".to_string()].into();
        let out = render_kconfig(&am, &missing);
        assert!(out.contains("CONFIG_HERE=n"));
        assert!(out.contains("# CONFIG_GONE=y"));
    }

    #[test]
    fn cpp_flags_take_only_positive_real_symbols() {
        let mut am = AssignmentMap::default();
        am.insert("CONFIG_A", true);
        am.insert("CONFIG_B", false);
        am.insert("B1", true);
        am.insert("FOO.", true);
        let mut buf = Vec::new();
        format_cpp(&am, &mut buf, None).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), " -DCONFIG_A=1\n");
    }

    #[test]
    fn format_all_dumps_everything() {
        let mut am = AssignmentMap::default();
        am.insert("A", true);
        am.insert("B", false);
        let mut buf = Vec::new();
        let n = format_all(&am, &mut buf).unwrap();
        assert_eq!(n, 2);
        assert_eq!(String::from_utf8(buf).unwrap(), "A=1\nB=0\n");
    }

    #[test]
    fn commented_source_preserves_line_count() {
        let source = "#ifdef CONFIG_A\nint a;\n#else\nint b;\n#endif\nint tail;\n";
        let file = parse_source(source, "c.c", "", false);
        let mut am = AssignmentMap::default();
        am.insert("B00", true);
        am.insert("B0", true);
        am.insert("B1", false);

        let mut buf = Vec::new();
        format_commented(&am, &mut buf, &file, source).unwrap();
        let out = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "// #ifdef CONFIG_A");
        assert_eq!(lines[1], "int a;");
        assert_eq!(lines[2], "// #else");
        assert_eq!(lines[3], "// int b;");
        assert_eq!(lines[4], "// #endif");
        assert_eq!(lines[5], "int tail;");
    }

    #[test]
    fn pretty_print_separates_common_and_diff() {
        let mut one = AssignmentMap::default();
        one.insert("CONFIG_A", true);
        one.insert("CONFIG_B", true);
        let mut two = AssignmentMap::default();
        two.insert("CONFIG_A", true);
        two.insert("CONFIG_B", false);

        let mut buf = Vec::new();
        pretty_print_assignments(&mut buf, &[one, two], None, &BTreeSet::new()).unwrap();
        let out = String::from_utf8(buf).unwrap();
        let common_at = out.find("equally set").unwrap();
        let diff_at = out.find("All differences").unwrap();
        assert!(out[common_at..diff_at].contains("CONFIG_A=1"));
        assert!(out[diff_at..].contains("CONFIG_B=1"));
        assert!(out[diff_at..].contains("CONFIG_B=0"));
    }
}
