//! Greedy decision coverage: a small set of assignments that together
//! enable every selectable block of a file.
//!
//! The base formula (every block's code constraints, the model slice and,
//! for complete models, the grounded missing symbols) is encoded once;
//! each round assumes one not-yet-covered block and harvests every block
//! the satisfying assignment enables along the way. Blocks whose
//! assumption is unsatisfiable are unreachable and reported as skipped.

use std::collections::BTreeSet;

use crate::block::{BuildConditionProvider, CppFile};
use crate::error::Result;
use crate::joiner::UniqueStringJoiner;
use crate::model::{missing_items_constraint, ConfigurationModel};
use crate::sat::{enabled_blocks, AssignmentMap, BaseExpressionChecker};

/// Result of one coverage run.
#[derive(Debug, Default)]
pub struct CoverageResult {
    pub assignments: Vec<AssignmentMap>,
    pub missing: BTreeSet<String>,
    /// Blocks no assignment can enable.
    pub unreachable: Vec<String>,
}

/// Compute assignments until every selectable block is enabled at least
/// once. The file should have been through
/// [`CppFile::decision_coverage`] if implicit else-arms are to count.
pub fn simple_coverage(
    file: &CppFile,
    model: Option<&dyn ConfigurationModel>,
    provider: &dyn BuildConditionProvider,
) -> Result<CoverageResult> {
    let mut base = UniqueStringJoiner::new();
    for (id, _) in file.blocks() {
        base.push(file.code_constraints(id));
    }
    let mut missing = BTreeSet::new();
    if let Some(model) = model {
        let build_condition = file.build_system_condition(provider);
        let combined = format!("{}\n&& {}", base.join("\n&& "), build_condition);
        base.push(build_condition);

        let mut slice = String::new();
        let checker = file.define_checker();
        model.do_intersect(&combined, Some(&checker), &mut missing, &mut slice, None);
        base.push(slice);
        if model.is_complete() {
            base.push(missing_items_constraint(&missing));
        }
    }

    let mut checker = BaseExpressionChecker::new(&base.join("\n&& "), model)?;
    let mut covered = vec![false; file.block_count() + 1];
    let mut result = CoverageResult { missing, ..Default::default() };

    for (id, block) in file.blocks() {
        let index = if id == file.root() { 0 } else { id };
        if covered[index] {
            continue;
        }
        if !checker.check(&[(block.name(), true)])? {
            result.unreachable.push(block.name().to_string());
            continue;
        }
        let assignment = checker.assignment().cloned().unwrap_or_default();
        enabled_blocks(&assignment, &mut covered);
        covered[index] = true;
        result.assignments.push(assignment);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::FilePresenceProvider;
    use crate::parse::parse_source;

    #[test]
    fn two_branches_need_two_assignments() {
        let source = "#ifdef CONFIG_A\nint a;\n#else\nint b;\n#endif\n";
        let file = parse_source(source, "cov.c", "", false);
        let result = simple_coverage(&file, None, &FilePresenceProvider).unwrap();
        assert!(result.unreachable.is_empty());
        assert_eq!(result.assignments.len(), 2);
        let one_enables_b0 = result.assignments.iter().any(|a| a.enabled("B0"));
        let one_enables_b1 = result.assignments.iter().any(|a| a.enabled("B1"));
        assert!(one_enables_b0 && one_enables_b1);
    }

    #[test]
    fn dead_blocks_are_reported_unreachable() {
        let source = "#ifdef CONFIG_A\n#ifndef CONFIG_A\nint x;\n#endif\n#endif\n";
        let file = parse_source(source, "dead.c", "", false);
        let result = simple_coverage(&file, None, &FilePresenceProvider).unwrap();
        assert!(result.unreachable.contains(&"B1".to_string()));
    }
}
