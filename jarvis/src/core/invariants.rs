//! Plan invariants not expressible via the YAML shape alone.

use std::collections::{HashMap, HashSet};

use crate::plan::Plan;

/// Check semantic plan invariants:
/// - Task numbers are positive
/// - No duplicate task numbers
/// - Dependency keys name declared tasks
/// - Dependencies only reference tasks declared earlier (no self/forward edges)
///
/// Returns stable, human-readable messages (empty on success).
pub fn validate_plan(plan: &Plan) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    let mut position = HashMap::new();

    for (idx, task) in plan.task_list.iter().enumerate() {
        if task.task_num < 1 {
            errors.push(format!("task_num {} must be >= 1", task.task_num));
        }
        if !seen.insert(task.task_num) {
            errors.push(format!("duplicate task_num {}", task.task_num));
            continue;
        }
        position.insert(task.task_num, idx);
        if task.task.trim().is_empty() {
            errors.push(format!("task {}: description must not be empty", task.task_num));
        }
    }

    for (task_num, deps) in &plan.task_dependency {
        let Some(&task_pos) = position.get(task_num) else {
            errors.push(format!(
                "task_dependency references undeclared task {}",
                task_num
            ));
            continue;
        };
        for dep in deps {
            match position.get(dep) {
                None => errors.push(format!(
                    "task {}: dependency {} is not declared",
                    task_num, dep
                )),
                Some(&dep_pos) if dep_pos >= task_pos => errors.push(format!(
                    "task {}: dependency {} must be declared before it",
                    task_num, dep
                )),
                Some(_) => {}
            }
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::plan_with;

    #[test]
    fn valid_plan_has_no_errors() {
        let plan = plan_with(&[(1, "a"), (2, "b"), (3, "c")], &[(2, vec![1]), (3, vec![1, 2])]);
        assert!(validate_plan(&plan).is_empty());
    }

    #[test]
    fn reports_duplicates_forward_and_unknown_edges() {
        let plan = plan_with(
            &[(1, "a"), (2, "b"), (2, "dup")],
            &[(1, vec![2]), (2, vec![9]), (7, vec![1])],
        );
        let errors = validate_plan(&plan);
        assert!(errors.iter().any(|e| e.contains("duplicate task_num 2")));
        assert!(errors.iter().any(|e| e.contains("must be declared before")));
        assert!(errors.iter().any(|e| e.contains("dependency 9 is not declared")));
        assert!(errors.iter().any(|e| e.contains("undeclared task 7")));
    }

    #[test]
    fn rejects_non_positive_task_numbers() {
        let plan = plan_with(&[(0, "a"), (i64::MIN, "b"), (1, "c")], &[]);
        let errors = validate_plan(&plan);
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e == "task_num 0 must be >= 1"));
        assert!(errors.iter().any(|e| e.contains(&i64::MIN.to_string())));
    }

    #[test]
    fn self_dependency_is_a_forward_edge() {
        let plan = plan_with(&[(1, "a")], &[(1, vec![1])]);
        let errors = validate_plan(&plan);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("declared before"));
    }
}
