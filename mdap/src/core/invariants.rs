//! Structural invariants of a task tree.

use crate::tree::{TaskNode, TaskStatus};
use std::collections::HashSet;

/// Check structural invariants:
/// - No duplicate ids
/// - Root has depth 0 and every child is exactly one level deeper
/// - No node deeper than `max_depth`
/// - Minimal nodes have no children
/// - `Completed` nodes carry a result; `result` is only set on `Completed`
pub fn validate_invariants(root: &TaskNode, max_depth: u32) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    if root.depth != 0 {
        errors.push(format!("{}: root depth must be 0, got {}", root.id, root.depth));
    }
    validate_node(root, max_depth, &mut seen, &mut errors, root.id.as_str());
    errors
}

fn validate_node(
    node: &TaskNode,
    max_depth: u32,
    seen: &mut HashSet<String>,
    errors: &mut Vec<String>,
    path: &str,
) {
    if !seen.insert(node.id.clone()) {
        errors.push(format!("duplicate id '{}' at {}", node.id, path));
    }

    if node.depth > max_depth {
        errors.push(format!(
            "{}: depth {} exceeds max_recursion_depth {}",
            path, node.depth, max_depth
        ));
    }

    if node.is_minimal && !node.children.is_empty() {
        errors.push(format!("{}: minimal node must not have children", path));
    }

    match (node.status, node.result.is_some()) {
        (TaskStatus::Completed, false) => {
            errors.push(format!("{}: completed node is missing a result", path));
        }
        (status, true) if status != TaskStatus::Completed => {
            errors.push(format!(
                "{}: result set on a {} node",
                path,
                status.as_str()
            ));
        }
        _ => {}
    }

    for child in &node.children {
        let child_path = format!("{}/{}", path, child.id);
        if child.depth != node.depth + 1 {
            errors.push(format!(
                "{}: depth {} must be parent depth + 1 ({})",
                child_path,
                child.depth,
                node.depth + 1
            ));
        }
        validate_node(child, max_depth, seen, errors, &child_path);
    }
}
