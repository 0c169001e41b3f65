//! Deterministic selection logic for the task tree.

use crate::tree::TaskNode;

/// First non-terminal node in depth-first pre-order whose children are all
/// terminal (or that has none). This is where a resumed run picks up work.
///
/// Returns `None` if every node is terminal.
pub fn next_open_node(node: &TaskNode) -> Option<&TaskNode> {
    if node.is_terminal() {
        return None;
    }
    for child in &node.children {
        if let Some(found) = next_open_node(child) {
            return Some(found);
        }
    }
    Some(node)
}

/// Render an indented one-line-per-node outline, capped at `max_lines`.
pub fn summarize_tree(root: &TaskNode, max_lines: usize) -> String {
    let mut lines = Vec::new();
    summarize_node(root, 0, &mut lines);
    if lines.len() > max_lines {
        let hidden = lines.len() - max_lines;
        lines.truncate(max_lines);
        lines.push(format!("... ({hidden} more nodes)"));
    }
    lines.join("\n")
}

fn summarize_node(node: &TaskNode, indent: usize, lines: &mut Vec<String>) {
    let marker = if node.is_minimal { " [minimal]" } else { "" };
    lines.push(format!(
        "{}- [{}] {}{}: {}",
        "  ".repeat(indent),
        node.status.as_str(),
        node.id,
        marker,
        node.description
    ));
    for child in &node.children {
        summarize_node(child, indent + 1, lines);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{completed_leaf, leaf, node_with_children};

    #[test]
    fn next_open_node_is_pre_order_and_skips_terminal() {
        let tree = node_with_children(
            "root",
            vec![
                completed_leaf("a", "done"),
                node_with_children("b", vec![leaf("b1")]),
                leaf("c"),
            ],
        );
        let selected = next_open_node(&tree).expect("open node");
        assert_eq!(selected.id, "b1");
    }

    #[test]
    fn parent_is_selected_once_children_are_terminal() {
        let tree = node_with_children("root", vec![completed_leaf("a", "done")]);
        assert_eq!(next_open_node(&tree).map(|n| n.id.as_str()), Some("root"));
    }

    #[test]
    fn summary_is_indented_and_capped() {
        let tree = node_with_children("root", vec![leaf("a"), leaf("b"), leaf("c")]);
        let summary = summarize_tree(&tree, 2);
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("  - [pending] a"));
        assert_eq!(lines[2], "... (2 more nodes)");
    }
}
