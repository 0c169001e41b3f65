//! Prompt rendering for worker sessions.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

use crate::tree::TaskNode;

const DECOMPOSE_TEMPLATE: &str = include_str!("prompts/decompose.md");
const SOLVE_TEMPLATE: &str = include_str!("prompts/solve.md");

/// Task fields exposed to templates.
#[derive(Debug, Clone, Serialize)]
struct TaskView<'a> {
    id: &'a str,
    description: &'a str,
    depth: u32,
}

impl<'a> TaskView<'a> {
    fn from_node(node: &'a TaskNode) -> Self {
        Self {
            id: &node.id,
            description: node.description.trim(),
            depth: node.depth,
        }
    }
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("decompose", DECOMPOSE_TEMPLATE)?;
        env.add_template("solve", SOLVE_TEMPLATE)?;
        Ok(Self { env })
    }

    /// Prompt asking the worker to split `node` into subtasks (strict JSON).
    pub fn render_decompose(
        &self,
        node: &TaskNode,
        parent: Option<&str>,
        max_depth: u32,
    ) -> Result<String> {
        let template = self.env.get_template("decompose")?;
        let rendered = template.render(context! {
            task => TaskView::from_node(node),
            parent => parent.map(str::trim).filter(|s| !s.is_empty()),
            max_depth => max_depth,
        })?;
        Ok(rendered)
    }

    /// Prompt asking the worker to solve a minimal `node` directly.
    pub fn render_solve(&self, node: &TaskNode, parent: Option<&str>) -> Result<String> {
        let template = self.env.get_template("solve")?;
        let rendered = template.render(context! {
            task => TaskView::from_node(node),
            parent => parent.map(str::trim).filter(|s| !s.is_empty()),
        })?;
        Ok(rendered)
    }
}
