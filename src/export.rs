//! Export utilities for hierarchy trees and change sets
//!
//! Provides an indented text outline, Graphviz DOT for materialized trees and
//! a Markdown review summary for proposed changes.

use crate::curie::Curie;
use crate::hierarchy::TreeNode;
use crate::reconcile::{ChangeStatus, FlatChange};
use std::collections::HashMap;
use std::fmt::Write;

/// Configuration for DOT export
#[derive(Debug, Clone)]
pub struct DotConfig {
    /// Title for the graph
    pub title: Option<String>,
    /// Include term ids in labels
    pub show_ids: bool,
    /// Labels longer than this are cut
    pub max_label_len: usize,
    /// Stop below this depth (root is 0)
    pub max_depth: Option<usize>,
    /// Orientation: "TB" (top-bottom), "LR" (left-right)
    pub rankdir: String,
}

impl Default for DotConfig {
    fn default() -> Self {
        Self {
            title: None,
            show_ids: true,
            max_label_len: 40,
            max_depth: None,
            rankdir: "LR".to_string(),
        }
    }
}

/// Escape a string for DOT labels
fn escape_dot(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Truncate a string to at most `max_len` characters
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Indented outline, two spaces per level.
///
/// Nodes cut off by `max_depth` show how many children are hidden.
pub fn tree_to_outline(tree: &TreeNode, max_depth: Option<usize>) -> String {
    let mut out = String::new();
    for (node, depth) in tree.walk() {
        if max_depth.is_some_and(|max| depth > max) {
            continue;
        }
        write!(out, "{}{}", "  ".repeat(depth), node.label).unwrap();
        if max_depth == Some(depth) && !node.is_leaf() {
            write!(out, " (+{})", node.children.len()).unwrap();
        }
        writeln!(out).unwrap();
    }
    out
}

/// Convert a materialized tree to DOT format.
///
/// Every tree node becomes its own DOT node, so a term reachable along two
/// paths is drawn twice; such repeated terms are shaded differently.
pub fn tree_to_dot(tree: &TreeNode, config: &DotConfig) -> String {
    let mut dot = String::new();

    writeln!(dot, "digraph Hierarchy {{").unwrap();
    writeln!(dot, "  rankdir={};", config.rankdir).unwrap();
    writeln!(dot, "  node [fontname=\"Arial\" fontsize=10 style=\"filled\"];").unwrap();
    writeln!(dot, "  edge [color=\"#333333\"];").unwrap();

    if let Some(title) = &config.title {
        writeln!(dot, "  label=\"{}\";", escape_dot(title)).unwrap();
        writeln!(dot, "  labelloc=t;").unwrap();
        writeln!(dot, "  fontsize=14;").unwrap();
    }
    writeln!(dot).unwrap();

    let nodes: Vec<(&TreeNode, usize)> = tree
        .walk()
        .into_iter()
        .filter(|(_, depth)| !config.max_depth.is_some_and(|max| *depth > max))
        .collect();

    let mut occurrences: HashMap<&Curie, usize> = HashMap::new();
    for (node, _) in &nodes {
        *occurrences.entry(&node.term_id).or_default() += 1;
    }

    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, (node, _))| (node.path_key.as_str(), i))
        .collect();

    for (i, (node, depth)) in nodes.iter().enumerate() {
        let name = node
            .label
            .split_once(" (")
            .and_then(|(_, rest)| rest.strip_suffix(')'))
            .unwrap_or(node.label.as_str());
        let mut label = truncate(name, config.max_label_len);
        if config.show_ids {
            write!(label, "\n{}", node.term_id).unwrap();
        }

        let shape = if *depth == 0 {
            "house"
        } else if node.is_leaf() {
            "ellipse"
        } else {
            "box"
        };
        let color = if occurrences[&node.term_id] > 1 {
            "#FFE4B5"
        } else if *depth == 0 {
            "#E6E6FA"
        } else {
            "#F5F5F5"
        };

        writeln!(
            dot,
            "  n{} [label=\"{}\" shape=\"{}\" fillcolor=\"{}\"];",
            i,
            escape_dot(&label),
            shape,
            color
        )
        .unwrap();
    }

    writeln!(dot).unwrap();

    for (i, (node, _)) in nodes.iter().enumerate() {
        for child in &node.children {
            if let Some(j) = index.get(child.path_key.as_str()) {
                writeln!(dot, "  n{} -> n{};", i, j).unwrap();
            }
        }
    }

    writeln!(dot, "}}").unwrap();

    dot
}

/// Markdown summary of a change set, grouped by status
pub fn changes_to_markdown(changes: &[FlatChange], title: &str) -> String {
    let mut md = String::new();
    writeln!(md, "## {}\n", title).unwrap();

    if changes.is_empty() {
        writeln!(md, "No changes proposed.").unwrap();
        return md;
    }

    for (status, heading) in [
        (ChangeStatus::Added, "Added"),
        (ChangeStatus::Changed, "Changed"),
        (ChangeStatus::Removed, "Removed"),
    ] {
        let group: Vec<&FlatChange> = changes.iter().filter(|c| c.status == status).collect();
        if group.is_empty() {
            continue;
        }

        writeln!(md, "### {} ({})\n", heading, group.len()).unwrap();
        for change in group {
            let row = &change.row;
            write!(md, "- `{}` {} `{}`", row.database_id, row.disease_name, row.hpo_id).unwrap();
            let mut details = Vec::new();
            if !row.frequency.is_empty() {
                details.push(format!("frequency {}", row.frequency));
            }
            if !row.onset.is_empty() {
                details.push(format!("onset {}", row.onset));
            }
            if !row.reference.is_empty() {
                details.push(format!("ref {}", row.reference));
            }
            if !details.is_empty() {
                write!(md, " ({})", details.join(", ")).unwrap();
            }
            writeln!(md).unwrap();
            if !change.rationale.trim().is_empty() {
                writeln!(md, "  > {}", change.rationale.trim()).unwrap();
            }
        }
        writeln!(md).unwrap();
    }

    md
}
