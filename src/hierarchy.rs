//! Path-unique display trees over a multi-parent hierarchy
//!
//! The ontology is a DAG: `Short stature` sits under more than one parent.
//! A display tree cannot share subtrees, so the DAG is unfolded: every distinct
//! root-to-term path becomes its own [`TreeNode`], identified by its
//! `path_key` rather than its term id.
//!
//! Trees are disposable views. They are rebuilt from the ontology whenever
//! needed and never feed back into it.

use crate::curie::Curie;
use crate::ontology::{Ontology, Term};
use serde::Serialize;

/// Error type for tree materialization
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HierarchyError {
    #[error("root term {0} is not in the ontology")]
    UnknownRoot(String),
    #[error("cycle in hierarchy: {}", .path.join(" -> "))]
    CyclicHierarchy { path: Vec<String> },
}

pub type Result<T> = std::result::Result<T, HierarchyError>;

/// One position of a term in the unfolded hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    /// `HP:0004322 (Short stature)`
    pub label: String,
    /// Root-to-node path, unique across the tree
    pub path_key: String,
    pub term_id: Curie,
    pub children: Vec<TreeNode>,
}

/// A search-pruned tree plus the nodes that must be shown open
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilteredTree {
    pub root: TreeNode,
    /// Path keys of every kept node with kept children, in pre-order
    pub expanded: Vec<String>,
}

/// Display label for a term
pub fn term_label(term: &Term) -> String {
    format!("{} ({})", term.id, term.name)
}

fn path_segment(term: &Term) -> String {
    format!("{}{}", term.name, term.id)
}

/// Unfold the hierarchy below `root` into a tree.
///
/// A term reachable along `k` distinct paths appears `k` times, each copy with
/// its own independently built subtree. Fails with
/// [`HierarchyError::CyclicHierarchy`] instead of recursing forever when the
/// relation graph is not acyclic.
pub fn materialize(ontology: &Ontology, root: &Curie) -> Result<TreeNode> {
    let term = ontology
        .term(root)
        .ok_or_else(|| HierarchyError::UnknownRoot(root.to_string()))?;
    let mut on_path: Vec<&Curie> = Vec::new();
    build(ontology, term, None, &mut on_path)
}

/// Materialize one tree per root, in the given order
pub fn materialize_all(ontology: &Ontology, roots: &[Curie]) -> Result<Vec<TreeNode>> {
    roots.iter().map(|root| materialize(ontology, root)).collect()
}

fn build<'a>(
    ontology: &'a Ontology,
    term: &'a Term,
    parent_path: Option<&str>,
    on_path: &mut Vec<&'a Curie>,
) -> Result<TreeNode> {
    if on_path.contains(&&term.id) {
        let mut path: Vec<String> = on_path.iter().map(|c| c.to_string()).collect();
        path.push(term.id.to_string());
        return Err(HierarchyError::CyclicHierarchy { path });
    }

    let path_key = match parent_path {
        Some(parent) => format!("{}/{}", parent, path_segment(term)),
        None => path_segment(term),
    };

    on_path.push(&term.id);
    let mut children = Vec::new();
    for child in ontology.children(&term.id) {
        children.push(build(ontology, child, Some(&path_key), on_path)?);
    }
    on_path.pop();

    Ok(TreeNode {
        label: term_label(term),
        path_key,
        term_id: term.id.clone(),
        children,
    })
}

impl TreeNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Number of nodes in this subtree, including this one
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(TreeNode::node_count).sum::<usize>()
    }

    /// Pre-order traversal yielding `(node, depth)`
    pub fn walk(&self) -> Vec<(&TreeNode, usize)> {
        let mut out = Vec::new();
        let mut stack: Vec<(&TreeNode, usize)> = vec![(self, 0)];
        while let Some((node, depth)) = stack.pop() {
            out.push((node, depth));
            for child in node.children.iter().rev() {
                stack.push((child, depth + 1));
            }
        }
        out
    }

    /// Path keys of every occurrence of a term
    pub fn find_paths(&self, term_id: &Curie) -> Vec<&str> {
        self.walk()
            .into_iter()
            .filter(|(node, _)| &node.term_id == term_id)
            .map(|(node, _)| node.path_key.as_str())
            .collect()
    }

    /// Copy of this subtree cut below `max_depth` (root is depth 0)
    pub fn limit_depth(&self, max_depth: usize) -> TreeNode {
        TreeNode {
            label: self.label.clone(),
            path_key: self.path_key.clone(),
            term_id: self.term_id.clone(),
            children: if max_depth == 0 {
                Vec::new()
            } else {
                self.children
                    .iter()
                    .map(|c| c.limit_depth(max_depth - 1))
                    .collect()
            },
        }
    }
}

/// Prune a tree to the nodes matching `query` and their ancestors.
///
/// Matching is a case-insensitive substring test on the label. A matching
/// node keeps only those children that match or lead to a match. An empty
/// query returns the whole tree with nothing forced open; `None` means
/// nothing matched.
pub fn filter(tree: &TreeNode, query: &str) -> Option<FilteredTree> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Some(FilteredTree {
            root: tree.clone(),
            expanded: Vec::new(),
        });
    }
    let mut expanded = Vec::new();
    prune(tree, &needle, &mut expanded).map(|root| FilteredTree { root, expanded })
}

fn prune(node: &TreeNode, needle: &str, expanded: &mut Vec<String>) -> Option<TreeNode> {
    let slot = expanded.len();
    let children: Vec<TreeNode> = node
        .children
        .iter()
        .filter_map(|child| prune(child, needle, expanded))
        .collect();

    if children.is_empty() && !node.label.to_lowercase().contains(needle) {
        return None;
    }
    if !children.is_empty() {
        // parents precede their descendants
        expanded.insert(slot, node.path_key.clone());
    }
    Some(TreeNode {
        label: node.label.clone(),
        path_key: node.path_key.clone(),
        term_id: node.term_id.clone(),
        children,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::tests::{curie, ontology_from_edges};
    use std::collections::HashSet;

    fn diamond() -> Ontology {
        ontology_from_edges(
            "HP",
            &[
                ("HP:0001", "HP:0000"),
                ("HP:0002", "HP:0000"),
                ("HP:0003", "HP:0001"),
                ("HP:0003", "HP:0002"),
            ],
        )
    }

    #[test]
    fn test_multi_parent_term_appears_once_per_path() {
        let tree = materialize(&diamond(), &curie("HP:0000")).unwrap();

        assert_eq!(tree.node_count() - 1, 4);
        let paths = tree.find_paths(&curie("HP:0003"));
        assert_eq!(paths.len(), 2);
        assert_ne!(paths[0], paths[1]);

        assert_eq!(tree.children[0].term_id, curie("HP:0001"));
        assert_eq!(tree.children[1].term_id, curie("HP:0002"));
        let left = &tree.children[0].children[0];
        let right = &tree.children[1].children[0];
        assert_eq!(left.label, right.label);
        assert_eq!(left.label, "HP:0003 (Term HP:0003)");
        assert!(left.is_leaf());
    }

    #[test]
    fn test_path_keys_are_unique() {
        let tree = materialize(&diamond(), &curie("HP:0000")).unwrap();
        let keys: HashSet<&str> = tree.walk().iter().map(|(n, _)| n.path_key.as_str()).collect();
        assert_eq!(keys.len(), tree.node_count());
    }

    #[test]
    fn test_path_key_format() {
        let tree = materialize(&diamond(), &curie("HP:0000")).unwrap();
        assert_eq!(tree.path_key, "Term HP:0000HP:0000");
        assert_eq!(
            tree.children[0].children[0].path_key,
            "Term HP:0000HP:0000/Term HP:0001HP:0001/Term HP:0003HP:0003"
        );
    }

    #[test]
    fn test_subtree_root() {
        let tree = materialize(&diamond(), &curie("HP:0002")).unwrap();
        assert_eq!(tree.node_count(), 2);
        assert_eq!(tree.children[0].path_key, "Term HP:0002HP:0002/Term HP:0003HP:0003");
    }

    #[test]
    fn test_unknown_root() {
        let err = materialize(&diamond(), &curie("HP:9999")).unwrap_err();
        assert_eq!(err, HierarchyError::UnknownRoot("HP:9999".to_string()));
    }

    #[test]
    fn test_cycle_is_reported() {
        let ontology = ontology_from_edges(
            "HP",
            &[("HP:0001", "HP:0000"), ("HP:0002", "HP:0001"), ("HP:0001", "HP:0002")],
        );
        let err = materialize(&ontology, &curie("HP:0000")).unwrap_err();
        match err {
            HierarchyError::CyclicHierarchy { path } => {
                assert_eq!(path, vec!["HP:0000", "HP:0001", "HP:0002", "HP:0001"]);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let ontology = ontology_from_edges("HP", &[("HP:0001", "HP:0000"), ("HP:0001", "HP:0001")]);
        assert!(matches!(
            materialize(&ontology, &curie("HP:0000")),
            Err(HierarchyError::CyclicHierarchy { .. })
        ));
    }

    #[test]
    fn test_single_term_is_leaf() {
        let ontology = Ontology::from_parts("HP", vec![Term::new(curie("HP:0000001"), "All")], vec![]);
        let tree = materialize(&ontology, &curie("HP:0000001")).unwrap();
        assert!(tree.children.is_empty());
        assert_eq!(tree.label, "HP:0000001 (All)");
    }

    #[test]
    fn test_materialize_all() {
        let trees = materialize_all(&diamond(), &[curie("HP:0001"), curie("HP:0002")]).unwrap();
        assert_eq!(trees.len(), 2);
        assert!(materialize_all(&diamond(), &[curie("HP:0001"), curie("HP:4242")]).is_err());
    }

    #[test]
    fn test_filter_deep_leaf_keeps_chain_and_expands_ancestors() {
        let ontology = ontology_from_edges(
            "HP",
            &[
                ("HP:0001", "HP:0000"),
                ("HP:0002", "HP:0000"),
                ("HP:0011", "HP:0001"),
                ("HP:0111", "HP:0011"),
                ("HP:0021", "HP:0002"),
            ],
        );
        let tree = materialize(&ontology, &curie("HP:0000")).unwrap();
        let filtered = filter(&tree, "term hp:0111").unwrap();

        let root = &filtered.root;
        assert_eq!(root.children.len(), 1);
        let mid = &root.children[0];
        assert_eq!(mid.term_id, curie("HP:0001"));
        assert_eq!(mid.children[0].term_id, curie("HP:0011"));
        let leaf = &mid.children[0].children[0];
        assert_eq!(leaf.term_id, curie("HP:0111"));
        assert!(leaf.is_leaf());

        assert_eq!(
            filtered.expanded,
            vec![
                root.path_key.clone(),
                mid.path_key.clone(),
                mid.children[0].path_key.clone(),
            ]
        );
        assert!(!filtered.expanded.contains(&leaf.path_key));
    }

    #[test]
    fn test_filter_matching_inner_node_drops_unmatched_children() {
        let tree = materialize(&diamond(), &curie("HP:0000")).unwrap();
        let filtered = filter(&tree, "HP:0001").unwrap();
        assert_eq!(filtered.root.children.len(), 1);
        assert!(filtered.root.children[0].is_leaf());
        assert_eq!(filtered.expanded, vec![tree.path_key.clone()]);
    }

    #[test]
    fn test_filter_multi_parent_match_shows_every_path() {
        let tree = materialize(&diamond(), &curie("HP:0000")).unwrap();
        let filtered = filter(&tree, "HP:0003").unwrap();
        assert_eq!(filtered.root.node_count(), 5);
        assert_eq!(filtered.expanded.len(), 3);
    }

    #[test]
    fn test_filter_empty_query_and_no_match() {
        let tree = materialize(&diamond(), &curie("HP:0000")).unwrap();
        let all = filter(&tree, "  ").unwrap();
        assert_eq!(all.root, tree);
        assert!(all.expanded.is_empty());
        assert!(filter(&tree, "no such label").is_none());
    }

    #[test]
    fn test_limit_depth() {
        let tree = materialize(&diamond(), &curie("HP:0000")).unwrap();
        assert_eq!(tree.limit_depth(0).node_count(), 1);
        assert_eq!(tree.limit_depth(1).node_count(), 3);
        assert_eq!(tree.limit_depth(5), tree);
    }

    #[test]
    fn test_walk_is_preorder() {
        let tree = materialize(&diamond(), &curie("HP:0000")).unwrap();
        let order: Vec<(String, usize)> = tree
            .walk()
            .iter()
            .map(|(n, d)| (n.term_id.to_string(), *d))
            .collect();
        assert_eq!(
            order,
            vec![
                ("HP:0000".to_string(), 0),
                ("HP:0001".to_string(), 1),
                ("HP:0003".to_string(), 2),
                ("HP:0002".to_string(), 1),
                ("HP:0003".to_string(), 2),
            ]
        );
    }
}
