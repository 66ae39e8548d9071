//! OBO Graphs JSON document model
//!
//! Only the parts of the format the loader reads are modelled. Unknown keys
//! are ignored; missing optional keys fall back to defaults so that noisy
//! third-party exports still parse.

use serde::Deserialize;

/// Top-level document: `{"graphs": [...]}`
#[derive(Debug, Clone, Deserialize)]
pub struct GraphDocument {
    pub graphs: Vec<Graph>,
}

/// One graph of the document. Ontology exports carry exactly one.
#[derive(Debug, Clone, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub id: Option<String>,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub meta: Option<GraphMeta>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphMeta {
    #[serde(default)]
    pub version: Option<String>,
}

/// Declared node kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeType {
    Class,
    Property,
    Individual,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub lbl: Option<String>,
    #[serde(default, rename = "type")]
    pub node_type: Option<NodeType>,
    #[serde(default)]
    pub meta: Option<NodeMeta>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeMeta {
    #[serde(default)]
    pub definition: Option<Definition>,
    #[serde(default)]
    pub synonyms: Vec<Synonym>,
    #[serde(default)]
    pub deprecated: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Definition {
    #[serde(default)]
    pub val: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Synonym {
    #[serde(default)]
    pub val: Option<String>,
}

/// A typed edge `sub --pred--> obj`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Edge {
    #[serde(default)]
    pub sub: String,
    #[serde(default)]
    pub pred: String,
    #[serde(default)]
    pub obj: String,
}

impl Node {
    pub fn is_class(&self) -> bool {
        self.node_type == Some(NodeType::Class)
    }

    pub fn definition(&self) -> Option<&str> {
        self.meta
            .as_ref()
            .and_then(|m| m.definition.as_ref())
            .and_then(|d| d.val.as_deref())
    }

    pub fn synonyms(&self) -> Vec<String> {
        self.meta
            .as_ref()
            .map(|m| m.synonyms.iter().filter_map(|s| s.val.clone()).collect())
            .unwrap_or_default()
    }

    pub fn is_deprecated(&self) -> bool {
        self.meta.as_ref().map(|m| m.deprecated).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_document() {
        let json = r#"{
            "graphs": [{
                "id": "http://purl.obolibrary.org/obo/hp.json",
                "meta": {"version": "http://purl.obolibrary.org/obo/hp/releases/2025-05-06/hp.json"},
                "nodes": [
                    {"id": "http://purl.obolibrary.org/obo/HP_0000001", "lbl": "All", "type": "CLASS"},
                    {"id": "http://purl.obolibrary.org/obo/IAO_0000115", "lbl": "definition", "type": "PROPERTY"},
                    {"id": "http://purl.obolibrary.org/obo/HP_0000118", "lbl": "Phenotypic abnormality", "type": "CLASS",
                     "meta": {"definition": {"val": "A phenotypic abnormality."},
                              "synonyms": [{"pred": "hasExactSynonym", "val": "Organ abnormality"}]}}
                ],
                "edges": [
                    {"sub": "http://purl.obolibrary.org/obo/HP_0000118", "pred": "is_a", "obj": "http://purl.obolibrary.org/obo/HP_0000001"}
                ]
            }]
        }"#;

        let doc: GraphDocument = serde_json::from_str(json).unwrap();
        assert_eq!(doc.graphs.len(), 1);
        let graph = &doc.graphs[0];
        assert_eq!(graph.nodes.len(), 3);
        assert!(graph.nodes[0].is_class());
        assert!(!graph.nodes[1].is_class());
        assert_eq!(graph.nodes[2].definition(), Some("A phenotypic abnormality."));
        assert_eq!(graph.nodes[2].synonyms(), vec!["Organ abnormality".to_string()]);
        assert_eq!(graph.edges[0].pred, "is_a");
    }

    #[test]
    fn test_unknown_node_type_is_other() {
        let node: Node = serde_json::from_str(r#"{"id": "x", "type": "SOMETHING_NEW"}"#).unwrap();
        assert_eq!(node.node_type, Some(NodeType::Other));
        assert!(!node.is_class());
    }

    #[test]
    fn test_missing_type_is_not_class() {
        let node: Node = serde_json::from_str(r#"{"id": "http://purl.obolibrary.org/obo/HP_0000001"}"#).unwrap();
        assert!(node.node_type.is_none());
        assert!(!node.is_class());
        assert!(!node.is_deprecated());
    }

    #[test]
    fn test_missing_graphs_fails() {
        let result: Result<GraphDocument, _> = serde_json::from_str(r#"{"nodes": []}"#);
        assert!(result.is_err());
    }
}
