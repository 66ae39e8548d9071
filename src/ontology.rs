//! Minimal in-memory ontology built from an OBO Graphs export
//!
//! Loading keeps only `CLASS` nodes of one prefix (e.g. `HP`) and only edges of
//! one relation (`is_a`) whose endpoints are both retained. Everything else is
//! dropped and counted in a [`LoadReport`]; third-party exports are noisy and a
//! partially populated ontology beats a failed load.
//!
//! The parent/child index is built once at construction so that child lookup
//! is a constant-time index into an adjacency list.

use crate::curie::Curie;
use crate::obograph::{Graph, GraphDocument};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::Read;
use std::path::Path;

/// Hierarchical "subclass of" relation in OBO Graphs exports
pub const IS_A: &str = "is_a";

/// `All`, the root of the HPO
pub const HPO_ROOT: &str = "HP:0000001";
/// `Phenotypic abnormality`
pub const PHENOTYPIC_ABNORMALITY: &str = "HP:0000118";
/// `Age of onset`, parent of every valid `onset` value
pub const ONSET_ROOT: &str = "HP:0003674";
/// `Frequency`, parent of every valid term-valued `frequency`
pub const FREQUENCY_ROOT: &str = "HP:0040279";
/// `Clinical modifier`, parent of every valid `modifier` value
pub const CLINICAL_MODIFIER_ROOT: &str = "HP:0012823";
/// `human disease` in MONDO
pub const MONDO_HUMAN_DISEASE: &str = "MONDO:0700096";

/// Error type for ontology loading
#[derive(Debug, thiserror::Error)]
pub enum OntologyError {
    #[error("malformed ontology source: {0}")]
    MalformedSource(String),
    #[error("failed to read ontology source {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, OntologyError>;

/// One ontology concept
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Term {
    pub id: Curie,
    /// Primary label; empty when the export has none
    pub name: String,
    pub definition: Option<String>,
    pub synonyms: Vec<String>,
    pub obsolete: bool,
}

impl Term {
    pub fn new(id: Curie, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            definition: None,
            synonyms: Vec::new(),
            obsolete: false,
        }
    }

    pub fn prefix(&self) -> &str {
        self.id.prefix()
    }
}

/// What the loader kept and what it dropped
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub nodes_seen: usize,
    pub terms_retained: usize,
    pub nodes_not_class: usize,
    pub nodes_not_purl: usize,
    pub nodes_other_prefix: usize,
    pub nodes_duplicate: usize,
    pub edges_seen: usize,
    pub edges_retained: usize,
    pub edges_other_relation: usize,
    pub edges_not_purl: usize,
    pub edges_unknown_endpoint: usize,
    pub edges_duplicate: usize,
}

impl LoadReport {
    pub fn nodes_dropped(&self) -> usize {
        self.nodes_not_class + self.nodes_not_purl + self.nodes_other_prefix + self.nodes_duplicate
    }

    pub fn edges_dropped(&self) -> usize {
        self.edges_other_relation
            + self.edges_not_purl
            + self.edges_unknown_endpoint
            + self.edges_duplicate
    }
}

/// Terms of one prefix plus their `is_a` hierarchy
#[derive(Debug, Clone)]
pub struct Ontology {
    prefix: String,
    version: Option<String>,
    terms: Vec<Term>,
    index: HashMap<Curie, usize>,
    children: Vec<Vec<usize>>,
    parents: Vec<Vec<usize>>,
    report: LoadReport,
}

impl Ontology {
    /// Build an ontology from a parsed OBO Graphs document.
    ///
    /// Only the first graph of the document is read.
    pub fn load(document: &GraphDocument, prefix: &str, relation: &str) -> Result<Self> {
        let graph = document.graphs.first().ok_or_else(|| {
            OntologyError::MalformedSource("document contains no graphs".to_string())
        })?;
        Ok(Self::load_graph(graph, prefix, relation))
    }

    /// Parse and load a JSON string
    pub fn from_json_str(json: &str, prefix: &str, relation: &str) -> Result<Self> {
        let document: GraphDocument = serde_json::from_str(json)
            .map_err(|e| OntologyError::MalformedSource(e.to_string()))?;
        Self::load(&document, prefix, relation)
    }

    /// Parse and load from any reader
    pub fn from_reader<R: Read>(reader: R, prefix: &str, relation: &str) -> Result<Self> {
        let document: GraphDocument = serde_json::from_reader(reader)
            .map_err(|e| OntologyError::MalformedSource(e.to_string()))?;
        Self::load(&document, prefix, relation)
    }

    /// Parse and load a file on disk
    pub fn from_path(path: &Path, prefix: &str, relation: &str) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|source| OntologyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        tracing::info!(path = %path.display(), prefix, "loading ontology");
        Self::from_reader(std::io::BufReader::new(file), prefix, relation)
    }

    fn load_graph(graph: &Graph, prefix: &str, relation: &str) -> Self {
        let mut report = LoadReport::default();
        let mut terms: Vec<Term> = Vec::new();
        let mut known: HashSet<Curie> = HashSet::new();

        for node in &graph.nodes {
            report.nodes_seen += 1;
            if !node.is_class() {
                report.nodes_not_class += 1;
                continue;
            }
            let Some(curie) = Curie::from_purl(&node.id) else {
                report.nodes_not_purl += 1;
                continue;
            };
            if !curie.has_prefix(prefix) {
                report.nodes_other_prefix += 1;
                continue;
            }
            if !known.insert(curie.clone()) {
                report.nodes_duplicate += 1;
                continue;
            }
            terms.push(Term {
                id: curie,
                name: node.lbl.clone().unwrap_or_default(),
                definition: node.definition().map(|d| d.to_string()),
                synonyms: node.synonyms(),
                obsolete: node.is_deprecated(),
            });
        }

        let mut edges: Vec<(Curie, Curie)> = Vec::new();
        for edge in &graph.edges {
            report.edges_seen += 1;
            if edge.pred != relation {
                report.edges_other_relation += 1;
                continue;
            }
            let (Some(child), Some(parent)) = (Curie::from_purl(&edge.sub), Curie::from_purl(&edge.obj))
            else {
                report.edges_not_purl += 1;
                continue;
            };
            if !known.contains(&child) || !known.contains(&parent) {
                report.edges_unknown_endpoint += 1;
                continue;
            }
            edges.push((child, parent));
        }

        let mut ontology = Self::from_parts(prefix, terms, edges);
        report.terms_retained = ontology.terms.len();
        report.edges_duplicate += ontology.report.edges_duplicate;
        report.edges_unknown_endpoint += ontology.report.edges_unknown_endpoint;
        report.edges_retained = ontology.report.edges_retained;
        ontology.version = graph.meta.as_ref().and_then(|m| m.version.clone());

        tracing::info!(
            prefix,
            terms = report.terms_retained,
            edges = report.edges_retained,
            nodes_dropped = report.nodes_dropped(),
            edges_dropped = report.edges_dropped(),
            "ontology loaded"
        );
        tracing::debug!(?report, "ontology load report");

        ontology.report = report;
        ontology
    }

    /// Build an ontology from terms and `(child, parent)` pairs.
    ///
    /// Pairs naming an unknown term and repeated pairs are dropped. Children
    /// of each term are ordered by identifier.
    pub fn from_parts(prefix: &str, terms: Vec<Term>, edges: Vec<(Curie, Curie)>) -> Self {
        let mut report = LoadReport::default();
        let mut index: HashMap<Curie, usize> = HashMap::with_capacity(terms.len());
        let mut kept: Vec<Term> = Vec::with_capacity(terms.len());
        for term in terms {
            if index.contains_key(&term.id) {
                report.nodes_duplicate += 1;
                continue;
            }
            index.insert(term.id.clone(), kept.len());
            kept.push(term);
        }

        let mut children: Vec<Vec<usize>> = vec![Vec::new(); kept.len()];
        let mut parents: Vec<Vec<usize>> = vec![Vec::new(); kept.len()];
        let mut seen: HashSet<(usize, usize)> = HashSet::new();
        for (child, parent) in &edges {
            let (Some(&c), Some(&p)) = (index.get(child), index.get(parent)) else {
                report.edges_unknown_endpoint += 1;
                continue;
            };
            if !seen.insert((c, p)) {
                report.edges_duplicate += 1;
                continue;
            }
            children[p].push(c);
            parents[c].push(p);
            report.edges_retained += 1;
        }
        for list in children.iter_mut().chain(parents.iter_mut()) {
            list.sort_by(|a, b| kept[*a].id.cmp(&kept[*b].id));
        }
        report.terms_retained = kept.len();

        Self {
            prefix: prefix.to_string(),
            version: None,
            terms: kept,
            index,
            children,
            parents,
            report,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn contains(&self, id: &Curie) -> bool {
        self.index.contains_key(id)
    }

    /// Whether `id` parses as a CURIE naming a term of this ontology
    pub fn contains_str(&self, id: &str) -> bool {
        Curie::parse(id).map(|c| self.contains(&c)).unwrap_or(false)
    }

    pub fn term(&self, id: &Curie) -> Option<&Term> {
        self.index.get(id).map(|&i| &self.terms[i])
    }

    pub fn term_str(&self, id: &str) -> Option<&Term> {
        Curie::parse(id).ok().and_then(|c| self.term(&c))
    }

    /// All terms in load order
    pub fn terms(&self) -> impl Iterator<Item = &Term> {
        self.terms.iter()
    }

    /// Direct children of a term, ordered by identifier
    pub fn children(&self, id: &Curie) -> impl Iterator<Item = &Term> + '_ {
        self.neighbours(id, &self.children)
    }

    /// Direct parents of a term, ordered by identifier
    pub fn parents(&self, id: &Curie) -> impl Iterator<Item = &Term> + '_ {
        self.neighbours(id, &self.parents)
    }

    fn neighbours<'a>(
        &'a self,
        id: &Curie,
        adjacency: &'a [Vec<usize>],
    ) -> impl Iterator<Item = &'a Term> + 'a {
        let slice: &[usize] = match self.index.get(id) {
            Some(&i) => &adjacency[i],
            None => &[],
        };
        slice.iter().map(move |&i| &self.terms[i])
    }

    /// Every ancestor of a term, nearest first, each once
    pub fn ancestors(&self, id: &Curie) -> Vec<&Term> {
        let Some(&start) = self.index.get(id) else {
            return Vec::new();
        };
        let mut visited: HashSet<usize> = HashSet::new();
        let mut queue: VecDeque<usize> = self.parents[start].iter().copied().collect();
        let mut result = Vec::new();
        while let Some(i) = queue.pop_front() {
            if i == start || !visited.insert(i) {
                continue;
            }
            result.push(&self.terms[i]);
            queue.extend(self.parents[i].iter().copied());
        }
        result
    }

    /// Whether `ancestor` is a proper ancestor of `id`
    pub fn is_descendant_of(&self, id: &Curie, ancestor: &Curie) -> bool {
        id != ancestor && self.ancestors(id).iter().any(|t| &t.id == ancestor)
    }

    /// Terms without parents
    pub fn roots(&self) -> Vec<&Term> {
        self.terms
            .iter()
            .enumerate()
            .filter(|(i, _)| self.parents[*i].is_empty())
            .map(|(_, t)| t)
            .collect()
    }

    /// Case-insensitive term search.
    ///
    /// An exact identifier match comes first, then label matches, then
    /// synonym matches. Obsolete terms are skipped.
    pub fn search(&self, query: &str, limit: usize) -> Vec<&Term> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Vec::new();
        }
        let needle = query.to_lowercase();

        let mut exact: Vec<&Term> = Vec::new();
        let mut by_label: Vec<&Term> = Vec::new();
        let mut by_synonym: Vec<&Term> = Vec::new();
        for term in self.terms.iter().filter(|t| !t.obsolete) {
            if term.id.to_string().eq_ignore_ascii_case(query) {
                exact.push(term);
            } else if term.name.to_lowercase().contains(&needle) {
                by_label.push(term);
            } else if term.synonyms.iter().any(|s| s.to_lowercase().contains(&needle)) {
                by_synonym.push(term);
            }
        }

        exact
            .into_iter()
            .chain(by_label)
            .chain(by_synonym)
            .take(limit)
            .collect()
    }
}
