//! hpoa-builder - HPO hierarchy browsing and phenotype annotation curation
//!
//! Load the Human Phenotype Ontology from an OBO Graphs JSON release, unfold
//! it into a browsable tree, and reconcile suggested changes into a
//! `phenotype.hpoa` annotation table.
//!
//! # Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`ontology`] | Terms and `is_a` adjacency loaded from OBO Graphs JSON |
//! | [`hierarchy`] | Path-unique tree unfolding and label search |
//! | [`annotation`] | The 12-column HPOA table |
//! | [`reconcile`] | Merging added/changed/removed rows into a table |
//! | [`suggest`] | Where change sets come from |
//! | [`session`] | One curator's suggest, review, approve loop |
//! | [`serve`] | JSON API over a session |
//!
//! # Quick Start
//!
//! ```no_run
//! use hpoa_builder::{materialize, AnnotationStore, Curie, Ontology};
//! use std::path::Path;
//!
//! let hp = Ontology::from_path(Path::new("data/hp.json"), "HP", "is_a").unwrap();
//! let tree = materialize(&hp, &Curie::parse("HP:0000118").unwrap()).unwrap();
//! println!("{} nodes under {}", tree.node_count(), tree.label);
//!
//! let table = AnnotationStore::load(Path::new("data/phenotype.hpoa")).unwrap();
//! println!("{} diseases", table.disease_names().len());
//! ```

pub mod annotation;
pub mod cache;
pub mod config;
pub mod curie;
pub mod export;
pub mod hierarchy;
pub mod init;
pub mod obograph;
pub mod ontology;
pub mod reconcile;
pub mod serve;
pub mod session;
pub mod suggest;
pub mod workspace;

pub use annotation::{AnnotationRow, AnnotationStore, RowKey};
pub use config::Config;
pub use curie::Curie;
pub use hierarchy::{filter, materialize, FilteredTree, TreeNode};
pub use ontology::{Ontology, Term};
pub use reconcile::{
    apply, flatten, ApplyOptions, ApplyPolicy, ApplyResult, ChangeStatus, FlatChange, Strictness,
};
pub use session::CurationSession;
pub use workspace::Workspace;
