//! Configured data sources of a curation project
//!
//! A [`Workspace`] turns a [`Config`] into loaded ontologies, the annotation
//! table and a ready curation session. Ontologies come from the process-wide
//! cache, so asking twice is cheap.

use crate::annotation::{AnnotationError, AnnotationStore};
use crate::cache::OntologyCache;
use crate::config::Config;
use crate::ontology::{Ontology, OntologyError, MONDO_HUMAN_DISEASE};
use crate::reconcile::{Strictness, TermValidator};
use crate::session::CurationSession;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error(transparent)]
    Ontology(#[from] OntologyError),
    #[error(transparent)]
    Annotation(#[from] AnnotationError),
    #[error("unknown ontology '{0}' (expected hp or the configured disease ontology)")]
    UnknownOntology(String),
    #[error("no disease ontology configured; set [ontology] diseases in .hpoa/config.toml")]
    NoDiseaseOntology,
}

pub type Result<T> = std::result::Result<T, WorkspaceError>;

#[derive(Debug, Clone)]
pub struct Workspace {
    config: Config,
}

impl Workspace {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The phenotype ontology
    pub fn hp(&self) -> Result<Arc<Ontology>> {
        Ok(OntologyCache::global().get_or_load(&self.config.hp_path(), "HP")?)
    }

    /// The disease ontology, when one is configured
    pub fn diseases(&self) -> Result<Option<Arc<Ontology>>> {
        match self.config.disease_path() {
            Some(path) => Ok(Some(
                OntologyCache::global().get_or_load(&path, &self.config.ontology.disease_prefix)?,
            )),
            None => Ok(None),
        }
    }

    /// Look up an ontology by name: `hp` or the disease prefix, any case
    pub fn ontology(&self, name: &str) -> Result<Arc<Ontology>> {
        if name.eq_ignore_ascii_case("hp") {
            return self.hp();
        }
        if name.eq_ignore_ascii_case(&self.config.ontology.disease_prefix) {
            return self.diseases()?.ok_or(WorkspaceError::NoDiseaseOntology);
        }
        Err(WorkspaceError::UnknownOntology(name.to_string()))
    }

    /// Default tree root for an ontology
    pub fn default_root(&self, ontology: &Ontology) -> String {
        if ontology.prefix() == "HP" {
            self.config.ontology.root.clone()
        } else if ontology.prefix() == "MONDO" {
            MONDO_HUMAN_DISEASE.to_string()
        } else {
            ontology
                .roots()
                .first()
                .map(|t| t.id.to_string())
                .unwrap_or_default()
        }
    }

    pub fn store(&self) -> Result<AnnotationStore> {
        Ok(AnnotationStore::load(&self.config.annotations_path())?)
    }

    /// Vocabulary checks for reconciliation; none when strictness is off
    pub fn validator(&self) -> Result<Option<TermValidator>> {
        if self.config.strictness() == Strictness::Off {
            return Ok(None);
        }
        let mut validator = TermValidator::new(self.hp()?);
        if let Some(diseases) = self.diseases()? {
            validator = validator.with_diseases(diseases);
        }
        Ok(Some(validator))
    }

    /// A session over the configured annotation table
    pub fn session(&self) -> Result<CurationSession> {
        let mut session = CurationSession::new(self.store()?, self.config.reconcile);
        if let Some(validator) = self.validator()? {
            session = session.with_validator(validator);
        }
        if let Some(name) = &self.config.curator.name {
            session = session.with_curator(name.clone());
        }
        Ok(session)
    }
}
