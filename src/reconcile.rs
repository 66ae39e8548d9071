//! Change-set flattening and merge-by-key
//!
//! Suggesters propose annotation changes in two shapes: a bare row carrying
//! its own `status`/`rationale`, or a `{rationale, annotation}` wrapper whose
//! embedded row is a removal. [`flatten`] turns both into uniform
//! [`FlatChange`] records; [`apply`] merges them into the current rows by the
//! `(database_id, hpo_id)` identity key, never by position.

use crate::annotation::{AnnotationRow, FieldProblem, RowKey, COLUMNS};
use crate::curie::Curie;
use crate::ontology::Ontology;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Reasons a suggestion or a single change cannot be used
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    #[error("malformed suggestion: {0}")]
    MalformedSuggestion(String),
    #[error("change has no identity key (database_id and hpo_id are required)")]
    MissingKey,
    #[error("unknown term reference in {column}: {id}")]
    UnknownTermReference { column: &'static str, id: String },
    #[error("invalid field {0}")]
    InvalidField(FieldProblem),
}

pub type Result<T> = std::result::Result<T, ReconcileError>;

/// What a change does to the table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    #[default]
    Added,
    Changed,
    Removed,
}

impl ChangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeStatus::Added => "added",
            ChangeStatus::Changed => "changed",
            ChangeStatus::Removed => "removed",
        }
    }

    /// Background color used for the row in review tables
    pub fn color(&self) -> &'static str {
        match self {
            ChangeStatus::Added => "#d4f4dd",
            ChangeStatus::Changed => "#fff3cd",
            ChangeStatus::Removed => "#f8d7da",
        }
    }

    /// Case-insensitive, accepting the synonyms suggesters tend to emit
    pub fn parse_lenient(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "added" | "add" | "new" => Some(ChangeStatus::Added),
            "changed" | "change" | "modified" | "updated" => Some(ChangeStatus::Changed),
            "removed" | "remove" | "deleted" => Some(ChangeStatus::Removed),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One proposed change as it arrives from a suggester
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawChange {
    /// `{"rationale": ..., "annotation": {...}}`, always a removal
    Wrapped {
        #[serde(default)]
        rationale: Value,
        annotation: Map<String, Value>,
    },
    /// A row with optional `status` and `rationale` keys
    Bare(Map<String, Value>),
}

/// A parsed suggester reply
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuggestionOutput {
    pub text: String,
    pub annotations: Vec<RawChange>,
}

impl SuggestionOutput {
    /// Accepts a bare array of items, or an object with `annotations` and an
    /// optional `text`/`explanation`. Items that are not objects are skipped.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Array(items) => Ok(Self {
                text: String::new(),
                annotations: parse_items(items),
            }),
            Value::Object(mut map) => {
                let text = map
                    .remove("text")
                    .or_else(|| map.remove("explanation"))
                    .map(|v| value_to_text(&v))
                    .unwrap_or_default();
                let annotations = match map.remove("annotations") {
                    None | Some(Value::Null) => Vec::new(),
                    Some(Value::Array(items)) => parse_items(items),
                    Some(other) => {
                        return Err(ReconcileError::MalformedSuggestion(format!(
                            "'annotations' must be an array, found {}",
                            json_kind(&other)
                        )))
                    }
                };
                Ok(Self { text, annotations })
            }
            other => Err(ReconcileError::MalformedSuggestion(format!(
                "expected an array or object, found {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn parse(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| ReconcileError::MalformedSuggestion(e.to_string()))?;
        Self::from_value(value)
    }

    /// The text shown to the curator for this reply
    pub fn reply_text(&self) -> String {
        if !self.text.trim().is_empty() {
            return self.text.clone();
        }
        match self.annotations.len() {
            0 => "No changes proposed.".to_string(),
            1 => "Proposed 1 change.".to_string(),
            n => format!("Proposed {} changes.", n),
        }
    }
}

fn parse_items(items: Vec<Value>) -> Vec<RawChange> {
    let mut out = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<RawChange>(item) {
            Ok(change) => out.push(change),
            Err(_) => tracing::warn!(index, "skipping suggestion item that is not an object"),
        }
    }
    out
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Render a JSON value as table text: `null` is empty, scalars are printed
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn row_from_map(map: &Map<String, Value>) -> AnnotationRow {
    let mut row = AnnotationRow::default();
    for column in COLUMNS {
        if let Some(value) = map.get(column) {
            row.set(column, &value_to_text(value));
        }
    }
    row
}

/// A proposed change in uniform shape.
///
/// Serializes as a flat object: the twelve row columns plus `status` and
/// `rationale`, which is also what review tables edit and send back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatChange {
    #[serde(flatten)]
    pub row: AnnotationRow,
    #[serde(default)]
    pub status: ChangeStatus,
    #[serde(default)]
    pub rationale: String,
}

impl FlatChange {
    pub fn new(row: AnnotationRow, status: ChangeStatus, rationale: impl Into<String>) -> Self {
        Self {
            row,
            status,
            rationale: rationale.into(),
        }
    }

    pub fn key(&self) -> RowKey {
        self.row.key()
    }
}

/// Normalize raw suggester items, keeping their order.
///
/// Bare rows take their status from their own `status` field (default
/// `added`); wrapped rows are removals. Items with an unrecognised status are
/// skipped.
pub fn flatten(raw: &[RawChange]) -> Vec<FlatChange> {
    let mut out = Vec::with_capacity(raw.len());
    for item in raw {
        match item {
            RawChange::Wrapped {
                rationale,
                annotation,
            } => out.push(FlatChange::new(
                row_from_map(annotation),
                ChangeStatus::Removed,
                value_to_text(rationale),
            )),
            RawChange::Bare(map) => {
                let status_text = map.get("status").map(value_to_text).unwrap_or_default();
                let Some(status) = ChangeStatus::parse_lenient(&status_text) else {
                    tracing::warn!(status = %status_text, "skipping change with unknown status");
                    continue;
                };
                let rationale = map.get("rationale").map(value_to_text).unwrap_or_default();
                out.push(FlatChange::new(row_from_map(map), status, rationale));
            }
        }
    }
    out
}

/// How `added`/`changed` rows treat existing rows with the same key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApplyPolicy {
    /// Append unconditionally; applying the same change twice duplicates it
    #[default]
    Append,
    /// Drop every row with the change's key, then append
    ReplaceByKey,
}

impl FromStr for ApplyPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "append" => Ok(ApplyPolicy::Append),
            "replace-by-key" => Ok(ApplyPolicy::ReplaceByKey),
            _ => Err(format!("unknown policy '{}' (expected append or replace-by-key)", s)),
        }
    }
}

impl fmt::Display for ApplyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ApplyPolicy::Append => "append",
            ApplyPolicy::ReplaceByKey => "replace-by-key",
        })
    }
}

/// How vocabulary and field problems affect a change
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    /// No checks beyond the identity key
    Off,
    /// Apply and flag
    #[default]
    Warn,
    /// Reject the change
    Strict,
}

impl FromStr for Strictness {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "off" => Ok(Strictness::Off),
            "warn" => Ok(Strictness::Warn),
            "strict" => Ok(Strictness::Strict),
            _ => Err(format!("unknown strictness '{}' (expected off, warn or strict)", s)),
        }
    }
}

impl fmt::Display for Strictness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Strictness::Off => "off",
            Strictness::Warn => "warn",
            Strictness::Strict => "strict",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyOptions {
    pub policy: ApplyPolicy,
    pub strictness: Strictness,
}

/// Checks row identifiers against loaded vocabularies
#[derive(Debug, Clone)]
pub struct TermValidator {
    phenotypes: Arc<Ontology>,
    diseases: Option<Arc<Ontology>>,
}

impl TermValidator {
    pub fn new(phenotypes: Arc<Ontology>) -> Self {
        Self {
            phenotypes,
            diseases: None,
        }
    }

    /// Also check `database_id` values whose prefix matches `diseases`
    pub fn with_diseases(mut self, diseases: Arc<Ontology>) -> Self {
        self.diseases = Some(diseases);
        self
    }

    /// Every identifier in the row that the vocabularies do not know
    pub fn check(&self, row: &AnnotationRow) -> Vec<ReconcileError> {
        let mut errors = Vec::new();
        let mut require = |column: &'static str, id: &str| {
            if !self.phenotypes.contains_str(id) {
                errors.push(ReconcileError::UnknownTermReference {
                    column,
                    id: id.to_string(),
                });
            }
        };

        require("hpo_id", &row.hpo_id);
        if !row.onset.is_empty() {
            require("onset", &row.onset);
        }
        if row.frequency.starts_with("HP:") {
            require("frequency", &row.frequency);
        }
        for modifier in row.modifier.split(';').map(str::trim).filter(|m| !m.is_empty()) {
            require("modifier", modifier);
        }

        if let Some(diseases) = &self.diseases {
            let in_scope = Curie::parse(&row.database_id)
                .map(|c| c.has_prefix(diseases.prefix()))
                .unwrap_or(false);
            if in_scope && !diseases.contains_str(&row.database_id) {
                errors.push(ReconcileError::UnknownTermReference {
                    column: "database_id",
                    id: row.database_id.clone(),
                });
            }
        }
        errors
    }
}

/// A change that was rejected or applied with problems
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyIssue {
    pub key: RowKey,
    pub status: ChangeStatus,
    pub problems: Vec<String>,
}

impl ApplyIssue {
    fn new(change: &FlatChange, errors: &[ReconcileError]) -> Self {
        Self {
            key: change.key(),
            status: change.status,
            problems: errors.iter().map(|e| e.to_string()).collect(),
        }
    }
}

impl fmt::Display for ApplyIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.status, self.key, self.problems.join("; "))
    }
}

/// Outcome of merging a change set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyResult {
    pub rows: Vec<AnnotationRow>,
    /// Rows appended for `added`/`changed`
    pub added: usize,
    /// Rows deleted by `removed`
    pub removed: usize,
    /// Rows dropped by `replace-by-key` before an append
    pub replaced: usize,
    pub rejected: Vec<ApplyIssue>,
    pub flagged: Vec<ApplyIssue>,
}

fn problems_for(change: &FlatChange, validator: Option<&TermValidator>) -> Vec<ReconcileError> {
    let mut errors: Vec<ReconcileError> = validator
        .map(|v| v.check(&change.row))
        .unwrap_or_default();
    errors.extend(
        change
            .row
            .validate()
            .into_iter()
            .map(ReconcileError::InvalidField),
    );
    errors
}

/// Merge `changes` into a copy of `current`, in input order.
///
/// `removed` deletes every row with the change's key (no match is a no-op).
/// `added` and `changed` append the row, after dropping same-key rows under
/// [`ApplyPolicy::ReplaceByKey`]. A change without a complete key is rejected;
/// vocabulary and field problems reject or flag it per [`Strictness`]. A
/// rejected change never stops the rest of the batch.
pub fn apply(
    current: &[AnnotationRow],
    changes: &[FlatChange],
    options: &ApplyOptions,
    validator: Option<&TermValidator>,
) -> ApplyResult {
    let mut result = ApplyResult {
        rows: current.to_vec(),
        ..Default::default()
    };

    for change in changes {
        let key = change.key();
        if !key.is_complete() {
            result
                .rejected
                .push(ApplyIssue::new(change, &[ReconcileError::MissingKey]));
            continue;
        }

        if change.status != ChangeStatus::Removed && options.strictness != Strictness::Off {
            let errors = problems_for(change, validator);
            if !errors.is_empty() {
                let issue = ApplyIssue::new(change, &errors);
                if options.strictness == Strictness::Strict {
                    tracing::warn!(%issue, "change rejected");
                    result.rejected.push(issue);
                    continue;
                }
                tracing::warn!(%issue, "change applied with problems");
                result.flagged.push(issue);
            }
        }

        match change.status {
            ChangeStatus::Removed => {
                let before = result.rows.len();
                result.rows.retain(|r| !r.has_key(&key));
                result.removed += before - result.rows.len();
            }
            ChangeStatus::Added | ChangeStatus::Changed => {
                if options.policy == ApplyPolicy::ReplaceByKey {
                    let before = result.rows.len();
                    result.rows.retain(|r| !r.has_key(&key));
                    result.replaced += before - result.rows.len();
                }
                result.rows.push(change.row.clone());
                result.added += 1;
            }
        }
    }

    tracing::info!(
        added = result.added,
        removed = result.removed,
        replaced = result.replaced,
        rejected = result.rejected.len(),
        flagged = result.flagged.len(),
        "change set applied"
    );
    result
}

/// Replace the rows an edit session started from with the edited rows.
///
/// Every current row equal to one of `original` is removed; `edited` goes in
/// where the first removed row was, or at the end when none matched.
pub fn replace_rows(
    current: &[AnnotationRow],
    original: &[AnnotationRow],
    edited: &[AnnotationRow],
) -> Vec<AnnotationRow> {
    let mut rows = Vec::with_capacity(current.len() + edited.len());
    let mut insert_at = None;
    for row in current {
        if original.contains(row) {
            insert_at.get_or_insert(rows.len());
        } else {
            rows.push(row.clone());
        }
    }
    let tail = rows.split_off(insert_at.unwrap_or(rows.len()));
    rows.extend(edited.iter().cloned());
    rows.extend(tail);
    rows
}

/// SHA-256 over the canonical JSON of a change set
pub fn fingerprint(changes: &[FlatChange]) -> String {
    let canonical = serde_json::to_vec(changes).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    format!("{:x}", hasher.finalize())
}
