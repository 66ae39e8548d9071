//! Curation session state
//!
//! One session owns the annotation table being curated, the change set the
//! last suggestion proposed, and the fingerprints of every change set already
//! applied. Methods take `&self`; state sits behind a mutex so a session can
//! be shared by a server, and a separate in-flight flag turns a concurrent
//! second approval into an error instead of a lost update.

use crate::annotation::{AnnotationError, AnnotationRow, AnnotationStore};
use crate::reconcile::{
    apply, fingerprint, flatten, replace_rows, ApplyOptions, ApplyResult, ChangeStatus,
    FlatChange, TermValidator,
};
use crate::suggest::SuggestionSource;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("another change set is being applied")]
    ApplyInFlight,
    #[error("change set {0} was already applied (use force to apply it again)")]
    AlreadyApplied(String),
    #[error(transparent)]
    Annotation(#[from] AnnotationError),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// What the curator sees after asking for suggestions
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuggestionReply {
    pub text: String,
    pub changes: Vec<FlatChange>,
}

#[derive(Debug, Default)]
struct SessionState {
    store: AnnotationStore,
    pending: Vec<FlatChange>,
    reply: String,
    applied: HashSet<String>,
}

pub struct CurationSession {
    state: Mutex<SessionState>,
    in_flight: AtomicBool,
    options: ApplyOptions,
    validator: Option<TermValidator>,
    curator: Option<String>,
}

struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        if flag.swap(true, Ordering::SeqCst) {
            return Err(SessionError::ApplyInFlight);
        }
        Ok(Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The message sent to a suggester: the curator's request followed by the
/// rows under discussion as JSON
pub fn compose_prompt(message: &str, rows: &[AnnotationRow]) -> String {
    if rows.is_empty() {
        return message.to_string();
    }
    let context = serde_json::to_string_pretty(rows).unwrap_or_default();
    format!(
        "{}\n\nCurrent annotations ({} rows):\n```json\n{}\n```\n",
        message,
        rows.len(),
        context
    )
}

impl CurationSession {
    pub fn new(store: AnnotationStore, options: ApplyOptions) -> Self {
        Self {
            state: Mutex::new(SessionState {
                store,
                ..Default::default()
            }),
            in_flight: AtomicBool::new(false),
            options,
            validator: None,
            curator: None,
        }
    }

    pub fn with_validator(mut self, validator: TermValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Stamp added and changed rows that lack a biocuration entry
    pub fn with_curator(mut self, curator: impl Into<String>) -> Self {
        let curator = curator.into();
        self.curator = (!curator.trim().is_empty()).then_some(curator);
        self
    }

    /// Fingerprints of change sets applied in earlier runs
    pub fn with_applied<I: IntoIterator<Item = String>>(self, fingerprints: I) -> Self {
        self.lock().applied.extend(fingerprints);
        self
    }

    pub fn options(&self) -> ApplyOptions {
        self.options
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of the current table
    pub fn store(&self) -> AnnotationStore {
        self.lock().store.clone()
    }

    pub fn rows(&self) -> Vec<AnnotationRow> {
        self.lock().store.rows().to_vec()
    }

    pub fn disease_names(&self) -> Vec<String> {
        self.lock()
            .store
            .disease_names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn pending(&self) -> Vec<FlatChange> {
        self.lock().pending.clone()
    }

    /// Text of the last suggester reply
    pub fn reply(&self) -> String {
        self.lock().reply.clone()
    }

    pub fn applied_count(&self) -> usize {
        self.lock().applied.len()
    }

    pub fn is_applied(&self, fingerprint: &str) -> bool {
        self.lock().applied.contains(fingerprint)
    }

    /// Ask `source` about `message`, giving it the rows of `diseases` as
    /// context. The reply replaces the pending change set.
    ///
    /// A failing suggester is not an error here: its message becomes the
    /// reply text, prefixed with `Error:`, and nothing is pending.
    pub fn request_suggestions(
        &self,
        source: &dyn SuggestionSource,
        message: &str,
        diseases: &[String],
    ) -> SuggestionReply {
        let context = self.lock().store.select_diseases(diseases);
        let prompt = compose_prompt(message, &context);
        tracing::info!(source = %source.describe(), rows = context.len(), "requesting suggestions");

        // the lock is not held while the suggester runs
        let reply = match source.suggest(&prompt) {
            Ok(output) => SuggestionReply {
                text: output.reply_text(),
                changes: flatten(&output.annotations),
            },
            Err(e) => {
                tracing::warn!(error = %e, "suggestion failed");
                SuggestionReply {
                    text: format!("Error: {}", e),
                    changes: Vec::new(),
                }
            }
        };

        let mut state = self.lock();
        state.pending = reply.changes.clone();
        state.reply = reply.text.clone();
        reply
    }

    /// Drop the pending change set
    pub fn discard(&self) {
        let mut state = self.lock();
        tracing::info!(changes = state.pending.len(), "pending changes discarded");
        state.pending.clear();
    }

    /// Curator stamps on added and changed rows that carry none
    fn stamped(&self, mut changes: Vec<FlatChange>) -> Vec<FlatChange> {
        if let Some(curator) = &self.curator {
            let today = chrono::Local::now().date_naive();
            for change in changes.iter_mut() {
                if change.status != ChangeStatus::Removed && change.row.biocuration.trim().is_empty() {
                    change.row.stamp(curator, today);
                }
            }
        }
        changes
    }

    /// What approving `changes` (the pending set when `None`) would produce,
    /// without touching the session
    pub fn preview(&self, changes: Option<Vec<FlatChange>>) -> ApplyResult {
        let (changes, current) = {
            let state = self.lock();
            let changes = changes.unwrap_or_else(|| state.pending.clone());
            (changes, state.store.rows().to_vec())
        };
        let changes = self.stamped(changes);
        apply(&current, &changes, &self.options, self.validator.as_ref())
    }

    /// Apply a change set, by default the pending one.
    ///
    /// The curator may have edited the set, so the one passed in wins over
    /// what is pending. An identical set that was already applied is refused
    /// unless `force` is set. An empty set changes nothing and is not
    /// remembered.
    pub fn approve(&self, changes: Option<Vec<FlatChange>>, force: bool) -> Result<ApplyResult> {
        self.commit(changes, force, None)
    }

    /// [`approve`](Self::approve), writing the new table to `path` first.
    /// The session is only updated once the table is on disk.
    pub fn approve_and_save(
        &self,
        changes: Option<Vec<FlatChange>>,
        force: bool,
        path: &Path,
    ) -> Result<ApplyResult> {
        self.commit(changes, force, Some(path))
    }

    fn commit(&self, changes: Option<Vec<FlatChange>>, force: bool, path: Option<&Path>) -> Result<ApplyResult> {
        let _guard = InFlight::acquire(&self.in_flight)?;

        let (changes, store) = {
            let state = self.lock();
            let changes = changes.unwrap_or_else(|| state.pending.clone());
            (changes, state.store.clone())
        };

        if changes.is_empty() {
            return Ok(ApplyResult {
                rows: store.rows().to_vec(),
                ..Default::default()
            });
        }

        let print = fingerprint(&changes);
        if !force && self.lock().applied.contains(&print) {
            return Err(SessionError::AlreadyApplied(print));
        }

        let changes = self.stamped(changes);
        let result = apply(store.rows(), &changes, &self.options, self.validator.as_ref());
        let updated = store.with_rows(result.rows.clone());
        if let Some(path) = path {
            updated.save(path)?;
            tracing::info!(path = %path.display(), rows = updated.len(), "annotation table saved");
        }

        let mut state = self.lock();
        state.store = updated;
        state.applied.insert(print);
        state.pending.clear();
        Ok(result)
    }

    /// Working copy of the rows of `diseases` for manual editing
    pub fn begin_edit(&self, diseases: &[String]) -> Vec<AnnotationRow> {
        self.lock().store.select_diseases(diseases)
    }

    /// Replace the `original` rows of an edit with the `edited` ones.
    /// Returns the new row count.
    pub fn approve_edit(&self, original: &[AnnotationRow], edited: &[AnnotationRow]) -> Result<usize> {
        self.edit(original, edited, None)
    }

    /// [`approve_edit`](Self::approve_edit), writing the new table to `path`
    /// before the session changes
    pub fn approve_edit_and_save(
        &self,
        original: &[AnnotationRow],
        edited: &[AnnotationRow],
        path: &Path,
    ) -> Result<usize> {
        self.edit(original, edited, Some(path))
    }

    fn edit(&self, original: &[AnnotationRow], edited: &[AnnotationRow], path: Option<&Path>) -> Result<usize> {
        let _guard = InFlight::acquire(&self.in_flight)?;
        let store = self.store();
        let updated = store.with_rows(replace_rows(store.rows(), original, edited));
        if let Some(path) = path {
            updated.save(path)?;
        }
        tracing::info!(original = original.len(), edited = edited.len(), "manual edit applied");
        let count = updated.len();
        self.lock().store = updated;
        Ok(count)
    }

    /// Write the current table to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        let store = self.store();
        store.save(path)?;
        tracing::info!(path = %path.display(), rows = store.len(), "annotation table saved");
        Ok(())
    }
}
