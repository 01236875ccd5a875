use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::controller::WizardEvent;
use super::domain::{BrokerToken, FormValues};

/// Resumable snapshot of an in-progress application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub values: FormValues,
    pub current_step: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker_token: Option<BrokerToken>,
    pub saved_at: DateTime<Utc>,
}

/// Single draft slot belonging to one visitor. Saves overwrite; there is no merge.
pub trait DraftRepository: Send + Sync {
    fn load(&self) -> Result<Option<Draft>, DraftError>;
    fn save(&self, draft: Draft) -> Result<(), DraftError>;
    fn clear(&self) -> Result<(), DraftError>;
}

/// Hands out the draft slot for a visitor so hosts never share slots between visitors.
pub trait DraftStore: Send + Sync {
    type Repository: DraftRepository + 'static;

    fn for_visitor(&self, visitor: &VisitorId) -> Result<Arc<Self::Repository>, DraftError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DraftError {
    #[error("draft storage unavailable: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored draft is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("visitor id '{0}' is not a valid draft key")]
    InvalidVisitor(String),
}

/// Browser-scoped visitor identifier, safe to use as a file stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VisitorId(String);

impl VisitorId {
    pub fn parse(raw: &str) -> Result<Self, DraftError> {
        let trimmed = raw.trim();
        let valid = !trimmed.is_empty()
            && trimmed.len() <= 64
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

        if valid {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(DraftError::InvalidVisitor(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Loads the visitor's draft and turns the outcome into a reducer event.
///
/// Storage and decoding failures are logged and reported as "no draft" so a bad
/// file never blocks the wizard.
pub fn load_draft<D: DraftRepository + ?Sized>(drafts: &D) -> WizardEvent {
    match drafts.load() {
        Ok(draft) => WizardEvent::DraftLoaded(draft),
        Err(err) => {
            warn!(error = %err, "ignoring unreadable draft");
            WizardEvent::DraftLoaded(None)
        }
    }
}

/// Draft slot persisted as one JSON file.
#[derive(Debug, Clone)]
pub struct FileDraftRepository {
    path: PathBuf,
}

impl FileDraftRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DraftRepository for FileDraftRepository {
    fn load(&self) -> Result<Option<Draft>, DraftError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let draft = serde_json::from_slice(&bytes)?;
        Ok(Some(draft))
    }

    fn save(&self, draft: Draft) -> Result<(), DraftError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let encoded = serde_json::to_vec_pretty(&draft)?;
        let staging = self
            .path
            .with_extension(format!("json.{}.tmp", Uuid::new_v4().simple()));
        fs::write(&staging, encoded)?;
        fs::rename(&staging, &self.path)?;
        debug!(path = %self.path.display(), step = draft.current_step, "draft saved");
        Ok(())
    }

    fn clear(&self) -> Result<(), DraftError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// One `<visitor>.json` file per visitor under a directory.
#[derive(Debug, Clone)]
pub struct FileDraftStore {
    directory: PathBuf,
}

impl FileDraftStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }
}

impl DraftStore for FileDraftStore {
    type Repository = FileDraftRepository;

    fn for_visitor(&self, visitor: &VisitorId) -> Result<Arc<Self::Repository>, DraftError> {
        let path = self.directory.join(format!("{}.json", visitor.as_str()));
        Ok(Arc::new(FileDraftRepository::new(path)))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDraftRepository {
    slot: Mutex<Option<Draft>>,
}

impl InMemoryDraftRepository {
    pub fn with_draft(draft: Draft) -> Self {
        Self {
            slot: Mutex::new(Some(draft)),
        }
    }

    pub fn snapshot(&self) -> Option<Draft> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DraftRepository for InMemoryDraftRepository {
    fn load(&self) -> Result<Option<Draft>, DraftError> {
        Ok(self.snapshot())
    }

    fn save(&self, draft: Draft) -> Result<(), DraftError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(draft);
        Ok(())
    }

    fn clear(&self) -> Result<(), DraftError> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryDraftStore {
    slots: Arc<Mutex<HashMap<VisitorId, Arc<InMemoryDraftRepository>>>>,
}

impl DraftStore for InMemoryDraftStore {
    type Repository = InMemoryDraftRepository;

    fn for_visitor(&self, visitor: &VisitorId) -> Result<Arc<Self::Repository>, DraftError> {
        let mut guard = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.entry(visitor.clone()).or_default().clone())
    }
}
