use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::ledger::DisplayHandle;
use crate::operations::OperationId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HistoryError {
    #[error("history index {index} out of range (len {len})")]
    OutOfRange { index: usize, len: usize },
}

/// One produced image. Never the original upload.
#[derive(Debug, Clone)]
pub struct Artifact {
    bytes: Bytes,
    label: String,
    handle: DisplayHandle,
    operation: Option<OperationId>,
    created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(
        bytes: Bytes,
        label: impl Into<String>,
        handle: DisplayHandle,
        operation: Option<OperationId>,
    ) -> Self {
        Self {
            bytes,
            label: label.into(),
            handle,
            operation,
            created_at: Utc::now(),
        }
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn handle(&self) -> DisplayHandle {
        self.handle
    }

    pub fn operation(&self) -> Option<OperationId> {
        self.operation
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Linear history of produced artifacts with a movable cursor.
///
/// Appending after a rewind keeps every earlier entry and extends the
/// sequence; forward entries are never truncated.
#[derive(Debug, Default)]
pub struct EditHistory {
    entries: Vec<Artifact>,
    cursor: Option<usize>,
}

impl EditHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, artifact: Artifact) -> usize {
        self.entries.push(artifact);
        let index = self.entries.len() - 1;
        self.cursor = Some(index);
        index
    }

    pub fn jump(&mut self, index: usize) -> Result<&Artifact, HistoryError> {
        if index >= self.entries.len() {
            return Err(HistoryError::OutOfRange {
                index,
                len: self.entries.len(),
            });
        }
        self.cursor = Some(index);
        Ok(&self.entries[index])
    }

    pub fn current(&self) -> Option<&Artifact> {
        self.cursor.and_then(|index| self.entries.get(index))
    }

    pub fn current_index(&self) -> Option<usize> {
        self.cursor
    }

    pub fn can_undo(&self) -> bool {
        matches!(self.cursor, Some(index) if index > 0)
    }

    pub fn can_reset(&self) -> bool {
        self.entries.len() > 1
    }

    /// Steps the cursor back by one. No-op when undo is unavailable.
    pub fn undo(&mut self) -> Option<&Artifact> {
        match self.cursor {
            Some(index) if index > 0 => {
                self.cursor = Some(index - 1);
                self.entries.get(index - 1)
            }
            _ => None,
        }
    }

    /// Moves the cursor to the first produced artifact. Returns `None` on an
    /// empty history; falling back to the original is the caller's job.
    pub fn reset(&mut self) -> Option<&Artifact> {
        if self.entries.is_empty() {
            return None;
        }
        self.cursor = Some(0);
        self.entries.first()
    }

    /// Handles of every entry, for revocation ahead of [`EditHistory::clear`].
    pub fn handles(&self) -> Vec<DisplayHandle> {
        self.entries.iter().map(Artifact::handle).collect()
    }

    /// Empties the sequence. Revoke [`EditHistory::handles`] first.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = None;
    }

    pub fn get(&self, index: usize) -> Option<&Artifact> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
