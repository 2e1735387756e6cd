use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

use crate::client::{RestoreError, RestoreRequest, UploadImage};
use crate::compare::{AfterClip, CompareController};
use crate::config::{ClientConfig, Preset, PresetValues};
use crate::history::{Artifact, EditHistory, HistoryError};
use crate::ledger::{DisplayHandle, ResourceLedger};
use crate::operations::{OperationId, OperationPanel, PanelError};

pub const RESTORED_LABEL: &str = "Restored";

#[derive(Debug, Error, PartialEq)]
pub enum SessionError {
    #[error("{0}")]
    Precondition(String),
    #[error("a request is already in flight")]
    Busy,
    #[error(transparent)]
    Restore(#[from] RestoreError),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    Panel(#[from] PanelError),
}

/// The uploaded original. Never part of the edit history.
#[derive(Debug, Clone)]
pub struct SourceImage {
    name: String,
    content_type: Option<String>,
    bytes: Bytes,
    handle: DisplayHandle,
}

impl SourceImage {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn handle(&self) -> DisplayHandle {
        self.handle
    }

    pub fn meta(&self) -> FileMeta {
        FileMeta {
            name: self.name.clone(),
            size_bytes: self.bytes.len() as u64,
            size_label: format_bytes(self.bytes.len() as u64),
        }
    }

    fn upload(&self) -> UploadImage {
        UploadImage::new(self.name.clone(), self.content_type.clone(), self.bytes.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    pub name: String,
    pub size_bytes: u64,
    pub size_label: String,
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0usize;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let fixed = format!("{:.2}", value);
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, UNITS[unit])
}

/// What the "after" pane currently shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DisplayTarget {
    Empty,
    Original,
    Artifact { index: usize },
}

/// A request issued against one session generation.
///
/// Hand it back to [`Session::complete`] with the service result, or to
/// [`Session::abandon`] if the result will never arrive.
#[derive(Debug)]
pub struct PendingRequest {
    ticket: u64,
    generation: u64,
    label: String,
    request: RestoreRequest,
}

impl PendingRequest {
    pub fn request(&self) -> &RestoreRequest {
        &self.request
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Holds a [`PendingRequest`] while it is on the wire and hands it to
/// `abandon` if dropped before [`AbandonGuard::disarm`] takes it back.
///
/// Callers that await the service inside a future which may itself be
/// dropped (timeouts, a closed window) keep the session from staying busy.
pub struct AbandonGuard<F: FnMut(PendingRequest)> {
    pending: Option<PendingRequest>,
    abandon: F,
}

impl<F: FnMut(PendingRequest)> AbandonGuard<F> {
    pub fn new(pending: PendingRequest, abandon: F) -> Self {
        Self {
            pending: Some(pending),
            abandon,
        }
    }

    /// Takes the request back so its result can go to [`Session::complete`].
    pub fn disarm(mut self) -> Option<PendingRequest> {
        self.pending.take()
    }
}

impl<F: FnMut(PendingRequest)> Drop for AbandonGuard<F> {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            log::warn!("{} dropped before its result arrived", pending.label);
            (self.abandon)(pending);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Appended { index: usize, handle: DisplayHandle },
    /// The session moved on (new file, or the ticket was abandoned) while the
    /// request was out. Nothing was applied.
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Thumbnail {
    pub index: usize,
    pub label: String,
    pub url: String,
    pub current: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterView {
    pub name: String,
    pub label: String,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub value: f64,
}

/// Snapshot handed to presentation layers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub file: Option<FileMeta>,
    pub original_url: Option<String>,
    pub history: Vec<Thumbnail>,
    pub current_index: Option<usize>,
    pub can_undo: bool,
    pub can_reset: bool,
    pub display: DisplayTarget,
    pub display_url: Option<String>,
    pub split_percent: f64,
    pub after_clip: AfterClip,
    pub operation: OperationId,
    pub parameters: Vec<ParameterView>,
    pub active_preset: Option<String>,
    pub show_intermediates: bool,
    pub intermediates: Vec<Thumbnail>,
    pub busy: bool,
    pub status: String,
}

#[derive(Debug)]
pub struct Session {
    original: Option<SourceImage>,
    history: EditHistory,
    ledger: ResourceLedger,
    panel: OperationPanel,
    compare: CompareController,
    presets: Vec<Preset>,
    active_preset: Option<String>,
    show_intermediates: bool,
    display: DisplayTarget,
    generation: u64,
    next_ticket: u64,
    in_flight: Option<u64>,
    status: String,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(&ClientConfig::default())
    }
}

impl Session {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            original: None,
            history: EditHistory::new(),
            ledger: ResourceLedger::new(),
            panel: OperationPanel::default(),
            compare: CompareController::new(),
            presets: config.presets.clone(),
            active_preset: config.initial_preset().map(|preset| preset.name.clone()),
            show_intermediates: false,
            display: DisplayTarget::Empty,
            generation: 0,
            next_ticket: 0,
            in_flight: None,
            status: String::new(),
        }
    }

    pub fn original(&self) -> Option<&SourceImage> {
        self.original.as_ref()
    }

    pub fn history(&self) -> &EditHistory {
        &self.history
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    pub fn panel(&self) -> &OperationPanel {
        &self.panel
    }

    pub fn compare(&self) -> &CompareController {
        &self.compare
    }

    pub fn compare_mut(&mut self) -> &mut CompareController {
        &mut self.compare
    }

    pub fn display(&self) -> DisplayTarget {
        self.display
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn show_intermediates(&self) -> bool {
        self.show_intermediates
    }

    pub fn active_preset(&self) -> Option<&Preset> {
        self.active_preset
            .as_deref()
            .and_then(|name| self.presets.iter().find(|preset| preset.name == name))
    }

    pub fn preset_values(&self) -> PresetValues {
        self.active_preset()
            .map(|preset| preset.values)
            .unwrap_or_default()
    }

    /// Replaces the original and drops the whole history.
    pub fn select_file(
        &mut self,
        name: impl Into<String>,
        content_type: Option<String>,
        bytes: Bytes,
    ) -> &SourceImage {
        self.discard_history();
        if let Some(previous) = self.original.take() {
            self.ledger.revoke(previous.handle);
        }

        let name = name.into();
        let content_type = content_type.filter(|value| !value.trim().is_empty());
        let handle = self.ledger.register(bytes.clone());
        log::info!("selected {} ({} bytes)", name, bytes.len());

        self.generation += 1;
        self.in_flight = None;
        self.compare.reset();
        self.display = DisplayTarget::Original;
        self.set_status("Ready to restore");

        self.original.insert(SourceImage {
            name,
            content_type,
            bytes,
            handle,
        })
    }

    pub fn select_preset(&mut self, name: &str) -> Result<PresetValues, SessionError> {
        let preset = self
            .presets
            .iter()
            .find(|preset| preset.name.eq_ignore_ascii_case(name.trim()))
            .cloned()
            .ok_or_else(|| SessionError::Precondition(format!("Unknown preset: {}", name)))?;

        let values = preset.values;
        self.active_preset = Some(preset.name);
        self.set_status(format!(
            "Preset selected: h={}, CLAHE={}, sharp={}",
            values.h, values.clahe, values.sharp
        ));
        Ok(values)
    }

    pub fn select_operation(&mut self, op: OperationId) {
        if self.panel.selected() != op {
            self.panel.select(op);
        }
    }

    pub fn set_parameter(&mut self, name: &str, value: f64) -> Result<f64, SessionError> {
        Ok(self.panel.set(name, value)?)
    }

    pub fn begin_restore(&mut self) -> Result<PendingRequest, SessionError> {
        let Some(upload) = self.original.as_ref().map(SourceImage::upload) else {
            return Err(self.precondition("Please select an image first."));
        };
        self.ensure_idle()?;

        let request = RestoreRequest::restore(upload, self.preset_values());
        self.set_status("Uploading image to server…");
        Ok(self.issue(RESTORED_LABEL.to_string(), request))
    }

    /// Applies the panel's operation to the current artifact, or to the
    /// original while the history is empty.
    pub fn begin_operation(&mut self) -> Result<PendingRequest, SessionError> {
        let base = match self.history.current() {
            Some(artifact) => Some(UploadImage::from_artifact(artifact.bytes().clone())),
            None => self.original.as_ref().map(SourceImage::upload),
        };
        let Some(upload) = base else {
            return Err(self.precondition("Upload and restore an image first."));
        };
        self.ensure_idle()?;

        let operation = self.panel.current_request();
        let label = format!("Op: {}", operation.op);
        self.set_status(format!("Applying operation: {}…", operation.op));
        let request = RestoreRequest::with_operation(upload, self.preset_values(), operation);
        Ok(self.issue(label, request))
    }

    /// Applies a service result. Results for an older generation or a ticket
    /// that is no longer in flight are dropped without touching the session.
    pub fn complete(
        &mut self,
        pending: PendingRequest,
        result: Result<Bytes, RestoreError>,
    ) -> Result<Completion, SessionError> {
        if pending.generation != self.generation || self.in_flight != Some(pending.ticket) {
            log::warn!(
                "dropping stale response for {} (generation {} vs {})",
                pending.label,
                pending.generation,
                self.generation
            );
            return Ok(Completion::Stale);
        }
        self.in_flight = None;

        let bytes = match result {
            Ok(bytes) => bytes,
            Err(err) => {
                let prefix = if pending.request.operation.is_some() {
                    "Operation error"
                } else {
                    "Restore error"
                };
                log::warn!("{} failed: {}", pending.label, err);
                self.set_status(format!("{}: {}", prefix, err));
                return Err(err.into());
            }
        };

        let handle = self.ledger.register(bytes.clone());
        let op = pending.request.op();
        let index = self
            .history
            .append(Artifact::new(bytes, pending.label, handle, op));
        self.display = DisplayTarget::Artifact { index };

        match op {
            Some(op) => self.set_status(format!("Applied {}", op)),
            None => self.set_status("Restoration complete"),
        }
        Ok(Completion::Appended { index, handle })
    }

    /// Releases the in-flight slot for a request whose result will never be
    /// delivered.
    pub fn abandon(&mut self, pending: PendingRequest) {
        if self.in_flight == Some(pending.ticket) {
            self.in_flight = None;
            self.set_status("Request cancelled");
        }
    }

    pub fn undo(&mut self) -> bool {
        if self.history.undo().is_none() {
            return false;
        }
        if let Some(index) = self.history.current_index() {
            self.display = DisplayTarget::Artifact { index };
        }
        self.set_status("Undo last operation");
        true
    }

    pub fn reset(&mut self) -> DisplayTarget {
        if self.history.reset().is_some() {
            self.display = DisplayTarget::Artifact { index: 0 };
            self.set_status("Reset to first restored");
        } else if self.original.is_some() {
            self.display = DisplayTarget::Original;
            self.set_status("Reset to original");
        }
        self.display
    }

    pub fn jump(&mut self, index: usize) -> Result<(), SessionError> {
        let label = self.history.jump(index)?.label().to_string();
        self.display = DisplayTarget::Artifact { index };
        self.set_status(format!("Jumped to {}", label));
        Ok(())
    }

    pub fn toggle_intermediates(&mut self, show: bool) {
        self.show_intermediates = show;
    }

    pub fn intermediates(&self) -> Vec<Thumbnail> {
        if !self.show_intermediates || self.history.len() <= 1 {
            return Vec::new();
        }
        self.thumbnails()
    }

    pub fn displayed_handle(&self) -> Option<DisplayHandle> {
        match self.display {
            DisplayTarget::Empty => None,
            DisplayTarget::Original => self.original.as_ref().map(SourceImage::handle),
            DisplayTarget::Artifact { index } => self.history.get(index).map(Artifact::handle),
        }
    }

    /// Bytes behind the "after" pane, for export.
    pub fn displayed_bytes(&self) -> Option<&Bytes> {
        match self.display {
            DisplayTarget::Empty => None,
            DisplayTarget::Original => self.original.as_ref().map(SourceImage::bytes),
            DisplayTarget::Artifact { index } => self.history.get(index).map(Artifact::bytes),
        }
    }

    pub fn resolve(&self, handle: DisplayHandle) -> Option<&Bytes> {
        self.ledger.resolve(handle)
    }

    /// Revokes every handle the session still holds.
    pub fn close(&mut self) -> usize {
        let mut revoked = self.discard_history();
        if let Some(original) = self.original.take() {
            revoked += usize::from(self.ledger.revoke(original.handle));
        }
        self.display = DisplayTarget::Empty;
        self.in_flight = None;
        self.generation += 1;
        revoked
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            file: self.original.as_ref().map(SourceImage::meta),
            original_url: self.original.as_ref().map(|original| original.handle.url()),
            history: self.thumbnails(),
            current_index: self.history.current_index(),
            can_undo: self.history.can_undo(),
            can_reset: self.history.can_reset(),
            display: self.display,
            display_url: self.displayed_handle().map(|handle| handle.url()),
            split_percent: self.compare.percent(),
            after_clip: self.compare.after_clip(),
            operation: self.panel.selected(),
            parameters: self
                .panel
                .selected()
                .schema()
                .iter()
                .map(|spec| ParameterView {
                    name: spec.name.to_string(),
                    label: spec.label.to_string(),
                    min: spec.min,
                    max: spec.max,
                    step: spec.step,
                    value: self.panel.value(spec.name).unwrap_or(spec.default),
                })
                .collect(),
            active_preset: self.active_preset.clone(),
            show_intermediates: self.show_intermediates,
            intermediates: self.intermediates(),
            busy: self.is_busy(),
            status: self.status.clone(),
        }
    }

    fn thumbnails(&self) -> Vec<Thumbnail> {
        let current = self.history.current_index();
        self.history
            .iter()
            .enumerate()
            .map(|(index, artifact)| Thumbnail {
                index,
                label: artifact.label().to_string(),
                url: artifact.handle().url(),
                current: current == Some(index),
            })
            .collect()
    }

    fn discard_history(&mut self) -> usize {
        let revoked = self.ledger.revoke_all(self.history.handles());
        self.history.clear();
        revoked
    }

    fn ensure_idle(&mut self) -> Result<(), SessionError> {
        if self.in_flight.is_some() {
            log::warn!("request rejected, another one is still in flight");
            return Err(SessionError::Busy);
        }
        Ok(())
    }

    fn issue(&mut self, label: String, request: RestoreRequest) -> PendingRequest {
        self.next_ticket += 1;
        self.in_flight = Some(self.next_ticket);
        PendingRequest {
            ticket: self.next_ticket,
            generation: self.generation,
            label,
            request,
        }
    }

    fn precondition(&mut self, message: &str) -> SessionError {
        self.set_status(message);
        SessionError::Precondition(message.to_string())
    }

    fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
        log::info!("{}", self.status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded() -> Session {
        let mut session = Session::default();
        session.select_file("a.jpg", Some("image/jpeg".into()), Bytes::from_static(b"A"));
        session
    }

    fn succeed(session: &mut Session, pending: PendingRequest, payload: &'static [u8]) -> usize {
        match session.complete(pending, Ok(Bytes::from_static(payload))) {
            Ok(Completion::Appended { index, .. }) => index,
            other => panic!("expected append, got {:?}", other),
        }
    }

    #[test]
    fn format_bytes_matches_human_sizes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(2_359_296), "2.25 MB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024 * 1024), "5120 GB");
    }

    #[test]
    fn select_file_registers_original_and_shows_it() {
        let session = loaded();
        let original = session.original().expect("original");

        assert_eq!(original.meta().name, "a.jpg");
        assert_eq!(original.meta().size_label, "1 B");
        assert_eq!(session.display(), DisplayTarget::Original);
        assert_eq!(session.displayed_bytes().map(|b| b.as_ref()), Some(&b"A"[..]));
        assert_eq!(session.ledger().live_count(), 1);
        assert_eq!(session.status(), "Ready to restore");
    }

    #[test]
    fn blank_content_type_is_stored_as_unknown() {
        let mut session = Session::default();
        session.select_file("scan", Some(String::new()), Bytes::from_static(b"A"));

        assert_eq!(session.original().and_then(SourceImage::content_type), None);
        let pending = session.begin_restore().expect("restore");
        assert_eq!(pending.request().image.content_type, None);
    }

    #[test]
    fn dropped_guard_abandons_and_disarmed_guard_does_not() {
        let mut session = loaded();

        let pending = session.begin_restore().expect("restore");
        let session_ref = &mut session;
        drop(AbandonGuard::new(pending, |pending| session_ref.abandon(pending)));
        assert!(!session.is_busy());
        assert_eq!(session.status(), "Request cancelled");

        let pending = session.begin_restore().expect("restore again");
        let mut abandoned = 0;
        let guard = AbandonGuard::new(pending, |_| abandoned += 1);
        let pending = guard.disarm().expect("pending");
        assert_eq!(abandoned, 0);
        assert!(session.is_busy());

        succeed(&mut session, pending, b"B");
        assert!(!session.is_busy());
    }

    #[test]
    fn restore_without_original_is_a_precondition_failure() {
        let mut session = Session::default();
        let error = session.begin_restore().expect_err("precondition");

        assert!(matches!(error, SessionError::Precondition(_)));
        assert!(!session.is_busy());
        assert_eq!(session.status(), "Please select an image first.");

        assert!(matches!(
            session.begin_operation(),
            Err(SessionError::Precondition(_))
        ));
    }

    #[test]
    fn restore_appends_first_artifact() {
        let mut session = loaded();
        let pending = session.begin_restore().expect("pending");
        assert!(session.is_busy());
        assert_eq!(pending.request().op(), None);
        assert_eq!(pending.request().image.file_name, "a.jpg");

        let index = succeed(&mut session, pending, b"B");

        assert_eq!(index, 0);
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history().current_index(), Some(0));
        assert!(!session.history().can_undo());
        assert!(!session.history().can_reset());
        assert_eq!(session.display(), DisplayTarget::Artifact { index: 0 });
        assert_eq!(session.history().current().map(Artifact::label), Some(RESTORED_LABEL));
        assert!(!session.is_busy());
        assert_eq!(session.status(), "Restoration complete");
    }

    #[test]
    fn operation_uses_current_artifact_as_base() {
        let mut session = loaded();
        let restore = session.begin_restore().expect("restore");
        succeed(&mut session, restore, b"B");

        session.select_operation(OperationId::Denoise);
        session.set_parameter("h", 15.0).expect("h");
        let pending = session.begin_operation().expect("operation");

        assert_eq!(pending.request().image.bytes.as_ref(), b"B");
        assert_eq!(pending.request().image.file_name, "input.png");
        assert_eq!(pending.label(), "Op: denoise");
        let operation = pending.request().operation.clone().expect("operation");
        assert_eq!(operation.param("h"), Some(15.0));

        let index = succeed(&mut session, pending, b"C");
        assert_eq!(index, 1);
        assert!(session.history().can_undo());
        assert!(session.history().can_reset());

        assert!(session.undo());
        assert_eq!(session.history().current_index(), Some(0));
        assert_eq!(session.displayed_bytes().map(|b| b.as_ref()), Some(&b"B"[..]));
        assert_eq!(session.status(), "Undo last operation");
        assert!(!session.undo());
    }

    #[test]
    fn operation_without_history_uploads_original() {
        let mut session = loaded();
        session.select_operation(OperationId::Sharpen);
        let pending = session.begin_operation().expect("operation");

        assert_eq!(pending.request().image.file_name, "a.jpg");
        assert_eq!(pending.request().image.content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(pending.request().op(), Some(OperationId::Sharpen));
    }

    #[test]
    fn service_failure_leaves_history_untouched() {
        let mut session = loaded();
        let restore = session.begin_restore().expect("restore");
        succeed(&mut session, restore, b"B");

        let pending = session.begin_operation().expect("operation");
        let error = session
            .complete(
                pending,
                Err(RestoreError::Service {
                    status: 500,
                    body: "decode error".into(),
                }),
            )
            .expect_err("service error");

        assert!(error.to_string().contains("decode error"));
        assert!(session.status().contains("decode error"));
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history().current_index(), Some(0));
        assert_eq!(session.ledger().live_count(), 2);
        assert!(!session.is_busy());
    }

    #[test]
    fn second_request_while_busy_is_rejected() {
        let mut session = loaded();
        let first = session.begin_restore().expect("first");

        assert_eq!(session.begin_restore().map(|_| ()), Err(SessionError::Busy));
        assert_eq!(session.begin_operation().map(|_| ()), Err(SessionError::Busy));

        session.abandon(first);
        assert!(!session.is_busy());
        assert!(session.begin_restore().is_ok());
    }

    #[test]
    fn response_for_a_replaced_file_is_dropped() {
        let mut session = loaded();
        let pending = session.begin_restore().expect("pending");

        session.select_file("b.jpg", None, Bytes::from_static(b"other"));
        let live_before = session.ledger().live_count();

        let outcome = session
            .complete(pending, Ok(Bytes::from_static(b"late")))
            .expect("stale completion");

        assert_eq!(outcome, Completion::Stale);
        assert!(session.history().is_empty());
        assert_eq!(session.ledger().live_count(), live_before);
        assert_eq!(session.display(), DisplayTarget::Original);
    }

    #[test]
    fn abandoned_ticket_cannot_complete_later() {
        let mut session = loaded();
        let first = session.begin_restore().expect("first");
        let stale = PendingRequest {
            ticket: first.ticket,
            generation: first.generation,
            label: first.label.clone(),
            request: first.request.clone(),
        };
        session.abandon(first);

        let second = session.begin_restore().expect("second");
        assert_eq!(
            session.complete(stale, Ok(Bytes::from_static(b"old"))),
            Ok(Completion::Stale)
        );
        assert!(session.is_busy());
        succeed(&mut session, second, b"new");
        assert_eq!(session.history().len(), 1);
    }

    #[test]
    fn reset_walks_back_to_first_and_appends_extend() {
        let mut session = loaded();
        let restore = session.begin_restore().expect("restore");
        succeed(&mut session, restore, b"B");
        let op = session.begin_operation().expect("op");
        succeed(&mut session, op, b"C");

        assert_eq!(session.reset(), DisplayTarget::Artifact { index: 0 });
        assert_eq!(session.status(), "Reset to first restored");

        let pending = session.begin_operation().expect("operation");
        assert_eq!(pending.request().image.bytes.as_ref(), b"B");
        let index = succeed(&mut session, pending, b"D");

        assert_eq!(index, 2);
        let labels: Vec<&str> = session.history().iter().map(Artifact::label).collect();
        assert_eq!(labels, vec!["Restored", "Op: denoise", "Op: denoise"]);
    }

    #[test]
    fn reset_with_empty_history_falls_back_to_original() {
        let mut session = loaded();
        session.compare_mut().set_percent(10.0);

        assert_eq!(session.reset(), DisplayTarget::Original);
        assert_eq!(session.status(), "Reset to original");

        let mut empty = Session::default();
        assert_eq!(empty.reset(), DisplayTarget::Empty);
    }

    #[test]
    fn new_file_revokes_every_previous_handle() {
        let mut session = loaded();
        let restore = session.begin_restore().expect("restore");
        succeed(&mut session, restore, b"B");
        let op = session.begin_operation().expect("op");
        succeed(&mut session, op, b"C");
        session.compare_mut().set_percent(80.0);

        let old_handles: Vec<DisplayHandle> = session
            .history()
            .handles()
            .into_iter()
            .chain(session.original().map(SourceImage::handle))
            .collect();
        assert_eq!(session.ledger().live_count(), 3);

        session.select_file("b.png", None, Bytes::from_static(b"NEW"));

        assert!(old_handles.iter().all(|handle| !session.ledger().is_live(*handle)));
        assert_eq!(session.ledger().live_count(), 1);
        assert!(session.history().is_empty());
        assert_eq!(session.compare().percent(), 50.0);
        assert_eq!(session.display(), DisplayTarget::Original);
    }

    #[test]
    fn jump_moves_display_and_rejects_bad_index() {
        let mut session = loaded();
        let restore = session.begin_restore().expect("restore");
        succeed(&mut session, restore, b"B");
        let op = session.begin_operation().expect("op");
        succeed(&mut session, op, b"C");

        session.jump(0).expect("jump");
        assert_eq!(session.display(), DisplayTarget::Artifact { index: 0 });
        assert_eq!(session.status(), "Jumped to Restored");

        assert_eq!(
            session.jump(5),
            Err(SessionError::History(HistoryError::OutOfRange { index: 5, len: 2 }))
        );
        assert_eq!(session.history().current_index(), Some(0));
    }

    #[test]
    fn intermediates_need_toggle_and_more_than_one_step() {
        let mut session = loaded();
        let restore = session.begin_restore().expect("restore");
        succeed(&mut session, restore, b"B");

        session.toggle_intermediates(true);
        assert!(session.intermediates().is_empty());

        let op = session.begin_operation().expect("op");
        succeed(&mut session, op, b"C");
        let thumbs = session.intermediates();
        assert_eq!(thumbs.len(), 2);
        assert!(thumbs[1].current);
        assert!(!thumbs[0].current);

        session.toggle_intermediates(false);
        assert!(session.intermediates().is_empty());
    }

    #[test]
    fn preset_selection_drives_request_defaults() {
        let mut session = loaded();
        assert_eq!(session.preset_values(), PresetValues::default());

        let values = session.select_preset("strong").expect("preset");
        assert_eq!(values.h, 15.0);
        assert_eq!(session.status(), "Preset selected: h=15, CLAHE=3, sharp=1.5");

        let pending = session.begin_restore().expect("restore");
        assert_eq!(pending.request().preset, values);

        assert!(matches!(
            session.select_preset("vivid"),
            Err(SessionError::Precondition(_))
        ));
        assert_eq!(session.active_preset().map(|p| p.name.as_str()), Some("strong"));
    }

    #[test]
    fn close_revokes_everything() {
        let mut session = loaded();
        let restore = session.begin_restore().expect("restore");
        succeed(&mut session, restore, b"B");

        assert_eq!(session.close(), 2);
        assert_eq!(session.ledger().live_count(), 0);
        assert_eq!(session.display(), DisplayTarget::Empty);
    }

    #[test]
    fn view_reflects_session_state() {
        let mut session = loaded();
        let restore = session.begin_restore().expect("restore");
        succeed(&mut session, restore, b"B");
        session.select_operation(OperationId::Brightness);

        let view = session.view();
        assert_eq!(view.file.as_ref().map(|f| f.name.as_str()), Some("a.jpg"));
        assert_eq!(view.history.len(), 1);
        assert_eq!(view.current_index, Some(0));
        assert_eq!(view.operation, OperationId::Brightness);
        assert_eq!(view.parameters.len(), 2);
        assert_eq!(view.split_percent, 50.0);
        assert_eq!(view.display_url, view.history.first().map(|t| t.url.clone()));
        assert!(!view.busy);

        let json = serde_json::to_value(&view).expect("json");
        assert_eq!(json["display"]["kind"], "artifact");
        assert_eq!(json["activePreset"], "balanced");
    }
}
