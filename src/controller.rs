use bytes::Bytes;

use crate::client::RestoreService;
use crate::compare::CompareBounds;
use crate::operations::{OperationId, PanelError};
use crate::session::{
    AbandonGuard, Completion, DisplayTarget, PendingRequest, Session, SessionError,
};

/// User intents. Presentation layers translate raw input into these.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    SelectFile {
        name: String,
        content_type: Option<String>,
        bytes: Bytes,
    },
    SelectPreset(String),
    SelectOperation(OperationId),
    SetParameter {
        name: String,
        value: f64,
    },
    Restore,
    /// Selects `op` (keeping entered values if it is already selected),
    /// applies `params` on top and sends the panel's request.
    ApplyOperation {
        op: OperationId,
        params: Vec<(String, f64)>,
    },
    Undo,
    Reset,
    JumpTo(usize),
    ToggleIntermediates(bool),
    LayoutCompare(CompareBounds),
    PressSlider(f64),
    DragSlider(f64),
    ReleaseSlider,
    ClickCompare(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Session state changed without touching the history.
    Updated,
    Appended { index: usize },
    /// A result arrived for a session that had moved on.
    Discarded,
    /// The intent had nothing to act on (e.g. undo at the first step).
    Unchanged,
}

/// Owns the session and the service handle; requests go out one at a time.
pub struct SessionController<S> {
    session: Session,
    service: S,
}

impl<S: RestoreService> SessionController<S> {
    pub fn new(session: Session, service: S) -> Self {
        Self { session, service }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn into_session(self) -> Session {
        self.session
    }

    pub async fn dispatch(&mut self, intent: Intent) -> Result<Outcome, SessionError> {
        match intent {
            Intent::SelectFile {
                name,
                content_type,
                bytes,
            } => {
                self.session.select_file(name, content_type, bytes);
                Ok(Outcome::Updated)
            }
            Intent::SelectPreset(name) => {
                self.session.select_preset(&name)?;
                Ok(Outcome::Updated)
            }
            Intent::SelectOperation(op) => {
                self.session.select_operation(op);
                Ok(Outcome::Updated)
            }
            Intent::SetParameter { name, value } => {
                self.session.set_parameter(&name, value)?;
                Ok(Outcome::Updated)
            }
            Intent::Restore => {
                let pending = self.session.begin_restore()?;
                self.send(pending).await
            }
            Intent::ApplyOperation { op, params } => {
                if let Some((name, _)) = params.iter().find(|(name, _)| op.param(name).is_none()) {
                    return Err(PanelError::UnknownParameter {
                        op,
                        name: name.clone(),
                    }
                    .into());
                }
                self.session.select_operation(op);
                for (name, value) in &params {
                    self.session.set_parameter(name, *value)?;
                }
                let pending = self.session.begin_operation()?;
                self.send(pending).await
            }
            Intent::Undo => Ok(if self.session.undo() {
                Outcome::Updated
            } else {
                Outcome::Unchanged
            }),
            Intent::Reset => Ok(match self.session.reset() {
                DisplayTarget::Empty => Outcome::Unchanged,
                _ => Outcome::Updated,
            }),
            Intent::JumpTo(index) => {
                self.session.jump(index)?;
                Ok(Outcome::Updated)
            }
            Intent::ToggleIntermediates(show) => {
                self.session.toggle_intermediates(show);
                Ok(Outcome::Updated)
            }
            Intent::LayoutCompare(bounds) => {
                self.session.compare_mut().set_bounds(bounds);
                Ok(Outcome::Updated)
            }
            Intent::PressSlider(x) => {
                self.session.compare_mut().pointer_down(x);
                Ok(Outcome::Updated)
            }
            Intent::DragSlider(x) => {
                self.session.compare_mut().pointer_move(x);
                Ok(Outcome::Updated)
            }
            Intent::ReleaseSlider => {
                self.session.compare_mut().pointer_up();
                Ok(Outcome::Updated)
            }
            Intent::ClickCompare(x) => {
                self.session.compare_mut().click(x);
                Ok(Outcome::Updated)
            }
        }
    }

    /// Dropping the returned future while the request is out abandons it.
    async fn send(&mut self, pending: PendingRequest) -> Result<Outcome, SessionError> {
        let request = pending.request().clone();
        let session = &mut self.session;
        let guard = AbandonGuard::new(pending, |pending| session.abandon(pending));
        let result = self.service.send(&request).await;
        let Some(pending) = guard.disarm() else {
            return Ok(Outcome::Discarded);
        };
        match self.session.complete(pending, result)? {
            Completion::Appended { index, .. } => Ok(Outcome::Appended { index }),
            Completion::Stale => Ok(Outcome::Discarded),
        }
    }
}
