use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{Response, StatusCode};
use serde::Deserialize;
use tauri::{Manager, State, Wry};

use crate::client::{HttpRestoreClient, RestoreError, RestoreService};
use crate::compare::CompareBounds;
use crate::config::ClientConfig;
use crate::ledger::{DisplayHandle, ARTIFACT_SCHEME};
use crate::operations::OperationId;
use crate::session::{AbandonGuard, PendingRequest, Session, SessionView};

pub struct DesktopState {
    session: Mutex<Session>,
    client: HttpRestoreClient,
}

impl DesktopState {
    pub fn new(config: &ClientConfig) -> Result<Self, RestoreError> {
        Ok(Self {
            session: Mutex::new(Session::new(config)),
            client: HttpRestoreClient::new(config)?,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Session>, String> {
        self.session
            .lock()
            .map_err(|_| "session state is poisoned".to_string())
    }

    async fn finish(&self, pending: PendingRequest) -> Result<SessionView, String> {
        deliver(&self.session, &self.client, pending).await
    }
}

/// Sends `pending` and applies the result. The lock is not held while the
/// request is on the wire, and a dropped command abandons the request.
async fn deliver<S: RestoreService>(
    session: &Mutex<Session>,
    service: &S,
    pending: PendingRequest,
) -> Result<SessionView, String> {
    let request = pending.request().clone();
    let guard = AbandonGuard::new(pending, |pending| {
        if let Ok(mut session) = session.lock() {
            session.abandon(pending);
        }
    });
    let result = service.send(&request).await;
    let Some(pending) = guard.disarm() else {
        return Err("request was abandoned".to_string());
    };

    let mut session = session
        .lock()
        .map_err(|_| "session state is poisoned".to_string())?;
    session
        .complete(pending, result)
        .map_err(|err| err.to_string())?;
    Ok(session.view())
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SliderEvent {
    Layout { left: f64, width: f64 },
    Press { x: f64 },
    Drag { x: f64 },
    Release,
    Click { x: f64 },
}

#[tauri::command]
fn session_view(state: State<'_, DesktopState>) -> Result<SessionView, String> {
    Ok(state.lock()?.view())
}

#[tauri::command]
fn session_select_file(
    state: State<'_, DesktopState>,
    name: String,
    content_type: Option<String>,
    bytes: Vec<u8>,
) -> Result<SessionView, String> {
    let mut session = state.lock()?;
    session.select_file(name, content_type, Bytes::from(bytes));
    Ok(session.view())
}

#[tauri::command]
fn session_select_preset(state: State<'_, DesktopState>, name: String) -> Result<SessionView, String> {
    let mut session = state.lock()?;
    session.select_preset(&name).map_err(|err| err.to_string())?;
    Ok(session.view())
}

#[tauri::command]
fn session_select_operation(
    state: State<'_, DesktopState>,
    op: OperationId,
) -> Result<SessionView, String> {
    let mut session = state.lock()?;
    session.select_operation(op);
    Ok(session.view())
}

#[tauri::command]
fn session_set_parameter(
    state: State<'_, DesktopState>,
    name: String,
    value: f64,
) -> Result<SessionView, String> {
    let mut session = state.lock()?;
    session
        .set_parameter(&name, value)
        .map_err(|err| err.to_string())?;
    Ok(session.view())
}

#[tauri::command]
async fn session_restore(state: State<'_, DesktopState>) -> Result<SessionView, String> {
    let pending = state.lock()?.begin_restore().map_err(|err| err.to_string())?;
    state.finish(pending).await
}

#[tauri::command]
async fn session_apply_operation(state: State<'_, DesktopState>) -> Result<SessionView, String> {
    let pending = state
        .lock()?
        .begin_operation()
        .map_err(|err| err.to_string())?;
    state.finish(pending).await
}

#[tauri::command]
fn session_undo(state: State<'_, DesktopState>) -> Result<SessionView, String> {
    let mut session = state.lock()?;
    session.undo();
    Ok(session.view())
}

#[tauri::command]
fn session_reset(state: State<'_, DesktopState>) -> Result<SessionView, String> {
    let mut session = state.lock()?;
    session.reset();
    Ok(session.view())
}

#[tauri::command]
fn session_jump(state: State<'_, DesktopState>, index: usize) -> Result<SessionView, String> {
    let mut session = state.lock()?;
    session.jump(index).map_err(|err| err.to_string())?;
    Ok(session.view())
}

#[tauri::command]
fn session_toggle_intermediates(
    state: State<'_, DesktopState>,
    show: bool,
) -> Result<SessionView, String> {
    let mut session = state.lock()?;
    session.toggle_intermediates(show);
    Ok(session.view())
}

#[tauri::command]
fn session_drag_slider(
    state: State<'_, DesktopState>,
    event: SliderEvent,
) -> Result<SessionView, String> {
    let mut session = state.lock()?;
    let compare = session.compare_mut();
    match event {
        SliderEvent::Layout { left, width } => compare.set_bounds(CompareBounds::new(left, width)),
        SliderEvent::Press { x } => compare.pointer_down(x),
        SliderEvent::Drag { x } => compare.pointer_move(x),
        SliderEvent::Release => compare.pointer_up(),
        SliderEvent::Click { x } => compare.click(x),
    }
    Ok(session.view())
}

/// Registers the session state, the `artifact://` protocol and the commands.
pub fn attach(builder: tauri::Builder<Wry>, config: &ClientConfig) -> Result<tauri::Builder<Wry>, RestoreError> {
    let state = DesktopState::new(config)?;
    Ok(builder
        .manage(state)
        .register_uri_scheme_protocol(ARTIFACT_SCHEME, |ctx, request| {
            let state = ctx.app_handle().state::<DesktopState>();
            serve_artifact(&state, request.uri().path())
        })
        .invoke_handler(tauri::generate_handler![
            session_view,
            session_select_file,
            session_select_preset,
            session_select_operation,
            session_set_parameter,
            session_restore,
            session_apply_operation,
            session_undo,
            session_reset,
            session_jump,
            session_toggle_intermediates,
            session_drag_slider
        ]))
}

fn serve_artifact(state: &DesktopState, path: &str) -> Response<Vec<u8>> {
    let body = DisplayHandle::from_path(path).and_then(|handle| {
        let session = state.lock().ok()?;
        session.resolve(handle).map(|bytes| bytes.to_vec())
    });

    let (status, content_type, body) = match body {
        Some(body) => (StatusCode::OK, sniff_content_type(&body), body),
        None => (StatusCode::NOT_FOUND, "text/plain", b"revoked".to_vec()),
    };
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, content_type)
        .body(body)
        .unwrap_or_else(|err| {
            log::error!("failed to build artifact response: {}", err);
            let mut response = Response::new(Vec::new());
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        })
}

fn sniff_content_type(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        "image/png"
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "application/octet-stream"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::DisplayTarget;
    use std::future::Future;
    use std::time::Duration;

    /// Loads a different file into the session while the request is out.
    struct ReloadingService<'a> {
        session: &'a Mutex<Session>,
    }

    impl RestoreService for ReloadingService<'_> {
        fn send(
            &self,
            _request: &crate::client::RestoreRequest,
        ) -> impl Future<Output = Result<Bytes, RestoreError>> + Send {
            if let Ok(mut session) = self.session.lock() {
                session.select_file("b.png", None, Bytes::from_static(b"B-ORIGINAL"));
            }
            async { Ok(Bytes::from_static(b"LATE")) }
        }
    }

    struct HangingService;

    impl RestoreService for HangingService {
        fn send(
            &self,
            _request: &crate::client::RestoreRequest,
        ) -> impl Future<Output = Result<Bytes, RestoreError>> + Send {
            std::future::pending()
        }
    }

    fn loaded_session() -> Mutex<Session> {
        let mut session = Session::default();
        session.select_file("a.png", None, Bytes::from_static(b"A"));
        Mutex::new(session)
    }

    fn state() -> DesktopState {
        DesktopState::new(&ClientConfig::default()).expect("state")
    }

    #[test]
    fn serves_live_handles_and_404s_revoked_ones() {
        let state = state();
        let handle = {
            let mut session = state.lock().expect("lock");
            session
                .select_file("a.png", None, Bytes::from_static(b"\x89PNG\r\n\x1a\nrest"))
                .handle()
        };

        let response = serve_artifact(&state, &format!("/{}", handle.id()));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "image/png");

        state.lock().expect("lock").close();
        let response = serve_artifact(&state, &format!("/{}", handle.id()));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn result_for_a_replaced_file_is_discarded() {
        let session = loaded_session();
        let pending = session.lock().expect("lock").begin_restore().expect("restore");

        let view = deliver(&session, &ReloadingService { session: &session }, pending)
            .await
            .expect("view");

        assert!(view.history.is_empty());
        assert!(!view.busy);
        assert_eq!(view.display, DisplayTarget::Original);
        assert_eq!(view.file.map(|file| file.name), Some("b.png".to_string()));
        let session = session.lock().expect("lock");
        assert_eq!(session.ledger().live_count(), 1);
        assert_eq!(session.displayed_bytes().map(|b| b.as_ref()), Some(&b"B-ORIGINAL"[..]));
    }

    #[tokio::test]
    async fn dropped_command_releases_the_session() {
        let session = loaded_session();
        let pending = session.lock().expect("lock").begin_restore().expect("restore");

        let outcome = tokio::time::timeout(
            Duration::from_millis(20),
            deliver(&session, &HangingService, pending),
        )
        .await;

        assert!(outcome.is_err());
        let mut session = session.lock().expect("lock");
        assert!(!session.is_busy());
        assert!(session.begin_restore().is_ok());
    }

    #[test]
    fn malformed_paths_are_not_found() {
        let response = serve_artifact(&state(), "/not-a-handle");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn slider_events_use_tagged_json() {
        let event: SliderEvent =
            serde_json::from_str(r#"{"kind":"layout","left":10,"width":200}"#).expect("layout");
        assert!(matches!(event, SliderEvent::Layout { left, width } if left == 10.0 && width == 200.0));
        let event: SliderEvent = serde_json::from_str(r#"{"kind":"release"}"#).expect("release");
        assert!(matches!(event, SliderEvent::Release));
    }

    #[test]
    fn content_sniffing_falls_back_to_octet_stream() {
        assert_eq!(sniff_content_type(&[0xFF, 0xD8, 0xFF, 0xE0]), "image/jpeg");
        assert_eq!(sniff_content_type(b"RIFF\0\0\0\0WEBPVP8 "), "image/webp");
        assert_eq!(sniff_content_type(b"plain"), "application/octet-stream");
    }
}
