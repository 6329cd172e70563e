//! Session management: each session owns an independent emulator and
//! shell bridge; the manager routes host input to the single active one.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};

use bytes::Bytes;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use filament_common::error::SessionError;
use filament_common::shell::{CustomShell, ShellStartOptions};
use filament_common::types::Size;

use crate::events::{EventBus, SessionCommand, SessionEvent};
use crate::mouse::{MouseEvent, MouseRouting};
use crate::rpc::RpcRouter;
use crate::shell::ShellBridge;
use crate::terminal::TermEvent;
use crate::{trace, Emulator};

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// Create a new unique session ID
    pub fn new() -> Self {
        Self(SESSION_COUNTER.fetch_add(1, Ordering::SeqCst))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Creating,
    Active,
    Inactive,
    Failed,
    Disposed,
}

/// Renderer-facing font settings, broadcast by the manager.
#[derive(Debug, Clone, PartialEq)]
pub struct FontConfig {
    pub family: String,
    pub size: f32,
}

impl Default for FontConfig {
    fn default() -> Self {
        Self {
            family: "monospace".to_string(),
            size: 12.0,
        }
    }
}

/// Per-session settings. Each session owns its own instance.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub cols: u16,
    pub rows: u16,
    pub working_directory: PathBuf,
    pub environment: HashMap<String, String>,
    pub font: FontConfig,
    pub process_metadata: HashMap<String, String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let options = ShellStartOptions::default();
        Self {
            cols: options.cols,
            rows: options.rows,
            working_directory: options.working_directory,
            environment: options.environment,
            font: FontConfig::default(),
            process_metadata: HashMap::new(),
        }
    }
}

impl SessionSettings {
    fn start_options(&self) -> ShellStartOptions {
        let mut options = ShellStartOptions::default().with_size(self.cols, self.rows);
        options.working_directory = self.working_directory.clone();
        options.environment = self.environment.clone();
        options
    }
}

/// Host-facing view of one session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: SessionId,
    pub title: String,
    pub state: SessionState,
    pub settings: SessionSettings,
}

struct SessionEntry {
    id: SessionId,
    title: Arc<StdRwLock<String>>,
    settings: SessionSettings,
    state: Arc<StdRwLock<SessionState>>,
    emulator: Arc<Mutex<Emulator>>,
    bridge: Arc<ShellBridge>,
    pump: Option<JoinHandle<()>>,
}

impl SessionEntry {
    fn state(&self) -> SessionState {
        *self.state.read().expect("session state poisoned")
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write().expect("session state poisoned") = state;
    }
}

struct ManagerInner {
    sessions: Vec<SessionEntry>,
    active: Option<SessionId>,
}

/// Owns up to `max_sessions` independent sessions and routes input to
/// the active one. Thread-safe.
pub struct SessionManager {
    inner: Arc<RwLock<ManagerInner>>,
    max_sessions: usize,
    events: EventBus,
    rpc: Arc<RpcRouter>,
    cancel: CancellationToken,
}

impl SessionManager {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ManagerInner {
                sessions: Vec::new(),
                active: None,
            })),
            max_sessions,
            events: EventBus::new(),
            rpc: Arc::new(RpcRouter::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// The process-wide RPC router shared by every session.
    pub fn rpc_router(&self) -> Arc<RpcRouter> {
        self.rpc.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.event_receiver()
    }

    pub fn command_sender(&self) -> tokio::sync::mpsc::Sender<SessionCommand> {
        self.events.command_sender()
    }

    pub fn take_command_receiver(
        &mut self,
    ) -> Option<tokio::sync::mpsc::Receiver<SessionCommand>> {
        self.events.take_command_receiver()
    }

    /// Create a session with defaults (80×24, fresh emulator and
    /// scrollback) around the given shell, start it, and make it active
    /// if no session is. Capacity overflow and shell start failures are
    /// typed errors.
    pub async fn create_session(
        &self,
        title: impl Into<String>,
        shell: Box<dyn CustomShell>,
    ) -> Result<SessionId, SessionError> {
        let mut inner = self.inner.write().await;
        let live = inner
            .sessions
            .iter()
            .filter(|s| s.state() != SessionState::Disposed)
            .count();
        if live >= self.max_sessions {
            return Err(SessionError::CapacityExceeded(self.max_sessions));
        }

        let id = SessionId::new();
        let settings = SessionSettings::default();
        let emulator = Arc::new(Mutex::new(Emulator::with_rpc(Size::new(
            settings.cols,
            settings.rows,
        ))));

        let mut bridge = ShellBridge::new(shell);
        bridge
            .start(settings.start_options(), self.cancel.child_token())
            .await
            .map_err(SessionError::Shell)?;
        let output = bridge
            .take_output()
            .expect("freshly started bridge always has an output stream");
        let bridge = Arc::new(bridge);

        let title = Arc::new(StdRwLock::new(title.into()));
        let state = Arc::new(StdRwLock::new(SessionState::Creating));
        let pump = tokio::spawn(session_pump(
            id,
            output,
            emulator.clone(),
            bridge.clone(),
            title.clone(),
            state.clone(),
            self.events.event_sender(),
            self.rpc.clone(),
            self.cancel.child_token(),
        ));

        let entry = SessionEntry {
            id,
            title,
            settings,
            state,
            emulator,
            bridge,
            pump: Some(pump),
        };

        if inner.active.is_none() {
            entry.set_state(SessionState::Active);
            inner.active = Some(id);
        } else {
            entry.set_state(SessionState::Inactive);
        }
        info!(%id, "session created");
        inner.sessions.push(entry);
        Ok(id)
    }

    pub async fn active_id(&self) -> Option<SessionId> {
        self.inner.read().await.active
    }

    pub async fn session_count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        self.inner
            .read()
            .await
            .sessions
            .iter()
            .map(|entry| SessionInfo {
                id: entry.id,
                title: entry.title.read().expect("session title poisoned").clone(),
                state: entry.state(),
                settings: entry.settings.clone(),
            })
            .collect()
    }

    /// Make `id` the active session. Atomic: a successful switch never
    /// leaves zero or two active sessions.
    pub async fn switch_to(&self, id: SessionId) -> Result<(), SessionError> {
        let mut inner = self.inner.write().await;
        let target_state = inner
            .sessions
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.state())
            .ok_or(SessionError::UnknownSession(id.value()))?;
        if target_state == SessionState::Disposed {
            return Err(SessionError::SessionDisposed(id.value()));
        }
        if inner.active == Some(id) {
            return Ok(());
        }

        if let Some(active) = inner.active {
            if let Some(current) = inner.sessions.iter().find(|s| s.id == active) {
                current.set_state(SessionState::Inactive);
            }
        }
        if let Some(target) = inner.sessions.iter().find(|s| s.id == id) {
            target.set_state(SessionState::Active);
        }
        inner.active = Some(id);
        debug!(%id, "session activated");
        Ok(())
    }

    /// Forward host input to the active session's shell. With no active
    /// session the bytes are dropped; a documented no-op, not an error.
    pub async fn write_to_active(&self, data: Bytes) -> Result<(), SessionError> {
        let inner = self.inner.read().await;
        let Some(active) = inner.active else {
            debug!("write with no active session dropped");
            return Ok(());
        };
        let Some(entry) = inner.sessions.iter().find(|s| s.id == active) else {
            return Ok(());
        };
        entry.bridge.write(data).await.map_err(SessionError::Shell)
    }

    /// Route a mouse event to the active session's emulator; reports go
    /// to that session's shell.
    pub async fn process_mouse_on_active(
        &self,
        event: &MouseEvent,
    ) -> Result<MouseRouting, SessionError> {
        let inner = self.inner.read().await;
        let Some(active) = inner.active else {
            return Ok(MouseRouting::Local);
        };
        let Some(entry) = inner.sessions.iter().find(|s| s.id == active) else {
            return Ok(MouseRouting::Local);
        };
        let routing = entry.emulator.lock().await.process_mouse(event);
        if let MouseRouting::Report(bytes) = &routing {
            entry
                .bridge
                .write(Bytes::from(bytes.clone()))
                .await
                .map_err(SessionError::Shell)?;
        }
        Ok(routing)
    }

    /// Resize one session's emulator and shell.
    pub async fn resize(&self, id: SessionId, size: Size) -> Result<(), SessionError> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(SessionError::UnknownSession(id.value()))?;
        entry.settings.cols = size.cols;
        entry.settings.rows = size.rows;
        entry.emulator.lock().await.resize(size);
        entry
            .bridge
            .resize(size.cols, size.rows)
            .await
            .map_err(SessionError::Shell)
    }

    /// Set a session-local title. A later shell OSC 0/2 overrides it.
    pub async fn set_title(&self, id: SessionId, title: impl Into<String>) -> Result<(), SessionError> {
        let inner = self.inner.read().await;
        let entry = inner
            .sessions
            .iter()
            .find(|s| s.id == id)
            .ok_or(SessionError::UnknownSession(id.value()))?;
        *entry.title.write().expect("session title poisoned") = title.into();
        Ok(())
    }

    /// Broadcast a font config to every session's settings. Touches only
    /// session-scoped settings; order, active selection, identity and
    /// aliveness are preserved.
    pub async fn apply_font_config_to_all(&self, font: FontConfig) {
        let mut inner = self.inner.write().await;
        for entry in &mut inner.sessions {
            entry.settings.font = font.clone();
        }
    }

    /// Stop and dispose a session. The entry stays listed as Disposed.
    pub async fn close(&self, id: SessionId) -> Result<(), SessionError> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(SessionError::UnknownSession(id.value()))?;
        if entry.state() == SessionState::Disposed {
            return Ok(());
        }

        if entry.bridge.is_running() {
            if let Err(error) = entry.bridge.stop(self.cancel.child_token()).await {
                warn!(%id, %error, "session shell stop failed");
            }
        }
        entry.bridge.dispose().await.map_err(SessionError::Shell)?;
        entry.set_state(SessionState::Disposed);
        if let Some(pump) = entry.pump.take() {
            pump.abort();
        }
        if inner.active == Some(id) {
            inner.active = None;
        }
        info!(%id, "session disposed");
        Ok(())
    }

    /// Dispose every session and stop background work.
    pub async fn shutdown(&self) {
        let ids: Vec<SessionId> = {
            self.inner
                .read()
                .await
                .sessions
                .iter()
                .map(|s| s.id)
                .collect()
        };
        for id in ids {
            if let Err(error) = self.close(id).await {
                warn!(%id, %error, "session close during shutdown failed");
            }
        }
        self.cancel.cancel();
    }

    /// Run a closure against one session's emulator, for hosts that
    /// render or inspect terminal state.
    pub async fn with_emulator<R>(
        &self,
        id: SessionId,
        f: impl FnOnce(&mut Emulator) -> R,
    ) -> Result<R, SessionError> {
        let inner = self.inner.read().await;
        let entry = inner
            .sessions
            .iter()
            .find(|s| s.id == id)
            .ok_or(SessionError::UnknownSession(id.value()))?;
        let mut emulator = entry.emulator.lock().await;
        Ok(f(&mut emulator))
    }
}

/// Per-session background task: shell output → emulator → events, with
/// synthesized responses and RPC replies written back to the shell.
#[allow(clippy::too_many_arguments)]
async fn session_pump(
    id: SessionId,
    mut output: tokio::sync::mpsc::UnboundedReceiver<Bytes>,
    emulator: Arc<Mutex<Emulator>>,
    bridge: Arc<ShellBridge>,
    title: Arc<StdRwLock<String>>,
    state: Arc<StdRwLock<SessionState>>,
    events: broadcast::Sender<SessionEvent>,
    rpc: Arc<RpcRouter>,
    cancel: CancellationToken,
) {
    let mut exit_watch = bridge.exit_watch();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = exit_watch.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = exit_watch.borrow().clone();
                if let Some(status) = status {
                    {
                        let mut state = state.write().expect("session state poisoned");
                        if *state != SessionState::Disposed {
                            *state = if status.exit_code == 0 {
                                SessionState::Inactive
                            } else {
                                SessionState::Failed
                            };
                        }
                    }
                    let _ = events.send(SessionEvent::Exited {
                        session: id,
                        exit_code: status.exit_code,
                    });
                    break;
                }
            }
            chunk = output.recv() => {
                let Some(data) = chunk else { break };
                let (responses, term_events, rpc_sequences) = {
                    let mut emulator = emulator.lock().await;
                    emulator.write(&data);
                    (
                        emulator.take_output(),
                        emulator.take_events(),
                        emulator.take_rpc_sequences(),
                    )
                };

                if !responses.is_empty() {
                    if let Err(error) = bridge.write(Bytes::from(responses)).await {
                        debug!(%id, %error, "terminal response dropped");
                    }
                }

                for seq in rpc_sequences {
                    let outcome = rpc.route_sequence(&seq, cancel.child_token()).await;
                    if let Some(reply) = outcome.response {
                        trace::record_output_bytes(&reply);
                        if let Err(error) = bridge.write(Bytes::from(reply)).await {
                            debug!(%id, %error, "rpc reply dropped");
                        }
                    }
                }

                for event in term_events {
                    match event {
                        TermEvent::TitleChanged(new_title) => {
                            *title.write().expect("session title poisoned") = new_title.clone();
                            let _ = events.send(SessionEvent::TitleChanged {
                                session: id,
                                title: new_title,
                            });
                        }
                        TermEvent::Bell => {
                            let _ = events.send(SessionEvent::Bell { session: id });
                        }
                    }
                }

                let _ = events.send(SessionEvent::OutputReady { session: id, data });
                let _ = events.send(SessionEvent::StateChanged { session: id });
            }
        }
    }
    debug!(%id, "session pump exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::EchoShell;
    use filament_common::types::Position;

    async fn manager_with_sessions(n: usize) -> (SessionManager, Vec<SessionId>) {
        let manager = SessionManager::new(8);
        let mut ids = Vec::new();
        for i in 0..n {
            let id = manager
                .create_session(format!("session {i}"), Box::new(EchoShell::new()))
                .await
                .unwrap();
            ids.push(id);
        }
        (manager, ids)
    }

    #[tokio::test]
    async fn first_session_becomes_active() {
        let (manager, ids) = manager_with_sessions(2).await;
        assert_eq!(manager.active_id().await, Some(ids[0]));

        let list = manager.list().await;
        assert_eq!(list[0].state, SessionState::Active);
        assert_eq!(list[1].state, SessionState::Inactive);
    }

    #[tokio::test]
    async fn switch_is_atomic_single_active() {
        let (manager, ids) = manager_with_sessions(3).await;
        manager.switch_to(ids[2]).await.unwrap();

        let list = manager.list().await;
        let active: Vec<_> = list
            .iter()
            .filter(|s| s.state == SessionState::Active)
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, ids[2]);
        assert_eq!(manager.active_id().await, Some(ids[2]));
    }

    #[tokio::test]
    async fn capacity_is_a_typed_failure() {
        let manager = SessionManager::new(1);
        manager
            .create_session("one", Box::new(EchoShell::new()))
            .await
            .unwrap();
        let err = manager
            .create_session("two", Box::new(EchoShell::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::CapacityExceeded(1)));
    }

    #[tokio::test]
    async fn write_with_no_active_session_is_noop() {
        let manager = SessionManager::new(4);
        manager
            .write_to_active(Bytes::from_static(b"dropped"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn write_to_active_round_trips_through_echo() {
        let (manager, ids) = manager_with_sessions(1).await;
        let mut events = manager.subscribe();

        manager
            .write_to_active(Bytes::from_static(b"hello"))
            .await
            .unwrap();

        loop {
            match events.recv().await.unwrap() {
                SessionEvent::OutputReady { session, data } => {
                    assert_eq!(session, ids[0]);
                    assert_eq!(data, Bytes::from_static(b"hello"));
                    break;
                }
                _ => continue,
            }
        }

        let text = manager
            .with_emulator(ids[0], |emulator| emulator.state().screen().row_text(0))
            .await
            .unwrap();
        assert!(text.starts_with("hello"));
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let (manager, ids) = manager_with_sessions(2).await;
        let mut events = manager.subscribe();

        manager
            .write_to_active(Bytes::from_static(b"\x1b]0;shell title\x07aaa"))
            .await
            .unwrap();

        // Wait until session 0 processed its output.
        loop {
            if let SessionEvent::StateChanged { session } = events.recv().await.unwrap() {
                if session == ids[0] {
                    break;
                }
            }
        }

        manager.set_title(ids[1], "local title").await.unwrap();
        manager
            .resize(ids[1], Size::new(100, 40))
            .await
            .unwrap();

        let list = manager.list().await;
        let a = list.iter().find(|s| s.id == ids[0]).unwrap();
        let b = list.iter().find(|s| s.id == ids[1]).unwrap();

        // The shell OSC overrode A's title; B kept its local title.
        assert_eq!(a.title, "shell title");
        assert_eq!(b.title, "local title");
        assert_eq!((a.settings.cols, a.settings.rows), (80, 24));
        assert_eq!((b.settings.cols, b.settings.rows), (100, 40));

        let a_cursor = manager
            .with_emulator(ids[0], |emulator| emulator.state().cursor_position())
            .await
            .unwrap();
        let b_cursor = manager
            .with_emulator(ids[1], |emulator| emulator.state().cursor_position())
            .await
            .unwrap();
        assert_eq!(a_cursor, Position::new(0, 3));
        assert_eq!(b_cursor, Position::new(0, 0));
    }

    #[tokio::test]
    async fn font_broadcast_touches_only_settings() {
        let (manager, ids) = manager_with_sessions(3).await;
        manager.switch_to(ids[1]).await.unwrap();
        let before: Vec<SessionId> = manager.list().await.iter().map(|s| s.id).collect();

        manager
            .apply_font_config_to_all(FontConfig {
                family: "Iosevka".to_string(),
                size: 14.0,
            })
            .await;

        let list = manager.list().await;
        let after: Vec<SessionId> = list.iter().map(|s| s.id).collect();
        assert_eq!(before, after);
        assert_eq!(manager.active_id().await, Some(ids[1]));
        for info in &list {
            assert_eq!(info.settings.font.family, "Iosevka");
            assert_ne!(info.state, SessionState::Disposed);
        }
    }

    #[tokio::test]
    async fn close_disposes_and_clears_active() {
        let (manager, ids) = manager_with_sessions(2).await;
        manager.close(ids[0]).await.unwrap();

        let list = manager.list().await;
        assert_eq!(list[0].state, SessionState::Disposed);
        assert_eq!(manager.active_id().await, None);

        // Writes are dropped without error now.
        manager
            .write_to_active(Bytes::from_static(b"x"))
            .await
            .unwrap();

        // Closing again is idempotent; switching to it is refused.
        manager.close(ids[0]).await.unwrap();
        assert!(manager.switch_to(ids[0]).await.is_err());
        manager.switch_to(ids[1]).await.unwrap();
    }

    #[tokio::test]
    async fn shell_exit_marks_session_and_fires_event() {
        let (manager, ids) = manager_with_sessions(1).await;
        let mut events = manager.subscribe();

        // Stop the shell through the bridge.
        {
            let inner = manager.inner.read().await;
            inner.sessions[0]
                .bridge
                .stop(CancellationToken::new())
                .await
                .unwrap();
        }

        loop {
            if let SessionEvent::Exited { session, exit_code } = events.recv().await.unwrap() {
                assert_eq!(session, ids[0]);
                assert_eq!(exit_code, 0);
                break;
            }
        }
    }
}
