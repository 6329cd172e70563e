use bytes::Bytes;
use filament_common::types::Size;

use crate::session::SessionId;

/// Commands a host sends toward the active session
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Write input bytes to the active session's shell
    Write(Bytes),

    /// Resize the active session
    Resize(Size),

    /// Shut the manager down
    Close,
}

/// Events emitted by sessions for host consumption
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Processed output is available from a session's shell
    OutputReady { session: SessionId, data: Bytes },

    /// A session's terminal state has changed
    StateChanged { session: SessionId },

    /// A session's title changed (shell OSC 0/2 override)
    TitleChanged { session: SessionId, title: String },

    /// A session's terminal rang the bell
    Bell { session: SessionId },

    /// A session's shell terminated
    Exited { session: SessionId, exit_code: i32 },
}
