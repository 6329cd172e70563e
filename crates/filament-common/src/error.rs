use thiserror::Error;

/// Failures raised by a custom shell or the bridge that owns it.
#[derive(Error, Debug)]
pub enum ShellError {
    #[error("shell has not been started")]
    NotStarted,

    #[error("shell has already been started")]
    AlreadyStarted,

    #[error("shell is no longer running")]
    NotRunning,

    #[error("shell bridge has been disposed")]
    Disposed,

    #[error("shell start failed: {0}")]
    StartFailed(String),

    #[error("shell start was cancelled")]
    Cancelled,

    #[error("shell I/O error: {0}")]
    Io(String),
}

/// Failures raised by the session manager.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session limit of {0} reached")]
    CapacityExceeded(usize),

    #[error("no session with id {0}")]
    UnknownSession(u64),

    #[error("session {0} is disposed")]
    SessionDisposed(u64),

    #[error(transparent)]
    Shell(#[from] ShellError),
}

/// Failures raised by RPC registration and dispatch plumbing.
///
/// Per-command outcomes (validation verdicts, timeouts, handler failures)
/// are values, not errors; this covers misuse of the router itself.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("command id {id} is outside the {kind} range")]
    IdOutOfRange { id: u16, kind: &'static str },

    #[error("command id {0} is already registered")]
    AlreadyRegistered(u16),
}

/// Top-level error for hosts that do not care which subsystem failed.
#[derive(Error, Debug)]
pub enum FilamentError {
    #[error(transparent)]
    Shell(#[from] ShellError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("trace sink error: {0}")]
    Trace(String),
}

pub type Result<T> = std::result::Result<T, FilamentError>;
