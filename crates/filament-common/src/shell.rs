use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ShellError;

/// Descriptive metadata a shell reports about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellMetadata {
    pub name: String,
    pub description: String,
    pub version: String,
    pub author: String,
    pub features: Vec<String>,
}

impl ShellMetadata {
    /// Build metadata with the required fields; the author defaults to
    /// "Unknown" and the feature list starts empty.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            version: version.into(),
            author: "Unknown".to_string(),
            features: Vec::new(),
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_features(mut self, features: Vec<String>) -> Self {
        self.features = features;
        self
    }
}

/// Options handed to a shell when it starts.
#[derive(Debug, Clone)]
pub struct ShellStartOptions {
    pub cols: u16,
    pub rows: u16,
    pub working_directory: PathBuf,
    pub environment: HashMap<String, String>,
    /// Free-form shell-specific configuration.
    pub configuration: HashMap<String, String>,
}

impl Default for ShellStartOptions {
    fn default() -> Self {
        let mut environment = HashMap::new();
        environment.insert("TERM".to_string(), "xterm-256color".to_string());
        environment.insert("COLORTERM".to_string(), "truecolor".to_string());

        Self {
            cols: 80,
            rows: 24,
            working_directory: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            environment,
            configuration: HashMap::new(),
        }
    }
}

impl ShellStartOptions {
    pub fn with_size(mut self, cols: u16, rows: u16) -> Self {
        self.cols = cols;
        self.rows = rows;
        self
    }
}

/// Events a shell emits back to its bridge.
#[derive(Debug, Clone)]
pub enum ShellEvent {
    /// Bytes produced by the shell, destined for the emulator.
    Output(Bytes),
    /// The shell terminated. Emitted at most once.
    Terminated {
        exit_code: i32,
        reason: Option<String>,
    },
}

/// Handle a shell uses to push events to its bridge.
#[derive(Debug, Clone)]
pub struct ShellEventSender {
    tx: mpsc::UnboundedSender<ShellEvent>,
}

impl ShellEventSender {
    pub fn new(tx: mpsc::UnboundedSender<ShellEvent>) -> Self {
        Self { tx }
    }

    /// Emit output bytes. Returns false once the bridge has gone away.
    pub fn output(&self, data: Bytes) -> bool {
        self.tx.send(ShellEvent::Output(data)).is_ok()
    }

    /// Emit the termination event.
    pub fn terminated(&self, exit_code: i32, reason: Option<String>) -> bool {
        self.tx
            .send(ShellEvent::Terminated { exit_code, reason })
            .is_ok()
    }
}

/// A pluggable shell implementation.
///
/// The bridge guarantees `start` completes successfully before any other
/// operation is invoked, and that no operation is invoked after `dispose`.
#[async_trait]
pub trait CustomShell: Send + Sync {
    fn metadata(&self) -> ShellMetadata;

    fn is_running(&self) -> bool;

    /// Start the shell. `events` is where output and termination go.
    async fn start(
        &mut self,
        options: ShellStartOptions,
        events: ShellEventSender,
        cancel: CancellationToken,
    ) -> Result<(), ShellError>;

    /// Stop the shell. A stopped shell emits `Terminated` through its
    /// event sender.
    async fn stop(&mut self, cancel: CancellationToken) -> Result<(), ShellError>;

    /// Deliver input bytes to the shell.
    async fn write_input(&mut self, data: Bytes) -> Result<(), ShellError>;

    /// Synchronous resize notification, last value wins.
    fn notify_resize(&mut self, cols: u16, rows: u16) -> Result<(), ShellError>;

    /// Ask the shell to abandon any in-flight work.
    fn request_cancellation(&mut self);

    /// Emit any greeting or initial screen content.
    async fn send_initial_output(&mut self) -> Result<(), ShellError>;

    /// Release shell resources. Called at most once by the bridge.
    async fn dispose(&mut self) -> Result<(), ShellError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_defaults_author_unknown() {
        let meta = ShellMetadata::new("demo", "a demo shell", "1.0.0");
        assert_eq!(meta.author, "Unknown");
        assert!(meta.features.is_empty());
        assert_eq!(meta.version, "1.0.0");
    }

    #[test]
    fn metadata_preserves_explicit_fields() {
        let meta = ShellMetadata::new("demo", "a demo shell", "2.1.0")
            .with_author("Filament Terminal Contributors")
            .with_features(vec!["echo".to_string(), "resize".to_string()]);
        assert_eq!(meta.author, "Filament Terminal Contributors");
        assert_eq!(meta.features.len(), 2);
    }

    #[test]
    fn start_options_defaults() {
        let opts = ShellStartOptions::default();
        assert_eq!((opts.cols, opts.rows), (80, 24));
        assert!(!opts.environment.is_empty());
        assert!(opts.configuration.is_empty());
    }
}
