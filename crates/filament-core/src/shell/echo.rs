use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use filament_common::error::ShellError;
use filament_common::shell::{
    CustomShell, ShellEventSender, ShellMetadata, ShellStartOptions,
};

/// A minimal in-process shell that echoes its input back as output.
/// Useful as a demo shell and as the reference implementation for the
/// bridge contract tests.
pub struct EchoShell {
    running: bool,
    events: Option<ShellEventSender>,
    banner: Option<String>,
    last_size: Arc<Mutex<(u16, u16)>>,
}

impl EchoShell {
    pub fn new() -> Self {
        Self {
            running: false,
            events: None,
            banner: None,
            last_size: Arc::new(Mutex::new((0, 0))),
        }
    }

    pub fn with_banner(banner: impl Into<String>) -> Self {
        Self {
            banner: Some(banner.into()),
            ..Self::new()
        }
    }

    /// Shared view of the last size delivered via `notify_resize`.
    pub fn size_handle(&self) -> Arc<Mutex<(u16, u16)>> {
        self.last_size.clone()
    }

    fn sender(&self) -> Result<&ShellEventSender, ShellError> {
        self.events.as_ref().ok_or(ShellError::NotStarted)
    }
}

impl Default for EchoShell {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CustomShell for EchoShell {
    fn metadata(&self) -> ShellMetadata {
        ShellMetadata::new("echo", "echoes input back to output", "0.1.0")
            .with_features(vec!["echo".to_string(), "resize".to_string()])
    }

    fn is_running(&self) -> bool {
        self.running
    }

    async fn start(
        &mut self,
        options: ShellStartOptions,
        events: ShellEventSender,
        cancel: CancellationToken,
    ) -> Result<(), ShellError> {
        if self.running {
            return Err(ShellError::AlreadyStarted);
        }
        if cancel.is_cancelled() {
            return Err(ShellError::Cancelled);
        }
        *self.last_size.lock().expect("size handle poisoned") = (options.cols, options.rows);
        self.events = Some(events);
        self.running = true;
        debug!(cols = options.cols, rows = options.rows, "echo shell started");
        Ok(())
    }

    async fn stop(&mut self, _cancel: CancellationToken) -> Result<(), ShellError> {
        if !self.running {
            return Err(ShellError::NotRunning);
        }
        self.running = false;
        self.sender()?.terminated(0, None);
        Ok(())
    }

    async fn write_input(&mut self, data: Bytes) -> Result<(), ShellError> {
        if !self.running {
            return Err(ShellError::NotRunning);
        }
        // Echo: each input chunk comes back as one output chunk.
        self.sender()?.output(data);
        Ok(())
    }

    fn notify_resize(&mut self, cols: u16, rows: u16) -> Result<(), ShellError> {
        *self.last_size.lock().expect("size handle poisoned") = (cols, rows);
        Ok(())
    }

    fn request_cancellation(&mut self) {
        debug!("echo shell cancellation requested");
    }

    async fn send_initial_output(&mut self) -> Result<(), ShellError> {
        if let Some(banner) = self.banner.clone() {
            self.sender()?.output(Bytes::from(banner.into_bytes()));
        }
        Ok(())
    }

    async fn dispose(&mut self) -> Result<(), ShellError> {
        self.running = false;
        self.events = None;
        Ok(())
    }
}
