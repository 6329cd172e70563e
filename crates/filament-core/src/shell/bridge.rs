use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use filament_common::error::ShellError;
use filament_common::shell::{
    CustomShell, ShellEvent, ShellEventSender, ShellMetadata, ShellStartOptions,
};

const STATE_NOT_STARTED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPED: u8 = 2;
const STATE_DISPOSED: u8 = 3;

/// How the shell ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitStatus {
    pub exit_code: i32,
    pub reason: Option<String>,
}

/// Adapts a pluggable shell to the same I/O contract as a kernel
/// pseudo-terminal: byte input, byte output, resize, and an exit event.
///
/// Thread-safe; writes are serialized through the shell lock so each
/// write is delivered as one contiguous chunk.
pub struct ShellBridge {
    shell: Arc<Mutex<Box<dyn CustomShell>>>,
    metadata: ShellMetadata,
    state: Arc<AtomicU8>,
    exit_rx: watch::Receiver<Option<ExitStatus>>,
    exit_tx: Arc<watch::Sender<Option<ExitStatus>>>,
    output_rx: Option<mpsc::UnboundedReceiver<Bytes>>,
}

impl ShellBridge {
    pub fn new(shell: Box<dyn CustomShell>) -> Self {
        let metadata = shell.metadata();
        let (exit_tx, exit_rx) = watch::channel(None);
        Self {
            shell: Arc::new(Mutex::new(shell)),
            metadata,
            state: Arc::new(AtomicU8::new(STATE_NOT_STARTED)),
            exit_rx,
            exit_tx: Arc::new(exit_tx),
            output_rx: None,
        }
    }

    pub fn metadata(&self) -> &ShellMetadata {
        &self.metadata
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_RUNNING
    }

    pub fn is_disposed(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_DISPOSED
    }

    /// Guard for I/O operations: only a running, undisposed bridge passes.
    fn check_running(&self) -> Result<(), ShellError> {
        match self.state.load(Ordering::SeqCst) {
            STATE_RUNNING => Ok(()),
            STATE_NOT_STARTED => Err(ShellError::NotStarted),
            STATE_STOPPED => Err(ShellError::NotRunning),
            _ => Err(ShellError::Disposed),
        }
    }

    /// Start the shell. Must succeed before any write, resize or stop.
    /// A start failure leaves the bridge unstarted and surfaces the
    /// shell's own error unwrapped.
    pub async fn start(
        &mut self,
        options: ShellStartOptions,
        cancel: CancellationToken,
    ) -> Result<(), ShellError> {
        match self.state.load(Ordering::SeqCst) {
            STATE_NOT_STARTED => {}
            STATE_DISPOSED => return Err(ShellError::Disposed),
            _ => return Err(ShellError::AlreadyStarted),
        }
        if cancel.is_cancelled() {
            return Err(ShellError::Cancelled);
        }

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let sender = ShellEventSender::new(event_tx);

        {
            let mut shell = self.shell.lock().await;
            shell.start(options, sender, cancel.clone()).await?;
        }

        let (output_tx, output_rx) = mpsc::unbounded_channel();
        self.output_rx = Some(output_rx);
        self.state.store(STATE_RUNNING, Ordering::SeqCst);

        let state = self.state.clone();
        let exit_tx = self.exit_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                match event {
                    ShellEvent::Output(data) => {
                        // Dropped receiver just means no consumer remains.
                        let _ = output_tx.send(data);
                    }
                    ShellEvent::Terminated { exit_code, reason } => {
                        info!(exit_code, "shell terminated");
                        let _ = state.compare_exchange(
                            STATE_RUNNING,
                            STATE_STOPPED,
                            Ordering::SeqCst,
                            Ordering::SeqCst,
                        );
                        let _ = exit_tx.send(Some(ExitStatus { exit_code, reason }));
                        break;
                    }
                }
            }
            debug!("shell event pump exited");
        });

        Ok(())
    }

    /// Deliver exactly these bytes to the shell's input handler.
    pub async fn write(&self, data: Bytes) -> Result<(), ShellError> {
        self.check_running()?;
        let mut shell = self.shell.lock().await;
        // Re-check under the lock; the shell may have terminated while
        // this write waited its turn.
        self.check_running()?;
        shell.write_input(data).await
    }

    /// UTF-8 encode and deliver a string.
    pub async fn write_str(&self, text: &str) -> Result<(), ShellError> {
        self.write(Bytes::copy_from_slice(text.as_bytes())).await
    }

    /// Forward a resize; the notification lands before this returns.
    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), ShellError> {
        self.check_running()?;
        let mut shell = self.shell.lock().await;
        shell.notify_resize(cols, rows)
    }

    /// Ask the shell to emit its greeting.
    pub async fn send_initial_output(&self) -> Result<(), ShellError> {
        self.check_running()?;
        let mut shell = self.shell.lock().await;
        shell.send_initial_output().await
    }

    /// Ask the shell to abandon in-flight work, including pending writes.
    pub async fn request_cancellation(&self) -> Result<(), ShellError> {
        self.check_running()?;
        let mut shell = self.shell.lock().await;
        shell.request_cancellation();
        Ok(())
    }

    /// Stop the shell. Stopping an already-stopped bridge is a no-op.
    pub async fn stop(&self, cancel: CancellationToken) -> Result<(), ShellError> {
        match self.state.load(Ordering::SeqCst) {
            STATE_RUNNING => {}
            STATE_STOPPED => return Ok(()),
            STATE_NOT_STARTED => return Err(ShellError::NotStarted),
            _ => return Err(ShellError::Disposed),
        }
        let mut shell = self.shell.lock().await;
        shell.stop(cancel).await?;
        let _ = self.state.compare_exchange(
            STATE_RUNNING,
            STATE_STOPPED,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        Ok(())
    }

    /// Release the shell. Idempotent; any later operation fails with
    /// [`ShellError::Disposed`].
    pub async fn dispose(&self) -> Result<(), ShellError> {
        let previous = self.state.swap(STATE_DISPOSED, Ordering::SeqCst);
        if previous == STATE_DISPOSED {
            return Ok(());
        }
        let mut shell = self.shell.lock().await;
        if previous == STATE_RUNNING {
            shell.request_cancellation();
        }
        shell.dispose().await
    }

    /// Take the output byte stream. Can only be taken once.
    pub fn take_output(&mut self) -> Option<mpsc::UnboundedReceiver<Bytes>> {
        self.output_rx.take()
    }

    /// Take the output as a `Stream` of byte chunks.
    pub fn take_output_stream(&mut self) -> Option<UnboundedReceiverStream<Bytes>> {
        self.take_output().map(UnboundedReceiverStream::new)
    }

    /// Watch for the exit event; the value flips to `Some` exactly once.
    pub fn exit_watch(&self) -> watch::Receiver<Option<ExitStatus>> {
        self.exit_rx.clone()
    }

    /// Wait until the shell has terminated.
    pub async fn wait_exit(&self) -> ExitStatus {
        let mut rx = self.exit_rx.clone();
        loop {
            if let Some(status) = rx.borrow().clone() {
                return status;
            }
            if rx.changed().await.is_err() {
                // Sender gone without an exit event; report a dead shell.
                return ExitStatus {
                    exit_code: -1,
                    reason: Some("shell event channel closed".to_string()),
                };
            }
        }
    }
}
