use anyhow::Result;
use bytes::Bytes;
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyModifiers},
    terminal,
};
use filament_common::types::Size;
use filament_core::{
    events::{SessionCommand, SessionEvent},
    EchoShell, SessionManager,
};
use std::io::{self, Write};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Filament terminal core demo host", long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Terminal rows (defaults to current terminal size)
    #[arg(long)]
    rows: Option<u16>,

    /// Terminal columns (defaults to current terminal size)
    #[arg(long)]
    cols: Option<u16>,

    /// Number of demo sessions to create
    #[arg(long, default_value_t = 1)]
    sessions: usize,

    /// Record decoded sequences to this trace file
    #[arg(long)]
    trace: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        "filament=debug"
    } else {
        "filament=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Some(path) = &args.trace {
        filament_core::trace::init(path)?;
        info!(?path, "trace sink enabled");
    }

    let (width, height) = terminal::size().unwrap_or((80, 24));
    let size = Size::new(
        args.cols.unwrap_or(if width > 0 { width } else { 80 }),
        args.rows.unwrap_or(if height > 0 { height } else { 24 }),
    );
    if size.rows == 0 || size.cols == 0 {
        return Err(anyhow::anyhow!("terminal must have non-zero size"));
    }
    info!(?size, "starting filament demo host");

    let mut manager = SessionManager::new(8);
    for i in 0..args.sessions.max(1) {
        let id = manager
            .create_session(format!("demo {i}"), Box::new(EchoShell::new()))
            .await?;
        manager.resize(id, size).await?;
    }

    let command_tx = manager.command_sender();
    let mut command_rx = manager
        .take_command_receiver()
        .expect("command receiver taken once");
    let mut events = manager.subscribe();

    terminal::enable_raw_mode()?;

    // Forward keyboard input as session commands.
    let input_task = tokio::spawn(read_input(command_tx));

    // Print processed session output to stdout.
    let event_task = tokio::spawn(async move {
        let mut stdout = io::stdout();
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::OutputReady { data, .. } => {
                    if stdout.write_all(&data).and_then(|_| stdout.flush()).is_err() {
                        break;
                    }
                }
                SessionEvent::TitleChanged { session, title } => {
                    debug!(%session, %title, "title changed");
                }
                SessionEvent::Exited { session, exit_code } => {
                    info!(%session, exit_code, "session shell exited");
                }
                _ => {}
            }
        }
    });

    // Drive the manager from the command channel.
    while let Some(command) = command_rx.recv().await {
        match command {
            SessionCommand::Write(data) => {
                if let Err(e) = manager.write_to_active(data).await {
                    error!("write failed: {e}");
                }
            }
            SessionCommand::Resize(size) => {
                if let Some(id) = manager.active_id().await {
                    if let Err(e) = manager.resize(id, size).await {
                        error!("resize failed: {e}");
                    }
                }
            }
            SessionCommand::Close => break,
        }
    }

    manager.shutdown().await;
    filament_core::trace::shutdown();
    input_task.abort();
    event_task.abort();
    terminal::disable_raw_mode()?;
    info!("demo host stopped");
    Ok(())
}

/// Blocking-poll crossterm input, translated to session commands.
/// Ctrl+Q quits the demo.
async fn read_input(commands: mpsc::Sender<SessionCommand>) {
    loop {
        let ready = tokio::task::spawn_blocking(|| event::poll(Duration::from_millis(50)))
            .await
            .unwrap_or(Ok(false));
        match ready {
            Ok(true) => {
                let read = tokio::task::spawn_blocking(event::read).await;
                match read {
                    Ok(Ok(Event::Key(key))) => {
                        if let Some(command) = key_to_command(key) {
                            let closing = matches!(command, SessionCommand::Close);
                            if commands.send(command).await.is_err() || closing {
                                break;
                            }
                        }
                    }
                    Ok(Ok(Event::Resize(cols, rows))) => {
                        if commands
                            .send(SessionCommand::Resize(Size::new(cols, rows)))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Ok(Ok(_)) => {}
                    _ => break,
                }
            }
            Ok(false) => {}
            Err(_) => break,
        }
    }
}

fn key_to_command(key: KeyEvent) -> Option<SessionCommand> {
    let bytes: Vec<u8> = match key.code {
        KeyCode::Char('q') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            return Some(SessionCommand::Close);
        }
        KeyCode::Char(c) if key.modifiers.contains(KeyModifiers::CONTROL) => {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() {
                vec![c as u8 - b'a' + 1]
            } else {
                return None;
            }
        }
        KeyCode::Char(c) => c.to_string().into_bytes(),
        KeyCode::Enter => vec![b'\r'],
        KeyCode::Backspace => vec![0x7F],
        KeyCode::Tab => vec![b'\t'],
        KeyCode::Esc => vec![0x1B],
        KeyCode::Up => b"\x1b[A".to_vec(),
        KeyCode::Down => b"\x1b[B".to_vec(),
        KeyCode::Right => b"\x1b[C".to_vec(),
        KeyCode::Left => b"\x1b[D".to_vec(),
        _ => return None,
    };
    Some(SessionCommand::Write(Bytes::from(bytes)))
}
