use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use super::types::{SessionCommand, SessionEvent};

/// Event bus coordinating a session manager with its host
pub struct EventBus {
    command_tx: mpsc::Sender<SessionCommand>,
    command_rx: Option<mpsc::Receiver<SessionCommand>>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        let (command_tx, command_rx) = mpsc::channel(100);
        let (event_tx, _) = broadcast::channel(100);

        Self {
            command_tx,
            command_rx: Some(command_rx),
            event_tx,
        }
    }

    /// Get a command sender
    pub fn command_sender(&self) -> mpsc::Sender<SessionCommand> {
        self.command_tx.clone()
    }

    /// Take the command receiver (can only be called once)
    pub fn take_command_receiver(&mut self) -> Option<mpsc::Receiver<SessionCommand>> {
        self.command_rx.take()
    }

    /// Get an event receiver
    pub fn event_receiver(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Get the event sender
    pub fn event_sender(&self) -> broadcast::Sender<SessionEvent> {
        self.event_tx.clone()
    }

    /// Broadcast an event; lagging or absent subscribers are not errors.
    pub fn send_event(&self, event: SessionEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("session event dropped, no subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionId;
    use bytes::Bytes;

    #[tokio::test]
    async fn command_channel_round_trip() {
        let mut bus = EventBus::new();
        let sender = bus.command_sender();
        let mut receiver = bus.take_command_receiver().unwrap();
        assert!(bus.take_command_receiver().is_none());

        sender
            .send(SessionCommand::Write(Bytes::from_static(b"test")))
            .await
            .unwrap();

        match receiver.recv().await.unwrap() {
            SessionCommand::Write(data) => assert_eq!(data, Bytes::from_static(b"test")),
            other => panic!("wrong command {other:?}"),
        }
    }

    #[tokio::test]
    async fn events_reach_every_subscriber() {
        let bus = EventBus::new();
        let mut rx1 = bus.event_receiver();
        let mut rx2 = bus.event_receiver();

        let id = SessionId::new();
        bus.send_event(SessionEvent::Bell { session: id });

        assert!(matches!(
            rx1.recv().await.unwrap(),
            SessionEvent::Bell { session } if session == id
        ));
        assert!(matches!(
            rx2.recv().await.unwrap(),
            SessionEvent::Bell { session } if session == id
        ));
    }
}
