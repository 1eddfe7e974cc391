use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use rudiment_domain::{InboundMessage, OutboundMessage};

use crate::ServiceError;

pub type Generation = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEventKind {
    Opened,
    Message(InboundMessage),
    Closed { reason: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    pub generation: Generation,
    pub kind: ChannelEventKind,
}

impl ChannelEvent {
    pub fn new(generation: Generation, kind: ChannelEventKind) -> Self {
        Self { generation, kind }
    }
}

pub type EventSender = mpsc::UnboundedSender<ChannelEvent>;

/// A single transport connection. Dropping or closing it tears the transport
/// down in the background.
pub trait ChannelLink {
    fn send(&self, frame: String) -> Result<(), ServiceError>;
    fn close(&mut self);
}

/// Opens transport connections. Implementations report the handshake outcome
/// through `events` rather than returning an error.
pub trait ChannelFactory {
    fn open(
        &self,
        session_id: &str,
        generation: Generation,
        events: EventSender,
    ) -> Box<dyn ChannelLink>;
}

struct OpenLink {
    session_id: String,
    generation: Generation,
    link: Box<dyn ChannelLink>,
}

/// Owns at most one live [`ChannelLink`]. Events are stamped with the
/// generation their link was opened under, and only the open generation's
/// events are accepted, so closing or reopening silences the old link at once.
pub struct StreamChannel {
    factory: Box<dyn ChannelFactory>,
    events: EventSender,
    generation: Generation,
    current: Option<OpenLink>,
}

impl StreamChannel {
    pub fn new(factory: Box<dyn ChannelFactory>, events: EventSender) -> Self {
        Self {
            factory,
            events,
            generation: 0,
            current: None,
        }
    }

    /// Closes any open link and opens a new one for `session_id`.
    pub fn open(&mut self, session_id: &str) -> Generation {
        self.close();
        self.generation += 1;
        info!(session_id, generation = self.generation, "opening stream channel");
        let link = self
            .factory
            .open(session_id, self.generation, self.events.clone());
        self.current = Some(OpenLink {
            session_id: session_id.to_string(),
            generation: self.generation,
            link,
        });
        self.generation
    }

    pub fn send(&self, message: &OutboundMessage) -> Result<(), ServiceError> {
        let Some(open) = &self.current else {
            warn!("dropping outbound frame: channel is not open");
            return Err(ServiceError::NotConnected);
        };
        let frame = message.to_json()?;
        open.link.send(frame).map_err(|err| {
            warn!(session_id = %open.session_id, %err, "send failed");
            err
        })
    }

    /// Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(mut open) = self.current.take() {
            info!(session_id = %open.session_id, generation = open.generation, "closing stream channel");
            open.link.close();
        }
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.current.as_ref().map(|open| open.session_id.as_str())
    }

    /// Filters an event down to the currently open generation. A `Closed`
    /// event for the current link also releases it.
    pub fn accept(&mut self, event: ChannelEvent) -> Option<ChannelEventKind> {
        let current = self.current.as_ref()?.generation;
        if event.generation != current {
            debug!(
                generation = event.generation,
                current, "discarding event from superseded channel"
            );
            return None;
        }
        if matches!(event.kind, ChannelEventKind::Closed { .. }) {
            self.current = None;
        }
        Some(event.kind)
    }
}

impl Drop for StreamChannel {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use rudiment_domain::HitEvent;

    #[derive(Clone, Default)]
    pub struct Journal(pub Arc<Mutex<Vec<String>>>);

    impl Journal {
        pub fn push(&self, entry: String) {
            self.0.lock().unwrap().push(entry);
        }

        pub fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    struct RecordingLink {
        label: String,
        journal: Journal,
    }

    impl ChannelLink for RecordingLink {
        fn send(&self, frame: String) -> Result<(), ServiceError> {
            self.journal.push(format!("send:{}:{frame}", self.label));
            Ok(())
        }

        fn close(&mut self) {
            self.journal.push(format!("close:{}", self.label));
        }
    }

    struct RecordingFactory {
        journal: Journal,
    }

    impl ChannelFactory for RecordingFactory {
        fn open(&self, session_id: &str, generation: Generation, _: EventSender) -> Box<dyn ChannelLink> {
            let label = format!("{session_id}#{generation}");
            self.journal.push(format!("open:{label}"));
            Box::new(RecordingLink {
                label,
                journal: self.journal.clone(),
            })
        }
    }

    fn channel() -> (StreamChannel, Journal) {
        let journal = Journal::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let channel = StreamChannel::new(
            Box::new(RecordingFactory {
                journal: journal.clone(),
            }),
            tx,
        );
        (channel, journal)
    }

    #[test]
    fn reopening_closes_previous_link_first() {
        let (mut channel, journal) = channel();
        channel.open("a");
        channel.open("b");
        assert_eq!(journal.entries(), vec!["open:a#1", "close:a#1", "open:b#2"]);
        assert_eq!(channel.session_id(), Some("b"));
    }

    #[test]
    fn close_is_idempotent() {
        let (mut channel, journal) = channel();
        channel.close();
        channel.open("a");
        channel.close();
        channel.close();
        assert_eq!(journal.entries(), vec!["open:a#1", "close:a#1"]);
        assert!(!channel.is_open());
    }

    #[test]
    fn send_without_link_is_rejected() {
        let (channel, journal) = channel();
        let result = channel.send(&HitEvent::midi(1.0, 38, 90).into());
        assert!(matches!(result, Err(ServiceError::NotConnected)));
        assert!(journal.entries().is_empty());
    }

    #[test]
    fn stale_generations_are_filtered() {
        let (mut channel, _) = channel();
        let first = channel.open("a");
        let second = channel.open("b");
        assert!(channel
            .accept(ChannelEvent::new(first, ChannelEventKind::Opened))
            .is_none());
        assert_eq!(
            channel.accept(ChannelEvent::new(second, ChannelEventKind::Opened)),
            Some(ChannelEventKind::Opened)
        );
        channel.close();
        assert!(channel
            .accept(ChannelEvent::new(second, ChannelEventKind::Opened))
            .is_none());
    }

    #[test]
    fn closed_event_releases_link() {
        let (mut channel, _) = channel();
        let generation = channel.open("a");
        let kind = channel.accept(ChannelEvent::new(
            generation,
            ChannelEventKind::Closed { reason: None },
        ));
        assert!(matches!(kind, Some(ChannelEventKind::Closed { .. })));
        assert!(!channel.is_open());
    }
}
