use serde::{Deserialize, Serialize};

use super::hits::HitsEvent;
use super::signal::SignalEvent;

/// Identity metadata carried by every event and copied from a stage's input to its output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventInfo {
    pub id: i32,
    pub sub_id: i32,
    pub run_origin: i32,
    pub sub_run_origin: i32,
    /// Event time in seconds
    pub timestamp: f64,
    pub sub_event_tag: String,
}

impl EventInfo {
    pub fn new(id: i32) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }
}

/// The two event types flowing through a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Hits,
    Signal,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hits => write!(f, "hits"),
            Self::Signal => write!(f, "signal"),
        }
    }
}

/// An owned event of either kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    Hits(HitsEvent),
    Signal(SignalEvent),
}

impl Event {
    /// An empty event of the given kind
    pub fn empty(kind: EventKind) -> Self {
        match kind {
            EventKind::Hits => Self::Hits(HitsEvent::default()),
            EventKind::Signal => Self::Signal(SignalEvent::default()),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.view().kind()
    }

    pub fn info(&self) -> &EventInfo {
        match self {
            Self::Hits(e) => &e.info,
            Self::Signal(e) => &e.info,
        }
    }

    pub fn view(&self) -> EventRef<'_> {
        match self {
            Self::Hits(e) => EventRef::Hits(e),
            Self::Signal(e) => EventRef::Signal(e),
        }
    }

    /// Signals read from a file are not guaranteed to be ordered; restore the ordering
    /// invariants of the in-memory model.
    pub fn normalize(&mut self) {
        if let Self::Signal(e) = self {
            e.sort_signals();
        }
    }
}

impl From<HitsEvent> for Event {
    fn from(value: HitsEvent) -> Self {
        Self::Hits(value)
    }
}

impl From<SignalEvent> for Event {
    fn from(value: SignalEvent) -> Self {
        Self::Signal(value)
    }
}

/// A borrowed view of an event, used to hand one stage's output to the next stage
/// without copying.
#[derive(Debug, Clone, Copy)]
pub enum EventRef<'a> {
    Hits(&'a HitsEvent),
    Signal(&'a SignalEvent),
}

impl<'a> EventRef<'a> {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Hits(_) => EventKind::Hits,
            Self::Signal(_) => EventKind::Signal,
        }
    }

    pub fn info(&self) -> &'a EventInfo {
        match self {
            Self::Hits(e) => &e.info,
            Self::Signal(e) => &e.info,
        }
    }

    pub fn as_hits(&self) -> Option<&'a HitsEvent> {
        match self {
            Self::Hits(e) => Some(e),
            Self::Signal(_) => None,
        }
    }

    pub fn as_signal(&self) -> Option<&'a SignalEvent> {
        match self {
            Self::Signal(e) => Some(e),
            Self::Hits(_) => None,
        }
    }

    pub fn to_event(&self) -> Event {
        match self {
            Self::Hits(e) => Event::Hits((*e).clone()),
            Self::Signal(e) => Event::Signal((*e).clone()),
        }
    }

    /// Copy this event into an existing buffer, reusing its allocation when the kinds match
    pub fn copy_into(&self, target: &mut Event) {
        match (self, target) {
            (Self::Hits(src), Event::Hits(dst)) => dst.clone_from(src),
            (Self::Signal(src), Event::Signal(dst)) => dst.clone_from(src),
            (_, target) => *target = self.to_event(),
        }
    }
}
