//! Pipeline observation hooks.
//!
//! Listeners are pure sinks: they receive a copy of each [`Event`] and must
//! not influence the pipeline.  A panicking listener is swallowed so that
//! observer quality can never fail a stream.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::SystemTime;

use crate::hash::HashKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    BeforeTransform,
    AfterTransform,
    BeforeEntropy,
    AfterEntropy,
    AfterHeaderDecoding,
    BlockInfo,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::BeforeTransform => "BEFORE_TRANSFORM",
            EventKind::AfterTransform => "AFTER_TRANSFORM",
            EventKind::BeforeEntropy => "BEFORE_ENTROPY",
            EventKind::AfterEntropy => "AFTER_ENTROPY",
            EventKind::AfterHeaderDecoding => "AFTER_HEADER_DECODING",
            EventKind::BlockInfo => "BLOCK_INFO",
        }
    }
}

/// One pipeline observation.
///
/// `checksum` is present only when the stream carries block checksums;
/// `msg` carries the textual payload of [`EventKind::AfterHeaderDecoding`]
/// and [`EventKind::BlockInfo`].
#[derive(Clone, Debug)]
pub struct Event {
    pub kind: EventKind,
    pub block_id: i64,
    pub size: u64,
    pub checksum: Option<u64>,
    pub hash_kind: HashKind,
    pub time: SystemTime,
    pub msg: Option<String>,
}

impl Event {
    pub fn new(
        kind: EventKind,
        block_id: i64,
        size: u64,
        checksum: Option<u64>,
        hash_kind: HashKind,
    ) -> Self {
        Event {
            kind,
            block_id,
            size,
            checksum,
            hash_kind,
            time: SystemTime::now(),
            msg: None,
        }
    }

    /// Event carrying a textual payload instead of sizes.
    pub fn text(kind: EventKind, block_id: i64, msg: impl Into<String>) -> Self {
        Event {
            kind,
            block_id,
            size: 0,
            checksum: None,
            hash_kind: HashKind::None,
            time: SystemTime::now(),
            msg: Some(msg.into()),
        }
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.msg {
            Some(m) => write!(f, "[{}] {}", self.kind.name(), m),
            None => match self.checksum {
                Some(c) => write!(
                    f,
                    "[{}] block {}, {} bytes, checksum {:x}",
                    self.kind.name(),
                    self.block_id,
                    self.size,
                    c
                ),
                None => write!(
                    f,
                    "[{}] block {}, {} bytes",
                    self.kind.name(),
                    self.block_id,
                    self.size
                ),
            },
        }
    }
}

/// Observer of pipeline events.  Must be shareable across worker threads.
pub trait Listener: Send + Sync {
    fn process_event(&self, event: &Event);
}

/// Delivers `event` to every listener, swallowing panics.
pub(crate) fn notify(listeners: &[Arc<dyn Listener>], event: &Event) {
    for listener in listeners {
        let _ = catch_unwind(AssertUnwindSafe(|| listener.process_event(event)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    impl Listener for Counter {
        fn process_event(&self, _event: &Event) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Panicker;

    impl Listener for Panicker {
        fn process_event(&self, _event: &Event) {
            panic!("bad listener");
        }
    }

    #[test]
    fn panicking_listener_does_not_stop_delivery() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let listeners: Vec<Arc<dyn Listener>> = vec![
            Arc::new(Panicker),
            counter.clone() as Arc<dyn Listener>,
        ];
        let evt = Event::new(EventKind::BlockInfo, 1, 42, None, HashKind::None);
        notify(&listeners, &evt);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn display_formats() {
        let evt = Event::new(
            EventKind::BeforeTransform,
            3,
            1024,
            Some(0xABCD),
            HashKind::Xxh32,
        );
        assert!(evt.to_string().contains("BEFORE_TRANSFORM"));
        assert!(evt.to_string().contains("abcd"));
        let evt = Event::text(EventKind::BlockInfo, 0, "hello");
        assert!(evt.to_string().contains("hello"));
    }
}
