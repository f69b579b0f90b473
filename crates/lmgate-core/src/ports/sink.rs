//! Streaming sink port.
//!
//! A sink is borrowed for the duration of one generate call. Exactly one
//! terminal callback (`on_complete` or `on_error`) fires per request;
//! [`SingleShotSink`] enforces that discipline for any wrapped sink.
//! Delivery failures are the sink implementation's problem: by the time a
//! client has gone away, the engine has no one to tell.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

/// Callbacks carrying one streamed generation back to a caller.
pub trait StreamSink: Send + Sync {
    /// A partial text delta, in engine-emission order.
    fn on_token(&self, delta: &str);

    /// Terminal: the full reply envelope as JSON.
    fn on_complete(&self, envelope: &str);

    /// Terminal: a structured error message.
    fn on_error(&self, message: &str);
}

/// Wrapper guaranteeing at most one terminal event reaches the inner sink,
/// and no tokens after a terminal event.
pub struct SingleShotSink {
    inner: Arc<dyn StreamSink>,
    terminal: AtomicBool,
}

impl SingleShotSink {
    #[must_use]
    pub fn new(inner: Arc<dyn StreamSink>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            terminal: AtomicBool::new(false),
        })
    }

    /// Whether a terminal event has already fired.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.terminal.load(Ordering::Acquire)
    }

    fn claim_terminal(&self) -> bool {
        !self.terminal.swap(true, Ordering::AcqRel)
    }
}

impl StreamSink for SingleShotSink {
    fn on_token(&self, delta: &str) {
        if !self.is_terminal() {
            self.inner.on_token(delta);
        }
    }

    fn on_complete(&self, envelope: &str) {
        if self.claim_terminal() {
            self.inner.on_complete(envelope);
        }
    }

    fn on_error(&self, message: &str) {
        if self.claim_terminal() {
            self.inner.on_error(message);
        }
    }
}

/// One observed sink event, for channel-backed consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Token(String),
    Complete(String),
    Error(String),
}

/// Sink that forwards events into an unbounded channel.
///
/// Used by the HTTP adapter to bridge callbacks into response streams, and
/// by tests to assert on delivery order.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver observing it.
    #[must_use]
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl StreamSink for ChannelSink {
    fn on_token(&self, delta: &str) {
        let _ = self.tx.send(SinkEvent::Token(delta.to_string()));
    }

    fn on_complete(&self, envelope: &str) {
        let _ = self.tx.send(SinkEvent::Complete(envelope.to_string()));
    }

    fn on_error(&self, message: &str) {
        let _ = self.tx.send(SinkEvent::Error(message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_shot_forwards_first_terminal_only() {
        let (sink, mut rx) = ChannelSink::new();
        let guarded = SingleShotSink::new(sink);

        guarded.on_token("a");
        guarded.on_complete("{}");
        guarded.on_error("late");
        guarded.on_token("after terminal");

        assert_eq!(rx.try_recv().unwrap(), SinkEvent::Token("a".into()));
        assert_eq!(rx.try_recv().unwrap(), SinkEvent::Complete("{}".into()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn error_wins_when_first() {
        let (sink, mut rx) = ChannelSink::new();
        let guarded = SingleShotSink::new(sink);

        guarded.on_error("boom");
        guarded.on_complete("{}");

        assert_eq!(rx.try_recv().unwrap(), SinkEvent::Error("boom".into()));
        assert!(rx.try_recv().is_err());
    }
}
