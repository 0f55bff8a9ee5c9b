//! Event Stream Bridge: runs a turn on its own task and hands the consumer
//! an ordered, poll-bounded view of its events.
//!
//! The worker only ever pushes into its [`EventSink`]. The consumer side
//! waits at most `poll_interval` per poll so a transport can send
//! keep-alives while the worker is busy. When the consumer goes away the
//! worker is not aborted; the loop notices the closed channel before its
//! next model call, so at most the in-flight iteration runs to completion.

use std::future::Future;
use std::time::Duration;

use futures::Stream;
use skillrun_config::ServerConfig;
use skillrun_core::error::panic_message;
use skillrun_core::event::{EventSink, StreamEvent, channel};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Message of the `error` event sent when a worker goes silent.
pub const STALLED_MESSAGE: &str = "worker stalled";

const KEEP_ALIVE_FRAME: &str = ": keep-alive\n\n";

/// One item handed to the consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(StreamEvent),
    /// Nothing arrived within one poll interval
    KeepAlive,
}

impl Frame {
    /// Encode as server-sent-events text.
    pub fn to_sse(&self) -> String {
        match self {
            Self::Event(event) => event.to_sse(),
            Self::KeepAlive => KEEP_ALIVE_FRAME.to_string(),
        }
    }

    pub fn event(&self) -> Option<&StreamEvent> {
        match self {
            Self::Event(event) => Some(event),
            Self::KeepAlive => None,
        }
    }
}

/// Creates one channel and one worker task per run.
#[derive(Debug, Clone)]
pub struct EventBridge {
    capacity: usize,
    poll_interval: Duration,
    stall_timeout: Option<Duration>,
}

impl Default for EventBridge {
    fn default() -> Self {
        Self::new(128)
    }
}

impl EventBridge {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            poll_interval: Duration::from_secs(1),
            stall_timeout: None,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        let stall = (config.stall_timeout_secs > 0).then(|| Duration::from_secs(config.stall_timeout_secs));
        Self::new(config.channel_capacity)
            .with_poll_interval(Duration::from_millis(config.poll_interval_ms))
            .with_stall_timeout(stall)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Give up on a worker that pushes nothing for this long.
    pub fn with_stall_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stall_timeout = timeout;
        self
    }

    /// Spawn `work` with the producer half of a fresh channel.
    ///
    /// After `work` returns, or panics, exactly one `done` is pushed. A
    /// panic is reported as an `error` event first.
    pub fn start<F, Fut, T>(&self, work: F) -> (EventStream, TurnHandle<T>)
    where
        F: FnOnce(EventSink) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (sink, receiver) = channel(self.capacity);
        let worker = tokio::spawn(work(sink.clone()));

        let handle = tokio::spawn(async move {
            let result = match worker.await {
                Ok(value) => Some(value),
                Err(e) => {
                    let reason = if e.is_panic() {
                        panic_message(e.into_panic())
                    } else {
                        "worker was cancelled".to_string()
                    };
                    error!(error = %reason, "Turn worker failed");
                    sink.emit(StreamEvent::error(format!("Internal error: {reason}"))).await;
                    None
                }
            };
            sink.emit(StreamEvent::Done).await;
            debug!("Turn worker finished");
            result
        });

        let stream = EventStream::new(receiver, self.poll_interval, self.stall_timeout);
        (stream, TurnHandle { handle })
    }
}

/// Consumer half of a run's channel.
pub struct EventStream {
    receiver: mpsc::Receiver<StreamEvent>,
    poll_interval: Duration,
    stall_timeout: Option<Duration>,
    last_event: Instant,
    pending: Option<StreamEvent>,
    finished: bool,
}

impl EventStream {
    pub fn new(receiver: mpsc::Receiver<StreamEvent>, poll_interval: Duration, stall_timeout: Option<Duration>) -> Self {
        Self {
            receiver,
            poll_interval,
            stall_timeout,
            last_event: Instant::now(),
            pending: None,
            finished: false,
        }
    }

    /// Next frame, or `None` once `done` has been delivered.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        if self.finished {
            return None;
        }
        if let Some(event) = self.pending.take() {
            return Some(self.deliver(event));
        }

        match tokio::time::timeout(self.poll_interval, self.receiver.recv()).await {
            Ok(Some(event)) => {
                self.last_event = Instant::now();
                Some(self.deliver(event))
            }
            Ok(None) => {
                debug!("Event channel closed without done");
                Some(self.deliver(StreamEvent::Done))
            }
            Err(_) => {
                if let Some(limit) = self.stall_timeout {
                    if self.last_event.elapsed() >= limit {
                        warn!(silent_for = ?self.last_event.elapsed(), "Worker stalled, closing stream");
                        self.receiver.close();
                        self.pending = Some(StreamEvent::Done);
                        return Some(Frame::Event(StreamEvent::error(STALLED_MESSAGE)));
                    }
                }
                Some(Frame::KeepAlive)
            }
        }
    }

    fn deliver(&mut self, event: StreamEvent) -> Frame {
        if event.is_done() {
            self.finished = true;
        }
        Frame::Event(event)
    }

    /// Next event, skipping keep-alives.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        loop {
            match self.next_frame().await? {
                Frame::Event(event) => return Some(event),
                Frame::KeepAlive => continue,
            }
        }
    }

    /// Drain every event up to and including `done`.
    pub async fn collect(mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await {
            events.push(event);
        }
        events
    }

    /// Frames as a `futures` stream.
    pub fn into_frames(self) -> impl Stream<Item = Frame> + Send {
        futures::stream::unfold(self, |mut stream| async move {
            let frame = stream.next_frame().await?;
            Some((frame, stream))
        })
    }
}

/// The worker's return value, once it finishes.
pub struct TurnHandle<T> {
    handle: JoinHandle<Option<T>>,
}

impl<T> TurnHandle<T> {
    /// Wait for the worker. `None` if it panicked.
    pub async fn join(self) -> Option<T> {
        self.handle.await.ok().flatten()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::sync::oneshot;

    fn bridge() -> EventBridge {
        EventBridge::new(8).with_poll_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn done_follows_work_exactly_once() {
        let (mut stream, handle) = bridge().start(|sink| async move {
            sink.emit(StreamEvent::thinking("hmm")).await;
            sink.emit(StreamEvent::content("hello")).await;
            5
        });

        assert_eq!(stream.next_event().await, Some(StreamEvent::thinking("hmm")));
        assert_eq!(stream.next_event().await, Some(StreamEvent::content("hello")));
        assert_eq!(stream.next_event().await, Some(StreamEvent::Done));
        assert_eq!(stream.next_frame().await, None);
        assert_eq!(handle.join().await, Some(5));
    }

    #[tokio::test]
    async fn panicking_worker_reports_error_then_done() {
        let (stream, handle) = bridge().start(|_sink| async move {
            if true {
                panic!("boom");
            }
        });

        let events = stream.collect().await;
        assert_eq!(events.len(), 2);
        match &events[0] {
            StreamEvent::Error { message } => assert!(message.contains("boom"), "{message}"),
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(events[1], StreamEvent::Done);
        assert_eq!(handle.join().await, None);
    }

    #[tokio::test]
    async fn quiet_worker_yields_keep_alives() {
        let (release, wait) = oneshot::channel::<()>();
        let (mut stream, _handle) = bridge().start(|sink| async move {
            let _ = wait.await;
            sink.emit(StreamEvent::content("late")).await;
        });

        assert_eq!(stream.next_frame().await, Some(Frame::KeepAlive));
        release.send(()).unwrap();
        assert_eq!(stream.next_event().await, Some(StreamEvent::content("late")));
        assert_eq!(stream.next_event().await, Some(StreamEvent::Done));
    }

    #[tokio::test]
    async fn stalled_worker_is_abandoned() {
        let (_hold, wait) = oneshot::channel::<()>();
        let (stream, _handle) = bridge()
            .with_stall_timeout(Some(Duration::from_millis(30)))
            .start(|_sink| async move {
                let _ = wait.await;
            });

        let frames: Vec<Frame> = stream.into_frames().collect().await;
        let events: Vec<&StreamEvent> = frames.iter().filter_map(Frame::event).collect();
        assert_eq!(events, vec![&StreamEvent::error(STALLED_MESSAGE), &StreamEvent::Done]);
        assert!(frames.iter().any(|f| *f == Frame::KeepAlive));
    }

    #[tokio::test]
    async fn closed_channel_synthesizes_done() {
        let (sink, receiver) = channel(4);
        sink.emit(StreamEvent::content("partial")).await;
        drop(sink);

        let stream = EventStream::new(receiver, Duration::from_millis(10), None);
        assert_eq!(
            stream.collect().await,
            vec![StreamEvent::content("partial"), StreamEvent::Done]
        );
    }

    #[test]
    fn frames_encode_as_sse() {
        assert_eq!(Frame::KeepAlive.to_sse(), ": keep-alive\n\n");
        assert_eq!(Frame::Event(StreamEvent::Done).to_sse(), "event: done\ndata: \n\n");
    }

    #[test]
    fn zero_stall_timeout_disables_detection() {
        let config = ServerConfig {
            stall_timeout_secs: 0,
            poll_interval_ms: 250,
            ..ServerConfig::default()
        };
        let bridge = EventBridge::from_config(&config);
        assert_eq!(bridge.stall_timeout, None);
        assert_eq!(bridge.poll_interval, Duration::from_millis(250));
    }
}
