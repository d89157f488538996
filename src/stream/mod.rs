//! Cancellable decoded streams.
//!
//! A [`StreamPipe`] pulls chunks from a [`ChunkSource`] on a producer task,
//! runs them through a [`Framing`] and hands the results to the consumer over
//! a bounded channel. The producer is spawned on the first poll, so nothing is
//! read until someone asks for an item.
//!
//! Failures never surface as items. The sequence just ends; the terminal
//! [`PipeState`] and the optional diagnostics sink say why.
//!
//! ```ignore
//! use futures::StreamExt;
//! use rill::stream::{PipeOptions, StreamPipe, StreamSource};
//!
//! let mut pipe = StreamPipe::objects(StreamSource::new(body), PipeOptions::default());
//! let handle = pipe.handle();
//! while let Some(record) = pipe.next().await {
//!     if record.event.as_deref() == Some("stop") {
//!         handle.cancel();
//!     }
//! }
//! ```

mod source;

#[cfg(test)]
mod tests;

pub use source::{
    BlockingReaderSource, ChunkSource, DEFAULT_READ_CHUNK, ReaderSource, StreamSource,
};

use crate::sse::{
    Diagnostic, DiagnosticSink, EventDecoder, EventFramer, EventRecord, LineSplitter, Utf8Decoder,
    report,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default number of decoded items the producer may run ahead of the consumer.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 32;

/// What a pipe yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Decoded [`EventRecord`]s.
    #[default]
    Object,
    /// Raw lines.
    Line,
}

/// Item of a mode-selected pipe.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StreamItem {
    Event(EventRecord),
    Line(String),
}

/// Turns decoded text into items. Implementations own their buffers.
pub trait Framing: Send + 'static {
    type Item: Send + 'static;

    /// Consume a piece of text, returning every item it completes.
    fn feed(&mut self, text: &str) -> Vec<Self::Item>;

    /// End of input: return whatever the buffered remainder produces.
    fn flush(&mut self) -> Vec<Self::Item>;
}

/// Event framing plus field decoding.
#[derive(Debug, Default)]
pub struct ObjectFraming {
    framer: EventFramer,
    decoder: EventDecoder,
}

impl ObjectFraming {
    pub fn new(diagnostics: Option<DiagnosticSink>) -> Self {
        Self {
            framer: EventFramer::new(),
            decoder: diagnostics.map_or_else(EventDecoder::new, EventDecoder::with_sink),
        }
    }
}

impl Framing for ObjectFraming {
    type Item = EventRecord;

    fn feed(&mut self, text: &str) -> Vec<EventRecord> {
        self.framer
            .feed(text)
            .iter()
            .filter_map(|block| self.decoder.decode(block))
            .collect()
    }

    fn flush(&mut self) -> Vec<EventRecord> {
        self.framer
            .flush()
            .and_then(|block| self.decoder.decode(&block))
            .into_iter()
            .collect()
    }
}

/// Line-by-line passthrough.
#[derive(Debug, Default)]
pub struct LineFraming {
    lines: LineSplitter,
}

impl LineFraming {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Framing for LineFraming {
    type Item = String;

    fn feed(&mut self, text: &str) -> Vec<String> {
        self.lines.feed(text)
    }

    fn flush(&mut self) -> Vec<String> {
        self.lines.flush().into_iter().collect()
    }
}

/// Framing picked at runtime from a [`Mode`].
#[derive(Debug)]
pub enum ModeFraming {
    Object(ObjectFraming),
    Line(LineFraming),
}

impl ModeFraming {
    pub fn new(mode: Mode, diagnostics: Option<DiagnosticSink>) -> Self {
        match mode {
            Mode::Object => Self::Object(ObjectFraming::new(diagnostics)),
            Mode::Line => Self::Line(LineFraming::new()),
        }
    }
}

impl Framing for ModeFraming {
    type Item = StreamItem;

    fn feed(&mut self, text: &str) -> Vec<StreamItem> {
        match self {
            Self::Object(f) => f.feed(text).into_iter().map(StreamItem::Event).collect(),
            Self::Line(f) => f.feed(text).into_iter().map(StreamItem::Line).collect(),
        }
    }

    fn flush(&mut self) -> Vec<StreamItem> {
        match self {
            Self::Object(f) => f.flush().into_iter().map(StreamItem::Event).collect(),
            Self::Line(f) => f.flush().into_iter().map(StreamItem::Line).collect(),
        }
    }
}

/// Lifecycle of a pipe. `Completed`, `Cancelled` and `Faulted` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeState {
    Idle,
    Active,
    Completed,
    Cancelled,
    Faulted,
}

impl PipeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Faulted)
    }
}

/// Pipe construction options.
#[derive(Debug, Clone)]
pub struct PipeOptions {
    /// Bound on items decoded ahead of the consumer. Clamped to at least 1.
    pub channel_capacity: usize,
    /// Where absorbed problems are reported, besides the log.
    pub diagnostics: Option<DiagnosticSink>,
}

impl Default for PipeOptions {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            diagnostics: None,
        }
    }
}

impl PipeOptions {
    #[must_use]
    pub fn with_diagnostics(mut self, sink: DiagnosticSink) -> Self {
        self.diagnostics = Some(sink);
        self
    }

    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }
}

#[derive(Debug)]
struct Shared {
    token: CancellationToken,
    state: watch::Sender<PipeState>,
    diagnostics: Option<DiagnosticSink>,
}

impl Shared {
    /// Move to `to` unless a terminal state was already reached.
    fn transition(&self, to: PipeState) -> bool {
        self.state.send_if_modified(|current| {
            if current.is_terminal() || *current == to {
                false
            } else {
                *current = to;
                true
            }
        })
    }

    fn state(&self) -> PipeState {
        *self.state.borrow()
    }

    fn cancel(&self) {
        self.token.cancel();
        if self.transition(PipeState::Cancelled) {
            debug!("Stream pipe cancelled");
            report(self.diagnostics.as_ref(), Diagnostic::Cancelled);
        }
    }
}

/// Out-of-band control for a [`StreamPipe`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PipeHandle {
    shared: Arc<Shared>,
}

impl PipeHandle {
    /// Stop the pipe. Idempotent; safe to call from any task at any time.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.token.is_cancelled()
    }

    pub fn state(&self) -> PipeState {
        self.shared.state()
    }

    /// Wait until the pipe reaches a terminal state.
    ///
    /// A pipe that is never polled and never cancelled stays `Idle` forever.
    pub async fn finished(&self) -> PipeState {
        let mut rx = self.shared.state.subscribe();
        match rx.wait_for(|s| s.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => self.shared.state(),
        }
    }
}

/// A lazily started, cancellable stream of decoded items.
///
/// Must be polled from within a Tokio runtime: the first poll spawns the
/// producer task. Dropping the pipe cancels it.
pub struct StreamPipe<T> {
    rx: mpsc::Receiver<T>,
    producer: Option<Producer<T>>,
    shared: Arc<Shared>,
    closed: bool,
}

impl StreamPipe<StreamItem> {
    /// Build a pipe whose output is chosen by `mode`.
    pub fn new(source: impl ChunkSource, mode: Mode, options: PipeOptions) -> Self {
        let framing = ModeFraming::new(mode, options.diagnostics.clone());
        Self::with_framing(source, framing, options)
    }
}

impl StreamPipe<EventRecord> {
    /// Build a pipe yielding decoded SSE events.
    pub fn objects(source: impl ChunkSource, options: PipeOptions) -> Self {
        let framing = ObjectFraming::new(options.diagnostics.clone());
        Self::with_framing(source, framing, options)
    }
}

impl StreamPipe<String> {
    /// Build a pipe yielding raw lines.
    pub fn lines(source: impl ChunkSource, options: PipeOptions) -> Self {
        Self::with_framing(source, LineFraming::new(), options)
    }
}

impl<T: Send + 'static> StreamPipe<T> {
    pub fn with_framing<F>(source: impl ChunkSource, framing: F, options: PipeOptions) -> Self
    where
        F: Framing<Item = T>,
    {
        let (tx, rx) = mpsc::channel(options.channel_capacity.max(1));
        let (state, _) = watch::channel(PipeState::Idle);
        let shared = Arc::new(Shared {
            token: CancellationToken::new(),
            state,
            diagnostics: options.diagnostics,
        });

        let producer = Producer {
            source: Box::new(source),
            framing: Box::new(framing),
            tx,
            shared: shared.clone(),
        };

        Self {
            rx,
            producer: Some(producer),
            shared,
            closed: false,
        }
    }

    pub fn handle(&self) -> PipeHandle {
        PipeHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn cancel(&self) {
        self.shared.cancel();
    }

    pub fn state(&self) -> PipeState {
        self.shared.state()
    }

    fn start(&mut self) {
        let Some(producer) = self.producer.take() else {
            return;
        };
        if self.shared.token.is_cancelled() {
            // Cancelled before the first pull: dropping the producer drops
            // the source and the sender, which ends the sequence.
            return;
        }
        tokio::spawn(producer.run());
    }
}

impl<T: Send + 'static> Stream for StreamPipe<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        this.start();

        if !this.closed && this.shared.token.is_cancelled() {
            // Already-queued items may still drain; nothing new gets in.
            this.rx.close();
            this.closed = true;
        }

        this.rx.poll_recv(cx)
    }
}

impl<T> Drop for StreamPipe<T> {
    fn drop(&mut self) {
        self.shared.cancel();
    }
}

struct Producer<T> {
    source: Box<dyn ChunkSource>,
    framing: Box<dyn Framing<Item = T>>,
    tx: mpsc::Sender<T>,
    shared: Arc<Shared>,
}

impl<T: Send + 'static> Producer<T> {
    async fn run(mut self) {
        self.shared.transition(PipeState::Active);
        debug!("Stream pipe started");

        let token = self.shared.token.clone();
        let mut utf8 = Utf8Decoder::new();

        loop {
            let next = tokio::select! {
                biased;
                () = token.cancelled() => None,
                next = self.source.next_chunk() => Some(next),
            };
            let Some(next) = next else {
                self.release().await;
                return;
            };

            match next {
                Ok(Some(chunk)) => {
                    if token.is_cancelled() {
                        self.release().await;
                        return;
                    }
                    let text = utf8.decode(&chunk);
                    let items = self.framing.feed(&text);
                    if !deliver(&self.tx, &token, items).await {
                        self.release().await;
                        return;
                    }
                }
                Ok(None) => {
                    let mut items = Vec::new();
                    if let Some(tail) = utf8.finish() {
                        items.extend(self.framing.feed(&tail));
                    }
                    items.extend(self.framing.flush());
                    if !deliver(&self.tx, &token, items).await {
                        self.release().await;
                        return;
                    }
                    if self.shared.transition(PipeState::Completed) {
                        debug!("Stream pipe completed");
                    }
                    return;
                }
                Err(e) => {
                    if self.shared.transition(PipeState::Faulted) {
                        warn!(error = %e, "Chunk source failed, ending stream");
                        report(
                            self.shared.diagnostics.as_ref(),
                            Diagnostic::SourceFault(e.to_string()),
                        );
                    }
                    return;
                }
            }
        }
    }

    /// Stop early: mark cancelled (if the consumer just went away) and let go of the source.
    async fn release(&mut self) {
        self.shared.cancel();
        debug!("Releasing chunk source");
        self.source.close().await;
    }
}

/// Send items in order. Returns false once the consumer is gone or cancelled.
///
/// Borrows only the channel and token: the producer's boxed source and
/// framing are `Send` but not `Sync`, so `&Producer` cannot cross an await.
async fn deliver<T: Send>(
    tx: &mpsc::Sender<T>,
    token: &CancellationToken,
    items: Vec<T>,
) -> bool {
    for item in items {
        tokio::select! {
            biased;
            () = token.cancelled() => return false,
            sent = tx.send(item) => {
                if sent.is_err() {
                    return false;
                }
            }
        }
    }
    true
}
