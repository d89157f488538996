//! Tests for the stream pipe.

use super::*;
use crate::error::SourceError;
use crate::sse::decode_all;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::channel::mpsc as fmpsc;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

const SAMPLE: &str = "id: 1\nevent: message\ndata: {\"text\":\"héllo wörld\"}\n\n\
                      : comment\nid: 2\nevent: part\nno_colon_line\ndata: [1,2,3]\n\n\
                      data: [DONE]\n\n\
                      id: 3\nevent: invalid\ndata: {invalidJson}\n\n\
                      retry: 10\n\n\n\
                      id: 4\nevent: tail\ndata: {\"€\":true}";

type TestSource =
    StreamSource<futures::stream::Iter<std::vec::IntoIter<Result<Vec<u8>, std::io::Error>>>>;

fn source_of(chunks: Vec<Vec<u8>>) -> TestSource {
    let chunks: Vec<Result<Vec<u8>, std::io::Error>> = chunks.into_iter().map(Ok).collect();
    StreamSource::new(futures::stream::iter(chunks))
}

fn text_source(chunks: &[&str]) -> TestSource {
    source_of(chunks.iter().map(|c| c.as_bytes().to_vec()).collect())
}

async fn collect_objects(source: impl ChunkSource) -> Vec<EventRecord> {
    let pipe = StreamPipe::objects(source, PipeOptions::default());
    timeout(WAIT, pipe.collect::<Vec<_>>()).await.unwrap()
}

fn channel_source() -> (fmpsc::UnboundedSender<Bytes>, impl ChunkSource) {
    let (tx, rx) = fmpsc::unbounded::<Bytes>();
    (tx, StreamSource::new(rx.map(Ok::<Bytes, std::io::Error>)))
}

/// Never yields; reports when it is closed.
struct StalledSource {
    pulls: Arc<AtomicUsize>,
    closed: Option<oneshot::Sender<()>>,
}

#[async_trait]
impl ChunkSource for StalledSource {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, SourceError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }

    async fn close(&mut self) {
        if let Some(tx) = self.closed.take() {
            let _ = tx.send(());
        }
    }
}

#[tokio::test]
async fn test_field_selection() {
    let records = collect_objects(text_source(&[
        "id: 1\nevent: message\ndata: {\"text\":\"hello\"}\n\n",
    ]))
    .await;
    assert_eq!(
        records,
        vec![EventRecord {
            id: Some(1),
            event: Some("message".into()),
            data: Some(json!({"text": "hello"})),
        }]
    );
}

#[tokio::test]
async fn test_partial_chunk_reassembly() {
    let records = collect_objects(text_source(&[
        "id: 1\nevent: part\ndata: {",
        "\"foo\":\"bar\"}\n\n",
    ]))
    .await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, Some(1));
    assert_eq!(records[0].event.as_deref(), Some("part"));
    assert_eq!(records[0].data, Some(json!({"foo": "bar"})));
}

#[tokio::test]
async fn test_malformed_line_tolerated() {
    let records = collect_objects(text_source(&[
        "id: 1\nevent: weird\nno_colon_line\ndata: {\"x\":1}\n\n",
    ]))
    .await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].event.as_deref(), Some("weird"));
    assert_eq!(records[0].data, Some(json!({"x": 1})));
}

#[tokio::test]
async fn test_malformed_json_tolerated() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let pipe = StreamPipe::objects(
        text_source(&["id: 1\nevent: invalid\ndata: {invalidJson}\n\n"]),
        PipeOptions::default().with_diagnostics(tx),
    );
    let records: Vec<_> = timeout(WAIT, pipe.collect()).await.unwrap();
    assert_eq!(
        records,
        vec![EventRecord {
            id: Some(1),
            event: Some("invalid".into()),
            data: None,
        }]
    );
    assert!(matches!(
        rx.recv().await,
        Some(Diagnostic::MalformedData { .. })
    ));
}

#[tokio::test]
async fn test_end_of_input_flush() {
    let records = collect_objects(text_source(&["id: 1\nevent: x\ndata: {\"y\":1}"])).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].data, Some(json!({"y": 1})));
}

#[tokio::test]
async fn test_done_sentinel_suppressed() {
    let records = collect_objects(text_source(&["data: [DONE]\n\n"])).await;
    assert!(records.is_empty());
}

#[tokio::test]
async fn test_chunk_boundary_invariance() {
    let expected = decode_all(SAMPLE);
    assert_eq!(expected.len(), 4);

    let bytes = SAMPLE.as_bytes();

    // Every two-way split, including empty leading and trailing chunks.
    for at in 0..=bytes.len() {
        let chunks = vec![bytes[..at].to_vec(), bytes[at..].to_vec()];
        assert_eq!(collect_objects(source_of(chunks)).await, expected, "split at {at}");
    }

    // Every fixed chunk width, with an empty chunk between each.
    for width in 1..=bytes.len() {
        let chunks: Vec<Vec<u8>> = bytes
            .chunks(width)
            .flat_map(|c| [c.to_vec(), Vec::new()])
            .collect();
        assert_eq!(collect_objects(source_of(chunks)).await, expected, "width {width}");
    }
}

#[tokio::test]
async fn test_line_mode() {
    let pipe = StreamPipe::lines(
        text_source(&["id: 1\nda", "ta: x\n\nlast"]),
        PipeOptions::default(),
    );
    let lines: Vec<String> = timeout(WAIT, pipe.collect()).await.unwrap();
    assert_eq!(lines, vec!["id: 1", "data: x", "", "last"]);
}

#[tokio::test]
async fn test_mode_selected_pipe() {
    let pipe = StreamPipe::new(
        text_source(&["event: a\n\n"]),
        Mode::Object,
        PipeOptions::default(),
    );
    let items: Vec<StreamItem> = timeout(WAIT, pipe.collect()).await.unwrap();
    assert_eq!(
        items,
        vec![StreamItem::Event(EventRecord {
            event: Some("a".into()),
            ..Default::default()
        })]
    );

    let pipe = StreamPipe::new(
        text_source(&["event: a\n\n"]),
        Mode::Line,
        PipeOptions::default(),
    );
    let items: Vec<StreamItem> = timeout(WAIT, pipe.collect()).await.unwrap();
    assert_eq!(
        items,
        vec![
            StreamItem::Line("event: a".into()),
            StreamItem::Line(String::new())
        ]
    );
}

#[tokio::test]
async fn test_lazy_start_and_completion_state() {
    let pulls = Arc::new(AtomicUsize::new(0));
    let counted = {
        let pulls = pulls.clone();
        let chunks: Vec<Result<&'static str, std::io::Error>> = vec![Ok("data: 1\n\n")];
        StreamSource::new(futures::stream::iter(chunks).inspect(move |_| {
            pulls.fetch_add(1, Ordering::SeqCst);
        }))
    };

    let mut pipe = StreamPipe::objects(counted, PipeOptions::default());
    let handle = pipe.handle();
    tokio::task::yield_now().await;
    assert_eq!(pipe.state(), PipeState::Idle);
    assert_eq!(pulls.load(Ordering::SeqCst), 0);

    let first = timeout(WAIT, pipe.next()).await.unwrap().unwrap();
    assert_eq!(first.data, Some(json!(1)));
    assert!(timeout(WAIT, pipe.next()).await.unwrap().is_none());
    assert_eq!(timeout(WAIT, handle.finished()).await.unwrap(), PipeState::Completed);

    // Terminal states are final.
    handle.cancel();
    assert_eq!(handle.state(), PipeState::Completed);
}

#[tokio::test]
async fn test_cancellation_stops_later_records() {
    let (tx, source) = channel_source();
    let (diag_tx, mut diag_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut pipe = StreamPipe::objects(source, PipeOptions::default().with_diagnostics(diag_tx));
    let handle = pipe.handle();

    tx.unbounded_send(Bytes::from_static(b"id: 1\n\nid: 2\n\nid: 3\n\n"))
        .unwrap();
    let first = timeout(WAIT, pipe.next()).await.unwrap().unwrap();
    assert_eq!(first.id, Some(1));

    handle.cancel();
    handle.cancel();
    assert!(handle.is_cancelled());
    let _ = tx.unbounded_send(Bytes::from_static(b"id: 4\n\n"));

    // Records queued before the cancel may drain; nothing after it arrives.
    let rest: Vec<_> = timeout(WAIT, pipe.by_ref().collect::<Vec<_>>())
        .await
        .unwrap();
    assert!(rest.iter().all(|r| matches!(r.id, Some(2 | 3))));
    assert_eq!(pipe.state(), PipeState::Cancelled);

    assert_eq!(diag_rx.recv().await, Some(Diagnostic::Cancelled));
    assert!(diag_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_cancel_releases_stalled_source() {
    let pulls = Arc::new(AtomicUsize::new(0));
    let (closed_tx, closed_rx) = oneshot::channel();
    let mut pipe = StreamPipe::objects(
        StalledSource {
            pulls: pulls.clone(),
            closed: Some(closed_tx),
        },
        PipeOptions::default(),
    );
    let handle = pipe.handle();

    let consumer = tokio::spawn(async move { pipe.next().await });
    while pulls.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(handle.state(), PipeState::Active);

    handle.cancel();
    assert!(timeout(WAIT, consumer).await.unwrap().unwrap().is_none());
    timeout(WAIT, closed_rx).await.unwrap().unwrap();
    assert_eq!(handle.state(), PipeState::Cancelled);
}

#[tokio::test]
async fn test_cancel_before_first_pull() {
    let mut pipe = StreamPipe::objects(text_source(&["data: 1\n\n"]), PipeOptions::default());
    pipe.cancel();
    assert!(timeout(WAIT, pipe.next()).await.unwrap().is_none());
    assert_eq!(pipe.state(), PipeState::Cancelled);
}

#[tokio::test]
async fn test_drop_releases_source() {
    let pulls = Arc::new(AtomicUsize::new(0));
    let (closed_tx, closed_rx) = oneshot::channel();
    let mut pipe = StreamPipe::lines(
        StalledSource {
            pulls: pulls.clone(),
            closed: Some(closed_tx),
        },
        PipeOptions::default(),
    );
    let handle = pipe.handle();

    // One poll to start the producer, then give up on it.
    let _ = timeout(Duration::from_millis(20), pipe.next()).await;
    drop(pipe);

    timeout(WAIT, closed_rx).await.unwrap().unwrap();
    assert_eq!(handle.state(), PipeState::Cancelled);
}

#[tokio::test]
async fn test_source_fault_ends_quietly() {
    let chunks: Vec<Result<Bytes, String>> = vec![
        Ok(Bytes::from_static(b"id: 1\n\nid: 2")),
        Err("connection reset".into()),
    ];
    let (diag_tx, mut diag_rx) = tokio::sync::mpsc::unbounded_channel();
    let pipe = StreamPipe::objects(
        StreamSource::new(futures::stream::iter(chunks)),
        PipeOptions::default().with_diagnostics(diag_tx),
    );
    let handle = pipe.handle();

    let records: Vec<_> = timeout(WAIT, pipe.collect()).await.unwrap();
    // The unterminated "id: 2" is not flushed on a fault.
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, Some(1));
    assert_eq!(handle.state(), PipeState::Faulted);

    match diag_rx.recv().await {
        Some(Diagnostic::SourceFault(msg)) => assert!(msg.contains("connection reset")),
        other => panic!("unexpected diagnostic: {other:?}"),
    }
}

#[tokio::test]
async fn test_backpressure_with_small_capacity() {
    let text: String = (0..50).map(|i| format!("id: {i}\n\n")).collect();
    let pipe = StreamPipe::objects(
        text_source(&[text.as_str()]),
        PipeOptions::default().with_capacity(1),
    );
    let ids: Vec<i64> = timeout(WAIT, pipe.filter_map(|r| async move { r.id }).collect())
        .await
        .unwrap();
    assert_eq!(ids, (0..50).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_reader_source_pipe() {
    let source = ReaderSource::with_chunk_size(SAMPLE.as_bytes(), 3);
    assert_eq!(collect_objects(source).await, decode_all(SAMPLE));
}

/// Send but not Sync, like most boxed readers.
struct CountingSource {
    inner: TestSource,
    pulls: std::cell::Cell<usize>,
}

#[async_trait]
impl ChunkSource for CountingSource {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, SourceError> {
        self.pulls.set(self.pulls.get() + 1);
        self.inner.next_chunk().await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pipe_with_non_sync_source_runs_on_worker_threads() {
    let source = CountingSource {
        inner: text_source(&["id: 1\n\nid", ": 2\n\n"]),
        pulls: std::cell::Cell::new(0),
    };
    let pipe = StreamPipe::objects(source, PipeOptions::default());
    let handle = pipe.handle();

    let records = tokio::spawn(async move { pipe.collect::<Vec<_>>().await });
    let records = timeout(WAIT, records).await.unwrap().unwrap();

    assert_eq!(
        records.iter().map(|r| r.id).collect::<Vec<_>>(),
        vec![Some(1), Some(2)]
    );
    assert_eq!(timeout(WAIT, handle.finished()).await.unwrap(), PipeState::Completed);
}
