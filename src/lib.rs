//! Chunk-boundary-invariant decoding of Server-Sent Event streams.
//!
//! Raw transport chunks go in; decoded [`sse::EventRecord`]s (or raw lines)
//! come out of a cancellable [`stream::StreamPipe`].

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod cli;
pub mod config;
pub mod error;
pub mod http;
pub mod sse;
pub mod stream;
