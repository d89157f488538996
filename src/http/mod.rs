//! HTTP transport for event streams.

mod client;

pub use client::{AuthConfig, BodySource, HttpClient, split_header};
