//! Collector export for flowlens.
//!
//! [`ExportClient`] serializes a closed [`flowlens_core::Run`] into a
//! [`TraceDocument`] and posts it to `<endpoint><ingest_path>` with the
//! `X-Auth-Token` header.

mod client;
mod document;

pub use client::ExportClient;
pub use document::{TraceDocument, TraceMetadata};
