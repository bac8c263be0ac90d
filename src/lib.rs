#![deny(missing_docs)]

//! Core library for DocChat: PDF ingestion into per-document vector namespaces and
//! context-grounded chat over them.

/// HTTP routing and REST handlers.
pub mod api;
/// Chat prompts and completion clients.
pub mod chat;
/// Environment-driven configuration management.
pub mod config;
/// Context retrieval for questions about a document.
pub mod context;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// PDF text extraction.
pub mod extract;
/// Document ingestion pipeline.
pub mod ingest;
/// Structured logging and tracing setup.
pub mod logging;
/// Ingestion and retrieval metrics helpers.
pub mod metrics;
/// Page normalization and chunking.
pub mod segment;
/// Document service shared by the HTTP surface and the CLI.
pub mod service;
/// Blob storage for uploaded PDFs.
pub mod storage;
/// Namespaced vector index backends.
pub mod vector;
