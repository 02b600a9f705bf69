//! # RAG Harness
//!
//! A conversational retrieval-augmented generation service.
//!
//! RAG Harness ingests documents idempotently (keyed by a content
//! fingerprint), indexes their chunks for semantic search, and answers
//! questions by rewriting them against the session history, retrieving
//! passages, assembling a cited context, and generating an answer.
//!
//! ## Architecture
//!
//! ```text
//!  ingest:  bytes ─▶ hash ─▶ loader ─▶ chunk ─▶ index (embed + store)
//!
//!  chat:    memory ─▶ rewrite ─▶ retrieve ─▶ assemble ─▶ generate ─▶ memory
//!                                   │
//!                              ┌────┴─────┐
//!                              │  SQLite  │  files (ledger) + entries (vectors)
//!                              └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Error taxonomy with wire codes and HTTP statuses |
//! | [`models`] | Core data types |
//! | [`hash`] | Content fingerprints |
//! | [`extract`] | PDF and OOXML text extraction |
//! | [`loader`] | File → documents |
//! | [`chunk`] | Recursive-separator chunking with overlap |
//! | [`embedding`] | Embedding providers and vector helpers |
//! | [`llm`] | Chat-completion providers |
//! | [`store`] | Index storage trait, SQLite and in-memory backends |
//! | [`index`] | Fingerprint-keyed index manager and retriever |
//! | [`memory`] | Per-session conversation history |
//! | [`rewrite`] | History-aware question rewriting |
//! | [`context`] | Context assembly with citations |
//! | [`generate`] | Answer generation |
//! | [`pipeline`] | The conversational stage machine |
//! | [`ingest`] | Ingestion orchestration |
//! | [`app`] | Service wiring |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`logging`] | Tracing setup |

pub mod app;
pub mod chunk;
pub mod config;
pub mod context;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generate;
pub mod hash;
mod http;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod loader;
pub mod logging;
pub mod memory;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod rewrite;
pub mod server;
pub mod store;
