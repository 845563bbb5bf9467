//! # Orange
//!
//! A retrieval-augmented study assistant. Upload study material (text, PDF,
//! scanned pages, photos of a whiteboard), ask questions about it, and get
//! answers grounded in what you uploaded, plus quizzes and review notes.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Extract   │──▶│    Store     │──▶│ VectorIndex  │
//! │ PDF / OCR  │   │ split+embed  │   │ SQLite / mem │
//! └────────────┘   └──────────────┘   └──────┬───────┘
//!                                            │
//!     query ──▶ classify ──▶ Retriever ◀─────┘
//!                               │
//!                               ▼
//!                         prompt ──▶ ChatBackend ──▶ response / stream
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! orange init
//! orange add lecture.pdf
//! orange ask "RAG가 뭐야?" --stream
//! orange quiz --num 5 --difficulty hard
//! orange test
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Chunks and search hits |
//! | [`chunk`] | Recursive separator text splitting |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Vector index trait and backends |
//! | [`extract`] | PDF text and OCR |
//! | [`store`] | Document ingestion and similarity search |
//! | [`retriever`] | Query-side context formatting |
//! | [`classify`] | Keyword intent classification |
//! | [`prompt`] | Task-specific message assembly |
//! | [`llm`] | Chat-completion backends |
//! | [`pipeline`] | Blocking and streaming generation |
//! | [`harness`] | Canned-query quality checks |
//! | [`quiz`] | Quiz generation and grading |
//! | [`app`] | Service wiring |

pub mod app;
pub mod chunk;
pub mod classify;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod harness;
pub mod http;
pub mod index;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod quiz;
pub mod retriever;
pub mod store;
