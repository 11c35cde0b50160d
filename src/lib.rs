//! Multi-tenant product knowledge engine.
//!
//! Combines a relational fact store (structured spec values) with a
//! filtered vector index (semantic chunks) behind a single [`router::Router`]
//! that classifies each query's intent and picks a retrieval path —
//! structured-first, structured-batch, comparison, or hybrid — before
//! assembling a scoped, cache-backed response.
//!
//! Every module above the storage tier depends only on the [`repository::FactStore`],
//! [`vector_index::VectorIndex`], and [`embedder::Embedder`] ports; concrete
//! backends live behind those traits and are swappable per deployment (see
//! the `sqlite`/`postgres` features).

pub mod cache;
pub mod config;
pub mod domain;
pub mod drift;
pub mod embedder;
pub mod error;
pub mod ingestion;
pub mod intent;
pub mod normalizer;
pub mod parser;
pub mod repository;
pub mod router;
pub mod vector_index;

pub use config::Config;
pub use error::{PkeError, PkeResult};
pub use router::{QueryRequest, QueryResponse, Router, RouterBuilder};
