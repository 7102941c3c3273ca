//! # Coursewright Core
//!
//! Runtime-agnostic logic for Coursewright: data models, the error
//! taxonomy, text normalization and chunking, the document store
//! abstraction, the Document Index and its scoring, JSON extraction and
//! course parsing, the generation provider chain, and the thread registry.
//!
//! This crate contains no tokio, HTTP client, or filesystem I/O. Concrete
//! embedding and generation providers live in the `coursewright` app crate
//! and plug in through the [`embedding::Embedder`] and
//! [`generation::GenerationProvider`] traits.

pub mod chunk;
pub mod course;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
pub mod index;
pub mod models;
pub mod registry;
pub mod search;
pub mod store;
pub mod text;

pub use error::{Error, Result};
