//! # Coursewright
//!
//! Retrieval-augmented course and strategy synthesis.
//!
//! Teaching materials are chunked into an in-memory document index, the
//! most relevant excerpts are retrieved for a request, and a ranked chain of
//! generation providers drafts a structured course through a five-stage
//! workflow. The same index feeds a single-pass strategy-proposal pipeline.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌────────────────┐
//! │   Ingest    │──▶│  Document   │──▶│ Workflow Engine │──▶ Course
//! │ dir → chunk │   │   Index     │   │ 5 stages + SSE  │
//! └─────────────┘   └──────┬──────┘   └───────┬────────┘
//!                          │                  │
//!                          ▼                  ▼
//!                    ┌──────────┐      ┌──────────────┐
//!                    │ Strategy │      │ Provider     │
//!                    │ pipeline │─────▶│ chain        │
//!                    └──────────┘      └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cw ingest ./materials
//! cw --materials ./materials search "circular economy"
//! cw --materials ./materials generate --params course.json --stream
//! cw serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`app`] | Shared wiring of index, providers, and pipelines |
//! | [`config`] | TOML configuration parsing |
//! | [`embedding`] | HTTP embedding providers |
//! | [`providers`] | HTTP generation providers |
//! | [`workflow`] | Course-generation workflow engine |
//! | [`export`] | Course design tables (CSV, markdown, HTML) |
//! | [`strategy`] | Strategy-proposal synthesis |
//! | [`ingest`] | Directory ingestion |
//! | [`server`] | HTTP server |
//!
//! The index, provider chain, course parsing, and thread registry live in
//! the `coursewright-core` crate.

pub mod app;
pub mod config;
pub mod embedding;
pub mod export;
pub mod http;
pub mod ingest;
pub mod prompts;
pub mod providers;
pub mod search;
pub mod server;
pub mod stats;
pub mod strategy;
pub mod workflow;
