//! Trellis - role-based service materializer over a Consul-style KV store.
//!
//! Trellis observes three kinds of remote input - registered nodes,
//! declared roles, and referenced watcher values - and maintains, in
//! the same coordination store, a derived set of service documents:
//! one per (node, service) pair produced by expanding the services of
//! each role whose matcher selects that node.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Consul-style KV store                       │
//! │    nodes prefix    │    roles prefix    │    watcher keys       │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │ watches
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Merged Event Stream                        │
//! │   node changes │ role changes │ watcher values │ state queries  │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │ one consumer
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Reconciler                              │
//! │   matcher evaluation │ template expansion │ schema validation   │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │ diff
//! ┌─────────────────────────────────────────────────────────────────┐
//! │               services prefix (PUT / DELETE)                    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::runtime`] - Runtime orchestration
//! - [`core::error`] - Error types
//!
//! ## Inputs
//! - [`edn`] - Symbolic expression values, reader, printer, JSON conversion
//! - [`matcher`] - Matcher expression compiler
//! - [`document`] - Service document schema
//! - [`kv`] - KV client interface (Consul HTTP and in-memory)
//!
//! ## Engine
//! - [`engine::state`] - In-memory state model
//! - [`engine::events`] - Merged event stream
//! - [`engine::watchers`] - Reference-counted watcher registry
//! - [`engine::expand`] - Template expansion
//! - [`engine::reconciler`] - Event application and downstream diffing
//!
//! ## Surfaces
//! - [`query`] - Read-only HTTP `/state` endpoint
//! - [`cli`] - Command-line interface
//!
//! # Key Invariants
//!
//! - **SINGLE-WRITER**: all state mutation happens on the reconciler;
//!   queries receive owned snapshots.
//! - **WELL-FORMED**: every materialized (node, service) entry is
//!   backed by an existing node, a selecting role, and live watchers.
//! - **CONVERGENCE**: after any event is applied, the services prefix
//!   eventually reflects the materialized map exactly.
//! - **BLOCKING-FIRST-READ**: a role never materializes documents
//!   before every watcher it references has a concrete value.

pub mod cli;
pub mod core;
pub mod document;
pub mod edn;
pub mod engine;
pub mod kv;
pub mod matcher;
pub mod query;
