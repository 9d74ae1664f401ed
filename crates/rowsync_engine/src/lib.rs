//! # rowsync Engine
//!
//! Client side of a rowsync synchronization.
//!
//! This crate provides:
//! - [`SyncAgent`], the per-attempt state machine (`Ready → Synchronizing → Ready`)
//! - [`LocalOrchestrator`] over the caller's own store
//! - The [`RemoteOrchestrator`] seam with an in-process and an HTTP realization
//! - Declarative retry policy and cooperative cancellation
//! - The [`HttpClient`] abstraction and a loopback client
//!
//! ## Sequence
//!
//! One attempt negotiates the schema (bootstrapping or migrating the local
//! scope), captures local changes, applies a snapshot when bootstrapping,
//! uploads its changes and receives the server's in the same exchange, then
//! applies them locally with the server's policy reversed.
//!
//! ## Key Invariants
//!
//! - One attempt at a time per agent
//! - Conflicts are decided once, by the server's policy
//! - A lost session is never retried in place
//! - The last batch part is downloaded after every other part
//! - No response body is trusted before its hash verifies

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod agent;
mod cancel;
mod config;
mod error;
mod http;
mod local;
mod remote;
mod web;

pub use agent::{AgentState, SyncAgent};
pub use cancel::CancellationToken;
pub use config::{RetryPolicy, SyncConfig, DEFAULT_DOWNLOAD_PARALLELISM};
pub use error::{EngineResult, Side, SyncError};
pub use http::{HttpClient, LoopbackClient};
pub use local::LocalOrchestrator;
pub use remote::{InProcessOrchestrator, RemoteChanges, RemoteOrchestrator};
pub use web::WebRemoteOrchestrator;
