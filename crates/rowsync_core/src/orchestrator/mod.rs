//! Orchestration shared by the client and server sides.

mod base;
mod server;

pub use base::{ApplyOptions, BaseOrchestrator, BatchOptions, CapturedChanges};
pub use server::{ServerChanges, ServerOptions, ServerOrchestrator};
