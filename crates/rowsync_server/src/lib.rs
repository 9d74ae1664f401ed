//! # rowsync server
//!
//! The web side of the session protocol.
//!
//! This crate provides:
//! - [`WebServer`], which frames requests: header parsing, body digests,
//!   transport compression and error bodies
//! - [`RequestHandler`], one method per protocol step
//! - [`SessionStore`], the per-session cache kept between steps
//!
//! The server is transport-neutral. A host forwards every POST to the sync
//! endpoint as an [`HttpRequest`](rowsync_protocol::HttpRequest); tests
//! put it behind a loopback client.
//!
//! # Sessions
//!
//! A session opens on `EnsureScopes` or `EnsureSchema` and lives until
//! `SendEndDownloadChanges` or until it stays idle longer than
//! [`ServerConfig::session_ttl`]. Any later step on a missing session fails
//! with the `session-lost` error kind; the client must start over.
//!
//! ```rust,ignore
//! use rowsync_server::{ServerConfig, WebServer};
//!
//! let config = ServerConfig::default()
//!     .with_setup(SyncSetup::new(["Customer", "Order"]))
//!     .with_batch_directory("/var/lib/rowsync/batches");
//! let server = WebServer::new(provider, config);
//! let response = server.process(request);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod server;
mod session;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::RequestHandler;
pub use server::WebServer;
pub use session::{SessionCache, SessionHandle, SessionStore};
