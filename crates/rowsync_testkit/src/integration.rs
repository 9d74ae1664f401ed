//! Cross-crate integration test helpers.
//!
//! Runs client agents against a web server through a loopback client, or
//! against the server orchestrator directly.

use crate::fixtures::sample_setup;
use rowsync_core::{MemoryProvider, ServerOrchestrator};
use rowsync_engine::{
    InProcessOrchestrator, LoopbackClient, RetryPolicy, SyncAgent, SyncConfig,
    WebRemoteOrchestrator,
};
use rowsync_server::{ServerConfig, WebServer};
use std::sync::Arc;
use std::time::Duration;

/// Scope used by the harness.
pub const SCOPE: &str = "default";

/// The loopback transport of harness clients.
pub type HarnessClient = LoopbackClient<Arc<WebServer<MemoryProvider>>>;

/// An agent syncing through the web protocol.
pub type WebAgent = SyncAgent<MemoryProvider, WebRemoteOrchestrator<HarnessClient>>;

/// An agent syncing against the server orchestrator in process.
pub type InProcessAgent = SyncAgent<MemoryProvider, InProcessOrchestrator<MemoryProvider>>;

/// A server with any number of clients.
pub struct SyncHarness {
    server: Arc<WebServer<MemoryProvider>>,
    client_config: SyncConfig,
}

impl SyncHarness {
    /// Creates a harness serving `store` with the sample setup.
    pub fn new(store: Arc<MemoryProvider>) -> Self {
        Self::with_config(store, ServerConfig::default().with_setup(sample_setup()))
    }

    /// Creates a harness serving `store` with `config`.
    pub fn with_config(store: Arc<MemoryProvider>, config: ServerConfig) -> Self {
        Self {
            server: Arc::new(WebServer::new(store, config)),
            client_config: default_client_config(),
        }
    }

    /// Replaces the configuration given to new clients.
    #[must_use]
    pub fn with_client_config(mut self, config: SyncConfig) -> Self {
        self.client_config = config;
        self
    }

    /// The web server.
    pub fn server(&self) -> &Arc<WebServer<MemoryProvider>> {
        &self.server
    }

    /// The server store.
    pub fn server_store(&self) -> &MemoryProvider {
        self.server.orchestrator().base().provider()
    }

    /// A fresh client syncing through the web protocol.
    pub fn client(&self, name: &str) -> WebAgent {
        self.client_with(Arc::new(MemoryProvider::new(name)), self.client_config.clone())
    }

    /// A client over an existing store with its own configuration.
    pub fn client_with(&self, store: Arc<MemoryProvider>, config: SyncConfig) -> WebAgent {
        let remote =
            WebRemoteOrchestrator::new(LoopbackClient::new(Arc::clone(&self.server)), config.clone())
                .expect("Failed to create remote orchestrator");
        SyncAgent::new(store, remote, config)
    }

    /// A fresh client calling the server orchestrator directly.
    pub fn in_process_client(&self, name: &str) -> InProcessAgent {
        let orchestrator: Arc<ServerOrchestrator<MemoryProvider>> =
            Arc::clone(self.server.orchestrator());
        SyncAgent::new(
            Arc::new(MemoryProvider::new(name)),
            InProcessOrchestrator::new(orchestrator),
            self.client_config.clone(),
        )
    }
}

/// Client configuration with fast retries.
pub fn default_client_config() -> SyncConfig {
    SyncConfig::new(SCOPE)
        .with_server_url("memory://sync")
        .with_retry(
            RetryPolicy::new(3)
                .with_initial_delay(Duration::from_millis(1))
                .with_jitter(false),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{assert_same_rows, customer, seeded_server, CUSTOMER, ORDER};

    #[test]
    fn clients_converge() {
        let harness = SyncHarness::new(seeded_server("server", 10));
        let a = harness.client("a");
        let b = harness.client("b");

        a.synchronize().unwrap();
        b.synchronize().unwrap();
        assert_same_rows(a.local().provider(), harness.server_store(), CUSTOMER);
        assert_same_rows(b.local().provider(), harness.server_store(), ORDER);

        a.local()
            .provider()
            .upsert(CUSTOMER, customer(11, "from a"))
            .unwrap();
        a.synchronize().unwrap();
        let result = b.synchronize().unwrap();
        assert_eq!(result.total_changes_downloaded, 1);
        assert_same_rows(a.local().provider(), b.local().provider(), CUSTOMER);
        assert!(harness.server().sessions().is_empty());
    }

    #[test]
    fn in_process_client_matches_web_client() {
        let harness = SyncHarness::new(seeded_server("server", 4));
        let web = harness.client("web");
        let direct = harness.in_process_client("direct");

        let over_web = web.synchronize().unwrap();
        let in_process = direct.synchronize().unwrap();
        assert_eq!(
            over_web.total_changes_downloaded,
            in_process.total_changes_downloaded
        );
        assert_same_rows(web.local().provider(), direct.local().provider(), ORDER);
    }
}
