//! TCP server for instrumented processes.
//!
//! The server:
//! - Validates its config, then binds the listen address
//! - Spawns a ConnectionHandler for each client
//! - Tracks open connections so `stop()` can close all of them
//! - Supports shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ MemscopeServer  │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│   Dispatcher    │────▶│  RegistryHandle │
//! │ (framing, auth) │     │ (command rules) │     │                 │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Accept errors are logged and the server keeps accepting
//! - A poisoned connection-set lock is recovered, not propagated

mod connection;
mod dispatch;

pub use connection::{is_loopback, ConnectionError, ConnectionHandler};
pub use dispatch::Dispatcher;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use memscope_core::{AttachId, MemoryAccess};

use crate::config::{ConfigError, ServerConfig};
use crate::registry::RegistryHandle;

/// An open connection as seen by the server.
struct ConnectionEntry {
    peer: SocketAddr,
    cancel_token: CancellationToken,
}

type ConnectionSet = Arc<Mutex<HashMap<AttachId, ConnectionEntry>>>;

/// TCP server for instrumented processes.
pub struct MemscopeServer {
    config: ServerConfig,

    /// Taken by `run()`; dropped to close the socket
    listener: tokio::sync::Mutex<Option<TcpListener>>,

    local_addr: SocketAddr,

    registry: RegistryHandle,

    memory: Arc<dyn MemoryAccess>,

    /// Cancelled by `stop()`; every connection holds a child token
    cancel_token: CancellationToken,

    /// Connection counter for generating connection ids
    connection_counter: AtomicU64,

    connections: ConnectionSet,
}

impl MemscopeServer {
    /// Validates `config` and binds its listen address.
    ///
    /// Nothing is bound if validation fails.
    ///
    /// # Arguments
    ///
    /// * `config` - Listen address, challenge key and limits
    /// * `registry` - Handle to the process registry
    /// * `memory` - Opens processes named by RegisterProcess
    pub async fn bind(
        config: ServerConfig,
        registry: RegistryHandle,
        memory: Arc<dyn MemoryAccess>,
    ) -> Result<Self, ServerError> {
        config.validate()?;

        let addr = config.listen_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        info!(addr = %local_addr, "memscope server listening");

        Ok(Self {
            config,
            listener: tokio::sync::Mutex::new(Some(listener)),
            local_addr,
            registry,
            memory,
            cancel_token: CancellationToken::new(),
            connection_counter: AtomicU64::new(0),
            connections: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        lock(&self.connections).len()
    }

    /// Token cancelled when the server stops.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Accepts connections until [`Self::stop`] is called.
    ///
    /// # Errors
    ///
    /// `ServerError::NotListening` if the server already ran or was stopped.
    pub async fn run(&self) -> Result<(), ServerError> {
        let Some(listener) = self.listener.lock().await.take() else {
            return Err(ServerError::NotListening);
        };

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => self.handle_connection(stream, peer),
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        drop(listener);
        self.close_connections();
        info!("Server stopped");
        Ok(())
    }

    /// Stops accepting, closes every open connection and clears the set.
    ///
    /// Idempotent; safe to call before, during or after `run()`.
    pub fn stop(&self) {
        if !self.cancel_token.is_cancelled() {
            debug!("Stopping server");
        }
        self.cancel_token.cancel();

        // Close the socket now if run() never took it
        if let Ok(mut listener) = self.listener.try_lock() {
            listener.take();
        }

        self.close_connections();
    }

    fn close_connections(&self) {
        let mut connections = lock(&self.connections);
        for (id, entry) in connections.drain() {
            debug!(connection = %id, peer = %entry.peer, "Closing connection");
            entry.cancel_token.cancel();
        }
    }

    /// Spawns a handler task for a new connection.
    fn handle_connection(&self, stream: tokio::net::TcpStream, peer: SocketAddr) {
        let id = AttachId::new(self.connection_counter.fetch_add(1, Ordering::Relaxed) + 1);
        let cancel_token = self.cancel_token.child_token();

        lock(&self.connections).insert(
            id,
            ConnectionEntry {
                peer,
                cancel_token: cancel_token.clone(),
            },
        );

        let dispatcher = Dispatcher::new(
            id,
            !is_loopback(&peer),
            self.registry.clone(),
            Arc::clone(&self.memory),
        );
        let handler = ConnectionHandler::new(
            id,
            stream,
            peer,
            self.config.challenge_key,
            self.config.max_chunk_size,
            dispatcher,
            cancel_token,
        );
        let connections = Arc::clone(&self.connections);

        tokio::spawn(async move {
            handler.run().await;
            lock(&connections).remove(&id);
        });
    }
}

impl Drop for MemscopeServer {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Server is not listening (already run or stopped)")]
    NotListening,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::spawn_registry;
    use memscope_core::{platform_memory, ConversionRegistry};
    use std::net::{IpAddr, Ipv4Addr};

    fn local_config(port: u16, key: u64) -> ServerConfig {
        let mut config = ServerConfig::new(port, key);
        config.bind_address = IpAddr::V4(Ipv4Addr::LOCALHOST);
        config
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let registry = spawn_registry(ConversionRegistry::new(), 8);

        let err = MemscopeServer::bind(local_config(0, 1), registry.clone(), platform_memory())
            .await
            .err();
        assert!(matches!(err, Some(ServerError::Config(ConfigError::InvalidPort))));

        let err = MemscopeServer::bind(local_config(1, 0), registry, platform_memory())
            .await
            .err();
        assert!(matches!(
            err,
            Some(ServerError::Config(ConfigError::InvalidChallengeKey))
        ));
    }

    #[tokio::test]
    async fn test_stop_before_run() {
        let registry = spawn_registry(ConversionRegistry::new(), 8);
        // Port 0 fails validation, so borrow a free port from a probe listener
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .and_then(|probe| probe.local_addr())
            .unwrap()
            .port();

        let server = MemscopeServer::bind(local_config(port, 1), registry, platform_memory())
            .await
            .unwrap();

        server.stop();
        server.stop();

        assert!(matches!(server.run().await, Err(ServerError::NotListening)));
        assert_eq!(server.connection_count(), 0);
    }

    #[test]
    fn test_server_error_display() {
        let err = ServerError::Config(ConfigError::InvalidPort);
        assert!(err.to_string().contains("port"));
    }
}
