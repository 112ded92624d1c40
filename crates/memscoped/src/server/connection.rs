//! Connection handler for individual client connections.
//!
//! Each client connection gets its own `ConnectionHandler` that:
//! - Checks the 8-byte challenge key
//! - Assembles length-prefixed chunks into frames
//! - Hands each frame to its `Dispatcher` and waits for it to finish
//! - Detaches the connection's process exactly once when it ends
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Every protocol violation ends the connection; none is answered

use std::net::{IpAddr, SocketAddr};

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use memscope_core::{AttachId, MemoryError};
use memscope_protocol::{DecodeError, FrameAssembler, FrameEvent, FramingError};

use super::dispatch::Dispatcher;
use crate::registry::RegistryError;

/// Connection handler for a single client.
pub struct ConnectionHandler {
    id: AttachId,
    stream: TcpStream,
    peer: SocketAddr,
    challenge_key: u64,
    assembler: FrameAssembler,
    dispatcher: Dispatcher,
    cancel_token: CancellationToken,
}

impl ConnectionHandler {
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `id` - Unique id of this connection
    /// * `stream` - Accepted TCP stream
    /// * `peer` - Remote address of the stream
    /// * `challenge_key` - Key the client must send first
    /// * `max_chunk_size` - Largest chunk the client may send
    /// * `dispatcher` - Applies decoded commands
    /// * `cancel_token` - Cancelled when the server stops
    pub fn new(
        id: AttachId,
        stream: TcpStream,
        peer: SocketAddr,
        challenge_key: u64,
        max_chunk_size: usize,
        dispatcher: Dispatcher,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            id,
            stream,
            peer,
            challenge_key,
            assembler: FrameAssembler::new(max_chunk_size),
            dispatcher,
            cancel_token,
        }
    }

    /// Runs the connection until the client leaves, breaks the protocol,
    /// or the server stops. Always detaches the connection's process.
    pub async fn run(mut self) {
        info!(
            connection = %self.id,
            peer = %self.peer,
            remote = self.dispatcher.is_remote(),
            "Client connected"
        );

        match self.process_stream().await {
            Ok(()) => debug!(connection = %self.id, "Connection closed by server"),
            Err(ConnectionError::Eof) => debug!(connection = %self.id, "Connection closed by peer"),
            Err(ConnectionError::AuthenticationFailed) => {
                warn!(connection = %self.id, peer = %self.peer, "Challenge key mismatch, dropping client");
            }
            Err(e) => warn!(connection = %self.id, peer = %self.peer, error = %e, "Dropping client"),
        }

        let pid = self.dispatcher.attached_pid();
        self.dispatcher.finish().await;
        info!(connection = %self.id, pid, "Client disconnected");
    }

    /// Reads into the assembler until a terminal condition.
    ///
    /// Each read asks for at most what the current phase still needs, so
    /// one read never spans two phases.
    async fn process_stream(&mut self) -> Result<(), ConnectionError> {
        loop {
            let read = tokio::select! {
                _ = self.cancel_token.cancelled() => return Ok(()),
                read = self.stream.read(self.assembler.remaining_mut()) => read,
            };

            let n = match read {
                Ok(0) => return Err(ConnectionError::Eof),
                Ok(n) => n,
                Err(e) => return Err(ConnectionError::Io(e.to_string())),
            };

            match self.assembler.advance(n)? {
                Some(FrameEvent::Challenge(key)) => {
                    if key != self.challenge_key {
                        return Err(ConnectionError::AuthenticationFailed);
                    }
                    debug!(connection = %self.id, "Challenge accepted");
                }
                Some(FrameEvent::Frame(frame)) => {
                    // Wait for the command so frames apply in arrival order
                    tokio::select! {
                        _ = self.cancel_token.cancelled() => return Ok(()),
                        result = self.dispatcher.dispatch(&frame) => result?,
                    }
                }
                None => {}
            }
        }
    }
}

/// Whether `peer` is on this machine. IPv4-mapped IPv6 loopback counts.
pub fn is_loopback(peer: &SocketAddr) -> bool {
    match peer.ip() {
        IpAddr::V4(ip) => ip.is_loopback(),
        IpAddr::V6(ip) => {
            ip.is_loopback() || ip.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback())
        }
    }
}

/// Reasons a connection ends.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Challenge key mismatch")]
    AuthenticationFailed,

    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("Malformed command: {0}")]
    Decode(#[from] DecodeError),

    #[error("Could not open process {pid}: {source}")]
    ProcessOpen {
        pid: u64,
        #[source]
        source: MemoryError,
    },

    #[error("Command rejected: {0}")]
    Registry(#[from] RegistryError),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,
}
