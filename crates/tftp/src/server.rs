//! TFTP Server Implementation
//!
//! This module owns the UDP socket and the receive loop. Every datagram is
//! handed to the [`ProtocolEngine`] on its own task, so transfers for
//! different peers proceed in parallel.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;

use crate::engine::ProtocolEngine;
use crate::transfer::{PathPolicy, RootDirectory, TransferConfig};

/// Largest datagram read from the socket; anything bigger than a full DATA
/// packet is rejected by the decoder
const RECV_BUFFER_SIZE: usize = 2048;

/// TFTP Server configuration
#[derive(Debug, Clone)]
pub struct TftpServerConfig {
    pub bind_address: String,
    pub root_directory: PathBuf,
    pub transfer_config: TransferConfig,
}

impl Default for TftpServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:69".to_string(),
            root_directory: PathBuf::from("./tftp_root"),
            transfer_config: TransferConfig::default(),
        }
    }
}

/// Main TFTP server
pub struct TftpServer {
    config: TftpServerConfig,
    paths: Arc<dyn PathPolicy>,
    socket: Option<Arc<UdpSocket>>,
    engine: Option<Arc<ProtocolEngine>>,
}

impl TftpServer {
    /// Create a new TFTP server confined to the configured root directory
    pub fn new(config: TftpServerConfig) -> Self {
        let paths = Arc::new(RootDirectory::new(config.root_directory.clone()));
        Self {
            config,
            paths,
            socket: None,
            engine: None,
        }
    }

    /// Create a new TFTP server with default configuration
    pub fn with_defaults() -> Self {
        Self::new(TftpServerConfig::default())
    }

    /// Create a new TFTP server with custom bind address and root directory
    pub fn with_config(bind_address: String, root_directory: PathBuf) -> Self {
        Self::new(TftpServerConfig {
            bind_address,
            root_directory,
            ..Default::default()
        })
    }

    /// Replace the filename policy; takes effect at the next bind
    pub fn with_path_policy(mut self, paths: Arc<dyn PathPolicy>) -> Self {
        self.paths = paths;
        self
    }

    /// Get the server's configuration
    pub fn config(&self) -> &TftpServerConfig {
        &self.config
    }

    /// Get a mutable reference to the server's configuration
    pub fn config_mut(&mut self) -> &mut TftpServerConfig {
        &mut self.config
    }

    /// Get the local address the server is bound to (if bound)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Engine of the bound server, for inspecting active transfers
    pub fn engine(&self) -> Option<Arc<ProtocolEngine>> {
        self.engine.clone()
    }

    /// Bind the socket, returning the bound address
    ///
    /// Binding is the only failure that is fatal to the server.
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        if let Some(addr) = self.local_addr() {
            return Ok(addr);
        }

        let socket = UdpSocket::bind(&self.config.bind_address)
            .await
            .with_context(|| format!("Failed to bind TFTP server socket to {}", self.config.bind_address))?;
        let local_addr = socket.local_addr().context("Failed to get local address")?;

        let socket = Arc::new(socket);
        self.engine = Some(ProtocolEngine::new(
            Arc::clone(&socket),
            self.config.transfer_config.clone(),
            Arc::clone(&self.paths),
        ));
        self.socket = Some(socket);

        tracing::info!(
            "TFTP server listening on {}, serving files from {}",
            local_addr,
            self.config.root_directory.display()
        );
        Ok(local_addr)
    }

    /// Start the TFTP server and run until the task is dropped
    pub async fn run(&mut self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Start the TFTP server and run until `shutdown` completes
    ///
    /// On shutdown every pending timer is cancelled and every open file is
    /// closed before the socket is released.
    pub async fn run_until(&mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        self.bind().await?;
        let (Some(socket), Some(engine)) = (self.socket.clone(), self.engine.clone()) else {
            anyhow::bail!("TFTP server is not bound");
        };

        tokio::pin!(shutdown);
        let mut buffer = [0u8; RECV_BUFFER_SIZE];

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                received = socket.recv_from(&mut buffer) => {
                    let (len, peer) = match received {
                        Ok(received) => received,
                        Err(e) => {
                            // ICMP errors from earlier sends surface here on some platforms
                            tracing::debug!("Receive failed: {}", e);
                            continue;
                        }
                    };
                    tracing::trace!("Received {} bytes from {}", len, peer);

                    let packet = buffer[..len].to_vec();
                    let engine = Arc::clone(&engine);
                    tokio::spawn(async move { engine.handle_datagram(&packet, peer).await });
                }
            }
        }

        engine.shutdown().await;
        self.engine = None;
        self.socket = None;
        tracing::info!("TFTP server stopped");
        Ok(())
    }
}

/// Run a TFTP server with the given bind address and root directory
///
/// This is a convenience function that creates and runs a TFTP server.
pub async fn run_tftp_server(bind_address: String, root_directory: PathBuf) -> Result<()> {
    let mut server = TftpServer::with_config(bind_address, root_directory);
    server.run().await
}
