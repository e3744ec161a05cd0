//! TFTP (Trivial File Transfer Protocol) Implementation
//!
//! This crate provides an RFC 1350 TFTP server engine with support for:
//! - Read requests (RRQ) and write requests (WRQ)
//! - Concurrent transfers, isolated per peer and direction
//! - Retransmission with a bounded retry budget
//! - Path traversal protection through an injectable [`PathPolicy`]
//!
//! Option negotiation (RFC 2347) is not supported; options offered by a
//! client are ignored and the transfer proceeds with 512-byte blocks. The
//! transfer mode is carried but not interpreted.
//!
//! # Protocol Organization
//!
//! - [`Message`] - The five packet kinds with [`Message::decode`] and [`Message::encode`]
//! - [`BlockReader`], [`BlockWriter`] - Block-level file access
//! - [`RetryTimer`] - Per-transfer retransmission timer
//! - [`JobRegistry`] - Active transfers, one namespace per [`Direction`]
//! - [`ProtocolEngine`] - The per-peer state machines
//! - [`TftpServer`] - Socket and receive loop
//!
//! # Basic Server Usage
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//!
//! use tftp::{TftpServer, TftpServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut server = TftpServer::new(TftpServerConfig {
//!         bind_address: "127.0.0.1:6969".to_string(),
//!         root_directory: PathBuf::from("./files"),
//!         ..Default::default()
//!     });
//!
//!     server.run_until(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     }).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Working with Packets
//!
//! ```rust
//! use tftp::{Message, TftpData, TftpErrorCode, TftpOpcode};
//!
//! let packet = Message::Data(TftpData::new(1, b"hello".to_vec())).encode();
//! assert_eq!(&packet[..4], &[0, 3, 0, 1]);
//!
//! match Message::decode(&packet).unwrap() {
//!     Message::Data(data) => assert!(data.is_last_block()),
//!     other => panic!("unexpected {}", other.opcode()),
//! }
//!
//! assert_eq!(TftpOpcode::Acknowledgment.name(), "ACK");
//! assert_eq!(TftpErrorCode::UnknownTransferId.as_u16(), 5);
//! ```

mod block;
mod engine;
mod error;
mod protocol;
mod registry;
mod server;
mod timer;
mod transfer;

pub use block::*;
pub use engine::*;
pub use error::*;
pub use protocol::*;
pub use registry::*;
pub use server::*;
pub use timer::*;
pub use transfer::*;
