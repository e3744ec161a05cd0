//! TFTP Transfer State
//!
//! This module holds the per-transfer configuration, the path policy that
//! maps requested filenames onto the filesystem, and the state of a single
//! transfer job.

use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::block::{BlockReader, BlockWriter};
use crate::error::TransferError;
use crate::protocol::TftpRequest;
use crate::registry::Direction;
use crate::timer::RetryTimer;

const TIMEOUT_MILLIS: u64 = 1000;
const MAX_RETRIES: u32 = 5;

/// Transfer session configuration
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Retransmission interval
    pub timeout: Duration,
    /// Retransmissions before the peer is declared unresponsive
    pub max_retries: u32,
    /// Allow write requests to replace existing files
    pub allow_overwrite: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(TIMEOUT_MILLIS),
            max_retries: MAX_RETRIES,
            allow_overwrite: false,
        }
    }
}

/// Maps a requested filename to a filesystem path, or rejects it
///
/// The engine never opens a path that did not come through this trait.
pub trait PathPolicy: Send + Sync {
    fn resolve(&self, filename: &str, direction: Direction) -> Result<PathBuf, TransferError>;
}

/// Confines every transfer to one directory tree
#[derive(Debug, Clone)]
pub struct RootDirectory {
    root: PathBuf,
}

impl RootDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl PathPolicy for RootDirectory {
    fn resolve(&self, filename: &str, _direction: Direction) -> Result<PathBuf, TransferError> {
        let relative = Path::new(filename);

        // Absolute paths, `..` and drive prefixes are rejected outright
        let confined = !filename.is_empty()
            && !filename.contains('\0')
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !confined {
            return Err(TransferError::AccessViolation(filename.to_string()));
        }

        let requested = self.root.join(relative);

        // A symlink inside the root may still point outside it. Check the
        // deepest existing ancestor, which for a new upload is its directory.
        let root_canon = self.root.canonicalize()?;
        if let Some(existing) = requested.ancestors().find(|p| p.exists()) {
            let existing_canon = existing.canonicalize()?;
            if !existing_canon.starts_with(&root_canon) {
                return Err(TransferError::AccessViolation(filename.to_string()));
            }
        }

        Ok(requested)
    }
}

/// Open file of a job
#[derive(Debug)]
pub(crate) enum JobFile {
    Read(BlockReader),
    Write(BlockWriter),
}

/// State of one transfer
///
/// A job is created when an RRQ or WRQ is accepted and lives in the registry
/// slot for its peer and direction until it completes, fails, or its peer
/// stops responding. `closed` is set once teardown has run; a datagram or
/// timer that still holds a reference afterwards must leave it alone.
#[derive(Debug)]
pub struct TransferJob {
    pub(crate) peer: SocketAddr,
    pub(crate) direction: Direction,
    pub(crate) filename: String,
    pub(crate) mode: String,
    pub(crate) file: Option<JobFile>,
    /// Get: logical index of the block awaiting acknowledgment (starts at 1).
    /// Put: last block written (starts at 0).
    pub(crate) block: u64,
    pub(crate) final_block_sent: bool,
    /// Exact bytes of the last DATA (Get) or ACK (Put) sent, for retransmission
    pub(crate) last_packet: Vec<u8>,
    pub(crate) timer: RetryTimer,
    pub(crate) closed: bool,
}

impl TransferJob {
    pub(crate) fn new(peer: SocketAddr, direction: Direction, request: TftpRequest, config: &TransferConfig) -> Self {
        Self {
            peer,
            direction,
            filename: request.filename,
            mode: request.mode,
            file: None,
            block: match direction {
                Direction::Get => 1,
                Direction::Put => 0,
            },
            final_block_sent: false,
            last_packet: Vec::new(),
            timer: RetryTimer::new(config.timeout, config.max_retries),
            closed: false,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn mode(&self) -> &str {
        &self.mode
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Block number as it appears on the wire; rolls over after 65535
    pub fn wire_block(&self) -> u16 {
        self.block as u16
    }

    /// Open the job's file through `paths`
    pub(crate) async fn open(&mut self, paths: &dyn PathPolicy, config: &TransferConfig) -> Result<(), TransferError> {
        let path = paths.resolve(&self.filename, self.direction)?;

        let file = match self.direction {
            Direction::Get => BlockReader::open(&path).await.map(JobFile::Read).map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    TransferError::FileNotFound(self.filename.clone())
                } else {
                    e.into()
                }
            })?,
            Direction::Put => BlockWriter::create(&path, config.allow_overwrite)
                .await
                .map(JobFile::Write)
                .map_err(|e| {
                    if e.kind() == std::io::ErrorKind::AlreadyExists {
                        TransferError::FileExists(self.filename.clone())
                    } else {
                        e.into()
                    }
                })?,
        };

        self.file = Some(file);
        Ok(())
    }

    /// Read the block awaiting acknowledgment
    pub(crate) async fn read_current_block(&mut self) -> Result<Vec<u8>, TransferError> {
        match self.file.as_mut() {
            Some(JobFile::Read(reader)) => Ok(reader.read_block(self.block).await?),
            _ => Err(std::io::Error::other("transfer has no file open for reading").into()),
        }
    }

    pub(crate) fn writer_mut(&mut self) -> Result<&mut BlockWriter, TransferError> {
        match self.file.as_mut() {
            Some(JobFile::Write(writer)) => Ok(writer),
            _ => Err(std::io::Error::other("transfer has no file open for writing").into()),
        }
    }

    /// Take the writer out for finalization
    pub(crate) fn take_writer(&mut self) -> Option<BlockWriter> {
        match self.file.take() {
            Some(JobFile::Write(writer)) => Some(writer),
            other => {
                self.file = other;
                None
            }
        }
    }

    /// Cancel the timer and close the file
    ///
    /// An upload still open at this point did not complete, so its partial
    /// file is removed.
    pub(crate) async fn release(&mut self) {
        self.closed = true;
        self.timer.cancel();
        match self.file.take() {
            Some(JobFile::Write(writer)) => writer.discard().await,
            Some(JobFile::Read(reader)) => drop(reader),
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_transfer_config_default() {
        let config = TransferConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(1));
        assert_eq!(config.max_retries, 5);
        assert!(!config.allow_overwrite);
    }

    #[test]
    fn test_root_directory_resolves_inside_root() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path().to_path_buf();
        std::fs::write(root.join("test.txt"), b"test content").unwrap();
        std::fs::create_dir(root.join("sub")).unwrap();

        let policy = RootDirectory::new(&root);
        assert_eq!(policy.resolve("test.txt", Direction::Get).unwrap(), root.join("test.txt"));
        assert_eq!(
            policy.resolve("sub/new.bin", Direction::Put).unwrap(),
            root.join("sub/new.bin")
        );
        // Missing files resolve; opening them reports not found
        assert!(policy.resolve("missing.txt", Direction::Get).is_ok());
    }

    #[test]
    fn test_root_directory_rejects_traversal() {
        let temp_dir = tempdir().unwrap();
        let policy = RootDirectory::new(temp_dir.path());

        for name in ["../../../etc/passwd", "/etc/passwd", "sub/../../x", "", "a\0b"] {
            let err = policy.resolve(name, Direction::Get).unwrap_err();
            assert!(matches!(err, TransferError::AccessViolation(_)), "{name:?} accepted");
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_root_directory_rejects_symlink_escape() {
        let outside = tempdir().unwrap();
        let temp_dir = tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), temp_dir.path().join("escape")).unwrap();

        let policy = RootDirectory::new(temp_dir.path());
        let err = policy.resolve("escape/file.txt", Direction::Put).unwrap_err();
        assert!(matches!(err, TransferError::AccessViolation(_)));
    }

    #[tokio::test]
    async fn test_open_missing_file_is_file_not_found() {
        let temp_dir = tempdir().unwrap();
        let policy = RootDirectory::new(temp_dir.path());
        let config = TransferConfig::default();
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();

        let mut job = TransferJob::new(peer, Direction::Get, TftpRequest::new("nope.txt", "octet"), &config);
        let err = job.open(&policy, &config).await.unwrap_err();
        assert!(matches!(err, TransferError::FileNotFound(ref name) if name == "nope.txt"));
        assert!(job.file.is_none());
    }

    #[tokio::test]
    async fn test_release_discards_partial_upload() {
        let temp_dir = tempdir().unwrap();
        let policy = RootDirectory::new(temp_dir.path());
        let config = TransferConfig::default();
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();

        let mut job = TransferJob::new(peer, Direction::Put, TftpRequest::new("up.bin", "octet"), &config);
        job.open(&policy, &config).await.unwrap();
        job.writer_mut().unwrap().append(1, &[7u8; 512]).await.unwrap();
        assert!(temp_dir.path().join("up.bin").exists());

        job.release().await;
        assert!(job.is_closed());
        assert!(!temp_dir.path().join("up.bin").exists());
    }

    #[test]
    fn test_wire_block_rolls_over() {
        let config = TransferConfig::default();
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let mut job = TransferJob::new(peer, Direction::Get, TftpRequest::new("big.img", "octet"), &config);

        job.block = 65535;
        assert_eq!(job.wire_block(), 65535);
        job.block += 1;
        assert_eq!(job.wire_block(), 0);
        job.block += 1;
        assert_eq!(job.wire_block(), 1);
        assert_eq!(job.block, 65537);
    }
}
