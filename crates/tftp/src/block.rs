//! Block-oriented file access
//!
//! [`BlockReader`] serves fixed 512-byte blocks of an existing file for read
//! requests; [`BlockWriter`] appends the blocks of a write request to a new
//! file strictly in order.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter};

use crate::protocol::BLOCK_SIZE;

/// Random-access block reads over an existing file
#[derive(Debug)]
pub struct BlockReader {
    file: File,
    len: u64,
}

impl BlockReader {
    /// Open a regular file for block reads
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path.as_ref()).await?;
        let metadata = file.metadata().await?;

        // Directories open fine on Unix but cannot be served
        if !metadata.is_file() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "not a regular file"));
        }

        Ok(Self {
            file,
            len: metadata.len(),
        })
    }

    /// File length at open time
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of DATA blocks needed to send this file, trailing empty block included
    pub fn block_count(&self) -> u64 {
        self.len / BLOCK_SIZE as u64 + 1
    }

    /// Read the 1-based block `block`
    ///
    /// Returns a freshly allocated buffer of up to [`BLOCK_SIZE`] bytes. The
    /// result is shorter than a full block only at end of file, and is empty
    /// when the previous block consumed the file exactly, which yields the
    /// trailing zero-length DATA block for files sized in whole blocks.
    pub async fn read_block(&mut self, block: u64) -> io::Result<Vec<u8>> {
        if block == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "block numbers start at 1"));
        }

        let offset = (block - 1) * BLOCK_SIZE as u64;
        let mut buf = Vec::with_capacity(BLOCK_SIZE);
        if offset >= self.len {
            return Ok(buf);
        }

        self.file.seek(SeekFrom::Start(offset)).await?;
        (&mut self.file).take(BLOCK_SIZE as u64).read_to_end(&mut buf).await?;
        Ok(buf)
    }
}

/// Result of offering a DATA block to a [`BlockWriter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Block was the expected one and has been written
    Appended,
    /// Block was already written; acknowledge it again
    Duplicate,
    /// Block skipped ahead; nothing written, `last_written` is the newest block on disk
    OutOfOrder { last_written: u16 },
}

/// Sequential block writes into a new file
#[derive(Debug)]
pub struct BlockWriter {
    file: BufWriter<File>,
    path: PathBuf,
    next_block: u16,
    written: u64,
}

impl BlockWriter {
    /// Create the target file
    ///
    /// Fails with [`io::ErrorKind::AlreadyExists`] when the file exists and
    /// `overwrite` is false.
    pub async fn create(path: impl AsRef<Path>, overwrite: bool) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut options = OpenOptions::new();
        options.write(true);
        if overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }

        let file = options.open(&path).await?;
        Ok(Self {
            file: BufWriter::new(file),
            path,
            next_block: 1,
            written: 0,
        })
    }

    /// Block number the writer expects next
    pub fn next_block(&self) -> u16 {
        self.next_block
    }

    /// Bytes appended so far
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Append `payload` if `block` is the next expected block
    ///
    /// Anything else is reported without touching the file, so a retransmitted
    /// block is never stored twice.
    pub async fn append(&mut self, block: u16, payload: &[u8]) -> io::Result<WriteOutcome> {
        let last_written = self.next_block.wrapping_sub(1);

        if block == self.next_block {
            self.file.write_all(payload).await?;
            self.written += payload.len() as u64;
            self.next_block = self.next_block.wrapping_add(1);
            Ok(WriteOutcome::Appended)
        } else if block == last_written {
            Ok(WriteOutcome::Duplicate)
        } else {
            Ok(WriteOutcome::OutOfOrder { last_written })
        }
    }

    /// Flush and close, returning the total bytes written
    ///
    /// A file that cannot be flushed is incomplete and is removed.
    pub async fn finalize(mut self) -> io::Result<u64> {
        match self.sync().await {
            Ok(()) => Ok(self.written),
            Err(e) => {
                self.discard().await;
                Err(e)
            }
        }
    }

    async fn sync(&mut self) -> io::Result<()> {
        self.file.flush().await?;
        self.file.get_mut().sync_all().await
    }

    /// Close and delete the partial file of an aborted transfer
    pub async fn discard(self) {
        let Self { file, path, .. } = self;
        drop(file);
        if let Err(e) = fs::remove_file(&path).await {
            tracing::warn!("Failed to remove partial upload {}: {}", path.display(), e);
        }
    }
}
