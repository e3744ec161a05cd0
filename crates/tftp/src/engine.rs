//! TFTP Protocol Engine
//!
//! The engine turns decoded datagrams into job creation, progress and
//! teardown. Each job sits behind its own async mutex; both the datagram path
//! and the retransmission timer lock it and run one event to completion,
//! including the file access and the send it triggers. The registry lock is
//! only ever held for a map operation.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use crate::block::WriteOutcome;
use crate::error::TransferError;
use crate::protocol::{BLOCK_SIZE, Message, TftpData, TftpError, TftpRequest, build_ack, build_data};
use crate::registry::{Direction, JobRegistry};
use crate::timer::FireAction;
use crate::transfer::{PathPolicy, TransferConfig, TransferJob};

/// A job and its lock
pub type JobCell = Mutex<TransferJob>;

/// Drives every transfer served from one socket
pub struct ProtocolEngine {
    socket: Arc<UdpSocket>,
    registry: JobRegistry<JobCell>,
    config: TransferConfig,
    paths: Arc<dyn PathPolicy>,
}

impl ProtocolEngine {
    pub fn new(socket: Arc<UdpSocket>, config: TransferConfig, paths: Arc<dyn PathPolicy>) -> Arc<Self> {
        Arc::new(Self {
            socket,
            registry: JobRegistry::new(),
            config,
            paths,
        })
    }

    pub fn registry(&self) -> &JobRegistry<JobCell> {
        &self.registry
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Number of transfers currently running in `direction`
    pub fn active_transfers(&self, direction: Direction) -> usize {
        self.registry.len(direction)
    }

    /// Process one received datagram
    pub async fn handle_datagram(self: &Arc<Self>, packet: &[u8], peer: SocketAddr) {
        let message = match Message::decode(packet) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Dropping malformed packet from {}: {}", peer, e);
                return;
            }
        };

        match message {
            Message::ReadRequest(request) => self.start_transfer(Direction::Get, request, peer).await,
            Message::WriteRequest(request) => self.start_transfer(Direction::Put, request, peer).await,
            Message::Data(data) => self.handle_data(data, peer).await,
            Message::Ack(ack) => self.handle_ack(ack.block, peer).await,
            Message::Error(error) => self.handle_peer_error(error, peer).await,
        }
    }

    /// Accept an RRQ or WRQ
    ///
    /// The registry slot is claimed before the file is touched, so a second
    /// request from the same peer can never truncate or reopen the file of
    /// the transfer already running.
    async fn start_transfer(self: &Arc<Self>, direction: Direction, request: TftpRequest, peer: SocketAddr) {
        tracing::info!(
            "{} for '{}' in {} mode from {}",
            match direction {
                Direction::Get => "RRQ",
                Direction::Put => "WRQ",
            },
            request.filename,
            request.mode,
            peer
        );

        let cell = Arc::new(Mutex::new(TransferJob::new(peer, direction, request, &self.config)));
        let mut job = cell.lock().await;

        if let Err(e) = self.registry.create(direction, peer, Arc::clone(&cell)) {
            tracing::warn!("Rejecting {} request from {}: {}", direction, peer, e);
            job.closed = true;
            drop(job);
            self.send_error(&e.to_packet(), peer).await;
            return;
        }

        if let Err(e) = job.open(self.paths.as_ref(), &self.config).await {
            self.abort(&mut job, e).await;
            return;
        }

        match direction {
            Direction::Get => self.transmit_block(&cell, &mut job).await,
            Direction::Put => self.acknowledge(&cell, &mut job, 0).await,
        }
    }

    /// Read the job's current block, send it, and arm the timer for it
    async fn transmit_block(self: &Arc<Self>, cell: &Arc<JobCell>, job: &mut TransferJob) {
        let payload = match job.read_current_block().await {
            Ok(payload) => payload,
            Err(e) => {
                self.abort(job, e).await;
                return;
            }
        };

        job.final_block_sent = payload.len() < BLOCK_SIZE;
        job.last_packet = build_data(job.wire_block(), &payload);
        job.timer.reset(job.wire_block());

        self.send(&job.last_packet, job.peer).await;
        self.arm_timer(cell, job);
    }

    /// Send ACK(`block`) for a write in progress and arm the timer for it
    async fn acknowledge(self: &Arc<Self>, cell: &Arc<JobCell>, job: &mut TransferJob, block: u16) {
        job.last_packet = build_ack(block);
        job.timer.reset(block);

        self.send(&job.last_packet, job.peer).await;
        self.arm_timer(cell, job);
    }

    fn arm_timer(self: &Arc<Self>, cell: &Arc<JobCell>, job: &mut TransferJob) {
        let engine = Arc::downgrade(self);
        let cell = Arc::downgrade(cell);
        job.timer
            .start(move |generation| async move { Self::on_timer(engine, cell, generation).await });
    }

    /// Timer path: retransmit the last packet or give up on the peer
    async fn on_timer(engine: Weak<Self>, cell: Weak<JobCell>, generation: u64) {
        let (Some(engine), Some(cell)) = (engine.upgrade(), cell.upgrade()) else {
            return;
        };
        let mut job = cell.lock().await;
        if job.closed {
            tracing::trace!("Timer fired for finished transfer with {}", job.peer);
            return;
        }

        match job.timer.on_fire(generation) {
            Some(FireAction::Retry) => {
                tracing::debug!(
                    "Retransmitting block {} of '{}' to {} ({} retries left)",
                    job.timer.tracked_block(),
                    job.filename,
                    job.peer,
                    job.timer.retries_remaining()
                );
                engine.send(&job.last_packet, job.peer).await;
                engine.arm_timer(&cell, &mut job);
            }
            Some(FireAction::GiveUp) => {
                let peer = job.peer;
                engine.abort(&mut job, TransferError::RetriesExhausted(peer)).await;
            }
            None => tracing::trace!("Ignoring superseded timer for {}", job.peer),
        }
    }

    /// Get path: ACK from the client
    async fn handle_ack(self: &Arc<Self>, block: u16, peer: SocketAddr) {
        let Some(cell) = self.registry.lookup(Direction::Get, peer) else {
            self.reject_unknown(peer).await;
            return;
        };
        let mut job = cell.lock().await;
        if job.closed {
            tracing::debug!("Dropping ACK {} from {} for finished transfer", block, peer);
            return;
        }

        // Only the ACK for the block in flight moves the transfer forward
        if block != job.wire_block() {
            tracing::debug!(
                "Ignoring ACK {} from {} while awaiting ACK {}",
                block,
                peer,
                job.wire_block()
            );
            return;
        }

        if job.final_block_sent {
            let blocks = job.block;
            self.teardown(&mut job).await;
            tracing::info!("Sent '{}' to {} ({} blocks)", job.filename, peer, blocks);
            return;
        }

        job.block += 1;
        self.transmit_block(&cell, &mut job).await;
    }

    /// Put path: DATA from the client
    async fn handle_data(self: &Arc<Self>, data: TftpData, peer: SocketAddr) {
        let Some(cell) = self.registry.lookup(Direction::Put, peer) else {
            self.reject_unknown(peer).await;
            return;
        };
        let mut job = cell.lock().await;
        if job.closed {
            tracing::debug!("Dropping DATA {} from {} for finished transfer", data.block, peer);
            return;
        }

        let outcome = match job.writer_mut() {
            Ok(writer) => writer.append(data.block, &data.data).await.map_err(TransferError::from),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(WriteOutcome::Appended) if data.is_last_block() => {
                job.block += 1;
                let Some(writer) = job.take_writer() else {
                    return;
                };
                match writer.finalize().await {
                    Ok(bytes) => {
                        self.teardown(&mut job).await;
                        tracing::info!("Received '{}' from {} ({} bytes)", job.filename, peer, bytes);
                        self.send(&build_ack(data.block), peer).await;
                    }
                    Err(e) => self.abort(&mut job, e.into()).await,
                }
            }
            Ok(WriteOutcome::Appended) => {
                job.block += 1;
                self.acknowledge(&cell, &mut job, data.block).await;
            }
            Ok(WriteOutcome::Duplicate) => {
                tracing::debug!("Duplicate DATA {} from {}, acknowledging again", data.block, peer);
                self.send(&build_ack(data.block), peer).await;
            }
            Ok(WriteOutcome::OutOfOrder { last_written }) => {
                tracing::debug!(
                    "Out-of-order DATA {} from {}, re-acknowledging {}",
                    data.block,
                    peer,
                    last_written
                );
                self.send(&build_ack(last_written), peer).await;
            }
            Err(e) => self.abort(&mut job, e).await,
        }
    }

    /// A peer's ERROR is only logged; its jobs keep running under their own
    /// timers and end by completion or retry exhaustion
    async fn handle_peer_error(&self, error: TftpError, peer: SocketAddr) {
        tracing::warn!("Peer {} reported {}", peer, error);
    }

    async fn reject_unknown(&self, peer: SocketAddr) {
        let error = TransferError::UnknownTransfer(peer);
        tracing::debug!("{}", error);
        self.send_error(&error.to_packet(), peer).await;
    }

    /// Release the job's timer and file, then drop it from the registry
    ///
    /// Callers check `closed` first. An open job always owns its slot, so
    /// the entry removed here is this job.
    async fn teardown(&self, job: &mut TransferJob) {
        job.release().await;
        self.registry.remove(job.direction, job.peer);
    }

    /// Tear the job down and report `error` to its peer
    async fn abort(&self, job: &mut TransferJob, error: TransferError) {
        tracing::warn!(
            "Aborting {} of '{}' for {}: {}",
            job.direction,
            job.filename,
            job.peer,
            error
        );
        self.teardown(job).await;
        self.send_error(&error.to_packet(), job.peer).await;
    }

    async fn send_error(&self, error: &TftpError, peer: SocketAddr) {
        self.send(&Message::Error(error.clone()).encode(), peer).await;
    }

    async fn send(&self, packet: &[u8], peer: SocketAddr) {
        if let Err(e) = self.socket.send_to(packet, peer).await {
            tracing::warn!("Failed to send to {}: {}", peer, e);
        }
    }

    /// Stop accepting transfers and release every active one
    ///
    /// Pending timers are cancelled and files closed; partial uploads are
    /// removed. No ERROR is sent to the affected peers.
    pub async fn shutdown(&self) {
        let jobs = self.registry.drain();
        let count = jobs.len();

        for cell in jobs {
            let mut job = cell.lock().await;
            if !job.closed {
                job.release().await;
            }
        }

        if count > 0 {
            tracing::info!("Released {} active transfers", count);
        }
    }
}
