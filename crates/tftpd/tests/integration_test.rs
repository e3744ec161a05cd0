//! Integration tests for the TFTP server
//!
//! These tests start the actual server and talk to it over loopback UDP.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use tempfile::tempdir;
use tftp::{
    BLOCK_SIZE, Message, TftpAck, TftpData, TftpErrorCode, TftpRequest, TftpServer, TftpServerConfig, TransferConfig,
};
use tokio::fs;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

struct RunningServer {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<anyhow::Result<TftpServer>>,
}

impl RunningServer {
    async fn start(root: &Path, transfer_config: TransferConfig) -> Self {
        let mut server = TftpServer::new(TftpServerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            root_directory: root.to_path_buf(),
            transfer_config,
        });
        let addr = server.bind().await.unwrap();

        let (stop, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let result = server
                .run_until(async {
                    let _ = stop_rx.await;
                })
                .await;
            result.map(|_| server)
        });

        Self { addr, stop, task }
    }

    async fn stop(self) -> TftpServer {
        self.stop.send(()).unwrap();
        self.task.await.unwrap().unwrap()
    }
}

async fn client() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").await.unwrap()
}

async fn send(socket: &UdpSocket, to: SocketAddr, message: Message) {
    socket.send_to(&message.encode(), to).await.unwrap();
}

async fn recv(socket: &UdpSocket) -> Message {
    let mut buf = vec![0u8; 1024];
    let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .expect("server did not reply")
        .unwrap();
    Message::decode(&buf[..len]).unwrap()
}

/// Download `name` the way a client would, acknowledging every block
async fn download(socket: &UdpSocket, server: SocketAddr, name: &str) -> (Vec<u8>, u16) {
    send(socket, server, Message::ReadRequest(TftpRequest::new(name, "octet"))).await;

    let mut content = Vec::new();
    let mut expected = 1u16;
    loop {
        match recv(socket).await {
            Message::Data(data) => {
                assert_eq!(data.block, expected);
                content.extend_from_slice(&data.data);
                send(socket, server, Message::Ack(TftpAck::new(data.block))).await;
                if data.is_last_block() {
                    return (content, expected);
                }
                expected = expected.wrapping_add(1);
            }
            other => panic!("expected DATA {expected}, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_get_small_file() {
    let temp_dir = tempdir().unwrap();
    fs::write(temp_dir.path().join("test.txt"), b"12345678").await.unwrap();
    let server = RunningServer::start(temp_dir.path(), TransferConfig::default()).await;

    let socket = client().await;
    let (content, blocks) = download(&socket, server.addr, "test.txt").await;
    assert_eq!(content, b"12345678");
    assert_eq!(blocks, 1);

    let server = server.stop().await;
    assert!(server.local_addr().is_none());
}

#[tokio::test]
async fn test_get_multiple_of_block_size_ends_with_empty_block() {
    let temp_dir = tempdir().unwrap();
    let content: Vec<u8> = (0..2 * BLOCK_SIZE).map(|i| (i % 251) as u8).collect();
    fs::write(temp_dir.path().join("boot.img"), &content).await.unwrap();
    let server = RunningServer::start(temp_dir.path(), TransferConfig::default()).await;

    let socket = client().await;
    let (received, blocks) = download(&socket, server.addr, "boot.img").await;
    assert_eq!(received, content);
    assert_eq!(blocks, 3);

    server.stop().await;
}

#[tokio::test]
async fn test_put_then_get() {
    let temp_dir = tempdir().unwrap();
    let server = RunningServer::start(temp_dir.path(), TransferConfig::default()).await;
    let socket = client().await;

    let content: Vec<u8> = (0..1300).map(|i| (i % 199) as u8).collect();
    send(&socket, server.addr, Message::WriteRequest(TftpRequest::new("upload.bin", "octet"))).await;
    assert_eq!(recv(&socket).await, Message::Ack(TftpAck::new(0)));

    for (index, chunk) in content.chunks(BLOCK_SIZE).enumerate() {
        let block = index as u16 + 1;
        send(&socket, server.addr, Message::Data(TftpData::new(block, chunk))).await;
        assert_eq!(recv(&socket).await, Message::Ack(TftpAck::new(block)));
    }

    let stored = fs::read(temp_dir.path().join("upload.bin")).await.unwrap();
    assert_eq!(stored, content);

    let (downloaded, blocks) = download(&socket, server.addr, "upload.bin").await;
    assert_eq!(downloaded, content);
    assert_eq!(blocks, 3);

    server.stop().await;
}

#[tokio::test]
async fn test_concurrent_clients() {
    let temp_dir = tempdir().unwrap();
    for i in 0..8 {
        let content = vec![i as u8; 700 + i * 100];
        fs::write(temp_dir.path().join(format!("file-{i}.bin")), content).await.unwrap();
    }
    let server = RunningServer::start(temp_dir.path(), TransferConfig::default()).await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let addr = server.addr;
        handles.push(tokio::spawn(async move {
            let socket = client().await;
            let (content, _) = download(&socket, addr, &format!("file-{i}.bin")).await;
            (i, content)
        }));
    }

    for handle in handles {
        let (i, content) = handle.await.unwrap();
        assert_eq!(content, vec![i as u8; 700 + i * 100]);
    }

    server.stop().await;
}

#[tokio::test]
async fn test_error_replies() {
    let temp_dir = tempdir().unwrap();
    fs::write(temp_dir.path().join("exists.txt"), b"keep").await.unwrap();
    let server = RunningServer::start(temp_dir.path(), TransferConfig::default()).await;
    let socket = client().await;

    let cases = [
        (
            Message::ReadRequest(TftpRequest::new("missing.txt", "octet")),
            TftpErrorCode::FileNotFound,
        ),
        (
            Message::ReadRequest(TftpRequest::new("../../../etc/passwd", "octet")),
            TftpErrorCode::AccessViolation,
        ),
        (
            Message::WriteRequest(TftpRequest::new("exists.txt", "octet")),
            TftpErrorCode::FileAlreadyExists,
        ),
        (Message::Ack(TftpAck::new(1)), TftpErrorCode::UnknownTransferId),
    ];

    for (request, code) in cases {
        send(&socket, server.addr, request).await;
        match recv(&socket).await {
            Message::Error(error) => assert_eq!(error.kind(), Some(code)),
            other => panic!("expected ERROR {code}, got {other:?}"),
        }
    }

    assert_eq!(fs::read(temp_dir.path().join("exists.txt")).await.unwrap(), b"keep");
    server.stop().await;
}

#[tokio::test]
async fn test_malformed_datagram_gets_no_reply() {
    let temp_dir = tempdir().unwrap();
    let server = RunningServer::start(temp_dir.path(), TransferConfig::default()).await;
    let socket = client().await;

    socket.send_to(&[0, 42, 1, 2, 3], server.addr).await.unwrap();

    let mut buf = [0u8; 64];
    let reply = timeout(Duration::from_millis(200), socket.recv_from(&mut buf)).await;
    assert!(reply.is_err());

    server.stop().await;
}

#[tokio::test]
async fn test_unresponsive_client_is_given_up() {
    let temp_dir = tempdir().unwrap();
    fs::write(temp_dir.path().join("test.txt"), b"never acknowledged").await.unwrap();
    let transfer_config = TransferConfig {
        timeout: Duration::from_millis(30),
        max_retries: 2,
        ..Default::default()
    };
    let server = RunningServer::start(temp_dir.path(), transfer_config).await;
    let socket = client().await;

    send(&socket, server.addr, Message::ReadRequest(TftpRequest::new("test.txt", "octet"))).await;
    for _ in 0..3 {
        assert!(matches!(recv(&socket).await, Message::Data(data) if data.block == 1));
    }
    match recv(&socket).await {
        Message::Error(error) => assert_eq!(error.kind(), Some(TftpErrorCode::NotDefined)),
        other => panic!("expected ERROR 0, got {other:?}"),
    }

    server.stop().await;
}

#[tokio::test]
async fn test_stop_releases_active_transfers() {
    let temp_dir = tempdir().unwrap();
    let server = RunningServer::start(temp_dir.path(), TransferConfig::default()).await;
    let socket = client().await;

    send(&socket, server.addr, Message::WriteRequest(TftpRequest::new("partial.bin", "octet"))).await;
    assert_eq!(recv(&socket).await, Message::Ack(TftpAck::new(0)));
    send(&socket, server.addr, Message::Data(TftpData::new(1, vec![1u8; BLOCK_SIZE]))).await;
    assert_eq!(recv(&socket).await, Message::Ack(TftpAck::new(1)));

    let server = server.stop().await;
    assert!(server.engine().is_none());
    assert!(!temp_dir.path().join("partial.bin").exists());
}
