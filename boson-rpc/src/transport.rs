//! Datagram transport abstraction (spec.md §4.6: "single UDP-style datagram
//! socket abstraction"). Grounded in the teacher's `DhtTransport` trait
//! (`lib-storage::dht::transport`) and its `UdpDhtTransport` implementation,
//! narrowed to the one concrete protocol this DHT speaks.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_to(&self, data: &[u8], addr: SocketAddr) -> std::io::Result<()>;
    async fn recv_from(&self) -> std::io::Result<(Vec<u8>, SocketAddr)>;
    fn local_addr(&self) -> SocketAddr;
}

pub struct UdpTransport {
    socket: tokio::net::UdpSocket,
    local_addr: SocketAddr,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> std::io::Result<Self> {
        let socket = tokio::net::UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        Ok(UdpTransport { socket, local_addr })
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send_to(&self, data: &[u8], addr: SocketAddr) -> std::io::Result<()> {
        self.socket.send_to(data, addr).await?;
        Ok(())
    }

    async fn recv_from(&self) -> std::io::Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; boson_proto::codec::MAX_MESSAGE_SIZE.min(65536)];
        let (len, addr) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(len);
        Ok((buf, addr))
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// An in-process transport wired to a peer's queue, used to test the RPC
/// engine without real sockets.
pub struct ChannelTransport {
    local_addr: SocketAddr,
    outbox: tokio::sync::mpsc::UnboundedSender<(Vec<u8>, SocketAddr, SocketAddr)>,
    inbox: tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>>,
}

impl ChannelTransport {
    pub fn new(
        local_addr: SocketAddr,
        outbox: tokio::sync::mpsc::UnboundedSender<(Vec<u8>, SocketAddr, SocketAddr)>,
        inbox: tokio::sync::mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>,
    ) -> Arc<Self> {
        Arc::new(ChannelTransport {
            local_addr,
            outbox,
            inbox: tokio::sync::Mutex::new(inbox),
        })
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send_to(&self, data: &[u8], addr: SocketAddr) -> std::io::Result<()> {
        self.outbox
            .send((data.to_vec(), self.local_addr, addr))
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::BrokenPipe, e))
    }

    async fn recv_from(&self) -> std::io::Result<(Vec<u8>, SocketAddr)> {
        let mut inbox = self.inbox.lock().await;
        inbox
            .recv()
            .await
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "channel closed"))
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
