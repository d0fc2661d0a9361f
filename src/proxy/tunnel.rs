//! Byte splicing for CONNECT tunnels

use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, instrument};

use crate::error::Result;

/// Relays bytes between a client and an established upstream tunnel
pub struct TunnelHandler;

impl TunnelHandler {
    /// Copy data both ways until each side has closed.
    ///
    /// Returns `(client_to_upstream, upstream_to_client)` byte counts. A
    /// broken half is logged and counted as zero rather than failing the
    /// other direction.
    #[instrument(skip(client, upstream))]
    pub async fn copy_bidirectional<C, U>(client: C, upstream: U) -> Result<(u64, u64)>
    where
        C: AsyncRead + AsyncWrite + Unpin + Send,
        U: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let (mut client_read, mut client_write) = tokio::io::split(client);
        let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);

        let client_to_upstream = async {
            let result = tokio::io::copy(&mut client_read, &mut upstream_write).await;
            let _ = upstream_write.shutdown().await;
            result
        };

        let upstream_to_client = async {
            let result = tokio::io::copy(&mut upstream_read, &mut client_write).await;
            let _ = client_write.shutdown().await;
            result
        };

        let (sent, received) = tokio::join!(client_to_upstream, upstream_to_client);

        let bytes_sent = sent.unwrap_or_else(|e| {
            debug!("Client to upstream copy ended: {}", e);
            0
        });
        let bytes_received = received.unwrap_or_else(|e| {
            debug!("Upstream to client copy ended: {}", e);
            0
        });

        debug!(bytes_sent, bytes_received, "Tunnel closed");

        Ok((bytes_sent, bytes_received))
    }

    /// Splice an upgraded client connection onto an open upstream tunnel
    pub async fn handle_upgraded(upgraded: Upgraded, upstream: TcpStream) -> Result<(u64, u64)> {
        Self::copy_bidirectional(TokioIo::new(upgraded), upstream).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::time::Duration;

    #[tokio::test]
    async fn test_copy_bidirectional() {
        let (client, mut client_peer) = tokio::io::duplex(1024);
        let (mut upstream_peer, upstream) = tokio::io::duplex(1024);

        let copy_handle =
            tokio::spawn(async move { TunnelHandler::copy_bidirectional(client, upstream).await });

        client_peer.write_all(b"hello from client").await.unwrap();
        client_peer.shutdown().await.unwrap();

        upstream_peer.write_all(b"hello from upstream").await.unwrap();
        upstream_peer.shutdown().await.unwrap();

        let mut buf = Vec::new();
        upstream_peer.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello from client");

        let mut buf = Vec::new();
        client_peer.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello from upstream");

        let (sent, received) = tokio::time::timeout(Duration::from_secs(1), copy_handle)
            .await
            .expect("copy_bidirectional timed out")
            .unwrap()
            .unwrap();
        assert_eq!(sent, 17);
        assert_eq!(received, 19);
    }

    #[tokio::test]
    async fn test_copy_larger_than_buffer() {
        let (client, mut client_peer) = tokio::io::duplex(64);
        let (mut upstream_peer, upstream) = tokio::io::duplex(64);

        let copy_handle =
            tokio::spawn(async move { TunnelHandler::copy_bidirectional(client, upstream).await });

        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();

        let writer = tokio::spawn(async move {
            client_peer.write_all(&payload).await.unwrap();
            client_peer.shutdown().await.unwrap();
            client_peer
        });

        let mut received = Vec::new();
        upstream_peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, expected);

        upstream_peer.shutdown().await.unwrap();
        drop(writer.await.unwrap());

        let (sent, _) = tokio::time::timeout(Duration::from_secs(1), copy_handle)
            .await
            .expect("copy_bidirectional timed out")
            .unwrap()
            .unwrap();
        assert_eq!(sent, 10_000);
    }
}
