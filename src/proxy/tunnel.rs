//! CONNECT tunnel implementation for HTTPS proxying
//!
//! Handles bidirectional data transfer between client and upstream.

use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, instrument};

use crate::error::Result;

/// Handles CONNECT tunnel requests
pub struct TunnelHandler;

impl TunnelHandler {
    /// Copy data bidirectionally between two streams
    #[instrument(skip(client, server))]
    pub async fn copy_bidirectional<C, S>(client: C, server: S) -> Result<(u64, u64)>
    where
        C: AsyncRead + AsyncWrite + Unpin + Send,
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let (mut client_read, mut client_write) = tokio::io::split(client);
        let (mut server_read, mut server_write) = tokio::io::split(server);

        let client_to_server = async {
            let result = tokio::io::copy(&mut client_read, &mut server_write).await;
            let _ = server_write.shutdown().await;
            result
        };

        let server_to_client = async {
            let result = tokio::io::copy(&mut server_read, &mut client_write).await;
            let _ = client_write.shutdown().await;
            result
        };

        let (client_to_server_result, server_to_client_result) =
            tokio::join!(client_to_server, server_to_client);

        let bytes_sent = client_to_server_result.unwrap_or_else(|e| {
            debug!("Client to upstream copy ended: {}", e);
            0
        });

        let bytes_received = server_to_client_result.unwrap_or_else(|e| {
            debug!("Upstream to client copy ended: {}", e);
            0
        });

        debug!(
            bytes_sent = bytes_sent,
            bytes_received = bytes_received,
            "Tunnel closed"
        );

        Ok((bytes_sent, bytes_received))
    }
}

/// Tunnel accepted by the handler, waiting for the client connection upgrade
pub struct PendingTunnel {
    on_upgrade: OnUpgrade,
    upstream: TcpStream,
    target: String,
}

impl PendingTunnel {
    pub fn new(on_upgrade: OnUpgrade, upstream: TcpStream, target: String) -> Self {
        Self {
            on_upgrade,
            upstream,
            target,
        }
    }

    /// Wait for the upgrade and pair the client with the upstream until either side closes
    #[instrument(skip(self), fields(target = %self.target))]
    pub async fn run(self) {
        match self.on_upgrade.await {
            Ok(upgraded) => {
                let client = TokioIo::new(upgraded);
                let _ = TunnelHandler::copy_bidirectional(client, self.upstream).await;
            }
            Err(e) => {
                debug!("CONNECT upgrade failed: {}", e);
            }
        }
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

        client_peer.write_all(b"ping").await.unwrap();
        client_peer.shutdown().await.unwrap();

        upstream_peer.write_all(b"pong").await.unwrap();
        upstream_peer.shutdown().await.unwrap();

        let mut buf = Vec::new();
        upstream_peer.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"ping");

        let mut buf = Vec::new();
        client_peer.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"pong");

        let (sent, received) = tokio::time::timeout(Duration::from_secs(1), copy_handle)
            .await
            .expect("copy_bidirectional timed out")
            .unwrap()
            .unwrap();
        assert_eq!((sent, received), (4, 4));
    }
}
