//! UDP link to WinTest.
//!
//! Spots go out as broadcasts to WinTest's network port; status and command
//! frames from the logging stations come back in on the same socket.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, trace};

/// Largest datagram accepted from WinTest.
pub const MAX_DATAGRAM: usize = 8192;

/// Errors from the UDP channel.
#[derive(Debug, Error)]
pub enum UdpError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid target address {0}")]
    Target(String),

    #[error("Failed to send to {target}: {source}")]
    Send {
        target: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Broadcast socket shared by spot output and command input.
#[derive(Debug)]
pub struct UdpChannel {
    socket: UdpSocket,
    target: SocketAddr,
    receive_timeout: Duration,
}

impl UdpChannel {
    /// Bind `bind_addr` and direct all output to `target`.
    pub async fn bind(
        bind_addr: &str,
        target: &str,
        receive_timeout: Duration,
    ) -> Result<Self, UdpError> {
        let target: SocketAddr = target
            .parse()
            .map_err(|_| UdpError::Target(target.to_string()))?;

        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|source| UdpError::Bind {
                addr: bind_addr.to_string(),
                source,
            })?;
        socket.set_broadcast(true).map_err(|source| UdpError::Bind {
            addr: bind_addr.to_string(),
            source,
        })?;

        debug!("UDP socket bound on {}, sending to {}", bind_addr, target);
        Ok(Self {
            socket,
            target,
            receive_timeout,
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr().ok()
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Send one frame to the broadcast target.
    pub async fn send(&self, frame: &[u8]) -> Result<(), UdpError> {
        trace!("UDP > {} bytes", frame.len());
        self.socket
            .send_to(frame, self.target)
            .await
            .map(|_| ())
            .map_err(|source| UdpError::Send {
                target: self.target,
                source,
            })
    }

    /// Wait up to the receive timeout for one datagram.
    ///
    /// Timeouts and receive errors both yield `None`.
    pub async fn receive(&self) -> Option<Vec<u8>> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        match timeout(self.receive_timeout, self.socket.recv_from(&mut buf)).await {
            Ok(Ok((n, from))) => {
                trace!("UDP < {} bytes from {}", n, from);
                buf.truncate(n);
                Some(buf)
            }
            Ok(Err(e)) => {
                debug!("UDP receive failed: {}", e);
                None
            }
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_reaches_target() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = peer.local_addr().unwrap().to_string();

        let channel = UdpChannel::bind("127.0.0.1:0", &target, Duration::from_millis(100))
            .await
            .unwrap();
        channel.send(b"RCVDPKT: \"TELNET\" \"\" \"x\n\"\xc1").await.unwrap();

        let mut buf = [0u8; 64];
        let (n, _) = timeout(Duration::from_secs(1), peer.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"RCVDPKT: \"TELNET\" \"\" \"x\n\"\xc1");
    }

    #[tokio::test]
    async fn test_receive_datagram_and_timeout() {
        let channel = UdpChannel::bind("127.0.0.1:0", "127.0.0.1:9", Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(channel.receive().await, None);

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = channel.local_addr().unwrap();
        peer.send_to(b"SENDPKT: \"STN1\" \"\" \"SH/DX\r\"\x98", addr)
            .await
            .unwrap();

        let mut received = None;
        for _ in 0..10 {
            received = channel.receive().await;
            if received.is_some() {
                break;
            }
        }
        assert_eq!(
            received.as_deref(),
            Some(&b"SENDPKT: \"STN1\" \"\" \"SH/DX\r\"\x98"[..])
        );
    }

    #[tokio::test]
    async fn test_bad_target() {
        let result = UdpChannel::bind("127.0.0.1:0", "not an address", Duration::from_millis(100)).await;
        assert!(matches!(result, Err(UdpError::Target(_))));
    }
}
