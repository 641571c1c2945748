//! UDP transport for dissemination frames.

use dissem_core::Message;
use dissem_proto::FrameError;
use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

const RECV_BUFFER: usize = 64 * 1024;

/// UDP socket sending every frame to a fixed peer list.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    peers: Vec<SocketAddr>,
    mtu: usize,
    buf: Vec<u8>,
}

impl UdpTransport {
    /// Bind a socket.
    ///
    /// # Errors
    ///
    /// Returns error if the socket cannot be bound or configured.
    pub async fn bind(
        addr: SocketAddr,
        peers: Vec<SocketAddr>,
        broadcast: bool,
        mtu: usize,
    ) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        if broadcast {
            socket.set_broadcast(true)?;
        }

        tracing::info!(%addr, peers = peers.len(), broadcast, "Transport bound");

        Ok(Self {
            socket,
            peers,
            mtu,
            buf: vec![0; RECV_BUFFER],
        })
    }

    /// Address the socket is bound to.
    ///
    /// # Errors
    ///
    /// Returns error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    /// Current peer list.
    #[must_use]
    pub fn peers(&self) -> &[SocketAddr] {
        &self.peers
    }

    /// Add a peer unless already present.
    pub fn add_peer(&mut self, peer: SocketAddr) {
        if !self.peers.contains(&peer) {
            self.peers.push(peer);
        }
    }

    /// Send one message to every peer.
    ///
    /// Delivery is best effort: a failing peer is logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns error if the encoded frame exceeds the MTU.
    pub async fn send(&self, msg: &Message) -> Result<(), TransportError> {
        let frame = dissem_proto::encode(msg);
        if frame.len() > self.mtu {
            return Err(TransportError::Oversized {
                len: frame.len(),
                mtu: self.mtu,
            });
        }

        for peer in &self.peers {
            if let Err(err) = self.socket.send_to(&frame, peer).await {
                tracing::warn!(error = %err, %peer, key = %msg.key, "Failed to send frame");
            }
        }
        Ok(())
    }

    /// Receive the next frame.
    ///
    /// Cancel safe: no datagram is lost if the future is dropped before it
    /// completes.
    ///
    /// # Errors
    ///
    /// Returns error on socket failure, or if the datagram is oversized or
    /// does not decode.
    pub async fn recv(&mut self) -> Result<(Message, SocketAddr), TransportError> {
        let (len, from) = self.socket.recv_from(&mut self.buf).await?;
        if len > self.mtu {
            return Err(TransportError::Oversized { len, mtu: self.mtu });
        }
        let msg = dissem_proto::decode(&self.buf[..len])
            .map_err(|source| TransportError::Frame { from, source })?;
        Ok((msg, from))
    }
}

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Socket could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address
        addr: SocketAddr,
        /// Underlying error
        source: io::Error,
    },
    /// Socket I/O failed
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    /// Datagram larger than the MTU
    #[error("frame of {len} bytes exceeds mtu {mtu}")]
    Oversized {
        /// Frame length
        len: usize,
        /// Configured MTU
        mtu: usize,
    },
    /// Datagram did not decode
    #[error("bad frame from {from}: {source}")]
    Frame {
        /// Sender address
        from: SocketAddr,
        /// Decoding error
        source: FrameError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use dissem_core::{Key, Version};

    fn localhost() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    #[test]
    fn frames_cross_the_socket() {
        tokio_test::block_on(async {
            let mut rx = UdpTransport::bind(localhost(), Vec::new(), false, 64)
                .await
                .unwrap();
            let tx = UdpTransport::bind(localhost(), vec![rx.local_addr().unwrap()], false, 64)
                .await
                .unwrap();

            let msg = Message::data(Key::from_raw(3), Version::from_raw(2), &[1, 2, 3]);
            tx.send(&msg).await.unwrap();

            let (got, from) = rx.recv().await.unwrap();
            assert_eq!(got, msg);
            assert_eq!(from, tx.local_addr().unwrap());
        });
    }

    #[test]
    fn garbage_is_reported_not_fatal() {
        tokio_test::block_on(async {
            let mut rx = UdpTransport::bind(localhost(), Vec::new(), false, 64)
                .await
                .unwrap();
            let raw = UdpSocket::bind(localhost()).await.unwrap();
            raw.send_to(&[0xFF, 0, 1], rx.local_addr().unwrap())
                .await
                .unwrap();

            let err = rx.recv().await.unwrap_err();
            assert!(matches!(err, TransportError::Frame { .. }));
        });
    }

    #[test]
    fn oversized_frames_are_not_sent() {
        tokio_test::block_on(async {
            let tx = UdpTransport::bind(localhost(), Vec::new(), false, 8)
                .await
                .unwrap();
            let msg = Message::data(Key::from_raw(3), Version::from_raw(2), &[0; 4]);
            assert!(matches!(
                tx.send(&msg).await,
                Err(TransportError::Oversized { len: 11, mtu: 8 })
            ));
        });
    }

    #[test]
    fn peers_are_deduplicated() {
        tokio_test::block_on(async {
            let peer = SocketAddr::from(([127, 0, 0, 1], 7400));
            let mut tx = UdpTransport::bind(localhost(), vec![peer], false, 64)
                .await
                .unwrap();
            tx.add_peer(peer);
            assert_eq!(tx.peers(), &[peer]);
        });
    }
}
