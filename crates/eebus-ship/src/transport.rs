//! Transport seam: a channel pair standing in for the TLS WebSocket.
//!
//! The embedder bridges a real socket into one of these; tests and the
//! integration suite use [`pair`] for an in-memory duplex.

use tokio::sync::mpsc;

/// One endpoint of a framed, bidirectional byte transport.
///
/// `send` applies backpressure when the peer side falls behind; `recv`
/// returns `None` once the peer endpoint is gone.
pub struct ShipTransport {
    outbound: mpsc::Sender<Vec<u8>>,
    inbound: mpsc::Receiver<Vec<u8>>,
}

impl ShipTransport {
    pub fn new(outbound: mpsc::Sender<Vec<u8>>, inbound: mpsc::Receiver<Vec<u8>>) -> Self {
        ShipTransport { outbound, inbound }
    }

    /// Send one framed message; `false` when the peer is gone.
    pub async fn send(&self, frame: Vec<u8>) -> bool {
        self.outbound.send(frame).await.is_ok()
    }

    /// Receive the next framed message; `None` once the peer is gone.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.inbound.recv().await
    }

    /// Split into independent send and receive halves.
    pub fn into_split(self) -> (TransportSender, TransportReceiver) {
        (
            TransportSender { tx: self.outbound },
            TransportReceiver { rx: self.inbound },
        )
    }
}

/// Send half of a [`ShipTransport`].
pub struct TransportSender {
    tx: mpsc::Sender<Vec<u8>>,
}

impl TransportSender {
    pub async fn send(&self, frame: Vec<u8>) -> bool {
        self.tx.send(frame).await.is_ok()
    }
}

/// Receive half of a [`ShipTransport`].
pub struct TransportReceiver {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl TransportReceiver {
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    /// Stop accepting inbound frames; pending ones are discarded.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// An in-memory duplex: what one side sends, the other receives.
pub fn pair(capacity: usize) -> (ShipTransport, ShipTransport) {
    let capacity = capacity.max(1);
    let (a_tx, b_rx) = mpsc::channel(capacity);
    let (b_tx, a_rx) = mpsc::channel(capacity);
    (
        ShipTransport::new(a_tx, a_rx),
        ShipTransport::new(b_tx, b_rx),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_cross_the_pair() {
        let (a, mut b) = pair(4);
        assert!(a.send(vec![1, 2, 3]).await);
        assert_eq!(b.recv().await, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn dropped_endpoint_ends_recv() {
        let (a, mut b) = pair(4);
        drop(a);
        assert_eq!(b.recv().await, None);
    }

    #[tokio::test]
    async fn split_halves_keep_working() {
        let (a, b) = pair(4);
        let (a_tx, _a_rx) = a.into_split();
        let (_b_tx, mut b_rx) = b.into_split();
        assert!(a_tx.send(vec![9]).await);
        assert_eq!(b_rx.recv().await, Some(vec![9]));
    }
}
