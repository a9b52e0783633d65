//! Bounded message queue with timed send/receive and close semantics.
//!
//! This is the only hand-off point between transport tasks, timer callbacks
//! and the device worker: producers block (or time out) when the consumer
//! falls behind, and `close` unblocks both sides so shutdown never hangs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::EebusError;

/// How long a queue operation may wait before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// Block until the operation completes or the queue is closed.
    Infinite,
    /// Give up with [`EebusError::Timeout`] after the given duration.
    Within(Duration),
}

struct Shared {
    closed: watch::Sender<bool>,
}

impl Shared {
    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

/// Producer half of a bounded queue.
pub struct QueueSender<T> {
    tx: mpsc::Sender<T>,
    shared: Arc<Shared>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        QueueSender {
            tx: self.tx.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Consumer half of a bounded queue.
pub struct QueueReceiver<T> {
    rx: mpsc::Receiver<T>,
    shared: Arc<Shared>,
}

/// Create a bounded queue with at least one slot.
pub fn queue<T>(capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    let (closed, _) = watch::channel(false);
    let shared = Arc::new(Shared { closed });
    (
        QueueSender {
            tx,
            shared: Arc::clone(&shared),
        },
        QueueReceiver { rx, shared },
    )
}

/// Wait for the closed flag to flip to `true`.
async fn closed_wait(shared: &Shared) {
    let mut rx = shared.closed.subscribe();
    // Ignore the sender-dropped case: the flag can then never flip.
    let _ = rx.wait_for(|closed| *closed).await;
    // If the watch sender is gone the queue is being torn down anyway;
    // park forever and let the other select arms win.
    if !shared.is_closed() {
        std::future::pending::<()>().await;
    }
}

async fn deadline_wait(deadline: Deadline) {
    match deadline {
        Deadline::Infinite => std::future::pending().await,
        Deadline::Within(d) => tokio::time::sleep(d).await,
    }
}

impl<T> QueueSender<T> {
    /// Enqueue a message, waiting for a free slot up to the deadline.
    ///
    /// Returns [`EebusError::NoChange`] once the queue is closed and
    /// [`EebusError::Timeout`] when a finite deadline expires first.
    pub async fn send(&self, msg: T, deadline: Deadline) -> Result<(), EebusError> {
        if self.shared.is_closed() {
            return Err(EebusError::NoChange);
        }

        tokio::select! {
            res = self.tx.send(msg) => res.map_err(|_| EebusError::NoChange),
            _ = closed_wait(&self.shared) => Err(EebusError::NoChange),
            _ = deadline_wait(deadline) => Err(EebusError::Timeout),
        }
    }

    /// Enqueue without waiting; a full queue is a [`EebusError::Timeout`].
    pub fn try_send(&self, msg: T) -> Result<(), EebusError> {
        if self.shared.is_closed() {
            return Err(EebusError::NoChange);
        }

        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EebusError::Timeout,
            mpsc::error::TrySendError::Closed(_) => EebusError::NoChange,
        })
    }

    /// Close the queue from the producer side.
    pub fn close(&self) {
        self.shared.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

impl<T> QueueReceiver<T> {
    /// Dequeue one message, waiting up to the deadline.
    ///
    /// Once the queue is closed every queued message is dropped and
    /// [`EebusError::NoChange`] is returned.
    pub async fn recv(&mut self, deadline: Deadline) -> Result<T, EebusError> {
        if self.shared.is_closed() {
            self.clear();
            return Err(EebusError::NoChange);
        }

        tokio::select! {
            msg = self.rx.recv() => msg.ok_or(EebusError::NoChange),
            _ = closed_wait(&self.shared) => {
                self.clear();
                Err(EebusError::NoChange)
            }
            _ = deadline_wait(deadline) => Err(EebusError::Timeout),
        }
    }

    /// Drop every message currently queued.
    pub fn clear(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }

    /// Close the queue from the consumer side; unblocks pending senders.
    pub fn close(&mut self) {
        self.shared.closed.send_replace(true);
        self.rx.close();
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_recv_in_order() {
        let (tx, mut rx) = queue(4);
        tx.send(1u32, Deadline::Infinite).await.unwrap();
        tx.send(2u32, Deadline::Infinite).await.unwrap();
        assert_eq!(rx.recv(Deadline::Infinite).await.unwrap(), 1);
        assert_eq!(rx.recv(Deadline::Infinite).await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn recv_times_out_on_empty_queue() {
        let (_tx, mut rx) = queue::<u32>(1);
        let err = rx
            .recv(Deadline::Within(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert_eq!(err, EebusError::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn send_times_out_on_full_queue() {
        let (tx, _rx) = queue(1);
        tx.send(1u32, Deadline::Infinite).await.unwrap();
        let err = tx
            .send(2u32, Deadline::Within(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert_eq!(err, EebusError::Timeout);
    }

    #[tokio::test]
    async fn close_unblocks_receiver() {
        let (tx, mut rx) = queue::<u32>(1);
        let handle = tokio::spawn(async move { rx.recv(Deadline::Infinite).await });
        tokio::task::yield_now().await;
        tx.close();
        assert_eq!(handle.await.unwrap().unwrap_err(), EebusError::NoChange);
    }

    #[tokio::test]
    async fn close_drops_queued_messages() {
        let (tx, mut rx) = queue(4);
        tx.send(7u32, Deadline::Infinite).await.unwrap();
        tx.close();
        assert_eq!(
            rx.recv(Deadline::Infinite).await.unwrap_err(),
            EebusError::NoChange
        );
        // A second receive stays closed.
        assert_eq!(
            rx.recv(Deadline::Infinite).await.unwrap_err(),
            EebusError::NoChange
        );
    }

    #[tokio::test]
    async fn send_after_close_is_no_change() {
        let (tx, mut rx) = queue(1);
        rx.close();
        assert_eq!(
            tx.send(1u32, Deadline::Infinite).await.unwrap_err(),
            EebusError::NoChange
        );
        assert_eq!(tx.try_send(1u32).unwrap_err(), EebusError::NoChange);
    }
}
