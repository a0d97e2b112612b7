//! Routing queues between pipeline stages.
//!
//! Stages exchange small [`RouteMsg`] records over unbounded crossbeam
//! channels. A consumer owns the [`Queue`]; producers hold cloned
//! [`QueueSender`] handles. `recv_timeout` is the bounded wait every worker
//! loop uses so it can observe its cancellation flag between messages
//! instead of blocking forever.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// Default bounded wait before a consumer re-checks its run flag.
pub const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// One routing record: which slot of which stream to act on, and whether
/// the upstream stage succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteMsg {
    pub stream: u16,
    pub slot: u8,
    pub ok: bool,
}

/// Cloneable producer handle for a stage's inbound queue.
#[derive(Clone)]
pub struct QueueSender<T> {
    tx: Sender<T>,
}

impl<T> QueueSender<T> {
    /// Append a record. Never blocks; a send after the consumer is gone is
    /// silently dropped (the consumer stage has already been torn down).
    pub fn put(&self, msg: T) {
        let _ = self.tx.send(msg);
    }
}

/// FIFO queue owned by the consuming stage.
pub struct Queue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// A new producer handle for this queue.
    pub fn sender(&self) -> QueueSender<T> {
        QueueSender {
            tx: self.tx.clone(),
        }
    }

    /// Append a record from the owning side.
    pub fn put(&self, msg: T) {
        let _ = self.tx.send(msg);
    }

    /// Pop the front record, waiting up to `timeout` for one to arrive.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => Some(msg),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Current queue depth.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_preserved() {
        let queue = Queue::new();
        for i in 0..100u16 {
            queue.put(RouteMsg {
                stream: i,
                slot: (i % 8) as u8,
                ok: i % 2 == 0,
            });
        }
        assert_eq!(queue.len(), 100);
        for i in 0..100u16 {
            let msg = queue.recv_timeout(POLL_TIMEOUT).unwrap();
            assert_eq!(msg.stream, i);
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn recv_times_out_on_empty_queue() {
        let queue: Queue<RouteMsg> = Queue::new();
        let start = std::time::Instant::now();
        assert!(queue.recv_timeout(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn producers_share_one_fifo() {
        let queue = Queue::new();
        let a = queue.sender();
        let b = queue.sender();
        a.put(RouteMsg { stream: 1, slot: 0, ok: true });
        b.put(RouteMsg { stream: 2, slot: 0, ok: true });
        a.put(RouteMsg { stream: 3, slot: 0, ok: false });
        let order: Vec<u16> = (0..3)
            .filter_map(|_| queue.recv_timeout(POLL_TIMEOUT).map(|m| m.stream))
            .collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn cross_thread_delivery() {
        let queue = Queue::new();
        let tx = queue.sender();
        let handle = std::thread::spawn(move || {
            for i in 0..10u16 {
                tx.put(RouteMsg { stream: i, slot: 0, ok: true });
            }
        });
        let mut got = 0;
        while got < 10 {
            if queue.recv_timeout(POLL_TIMEOUT).is_some() {
                got += 1;
            }
        }
        handle.join().unwrap();
    }
}
