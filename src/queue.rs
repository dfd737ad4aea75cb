//! Bounded FIFO packet queue — the sole cross-thread conduit between the
//! uplink/downlink receivers (C6/C7) and the worker pool (C5). A `VecDeque`
//! behind a mutex gives ring-buffer FIFO semantics without hand-rolled index
//! arithmetic; a condvar lets workers block instead of spinning, while still
//! bounding wake latency to roughly a millisecond as a safety net.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

const WAIT_TIMEOUT: Duration = Duration::from_millis(1);

pub struct Packet {
    pub data: Vec<u8>,
    pub peer: SocketAddr,
}

pub struct PacketQueue {
    inner: Mutex<VecDeque<Packet>>,
    not_empty: Condvar,
    capacity: usize,
}

impl PacketQueue {
    pub fn new(capacity: usize) -> Self {
        PacketQueue {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    pub fn enqueue(&self, packet: Packet) -> bool {
        let mut q = self.inner.lock().unwrap();
        if q.len() >= self.capacity {
            return false;
        }
        q.push_back(packet);
        self.not_empty.notify_one();
        true
    }

    /// Blocks up to ~1ms for a packet, then returns so the caller can check
    /// its stop flag. Never blocks indefinitely.
    pub fn dequeue_wait(&self) -> Option<Packet> {
        let mut q = self.inner.lock().unwrap();
        if q.is_empty() {
            let (guard, _) = self.not_empty.wait_timeout(q, WAIT_TIMEOUT).unwrap();
            q = guard;
        }
        q.pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
