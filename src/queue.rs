//! Batches, items and the queues that carry them.

use crossbeam_queue::{ArrayQueue, SegQueue};

use crate::error::{Error, Result};

/// Sequence number assigned to each record observed by a client.
///
/// Strictly monotonic over one client session; the server is stateless
/// about them.
pub type Seq = u64;

/// A contiguous block of serialised records produced by one worker pass.
///
/// Each record in `data` is followed by exactly one separator; `num_jsons`
/// equals the number of separators.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JsonBatch {
    pub data: Vec<u8>,
    pub num_jsons: u64,
}

/// An owned record paired with its client-assigned sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonItem {
    pub seq: Seq,
    pub json: String,
}

/// Bounded queue between the producer workers and the server send loop.
///
/// Safe for any number of producers and one consumer; both ends are
/// non-blocking, callers handle backpressure themselves.
pub struct BatchQueue {
    inner: ArrayQueue<JsonBatch>,
}

impl BatchQueue {
    /// Fails when `capacity` is 0.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::generic("batch queue capacity must be at least 1"));
        }
        Ok(Self {
            inner: ArrayQueue::new(capacity),
        })
    }

    /// Non-blocking enqueue. Hands the batch back when the queue is full.
    pub fn try_enqueue(&self, batch: JsonBatch) -> std::result::Result<(), JsonBatch> {
        self.inner.push(batch)
    }

    /// Non-blocking dequeue.
    pub fn try_dequeue(&self) -> Option<JsonBatch> {
        self.inner.pop()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}

/// Unbounded queue of owned records for consumers of the queueing client.
pub type JsonQueue = SegQueue<JsonItem>;
