//! Pre-allocated receive buffers and the record scan.
//!
//! The buffering client reads the TCP stream into one of several
//! fixed-capacity buffers, each guarded by its own lock, and scans the
//! bytes in place for separator-terminated records. Consumers drain a
//! buffer under its lock and reset it before releasing, which is how the
//! receive loop learns the buffer is free again.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use memchr::memchr;

use crate::error::{Error, Result};
use crate::latency::LatencyTracker;
use crate::queue::Seq;

/// Inclusive range of sequence numbers held by a buffer.
///
/// `{0, 0}` doubles as the canonical empty value; `num_jsons` on the
/// owning buffer tells the two apart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeqRange {
    pub first: Seq,
    pub last: Seq,
}

/// A fixed-capacity receive region with record bookkeeping.
///
/// The valid prefix is `size` bytes and a buffer is empty iff `size == 0`.
/// `seq_range` covers the records whose terminating separator lies within
/// the valid prefix.
pub struct JsonBuffer {
    data: Vec<u8>,
    size: usize,
    seq_range: SeqRange,
    num_jsons: u64,
    recv_time: Option<Instant>,
    tracked_seqs: Vec<Seq>,
}

impl JsonBuffer {
    /// Allocate a buffer of fixed `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::client("buffer capacity cannot be 0"));
        }
        Ok(Self {
            data: vec![0; capacity],
            size: 0,
            seq_range: SeqRange::default(),
            num_jsons: 0,
            recv_time: None,
            tracked_seqs: Vec::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// The valid prefix.
    pub fn contents(&self) -> &[u8] {
        &self.data[..self.size]
    }

    /// The entire backing region, for the receive path.
    pub fn region_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub(crate) fn region(&self) -> &[u8] {
        &self.data
    }

    /// Set the valid prefix length. Fails when it exceeds the capacity.
    pub fn set_size(&mut self, size: usize) -> Result<()> {
        if size <= self.data.len() {
            self.size = size;
            Ok(())
        } else {
            Err(Error::client(format!(
                "cannot set buffer size {} beyond capacity {}",
                size,
                self.data.len()
            )))
        }
    }

    pub fn seq_range(&self) -> SeqRange {
        self.seq_range
    }

    pub fn num_jsons(&self) -> u64 {
        self.num_jsons
    }

    pub fn recv_time(&self) -> Option<Instant> {
        self.recv_time
    }

    pub fn set_recv_time(&mut self, time: Instant) {
        self.recv_time = Some(time);
    }

    /// Sequence numbers whose receive time was recorded while scanning
    /// this buffer.
    pub fn tracked_seqs(&self) -> &[Seq] {
        &self.tracked_seqs
    }

    /// Make the buffer available to the receive loop again.
    ///
    /// A consumer must call this before releasing the lock, or the client
    /// will keep skipping the buffer as full.
    pub fn reset(&mut self) {
        self.size = 0;
        self.seq_range = SeqRange::default();
        self.num_jsons = 0;
        self.recv_time = None;
        self.tracked_seqs.clear();
    }

    /// Scan the first `num_bytes` bytes for separator-terminated records,
    /// assigning sequence numbers starting at `first_seq`.
    ///
    /// Returns `(num_jsons, tail_bytes)`: the count of complete non-empty
    /// records, and the trailing bytes of an unterminated record. Empty
    /// records (adjacent separators) are ignored and do not consume a
    /// sequence number. When records were found, `seq_range` is set to
    /// cover them. For every record that is a latency sample the buffer's
    /// receive time goes to stage 0 of the tracker and the sequence number
    /// is appended to `tracked_seqs`.
    pub fn scan(
        &mut self,
        num_bytes: usize,
        first_seq: Seq,
        separator: u8,
        mut tracker: Option<&mut LatencyTracker>,
    ) -> (u64, usize) {
        debug_assert!(num_bytes <= self.data.len());
        let JsonBuffer {
            data,
            tracked_seqs,
            recv_time,
            ..
        } = self;
        let recv_time = *recv_time;

        let mut num_jsons: u64 = 0;
        let mut seq = first_seq;
        let tail = split_segments(&data[..num_bytes], separator, |segment| {
            if segment.is_empty() {
                return;
            }
            if let (Some(tracker), Some(time)) = (tracker.as_deref_mut(), recv_time) {
                if tracker.put(seq, 0, time) {
                    tracked_seqs.push(seq);
                }
            }
            seq += 1;
            num_jsons += 1;
        });

        if num_jsons > 0 {
            self.seq_range = SeqRange {
                first: first_seq,
                last: first_seq + num_jsons - 1,
            };
        }
        self.num_jsons = num_jsons;
        (num_jsons, tail)
    }
}

/// Call `on_segment` for every separator-terminated segment in `bytes`,
/// empty segments included, and return the length of the unterminated
/// tail. Never looks past `bytes`.
pub(crate) fn split_segments(bytes: &[u8], separator: u8, mut on_segment: impl FnMut(&[u8])) -> usize {
    let mut start = 0;
    while start < bytes.len() {
        match memchr(separator, &bytes[start..]) {
            Some(offset) => {
                on_segment(&bytes[start..start + offset]);
                start += offset + 1;
            }
            None => break,
        }
    }
    bytes.len() - start
}

/// Scan ascending indices for an empty buffer whose lock can be taken
/// without blocking.
///
/// The order is fixed rather than round-robin: consumers drain a buffer
/// fully before releasing its lock, which keeps the fixed order fair
/// enough for the expected workload.
pub fn try_acquire_empty(
    buffers: &[Arc<Mutex<JsonBuffer>>],
) -> Option<(usize, MutexGuard<'_, JsonBuffer>)> {
    for (index, slot) in buffers.iter().enumerate() {
        if let Ok(guard) = slot.try_lock() {
            if guard.is_empty() {
                return Some((index, guard));
            }
        }
    }
    None
}
