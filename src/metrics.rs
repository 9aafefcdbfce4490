//! Production and streaming aggregates.

use std::ops::AddAssign;

use tracing::info;

/// Sum of everything the producer workers did in one repetition.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProductionMetrics {
    /// Bytes of serialised records, separators included.
    pub num_chars: u64,
    /// Records serialised and enqueued.
    pub num_jsons: u64,
    /// Batches enqueued.
    pub num_batches: u64,
    /// Enqueue attempts that hit a full queue.
    pub queue_full: u64,
    /// Sum of per-worker elapsed seconds.
    pub time: f64,
}

impl AddAssign for ProductionMetrics {
    fn add_assign(&mut self, rhs: Self) {
        self.num_chars += rhs.num_chars;
        self.num_jsons += rhs.num_jsons;
        self.num_batches += rhs.num_batches;
        self.queue_full += rhs.queue_full;
        self.time += rhs.time;
    }
}

impl ProductionMetrics {
    pub fn log(&self, num_threads: usize) {
        info!(
            "Produced {} JSONs in {:.4} seconds ({} threads).",
            self.num_jsons, self.time, num_threads
        );
        if self.time > 0.0 {
            info!("  {:.1} JSON/s (avg).", self.num_jsons as f64 / self.time);
            info!(
                "  {:.2} GB/s   (avg).",
                self.num_chars as f64 * 1e-9 / self.time
            );
        }
        if self.queue_full > 0 {
            info!("  {} enqueue attempts hit a full queue.", self.queue_full);
        }
    }
}

/// Streaming statistics for one server session.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamMetrics {
    /// Records sent over the socket.
    pub num_messages: u64,
    /// Bytes sent over the socket.
    pub num_bytes: u64,
    /// Seconds spent in the send loop, summed over repetitions.
    pub time: f64,
    pub producer: ProductionMetrics,
}

impl StreamMetrics {
    pub fn log(&self, num_threads: usize) {
        info!(
            "Streamed {} messages in {:.4} seconds.",
            self.num_messages, self.time
        );
        if self.time > 0.0 {
            info!(
                "  {:.1} messages/second (avg).",
                self.num_messages as f64 / self.time
            );
            info!(
                "  {:.2} gigabits/second (avg).",
                self.num_bytes as f64 * 8.0 * 1e-9 / self.time
            );
        }
        self.producer.log(num_threads);
    }
}
