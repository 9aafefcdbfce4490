//! Multi-threaded JSON production into the bounded batch queue.
//!
//! A pool of workers splits the batch workload, serialises schema-shaped
//! documents into byte batches and enqueues them, backing off while the
//! queue is full. Workers never assert shutdown themselves; they observe
//! the flag so they cannot deadlock once the sender has given up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::debug;

use crate::constants::{BACKOFF, DEFAULT_QUEUE_CAPACITY, DEFAULT_SEPARATOR};
use crate::document::{DocumentGenerator, GenerateOptions, Schema, ValueProducer};
use crate::error::{Error, Result};
use crate::metrics::ProductionMetrics;
use crate::queue::{BatchQueue, JsonBatch};

/// Options for the JSON production facility.
#[derive(Debug, Clone)]
pub struct ProducerOptions {
    pub generate: GenerateOptions,
    pub schema: Schema,
    /// Records per batch.
    pub num_jsons: u64,
    /// Separator appended after every record, if any.
    pub separator: Option<u8>,
    /// Pretty-print the documents.
    pub pretty: bool,
    /// Number of worker threads to spawn.
    pub num_threads: usize,
    /// Produce in batches; when disabled every record is its own batch
    /// and `num_batches` is ignored.
    pub batching: bool,
    pub num_batches: u64,
    /// Capacity of the bounded batch queue.
    pub queue_capacity: usize,
    /// Echo every batch sent to stdout.
    pub verbose: bool,
}

impl Default for ProducerOptions {
    fn default() -> Self {
        Self {
            generate: GenerateOptions::default(),
            schema: Schema::default(),
            num_jsons: 1,
            separator: Some(DEFAULT_SEPARATOR),
            pretty: false,
            num_threads: 1,
            batching: false,
            num_batches: 1,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            verbose: false,
        }
    }
}

impl ProducerOptions {
    /// Total records one repetition produces.
    pub fn total_jsons(&self) -> u64 {
        if self.batching {
            self.num_batches * self.num_jsons
        } else {
            self.num_jsons
        }
    }
}

/// Per-worker share of `total` units. The remainder is concentrated on
/// worker 0, keeping the partitioning deterministic.
fn split(total: u64, num_threads: usize, worker: usize) -> u64 {
    let per = total / num_threads as u64;
    if worker == 0 {
        per + total % num_threads as u64
    } else {
        per
    }
}

/// A pool of producer workers feeding one batch queue.
pub struct ProducerPool {
    opts: ProducerOptions,
    workers: Vec<JoinHandle<Result<ProductionMetrics>>>,
}

impl ProducerPool {
    pub fn new(opts: &ProducerOptions) -> Self {
        Self {
            opts: opts.clone(),
            workers: Vec::new(),
        }
    }

    /// Spawn exactly `num_threads` workers and return.
    pub fn start(&mut self, queue: Arc<BatchQueue>, shutdown: Arc<AtomicBool>) -> Result<()> {
        if self.opts.num_threads == 0 {
            return Err(Error::generic("producer pool needs at least one thread"));
        }
        debug!("starting {} producer workers", self.opts.num_threads);
        for worker in 0..self.opts.num_threads {
            let (num_batches, jsons_per_batch) = if self.opts.batching {
                (
                    split(self.opts.num_batches, self.opts.num_threads, worker),
                    self.opts.num_jsons,
                )
            } else {
                (split(self.opts.num_jsons, self.opts.num_threads, worker), 1)
            };
            let opts = self.opts.clone();
            let queue = Arc::clone(&queue);
            let shutdown = Arc::clone(&shutdown);
            let handle = thread::Builder::new()
                .name(format!("producer-{worker}"))
                .spawn(move || {
                    produce_batches(worker, &opts, num_batches, jsons_per_batch, &queue, &shutdown)
                })
                .map_err(|e| Error::generic(format!("failed to spawn producer worker: {e}")))?;
            self.workers.push(handle);
        }
        Ok(())
    }

    /// Join all workers and aggregate their metrics.
    ///
    /// Surfaces the first worker error after every worker has been joined.
    pub fn finish(&mut self) -> Result<ProductionMetrics> {
        let mut total = ProductionMetrics::default();
        let mut first_error = None;
        for handle in self.workers.drain(..) {
            match handle.join() {
                Ok(Ok(metrics)) => total += metrics,
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(_) => {
                    if first_error.is_none() {
                        first_error = Some(Error::generic("producer worker panicked"));
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }
}

/// One worker: serialise `num_batches` batches of `jsons_per_batch`
/// records each and enqueue them.
///
/// The generator seed is offset by the worker index, so output depends
/// only on the options and the work split. On shutdown the current batch
/// is completed, enqueued with one final attempt, and the worker exits
/// with whatever metrics it has accumulated.
fn produce_batches(
    worker: usize,
    opts: &ProducerOptions,
    num_batches: u64,
    jsons_per_batch: u64,
    queue: &BatchQueue,
    shutdown: &AtomicBool,
) -> Result<ProductionMetrics> {
    let mut generator =
        DocumentGenerator::new(opts.schema.clone(), opts.generate.seed + worker as u64);
    let mut metrics = ProductionMetrics::default();
    let started = Instant::now();
    let mut buffer: Vec<u8> = Vec::new();

    'batches: for _ in 0..num_batches {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        buffer.clear();
        for _ in 0..jsons_per_batch {
            let doc = generator.produce();
            let serialised = if opts.pretty {
                serde_json::to_writer_pretty(&mut buffer, &doc)
            } else {
                serde_json::to_writer(&mut buffer, &doc)
            };
            serialised.map_err(|e| Error::generic(format!("serialisation failed: {e}")))?;
            if let Some(separator) = opts.separator {
                buffer.push(separator);
            }
        }

        let mut batch = JsonBatch {
            data: buffer.clone(),
            num_jsons: jsons_per_batch,
        };
        metrics.num_chars += batch.data.len() as u64;

        loop {
            match queue.try_enqueue(batch) {
                Ok(()) => break,
                Err(rejected) => {
                    batch = rejected;
                    metrics.queue_full += 1;
                    if shutdown.load(Ordering::Relaxed) {
                        // One final attempt, which may fail.
                        if queue.try_enqueue(batch).is_ok() {
                            metrics.num_batches += 1;
                            metrics.num_jsons += jsons_per_batch;
                        }
                        break 'batches;
                    }
                    thread::sleep(BACKOFF);
                }
            }
        }
        metrics.num_batches += 1;
        metrics.num_jsons += jsons_per_batch;
    }

    metrics.time = started.elapsed().as_secs_f64();
    debug!("producer worker {worker} done");
    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain_all(queue: &BatchQueue, expect_batches: u64) -> Vec<JsonBatch> {
        let mut batches = Vec::new();
        while (batches.len() as u64) < expect_batches {
            if let Some(b) = queue.try_dequeue() {
                batches.push(b);
            } else {
                thread::yield_now();
            }
        }
        batches
    }

    fn run_pool(opts: &ProducerOptions) -> (Vec<JsonBatch>, ProductionMetrics) {
        let queue = Arc::new(BatchQueue::with_capacity(opts.queue_capacity).unwrap());
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut pool = ProducerPool::new(opts);
        pool.start(Arc::clone(&queue), shutdown).unwrap();
        let expect = if opts.batching { opts.num_batches } else { opts.num_jsons };
        let batches = drain_all(&queue, expect);
        let metrics = pool.finish().unwrap();
        (batches, metrics)
    }

    #[test]
    fn remainder_is_concentrated_on_worker_zero() {
        assert_eq!(split(10, 3, 0), 4);
        assert_eq!(split(10, 3, 1), 3);
        assert_eq!(split(10, 3, 2), 3);
        assert_eq!(split(2, 4, 0), 2);
        assert_eq!(split(2, 4, 3), 0);
    }

    #[test]
    fn batching_produces_exact_counts() {
        let opts = ProducerOptions {
            num_jsons: 3,
            batching: true,
            num_batches: 5,
            num_threads: 2,
            ..Default::default()
        };
        let (batches, metrics) = run_pool(&opts);
        assert_eq!(batches.len(), 5);
        for batch in &batches {
            assert_eq!(batch.num_jsons, 3);
            let separators = batch.data.iter().filter(|&&b| b == b'\n').count();
            assert_eq!(separators as u64, batch.num_jsons);
        }
        assert_eq!(metrics.num_batches, 5);
        assert_eq!(metrics.num_jsons, 15);
        let bytes: u64 = batches.iter().map(|b| b.data.len() as u64).sum();
        assert_eq!(metrics.num_chars, bytes);
    }

    #[test]
    fn single_record_batches_when_batching_is_disabled() {
        let opts = ProducerOptions {
            num_jsons: 7,
            num_threads: 3,
            ..Default::default()
        };
        let (batches, metrics) = run_pool(&opts);
        assert_eq!(batches.len(), 7);
        assert!(batches.iter().all(|b| b.num_jsons == 1));
        assert_eq!(metrics.num_jsons, 7);
    }

    #[test]
    fn identical_options_produce_identical_batch_sets() {
        let opts = ProducerOptions {
            num_jsons: 4,
            batching: true,
            num_batches: 6,
            num_threads: 2,
            ..Default::default()
        };
        let (mut a, _) = run_pool(&opts);
        let (mut b, _) = run_pool(&opts);
        // Ordering across workers is not deterministic; contents are.
        a.sort_by(|x, y| x.data.cmp(&y.data));
        b.sort_by(|x, y| x.data.cmp(&y.data));
        assert_eq!(a, b);
    }

    #[test]
    fn backpressure_counts_full_queue_attempts() {
        let opts = ProducerOptions {
            num_jsons: 8,
            queue_capacity: 1,
            ..Default::default()
        };
        let queue = Arc::new(BatchQueue::with_capacity(opts.queue_capacity).unwrap());
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut pool = ProducerPool::new(&opts);
        pool.start(Arc::clone(&queue), shutdown).unwrap();
        // Slow consumer: the single-slot queue must fill up.
        let mut drained = 0u64;
        while drained < 8 {
            if queue.try_dequeue().is_some() {
                drained += 1;
                thread::sleep(std::time::Duration::from_millis(1));
            }
        }
        let metrics = pool.finish().unwrap();
        assert_eq!(metrics.num_jsons, 8);
        assert!(metrics.queue_full > 0);
    }

    #[test]
    fn shutdown_releases_blocked_workers() {
        let opts = ProducerOptions {
            num_jsons: 1000,
            queue_capacity: 1,
            num_threads: 2,
            ..Default::default()
        };
        let queue = Arc::new(BatchQueue::with_capacity(opts.queue_capacity).unwrap());
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut pool = ProducerPool::new(&opts);
        pool.start(Arc::clone(&queue), Arc::clone(&shutdown)).unwrap();
        // Nothing consumes; workers must be stuck in backoff.
        thread::sleep(std::time::Duration::from_millis(10));
        shutdown.store(true, Ordering::Relaxed);
        let metrics = pool.finish().unwrap();
        assert!(metrics.num_jsons < 1000);
    }

    #[test]
    fn zero_threads_is_an_error() {
        let opts = ProducerOptions {
            num_threads: 0,
            ..Default::default()
        };
        let queue = Arc::new(BatchQueue::with_capacity(1).unwrap());
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut pool = ProducerPool::new(&opts);
        assert!(pool.start(queue, shutdown).is_err());
    }
}
