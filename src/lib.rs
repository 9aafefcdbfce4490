//! Synthetic newline-delimited JSON stream generator and its matched
//! benchmarking client.
//!
//! A pool of producer threads serialises schema-shaped random documents
//! into batches on a bounded queue; a TCP server drains the queue onto a
//! single accepted connection. On the other end a client ingests the byte
//! stream either into pre-allocated lockable buffers, leaving the bytes in
//! place for consumer threads, or into a queue of owned records. Either
//! way the client counts records, assigns monotonically increasing
//! sequence numbers and stamps latency samples, which makes the pair
//! useful for benchmarking downstream JSON-ingestion pipelines.

pub mod buffer;
pub mod client;
pub mod constants;
pub mod document;
pub mod error;
pub mod latency;
pub mod metrics;
pub mod producer;
pub mod queue;
pub mod server;
