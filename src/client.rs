//! TCP ingestion clients: buffering and queueing strategies.
//!
//! Both clients connect to the stream server, count newline-delimited
//! records, assign sequence numbers and stamp latency samples. The
//! buffering client leaves the bytes in pre-allocated lockable buffers for
//! consumers; the queueing client materialises every record into an owned
//! item on a queue.

use std::io::Read;
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use tracing::debug;

use crate::buffer::{split_segments, try_acquire_empty, JsonBuffer};
use crate::constants::{BACKOFF, DEFAULT_PORT, DEFAULT_SEPARATOR, DEFAULT_TCP_BUFFER_SIZE};
use crate::error::{Error, Result};
use crate::latency::LatencyTracker;
use crate::queue::{JsonItem, JsonQueue, Seq};

/// Basic options for client implementations.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// The hostname to connect to.
    pub host: String,
    /// The port to connect to.
    pub port: u16,
    /// Starting sequence number for the first record received.
    pub seq: Seq,
    /// Record separator to scan for.
    pub separator: u8,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            seq: 0,
            separator: DEFAULT_SEPARATOR,
        }
    }
}

fn connect_stream(options: &ClientOptions) -> Result<TcpStream> {
    let endpoint = format!("{}:{}", options.host, options.port);
    debug!("connecting to {endpoint}");
    TcpStream::connect(&endpoint)
        .map_err(|e| Error::client(format!("unable to connect to {endpoint}: {e}")))
}

fn receive_error(e: &std::io::Error) -> Error {
    Error::client(format!(
        "receive failed (os status {}): {e}",
        e.raw_os_error().unwrap_or(-1)
    ))
}

/// A client that leaves received bytes in place.
///
/// The client fills whichever buffer it can lock, scans it for records and
/// releases it non-empty; consumers reset a buffer under its lock to hand
/// it back. Records straddling a buffer boundary are carried over in a
/// spill region and prepended to the next buffer.
pub struct BufferingClient {
    stream: Option<TcpStream>,
    buffers: Vec<Arc<Mutex<JsonBuffer>>>,
    separator: u8,
    seq: Seq,
    jsons_received: u64,
    bytes_received: u64,
}

impl BufferingClient {
    /// Connect and adopt the caller's buffer set for the session.
    ///
    /// The set must hold at least one buffer, each at least as large as
    /// the longest expected record.
    pub fn connect(options: &ClientOptions, buffers: Vec<Arc<Mutex<JsonBuffer>>>) -> Result<Self> {
        if buffers.is_empty() {
            return Err(Error::client("at least one receive buffer is required"));
        }
        let stream = connect_stream(options)?;
        Ok(Self {
            stream: Some(stream),
            buffers,
            separator: options.separator,
            seq: options.seq,
            jsons_received: 0,
            bytes_received: 0,
        })
    }

    /// Receive records until the server disconnects.
    ///
    /// Returns Ok on a clean disconnect and `ClientError` when the socket
    /// fails mid-session or a record cannot be framed within a buffer.
    /// Any held buffer lock is released on every exit path.
    pub fn receive_jsons(&mut self, mut tracker: Option<&mut LatencyTracker>) -> Result<()> {
        let Self {
            stream,
            buffers,
            separator,
            seq,
            jsons_received,
            bytes_received,
        } = self;
        let stream = stream
            .as_mut()
            .ok_or_else(|| Error::client("client is closed"))?;

        // Bytes of a record whose separator has not been seen yet.
        let mut spill: Vec<u8> = Vec::new();

        loop {
            let Some((index, mut buf)) = try_acquire_empty(buffers) else {
                // Consumers own every buffer: stop reading and let the
                // kernel absorb the slack up to the receive window.
                thread::sleep(BACKOFF);
                continue;
            };

            let remaining = spill.len();
            if remaining >= buf.capacity() {
                // The carried record already fills the buffer and its
                // separator has not arrived, so it can never be framed. A
                // zero-length read here would return Ok(0) and masquerade
                // as a clean disconnect.
                return Err(Error::client(format!(
                    "record exceeds buffer capacity ({remaining} bytes carried, {} byte buffer)",
                    buf.capacity()
                )));
            }
            if remaining > 0 {
                buf.region_mut()[..remaining].copy_from_slice(&spill);
            }

            let n = match stream.read(&mut buf.region_mut()[remaining..]) {
                Ok(n) => n,
                Err(e) => return Err(receive_error(&e)),
            };
            buf.set_recv_time(Instant::now());
            *bytes_received += n as u64;

            let scan_size = remaining + n;
            let (num_jsons, tail) = buf.scan(scan_size, *seq, *separator, tracker.as_deref_mut());
            *seq += num_jsons;
            *jsons_received += num_jsons;

            buf.set_size(scan_size - tail)?;
            spill.clear();
            if tail > 0 {
                let size = buf.size();
                spill.extend_from_slice(&buf.region()[size..size + tail]);
            }

            if n == 0 {
                debug!("server disconnected; releasing buffer {index}");
                return Ok(());
            }
        }
    }

    /// Shut the session down. A second close reports an error.
    pub fn close(&mut self) -> Result<()> {
        match self.stream.take() {
            // Dropping the stream closes the descriptor.
            Some(_stream) => Ok(()),
            None => Err(Error::client("client was already closed")),
        }
    }

    pub fn jsons_received(&self) -> u64 {
        self.jsons_received
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }
}

/// A client that materialises every record into an owned queue item.
///
/// Owns a single receive buffer for the session. Each sampled record gets
/// two latency stages: the receive time and the pre-enqueue time.
pub struct QueueingClient {
    stream: Option<TcpStream>,
    buffer: Vec<u8>,
    queue: Arc<JsonQueue>,
    separator: u8,
    seq: Seq,
    jsons_received: u64,
    bytes_received: u64,
}

impl QueueingClient {
    pub fn connect(options: &ClientOptions, queue: Arc<JsonQueue>) -> Result<Self> {
        Self::with_buffer_size(options, queue, DEFAULT_TCP_BUFFER_SIZE)
    }

    /// Connect with a custom receive buffer size.
    pub fn with_buffer_size(
        options: &ClientOptions,
        queue: Arc<JsonQueue>,
        buffer_size: usize,
    ) -> Result<Self> {
        if buffer_size == 0 {
            return Err(Error::client("receive buffer size cannot be 0"));
        }
        let stream = connect_stream(options)?;
        Ok(Self {
            stream: Some(stream),
            buffer: vec![0; buffer_size],
            queue,
            separator: options.separator,
            seq: options.seq,
            jsons_received: 0,
            bytes_received: 0,
        })
    }

    /// Receive records, enqueueing each as an owned item.
    pub fn receive_jsons(&mut self, mut tracker: Option<&mut LatencyTracker>) -> Result<()> {
        let Self {
            stream,
            buffer,
            queue,
            separator,
            seq,
            jsons_received,
            bytes_received,
        } = self;
        let stream = stream
            .as_mut()
            .ok_or_else(|| Error::client("client is closed"))?;

        // Carry-over bytes of a record whose separator has not been seen.
        let mut partial: Vec<u8> = Vec::new();

        loop {
            let n = match stream.read(buffer) {
                Ok(n) => n,
                Err(e) => return Err(receive_error(&e)),
            };
            let recv_time = Instant::now();
            *bytes_received += n as u64;

            let valid = &buffer[..n];
            let tail = split_segments(valid, *separator, |segment| {
                if partial.is_empty() && segment.is_empty() {
                    return;
                }
                let json = if partial.is_empty() {
                    String::from_utf8_lossy(segment).into_owned()
                } else {
                    partial.extend_from_slice(segment);
                    let merged = String::from_utf8_lossy(&partial).into_owned();
                    partial.clear();
                    merged
                };
                let pre_queue_time = Instant::now();
                queue.push(JsonItem { seq: *seq, json });
                if let Some(tracker) = tracker.as_deref_mut() {
                    tracker.put(*seq, 0, recv_time);
                    tracker.put(*seq, 1, pre_queue_time);
                }
                *seq += 1;
                *jsons_received += 1;
            });
            if tail > 0 {
                partial.extend_from_slice(&valid[n - tail..]);
            }

            if n == 0 {
                debug!("server disconnected");
                return Ok(());
            }
        }
    }

    /// Shut the session down. A second close reports an error.
    pub fn close(&mut self) -> Result<()> {
        match self.stream.take() {
            Some(_stream) => Ok(()),
            None => Err(Error::client("client was already closed")),
        }
    }

    pub fn jsons_received(&self) -> u64 {
        self.jsons_received
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }
}

/// The two ingestion strategies behind one capability set.
pub enum Client {
    Buffering(BufferingClient),
    Queueing(QueueingClient),
}

impl Client {
    pub fn receive_jsons(&mut self, tracker: Option<&mut LatencyTracker>) -> Result<()> {
        match self {
            Client::Buffering(c) => c.receive_jsons(tracker),
            Client::Queueing(c) => c.receive_jsons(tracker),
        }
    }

    pub fn close(&mut self) -> Result<()> {
        match self {
            Client::Buffering(c) => c.close(),
            Client::Queueing(c) => c.close(),
        }
    }

    pub fn jsons_received(&self) -> u64 {
        match self {
            Client::Buffering(c) => c.jsons_received(),
            Client::Queueing(c) => c.jsons_received(),
        }
    }

    pub fn bytes_received(&self) -> u64 {
        match self {
            Client::Buffering(c) => c.bytes_received(),
            Client::Queueing(c) => c.bytes_received(),
        }
    }
}
