//! TCP streaming server: drains the batch queue onto one accepted peer.
//!
//! One server lifetime is a small state machine: create (bind + listen),
//! accept exactly one client, repeat the produce/send cycle, close. The
//! send loop and the producer pool share an atomic shutdown flag; the
//! SIGINT handler sets a process-wide interrupt the same loops observe.

use std::io::Write;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use crate::constants::{BACKOFF, DEFAULT_PORT, LISTEN_BACKLOG, REPEAT_SEED_STRIDE};
use crate::error::{Error, Result};
use crate::metrics::StreamMetrics;
use crate::producer::{ProducerOptions, ProducerPool};
use crate::queue::{BatchQueue, JsonBatch};

/// Server connection options.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// TCP port to listen on; 0 lets the OS pick one.
    pub port: u16,
    /// Set the address-reuse socket option before binding.
    pub reuse_socket: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            reuse_socket: false,
        }
    }
}

/// Repeat mode options.
#[derive(Debug, Clone)]
pub struct RepeatOptions {
    /// Number of times to repeat sending.
    pub times: u64,
    /// Interval between repetitions in milliseconds.
    pub interval_ms: u64,
}

impl Default for RepeatOptions {
    fn default() -> Self {
        Self {
            times: 1,
            interval_ms: 250,
        }
    }
}

/// Process-wide interrupt flag set by the SIGINT handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(_signal: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Install the SIGINT handler without SA_RESTART, so a blocking `accept`
/// returns EINTR and the server can exit gracefully instead of hanging.
fn install_sigint_handler() {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handle_sigint as libc::sighandler_t;
        libc::sigemptyset(&mut action.sa_mask);
        action.sa_flags = 0;
        libc::sigaction(libc::SIGINT, &action, std::ptr::null_mut());
    }
}

fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// A streaming server for records over raw TCP.
pub struct StreamServer {
    listener: Option<Socket>,
    port: u16,
}

impl StreamServer {
    /// Bind `0.0.0.0:port` and start listening.
    pub fn create(options: &ServerOptions) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| Error::server(format!("failed to create socket: {e}")))?;
        if options.reuse_socket {
            socket
                .set_reuse_address(true)
                .map_err(|e| Error::server(format!("failed to set address reuse: {e}")))?;
        }
        let addr = std::net::SocketAddrV4::new(std::net::Ipv4Addr::UNSPECIFIED, options.port);
        socket
            .bind(&addr.into())
            .map_err(|e| Error::server(format!("failed to bind port {}: {e}", options.port)))?;
        socket
            .listen(LISTEN_BACKLOG)
            .map_err(|e| Error::server(format!("failed to listen: {e}")))?;
        let port = socket
            .local_addr()
            .ok()
            .and_then(|a| a.as_socket())
            .map(|a| a.port())
            .unwrap_or(options.port);
        info!("Listening on port {port}...");
        Ok(Self {
            listener: Some(socket),
            port,
        })
    }

    /// The bound port. Useful when created with port 0.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Accept one client and stream `repeat_opts.times` repetitions of the
    /// configured workload to it, accumulating metrics per repetition.
    pub fn send_jsons(
        &mut self,
        prod_opts: &ProducerOptions,
        repeat_opts: &RepeatOptions,
        metrics: &mut StreamMetrics,
    ) -> Result<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| Error::server("server is not listening; use StreamServer::create"))?;

        install_sigint_handler();
        info!("Waiting for client to connect...");
        let mut stream = match listener.accept() {
            Ok((socket, _addr)) => TcpStream::from(socket),
            Err(_) if interrupted() => {
                warn!("Interrupted while waiting for a client; exiting.");
                return Ok(());
            }
            Err(e) => return Err(Error::server(format!("accept failed: {e}"))),
        };
        info!("Client connected.");

        info!("Streaming JSONs...");
        if repeat_opts.times > 1 {
            info!(
                "Repeating {} times, interval {} ms (+ production time).",
                repeat_opts.times, repeat_opts.interval_ms
            );
        }

        let queue = Arc::new(BatchQueue::with_capacity(prod_opts.queue_capacity)?);
        let mut opts = prod_opts.clone();

        for repetition in 0..repeat_opts.times {
            let shutdown = Arc::new(AtomicBool::new(false));
            let mut pool = ProducerPool::new(&opts);
            pool.start(Arc::clone(&queue), Arc::clone(&shutdown))?;

            let started = Instant::now();
            let send_result = drain_queue(&queue, &mut stream, &shutdown, &opts);
            // Release any worker still in backoff, then join them all
            // before surfacing a send error, so none outlives this call.
            shutdown.store(true, Ordering::Relaxed);
            let produced = pool.finish();

            let tally = send_result?;
            metrics.num_messages += tally.num_messages;
            metrics.num_bytes += tally.num_bytes;
            metrics.time += started.elapsed().as_secs_f64();
            metrics.producer += produced?;
            debug!("repetition {repetition} complete");

            if interrupted() {
                warn!("Interrupted; stopping after repetition {repetition}.");
                break;
            }
            if repetition + 1 < repeat_opts.times {
                thread::sleep(Duration::from_millis(repeat_opts.interval_ms));
                // The next repetition produces different bytes.
                opts.generate.seed += REPEAT_SEED_STRIDE;
            }
        }
        Ok(())
    }

    /// Stop listening. A second close reports an error.
    pub fn close(&mut self) -> Result<()> {
        match self.listener.take() {
            // Dropping the socket closes the descriptor.
            Some(_listener) => Ok(()),
            None => Err(Error::server("server was already closed")),
        }
    }
}

struct SendTally {
    num_messages: u64,
    num_bytes: u64,
}

/// Pull batches until exactly the configured record count has been sent or
/// shutdown fires. Every batch goes out with a single complete write.
fn drain_queue(
    queue: &BatchQueue,
    stream: &mut TcpStream,
    shutdown: &AtomicBool,
    opts: &ProducerOptions,
) -> Result<SendTally> {
    let total = opts.total_jsons();
    let log_every = (total / 10).max(1);
    let mut tally = SendTally {
        num_messages: 0,
        num_bytes: 0,
    };
    let mut color = false;

    while tally.num_messages != total && !shutdown.load(Ordering::Relaxed) {
        // Pop a batch, watching the peer while the queue is empty.
        let batch = loop {
            if let Some(batch) = queue.try_dequeue() {
                break batch;
            }
            if interrupted() {
                shutdown.store(true, Ordering::Relaxed);
            }
            if shutdown.load(Ordering::Relaxed) {
                return Ok(tally);
            }
            thread::sleep(BACKOFF);
            if !peer_alive(stream) {
                shutdown.store(true, Ordering::Relaxed);
                return Err(Error::server("client socket error while waiting for batches"));
            }
        };

        stream.write_all(&batch.data).map_err(|e| {
            shutdown.store(true, Ordering::Relaxed);
            Error::server(format!("send failed: {e}"))
        })?;

        if opts.verbose {
            echo_batch(&batch, color);
            color = !color;
        }

        tally.num_messages += batch.num_jsons;
        tally.num_bytes += batch.data.len() as u64;

        if tally.num_messages % log_every < batch.num_jsons {
            info!(
                "{:3.0}% | {}/{}",
                tally.num_messages as f64 / total as f64 * 100.0,
                tally.num_messages,
                total
            );
        }
    }
    Ok(tally)
}

/// Probe whether the peer is still connected. The client never sends, so a
/// successful zero-byte peek means an orderly shutdown from the other
/// side.
fn peer_alive(stream: &TcpStream) -> bool {
    if let Ok(Some(_)) = stream.take_error() {
        return false;
    }
    if stream.set_nonblocking(true).is_err() {
        return false;
    }
    let mut probe = [0u8; 1];
    let alive = match stream.peek(&mut probe) {
        Ok(0) => false,
        Ok(_) => true,
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => true,
        Err(_) => false,
    };
    let _ = stream.set_nonblocking(false);
    alive
}

/// Echo a batch to stdout, alternating colours per batch.
fn echo_batch(batch: &JsonBatch, color: bool) {
    let text = String::from_utf8_lossy(&batch.data);
    print!(
        "{}{}\x1b[39m",
        if color { "\x1b[34m" } else { "\x1b[35m" },
        text
    );
}

/// Create a server, stream the configured workload, log statistics and
/// close.
pub fn run_server(
    server_opts: &ServerOptions,
    prod_opts: &ProducerOptions,
    repeat_opts: &RepeatOptions,
    statistics: bool,
) -> Result<()> {
    info!("Starting server...");
    let mut server = StreamServer::create(server_opts)?;
    let mut metrics = StreamMetrics::default();
    server.send_jsons(prod_opts, repeat_opts, &mut metrics)?;
    if statistics {
        metrics.log(prod_opts.num_threads);
    }
    info!("Server shutting down...");
    server.close()?;
    Ok(())
}
