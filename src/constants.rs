//! Shared protocol and operational constants.

use std::time::Duration;

/// Default TCP port the server listens on and clients connect to.
pub const DEFAULT_PORT: u16 = 10197;

/// Default client receive buffer size (bytes).
pub const DEFAULT_TCP_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Record separator appended after every serialised document.
pub const DEFAULT_SEPARATOR: u8 = b'\n';

/// Sleep between failed non-blocking queue or buffer acquisition attempts.
pub const BACKOFF: Duration = Duration::from_micros(100);

/// Listen backlog for the server socket.
pub const LISTEN_BACKLOG: i32 = 1024;

/// Seed increment between repetitions, so each repetition produces
/// different bytes.
pub const REPEAT_SEED_STRIDE: u64 = 42;

/// Default capacity of the bounded batch queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

// Compile-time sanity checks
const _: () = assert!(DEFAULT_QUEUE_CAPACITY >= 1, "batch queue capacity must be at least 1");
const _: () = assert!(DEFAULT_TCP_BUFFER_SIZE >= 1, "receive buffer cannot be empty");
