#![allow(dead_code)]

use std::io::Write;
use std::net::TcpListener;
use std::thread::JoinHandle;
use std::time::Duration;

use jetline::error::Result;
use jetline::metrics::StreamMetrics;
use jetline::producer::ProducerOptions;
use jetline::server::{RepeatOptions, ServerOptions, StreamServer};

/// Start a server on an OS-assigned port, streaming `prod_opts` in a
/// background thread. Returns the port and the join handle for the
/// session's metrics.
pub fn spawn_server(
    prod_opts: ProducerOptions,
    repeat_opts: RepeatOptions,
) -> (u16, JoinHandle<Result<StreamMetrics>>) {
    let mut server = StreamServer::create(&ServerOptions {
        port: 0,
        reuse_socket: true,
    })
    .expect("failed to create server");
    let port = server.port();
    let handle = std::thread::spawn(move || {
        let mut metrics = StreamMetrics::default();
        server.send_jsons(&prod_opts, &repeat_opts, &mut metrics)?;
        server.close()?;
        Ok(metrics)
    });
    (port, handle)
}

/// Serve one connection from a plain listener, writing `chunks` with a
/// pause between them, then closing. The pause makes it overwhelmingly
/// likely the client sees each chunk as its own read, though nothing the
/// tests assert depends on it.
pub fn spawn_feeder(chunks: Vec<Vec<u8>>) -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind feeder");
    let port = listener.local_addr().expect("feeder local addr").port();
    let handle = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("feeder accept failed");
        for chunk in chunks {
            stream.write_all(&chunk).expect("feeder write failed");
            stream.flush().ok();
            std::thread::sleep(Duration::from_millis(20));
        }
    });
    (port, handle)
}
