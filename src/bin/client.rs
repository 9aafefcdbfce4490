use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use jetline::buffer::JsonBuffer;
use jetline::client::{BufferingClient, Client, ClientOptions, QueueingClient};
use jetline::constants::{DEFAULT_PORT, DEFAULT_TCP_BUFFER_SIZE};
use jetline::error::Result;
use jetline::latency::LatencyTracker;
use jetline::queue::JsonQueue;

#[derive(Parser)]
#[command(about = "Benchmark client for the jetline stream server")]
struct Args {
    /// Server host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Starting sequence number
    #[arg(long, default_value_t = 0)]
    seq: u64,

    /// Latency samples to keep
    #[arg(long, default_value_t = 1024)]
    samples: usize,

    /// Sample every Nth record
    #[arg(long, default_value_t = 1024)]
    interval: u64,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Leave received bytes in pre-allocated buffers drained by a consumer thread
    Buffer {
        /// Number of receive buffers
        #[arg(short, long, default_value_t = 4)]
        buffers: usize,

        /// Capacity of each buffer in bytes
        #[arg(short, long, default_value_t = DEFAULT_TCP_BUFFER_SIZE)]
        capacity: usize,
    },
    /// Materialise every record into an owned item on a queue
    Queue,
}

struct SessionReport {
    jsons: u64,
    bytes: u64,
    seconds: f64,
}

fn run_buffering(
    opts: &ClientOptions,
    num_buffers: usize,
    capacity: usize,
    tracker: &mut LatencyTracker,
) -> Result<SessionReport> {
    let buffers: Vec<Arc<Mutex<JsonBuffer>>> = (0..num_buffers)
        .map(|_| JsonBuffer::with_capacity(capacity).map(|b| Arc::new(Mutex::new(b))))
        .collect::<Result<_>>()?;

    // Consumer: count records and reset each buffer so the receive loop
    // can reuse it.
    let stop = Arc::new(AtomicBool::new(false));
    let consumer_buffers = buffers.clone();
    let consumer_stop = Arc::clone(&stop);
    let consumer = thread::spawn(move || {
        let mut drained: u64 = 0;
        loop {
            let mut any = false;
            for slot in &consumer_buffers {
                let Ok(mut buf) = slot.try_lock() else { continue };
                if buf.is_empty() {
                    continue;
                }
                drained += buf.num_jsons();
                buf.reset();
                any = true;
            }
            if !any {
                if consumer_stop.load(Ordering::Relaxed) {
                    break;
                }
                thread::sleep(Duration::from_micros(100));
            }
        }
        drained
    });

    let mut client = Client::Buffering(BufferingClient::connect(opts, buffers)?);
    let started = Instant::now();
    let received = client.receive_jsons(Some(tracker));
    let seconds = started.elapsed().as_secs_f64();
    stop.store(true, Ordering::Relaxed);
    let drained = consumer.join().unwrap_or(0);
    received?;
    client.close()?;
    info!("consumer drained {drained} records");

    Ok(SessionReport {
        jsons: client.jsons_received(),
        bytes: client.bytes_received(),
        seconds,
    })
}

fn run_queueing(opts: &ClientOptions, tracker: &mut LatencyTracker) -> Result<SessionReport> {
    let queue = Arc::new(JsonQueue::new());
    let mut client = Client::Queueing(QueueingClient::connect(opts, Arc::clone(&queue))?);
    let started = Instant::now();
    client.receive_jsons(Some(tracker))?;
    let seconds = started.elapsed().as_secs_f64();
    client.close()?;

    let mut drained: u64 = 0;
    while queue.pop().is_some() {
        drained += 1;
    }
    info!("queue held {drained} records");

    Ok(SessionReport {
        jsons: client.jsons_received(),
        bytes: client.bytes_received(),
        seconds,
    })
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    let i = ((p / 100.0) * sorted.len() as f64) as usize;
    sorted[i.min(sorted.len() - 1)]
}

/// Report receive-to-enqueue intervals when the tracker carries two
/// stages.
fn report_latency(tracker: &LatencyTracker, received: u64) {
    if tracker.num_stages() < 2 || received == 0 {
        return;
    }
    let sampled = ((received - 1) / tracker.sample_interval() + 1) as usize;
    let written = sampled.min(tracker.num_samples());
    let mut samples: Vec<f64> = (0..written)
        .filter_map(|i| tracker.interval(i, 1).ok())
        .map(|s| s * 1e6)
        .collect();
    if samples.is_empty() {
        return;
    }
    samples.sort_by(f64::total_cmp);
    info!("receive-to-enqueue latency over {} samples:", samples.len());
    info!(
        "  p50 {:.1}us  p95 {:.1}us  p99 {:.1}us  max {:.1}us",
        percentile(&samples, 50.0),
        percentile(&samples, 95.0),
        percentile(&samples, 99.0),
        samples[samples.len() - 1],
    );
}

fn run(args: &Args) -> Result<()> {
    let opts = ClientOptions {
        host: args.host.clone(),
        port: args.port,
        seq: args.seq,
        ..Default::default()
    };

    let (tracker, report) = match args.command.as_ref().unwrap_or(&Command::Queue) {
        Command::Buffer { buffers, capacity } => {
            let mut tracker = LatencyTracker::new(args.samples, 1, args.interval);
            let report = run_buffering(&opts, *buffers, *capacity, &mut tracker)?;
            (tracker, report)
        }
        Command::Queue => {
            let mut tracker = LatencyTracker::new(args.samples, 2, args.interval);
            let report = run_queueing(&opts, &mut tracker)?;
            (tracker, report)
        }
    };

    info!(
        "Received {} JSONs ({} bytes) in {:.4} seconds.",
        report.jsons, report.bytes, report.seconds
    );
    if report.seconds > 0.0 {
        info!("  {:.1} JSON/s (avg).", report.jsons as f64 / report.seconds);
        info!(
            "  {:.2} gigabits/second (avg).",
            report.bytes as f64 * 8.0 * 1e-9 / report.seconds
        );
    }
    report_latency(&tracker, report.jsons);
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
