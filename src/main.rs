use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use jetline::constants::DEFAULT_PORT;
use jetline::document::{GenerateOptions, Schema};
use jetline::error::{Error, Result};
use jetline::producer::ProducerOptions;
use jetline::server::{run_server, RepeatOptions, ServerOptions};

#[derive(Parser)]
#[command(about = "Stream schema-shaped random JSONs to a single TCP client")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Set the address-reuse socket option
    #[arg(long)]
    reuse: bool,

    /// JSON file describing the record shape (defaults to a single u64 field)
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Records per batch
    #[arg(short = 'n', long, default_value_t = 1)]
    jsons: u64,

    /// Number of batches; batching mode is enabled when > 1
    #[arg(short = 'b', long, default_value_t = 1)]
    batches: u64,

    /// Producer threads
    #[arg(short = 't', long, default_value_t = 1)]
    threads: usize,

    /// Generator seed
    #[arg(short, long, default_value_t = 0)]
    seed: u64,

    /// Pretty-print the documents
    #[arg(long)]
    pretty: bool,

    /// Echo every batch to stdout
    #[arg(short, long)]
    verbose: bool,

    /// Repeat the workload this many times
    #[arg(long, default_value_t = 1)]
    repeat: u64,

    /// Interval between repetitions in milliseconds
    #[arg(long, default_value_t = 250)]
    interval: u64,

    /// Log production and streaming statistics
    #[arg(long)]
    statistics: bool,
}

fn load_schema(path: &Path) -> Result<Schema> {
    let text = std::fs::read_to_string(path).map_err(Error::Io)?;
    serde_json::from_str(&text).map_err(|e| Error::Cli(format!("invalid schema file: {e}")))
}

fn run(args: &Args) -> Result<()> {
    let schema = match &args.schema {
        Some(path) => load_schema(path)?,
        None => Schema::default(),
    };

    let prod_opts = ProducerOptions {
        generate: GenerateOptions { seed: args.seed },
        schema,
        num_jsons: args.jsons,
        num_threads: args.threads.max(1),
        batching: args.batches > 1,
        num_batches: args.batches,
        pretty: args.pretty,
        verbose: args.verbose,
        ..Default::default()
    };
    let server_opts = ServerOptions {
        port: args.port,
        reuse_socket: args.reuse,
    };
    let repeat_opts = RepeatOptions {
        times: args.repeat.max(1),
        interval_ms: args.interval,
    };

    run_server(&server_opts, &prod_opts, &repeat_opts, args.statistics)
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
