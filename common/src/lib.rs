//! Line pipeline and runtime plumbing shared by the ratelim tools
//!
//! The pipeline reads lines from an input, admits them at the pace set by a
//! [`throttle::RateGate`] and writes them out unchanged:
//!
//! ```text
//! RateGate --permit--> ItemSource --items--> ItemSink
//!    ^
//!    '--- rate changes --- ControlEndpoint (optional)
//! ```
//!
//! All channels hold at most one message, so a slow writer slows the reader down and permits
//! never pile up.
//!
//! # Modules
//!
//! - [`source`] - batches input lines, one batch per permit, and closes the stream at end of input
//! - [`sink`] - writes admitted lines in order
//! - [`control`] - HTTP endpoint delivering rate changes to the gate
//! - [`pipeline`] - wires the above together
//! - [`config`] - runtime, output and pipeline settings
//!
//! [`run`] sets up logging and the tokio runtime for a binary and drives its async main.

pub mod config;
pub mod control;
pub mod error;
pub mod pipeline;
pub mod sink;
pub mod source;

pub use config::{OutputConfig, PipelineConfig, RuntimeConfig};
pub use error::Error;
pub use pipeline::Summary;

/// One line of input, including its trailing newline when present.
pub type Item = Vec<u8>;

fn init_tracing(output: &OutputConfig) {
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(output.default_level().into())
        .from_env_lossy();
    // stdout carries the data, logs go to stderr
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to set up logging: {error}");
    }
}

/// Runs `func` to completion on a freshly built tokio runtime.
///
/// Returns `None` if the runtime could not be built or `func` failed; the error has been
/// logged by then. On success the summary is printed to stderr when requested.
pub fn run<Fut, S>(
    output: OutputConfig,
    runtime: RuntimeConfig,
    func: impl FnOnce() -> Fut,
) -> Option<S>
where
    Fut: std::future::Future<Output = anyhow::Result<S>>,
    S: std::fmt::Display,
{
    init_tracing(&output);
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    let runtime = match builder.build() {
        Ok(runtime) => runtime,
        Err(error) => {
            tracing::error!("failed to start tokio runtime: {}", error);
            return None;
        }
    };
    let res = runtime.block_on(func());
    // a blocking stdin read can outlive the pipeline, don't wait for it
    runtime.shutdown_background();
    match res {
        Ok(summary) => {
            if output.print_summary {
                eprintln!("{summary}");
            }
            Some(summary)
        }
        Err(error) => {
            tracing::error!("{:#}", error);
            None
        }
    }
}
