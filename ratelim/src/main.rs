use anyhow::Result;
use clap::Parser;
use tracing::instrument;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "ratelim",
    version,
    about = "Copy lines from stdin to stdout at a limited rate",
    long_about = "`ratelim` copies lines from stdin to stdout, admitting them at a given number of lines per second.

The rate can be changed while it runs by sending the new rate in the body of an HTTP request to the control port.

EXAMPLE:
    # Replay a log at 5 lines per second, 2 lines at a time, controllable on port 8080
    cat app.log | ratelim --port 8080 --batch-size 2 5

    # Pause, then speed up
    curl -d 0 http://localhost:8080/
    curl -d 50 http://localhost:8080/"
)]
struct Args {
    // Pipeline options
    /// Lines admitted per batch
    ///
    /// One batch is released per tick, so the effective line rate is RATE times this value.
    #[arg(
        short = 'b',
        long,
        alias = "batchsize",
        default_value = "1",
        value_name = "N",
        help_heading = "Pipeline options"
    )]
    batch_size: std::num::NonZeroUsize,

    // Control endpoint
    /// Port to listen on for rate changes, 0 means no control endpoint
    #[arg(
        short = 'p',
        long,
        default_value = "0",
        value_name = "PORT",
        help_heading = "Control endpoint"
    )]
    port: u16,

    /// Address the control endpoint binds to
    #[arg(
        long,
        default_value = "0.0.0.0",
        value_name = "ADDR",
        help_heading = "Control endpoint"
    )]
    bind: std::net::IpAddr,

    // Progress & output
    /// Verbose level: -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Print summary at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    // Advanced settings
    /// Number of worker threads, 0 means number of cores
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads, 0 means Tokio runtime default (512)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,

    // ARGUMENTS
    /// Initial rate in batches per second, 0 starts paused
    #[arg(allow_negative_numbers = true)]
    rate: throttle::Rate,
}

#[instrument]
async fn async_main(config: common::PipelineConfig) -> Result<common::Summary> {
    let reader = tokio::io::BufReader::new(tokio::io::stdin());
    let writer = tokio::io::stdout();
    common::pipeline::run(config, reader, writer).await
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config =
        common::PipelineConfig::new(args.rate).with_control_port(args.bind, args.port);
    config.batch_size = args.batch_size;
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let res = common::run(output, runtime, || async_main(config));
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
