//! Configuration types for runtime and pipeline settings

/// Runtime configuration for tokio and thread pools
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = number of CPU cores)
    pub max_workers: usize,
    /// Number of blocking threads (0 = tokio default of 512)
    pub max_blocking_threads: usize,
}

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Suppress error output
    pub quiet: bool,
    /// Verbosity level: 0=ERROR, 1=INFO, 2=DEBUG, 3=TRACE
    pub verbose: u8,
    /// Print summary statistics at the end
    pub print_summary: bool,
}

impl OutputConfig {
    /// Log level used when `RUST_LOG` is not set
    pub fn default_level(&self) -> tracing_subscriber::filter::LevelFilter {
        use tracing_subscriber::filter::LevelFilter;
        if self.quiet {
            return LevelFilter::OFF;
        }
        match self.verbose {
            0 => LevelFilter::ERROR,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }
}

/// Line pipeline configuration, already validated by the caller
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Rate at startup, zero starts paused
    pub initial_rate: throttle::Rate,
    /// Items released per permit
    pub batch_size: std::num::NonZeroUsize,
    /// Where the control endpoint listens (None = no control endpoint)
    pub control_addr: Option<std::net::SocketAddr>,
}

impl PipelineConfig {
    pub fn new(initial_rate: throttle::Rate) -> Self {
        Self {
            initial_rate,
            batch_size: std::num::NonZeroUsize::MIN,
            control_addr: None,
        }
    }

    /// Builds the control address from a port, where 0 disables the endpoint.
    pub fn with_control_port(mut self, ip: std::net::IpAddr, port: u16) -> Self {
        self.control_addr = if port == 0 {
            None
        } else {
            Some(std::net::SocketAddr::new(ip, port))
        };
        self
    }
}
