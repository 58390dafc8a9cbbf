use log::LevelFilter;
use serde::Deserialize;
use std::convert::TryFrom;
use std::fmt;
use std::time::Duration;

/// Verbosity of the bundled logger.
///
/// `Fatal` is kept for compatibility with existing deployments; it logs the
/// same records as `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn filter(self) -> LevelFilter {
        match self {
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Error | LogLevel::Fatal => LevelFilter::Error,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// Configuration for the HTTP server.
///
/// This struct contains the service options, the worker pool sizing and the
/// hyper connection options for both HTTP/1.x and HTTP/2 (when the "http2"
/// feature is enabled). It can be initialized from environment variables
/// with the "BITROUTE_" prefix or from a config file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server host address. Defaults to "0.0.0.0".
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port number. Defaults to 8080.
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub log_level: LogLevel,
    /// Maximum number of worker threads. Defaults to CPU count * 15.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Keep-alive duration in seconds for worker threads. Defaults to 10 seconds.
    #[serde(default = "default_keep_alive_secs")]
    pub worker_keep_alive_secs: u64,
    /// Largest accepted request body in bytes. Defaults to 4 MiB.
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
    /// Answer OPTIONS requests for known paths automatically.
    #[serde(default)]
    pub options_replies: bool,
    #[serde(default = "default_true")]
    pub http1_keep_alive: bool,
    #[serde(default)]
    pub http1_half_close: bool,
    /// Maximum buffer size for HTTP/1.x requests. Defaults to 512kb (524,288 bytes).
    #[serde(default = "default_max_buf_size")]
    pub http1_max_buf_size: usize,
    #[serde(default)]
    pub http1_pipeline_flush: bool,
    #[serde(default = "default_true")]
    pub http1_writev: bool,
    #[serde(default)]
    pub http1_title_case_headers: bool,
    #[serde(default)]
    pub http1_preserve_header_case: bool,
    #[serde(default)]
    pub http1_only: bool,
    #[cfg(feature = "http2")]
    #[serde(default)]
    pub http2_only: bool,
    #[cfg(feature = "http2")]
    #[serde(default)]
    pub http2_initial_stream_window_size: Option<u32>,
    #[cfg(feature = "http2")]
    #[serde(default)]
    pub http2_initial_connection_window_size: Option<u32>,
    #[cfg(feature = "http2")]
    #[serde(default = "default_true")]
    pub http2_adaptive_window: bool,
    #[cfg(feature = "http2")]
    #[serde(default)]
    pub http2_max_frame_size: Option<u32>,
    #[cfg(feature = "http2")]
    #[serde(default)]
    pub http2_max_concurrent_streams: Option<u32>,
    #[cfg(feature = "http2")]
    #[serde(default = "default_max_buf_size")]
    pub http2_max_send_buf_size: usize,
}

/// Implements conversion from the config crate's Config type to ServerConfig.
impl TryFrom<config::Config> for ServerConfig {
    type Error = config::ConfigError;

    fn try_from(config: config::Config) -> Result<Self, Self::Error> {
        config.try_deserialize()
    }
}

impl ServerConfig {
    /// Creates a new ServerConfig instance from environment variables and config file.
    ///
    /// This method will:
    /// 1. Load environment variables from a .env file if present
    /// 2. Load configuration from a "config" file (if it exists)
    /// 3. Override with environment variables prefixed with "BITROUTE_"
    ///
    /// # Errors
    /// Returns a ConfigError if configuration loading or parsing fails.
    pub fn new() -> Result<Self, config::ConfigError> {
        dotenv::dotenv().ok();

        let builder = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("BITROUTE").try_parsing(true));

        builder.build()?.try_into()
    }

    /// Converts the worker_keep_alive_secs value into a Duration.
    pub fn worker_keep_alive(&self) -> Duration {
        Duration::from_secs(self.worker_keep_alive_secs)
    }

    /// The `host:port` pair to bind.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_max_workers() -> usize {
    num_cpus::get() * 15
}

fn default_keep_alive_secs() -> u64 {
    10
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_body_size() -> usize {
    4 * 1024 * 1024
}

/// Default maximum buffer size (512kb).
fn default_max_buf_size() -> usize {
    524_288
}

fn default_true() -> bool {
    true
}

/// Provides default values for all configuration options.
impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: LogLevel::default(),
            max_workers: default_max_workers(),
            worker_keep_alive_secs: default_keep_alive_secs(),
            max_body_size: default_max_body_size(),
            options_replies: false,
            http1_keep_alive: true,
            http1_half_close: false,
            http1_max_buf_size: default_max_buf_size(),
            http1_pipeline_flush: false,
            http1_writev: true,
            http1_title_case_headers: false,
            http1_preserve_header_case: false,
            http1_only: false,
            #[cfg(feature = "http2")]
            http2_only: false,
            #[cfg(feature = "http2")]
            http2_initial_stream_window_size: None,
            #[cfg(feature = "http2")]
            http2_initial_connection_window_size: None,
            #[cfg(feature = "http2")]
            http2_adaptive_window: true,
            #[cfg(feature = "http2")]
            http2_max_frame_size: None,
            #[cfg(feature = "http2")]
            http2_max_concurrent_streams: None,
            #[cfg(feature = "http2")]
            http2_max_send_buf_size: default_max_buf_size(),
        }
    }
}
