use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;

use crate::config::{self, AcquisitionConfig, DEFAULT_NAME_FILTER};
use crate::delivery::{HttpDelivery, LogDelivery, ReportSink};
use crate::error::{ConfigError, FixtureError};
use crate::hw::{DEFAULT_CHUNK_SIZE, FakeBackendConfig, ScanFixture};

/// Command-line options for the BMS polling tool.
#[derive(Debug, Parser)]
#[command(
    name = "bmspoll",
    about = "Poll Xiaoxiang/JBD battery management systems over BLE."
)]
pub struct Args {
    /// Log verbosity; overrides `RUST_LOG`.
    #[arg(long, global = true, env = "BMSPOLL_LOG_LEVEL", value_enum)]
    log_level: Option<LogLevel>,
    /// Output format; defaults to `pretty` on a terminal and `json` otherwise.
    #[arg(long, global = true, env = "BMSPOLL_OUTPUT", value_enum)]
    output: Option<OutputFormat>,
    /// Uses the fake BLE backend with fixture-driven devices.
    #[arg(long, global = true)]
    fake: bool,
    /// Fake devices in the form `adapter|address|name|rssi[|behaviour];...`.
    #[arg(long, global = true, requires = "fake", required_if_eq("fake", "true"))]
    fake_scan: Option<ScanFixture>,
    /// Notification size used by fake devices.
    #[arg(long, global = true, requires = "fake")]
    fake_chunk_size: Option<usize>,
    /// Artificial fake scan delay (e.g. `250ms`, `2s`).
    #[arg(long, global = true, requires = "fake", value_parser = parse_duration)]
    fake_discovery_delay: Option<Duration>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing.
    ///
    /// ```
    /// use bmspoll::{Args, Command, DecodeArgs};
    ///
    /// let args = Args::new(Command::Decode(DecodeArgs::new("DD 04 00 00 00 00 77")));
    /// let _ = args;
    /// ```
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            log_level: None,
            output: None,
            fake: false,
            fake_scan: None,
            fake_chunk_size: None,
            fake_discovery_delay: None,
            command,
        }
    }

    /// Returns the requested log level, if any.
    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    /// Returns the requested output format, if any.
    #[must_use]
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output
    }

    /// Splits parsed CLI arguments into command and optional fake-client settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the fake backend is enabled without a fixture.
    pub fn into_command_and_fake_args(self) -> anyhow::Result<(Command, Option<FakeArgs>)> {
        let Args {
            fake,
            fake_scan,
            fake_chunk_size,
            fake_discovery_delay,
            command,
            ..
        } = self;

        let fake_args = if fake {
            let Some(scan_fixture) = fake_scan else {
                return Err(ConfigError::MissingFakeScanFixture.into());
            };
            Some(FakeArgs {
                scan_fixture,
                chunk_size: fake_chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
                discovery_delay: fake_discovery_delay.unwrap_or(Duration::ZERO),
            })
        } else {
            None
        };

        Ok((command, fake_args))
    }
}

/// Fake backend arguments for programmatic runs.
///
/// ```
/// let fake = bmspoll::FakeArgs::builder()
///     .scan_fixture("hci0|AA:01|xiaoxiang-1|-40|silent")?
///     .build();
/// let _ = fake;
/// # Ok::<(), bmspoll::FixtureError>(())
/// ```
#[derive(Debug, Builder)]
pub struct FakeArgs {
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    scan_fixture: ScanFixture,
    #[builder(default = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,
    #[builder(default)]
    discovery_delay: Duration,
}

impl FakeArgs {
    pub(crate) fn into_backend_config(self) -> FakeBackendConfig {
        let Self {
            scan_fixture,
            chunk_size,
            discovery_delay,
        } = self;

        FakeBackendConfig::builder()
            .scan_fixture(scan_fixture)
            .chunk_size(chunk_size)
            .discovery_delay(discovery_delay)
            .build()
    }
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one discovery pass and list matching devices.
    Scan(ScanArgs),
    /// Run exactly one acquisition round, print the report, and deliver it.
    Poll(RoundArgs),
    /// Run acquisition rounds until interrupted with Ctrl+C.
    Run(RoundArgs),
    /// Reassemble, validate, and decode one captured response frame.
    Decode(DecodeArgs),
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Scan(_) => "scan",
            Self::Poll(_) => "poll",
            Self::Run(_) => "run",
            Self::Decode(_) => "decode",
        }
    }
}

/// Arguments for `scan`.
#[derive(Debug, Clone, clap::Args)]
pub struct ScanArgs {
    /// Case-insensitive substring matched against advertised names.
    #[arg(long, env = "BMSPOLL_NAME_FILTER", default_value = DEFAULT_NAME_FILTER)]
    name_filter: String,
    /// Length of the scan window.
    #[arg(long, env = "BMSPOLL_SCAN_WINDOW", default_value = "10s", value_parser = parse_duration)]
    scan_window: Duration,
}

impl ScanArgs {
    /// Creates scan arguments with the default name filter and window.
    #[must_use]
    pub fn new() -> Self {
        Self {
            name_filter: DEFAULT_NAME_FILTER.to_string(),
            scan_window: Duration::from_secs(10),
        }
    }

    pub(crate) fn name_filter(&self) -> &str {
        &self.name_filter
    }

    pub(crate) fn scan_window(&self) -> Duration {
        self.scan_window
    }
}

impl Default for ScanArgs {
    fn default() -> Self {
        Self::new()
    }
}

/// Acquisition and delivery arguments shared by `poll` and `run`.
#[derive(Debug, Clone, clap::Args)]
pub struct RoundArgs {
    #[command(flatten)]
    acquisition: AcquisitionArgs,
    #[command(flatten)]
    delivery: DeliveryArgs,
}

impl RoundArgs {
    /// Uses default timing and the log-only delivery.
    #[must_use]
    pub fn new(acquisition: AcquisitionArgs) -> Self {
        Self {
            acquisition,
            delivery: DeliveryArgs::default(),
        }
    }

    /// Builds the validated acquisition configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn config(&self) -> Result<AcquisitionConfig, ConfigError> {
        self.acquisition.config()
    }

    pub(crate) fn report_sink(&self) -> Result<Arc<dyn ReportSink>, ConfigError> {
        self.delivery.report_sink()
    }
}

/// Timing and matching flags mapped onto [`AcquisitionConfig`].
#[derive(Debug, Clone, clap::Args, Builder)]
pub struct AcquisitionArgs {
    /// Case-insensitive substring matched against advertised names.
    #[arg(long, env = "BMSPOLL_NAME_FILTER", default_value = DEFAULT_NAME_FILTER)]
    #[builder(into, default = DEFAULT_NAME_FILTER.to_string())]
    name_filter: String,
    /// Delay between requests to one device.
    #[arg(long, env = "BMSPOLL_TICK_INTERVAL", default_value = "5s", value_parser = parse_duration)]
    #[builder(default = Duration::from_secs(5))]
    tick_interval: Duration,
    /// Requests sent to each device per round.
    #[arg(long, env = "BMSPOLL_TICKS", default_value_t = 6)]
    #[builder(default = 6)]
    ticks: u32,
    /// How long one request waits for its response.
    #[arg(long, env = "BMSPOLL_RESPONSE_TIMEOUT", default_value = "4s", value_parser = parse_duration)]
    #[builder(default = Duration::from_secs(4))]
    response_timeout: Duration,
    /// Length of each discovery scan.
    #[arg(long, env = "BMSPOLL_SCAN_WINDOW", default_value = "10s", value_parser = parse_duration)]
    #[builder(default = Duration::from_secs(10))]
    scan_window: Duration,
    /// Wait before rescanning when nothing was found.
    #[arg(long, env = "BMSPOLL_DISCOVERY_RETRY", default_value = "30s", value_parser = parse_duration)]
    #[builder(default = Duration::from_secs(30))]
    discovery_retry: Duration,
    /// Wait between rounds unless the delivery endpoint asks for another.
    #[arg(long, env = "BMSPOLL_POLL_INTERVAL", default_value = "60s", value_parser = parse_duration)]
    #[builder(default = Duration::from_secs(60))]
    poll_interval: Duration,
    /// Extra time past the nominal session length before sessions are cancelled.
    #[arg(long, env = "BMSPOLL_SESSION_GRACE", default_value = "10s", value_parser = parse_duration)]
    #[builder(default = Duration::from_secs(10))]
    session_grace: Duration,
}

impl AcquisitionArgs {
    /// Builds the validated acquisition configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroTicks`] when `--ticks` is zero.
    pub fn config(&self) -> Result<AcquisitionConfig, ConfigError> {
        AcquisitionConfig::builder()
            .name_filter(self.name_filter.clone())
            .tick_interval(self.tick_interval)
            .ticks_per_session(self.ticks)
            .response_timeout(self.response_timeout)
            .discovery_timeout(self.scan_window)
            .discovery_retry_interval(self.discovery_retry)
            .default_poll_interval(self.poll_interval)
            .session_grace(self.session_grace)
            .build()
            .validate()
    }
}

/// Where round reports go.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct DeliveryArgs {
    /// HTTP endpoint receiving reports; without one, reports are only logged.
    #[arg(long, env = "BMSPOLL_ENDPOINT")]
    endpoint: Option<String>,
    /// File holding the endpoint's authorization token.
    #[arg(long, env = "BMSPOLL_TOKEN_FILE", requires = "endpoint")]
    token_file: Option<PathBuf>,
}

impl DeliveryArgs {
    fn report_sink(&self) -> Result<Arc<dyn ReportSink>, ConfigError> {
        let Some(endpoint) = &self.endpoint else {
            return Ok(Arc::new(LogDelivery));
        };
        let token_path = match &self.token_file {
            Some(path) => path.clone(),
            None => config::default_token_path()?,
        };
        let token = config::read_token(&token_path)?;
        Ok(Arc::new(HttpDelivery::new(endpoint.clone(), token)))
    }
}

/// Arguments for `decode`.
#[derive(Debug, Clone, clap::Args)]
pub struct DecodeArgs {
    /// Captured response frame as hex; whitespace and `:` separators are ignored.
    frame: String,
}

impl DecodeArgs {
    #[must_use]
    pub fn new(frame: impl Into<String>) -> Self {
        Self {
            frame: frame.into(),
        }
    }

    pub(crate) fn frame(&self) -> &str {
        &self.frame
    }
}

/// Log verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub(crate) fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::OFF,
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

/// Rendering of command results on stdout.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Json,
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}
