//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "readthrough";
const ENV_PREFIX: &str = "READTHROUGH";
const DEFAULT_TTL_MS: u64 = 5 * 60 * 1000;
const DEFAULT_PAGE_TTL_MS: u64 = 60 * 1000;
const DEFAULT_BATCH_DELAY_MS: u64 = 10;
const DEFAULT_PROBE_REQUESTS: u32 = 64;
const DEFAULT_PROBE_GROUPS: u32 = 4;
const DEFAULT_PROBE_LATENCY_MS: u64 = 5;
const DEFAULT_PROBE_FAIL_EVERY: u32 = 7;

/// Command-line arguments for the readthrough binary.
#[derive(Debug, Parser)]
#[command(
    name = "readthrough",
    version,
    about = "Read-through cache and request batching engine"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "READTHROUGH_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a synthetic workload against an engine and print its statistics.
    Probe(ProbeArgs),
}

impl CliArgs {
    /// The selected command, defaulting to `probe`.
    pub fn command_or_default(&self) -> Command {
        self.command
            .clone()
            .unwrap_or_else(|| Command::Probe(ProbeArgs::default()))
    }
}

#[derive(Debug, Args, Clone)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub overrides: EngineOverrides,

    /// Number of keys read through the cache (each is read twice).
    #[arg(long, default_value_t = DEFAULT_PROBE_REQUESTS)]
    pub requests: u32,

    /// Number of batch groups the batched reads are spread over.
    #[arg(long, default_value_t = DEFAULT_PROBE_GROUPS)]
    pub groups: u32,

    /// Simulated backend latency per fetch, in milliseconds.
    #[arg(long = "latency-ms", default_value_t = DEFAULT_PROBE_LATENCY_MS)]
    pub latency_ms: u64,

    /// Fail every Nth batched fetch; 0 disables injected failures.
    #[arg(long = "fail-every", default_value_t = DEFAULT_PROBE_FAIL_EVERY)]
    pub fail_every: u32,
}

impl Default for ProbeArgs {
    fn default() -> Self {
        Self {
            overrides: EngineOverrides::default(),
            requests: DEFAULT_PROBE_REQUESTS,
            groups: DEFAULT_PROBE_GROUPS,
            latency_ms: DEFAULT_PROBE_LATENCY_MS,
            fail_every: DEFAULT_PROBE_FAIL_EVERY,
        }
    }
}

#[derive(Debug, Args, Default, Clone)]
pub struct EngineOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the default TTL for cached reads.
    #[arg(long = "default-ttl-ms", value_name = "MILLIS")]
    pub default_ttl_ms: Option<u64>,

    /// Override the TTL for paginated reads.
    #[arg(long = "page-ttl-ms", value_name = "MILLIS")]
    pub page_ttl_ms: Option<u64>,

    /// Override the batch debounce window.
    #[arg(long = "batch-delay-ms", value_name = "MILLIS")]
    pub batch_delay_ms: Option<u64>,

    /// Toggle single-flight deduplication of concurrent misses.
    #[arg(
        long = "single-flight",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub single_flight: Option<bool>,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub default_ttl: Duration,
    pub page_ttl: Duration,
    pub batch_delay: Duration,
    pub single_flight: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Probe(args)) => raw.apply_engine_overrides(&args.overrides),
        None => raw.apply_engine_overrides(&EngineOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_engine_overrides(&mut self, overrides: &EngineOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(ttl) = overrides.default_ttl_ms {
            self.cache.default_ttl_ms = Some(ttl);
        }
        if let Some(ttl) = overrides.page_ttl_ms {
            self.cache.page_ttl_ms = Some(ttl);
        }
        if let Some(delay) = overrides.batch_delay_ms {
            self.cache.batch_delay_ms = Some(delay);
        }
        if let Some(enabled) = overrides.single_flight {
            self.cache.single_flight = Some(enabled);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings { logging, cache } = raw;

        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;

        Ok(Self { logging, cache })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let default_ttl = non_zero_millis(
        cache.default_ttl_ms.unwrap_or(DEFAULT_TTL_MS),
        "cache.default_ttl_ms",
    )?;
    let page_ttl = non_zero_millis(
        cache.page_ttl_ms.unwrap_or(DEFAULT_PAGE_TTL_MS),
        "cache.page_ttl_ms",
    )?;
    let batch_delay = non_zero_millis(
        cache.batch_delay_ms.unwrap_or(DEFAULT_BATCH_DELAY_MS),
        "cache.batch_delay_ms",
    )?;

    Ok(CacheSettings {
        default_ttl,
        page_ttl,
        batch_delay,
        single_flight: cache.single_flight.unwrap_or(false),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    default_ttl_ms: Option<u64>,
    page_ttl_ms: Option<u64>,
    batch_delay_ms: Option<u64>,
    single_flight: Option<bool>,
}

fn non_zero_millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
