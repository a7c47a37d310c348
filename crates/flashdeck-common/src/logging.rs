//! Logging configuration and setup.

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter, Layer, Registry,
};

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    /// One JSON object per line.
    Json,
}

/// Subscriber settings for hosts and tools.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Fallback verbosity when no filter applies.
    pub level: Level,
    pub format: LogFormat,
    /// Emit file and line (pretty format only).
    pub include_location: bool,
    /// Log span enter and close.
    pub include_span_events: bool,
    /// Filter directives, e.g. `flashdeck_lifecycle=debug,reqwest=warn`.
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            include_location: false,
            include_span_events: false,
            filter: None,
        }
    }
}

impl LogConfig {
    /// Verbose settings for local troubleshooting.
    pub fn debug() -> Self {
        Self {
            level: Level::DEBUG,
            include_location: true,
            include_span_events: true,
            ..Self::default()
        }
    }

    /// JSON lines at info level.
    pub fn production() -> Self {
        Self::default().with_format(LogFormat::Json)
    }

    /// Replace `RUST_LOG` with explicit directives.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// An explicit filter wins over `RUST_LOG`; either falls back to `level`
    /// when it does not parse.
    fn env_filter(&self) -> EnvFilter {
        let parsed = match &self.filter {
            Some(directives) => EnvFilter::try_new(directives).ok(),
            None => EnvFilter::try_from_default_env().ok(),
        };
        parsed.unwrap_or_else(|| EnvFilter::new(self.level.as_str()))
    }
}

/// Install the global subscriber described by `config`.
///
/// Panics if a subscriber is already installed; use [`try_init_logging`] when
/// setup may run more than once.
pub fn init_logging(config: LogConfig) {
    if let Err(e) = try_init_logging(config) {
        panic!("failed to install tracing subscriber: {e}");
    }
}

/// Install the global subscriber, reporting an existing one as an error.
pub fn try_init_logging(config: LogConfig) -> Result<(), TryInitError> {
    let span_events = if config.include_span_events {
        FmtSpan::ENTER | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let output: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Pretty => fmt::layer()
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_span_events(span_events)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_span_events(span_events)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_events(span_events)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(output)
        .with(config.env_filter())
        .try_init()
}
