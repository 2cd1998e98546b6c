//! Tracing and logging setup
//!
//! `RUST_LOG` wins when set. Otherwise the preset's directives apply; every
//! preset keeps the websocket and HTTP client internals at `warn` so per-frame
//! noise from those crates does not drown the shard lifecycle logs.

use crate::config::Environment;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Crates that log every frame or connection at `debug`
const NOISY_TARGETS: &[&str] = &["tungstenite", "tokio_tungstenite", "hyper", "hyper_util", "reqwest"];

/// Subscriber settings
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Base level for everything not listed in `directives`
    pub default_level: String,
    /// Extra `target=level` directives, applied after the base level
    pub directives: Vec<String>,
    /// Emit one JSON object per line
    pub json: bool,
    /// Log when the per-shard span closes, with its busy/idle time
    pub span_close: bool,
    /// Include file and line numbers
    pub file_line: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            default_level: "info".to_string(),
            directives: Vec::new(),
            json: false,
            span_close: false,
            file_line: true,
        }
    }
}

impl TracingConfig {
    /// Debug output for the workspace crates
    #[must_use]
    pub fn development() -> Self {
        Self {
            default_level: "info".to_string(),
            directives: vec![
                "shardline=debug".to_string(),
                "shardline_gateway=debug".to_string(),
                "shardline_rest=debug".to_string(),
            ],
            json: false,
            span_close: true,
            file_line: true,
        }
    }

    /// JSON lines at `info`
    #[must_use]
    pub fn production() -> Self {
        Self {
            json: true,
            file_line: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn for_environment(env: Environment) -> Self {
        match env {
            Environment::Development => Self::development(),
            Environment::Staging => Self::default(),
            Environment::Production => Self::production(),
        }
    }

    /// Add one `target=level` directive
    #[must_use]
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Directive string used when `RUST_LOG` is unset
    pub fn filter_string(&self) -> String {
        let mut parts = vec![self.default_level.clone()];
        parts.extend(NOISY_TARGETS.iter().map(|target| format!("{target}=warn")));
        parts.extend(self.directives.iter().cloned());
        parts.join(",")
    }

    fn env_filter(&self) -> Result<EnvFilter, TracingError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        let directives = self.filter_string();
        EnvFilter::try_new(&directives).map_err(|e| TracingError::InvalidFilter {
            directives,
            reason: e.to_string(),
        })
    }
}

/// Install the subscriber with the default preset
pub fn try_init_tracing() -> Result<(), TracingError> {
    try_init_tracing_with_config(TracingConfig::default())
}

/// Install the subscriber; fails if one is already installed
pub fn try_init_tracing_with_config(config: TracingConfig) -> Result<(), TracingError> {
    let env_filter = config.env_filter()?;

    let span_events = if config.span_close {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let layer = fmt::layer()
        .with_file(config.file_line)
        .with_line_number(config.file_line)
        .with_span_events(span_events);

    let installed = if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.json().flatten_event(true))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init()
    };

    installed.map_err(|_| TracingError::AlreadyInitialized)
}

#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("Tracing subscriber already initialized")]
    AlreadyInitialized,

    #[error("Invalid log filter '{directives}': {reason}")]
    InvalidFilter { directives: String, reason: String },
}
