//! Structured logging setup
//!
//! Installs a JSON subscriber whose filter can be swapped at runtime through
//! a [`LogLevelSwitch`].

use tracing_subscriber::{
    fmt, layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry,
};

use crate::{
    config::Config,
    error::{Error, Result},
};

type FilterLayer = reload::Layer<EnvFilter, Registry>;

/// Runtime handle over the installed log filter
#[derive(Clone)]
pub struct LogLevelSwitch {
    handle: reload::Handle<EnvFilter, Registry>,
}

impl LogLevelSwitch {
    /// Replace the active filter with `directive` (e.g. `debug` or `info,acton_crud=trace`)
    pub fn set_level(&self, directive: &str) -> Result<()> {
        let filter = EnvFilter::try_new(directive)
            .map_err(|e| Error::Internal(format!("invalid log filter '{directive}': {e}")))?;

        self.handle
            .reload(filter)
            .map_err(|e| Error::Internal(format!("failed to reload log filter: {e}")))?;

        tracing::info!(filter = directive, "Log filter changed");
        Ok(())
    }

    /// Active filter rendered as a directive string
    pub fn current(&self) -> Result<String> {
        self.handle
            .with_current(|filter| filter.to_string())
            .map_err(|e| Error::Internal(format!("failed to read log filter: {e}")))
    }
}

impl std::fmt::Debug for LogLevelSwitch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogLevelSwitch").finish_non_exhaustive()
    }
}

fn reloadable_filter(directive: &str) -> (FilterLayer, LogLevelSwitch, bool) {
    let (filter, valid) = match EnvFilter::try_new(directive) {
        Ok(filter) => (filter, true),
        Err(_) => (EnvFilter::new("info"), false),
    };
    let (layer, handle) = reload::Layer::new(filter);
    (layer, LogLevelSwitch { handle }, valid)
}

/// Initialize JSON tracing from `config.service.log_level`
///
/// An unparsable level falls back to `info`. Fails if a global subscriber is
/// already installed.
pub fn init_tracing(config: &Config) -> Result<LogLevelSwitch> {
    let (filter, switch, valid) = reloadable_filter(&config.service.log_level);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json())
        .try_init()
        .map_err(|e| Error::Internal(format!("failed to install tracing subscriber: {e}")))?;

    if !valid {
        tracing::warn!(
            log_level = %config.service.log_level,
            "Invalid log level, falling back to info"
        );
    }
    tracing::info!("Tracing initialized for service: {}", config.service.name);

    Ok(switch)
}

/// Root span carrying the service identity
///
/// Enter it around request handling or background work so every event
/// records the service, environment and instance.
pub fn service_span(config: &Config) -> tracing::Span {
    tracing::info_span!(
        "service",
        service = %config.service.name,
        environment = %config.service.environment,
        instance = config.service.instance_rid.as_deref().unwrap_or("-"),
    )
}
