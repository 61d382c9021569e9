use std::sync::Arc;

use parking_lot::RwLock;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG at startup.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "parley_llm" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("failed to install subscriber: {0}")]
    Init(String),
    #[error("failed to reload log filter: {0}")]
    Reload(String),
}

type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Handle to the installed subscriber; adjusts levels at runtime.
pub struct TelemetryGuard {
    handle: FilterHandle,
    levels: Arc<RwLock<Levels>>,
}

#[derive(Clone, Debug)]
struct Levels {
    default: Level,
    modules: Vec<(String, Level)>,
}

impl TelemetryGuard {
    fn new(handle: FilterHandle, config: &TelemetryConfig) -> Self {
        Self {
            handle,
            levels: Arc::new(RwLock::new(Levels {
                default: config.log_level,
                modules: config.module_levels.clone(),
            })),
        }
    }

    /// Change the log level for a specific module at runtime.
    pub fn set_module_level(&self, module: &str, level: Level) -> Result<(), TelemetryError> {
        let directives = {
            let mut levels = self.levels.write();
            match levels.modules.iter_mut().find(|(m, _)| m == module) {
                Some(entry) => entry.1 = level,
                None => levels.modules.push((module.to_string(), level)),
            }
            filter_directives(levels.default, &levels.modules)
        };
        self.handle
            .reload(EnvFilter::new(directives))
            .map_err(|e| TelemetryError::Reload(e.to_string()))
    }

    /// Get current per-module log level overrides.
    pub fn module_levels(&self) -> Vec<(String, Level)> {
        self.levels.read().modules.clone()
    }
}

/// `EnvFilter` directives for a default level plus module overrides.
pub fn filter_directives(default: Level, modules: &[(String, Level)]) -> String {
    let mut directives = default.to_string().to_lowercase();
    for (module, level) in modules {
        directives.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    directives
}

/// Initialize the telemetry subsystem. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(filter_directives(config.log_level, &config.module_levels))
    });
    let (filter, handle) = reload::Layer::new(env_filter);

    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
    });
    let pretty_layer = (!config.json).then(|| tracing_subscriber::fmt::layer().with_target(true));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(pretty_layer)
        .try_init()
        .map_err(|e| TelemetryError::Init(e.to_string()))?;

    Ok(TelemetryGuard::new(handle, &config))
}
