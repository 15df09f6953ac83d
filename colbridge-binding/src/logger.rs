use log::LevelFilter;

/// Environment variable selecting the log level of the binding.
pub const LOG_LEVEL_ENV: &str = "COLBRIDGE_LOG_LEVEL";

/// Parse a level name. Unknown names disable logging.
#[inline]
pub fn parse_level(s: &str) -> LevelFilter {
    match s {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "err" | "critical" => LevelFilter::Error,
        _ => LevelFilter::Off,
    }
}

/// Install console logger with level read from [`LOG_LEVEL_ENV`].
/// Logging stays off if the variable is absent. Only the first
/// successful installation takes effect.
pub fn init_from_env() -> LevelFilter {
    let level = std::env::var(LOG_LEVEL_ENV)
        .map(|s| parse_level(&s))
        .unwrap_or(LevelFilter::Off);
    if level == LevelFilter::Off {
        return level;
    }
    match env_logger::Builder::new().filter_level(level).try_init() {
        Ok(_) => log::debug!("console logger installed with level {}", level),
        Err(_) => log::debug!("logger already installed"),
    }
    level
}

#[inline]
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Build information exposed to the host.
#[inline]
pub fn build_info_json() -> serde_json::Value {
    serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": version(),
        "os": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "debug": cfg!(debug_assertions),
    })
}
