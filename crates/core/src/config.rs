use std::path::Path;

use chrono::{FixedOffset, Offset, Utc};
use serde::Deserialize;

/// Root application configuration. Loaded from an optional TOML file and
/// environment variables with the prefix `DRIP_MARKETING__`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub drip: DripConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings consumed by campaign runs.
#[derive(Debug, Clone, Deserialize)]
pub struct DripConfig {
    /// Sender used when a drip has no explicit `from_email`.
    #[serde(default = "default_from_email")]
    pub default_from_email: String,
    #[serde(default)]
    pub default_sender_name: String,
    /// Inline `<style>` rules into html bodies after rendering.
    #[serde(default)]
    pub html_post_process: bool,
    /// Offset applied before truncating `today±` values to a date.
    #[serde(default)]
    pub time_zone_offset_minutes: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Console,
    Memory,
}

impl TransportKind {
    /// Whether messages accepted by this transport leave the process. The
    /// memory transport only collects them, so a dispatch through it is a
    /// dry run whose state changes must not be kept.
    pub fn delivers(&self) -> bool {
        match self {
            TransportKind::Console => true,
            TransportKind::Memory => false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub kind: TransportKind,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

fn default_from_email() -> String {
    "webmaster@localhost".to_string()
}
fn default_log_filter() -> String {
    "drip_marketing=info,drip_engine=info".to_string()
}

impl Default for DripConfig {
    fn default() -> Self {
        Self {
            default_from_email: default_from_email(),
            default_sender_name: String::new(),
            html_post_process: false,
            time_zone_offset_minutes: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

impl DripConfig {
    /// The configured offset, falling back to UTC when out of range.
    pub fn time_zone(&self) -> FixedOffset {
        FixedOffset::east_opt(self.time_zone_offset_minutes.saturating_mul(60)).unwrap_or_else(|| {
            tracing::warn!(
                minutes = self.time_zone_offset_minutes,
                "Time zone offset out of range, using UTC"
            );
            Utc.fix()
        })
    }
}

impl AppConfig {
    /// Load configuration from an optional file and environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("DRIP_MARKETING")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_every_section() {
        let config = AppConfig::default();
        assert_eq!(config.drip.default_from_email, "webmaster@localhost");
        assert!(!config.drip.html_post_process);
        assert_eq!(config.transport.kind, TransportKind::Console);
        assert!(config.logging.filter.contains("drip_engine"));
    }

    #[test]
    fn test_memory_transport_is_a_dry_run() {
        assert!(TransportKind::Console.delivers());
        assert!(!TransportKind::Memory.delivers());
    }

    #[test]
    fn test_time_zone_uses_offset_minutes() {
        let config = DripConfig {
            time_zone_offset_minutes: 120,
            ..Default::default()
        };
        assert_eq!(config.time_zone().local_minus_utc(), 7200);
    }

    #[test]
    fn test_out_of_range_offset_falls_back_to_utc() {
        let config = DripConfig {
            time_zone_offset_minutes: 100_000,
            ..Default::default()
        };
        assert_eq!(config.time_zone().local_minus_utc(), 0);
    }
}
