use crate::calc::GradingPolicy;
use std::env;
use std::fmt;

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub telemetry: TelemetryConfig,
    pub policy: GradingPolicy,
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let log_level = lookup("CORRECTORD_LOG").unwrap_or_else(|| "info".to_string());
        let defaults = GradingPolicy::default();
        let grade_floor = parse_non_negative(&lookup, "CORRECTORD_GRADE_FLOOR", defaults.grade_floor)?;
        let pass_threshold =
            parse_non_negative(&lookup, "CORRECTORD_PASS_THRESHOLD", defaults.pass_threshold)?;

        Ok(Self {
            telemetry: TelemetryConfig { log_level },
            policy: GradingPolicy {
                grade_floor,
                pass_threshold,
            },
        })
    }
}

fn parse_non_negative<F>(lookup: &F, key: &'static str, default: f64) -> Result<f64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Ok(v),
        _ => Err(ConfigError::InvalidNumber { key, value: raw }),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    InvalidNumber { key: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidNumber { key, value } => {
                write!(f, "{} must be a non-negative number, got '{}'", key, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
