//! Monitor timings from the environment.

use std::time::Duration;

use runs::ConfigError;
use tracker::MonitorSettings;

const ENV_WARM_UP: &str = "ACTIONS_RELAY_MONITOR_WARM_UP_SECS";
const ENV_POLL_INTERVAL: &str = "ACTIONS_RELAY_MONITOR_POLL_INTERVAL_SECS";
const ENV_MAX_ATTEMPTS: &str = "ACTIONS_RELAY_MONITOR_MAX_ATTEMPTS";
const ENV_PAGE_SIZE: &str = "ACTIONS_RELAY_MONITOR_PAGE_SIZE";

pub fn monitor_settings_from_env() -> Result<MonitorSettings, ConfigError> {
    monitor_settings_from_lookup(|key| std::env::var(key).ok())
}

/// Unset variables keep their defaults.
pub fn monitor_settings_from_lookup<F>(lookup: F) -> Result<MonitorSettings, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = MonitorSettings::default();
    let settings = MonitorSettings {
        warm_up: secs_or(&lookup, ENV_WARM_UP, defaults.warm_up)?,
        poll_interval: secs_or(&lookup, ENV_POLL_INTERVAL, defaults.poll_interval)?,
        max_attempts: parse_or(&lookup, ENV_MAX_ATTEMPTS, defaults.max_attempts)?,
        page_size: parse_or(&lookup, ENV_PAGE_SIZE, defaults.page_size)?,
    };

    if settings.max_attempts == 0 {
        return Err(ConfigError::Invalid {
            key: ENV_MAX_ATTEMPTS.to_string(),
            message: "must be at least 1".to_string(),
        });
    }
    if !(1..=100).contains(&settings.page_size) {
        return Err(ConfigError::Invalid {
            key: ENV_PAGE_SIZE.to_string(),
            message: "must be between 1 and 100".to_string(),
        });
    }
    Ok(settings)
}

fn secs_or<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(lookup, key, default.as_secs()).map(Duration::from_secs)
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            message: format!("'{raw}' is not a valid number"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_unset() {
        let settings = monitor_settings_from_lookup(|_| None).unwrap();
        assert_eq!(settings, MonitorSettings::default());
        assert_eq!(settings.warm_up, Duration::from_secs(5));
        assert_eq!(settings.poll_interval, Duration::from_secs(10));
        assert_eq!(settings.max_attempts, 60);
        assert_eq!(settings.page_size, 5);
    }

    #[test]
    fn test_overrides() {
        let settings = monitor_settings_from_lookup(|key| match key {
            ENV_WARM_UP => Some("1".into()),
            ENV_POLL_INTERVAL => Some(" 30 ".into()),
            ENV_MAX_ATTEMPTS => Some("20".into()),
            _ => None,
        })
        .unwrap();

        assert_eq!(settings.warm_up, Duration::from_secs(1));
        assert_eq!(settings.poll_interval, Duration::from_secs(30));
        assert_eq!(settings.max_attempts, 20);
        assert_eq!(settings.page_size, 5);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let garbage = monitor_settings_from_lookup(|key| {
            (key == ENV_POLL_INTERVAL).then(|| "ten".to_string())
        });
        assert!(matches!(garbage, Err(ConfigError::Invalid { key, .. }) if key == ENV_POLL_INTERVAL));

        let zero = monitor_settings_from_lookup(|key| (key == ENV_MAX_ATTEMPTS).then(|| "0".into()));
        assert!(zero.is_err());

        let huge_page = monitor_settings_from_lookup(|key| (key == ENV_PAGE_SIZE).then(|| "200".into()));
        assert!(huge_page.is_err());
    }
}
