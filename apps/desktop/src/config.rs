use std::{fs, path::Path, time::Duration};

use anyhow::{anyhow, Context, Result};
use tracing::warn;
use url::Url;

pub const DEFAULT_CONFIG_FILE: &str = "hydrodesk.toml";
const ENV_PREFIX: &str = "HYDRODESK__";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub database_url: String,
    pub computation_url: String,
    pub log_filter: String,
    pub snapshot_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./data/hydrodesk.db".into(),
            computation_url: "http://localhost:8000".into(),
            log_filter: "info".into(),
            snapshot_timeout_ms: 5_000,
        }
    }
}

impl Settings {
    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreTarget {
    Memory,
    Sqlite(String),
}

/// Defaults, then the config file (if present), then `HYDRODESK__*` variables.
pub fn load_settings(config_path: &Path) -> Result<Settings> {
    let mut settings = Settings::default();

    match fs::read_to_string(config_path) {
        Ok(raw) => apply_file(&mut settings, &raw)
            .with_context(|| format!("invalid config file {}", config_path.display()))?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read config file {}", config_path.display()))
        }
    }

    apply_env(&mut settings, |key| std::env::var(format!("{ENV_PREFIX}{key}")).ok());
    Ok(settings)
}

fn apply_file(settings: &mut Settings, raw: &str) -> Result<()> {
    let table: toml::Table = toml::from_str(raw)?;
    for (key, value) in table {
        let text = match value {
            toml::Value::String(text) => text,
            toml::Value::Integer(number) => number.to_string(),
            other => other.to_string(),
        };
        if !apply_key(settings, &key, text) {
            warn!("config: ignoring unknown key {key}");
        }
    }
    Ok(())
}

fn apply_env(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    for key in [
        "DATABASE_URL",
        "COMPUTATION_URL",
        "LOG_FILTER",
        "SNAPSHOT_TIMEOUT_MS",
    ] {
        if let Some(value) = lookup(key) {
            apply_key(settings, &key.to_ascii_lowercase(), value);
        }
    }
}

fn apply_key(settings: &mut Settings, key: &str, value: String) -> bool {
    match key {
        "database_url" => settings.database_url = value,
        "computation_url" => settings.computation_url = value,
        "log_filter" => settings.log_filter = value,
        "snapshot_timeout_ms" => match value.trim().parse::<u64>() {
            Ok(parsed) => settings.snapshot_timeout_ms = parsed,
            Err(_) => warn!("config: snapshot_timeout_ms is not a number: {value}"),
        },
        _ => return false,
    }
    true
}

pub fn store_target(raw_database_url: &str) -> StoreTarget {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return StoreTarget::Sqlite(Settings::default().database_url);
    }
    if raw_database_url.eq_ignore_ascii_case("memory") {
        return StoreTarget::Memory;
    }
    if raw_database_url.starts_with("sqlite::memory:") || raw_database_url.starts_with("sqlite://")
    {
        return StoreTarget::Sqlite(raw_database_url.to_string());
    }
    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        return StoreTarget::Sqlite(format!("sqlite://{}", path.replace('\\', "/")));
    }

    StoreTarget::Sqlite(format!("sqlite://{}", raw_database_url.replace('\\', "/")))
}

pub fn computation_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .with_context(|| format!("computation_url '{raw}' is not a valid url"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(anyhow!(
            "computation_url must use http or https, got '{scheme}'"
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn normalizes_plain_file_path_to_sqlite_url() {
        assert_eq!(
            store_target("./data/test.db"),
            StoreTarget::Sqlite("sqlite://./data/test.db".into())
        );
        assert_eq!(
            store_target("sqlite:data\\test.db"),
            StoreTarget::Sqlite("sqlite://data/test.db".into())
        );
        assert_eq!(
            store_target("sqlite::memory:"),
            StoreTarget::Sqlite("sqlite::memory:".into())
        );
        assert_eq!(store_target(" Memory "), StoreTarget::Memory);
    }

    #[test]
    fn file_values_override_defaults() {
        let mut settings = Settings::default();
        apply_file(
            &mut settings,
            r#"
                database_url = "memory"
                snapshot_timeout_ms = 250
                unknown = "ignored"
            "#,
        )
        .expect("parse");

        assert_eq!(settings.database_url, "memory");
        assert_eq!(settings.snapshot_timeout(), Duration::from_millis(250));
        assert_eq!(settings.log_filter, "info");
    }

    #[test]
    fn env_overrides_file() {
        let mut settings = Settings::default();
        apply_file(&mut settings, r#"computation_url = "http://file:8000""#).expect("parse");
        let env: HashMap<&str, &str> = [
            ("COMPUTATION_URL", "http://env:9000"),
            ("SNAPSHOT_TIMEOUT_MS", "oops"),
        ]
        .into_iter()
        .collect();

        apply_env(&mut settings, |key| env.get(key).map(|value| value.to_string()));

        assert_eq!(settings.computation_url, "http://env:9000");
        assert_eq!(settings.snapshot_timeout_ms, 5_000);
    }

    #[test]
    fn missing_config_file_is_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = load_settings(&dir.path().join("absent.toml")).expect("settings");
        assert_eq!(settings.log_filter, Settings::default().log_filter);
    }

    #[test]
    fn malformed_config_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        fs::write(&path, "database_url = ").expect("write");
        assert!(load_settings(&path).is_err());
    }

    #[test]
    fn computation_url_must_be_http() {
        assert!(computation_url("http://localhost:8000").is_ok());
        assert!(computation_url("ftp://localhost").is_err());
        assert!(computation_url("localhost:8000").is_err());
    }
}
