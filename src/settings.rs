use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LedgerError, Result};

pub const DEFAULT_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y", "%Y/%m/%d"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub data_dir: String,
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,
    #[serde(default = "default_error_log_limit")]
    pub error_log_limit: usize,
    #[serde(default = "default_date_formats")]
    pub date_formats: Vec<String>,
    #[serde(default = "default_account_name")]
    pub default_account_name: String,
    #[serde(default = "default_webhook_timeout")]
    pub webhook_timeout_secs: u64,
    #[serde(default = "default_webhook_retry_count")]
    pub webhook_retry_count: i64,
    #[serde(default = "default_response_body_limit")]
    pub response_body_limit: usize,
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}

fn default_error_log_limit() -> usize {
    100
}

fn default_date_formats() -> Vec<String> {
    DEFAULT_DATE_FORMATS.iter().map(|f| f.to_string()).collect()
}

fn default_account_name() -> String {
    "Default Account".to_string()
}

fn default_webhook_timeout() -> u64 {
    30
}

fn default_webhook_retry_count() -> i64 {
    3
}

fn default_response_body_limit() -> usize {
    1000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().to_string_lossy().to_string(),
            max_file_size_bytes: default_max_file_size(),
            error_log_limit: default_error_log_limit(),
            date_formats: default_date_formats(),
            default_account_name: default_account_name(),
            webhook_timeout_secs: default_webhook_timeout(),
            webhook_retry_count: default_webhook_retry_count(),
            response_body_limit: default_response_body_limit(),
        }
    }
}

impl Settings {
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(crate::db::DB_FILE)
    }

    /// Apply `key=value` updates as one batch. Every problem is reported and
    /// nothing is applied unless all updates are valid.
    pub fn with_updates(&self, updates: &[(String, String)]) -> Result<Settings> {
        let Value::Object(mut map) = serde_json::to_value(self)? else {
            return Err(LedgerError::Settings("settings did not serialize to an object".into()));
        };
        let mut errors = Vec::new();

        for (key, raw) in updates {
            let Some(current) = map.get(key) else {
                errors.push(format!("unknown setting: {key}"));
                continue;
            };
            match coerce_like(current, raw) {
                Ok(value) => {
                    map.insert(key.clone(), value);
                }
                Err(expected) => errors.push(format!("{key}: expected {expected}, got '{raw}'")),
            }
        }

        if !errors.is_empty() {
            return Err(LedgerError::Config(errors));
        }

        let candidate: Settings = serde_json::from_value(Value::Object(map))?;
        candidate.validate()?;
        Ok(candidate)
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        if self.max_file_size_bytes == 0 {
            errors.push("max_file_size_bytes: must be greater than zero".to_string());
        }
        if self.error_log_limit == 0 {
            errors.push("error_log_limit: must be greater than zero".to_string());
        }
        if self.date_formats.is_empty() {
            errors.push("date_formats: at least one format is required".to_string());
        }
        for fmt in &self.date_formats {
            if !fmt.contains('%') {
                errors.push(format!("date_formats: '{fmt}' is not a strftime pattern"));
            }
        }
        if self.default_account_name.trim().is_empty() {
            errors.push("default_account_name: must not be blank".to_string());
        }
        if !(1..=300).contains(&self.webhook_timeout_secs) {
            errors.push("webhook_timeout_secs: must be between 1 and 300".to_string());
        }
        if !(1..=10).contains(&self.webhook_retry_count) {
            errors.push("webhook_retry_count: must be between 1 and 10".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(LedgerError::Config(errors))
        }
    }
}

/// Interpret `raw` with the JSON type of `current`.
fn coerce_like(current: &Value, raw: &str) -> std::result::Result<Value, &'static str> {
    match current {
        Value::Number(_) => raw
            .trim()
            .parse::<u64>()
            .map(Value::from)
            .map_err(|_| "a non-negative integer"),
        Value::Bool(_) => raw.trim().parse::<bool>().map(Value::Bool).map_err(|_| "true or false"),
        Value::Array(_) => Ok(Value::Array(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| Value::String(s.to_string()))
                .collect(),
        )),
        _ => Ok(Value::String(raw.to_string())),
    }
}

fn config_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("LEDGERLINE_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("ledgerline")
}

pub fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Documents")
        .join("ledgerline")
}

pub fn load_settings() -> Settings {
    let path = settings_path();
    if path.exists() {
        let content = std::fs::read_to_string(&path).unwrap_or_default();
        match serde_json::from_str(&content) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable settings, using defaults");
                Settings::default()
            }
        }
    } else {
        Settings::default()
    }
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir)?;
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| LedgerError::Settings(e.to_string()))?;
    std::fs::write(settings_path(), format!("{json}\n"))?;
    Ok(())
}

/// Expand a leading `~` and anchor relative paths at the working
/// directory. The path does not need to exist yet.
pub fn shellexpand_path(path: &str) -> String {
    let expanded = match (path.strip_prefix('~'), dirs::home_dir()) {
        (Some(rest), Some(home)) => PathBuf::from(format!("{}{rest}", home.to_string_lossy())),
        _ => PathBuf::from(path),
    };
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(expanded),
            Err(_) => expanded,
        }
    };
    std::fs::canonicalize(&absolute)
        .unwrap_or(absolute)
        .to_string_lossy()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_load_merges_with_defaults() {
        let json = r#"{"data_dir": "/tmp/test", "error_log_limit": 5}"#;
        let s: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(s.error_log_limit, 5);
        assert_eq!(s.default_account_name, "Default Account");
        assert_eq!(s.date_formats.len(), 4);
        assert_eq!(s.max_file_size_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn test_defaults_are_valid() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn test_updates_apply_by_type() {
        let s = Settings::default()
            .with_updates(&kv(&[
                ("error_log_limit", "25"),
                ("date_formats", "%d/%m/%Y, %Y-%m-%d"),
                ("default_account_name", "Checking"),
            ]))
            .unwrap();
        assert_eq!(s.error_log_limit, 25);
        assert_eq!(s.date_formats, vec!["%d/%m/%Y", "%Y-%m-%d"]);
        assert_eq!(s.default_account_name, "Checking");
    }

    #[test]
    fn test_updates_are_all_or_nothing() {
        let base = Settings::default();
        let err = base
            .with_updates(&kv(&[
                ("error_log_limit", "25"),
                ("colour", "blue"),
                ("webhook_timeout_secs", "soon"),
            ]))
            .unwrap_err();
        let LedgerError::Config(messages) = err else {
            panic!("expected a configuration error");
        };
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().any(|m| m == "unknown setting: colour"));
        assert!(messages.iter().any(|m| m.starts_with("webhook_timeout_secs")));
        assert_eq!(base.error_log_limit, 100);
    }

    #[test]
    fn test_updates_reject_out_of_range_values() {
        let err = Settings::default()
            .with_updates(&kv(&[("webhook_retry_count", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("webhook_retry_count"));
    }

    #[test]
    fn test_relative_data_dir_is_anchored_at_cwd() {
        let expanded = shellexpand_path("not-created-yet/data");
        let cwd = std::env::current_dir().unwrap();
        assert!(PathBuf::from(&expanded).is_absolute());
        assert!(expanded.starts_with(&*cwd.to_string_lossy()));
        assert!(expanded.ends_with("not-created-yet/data"));
    }

    #[test]
    fn test_tilde_expands_to_home() {
        let home = dirs::home_dir().unwrap();
        let expanded = shellexpand_path("~/ledgerline-missing-dir");
        assert_eq!(PathBuf::from(expanded), home.join("ledgerline-missing-dir"));
    }
}
