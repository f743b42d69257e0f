//! TOML-based engine configuration.
//!
//! Holds the tunables of the intake engine:
//! - Reminder cadence and the intake window
//! - Tick interval and lease timings
//! - Gateway endpoints and credentials
//! - Dispatcher queue size
//!
//! Configuration is stored at `<data_dir>/config.toml`.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::data_dir;
use crate::error::ConfigError;
use crate::intake::LateConfirmation;

/// Reminder and escalation cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemindersConfig {
    /// Minutes after `scheduled_at` before a PENDING event becomes MISSED.
    #[serde(default = "default_intake_window")]
    pub intake_window_minutes: u32,
    #[serde(default = "default_stage_spacing")]
    pub stage_spacing_minutes: u32,
    /// Primary reminders sent before contacts are alerted.
    #[serde(default = "default_stage_count")]
    pub stage_count: u32,
    #[serde(default = "default_lookback")]
    pub lookback_minutes: u32,
    #[serde(default = "default_horizon")]
    pub horizon_hours: u32,
    #[serde(default)]
    pub late_confirmation: LateConfirmation,
}

/// Periodic tick and lease timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickConfig {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_lock_max_hold")]
    pub lock_max_hold_secs: u64,
    #[serde(default = "default_lock_min_hold")]
    pub lock_min_hold_secs: u64,
}

/// FCM-style push endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PushGatewayConfig {
    #[serde(default = "default_push_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub server_key: String,
}

/// SendGrid-style email endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmailGatewayConfig {
    #[serde(default = "default_email_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub from: String,
}

/// Twilio-style SMS endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SmsGatewayConfig {
    #[serde(default = "default_sms_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub account_sid: String,
    #[serde(default)]
    pub auth_token: String,
    #[serde(default)]
    pub from: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaysConfig {
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push: Option<PushGatewayConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<EmailGatewayConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sms: Option<SmsGatewayConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Engine configuration.
///
/// Serialized to/from TOML at `<data_dir>/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub reminders: RemindersConfig,
    #[serde(default)]
    pub tick: TickConfig,
    #[serde(default)]
    pub gateways: GatewaysConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

// Default functions
fn default_intake_window() -> u32 {
    60
}
fn default_stage_spacing() -> u32 {
    15
}
fn default_stage_count() -> u32 {
    4
}
fn default_lookback() -> u32 {
    60
}
fn default_horizon() -> u32 {
    24
}
fn default_interval() -> u64 {
    60
}
fn default_lock_max_hold() -> u64 {
    30
}
fn default_lock_min_hold() -> u64 {
    10
}
fn default_timeout() -> u64 {
    10
}
fn default_queue_capacity() -> usize {
    256
}
fn default_push_endpoint() -> String {
    "https://fcm.googleapis.com/fcm/send".into()
}
fn default_email_endpoint() -> String {
    "https://api.sendgrid.com/v3/mail/send".into()
}
fn default_sms_base_url() -> String {
    "https://api.twilio.com".into()
}

impl Default for RemindersConfig {
    fn default() -> Self {
        Self {
            intake_window_minutes: default_intake_window(),
            stage_spacing_minutes: default_stage_spacing(),
            stage_count: default_stage_count(),
            lookback_minutes: default_lookback(),
            horizon_hours: default_horizon(),
            late_confirmation: LateConfirmation::default(),
        }
    }
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            lock_max_hold_secs: default_lock_max_hold(),
            lock_min_hold_secs: default_lock_min_hold(),
        }
    }
}

impl Default for GatewaysConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            push: None,
            email: None,
            sms: None,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for PushGatewayConfig {
    fn default() -> Self {
        Self {
            endpoint: default_push_endpoint(),
            server_key: String::new(),
        }
    }
}

impl Default for EmailGatewayConfig {
    fn default() -> Self {
        Self {
            endpoint: default_email_endpoint(),
            api_key: String::new(),
            from: String::new(),
        }
    }
}

impl Default for SmsGatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_sms_base_url(),
            account_sid: String::new(),
            auth_token: String::new(),
            from: String::new(),
        }
    }
}

impl RemindersConfig {
    pub fn intake_window(&self) -> Duration {
        Duration::minutes(i64::from(self.intake_window_minutes))
    }

    pub fn lookback(&self) -> Duration {
        Duration::minutes(i64::from(self.lookback_minutes))
    }

    pub fn horizon(&self) -> Duration {
        Duration::hours(i64::from(self.horizon_hours))
    }
}

impl TickConfig {
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn lock_max_hold(&self) -> Duration {
        Duration::seconds(self.lock_max_hold_secs as i64)
    }

    pub fn lock_min_hold(&self) -> Duration {
        Duration::seconds(self.lock_min_hold_secs as i64)
    }
}

impl GatewaysConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            if is_leaf {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => {
                        let n = value
                            .parse::<u64>()
                            .map_err(|_| invalid(format!("cannot parse '{value}' as number")))?;
                        serde_json::Value::Number(n.into())
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    /// Materialize an absent optional gateway table so that its keys can
    /// be set one at a time.
    fn fill_gateway_table(root: &mut serde_json::Value, key: &str) -> Result<(), ConfigError> {
        let mut parts = key.splitn(3, '.');
        if parts.next() != Some("gateways") {
            return Ok(());
        }
        let Some(name) = parts.next() else {
            return Ok(());
        };
        let table = match name {
            "push" => serde_json::to_value(PushGatewayConfig::default()),
            "email" => serde_json::to_value(EmailGatewayConfig::default()),
            "sms" => serde_json::to_value(SmsGatewayConfig::default()),
            _ => return Ok(()),
        }
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;

        let Some(gateways) = root.get_mut("gateways").and_then(|g| g.as_object_mut()) else {
            return Ok(());
        };
        let slot = gateways
            .entry(name.to_string())
            .or_insert(serde_json::Value::Null);
        if slot.is_null() {
            *slot = table;
        }
        Ok(())
    }

    fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from the data directory, writing defaults if the file is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    /// Load from an explicit path, writing defaults if the file is missing.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    /// Persist to the data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Overwrite the stored config with defaults.
    pub fn reset() -> Result<Self, ConfigError> {
        let cfg = Self::default();
        cfg.save()?;
        Ok(cfg)
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Update a value in memory by dot-separated key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value does not fit
    /// the field's type.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        let mut json = serde_json::to_value(&*self).map_err(|e| invalid(e.to_string()))?;
        Self::fill_gateway_table(&mut json, key)?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json).map_err(|e| invalid(e.to_string()))?;
        Ok(())
    }

    /// Set a config value by key and save. Returns error if key is unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown, the value cannot be parsed,
    /// or the config cannot be saved.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.apply(key, value)?;
        self.save()
    }

    /// Load from disk, returning default on error.
    /// This is a convenience method that never fails.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "using default configuration");
            Self::default()
        })
    }
}
