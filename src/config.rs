// ⚙️ Configuration - YAML file plus environment overrides

use anyhow::{anyhow, Context, Result};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::fints::{DialogConfig, DEFAULT_PRODUCT_ID, ONE_STEP_TAN};
use crate::format::DEFAULT_TEMPLATE;

pub const DEFAULT_CONFIG_PATH: &str = "pushfin.yaml";
pub const CONFIG_PATH_ENV: &str = "PUSHFIN_CONFIG";
pub const PIN_ENV: &str = "PUSHFIN_FINTS_PIN";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub fints: FintsConfig,

    #[serde(default)]
    pub statement: StatementConfig,

    #[serde(default)]
    pub pushover: Option<PushoverConfig>,

    #[serde(default)]
    pub telegram: Option<TelegramConfig>,

    #[serde(default)]
    pub message: MessageConfig,

    /// Also send the last closing balance after the transactions
    #[serde(default)]
    pub notify_balance: bool,

    /// SQLite file remembering notified transactions; no dedup when unset
    #[serde(default)]
    pub state_db: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FintsConfig {
    pub blz: String,
    pub iban: String,
    pub login: String,
    #[serde(default, skip_serializing)]
    pub pin: String,
    pub endpoint: String,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default = "default_product_id")]
    pub product_id: String,
    #[serde(default = "default_tan_mechanism")]
    pub tan_mechanism: String,
}

fn default_product_id() -> String {
    DEFAULT_PRODUCT_ID.to_string()
}

fn default_tan_mechanism() -> String {
    ONE_STEP_TAN.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementConfig {
    #[serde(default)]
    pub start: Option<NaiveDate>,
    #[serde(default)]
    pub end: Option<NaiveDate>,
    #[serde(default = "default_days_back")]
    pub days_back: i64,
}

fn default_days_back() -> i64 {
    30
}

impl Default for StatementConfig {
    fn default() -> Self {
        StatementConfig {
            start: None,
            end: None,
            days_back: default_days_back(),
        }
    }
}

impl StatementConfig {
    /// Resolve the date range relative to `today`
    pub fn date_range(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let end = self.end.unwrap_or(today);
        let start = self
            .start
            .unwrap_or_else(|| end - Duration::days(self.days_back));
        (start, end)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushoverConfig {
    pub token: String,
    pub user: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageConfig {
    #[serde(default = "default_template")]
    pub template: String,
}

fn default_template() -> String {
    DEFAULT_TEMPLATE.to_string()
}

impl Default for MessageConfig {
    fn default() -> Self {
        MessageConfig {
            template: default_template(),
        }
    }
}

// ============================================================================
// LOADING
// ============================================================================

impl Config {
    /// Load from `path`, apply environment overrides and validate
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config = Config::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// `PUSHFIN_FINTS_PIN` wins over the file so the PIN can stay out of it
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(pin) = lookup(PIN_ENV).filter(|p| !p.is_empty()) {
            self.fints.pin = pin;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let f = &self.fints;
        if f.blz.len() != 8 || !f.blz.chars().all(|c| c.is_ascii_digit()) {
            return Err(anyhow!("fints.blz must be 8 digits, got {:?}", f.blz));
        }
        if f.iban.trim().is_empty() {
            return Err(anyhow!("fints.iban is required"));
        }
        if f.login.trim().is_empty() {
            return Err(anyhow!("fints.login is required"));
        }
        if f.pin.is_empty() {
            return Err(anyhow!("fints.pin is required (or set {})", PIN_ENV));
        }
        if !(f.endpoint.starts_with("https://") || f.endpoint.starts_with("http://")) {
            return Err(anyhow!("fints.endpoint must be an http(s) URL"));
        }
        if let (Some(start), Some(end)) = (self.statement.start, self.statement.end) {
            if start > end {
                return Err(anyhow!("statement.start {} is after statement.end {}", start, end));
            }
        }
        if self.statement.days_back < 0 {
            return Err(anyhow!("statement.days_back must not be negative"));
        }
        Ok(())
    }

    pub fn has_notifiers(&self) -> bool {
        self.pushover.is_some() || self.telegram.is_some()
    }

    pub fn dialog_config(&self) -> DialogConfig {
        let f = &self.fints;
        DialogConfig {
            blz: f.blz.clone(),
            user_id: f.login.clone(),
            customer_id: f.customer_id.clone().unwrap_or_else(|| f.login.clone()),
            pin: f.pin.clone(),
            product_id: f.product_id.clone(),
            product_version: crate::fints::client::PRODUCT_VERSION.to_string(),
            tan_mechanism: f.tan_mechanism.clone(),
        }
    }
}

/// `--config`, then `PUSHFIN_CONFIG`, then `pushfin.yaml`
pub fn resolve_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
