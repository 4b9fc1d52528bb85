use anyhow::{Context, Result};
use chrono_tz::Tz;
use microtask_api::DEFAULT_BASE_URL;
use microtask_core::{
    DEFAULT_CHANGE_QUOTA, DEFAULT_REPORT_TIMEOUT, DEFAULT_TICK, NightMode, SessionConfig,
    parse_timezone,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::state::ensure_home;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// IANA zone used for calendar days and night detection.
    pub timezone: String,
    pub api: ApiSection,
    pub session: SessionSection,
    pub tasks: TasksSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub change_quota: u32,
    pub tick_millis: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksSection {
    pub night: NightMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timezone: "Asia/Shanghai".to_string(),
            api: ApiSection::default(),
            session: SessionSection::default(),
            tasks: TasksSection::default(),
        }
    }
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: DEFAULT_REPORT_TIMEOUT.as_secs(),
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            change_quota: DEFAULT_CHANGE_QUOTA,
            tick_millis: DEFAULT_TICK.as_millis() as u64,
        }
    }
}

impl Config {
    pub fn tz(&self) -> Result<Tz> {
        parse_timezone(&self.timezone)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs.max(1))
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.session.tick_millis.max(10))
    }

    pub fn session_config(&self) -> Result<SessionConfig> {
        Ok(SessionConfig {
            change_quota: self.session.change_quota,
            report_timeout: self.request_timeout(),
            night: self.tasks.night,
            timezone: self.tz()?,
        })
    }
}

pub fn config_path() -> Result<PathBuf> {
    Ok(ensure_home()?.join("config.toml"))
}

pub fn load_config() -> Result<Config> {
    load_config_from(&config_path()?)
}

pub fn load_config_from(p: &Path) -> Result<Config> {
    if !p.exists() {
        return Ok(Config::default());
    }
    let s = fs::read_to_string(p).with_context(|| format!("read {}", p.display()))?;
    toml::from_str(&s).with_context(|| format!("parse {}", p.display()))
}

pub fn save_config_to(cfg: &Config, p: &Path) -> Result<()> {
    let s = toml::to_string_pretty(cfg).context("serialize config")?;
    fs::write(p, s).with_context(|| format!("write {}", p.display()))?;
    Ok(())
}

pub fn init_config() -> Result<()> {
    let p = config_path()?;
    if p.exists() {
        println!("Config already exists: {}", p.display());
        return Ok(());
    }
    save_config_to(&Config::default(), &p)?;
    println!("Wrote {}", p.display());
    Ok(())
}
