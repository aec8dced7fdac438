use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::reminders::NotificationPreference;

const DB_FILE_NAME: &str = "tutorlink.db";

#[derive(Parser, Debug)]
#[command(name = "tutorlink", about = "Tutor reviews and lesson reminders")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub reviews: ReviewConfig,
    pub reminders: ReminderConfig,
    pub notifications: NotificationConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ReviewConfig {
    /// Attempts at a contended aggregate write before giving up
    pub max_write_attempts: u32,
    /// User ids allowed to remove any review and rebuild aggregates
    pub moderators: Vec<String>,
}

/// Offsets enabled for users who never saved preferences.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ReminderConfig {
    pub week_before: bool,
    pub three_days_before: bool,
    pub one_day_before: bool,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct NotificationConfig {
    pub permission_granted: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            max_write_attempts: 5,
            moderators: Vec::new(),
        }
    }
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            week_before: true,
            three_days_before: true,
            one_day_before: true,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            permission_granted: true,
        }
    }
}

impl ReviewConfig {
    pub fn is_moderator(&self, user_id: &str) -> bool {
        self.moderators.iter().any(|m| m == user_id)
    }
}

impl ReminderConfig {
    pub fn default_preferences(&self) -> NotificationPreference {
        NotificationPreference::new(self.week_before, self.three_days_before, self.one_day_before)
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(cli);
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        // CLI overrides
        if let Some(ref host) = cli.host {
            config.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }

        if config.database.path.is_none() {
            config.database.path = Some(data_dir.join(DB_FILE_NAME));
        }
        if config.reviews.max_write_attempts == 0 {
            anyhow::bail!("reviews.max_write_attempts must be at least 1");
        }

        Ok(config)
    }

    pub fn data_dir(cli: &Cli) -> PathBuf {
        cli.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".tutorlink")
        })
    }

    pub fn db_path(&self) -> &Path {
        self.database
            .path
            .as_deref()
            .unwrap_or_else(|| Path::new(DB_FILE_NAME))
    }
}
