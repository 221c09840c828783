use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Server configuration loaded from YAML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub log: LogSettings,
    pub clinic: ClinicSettings,
    pub webhook: WebhookSettings,
    pub reminders: ReminderSettings,
    pub assistant: AssistantSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub data_dir: PathBuf,
    pub records_db: String,
    pub audit_db: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub format: LogFormat,
}

/// Clinic-wide rule settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClinicSettings {
    pub name: String,
    /// Offset of clinic local time from UTC, used for every "today"
    pub utc_offset_minutes: i32,
    pub pdmp_max_age_days: u32,
    pub take_home_max_days: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookSettings {
    pub enabled: bool,
    pub endpoints: Vec<WebhookEndpoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    pub url: String,
    pub events: Vec<String>,
    #[serde(default)]
    pub headers: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReminderSettings {
    pub enabled: bool,
    pub poll_interval_secs: u64,
}

/// Upstream chat endpoint for the clinical assistant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantSettings {
    pub endpoint: Option<String>,
    pub api_key_header: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub system_prompt: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            records_db: "records.sqlite".to_string(),
            audit_db: "audit.sqlite".to_string(),
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl Default for ClinicSettings {
    fn default() -> Self {
        Self {
            name: "Harbor Clinic".to_string(),
            utc_offset_minutes: 0,
            pdmp_max_age_days: 90,
            take_home_max_days: 14,
        }
    }
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            poll_interval_secs: 60,
        }
    }
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key_header: "x-api-key".to_string(),
            api_key: None,
            model: "default".to_string(),
            timeout_secs: 30,
            system_prompt: "You are a clinical assistant for an addiction-treatment clinic. \
                Answer staff questions concisely. You do not make treatment decisions."
                .to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file
    pub fn load_from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = if let Some(path) = config_path {
            Self::load_from_file(path)?
        } else {
            Self::default()
        };

        // Override with environment variables
        if let Ok(port) = std::env::var("HARBOR_PORT")
            && let Ok(port_num) = port.parse()
        {
            config.server.port = port_num;
        }

        if let Ok(host) = std::env::var("HARBOR_HOST") {
            config.server.host = host;
        }

        if let Ok(data_dir) = std::env::var("HARBOR_DATA_DIR") {
            config.storage.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(url) = std::env::var("HARBOR_ASSISTANT_URL") {
            config.assistant.endpoint = Some(url);
        }

        Ok(config)
    }

    /// Get the full path to the records database
    pub fn records_db_path(&self) -> PathBuf {
        self.storage.data_dir.join(&self.storage.records_db)
    }

    /// Get the full path to the audit database
    pub fn audit_db_path(&self) -> PathBuf {
        self.storage.data_dir.join(&self.storage.audit_db)
    }

    /// Clinic time zone as a fixed offset (UTC when out of range)
    pub fn clinic_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.clinic.utc_offset_minutes.saturating_mul(60))
            .unwrap_or(Utc.fix())
    }

    /// The clinic-local calendar date at `now`
    pub fn clinic_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.clinic_offset()).date_naive()
    }

    /// The clinic-local calendar date right now
    pub fn today(&self) -> NaiveDate {
        self.clinic_date(Utc::now())
    }
}
