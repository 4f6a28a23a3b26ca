use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration loaded from YAML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSettings,
    pub auth: AuthSettings,
    pub storage: StorageSettings,
    pub log: LogSettings,
    pub smtp: Option<SmtpSettings>,
    pub patients_service: PatientsServiceSettings,
    pub verification: VerificationSettings,
    pub bulk: BulkSettings,
    pub seed: SeedSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Upper bound on request bodies (uploads included)
    pub max_upload_bytes: usize,
}

/// Delegated authorization against the auth service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub enabled: bool,
    pub service_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub data_dir: PathBuf,
    pub users_db: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    /// `pretty` or `json`
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpSettings {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub from: String,
}

fn default_smtp_port() -> u16 {
    587
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatientsServiceSettings {
    pub url: String,
    pub timeout_secs: u64,
}

/// Validity window of verification codes, per entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationSettings {
    pub single_create_ttl_minutes: i64,
    pub bulk_create_ttl_hours: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkSettings {
    pub email_timeout_secs: u64,
    pub bcrypt_cost: u32,
}

/// Catalog names inserted at startup when missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedSettings {
    pub specialties: Vec<String>,
    pub departments: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_upload_bytes: 60 * 1024 * 1024,
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            service_url: "http://localhost:3001".to_string(),
            timeout_secs: 5,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            users_db: "users.sqlite".to_string(),
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Default for PatientsServiceSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:3003".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            single_create_ttl_minutes: 15,
            bulk_create_ttl_hours: 24,
        }
    }
}

impl Default for BulkSettings {
    fn default() -> Self {
        Self {
            email_timeout_secs: 30,
            bcrypt_cost: 10,
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
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `MEDCORE_*` overrides obtained through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(port) = var("MEDCORE_PORT")
            && let Ok(port_num) = port.parse()
        {
            self.server.port = port_num;
        }

        if let Some(host) = var("MEDCORE_HOST") {
            self.server.host = host;
        }

        if let Some(data_dir) = var("MEDCORE_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(data_dir);
        }

        if let Some(url) = var("MEDCORE_AUTH_URL") {
            self.auth.service_url = url;
        }

        if let Some(url) = var("MEDCORE_PATIENTS_URL") {
            self.patients_service.url = url;
        }

        if let Some(host) = var("MEDCORE_SMTP_HOST") {
            let from = var("MEDCORE_SMTP_FROM")
                .or_else(|| self.smtp.as_ref().map(|s| s.from.clone()))
                .unwrap_or_else(|| format!("no-reply@{}", host));
            let smtp = self.smtp.get_or_insert_with(|| SmtpSettings {
                host: host.clone(),
                port: default_smtp_port(),
                user: None,
                password: None,
                from: from.clone(),
            });
            smtp.host = host;
            smtp.from = from;
        }

        if let Some(smtp) = self.smtp.as_mut() {
            if let Some(port) = var("MEDCORE_SMTP_PORT")
                && let Ok(port_num) = port.parse()
            {
                smtp.port = port_num;
            }
            if let Some(user) = var("MEDCORE_SMTP_USER") {
                smtp.user = Some(user);
            }
            if let Some(password) = var("MEDCORE_SMTP_PASSWORD") {
                smtp.password = Some(password);
            }
            if let Some(from) = var("MEDCORE_SMTP_FROM") {
                smtp.from = from;
            }
        }
    }

    /// Get the full path to the users database
    pub fn users_db_path(&self) -> PathBuf {
        self.storage.data_dir.join(&self.storage.users_db)
    }

    pub fn single_create_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.verification.single_create_ttl_minutes)
    }

    pub fn bulk_create_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.verification.bulk_create_ttl_hours)
    }

    pub fn email_timeout(&self) -> Duration {
        Duration::from_secs(self.bulk.email_timeout_secs)
    }
}
