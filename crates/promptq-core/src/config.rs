// Static configuration, read once from a YAML file at startup
//
// Key casing follows the deployed config files (SCREAMING_SNAKE_CASE at the
// top level, plain snake_case inside handler entries). Cold-store credentials
// are the one exception to "everything in the file": they come from the
// environment so the file can be committed.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::handler::HandlerConfig;

/// Settings for the API server process.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ApiSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_backend_port")]
    pub backend_port: u16,
    #[serde(default = "default_frontend_port")]
    pub frontend_port: u16,
    #[serde(default = "default_redis_port")]
    pub redis_port: u16,
    #[serde(default)]
    pub redis_db: i64,

    pub secret_key: String,
    #[serde(default = "default_jwt_algorithm")]
    pub jwt_algorithm: String,
    #[serde(default = "default_token_expire_days")]
    pub access_token_expire_days: i64,

    #[serde(default)]
    pub use_gp_cold_store: bool,
    #[serde(default)]
    pub gp_host: String,
    #[serde(default = "default_gp_port")]
    pub gp_port: u16,
    #[serde(default)]
    pub gp_database: String,
    #[serde(default)]
    pub gp_schema: String,
    #[serde(default)]
    pub gp_table: String,
}

/// Settings for a worker process.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct WorkerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub redis_port: u16,
    #[serde(default)]
    pub redis_db: i64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    pub handlers: Vec<HandlerConfig>,
}

/// Cold-store connection parameters, credentials resolved from the
/// environment at assembly time.
#[derive(Debug, Clone)]
pub struct ColdStoreSettings {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub schema: String,
    pub table: String,
    pub username: String,
    pub password: String,
}

impl ColdStoreSettings {
    pub fn dsn(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database
        )
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_backend_port() -> u16 {
    8000
}

fn default_frontend_port() -> u16 {
    5000
}

fn default_redis_port() -> u16 {
    6379
}

fn default_jwt_algorithm() -> String {
    "HS256".to_string()
}

fn default_token_expire_days() -> i64 {
    90
}

fn default_gp_port() -> u16 {
    5432
}

fn default_max_retries() -> u32 {
    3
}

fn load_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
        path: path.display().to_string(),
        source,
    })?;
    serde_yaml::from_str(&raw).map_err(|source| ConfigError::Invalid {
        path: path.display().to_string(),
        source,
    })
}

impl ApiSettings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_yaml(path.as_ref())
    }

    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.redis_port, self.redis_db)
    }

    pub fn frontend_url(&self) -> String {
        format!("http://{}:{}", self.host, self.frontend_port)
    }

    pub fn cold_store(&self) -> ColdStoreSettings {
        ColdStoreSettings {
            host: self.gp_host.clone(),
            port: self.gp_port,
            database: self.gp_database.clone(),
            schema: self.gp_schema.clone(),
            table: self.gp_table.clone(),
            username: std::env::var("GP_USERNAME").unwrap_or_default(),
            password: std::env::var("GP_PASSWORD").unwrap_or_default(),
        }
    }
}

impl WorkerSettings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_yaml(path.as_ref())
    }

    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.redis_port, self.redis_db)
    }
}

/// Config file location: first CLI argument, then `PROMPTQ_CONFIG`, then
/// `config.yaml` next to the binary's working directory.
pub fn config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("PROMPTQ_CONFIG").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_settings_parse_with_defaults() {
        let yaml = "SECRET_KEY: s3cret\nBACKEND_PORT: 9000\n";
        let settings: ApiSettings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.secret_key, "s3cret");
        assert_eq!(settings.backend_port, 9000);
        assert_eq!(settings.host, "127.0.0.1");
        assert_eq!(settings.jwt_algorithm, "HS256");
        assert_eq!(settings.access_token_expire_days, 90);
        assert!(!settings.use_gp_cold_store);
        assert_eq!(settings.redis_url(), "redis://127.0.0.1:6379/0");
    }

    #[test]
    fn api_settings_require_secret_key() {
        assert!(serde_yaml::from_str::<ApiSettings>("HOST: 0.0.0.0\n").is_err());
    }

    #[test]
    fn worker_settings_parse_handlers() {
        let yaml = r#"
MAX_RETRIES: 5
HANDLERS:
  - name: Echo
    task_type: echo
    import_path: "builtin:echo"
    version: "1"
    description: returns the prompt
"#;
        let settings: WorkerSettings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.handlers.len(), 1);
        assert_eq!(settings.handlers[0].handler_id(), "echo:1");
    }
}
