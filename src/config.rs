use serde::Deserialize;
use std::collections::HashSet;
use config::{Config, ConfigError, Environment, File};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub upload_directory: String,
    pub allowed_extensions: HashSet<String>,
    pub max_upload_bytes: usize,
    pub web_port: u16,
    pub log_level: String,
    pub jwt_secret: String,
    pub token_lifetime_hours: i64,
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let env = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default"))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("APP"))
            .build()?;

        s.try_deserialize()
    }
}
