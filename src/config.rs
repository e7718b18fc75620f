//! Environment-backed settings for the LLM endpoint and the MySQL server.
//! `.env` loading happens at the binary entry point via dotenv.

use crate::db::DbSettings;
use crate::error::{PilotError, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub llm: LlmSettings,
    pub db: DbSettings,
    pub allow_dml: bool,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| PilotError::Config("OPENAI_API_KEY is not set".to_string()))?;

        let port = env_or("DB_PORT", "3306")
            .parse::<u16>()
            .map_err(|e| PilotError::Config(format!("invalid DB_PORT: {}", e)))?;

        let allow_dml = env_or("ALLOW_DML", "false")
            .parse::<bool>()
            .map_err(|e| PilotError::Config(format!("invalid ALLOW_DML: {}", e)))?;

        Ok(Self {
            llm: LlmSettings {
                api_key,
                base_url: env_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
                model: env_or("OPENAI_MODEL", "gpt-4o-mini"),
            },
            db: DbSettings {
                host: env_or("DB_HOST", "127.0.0.1"),
                port,
                user: env_or("DB_USER", "root"),
                password: env_or("DB_PASSWORD", ""),
            },
            allow_dml,
        })
    }
}
