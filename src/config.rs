use secrecy::{ExposeSecret, SecretBox};
use std::env;
use std::path::PathBuf;
use thiserror::Error;

use crate::prompts::DEFAULT_INVENTORY_PATH;
use crate::session::SessionKey;

/// Model used when `DEMO_AGENT_MODEL` is not set
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-exp";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid API key format for {service}: {reason}")]
    InvalidKeyFormat { service: String, reason: String },
    #[error("Environment error: {0}")]
    EnvError(#[from] env::VarError),
}

/// Configuration for the live AI service
#[derive(Debug)]
pub struct ApiConfig {
    pub google_key: SecretBox<String>,
    pub model: String,
}

impl ApiConfig {
    /// Load API configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok();

        let google_key = match Self::load_api_key("GOOGLE_API_KEY", "Google AI") {
            Err(ConfigError::MissingEnvVar(_)) => {
                Self::load_api_key("GEMINI_API_KEY", "Google AI").map_err(|e| match e {
                    ConfigError::MissingEnvVar(_) => {
                        ConfigError::MissingEnvVar("GOOGLE_API_KEY".to_string())
                    }
                    other => other,
                })?
            }
            other => other?,
        };

        let model = env::var("DEMO_AGENT_MODEL")
            .ok()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        Ok(Self { google_key, model })
    }

    /// Load and validate a single API key from environment
    fn load_api_key(env_var: &str, service_name: &str) -> Result<SecretBox<String>, ConfigError> {
        let key = env::var(env_var).map_err(|_| ConfigError::MissingEnvVar(env_var.to_string()))?;

        if key.trim().is_empty() {
            return Err(ConfigError::InvalidKeyFormat {
                service: service_name.to_string(),
                reason: "API key cannot be empty".to_string(),
            });
        }

        Self::validate_key_format(key.trim(), service_name)?;

        Ok(SecretBox::new(Box::new(key.trim().to_string())))
    }

    /// Validate API key format for each service
    fn validate_key_format(key: &str, service: &str) -> Result<(), ConfigError> {
        match service {
            "Google AI" => {
                // Google API keys start with "AIza"
                if !key.starts_with("AIza") {
                    return Err(ConfigError::InvalidKeyFormat {
                        service: service.to_string(),
                        reason: "Google API keys should start with 'AIza'".to_string(),
                    });
                }
            }
            _ => {} // No validation for unknown services
        }
        Ok(())
    }

    /// Get the Google API key (use only when connecting)
    pub fn google_key(&self) -> &str {
        self.google_key.expose_secret()
    }

    /// Key prefix that is safe to log
    pub fn masked_key(&self) -> String {
        let prefix: String = self.google_key().chars().take(5).collect();
        format!("{}...", prefix)
    }
}

/// Load configuration with helpful error messages for development
pub fn load_config() -> Result<ApiConfig, ConfigError> {
    match ApiConfig::load() {
        Ok(config) => {
            log::info!(
                "Successfully loaded API configuration (key {}, model {})",
                config.masked_key(),
                config.model
            );
            Ok(config)
        }
        Err(ConfigError::MissingEnvVar(var)) => {
            log::error!("Missing required environment variable: {}", var);
            log::error!("Create a .env file in the project root with:");
            log::error!("{}=your_api_key_here", var);
            Err(ConfigError::MissingEnvVar(var))
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Configuration for the relay server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
    pub inventory_path: PathBuf,
    /// Ask the runtime for input/output audio transcripts
    pub transcription: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            app_name: "astral-granule".to_string(),
            user_id: "user_default".to_string(),
            session_id: "session_default".to_string(),
            inventory_path: PathBuf::from(DEFAULT_INVENTORY_PATH),
            transcription: true,
        }
    }
}

impl ServerConfig {
    /// The static session every connection attaches to
    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(&self.app_name, &self.user_id, &self.session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for var in ["GOOGLE_API_KEY", "GEMINI_API_KEY", "DEMO_AGENT_MODEL"] {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_key_validation() {
        assert!(ApiConfig::validate_key_format("AIzaSyTest123", "Google AI").is_ok());
        assert!(ApiConfig::validate_key_format("invalid", "Google AI").is_err());
        assert!(ApiConfig::validate_key_format("anything", "Other").is_ok());
    }

    #[test]
    #[serial]
    fn test_load_from_env() {
        clear_env();
        env::set_var("GOOGLE_API_KEY", "AIzaSyTest123");
        env::set_var("DEMO_AGENT_MODEL", "gemini-live-test");

        let config = ApiConfig::load().unwrap();
        assert_eq!(config.google_key(), "AIzaSyTest123");
        assert_eq!(config.model, "gemini-live-test");
        assert_eq!(config.masked_key(), "AIzaS...");
        clear_env();
    }

    #[test]
    #[serial]
    fn test_gemini_key_fallback_and_default_model() {
        clear_env();
        env::set_var("GEMINI_API_KEY", "AIzaFallback");

        let config = ApiConfig::load().unwrap();
        assert_eq!(config.google_key(), "AIzaFallback");
        assert_eq!(config.model, DEFAULT_MODEL);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_missing_and_invalid_keys() {
        clear_env();
        assert!(matches!(
            ApiConfig::load(),
            Err(ConfigError::MissingEnvVar(var)) if var == "GOOGLE_API_KEY"
        ));

        env::set_var("GOOGLE_API_KEY", "   ");
        assert!(matches!(
            ApiConfig::load(),
            Err(ConfigError::InvalidKeyFormat { .. })
        ));

        env::set_var("GOOGLE_API_KEY", "sk-wrong");
        assert!(matches!(
            ApiConfig::load(),
            Err(ConfigError::InvalidKeyFormat { .. })
        ));
        clear_env();
    }

    #[test]
    fn test_server_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address, "127.0.0.1:8080");
        assert_eq!(
            config.session_key(),
            SessionKey::new("astral-granule", "user_default", "session_default")
        );
    }
}
