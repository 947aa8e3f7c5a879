//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub mpesa: MpesaConfig,
    pub mail: Option<MailConfig>,
    pub invoice: InvoiceConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
    pub run_migrations: bool,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// M-Pesa (Daraja) gateway settings.
///
/// Credentials stay optional here: a missing value is reported by the client as a
/// configuration error at call time instead of being defaulted.
#[derive(Debug, Clone)]
pub struct MpesaConfig {
    pub base_url: String,
    pub consumer_key: Option<String>,
    pub consumer_secret: Option<String>,
    pub shortcode: Option<String>,
    pub passkey: Option<String>,
    pub callback_url: Option<String>,
    pub auth_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub country_code: String,
    pub transaction_desc: String,
}

pub const MPESA_SANDBOX_URL: &str = "https://sandbox.safaricom.co.ke";
pub const MPESA_PRODUCTION_URL: &str = "https://api.safaricom.co.ke";

impl Default for MpesaConfig {
    fn default() -> Self {
        Self {
            base_url: MPESA_SANDBOX_URL.to_string(),
            consumer_key: None,
            consumer_secret: None,
            shortcode: None,
            passkey: None,
            callback_url: None,
            auth_timeout_secs: 10,
            request_timeout_secs: 30,
            country_code: "254".to_string(),
            transaction_desc: "Beauty Shop Purchase".to_string(),
        }
    }
}

/// SMTP settings for invoice delivery
#[derive(Clone)]
pub struct MailConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

impl std::fmt::Debug for MailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("from", &self.from)
            .finish()
    }
}

/// Invoice artifact settings
#[derive(Debug, Clone)]
pub struct InvoiceConfig {
    pub output_dir: PathBuf,
    pub company_name: String,
    pub support_email: Option<String>,
    pub currency: String,
}

impl Default for InvoiceConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("invoices"),
            company_name: "Beauty Shop Ltd".to_string(),
            support_email: None,
            currency: "KES".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            mpesa: MpesaConfig::from_env()?,
            mail: MailConfig::from_env()?,
            invoice: InvoiceConfig::from_env(),
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.logging.validate()?;
        self.mpesa.validate()?;
        if let Some(mail) = &self.mail {
            mail.validate()?;
        }

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MIN_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
            run_migrations: env::var("RUN_MIGRATIONS")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("RUN_MIGRATIONS".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl MpesaConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment =
            env::var("MPESA_ENVIRONMENT").unwrap_or_else(|_| "sandbox".to_string());
        let base_url = match non_empty_var("MPESA_BASE_URL") {
            Some(url) => url,
            None => match environment.to_lowercase().as_str() {
                "production" | "live" => MPESA_PRODUCTION_URL.to_string(),
                "sandbox" => MPESA_SANDBOX_URL.to_string(),
                _ => return Err(ConfigError::InvalidValue("MPESA_ENVIRONMENT".to_string())),
            },
        };

        Ok(MpesaConfig {
            base_url,
            consumer_key: non_empty_var("MPESA_CONSUMER_KEY"),
            consumer_secret: non_empty_var("MPESA_CONSUMER_SECRET"),
            shortcode: non_empty_var("MPESA_SHORTCODE"),
            passkey: non_empty_var("MPESA_PASSKEY"),
            callback_url: non_empty_var("MPESA_CALLBACK_URL"),
            auth_timeout_secs: env::var("MPESA_AUTH_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("MPESA_AUTH_TIMEOUT_SECS".to_string()))?,
            request_timeout_secs: env::var("MPESA_REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| {
                    ConfigError::InvalidValue("MPESA_REQUEST_TIMEOUT_SECS".to_string())
                })?,
            country_code: env::var("MPESA_COUNTRY_CODE").unwrap_or_else(|_| "254".to_string()),
            transaction_desc: env::var("MPESA_TRANSACTION_DESC")
                .unwrap_or_else(|_| "Beauty Shop Purchase".to_string()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "MPESA_BASE_URL must be a valid URL".to_string(),
            ));
        }

        if self.auth_timeout_secs == 0 || self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "M-Pesa timeouts must be greater than zero".to_string(),
            ));
        }

        if self.country_code.is_empty() || !self.country_code.chars().all(|c| c.is_ascii_digit())
        {
            return Err(ConfigError::InvalidValue("MPESA_COUNTRY_CODE".to_string()));
        }

        Ok(())
    }

    /// Names of the credentials required for an STK push that are not set
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.consumer_key.is_none() {
            missing.push("MPESA_CONSUMER_KEY");
        }
        if self.consumer_secret.is_none() {
            missing.push("MPESA_CONSUMER_SECRET");
        }
        if self.shortcode.is_none() {
            missing.push("MPESA_SHORTCODE");
        }
        if self.passkey.is_none() {
            missing.push("MPESA_PASSKEY");
        }
        if self.callback_url.is_none() {
            missing.push("MPESA_CALLBACK_URL");
        }
        missing
    }
}

impl MailConfig {
    /// Returns `None` when no SMTP server is configured; delivery is then disabled.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let server = match non_empty_var("MAIL_SERVER") {
            Some(server) => server,
            None => return Ok(None),
        };

        Ok(Some(MailConfig {
            server,
            port: env::var("MAIL_PORT")
                .unwrap_or_else(|_| "587".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("MAIL_PORT".to_string()))?,
            username: non_empty_var("MAIL_USERNAME")
                .ok_or_else(|| ConfigError::MissingVariable("MAIL_USERNAME".to_string()))?,
            password: non_empty_var("MAIL_PASSWORD")
                .ok_or_else(|| ConfigError::MissingVariable("MAIL_PASSWORD".to_string()))?,
            from: non_empty_var("MAIL_FROM")
                .ok_or_else(|| ConfigError::MissingVariable("MAIL_FROM".to_string()))?,
        }))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue("MAIL_PORT cannot be 0".to_string()));
        }

        if !self.from.contains('@') {
            return Err(ConfigError::InvalidValue(
                "MAIL_FROM must be an email address".to_string(),
            ));
        }

        Ok(())
    }
}

impl InvoiceConfig {
    pub fn from_env() -> Self {
        let defaults = InvoiceConfig::default();
        InvoiceConfig {
            output_dir: non_empty_var("INVOICE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            company_name: non_empty_var("INVOICE_COMPANY_NAME").unwrap_or(defaults.company_name),
            support_email: non_empty_var("INVOICE_SUPPORT_EMAIL"),
            currency: non_empty_var("CURRENCY").unwrap_or(defaults.currency),
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),
}
