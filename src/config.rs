//! Configuration management
//!
//! All runtime configuration is environment-driven. `Config::from_env`
//! reads the recognized keys once at startup; components receive the
//! loaded struct (or the slices they need) through constructors.

use serde::{Deserialize, Serialize};

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppEnv {
    Development,
    Test,
    Production,
}

impl AppEnv {
    pub fn parse(s: &str) -> Self {
        match s {
            "production" => AppEnv::Production,
            "test" => AppEnv::Test,
            _ => AppEnv::Development,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AppEnv::Development => "development",
            AppEnv::Test => "test",
            AppEnv::Production => "production",
        }
    }
}

/// Which email provider backs the notification service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailProviderKind {
    Sendgrid,
    Ses,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Phone number that receives urgent SMS notifications
    pub staff_phone: String,
    /// Email address that receives callback notifications
    pub staff_email: String,

    /// Twilio credentials (webhook signature validation, SMS, transfers)
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    pub twilio_phone_number: String,

    /// Email provider selection and credentials
    pub email_provider: EmailProviderKind,
    pub sendgrid_api_key: String,
    pub sendgrid_from_email: String,
    pub aws_region: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub ses_from_email: String,

    /// Max SMS notifications per rolling hour
    pub sms_rate_limit: usize,
    /// Base URL for transcript links in notification emails
    pub transcript_base_url: String,

    /// Speech and language-model provider credentials
    pub deepgram_api_key: String,
    pub openai_api_key: String,
    pub openai_model: String,

    /// SQLite database location (a `sqlite://` prefix is accepted)
    pub database_url: String,

    pub app_env: AppEnv,
    /// Skip Twilio signature validation (development/test only)
    pub skip_twilio_validation: bool,
    pub log_level: String,
    /// Recognized for the staff dashboard; unused by the core
    pub dashboard_password: String,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            staff_phone: String::new(),
            staff_email: String::new(),
            twilio_account_sid: String::new(),
            twilio_auth_token: String::new(),
            twilio_phone_number: String::new(),
            email_provider: EmailProviderKind::Sendgrid,
            sendgrid_api_key: String::new(),
            sendgrid_from_email: "noreply@voxline.local".to_string(),
            aws_region: "us-east-1".to_string(),
            aws_access_key_id: String::new(),
            aws_secret_access_key: String::new(),
            ses_from_email: "noreply@voxline.local".to_string(),
            sms_rate_limit: 10,
            transcript_base_url: "https://voxline.local/transcripts".to_string(),
            deepgram_api_key: String::new(),
            openai_api_key: String::new(),
            openai_model: String::new(),
            database_url: "voxline.db".to_string(),
            app_env: AppEnv::Development,
            skip_twilio_validation: false,
            log_level: "info".to_string(),
            dashboard_password: String::new(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Config::default();
        Self {
            staff_phone: env_or("STAFF_PHONE", ""),
            staff_email: env_or("STAFF_EMAIL", ""),
            twilio_account_sid: env_or("TWILIO_ACCOUNT_SID", ""),
            twilio_auth_token: env_or("TWILIO_AUTH_TOKEN", ""),
            twilio_phone_number: env_or("TWILIO_PHONE_NUMBER", ""),
            email_provider: match env_or("EMAIL_PROVIDER", "sendgrid").to_lowercase().as_str() {
                "ses" => EmailProviderKind::Ses,
                _ => EmailProviderKind::Sendgrid,
            },
            sendgrid_api_key: env_or("SENDGRID_API_KEY", ""),
            sendgrid_from_email: env_or("SENDGRID_FROM_EMAIL", &defaults.sendgrid_from_email),
            aws_region: env_or("AWS_REGION", &defaults.aws_region),
            aws_access_key_id: env_or("AWS_ACCESS_KEY_ID", ""),
            aws_secret_access_key: env_or("AWS_SECRET_ACCESS_KEY", ""),
            ses_from_email: env_or("SES_FROM_EMAIL", &defaults.ses_from_email),
            sms_rate_limit: env_or("SMS_RATE_LIMIT", "10").parse().unwrap_or(10),
            transcript_base_url: env_or("TRANSCRIPT_BASE_URL", &defaults.transcript_base_url),
            deepgram_api_key: env_or("DEEPGRAM_API_KEY", ""),
            openai_api_key: env_or("OPENAI_API_KEY", ""),
            openai_model: env_or("OPENAI_MODEL", ""),
            database_url: env_or("DATABASE_URL", &defaults.database_url),
            app_env: AppEnv::parse(&env_or("APP_ENV", "development")),
            skip_twilio_validation: env_or("SKIP_TWILIO_VALIDATION", "false").to_lowercase() == "true",
            log_level: env_or("LOG_LEVEL", "info"),
            dashboard_password: env_or("DASHBOARD_PASSWORD", ""),
        }
    }

    pub fn is_production(&self) -> bool {
        self.app_env == AppEnv::Production
    }

    /// Signature validation is bypassed only outside production and
    /// only with the explicit skip flag set
    pub fn validation_skipped(&self) -> bool {
        !self.is_production() && self.skip_twilio_validation
    }

    /// SQLite path with an optional `sqlite://` scheme stripped
    pub fn database_path(&self) -> &str {
        self.database_url
            .strip_prefix("sqlite://")
            .unwrap_or(&self.database_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.sms_rate_limit, 10);
        assert_eq!(config.email_provider, EmailProviderKind::Sendgrid);
        assert_eq!(config.app_env, AppEnv::Development);
        assert!(!config.validation_skipped());
    }

    #[test]
    fn test_app_env_parse() {
        assert_eq!(AppEnv::parse("production"), AppEnv::Production);
        assert_eq!(AppEnv::parse("test"), AppEnv::Test);
        assert_eq!(AppEnv::parse("anything"), AppEnv::Development);
    }

    #[test]
    fn test_validation_skip_requires_non_production() {
        let mut config = Config {
            skip_twilio_validation: true,
            ..Config::default()
        };
        assert!(config.validation_skipped());
        config.app_env = AppEnv::Production;
        assert!(!config.validation_skipped());
    }

    #[test]
    fn test_database_path_scheme_stripped() {
        let config = Config {
            database_url: "sqlite:///var/lib/voxline.db".to_string(),
            ..Config::default()
        };
        assert_eq!(config.database_path(), "/var/lib/voxline.db");

        let plain = Config {
            database_url: "local.db".to_string(),
            ..Config::default()
        };
        assert_eq!(plain.database_path(), "local.db");
    }
}
