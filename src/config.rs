//! Bot configuration.
//!
//! Everything is read from the environment once at startup (a `.env` file is
//! honoured via `dotenvy`). The resulting [`BotConfig`] is immutable and shared
//! behind an `Arc` by every handler.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::info;

use crate::auth::AuthorizedUsers;

const DEFAULT_MODELS: &str = "gemini-1.5-pro,gemini-1.5-flash";
const DEFAULT_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_PDF_PAGES: usize = 5;
const DEFAULT_RENDER_SCALE: f32 = 2.0;
const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
const DEFAULT_SMTP_PORT: u16 = 465;

/// Runtime configuration for the whole process.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub telegram_token: String,
    pub authorized_users: AuthorizedUsers,
    pub inference: InferenceConfig,
    pub pdf: PdfConfig,
    pub email: EmailConfig,
}

/// Settings for the Gemini endpoint and the model rotation policy.
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub api_key: String,
    pub api_url: String,
    /// Candidate models in priority order.
    pub models: Vec<String>,
    pub timeout: Duration,
    /// Base delay before a rotation step; zero retries immediately.
    pub rotation_backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct PdfConfig {
    pub max_pages: usize,
    pub render_scale: f32,
    /// Directory containing the pdfium shared library. `None` binds the system one.
    pub pdfium_lib_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub sender: String,
    pub password: String,
    /// Recipient used by the "Send to Email" button.
    pub default_recipient: String,
    pub smtp_host: String,
    pub smtp_port: u16,
}

impl BotConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup. Blank values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &str| {
            get(key).with_context(|| format!("{} environment variable not set", key))
        };

        let authorized_users = AuthorizedUsers::parse(&require("AUTHORIZED_USERS")?)
            .context("Failed to parse AUTHORIZED_USERS")?;

        let models = split_list(&get("GEMINI_MODELS").unwrap_or_else(|| DEFAULT_MODELS.into()));
        if models.is_empty() {
            anyhow::bail!("GEMINI_MODELS must name at least one model");
        }

        let timeout_secs = parse_or(get("INFERENCE_TIMEOUT_SECS"), DEFAULT_TIMEOUT_SECS)
            .context("Invalid INFERENCE_TIMEOUT_SECS")?;
        let backoff_ms = parse_or(get("ROTATION_BACKOFF_MS"), 0u64)
            .context("Invalid ROTATION_BACKOFF_MS")?;
        let max_pages = parse_or(get("MAX_PDF_PAGES"), DEFAULT_MAX_PDF_PAGES)
            .context("Invalid MAX_PDF_PAGES")?;
        let render_scale = parse_or(get("PDF_RENDER_SCALE"), DEFAULT_RENDER_SCALE)
            .context("Invalid PDF_RENDER_SCALE")?;
        let smtp_port = parse_or(get("SMTP_PORT"), DEFAULT_SMTP_PORT)
            .context("Invalid SMTP_PORT")?;

        if max_pages == 0 {
            anyhow::bail!("MAX_PDF_PAGES must be at least 1");
        }

        let config = Self {
            telegram_token: require("TELEGRAM_TOKEN")?,
            authorized_users,
            inference: InferenceConfig {
                api_key: require("GOOGLE_API_KEY")?,
                api_url: get("GEMINI_API_URL")
                    .unwrap_or_else(|| DEFAULT_API_URL.to_string())
                    .trim_end_matches('/')
                    .to_string(),
                models,
                timeout: Duration::from_secs(timeout_secs),
                rotation_backoff: Duration::from_millis(backoff_ms),
            },
            pdf: PdfConfig {
                max_pages,
                render_scale,
                pdfium_lib_path: get("PDFIUM_LIB_PATH"),
            },
            email: EmailConfig {
                sender: require("EMAIL_ADDRESS")?,
                password: require("EMAIL_PASSWORD")?,
                default_recipient: require("USER_EMAIL")?,
                smtp_host: get("SMTP_HOST").unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string()),
                smtp_port,
            },
        };

        info!(
            "Loaded config: {} authorized users, models {:?}, max {} PDF pages",
            config.authorized_users.len(),
            config.inference.models,
            config.pdf.max_pages
        );

        Ok(config)
    }
}

/// Split a comma-separated list, dropping blank entries.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_or<T>(value: Option<String>, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("not a valid value: {:?}", raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, String> {
        HashMap::from([
            ("TELEGRAM_TOKEN", "123:abc".to_string()),
            ("GOOGLE_API_KEY", "key".to_string()),
            ("AUTHORIZED_USERS", "42, 7,,".to_string()),
            ("EMAIL_ADDRESS", "bot@example.com".to_string()),
            ("EMAIL_PASSWORD", "secret".to_string()),
            ("USER_EMAIL", "me@example.com".to_string()),
        ])
    }

    fn load(env: &HashMap<&'static str, String>) -> Result<BotConfig> {
        BotConfig::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn test_defaults_applied() {
        let config = load(&base_env()).unwrap();
        assert_eq!(config.inference.models, vec!["gemini-1.5-pro", "gemini-1.5-flash"]);
        assert_eq!(config.inference.timeout, Duration::from_secs(60));
        assert_eq!(config.inference.rotation_backoff, Duration::ZERO);
        assert_eq!(config.pdf.max_pages, 5);
        assert_eq!(config.email.smtp_host, "smtp.gmail.com");
        assert_eq!(config.email.smtp_port, 465);
        assert!(config.authorized_users.is_authorized(42));
        assert!(config.authorized_users.is_authorized(7));
        assert_eq!(config.authorized_users.len(), 2);
    }

    #[test]
    fn test_missing_required_fails() {
        for key in ["TELEGRAM_TOKEN", "GOOGLE_API_KEY", "USER_EMAIL"] {
            let mut env = base_env();
            env.remove(key);
            let err = load(&env).unwrap_err();
            assert!(err.to_string().contains(key), "{}", err);
        }
    }

    #[test]
    fn test_blank_value_counts_as_missing() {
        let mut env = base_env();
        env.insert("EMAIL_PASSWORD", "   ".to_string());
        assert!(load(&env).is_err());
    }

    #[test]
    fn test_custom_model_list() {
        let mut env = base_env();
        env.insert("GEMINI_MODELS", " a , b ,c".to_string());
        env.insert("GEMINI_API_URL", "http://localhost:9000/".to_string());
        let config = load(&env).unwrap();
        assert_eq!(config.inference.models, vec!["a", "b", "c"]);
        assert_eq!(config.inference.api_url, "http://localhost:9000");
    }

    #[test]
    fn test_empty_model_list_rejected() {
        let mut env = base_env();
        env.insert("GEMINI_MODELS", " , ,".to_string());
        assert!(load(&env).is_err());
    }

    #[test]
    fn test_invalid_numbers_rejected() {
        let mut env = base_env();
        env.insert("MAX_PDF_PAGES", "five".to_string());
        assert!(load(&env).is_err());

        let mut env = base_env();
        env.insert("AUTHORIZED_USERS", "42,bob".to_string());
        assert!(load(&env).is_err());
    }
}
