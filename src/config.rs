//! Service configuration.
//!
//! Everything is read from the environment once at startup (after `.env` is
//! loaded) and is read-only afterwards. Providers whose variables are missing
//! are left disabled; their endpoints fail after validation.

use std::env;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;
const DEFAULT_AZURE_MODEL: &str = "prebuilt-layout";
const DEFAULT_AZURE_API_VERSION: &str = "2024-11-30";
const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;
const DEFAULT_POLL_TIMEOUT_SECS: u64 = 600;
/// Upper bound on how long a request may wait on a provider job.
const MAX_POLL_TIMEOUT_SECS: u64 = 24 * 60 * 60;
const DEFAULT_SUPABASE_TABLE: &str = "ocr_extractions";

#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    /// Shared secret compared against the `secret` form field.
    pub endpoint_secret: String,
    pub max_upload_bytes: usize,
    pub azure: Option<AzureSettings>,
    pub textract: Option<TextractSettings>,
    pub poll: PollPolicy,
    pub supabase: Option<SupabaseSettings>,
    pub jwt: Option<JwtSettings>,
}

#[derive(Debug, Clone)]
pub struct AzureSettings {
    pub endpoint: String,
    pub api_key: String,
    pub default_model: String,
    pub api_version: String,
}

#[derive(Debug, Clone)]
pub struct TextractSettings {
    /// Staging bucket for asynchronous jobs. Without it only the
    /// synchronous endpoint works.
    pub s3_bucket: Option<String>,
}

/// How long and how often the poller waits on a provider job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            timeout: Duration::from_secs(DEFAULT_POLL_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SupabaseSettings {
    pub url: String,
    pub service_role_key: String,
    pub table: String,
}

#[derive(Debug, Clone)]
pub struct JwtSettings {
    pub key: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

impl Settings {
    /// Load settings from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load settings through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let endpoint_secret = var("ENDPOINT_SECRET")
            .ok_or_else(|| anyhow!("ENDPOINT_SECRET environment variable not set"))?;

        let max_upload_bytes = parse_or(&var, "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;

        let azure = match (var("FORM_RECOGNIZER_ENDPOINT"), var("FORM_RECOGNIZER_API_KEY")) {
            (Some(endpoint), Some(api_key)) => Some(AzureSettings {
                endpoint: endpoint.trim_end_matches('/').to_string(),
                api_key,
                default_model: var("FORM_RECOGNIZER_MODEL")
                    .unwrap_or_else(|| DEFAULT_AZURE_MODEL.to_string()),
                api_version: var("FORM_RECOGNIZER_API_VERSION")
                    .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string()),
            }),
            (None, None) => {
                info!("Document Intelligence not configured; /ocr-1 and /upload disabled");
                None
            }
            _ => {
                warn!("Only one of FORM_RECOGNIZER_ENDPOINT / FORM_RECOGNIZER_API_KEY is set; Document Intelligence disabled");
                None
            }
        };

        let textract = if var("TEXTRACT_DISABLED").is_some() {
            info!("Textract disabled by TEXTRACT_DISABLED");
            None
        } else {
            let s3_bucket = var("TEXTRACT_S3_BUCKET");
            if s3_bucket.is_none() {
                info!("TEXTRACT_S3_BUCKET not set; /ocr-2-async disabled");
            }
            Some(TextractSettings { s3_bucket })
        };

        let poll_interval_ms = parse_or(&var, "POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?;
        if poll_interval_ms == 0 {
            return Err(anyhow!("POLL_INTERVAL_MS must be greater than zero"));
        }
        let poll_timeout_secs = parse_or(&var, "POLL_TIMEOUT_SECS", DEFAULT_POLL_TIMEOUT_SECS)?;
        if poll_timeout_secs > MAX_POLL_TIMEOUT_SECS {
            return Err(anyhow!(
                "POLL_TIMEOUT_SECS must be at most {} (got {})",
                MAX_POLL_TIMEOUT_SECS,
                poll_timeout_secs
            ));
        }
        let poll = PollPolicy {
            interval: Duration::from_millis(poll_interval_ms),
            timeout: Duration::from_secs(poll_timeout_secs),
        };

        let supabase = match (var("SUPABASE_URL"), var("SUPABASE_SERVICE_ROLE_KEY")) {
            (Some(url), Some(service_role_key)) => Some(SupabaseSettings {
                url: url.trim_end_matches('/').to_string(),
                service_role_key,
                table: var("SUPABASE_TABLE").unwrap_or_else(|| DEFAULT_SUPABASE_TABLE.to_string()),
            }),
            _ => None,
        };

        let jwt = var("JWT_KEY").map(|key| JwtSettings {
            key,
            issuer: var("JWT_ISSUER"),
            audience: var("JWT_AUDIENCE"),
        });

        Ok(Self {
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            endpoint_secret,
            max_upload_bytes,
            azure,
            textract,
            poll,
            supabase,
            jwt,
        })
    }
}

fn parse_or<T, F>(var: &F, name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", name, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Settings> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_secret_is_required() {
        assert!(load(&[]).is_err());
        assert!(load(&[("ENDPOINT_SECRET", "  ")]).is_err());
    }

    #[test]
    fn test_defaults() {
        let settings = load(&[("ENDPOINT_SECRET", "s3cret")]).unwrap();
        assert_eq!(settings.bind_addr, "0.0.0.0:3000");
        assert_eq!(settings.max_upload_bytes, 50 * 1024 * 1024);
        assert!(settings.azure.is_none());
        assert!(settings.textract.as_ref().unwrap().s3_bucket.is_none());
        assert_eq!(settings.poll, PollPolicy::default());
        assert!(settings.supabase.is_none());
        assert!(settings.jwt.is_none());
    }

    #[test]
    fn test_providers_and_poll_policy() {
        let settings = load(&[
            ("ENDPOINT_SECRET", "s3cret"),
            ("FORM_RECOGNIZER_ENDPOINT", "https://example.cognitiveservices.azure.com/"),
            ("FORM_RECOGNIZER_API_KEY", "key"),
            ("TEXTRACT_S3_BUCKET", "staging"),
            ("POLL_INTERVAL_MS", "250"),
            ("POLL_TIMEOUT_SECS", "30"),
        ])
        .unwrap();

        let azure = settings.azure.unwrap();
        assert_eq!(azure.endpoint, "https://example.cognitiveservices.azure.com");
        assert_eq!(azure.default_model, "prebuilt-layout");
        assert_eq!(
            settings.textract.unwrap().s3_bucket.as_deref(),
            Some("staging")
        );
        assert_eq!(settings.poll.interval, Duration::from_millis(250));
        assert_eq!(settings.poll.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_number_is_an_error() {
        assert!(load(&[("ENDPOINT_SECRET", "s"), ("POLL_INTERVAL_MS", "soon")]).is_err());
    }

    #[test]
    fn test_poll_policy_bounds() {
        assert!(load(&[("ENDPOINT_SECRET", "s"), ("POLL_INTERVAL_MS", "0")]).is_err());
        assert!(load(&[
            ("ENDPOINT_SECRET", "s"),
            ("POLL_TIMEOUT_SECS", "18446744073709551615")
        ])
        .is_err());

        let settings = load(&[("ENDPOINT_SECRET", "s"), ("POLL_TIMEOUT_SECS", "86400")]).unwrap();
        assert_eq!(settings.poll.timeout, Duration::from_secs(86_400));
    }

    #[test]
    fn test_textract_can_be_disabled() {
        let settings = load(&[("ENDPOINT_SECRET", "s"), ("TEXTRACT_DISABLED", "1")]).unwrap();
        assert!(settings.textract.is_none());
    }
}
