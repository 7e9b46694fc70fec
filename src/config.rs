//! Runtime configuration.
//!
//! Read from the process environment exactly once at startup (`main`),
//! then passed into the clients and the server explicitly — pipeline code
//! never looks at the environment itself.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "Medicore";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default inference endpoint, matching the AI service's local deployment.
pub const DEFAULT_INFERENCE_URL: &str = "http://localhost:5000/predict";
/// Inference call timeout. Generous on purpose: slow model inference is
/// handled by waiting, not retrying.
pub const DEFAULT_INFERENCE_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub database_path: PathBuf,
    pub inference_url: String,
    pub inference_timeout_secs: u64,
    pub media_base_url: String,
    pub media_api_key: Option<String>,
    /// Exact allowed origin for browser clients; `None` means permissive.
    pub cors_origin: Option<String>,
    /// Optional pre-provisioned administrative bearer token, for
    /// deployments where the auth subsystem has not issued one yet.
    pub admin_token: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: ([127, 0, 0, 1], 4000).into(),
            database_path: app_data_dir().join("medicore.db"),
            inference_url: DEFAULT_INFERENCE_URL.to_string(),
            inference_timeout_secs: DEFAULT_INFERENCE_TIMEOUT_SECS,
            media_base_url: "http://localhost:9000".to_string(),
            media_api_key: None,
            cors_origin: None,
            admin_token: None,
        }
    }
}

impl AppConfig {
    /// Build the configuration from the environment. Unset or empty
    /// variables fall back to the defaults above.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: env_var("MEDICORE_BIND")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.bind_addr),
            database_path: env_var("MEDICORE_DB")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            inference_url: env_var("AI_SERVICE_URL").unwrap_or(defaults.inference_url),
            inference_timeout_secs: env_var("AI_SERVICE_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.inference_timeout_secs),
            media_base_url: env_var("MEDIA_STORE_URL").unwrap_or(defaults.media_base_url),
            media_api_key: env_var("MEDIA_STORE_API_KEY"),
            cors_origin: env_var("CORS_ORIGIN"),
            admin_token: env_var("MEDICORE_ADMIN_TOKEN"),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

/// Get the application data directory (~/Medicore/ on all platforms)
pub fn app_data_dir() -> PathBuf {
    let home = dirs::home_dir().expect("Cannot determine home directory");
    home.join(APP_NAME)
}

pub fn default_log_filter() -> &'static str {
    "medicore=info,tower_http=info"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_local_services() {
        let config = AppConfig::default();
        assert_eq!(config.inference_url, "http://localhost:5000/predict");
        assert_eq!(config.inference_timeout_secs, 120);
        assert_eq!(config.bind_addr.port(), 4000);
        assert!(config.cors_origin.is_none());
    }

    #[test]
    fn app_data_dir_under_home() {
        let dir = app_data_dir();
        let home = dirs::home_dir().unwrap();
        assert!(dir.starts_with(home));
        assert!(dir.ends_with(APP_NAME));
    }
}
