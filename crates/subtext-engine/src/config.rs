use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://subtext-backend-f8ci.vercel.app/api";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

const MIN_HTTP_TIMEOUT_SECS: u64 = 5;
const MAX_HTTP_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_base: String,
    pub timeout: Duration,
    pub store_path: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            store_path: default_store_path(),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `SUBTEXT_API_BASE`, `SUBTEXT_HTTP_TIMEOUT_SECS`
    /// and `SUBTEXT_STORE`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(base) = non_empty_env("SUBTEXT_API_BASE") {
            config = config.with_api_base(&base);
        }
        if let Some(secs) =
            non_empty_env("SUBTEXT_HTTP_TIMEOUT_SECS").and_then(|value| value.parse::<u64>().ok())
        {
            config.timeout = Duration::from_secs(
                secs.clamp(MIN_HTTP_TIMEOUT_SECS, MAX_HTTP_TIMEOUT_SECS),
            );
        }
        if let Some(path) = non_empty_env("SUBTEXT_STORE") {
            config.store_path = PathBuf::from(path);
        }
        config
    }

    /// Blank values are ignored; a trailing slash is dropped.
    pub fn with_api_base(mut self, base: &str) -> Self {
        let trimmed = base.trim().trim_end_matches('/');
        if !trimmed.is_empty() {
            self.api_base = trimmed.to_string();
        }
        self
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = path.into();
        self
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }
}

fn default_store_path() -> PathBuf {
    non_empty_env("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(".subtext")
        .join("store.json")
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
