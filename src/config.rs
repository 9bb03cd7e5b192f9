use std::{env, path::PathBuf};

const DEFAULT_API_BASE: &str = "http://127.0.0.1:8080";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Where one tracked domain's records live. Passed explicitly to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    /// Resource path under `base_url`, e.g. `daily` or `guitar/practice`.
    pub resource_path: String,
    pub timeout_secs: u64,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, resource_path: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            resource_path: resource_path.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Reads the service base URL from `TRACKER_API_BASE`.
    pub fn from_env(resource_path: impl Into<String>) -> Self {
        let base_url = env::var("TRACKER_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        Self::new(base_url, resource_path)
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn resource_segments(&self) -> impl Iterator<Item = &str> {
        self.resource_path.split('/').filter(|segment| !segment.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub data_path: PathBuf,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let port = env::var("PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(8080);
        let data_path = env::var("APP_DATA_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data/state.json"));
        Self { port, data_path }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_segments_skip_empty_parts() {
        let config = ClientConfig::new("http://localhost:8000", "/guitar//practice/");
        let segments: Vec<_> = config.resource_segments().collect();
        assert_eq!(segments, ["guitar", "practice"]);
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.with_timeout(5).timeout_secs, 5);
    }
}
