use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::Error;
use crate::storage::FileTokenStore;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_STORAGE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Client configuration.
///
/// Use [`from_env()`](ClientConfig::from_env) for convention-based setup, or
/// [`new()`](ClientConfig::new) with `with_*` methods for full control.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ClientConfig {
    pub(crate) api_base_url: Url,
    pub(crate) token_path: Option<PathBuf>,
    pub(crate) request_timeout: Option<Duration>,
    pub(crate) storage_poll_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE_URL.parse().expect("valid default URL"))
    }
}

impl ClientConfig {
    #[must_use]
    pub fn new(api_base_url: Url) -> Self {
        Self {
            api_base_url,
            token_path: None,
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            storage_poll_interval: DEFAULT_STORAGE_POLL_INTERVAL,
        }
    }

    /// Reads `ARMOIRE_*` variables over the defaults.
    ///
    /// # Optional env vars
    /// - `ARMOIRE_API_BASE_URL`: backend base URL (default `http://localhost:8080`)
    /// - `ARMOIRE_TOKEN_PATH`: file holding the token (default `<config dir>/armoire/token`)
    /// - `ARMOIRE_TIMEOUT_SECS`: request timeout in seconds, `0` disables it
    /// - `ARMOIRE_STORAGE_POLL_MS`: how often to re-check the token file
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is set but invalid.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut config = Self::default();

        if let Some(url) = lookup("ARMOIRE_API_BASE_URL") {
            let url: Url = url
                .parse()
                .map_err(|e| Error::Config(format!("ARMOIRE_API_BASE_URL: {e}")))?;
            config = config.with_api_base_url(url);
        }
        if let Some(path) = lookup("ARMOIRE_TOKEN_PATH") {
            config = config.with_token_path(path);
        }
        if let Some(secs) = lookup("ARMOIRE_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("ARMOIRE_TIMEOUT_SECS: {e}")))?;
            config = config.with_request_timeout((secs > 0).then(|| Duration::from_secs(secs)));
        }
        if let Some(ms) = lookup("ARMOIRE_STORAGE_POLL_MS") {
            let ms: u64 = ms
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("ARMOIRE_STORAGE_POLL_MS: {e}")))?;
            if ms == 0 {
                return Err(Error::Config("ARMOIRE_STORAGE_POLL_MS must be positive".into()));
            }
            config = config.with_storage_poll_interval(Duration::from_millis(ms));
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_api_base_url(mut self, url: Url) -> Self {
        self.api_base_url = url;
        self
    }

    #[must_use]
    pub fn with_token_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_storage_poll_interval(mut self, interval: Duration) -> Self {
        self.storage_poll_interval = interval;
        self
    }

    #[must_use]
    pub fn api_base_url(&self) -> &Url {
        &self.api_base_url
    }

    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    #[must_use]
    pub fn storage_poll_interval(&self) -> Duration {
        self.storage_poll_interval
    }

    /// Configured token file, or the platform default.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no path is set and the platform has no
    /// config directory.
    pub fn token_path(&self) -> Result<PathBuf, Error> {
        match &self.token_path {
            Some(path) => Ok(path.clone()),
            None => FileTokenStore::default_path(),
        }
    }

    /// File-backed token store at [`token_path`](Self::token_path).
    ///
    /// # Errors
    ///
    /// See [`token_path`](Self::token_path).
    pub fn token_store(&self) -> Result<FileTokenStore, Error> {
        self.token_path().map(FileTokenStore::new)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.api_base_url().as_str(), "http://localhost:8080/");
        assert_eq!(config.request_timeout(), Some(DEFAULT_REQUEST_TIMEOUT));
        assert_eq!(config.storage_poll_interval(), DEFAULT_STORAGE_POLL_INTERVAL);
    }

    #[test]
    fn env_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("ARMOIRE_API_BASE_URL", "https://api.armoire.example/v1"),
            ("ARMOIRE_TOKEN_PATH", "/tmp/armoire-token"),
            ("ARMOIRE_TIMEOUT_SECS", "0"),
            ("ARMOIRE_STORAGE_POLL_MS", "250"),
        ]))
        .unwrap();
        assert_eq!(config.api_base_url().as_str(), "https://api.armoire.example/v1");
        assert_eq!(config.token_path().unwrap(), PathBuf::from("/tmp/armoire-token"));
        assert_eq!(config.request_timeout(), None);
        assert_eq!(config.storage_poll_interval(), Duration::from_millis(250));
    }

    #[test]
    fn invalid_values_are_config_errors() {
        for vars in [
            [("ARMOIRE_API_BASE_URL", "not a url")],
            [("ARMOIRE_TIMEOUT_SECS", "soon")],
            [("ARMOIRE_STORAGE_POLL_MS", "0")],
        ] {
            assert!(matches!(
                ClientConfig::from_lookup(lookup(&vars)),
                Err(Error::Config(_))
            ));
        }
    }

    #[test]
    fn builder_overrides() {
        let config = ClientConfig::default()
            .with_api_base_url("http://127.0.0.1:9000".parse().unwrap())
            .with_token_path("token.txt");
        assert_eq!(config.api_base_url().port(), Some(9000));
        assert_eq!(
            config.token_store().unwrap().path(),
            std::path::Path::new("token.txt")
        );
    }
}
