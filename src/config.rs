use crate::constants;
use crate::error::{IngestError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Tunables loaded from `config.toml`. Every section is optional.
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    #[serde(default)]
    pub setlist: SetlistConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub page_pause_ms: u64,
    pub seed_pause_ms: u64,
    pub chunk_pause_ms: u64,
    pub request_timeout_secs: u64,
    pub events_table: String,
    pub jambase_max_pages: u32,
    pub ticketmaster_months_ahead: u32,
    pub checkpoint_dir: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            page_pause_ms: 300,
            seed_pause_ms: 500,
            chunk_pause_ms: 200,
            request_timeout_secs: 25,
            events_table: constants::EVENTS_TABLE.to_string(),
            jambase_max_pages: constants::JAMBASE_MAX_SEARCH_PAGES,
            ticketmaster_months_ahead: 6,
            checkpoint_dir: "data".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn page_pause(&self) -> Duration {
        Duration::from_millis(self.page_pause_ms)
    }

    pub fn seed_pause(&self) -> Duration {
        Duration::from_millis(self.seed_pause_ms)
    }

    pub fn chunk_pause(&self) -> Duration {
        Duration::from_millis(self.chunk_pause_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Requests per minute per provider; 0 disables the limiter
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub ticketmaster: u64,
    pub jambase: u64,
    pub spotify: u64,
    pub setlistfm: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            ticketmaster: 300,
            jambase: 120,
            spotify: 180,
            setlistfm: 60,
        }
    }
}

impl RateLimitConfig {
    pub fn for_provider(&self, provider: &str) -> u64 {
        match provider {
            constants::TICKETMASTER => self.ticketmaster,
            constants::JAMBASE => self.jambase,
            constants::SPOTIFY => self.spotify,
            constants::SETLIST_FM => self.setlistfm,
            _ => 0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SetlistConfig {
    pub proxies: Vec<String>,
    pub use_cache: bool,
}

impl Default for SetlistConfig {
    fn default() -> Self {
        Self {
            proxies: constants::DEFAULT_SETLIST_PROXIES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            use_cache: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub events_table: String,
    pub response_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            events_table: constants::CACHE_EVENTS_TABLE.to_string(),
            response_timeout_secs: 25,
        }
    }
}

impl Config {
    /// Load from an explicit path (must exist) or from `config.toml` when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (config_path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Path::new(DEFAULT_CONFIG_PATH).to_path_buf(), false),
        };

        if !config_path.exists() {
            if required {
                return Err(IngestError::Config(format!(
                    "Config file '{}' does not exist",
                    config_path.display()
                )));
            }
            return Ok(Config::default());
        }

        let config_content = fs::read_to_string(&config_path).map_err(|e| {
            IngestError::Config(format!(
                "Failed to read config file '{}': {}",
                config_path.display(),
                e
            ))
        })?;

        let config: Config = toml::from_str(&config_content)?;
        if config.pipeline.batch_size == 0 {
            return Err(IngestError::Config("pipeline.batch_size must be > 0".into()));
        }
        Ok(config)
    }
}

#[derive(Debug, Clone)]
pub struct SupabaseCredentials {
    pub url: String,
    pub service_key: String,
}

#[derive(Debug, Clone)]
pub struct SpotifyCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Credentials read from the environment. Lookups accept the alternate names
/// used across deployment environments.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub ticketmaster_api_key: Option<String>,
    pub jambase_api_key: Option<String>,
    pub spotify_client_id: Option<String>,
    pub spotify_client_secret: Option<String>,
    pub setlist_fm_api_key: Option<String>,
    pub supabase_url: Option<String>,
    pub supabase_service_key: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| lookup(k))
                .map(|v| v.trim().to_string())
                .find(|v| !v.is_empty())
        };

        Self {
            ticketmaster_api_key: first(&["TICKETMASTER_API_KEY", "TM_API_KEY"]),
            jambase_api_key: first(&["JAMBASE_API_KEY"]),
            spotify_client_id: first(&["SPOTIFY_CLIENT_ID"]),
            spotify_client_secret: first(&["SPOTIFY_CLIENT_SECRET"]),
            setlist_fm_api_key: first(&["SETLIST_FM_API_KEY"]),
            supabase_url: first(&["SUPABASE_URL"]).or_else(|| {
                first(&["SUPABASE_PROJECT_REF"]).map(|r| format!("https://{}.supabase.co", r))
            }),
            supabase_service_key: first(&["SUPABASE_SERVICE_ROLE_KEY", "SUPABASE_SERVICE_KEY"]),
        }
    }

    fn require(value: &Option<String>, name: &str) -> Result<String> {
        value
            .clone()
            .ok_or_else(|| IngestError::MissingCredential(name.to_string()))
    }

    pub fn require_ticketmaster(&self) -> Result<String> {
        Self::require(&self.ticketmaster_api_key, "TICKETMASTER_API_KEY (or TM_API_KEY)")
    }

    pub fn require_jambase(&self) -> Result<String> {
        Self::require(&self.jambase_api_key, "JAMBASE_API_KEY")
    }

    pub fn require_spotify(&self) -> Result<SpotifyCredentials> {
        Ok(SpotifyCredentials {
            client_id: Self::require(&self.spotify_client_id, "SPOTIFY_CLIENT_ID")?,
            client_secret: Self::require(&self.spotify_client_secret, "SPOTIFY_CLIENT_SECRET")?,
        })
    }

    pub fn require_supabase(&self) -> Result<SupabaseCredentials> {
        Ok(SupabaseCredentials {
            url: Self::require(&self.supabase_url, "SUPABASE_URL")?,
            service_key: Self::require(
                &self.supabase_service_key,
                "SUPABASE_SERVICE_ROLE_KEY (or SUPABASE_SERVICE_KEY)",
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_missing_default_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(None);
        // Only assert defaults when the working directory has no config.toml
        if !Path::new(DEFAULT_CONFIG_PATH).exists() {
            let cfg = cfg.unwrap();
            assert_eq!(cfg.pipeline.batch_size, 500);
            assert_eq!(cfg.server.response_timeout_secs, 25);
        }
        let missing = dir.path().join("nope.toml");
        assert!(matches!(Config::load(Some(&missing)), Err(IngestError::Config(_))));
    }

    #[test]
    fn test_partial_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[pipeline]\nbatch_size = 250\n\n[setlist]\nproxies = [\"http://a\"]").unwrap();

        let cfg = Config::load(Some(file.path())).unwrap();
        assert_eq!(cfg.pipeline.batch_size, 250);
        assert_eq!(cfg.pipeline.page_pause_ms, 300);
        assert_eq!(cfg.setlist.proxies, vec!["http://a".to_string()]);
        assert!(cfg.setlist.use_cache);
        assert_eq!(cfg.rate_limits.ticketmaster, 300);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[pipeline]\nbatch_size = 0").unwrap();
        assert!(Config::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_credentials_fallback_names() {
        let env: HashMap<&str, &str> = [
            ("TM_API_KEY", "tm-key"),
            ("SUPABASE_PROJECT_REF", "abc123"),
            ("SUPABASE_SERVICE_KEY", "svc"),
            ("JAMBASE_API_KEY", "  "),
        ]
        .into_iter()
        .collect();
        let creds = Credentials::from_lookup(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(creds.require_ticketmaster().unwrap(), "tm-key");
        let sb = creds.require_supabase().unwrap();
        assert_eq!(sb.url, "https://abc123.supabase.co");
        assert_eq!(sb.service_key, "svc");
        assert!(matches!(
            creds.require_jambase(),
            Err(IngestError::MissingCredential(_))
        ));
        assert!(creds.require_spotify().is_err());
    }
}
