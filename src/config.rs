use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Built-in token secret. Only fit for local development.
pub const DEFAULT_ACCESS_TOKEN_SECRET: &str = "change-me";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServerSection {
    pub port: Option<u16>,
    pub upload_dir: Option<String>,
    pub max_file_size: Option<u64>,
    pub cors_origin: Option<String>,
    pub request_timeout_seconds: Option<u64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StorageSection {
    pub backend: Option<String>,
    pub mongodb_uri: Option<String>,
    pub database: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    pub timeout_seconds: u64,
    pub api_base: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            cloud_name: String::new(),
            api_key: String::new(),
            api_secret: String::new(),
            timeout_seconds: 120,
            api_base: "https://api.cloudinary.com".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub access_token_secret: String,
}

impl AuthConfig {
    pub fn uses_default_secret(&self) -> bool {
        self.access_token_secret == DEFAULT_ACCESS_TOKEN_SECRET
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_token_secret: DEFAULT_ACCESS_TOKEN_SECRET.to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    pub default_limit: u64,
    pub max_limit: u64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_limit: 100,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub cleanup_interval_seconds: u64,
    pub cleanup_max_age_seconds: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_seconds: 15 * 60,
            cleanup_max_age_seconds: 60 * 60,
        }
    }
}

/// Shape of `config.toml`. Every section and key is optional.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub server: ServerSection,
    pub storage: StorageSection,
    pub media: Option<MediaConfig>,
    pub auth: Option<AuthConfig>,
    pub pagination: Option<PaginationConfig>,
    pub limits: Option<LimitsConfig>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Mongo,
    Memory,
}

impl StorageBackend {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mongo" | "mongodb" => Some(StorageBackend::Mongo),
            "memory" | "in-memory" => Some(StorageBackend::Memory),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::Mongo => "mongodb",
            StorageBackend::Memory => "in-memory",
        }
    }
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub mongodb_uri: String,
    pub database: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub upload_dir: PathBuf,
    pub max_file_size: u64,
    /// `None` allows any origin.
    pub cors_origin: Option<String>,
    pub request_timeout_seconds: u64,
    pub storage: StorageConfig,
    pub media: MediaConfig,
    pub auth: AuthConfig,
    pub pagination: PaginationConfig,
    pub limits: LimitsConfig,
}

impl Config {
    /// Reads `config.toml` from the working directory, if there is one.
    pub fn load() -> anyhow::Result<Self> {
        let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

        let config_path = base_dir.join("config.toml");
        let content = if config_path.exists() {
            Some(std::fs::read_to_string(&config_path)?)
        } else {
            None
        };

        Ok(Self::layered(
            content.as_deref(),
            |key| std::env::var(key).ok(),
            &base_dir,
        ))
    }

    /// An unparseable file only loses the file layer.
    fn layered(content: Option<&str>, env: impl Fn(&str) -> Option<String>, base_dir: &Path) -> Self {
        let file = match content.map(toml::from_str::<ConfigFile>) {
            Some(Ok(file)) => file,
            Some(Err(e)) => {
                warn!("[config] Ignoring invalid config.toml: {}", e);
                ConfigFile::default()
            }
            None => ConfigFile::default(),
        };

        Self::resolve(file, env, base_dir)
    }

    /// Env values win over file values, which win over defaults.
    fn resolve(file: ConfigFile, env: impl Fn(&str) -> Option<String>, base_dir: &Path) -> Self {
        let server = file.server;
        let storage = file.storage;

        let port = env("PORT")
            .and_then(|p| p.parse().ok())
            .or(server.port)
            .unwrap_or(8000);

        let upload_dir_str = env("UPLOAD_DIR")
            .or(server.upload_dir)
            .unwrap_or_else(|| "public/temp".to_string());
        let upload_dir = if Path::new(&upload_dir_str).is_absolute() {
            PathBuf::from(upload_dir_str)
        } else {
            base_dir.join(upload_dir_str)
        };

        let max_file_size = env("MAX_FILE_SIZE")
            .and_then(|v| v.parse().ok())
            .or(server.max_file_size)
            .unwrap_or(500 * 1024 * 1024);

        let cors_origin = env("CORS_ORIGIN")
            .or(server.cors_origin)
            .filter(|origin| origin != "*" && !origin.is_empty());

        let request_timeout_seconds = server.request_timeout_seconds.unwrap_or(300);

        let backend = env("STORAGE_BACKEND")
            .or(storage.backend)
            .and_then(|raw| StorageBackend::parse(&raw))
            .unwrap_or(StorageBackend::Mongo);

        let storage = StorageConfig {
            backend,
            mongodb_uri: env("MONGODB_URI")
                .or(storage.mongodb_uri)
                .unwrap_or_else(|| "mongodb://localhost:27017".to_string()),
            database: env("DB_NAME")
                .or(storage.database)
                .unwrap_or_else(|| "vidtube".to_string()),
        };

        let mut media = file.media.unwrap_or_default();
        if let Some(v) = env("CLOUDINARY_CLOUD_NAME") {
            media.cloud_name = v;
        }
        if let Some(v) = env("CLOUDINARY_API_KEY") {
            media.api_key = v;
        }
        if let Some(v) = env("CLOUDINARY_API_SECRET") {
            media.api_secret = v;
        }

        let mut auth = file.auth.unwrap_or_default();
        if let Some(v) = env("ACCESS_TOKEN_SECRET") {
            auth.access_token_secret = v;
        }

        Self {
            port,
            upload_dir,
            max_file_size,
            cors_origin,
            request_timeout_seconds,
            storage,
            media,
            auth,
            pagination: file.pagination.unwrap_or_default(),
            limits: file.limits.unwrap_or_default(),
        }
    }

    pub fn from_env() -> Self {
        let config = Self::load().unwrap_or_else(|e| {
            warn!("[config] Failed to read config.toml: {}. Using env and defaults.", e);
            let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            Self::resolve(ConfigFile::default(), |key| std::env::var(key).ok(), &base_dir)
        });

        if config.auth.uses_default_secret() {
            warn!(
                "[config] ⚠️  ACCESS_TOKEN_SECRET is not set; tokens are signed with the built-in development secret"
            );
        }
        config
    }
}

impl Default for Config {
    fn default() -> Self {
        let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::resolve(ConfigFile::default(), |_| None, &base_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_file_or_env() {
        let config = Config::resolve(ConfigFile::default(), |_| None, Path::new("/srv"));

        assert_eq!(config.port, 8000);
        assert_eq!(config.upload_dir, PathBuf::from("/srv/public/temp"));
        assert_eq!(config.storage.backend, StorageBackend::Mongo);
        assert_eq!(config.pagination.default_limit, 10);
        assert_eq!(config.pagination.max_limit, 100);
        assert!(config.cors_origin.is_none());
    }

    #[test]
    fn env_overrides_file() {
        let file: ConfigFile = toml::from_str(
            r#"
            [server]
            port = 4000
            upload_dir = "/tmp/up"

            [storage]
            backend = "memory"

            [media]
            cloud_name = "from-file"
            api_key = "k"
            api_secret = "s"
            timeout_seconds = 30
            api_base = "http://localhost:9000"

            [pagination]
            default_limit = 20
            max_limit = 50
            "#,
        )
        .unwrap();

        let config = Config::resolve(
            file,
            env_of(&[("PORT", "5000"), ("CLOUDINARY_CLOUD_NAME", "from-env")]),
            Path::new("/srv"),
        );

        assert_eq!(config.port, 5000);
        assert_eq!(config.upload_dir, PathBuf::from("/tmp/up"));
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.media.cloud_name, "from-env");
        assert_eq!(config.media.api_key, "k");
        assert_eq!(config.pagination.default_limit, 20);
    }

    #[test]
    fn partial_sections_keep_their_defaults() {
        let file: ConfigFile = toml::from_str(
            r#"
            [media]
            cloud_name = "demo"

            [pagination]
            max_limit = 25
            "#,
        )
        .unwrap();

        let config = Config::resolve(
            file,
            env_of(&[("ACCESS_TOKEN_SECRET", "real-secret")]),
            Path::new("/srv"),
        );

        assert_eq!(config.media.cloud_name, "demo");
        assert_eq!(config.media.timeout_seconds, 120);
        assert_eq!(config.media.api_base, "https://api.cloudinary.com");
        assert_eq!(config.pagination.default_limit, 10);
        assert_eq!(config.pagination.max_limit, 25);
        assert_eq!(config.auth.access_token_secret, "real-secret");
        assert!(!config.auth.uses_default_secret());
    }

    #[test]
    fn empty_auth_section_falls_back_to_the_default_secret() {
        let file: ConfigFile = toml::from_str("[auth]\n[limits]\ncleanup_interval_seconds = 60\n").unwrap();
        let config = Config::resolve(file, |_| None, Path::new("/srv"));

        assert!(config.auth.uses_default_secret());
        assert_eq!(config.limits.cleanup_interval_seconds, 60);
        assert_eq!(config.limits.cleanup_max_age_seconds, 3600);
    }

    #[test]
    fn invalid_file_still_honours_env() {
        let config = Config::layered(
            Some("[media\ncloud_name = 3"),
            env_of(&[("ACCESS_TOKEN_SECRET", "real-secret"), ("PORT", "9100")]),
            Path::new("/srv"),
        );

        assert_eq!(config.auth.access_token_secret, "real-secret");
        assert_eq!(config.port, 9100);
        assert_eq!(config.media.timeout_seconds, 120);
    }

    #[test]
    fn unknown_backend_falls_back_to_mongo() {
        let config = Config::resolve(
            ConfigFile::default(),
            env_of(&[("STORAGE_BACKEND", "redis"), ("CORS_ORIGIN", "https://app.example")]),
            Path::new("/srv"),
        );
        assert_eq!(config.storage.backend, StorageBackend::Mongo);
        assert_eq!(config.cors_origin.as_deref(), Some("https://app.example"));
    }
}
