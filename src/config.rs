use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    /// Base URL used to build the public download link in upload responses.
    pub public_base_url: String,
    /// Ordered list of backend database paths; position is priority.
    pub backend_paths: Vec<String>,
    /// Directory for the pending-disk staging tier.
    pub pending_dir: String,
    /// Maximum chunk payload size in bytes.
    pub chunk_size: usize,
    /// Maximum upload size in bytes.
    pub max_upload_size: u64,
    /// Largest single value a backend will accept.
    pub backend_value_cap: u64,
    pub reconcile_interval_secs: u64,
    /// Lowercase MIME deny list; `type/subtype` or bare primary type.
    pub blocked_mime_types: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            public_base_url: "http://localhost:8080".to_string(),
            backend_paths: vec!["./data/backend-0.redb".to_string()],
            pending_dir: "./data/pending".to_string(),
            chunk_size: 8 * 1024 * 1024,
            max_upload_size: 50 * 1024 * 1024, // 50MB
            backend_value_cap: 64 * 1024 * 1024,
            reconcile_interval_secs: 30,
            blocked_mime_types: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or(defaults.bind_address);

        let public_base_url = std::env::var("PUBLIC_BASE_URL")
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or(defaults.public_base_url);

        let backend_paths: Vec<String> = std::env::var("BACKEND_PATHS")
            .map(|p| {
                p.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.backend_paths);

        let pending_dir = std::env::var("PENDING_DIR").unwrap_or(defaults.pending_dir);

        let chunk_size = std::env::var("CHUNK_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.chunk_size);

        let max_upload_size = std::env::var("MAX_UPLOAD_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_upload_size);

        let backend_value_cap = std::env::var("BACKEND_VALUE_CAP")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.backend_value_cap);

        let reconcile_interval_secs = std::env::var("RECONCILE_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.reconcile_interval_secs);

        let blocked_mime_types: Vec<String> = std::env::var("BLOCKED_MIME_TYPES")
            .map(|p| {
                p.split(',')
                    .map(|s| s.trim().to_ascii_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let config = Config {
            bind_address,
            public_base_url,
            backend_paths,
            pending_dir,
            chunk_size,
            max_upload_size,
            backend_value_cap,
            reconcile_interval_secs,
            blocked_mime_types,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.backend_paths.is_empty() {
            return Err(ConfigError::ValidationError(
                "BACKEND_PATHS must name at least one backend".to_string(),
            ));
        }

        if self.chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "CHUNK_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.reconcile_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "RECONCILE_INTERVAL_SECS must be greater than 0".to_string(),
            ));
        }

        if self.chunk_size as u64 > self.backend_value_cap {
            tracing::warn!(
                chunk_size = self.chunk_size,
                value_cap = self.backend_value_cap,
                "CHUNK_SIZE exceeds BACKEND_VALUE_CAP; every chunk write will be rejected"
            );
        }

        Ok(())
    }
}
