use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub backend_url: Option<String>,
    pub backend_timeout_secs: u64,
    pub hide_settle_ms: u64,
    pub drop_concurrency: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend_url: None,
            backend_timeout_secs: 10,
            hide_settle_ms: 300,
            drop_concurrency: 4,
        }
    }
}

impl AppConfig {
    pub fn load(config_dir: &Path) -> Self {
        let config_path = config_dir.join("config.json");
        let mut config = if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
                Err(_) => Self::default(),
            }
        } else {
            let c = Self::default();
            c.save(config_dir);
            c
        };

        // Override with environment variable if set
        if let Ok(url) = std::env::var("HANDBACK_BACKEND_URL") {
            if !url.is_empty() {
                config.backend_url = Some(url);
            }
        }

        config
    }

    pub fn save(&self, config_dir: &Path) {
        if std::fs::create_dir_all(config_dir).is_err() {
            return;
        }
        let config_path = config_dir.join("config.json");
        if let Ok(content) = serde_json::to_string_pretty(self) {
            std::fs::write(config_path, content).ok();
        }
    }

    pub fn default_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("handback")
    }
}
