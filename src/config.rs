//! Configuration management for imgboot.
//!
//! Reads configuration from a .env file and environment variables.
//! Environment variables take precedence over the .env file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const CONFIG_DIR_VAR: &str = "IMGBOOT_CONFIG_DIR";
pub const WORK_DIR_VAR: &str = "IMGBOOT_WORK_DIR";
pub const LOG_VAR: &str = "IMGBOOT_LOG";

pub const DEFAULT_LOG_FILTER: &str = "info";

/// imgboot configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Config-asset directory holding `image/...` boot templates (default: assets)
    pub config_dir: PathBuf,
    /// Build working directory; receives the Secure Boot DB certificate
    pub work_dir: PathBuf,
    /// tracing filter directive
    pub log_filter: String,
}

impl Config {
    /// Load configuration from `<base_dir>/.env` and the environment.
    pub fn load(base_dir: &Path) -> Self {
        let mut env_vars: HashMap<String, String> = HashMap::new();

        let env_path = base_dir.join(".env");
        if let Ok(iter) = dotenvy::from_path_iter(&env_path) {
            for (key, value) in iter.flatten() {
                env_vars.insert(key, value);
            }
        }

        // Environment variables override .env file
        for (key, value) in std::env::vars() {
            env_vars.insert(key, value);
        }

        Self::from_vars(base_dir, &env_vars)
    }

    fn from_vars(base_dir: &Path, vars: &HashMap<String, String>) -> Self {
        let resolve = |s: &String| {
            let path = PathBuf::from(s);
            if path.is_absolute() {
                path
            } else {
                base_dir.join(path)
            }
        };

        let config_dir = vars
            .get(CONFIG_DIR_VAR)
            .map(resolve)
            .unwrap_or_else(|| base_dir.join("assets"));

        let work_dir = vars.get(WORK_DIR_VAR).map(resolve).unwrap_or_else(|| {
            dirs::cache_dir()
                .map(|d| d.join("imgboot"))
                .unwrap_or_else(|| base_dir.join("workspace"))
        });

        let log_filter = vars
            .get(LOG_VAR)
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        Self {
            config_dir,
            work_dir,
            log_filter,
        }
    }

    /// Check if the boot configuration assets are present.
    pub fn has_assets(&self) -> bool {
        self.config_dir.join("image").is_dir()
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  {}: {}", CONFIG_DIR_VAR, self.config_dir.display());
        println!("  {}: {}", WORK_DIR_VAR, self.work_dir.display());
        println!("  {}: {}", LOG_VAR, self.log_filter);
        if self.has_assets() {
            println!("  Boot assets: FOUND");
        } else {
            println!("  Boot assets: NOT FOUND (expected {}/image)", self.config_dir.display());
        }
    }
}
