//! Configuration loading and data-root resolution
//!
//! Resolution priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Resolve the crawler data root folder.
///
/// The data root holds the manifest, queue file, collected-URLs file,
/// downloaded audio and backup directories.
pub fn resolve_data_root(cli_arg: Option<&str>, env_var_name: &str) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Ok(config_path) = default_config_file() {
        if let Ok(toml_content) = std::fs::read_to_string(&config_path) {
            if let Ok(config) = toml::from_str::<toml::Value>(&toml_content) {
                if let Some(root) = config.get("data_root").and_then(|v| v.as_str()) {
                    return PathBuf::from(root);
                }
            }
        }
    }

    // Priority 4: OS-dependent compiled default
    default_data_root()
}

/// Get default configuration file path for the platform
pub fn default_config_file() -> Result<PathBuf> {
    if cfg!(target_os = "linux") {
        // Try ~/.config/vvc/config.toml first, then /etc/vvc/config.toml
        let user_config = dirs::config_dir().map(|d| d.join("vvc").join("config.toml"));
        let system_config = PathBuf::from("/etc/vvc/config.toml");

        if let Some(path) = user_config {
            if path.exists() {
                return Ok(path);
            }
        }
        if system_config.exists() {
            return Ok(system_config);
        }
        Err(Error::Config("No config file found".to_string()))
    } else {
        let path = dirs::config_dir()
            .map(|d| d.join("vvc").join("config.toml"))
            .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;

        if path.exists() {
            Ok(path)
        } else {
            Err(Error::Config(format!("Config file not found: {:?}", path)))
        }
    }
}

/// Get OS-dependent default data root path
pub fn default_data_root() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("vvc"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/vvc"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("vvc"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/vvc"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("vvc"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\vvc"))
    } else {
        PathBuf::from("./vvc_data")
    }
}

/// Read and deserialize a TOML config file.
pub fn read_toml_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))
}

/// Serialize and write a TOML config file, creating parent directories.
pub fn write_toml_config<T: serde::Serialize>(config: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn cli_argument_wins() {
        std::env::set_var("VVC_TEST_DATA_ROOT", "/from/env");
        let root = resolve_data_root(Some("/from/cli"), "VVC_TEST_DATA_ROOT");
        assert_eq!(root, PathBuf::from("/from/cli"));
        std::env::remove_var("VVC_TEST_DATA_ROOT");
    }

    #[test]
    #[serial]
    fn env_beats_default() {
        std::env::set_var("VVC_TEST_DATA_ROOT", "/from/env");
        let root = resolve_data_root(None, "VVC_TEST_DATA_ROOT");
        assert_eq!(root, PathBuf::from("/from/env"));
        std::env::remove_var("VVC_TEST_DATA_ROOT");
    }

    #[test]
    fn toml_round_trip() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Sample {
            data_root: String,
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let sample = Sample {
            data_root: "/tmp/vvc".to_string(),
        };
        write_toml_config(&sample, &path).unwrap();
        let loaded: Sample = read_toml_config(&path).unwrap();
        assert_eq!(loaded, sample);
    }
}
