//! Common utilities shared across CLI commands.

use std::path::{Path, PathBuf};

use feedcache::FeedConfig;
use tracing::debug;

use crate::error::CliError;

/// Configuration file name inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.ini";

/// Default location of the configuration file (`~/.config/feedcache/config.ini` on Linux).
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("feedcache")
        .join(CONFIG_FILE_NAME)
}

/// Resolve the configuration: explicit file > default file if present > defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<FeedConfig, CliError> {
    if let Some(path) = explicit {
        return Ok(FeedConfig::load(path)?);
    }

    let default_path = config_file_path();
    if default_path.is_file() {
        debug!(path = %default_path.display(), "Loading default configuration file");
        return Ok(FeedConfig::load(&default_path)?);
    }

    Ok(FeedConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_file_path_ends_with_feedcache() {
        let path = config_file_path();
        assert!(path.ends_with("feedcache/config.ini"));
    }

    #[test]
    fn test_explicit_file_wins() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[feed]\nmax_videos = 12").unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.max_videos, 12);
    }

    #[test]
    fn test_invalid_explicit_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[feed]\nmax_videos = 0").unwrap();

        let err = load_config(Some(file.path())).unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }
}
