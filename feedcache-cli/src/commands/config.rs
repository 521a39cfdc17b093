//! Configuration inspection CLI commands.
//!
//! Provides `config show`, `config check` and `config path` for viewing and
//! validating feed settings.

use std::path::{Path, PathBuf};

use clap::Subcommand;
use feedcache::FeedConfig;

use super::common::{config_file_path, load_config};
use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration as INI
    Show {
        /// Configuration file to read instead of the default
        #[arg(long)]
        file: Option<PathBuf>,

        /// Print the built-in defaults, ignoring any file
        #[arg(long, conflicts_with = "file")]
        defaults: bool,
    },

    /// Validate a configuration file
    Check {
        /// Configuration file to validate
        file: PathBuf,
    },

    /// Show the default configuration file path
    Path,
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Show { file, defaults } => {
            let config = if defaults {
                FeedConfig::default()
            } else {
                load_config(file.as_deref())?
            };
            print!("{}", config.to_ini_string());
            Ok(())
        }
        ConfigCommands::Check { file } => {
            let config = check(&file)?;
            println!("{}: OK", file.display());
            println!(
                "  max_videos={} max_controllers={} max_retries={} window=+{}/-{}",
                config.max_videos,
                config.max_controllers,
                config.max_retries,
                config.preload_ahead,
                config.preload_behind
            );
            Ok(())
        }
        ConfigCommands::Path => {
            println!("{}", config_file_path().display());
            Ok(())
        }
    }
}

/// Load and validate a configuration file.
fn check(path: &Path) -> Result<FeedConfig, CliError> {
    if !path.is_file() {
        return Err(CliError::Config(format!(
            "{} does not exist or is not a file",
            path.display()
        )));
    }
    Ok(FeedConfig::load(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_check_accepts_rendered_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FeedConfig::default().to_ini_string().as_bytes())
            .unwrap();
        assert_eq!(check(file.path()).unwrap(), FeedConfig::default());
    }

    #[test]
    fn test_check_rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = check(&dir.path().join("nope.ini")).unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }

    #[test]
    fn test_check_rejects_bad_fraction() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[feed]\nmemory_pressure_keep_fraction = 2.0").unwrap();
        assert!(matches!(check(file.path()), Err(CliError::Config(_))));
    }
}
