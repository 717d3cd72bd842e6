//! Optional `tandem.toml` configuration file.
//!
//! Every field is optional; command-line flags take precedence over anything
//! set here.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// File picked up from the current directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "tandem.toml";

/// Top-level structure of `tandem.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    /// Directory to run commands from.
    pub directory: Option<PathBuf>,
    /// Seconds to wait after interrupting before killing.
    pub timeout: Option<u64>,
    /// Whether to silence lifecycle status lines.
    pub silent: Option<bool>,
    /// Whether to disable ANSI colors.
    pub no_color: Option<bool>,
    /// Whether to print output without labels.
    pub raw: Option<bool>,
    /// Commands to run when none are given on the command line.
    pub commands: Option<Vec<String>>,
}

/// Loads and parses the configuration from a file path.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: FileConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// `tandem.toml` in the current directory, if there is one.
pub fn default_config_path() -> Option<PathBuf> {
    let path = Path::new(DEFAULT_CONFIG_FILE);
    path.exists().then(|| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_fields() {
        let raw = r#"
directory = "web"
timeout = 10
silent = true
no_color = true
raw = false
commands = ["npm:dev:*", "cargo watch -x run"]
"#;
        let config: FileConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.directory, Some(PathBuf::from("web")));
        assert_eq!(config.timeout, Some(10));
        assert_eq!(config.silent, Some(true));
        assert_eq!(config.no_color, Some(true));
        assert_eq!(config.raw, Some(false));
        assert_eq!(
            config.commands.as_deref(),
            Some(&["npm:dev:*".to_string(), "cargo watch -x run".to_string()][..])
        );
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert!(config.directory.is_none());
        assert!(config.timeout.is_none());
        assert!(config.commands.is_none());
    }

    #[test]
    fn load_reports_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, "timeout = \"soon\"").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse config file"));

        let missing = dir.path().join("missing.toml");
        let err = load_config(&missing).unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }
}
