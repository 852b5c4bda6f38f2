//! Locating and loading the RON configuration file

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::controller::Courier;

/// Environment variable that overrides the configuration file location
pub const CONFIG_ENV: &str = "COURIER_CONFIG";

/// Locations searched, in order, when [`CONFIG_ENV`] is not set
pub const DEFAULT_PATHS: [&str; 2] = ["./courier.config.ron", "/etc/courier/courier.config.ron"];

/// Find the configuration file using the following precedence:
/// 1. `COURIER_CONFIG` environment variable
/// 2. ./courier.config.ron (current working directory)
/// 3. /etc/courier/courier.config.ron (system-wide config)
///
/// # Errors
///
/// Fails if `COURIER_CONFIG` names a missing file, or if none of the default
/// locations exist.
pub fn find_config_file() -> anyhow::Result<PathBuf> {
    let defaults: Vec<PathBuf> = DEFAULT_PATHS.iter().map(PathBuf::from).collect();
    find_config_file_in(std::env::var_os(CONFIG_ENV).map(PathBuf::from), &defaults)
}

/// [`find_config_file`] with the override and search paths supplied by the
/// caller
///
/// # Errors
///
/// Fails if `env_path` is set but missing, or if none of `defaults` exist.
pub fn find_config_file_in(
    env_path: Option<PathBuf>,
    defaults: &[PathBuf],
) -> anyhow::Result<PathBuf> {
    if let Some(path) = env_path {
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "{CONFIG_ENV} points to non-existent file: {}",
            path.display()
        );
    }

    if let Some(path) = defaults.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = defaults
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}

/// Read and parse the configuration at `path`
///
/// # Errors
///
/// Fails if the file cannot be read or is not a valid configuration.
pub fn load(path: &Path) -> anyhow::Result<Courier> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;

    ron::from_str(&content).with_context(|| format!("Invalid config in {}", path.display()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_env_path_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let from_env = dir.path().join("env.ron");
        let default = dir.path().join("default.ron");
        std::fs::write(&from_env, "()").unwrap();
        std::fs::write(&default, "()").unwrap();

        let found = find_config_file_in(Some(from_env.clone()), &[default]).unwrap();
        assert_eq!(found, from_env);
    }

    #[test]
    fn test_missing_env_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let default = dir.path().join("default.ron");
        std::fs::write(&default, "()").unwrap();

        let error =
            find_config_file_in(Some(dir.path().join("missing.ron")), &[default]).unwrap_err();
        assert!(error.to_string().contains("non-existent file"));
    }

    #[test]
    fn test_first_existing_default_wins() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.ron");
        let second = dir.path().join("second.ron");
        let third = dir.path().join("third.ron");
        std::fs::write(&second, "()").unwrap();
        std::fs::write(&third, "()").unwrap();

        let found = find_config_file_in(None, &[missing, second.clone(), third]).unwrap();
        assert_eq!(found, second);
    }

    #[test]
    fn test_nothing_found_lists_paths() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.ron");

        let error = find_config_file_in(None, &[missing.clone()]).unwrap_err();
        let message = error.to_string();
        assert!(message.contains(CONFIG_ENV));
        assert!(message.contains(&missing.display().to_string()));
    }

    #[test]
    fn test_load_reports_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.config.ron");
        std::fs::write(&path, "(delivery: (max_retries: \"three\"))").unwrap();

        let error = load(&path).unwrap_err();
        assert!(error.to_string().starts_with("Invalid config in"));
    }

    #[test]
    fn test_load_sample_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../courier.config.ron");
        let courier = load(&path).unwrap();

        assert_eq!(courier.providers().len(), 2);
        assert_eq!(courier.outbox().len(), 3);
    }
}
