//! Configuration loading and schema definitions for fanout.
//!
//! Configuration is resolved in three layers, later layers winning:
//!
//! 1. Built-in defaults (see [`schema`])
//! 2. An optional `fanout.toml` file
//! 3. Environment variables (`WORKSPACE_ROOT`, `PARALLEL_STREAMS`,
//!    `SPEC_PATTERN`, `CI`, `BROWSER`) via [`Config::apply_env`]
//!
//! Command-line flags are applied on top of that by the binary.

pub mod schema;

pub use schema::*;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Loads fanout configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not valid TOML, or does
/// not match the schema.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Loads fanout configuration from a TOML string.
///
/// # Example
///
/// ```
/// use fanout::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [fanout]
///     streams = 4
///
///     [display]
///     base = 10
/// "#)?;
///
/// assert_eq!(config.fanout.streams, 4);
/// assert_eq!(config.display.base, 10);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}

/// Loads the config file if it exists, falling back to defaults.
///
/// A missing file is only an error when the path was given explicitly.
pub fn load_or_default(path: &Path, explicit: bool) -> Result<Config> {
    if !explicit && !path.exists() {
        tracing::debug!("No config file at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    load_config(path)
}

impl Config {
    /// Applies environment overrides using `lookup` to read variables.
    ///
    /// Taking a lookup function instead of reading the process environment
    /// keeps this usable from tests without mutating global state.
    ///
    /// # Example
    ///
    /// ```
    /// use fanout::config::Config;
    ///
    /// let mut config = Config::default();
    /// config.apply_env(|key| match key {
    ///     "PARALLEL_STREAMS" => Some("0".to_string()),
    ///     "CI" => Some("true".to_string()),
    ///     _ => None,
    /// });
    /// assert_eq!(config.fanout.streams, 1);
    /// assert!(config.display.enabled);
    /// ```
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup("WORKSPACE_ROOT").filter(|v| !v.is_empty()) {
            self.fanout.workspace_root = Some(PathBuf::from(root));
        }
        if let Some(streams) = lookup("PARALLEL_STREAMS") {
            self.fanout.streams = parse_streams(&streams);
        }
        if let Some(pattern) = lookup("SPEC_PATTERN").filter(|v| !v.trim().is_empty()) {
            self.discovery.spec_pattern = Some(pattern);
        }
        if let Some(ci) = lookup("CI") {
            self.display.enabled = parse_flag(&ci);
        }
        if let Some(browser) = lookup("BROWSER").filter(|v| !v.trim().is_empty()) {
            self.fanout.browser = browser;
        }
    }

    /// Applies overrides from the real process environment.
    pub fn apply_process_env(&mut self) {
        self.apply_env(|key| std::env::var(key).ok());
    }

    /// Directory spec patterns are resolved against.
    pub fn workspace_root(&self) -> PathBuf {
        self.fanout
            .workspace_root
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    /// Stream count with the lower bound of 1 enforced.
    pub fn streams(&self) -> usize {
        self.fanout.streams.max(1)
    }
}

/// Parses a stream count; anything unparsable or below 1 becomes 1.
pub fn parse_streams(value: &str) -> usize {
    match value.trim().parse::<i64>() {
        Ok(n) if n >= 1 => usize::try_from(n).unwrap_or(usize::MAX),
        _ => 1,
    }
}

/// Parses a boolean-ish environment flag (`true` in any case, or `1`).
pub fn parse_flag(value: &str) -> bool {
    let value = value.trim();
    value.eq_ignore_ascii_case("true") || value == "1"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.fanout.streams, 3);
        assert_eq!(config.fanout.browser, "chrome");
        assert!(!config.display.enabled);
        assert_eq!(config.display.base, 99);
        assert_eq!(config.runner.spec_env_var, "SPEC");
        assert_eq!(config.discovery.domains[0].key, "integrationApi");
        assert_eq!(config.discovery.domains[2].pattern, "cypress/e2e/**/*.ui.spec.js");
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = load_config_str("").unwrap();
        assert_eq!(config.fanout.streams, 3);
        assert_eq!(config.fanout.admission_delay_ms, 1000);
        assert_eq!(config.report.reports_dir, PathBuf::from("cypress/reports/mochawesome"));
    }

    #[test]
    fn test_custom_domains_replace_defaults() {
        let config = load_config_str(
            r#"
            [[discovery.domains]]
            key = "smoke"
            name = "Smoke Tests"
            pattern = "cypress/smoke/**/*.spec.js"
            "#,
        )
        .unwrap();
        assert_eq!(config.discovery.domains.len(), 1);
        assert_eq!(config.discovery.domains[0].name, "Smoke Tests");
    }

    #[test]
    fn test_invalid_toml_is_error() {
        assert!(load_config_str("[fanout\nstreams = ").is_err());
    }

    #[test]
    fn test_parse_streams() {
        assert_eq!(parse_streams("4"), 4);
        assert_eq!(parse_streams(" 2 "), 2);
        assert_eq!(parse_streams("0"), 1);
        assert_eq!(parse_streams("-3"), 1);
        assert_eq!(parse_streams("many"), 1);
        assert_eq!(parse_streams(""), 1);
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true"));
        assert!(parse_flag("TRUE"));
        assert!(parse_flag("1"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(""));
        assert!(!parse_flag("yes please"));
    }

    #[test]
    fn test_apply_env_overrides() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("WORKSPACE_ROOT", "/work"),
            ("PARALLEL_STREAMS", "5"),
            ("SPEC_PATTERN", "cypress/**/*.spec.js"),
            ("CI", "true"),
            ("BROWSER", "firefox"),
        ]));

        assert_eq!(config.fanout.workspace_root, Some(PathBuf::from("/work")));
        assert_eq!(config.fanout.streams, 5);
        assert_eq!(
            config.discovery.spec_pattern.as_deref(),
            Some("cypress/**/*.spec.js")
        );
        assert!(config.display.enabled);
        assert_eq!(config.fanout.browser, "firefox");
    }

    #[test]
    fn test_apply_env_ignores_blank_values() {
        let mut config = load_config_str("[fanout]\nbrowser = \"edge\"").unwrap();
        config.apply_env(env(&[("BROWSER", ""), ("SPEC_PATTERN", "  ")]));
        assert_eq!(config.fanout.browser, "edge");
        assert!(config.discovery.spec_pattern.is_none());
    }

    #[test]
    fn test_ci_false_disables_displays() {
        let mut config = load_config_str("[display]\nenabled = true").unwrap();
        config.apply_env(env(&[("CI", "false")]));
        assert!(!config.display.enabled);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("fanout.toml");
        assert!(load_or_default(&path, false).is_ok());
        assert!(load_or_default(&path, true).is_err());
    }
}
