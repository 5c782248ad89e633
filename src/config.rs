//! Startup configuration for the embedded interpreter.

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Colon/semicolon separated directories appended to `sys.path`, like `PATH`.
pub const ENV_SEARCH_PATH: &str = "PYHOST_PATH";
pub const ENV_PRINT_TRACEBACKS: &str = "PYHOST_PRINT_TRACEBACKS";
pub const ENV_ALLOW_REINITIALIZE: &str = "PYHOST_ALLOW_REINITIALIZE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Directories appended to `sys.path` right after initialization.
    pub search_paths: Vec<PathBuf>,
    /// Print drained exceptions through the interpreter's traceback printer.
    pub print_tracebacks: bool,
    /// Let the interpreter install its SIGINT handler. Off when embedded.
    pub install_signal_handlers: bool,
    /// Allow `start()` after `stop()`.
    ///
    /// Only safe when no native extension module that cannot survive
    /// re-initialization was imported during an earlier run.
    pub allow_reinitialize: bool,
    /// Linux: re-open the loaded `libpython` with `RTLD_GLOBAL` before
    /// initializing, so extension modules can resolve interpreter symbols.
    pub global_libpython: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            search_paths: Vec::new(),
            print_tracebacks: false,
            install_signal_handlers: false,
            allow_reinitialize: false,
            global_libpython: true,
        }
    }
}

impl BridgeConfig {
    pub fn with_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }

    pub fn with_print_tracebacks(mut self, enabled: bool) -> Self {
        self.print_tracebacks = enabled;
        self
    }

    pub fn with_allow_reinitialize(mut self, enabled: bool) -> Self {
        self.allow_reinitialize = enabled;
        self
    }

    /// Parse a JSON object. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| BridgeError::InvalidArgument(format!("bridge config: {e}")))
    }

    /// Defaults overridden by `PYHOST_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(paths) = env::var_os(ENV_SEARCH_PATH) {
            config.search_paths = env::split_paths(&paths)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }
        if let Some(flag) = env_flag(ENV_PRINT_TRACEBACKS) {
            config.print_tracebacks = flag;
        }
        if let Some(flag) = env_flag(ENV_ALLOW_REINITIALIZE) {
            config.allow_reinitialize = flag;
        }
        config
    }
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name).ok().and_then(|v| parse_flag(&v))
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_embedding_mode() {
        let config = BridgeConfig::default();
        assert!(config.search_paths.is_empty());
        assert!(!config.install_signal_handlers);
        assert!(!config.allow_reinitialize);
        assert!(config.global_libpython);
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config =
            BridgeConfig::from_json(r#"{"search_paths": ["/opt/scripts"], "print_tracebacks": true}"#)
                .unwrap();
        assert_eq!(config.search_paths, vec![PathBuf::from("/opt/scripts")]);
        assert!(config.print_tracebacks);
        assert!(!config.allow_reinitialize);
        assert!(config.global_libpython);
    }

    #[test]
    fn malformed_json_is_invalid_argument() {
        let err = BridgeConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArgument(_)));
    }

    #[test]
    fn builder_appends_paths_in_order() {
        let config = BridgeConfig::default()
            .with_search_path("a")
            .with_search_path("b")
            .with_allow_reinitialize(true);
        assert_eq!(config.search_paths, vec![PathBuf::from("a"), PathBuf::from("b")]);
        assert!(config.allow_reinitialize);
    }

    #[test]
    fn flags_parse_common_spellings() {
        assert_eq!(parse_flag("1"), Some(true));
        assert_eq!(parse_flag(" TRUE "), Some(true));
        assert_eq!(parse_flag("off"), Some(false));
        assert_eq!(parse_flag(""), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
