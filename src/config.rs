use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::FfiError;

/// Runtime switches for the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log every native call at trace level.
    pub trace_calls: bool,
    /// Return the caller's own array when a result aliases an argument.
    pub identity_fast_path: bool,
    /// Strided copies of at least this many bytes run in parallel.
    pub parallel_copy_threshold: usize,
    /// Alignment demanded when exporting host arrays as native tensors.
    pub require_alignment: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            trace_calls: false,
            identity_fast_path: true,
            parallel_copy_threshold: 1 << 20,
            require_alignment: 0,
        }
    }
}

impl Config {
    pub fn from_json_str(text: &str) -> Result<Self, FfiError> {
        serde_json::from_str(text).map_err(|err| FfiError::invalid(format!("bad config: {}", err)))
    }

    /// Reads `FFI_BRIDGE_*` variables from the process environment.
    pub fn from_env() -> Result<Self, FfiError> {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    /// Like [`Config::from_env`], with variables supplied by `lookup`.
    ///
    /// A JSON file named by `FFI_BRIDGE_CONFIG` is loaded first; individual
    /// variables override it.
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, FfiError> {
        let mut config = match lookup("FFI_BRIDGE_CONFIG") {
            Some(path) => {
                let text = std::fs::read_to_string(&path).map_err(|err| {
                    FfiError::invalid(format!("cannot read config '{}': {}", path, err))
                })?;
                Self::from_json_str(&text)?
            }
            None => Self::default(),
        };
        if let Some(v) = lookup("FFI_BRIDGE_TRACE") {
            config.trace_calls = parse_flag("FFI_BRIDGE_TRACE", &v)?;
        }
        if let Some(v) = lookup("FFI_BRIDGE_IDENTITY") {
            config.identity_fast_path = parse_flag("FFI_BRIDGE_IDENTITY", &v)?;
        }
        if let Some(v) = lookup("FFI_BRIDGE_PARALLEL_COPY_THRESHOLD") {
            config.parallel_copy_threshold = parse_size("FFI_BRIDGE_PARALLEL_COPY_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("FFI_BRIDGE_REQUIRE_ALIGNMENT") {
            config.require_alignment = parse_size("FFI_BRIDGE_REQUIRE_ALIGNMENT", &v)?;
        }
        Ok(config)
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool, FfiError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => Err(FfiError::invalid(format!(
            "{} expects a boolean, got '{}'",
            name, other
        ))),
    }
}

fn parse_size(name: &str, value: &str) -> Result<usize, FfiError> {
    value
        .trim()
        .parse()
        .map_err(|_| FfiError::invalid(format!("{} expects a size, got '{}'", name, value)))
}

static CURRENT: RwLock<Option<Config>> = RwLock::new(None);

/// Replaces the process-wide configuration.
pub fn set(config: Config) {
    *CURRENT.write().unwrap_or_else(PoisonError::into_inner) = Some(config);
}

/// The process-wide configuration.
///
/// Until [`set`] is called it is loaded once from the `FFI_BRIDGE_*`
/// environment; an unreadable environment falls back to the defaults with
/// a warning.
pub fn current() -> Config {
    if let Some(config) = CURRENT.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
        return config.clone();
    }
    let loaded = initial(|name| std::env::var(name).ok());
    CURRENT
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .get_or_insert(loaded)
        .clone()
}

fn initial(lookup: impl Fn(&str) -> Option<String>) -> Config {
    Config::from_env_with(lookup).unwrap_or_else(|err| {
        log::warn!("ignoring FFI_BRIDGE_* configuration: {}", err);
        Config::default()
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::default();
        assert!(config.identity_fast_path);
        assert!(!config.trace_calls);
        assert_eq!(config.parallel_copy_threshold, 1 << 20);
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config = Config::from_json_str(r#"{"trace_calls": true}"#).unwrap();
        assert!(config.trace_calls);
        assert!(config.identity_fast_path);
        assert!(Config::from_json_str("{ nope").is_err());
    }

    #[test]
    fn env_variables_override() {
        let config = Config::from_env_with(lookup(&[
            ("FFI_BRIDGE_TRACE", "on"),
            ("FFI_BRIDGE_IDENTITY", "0"),
            ("FFI_BRIDGE_PARALLEL_COPY_THRESHOLD", "4096"),
        ]))
        .unwrap();
        assert!(config.trace_calls);
        assert!(!config.identity_fast_path);
        assert_eq!(config.parallel_copy_threshold, 4096);
        assert_eq!(config.require_alignment, 0);
    }

    #[test]
    fn env_variables_override_the_config_file() {
        let path = std::env::temp_dir().join(format!("ffi-bridge-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"require_alignment": 64, "trace_calls": true}"#).unwrap();
        let path_text = path.to_string_lossy().into_owned();
        let config = Config::from_env_with(lookup(&[
            ("FFI_BRIDGE_CONFIG", path_text.as_str()),
            ("FFI_BRIDGE_TRACE", "false"),
        ]))
        .unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.require_alignment, 64);
        assert!(!config.trace_calls);
    }

    #[test]
    fn first_read_takes_the_environment() {
        let config = initial(lookup(&[("FFI_BRIDGE_PARALLEL_COPY_THRESHOLD", "512")]));
        assert_eq!(config.parallel_copy_threshold, 512);
        assert!(config.identity_fast_path);
    }

    #[test]
    fn unreadable_environment_falls_back_to_defaults() {
        let config = initial(lookup(&[
            ("FFI_BRIDGE_TRACE", "on"),
            ("FFI_BRIDGE_REQUIRE_ALIGNMENT", "sixty-four"),
        ]));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn bad_env_values_are_reported() {
        let err = Config::from_env_with(lookup(&[("FFI_BRIDGE_TRACE", "maybe")])).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"[E3006] invalid argument: FFI_BRIDGE_TRACE expects a boolean, got 'maybe'");
    }
}
