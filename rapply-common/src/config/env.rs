//! Environment variable parsing with type safety.
//!
//! Provides a type-safe parser for `RAPPLY_*` overrides with validation,
//! error collection, and source tracking.

use super::source::{ConfigSource, Sourced};
use crate::types::Protocol;
use std::env;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during environment variable parsing.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Invalid value for a variable.
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    /// Path does not exist.
    #[error("Path not found for {var}: {path}")]
    PathNotFound { var: String, path: PathBuf },

    /// Value out of valid range.
    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },

    /// Invalid log level.
    #[error("Invalid log level for {var}: {value}")]
    InvalidLogLevel { var: String, value: String },
}

/// Type-safe environment variable parser.
///
/// Collects errors during parsing so all issues can be reported at once.
pub struct EnvParser {
    prefix: &'static str,
    errors: Vec<EnvError>,
}

impl EnvParser {
    /// Create a new parser with the RAPPLY_ prefix.
    pub fn new() -> Self {
        Self {
            prefix: "RAPPLY_",
            errors: Vec::new(),
        }
    }

    /// Get all accumulated errors.
    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    /// Check if any errors occurred.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Take ownership of errors.
    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Get a string value with default.
    pub fn get_string(&mut self, name: &str, default: &str) -> Sourced<String> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => Sourced::from_env(value, var_name),
            Err(_) => Sourced::default_value(default.to_string()),
        }
    }

    /// Get a boolean value with default.
    ///
    /// Accepts: 1, true, yes, on (for true)
    ///          0, false, no, off, "" (for false)
    pub fn get_bool(&mut self, name: &str, default: bool) -> Sourced<bool> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => {
                let parsed = match value.to_lowercase().as_str() {
                    "1" | "true" | "yes" | "on" => true,
                    "0" | "false" | "no" | "off" | "" => false,
                    _ => {
                        self.errors.push(EnvError::InvalidValue {
                            var: var_name.clone(),
                            expected: "boolean (true/false/1/0/yes/no)".to_string(),
                            value: value.clone(),
                        });
                        default
                    }
                };
                Sourced::from_env(parsed, var_name)
            }
            Err(_) => Sourced::default_value(default),
        }
    }

    /// Get a u64 value with default and range validation.
    pub fn get_u64_range(&mut self, name: &str, default: u64, min: u64, max: u64) -> Sourced<u64> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => match value.parse::<u64>() {
                Ok(n) if n >= min && n <= max => Sourced::from_env(n, var_name),
                Ok(n) => {
                    self.errors.push(EnvError::OutOfRange {
                        var: var_name.clone(),
                        value: n.to_string(),
                        min: min.to_string(),
                        max: max.to_string(),
                    });
                    Sourced::from_env(default, var_name)
                }
                Err(_) => {
                    self.errors.push(EnvError::InvalidValue {
                        var: var_name.clone(),
                        expected: "unsigned 64-bit integer".to_string(),
                        value,
                    });
                    Sourced::default_value(default)
                }
            },
            Err(_) => Sourced::default_value(default),
        }
    }

    /// Get a path value with ~ expansion.
    ///
    /// If `must_exist` is true, records an error if the path doesn't exist.
    pub fn get_path(&mut self, name: &str, default: &str, must_exist: bool) -> Sourced<PathBuf> {
        let var_name = self.var_name(name);
        let (value, source) = match env::var(&var_name) {
            Ok(v) => (v, ConfigSource::Environment),
            Err(_) => (default.to_string(), ConfigSource::Default),
        };

        let expanded = expand_home(&value);

        if must_exist && !expanded.exists() {
            self.errors.push(EnvError::PathNotFound {
                var: var_name.clone(),
                path: expanded.clone(),
            });
        }

        if source == ConfigSource::Environment {
            Sourced::from_env(expanded, var_name)
        } else {
            Sourced::default_value(expanded)
        }
    }

    /// Get an optional path (None if not set or empty), with ~ expansion.
    pub fn get_optional_path(&mut self, name: &str) -> Sourced<Option<PathBuf>> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) if value.is_empty() => Sourced::from_env(None, var_name),
            Ok(value) => Sourced::from_env(Some(expand_home(&value)), var_name),
            Err(_) => Sourced::default_value(None),
        }
    }

    /// Get a log level value with validation.
    pub fn get_log_level(&mut self, name: &str, default: &str) -> Sourced<String> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => {
                let lower = value.to_lowercase();
                match lower.as_str() {
                    "trace" | "debug" | "info" | "warn" | "error" | "off" => {
                        Sourced::from_env(lower, var_name)
                    }
                    _ => {
                        self.errors.push(EnvError::InvalidLogLevel {
                            var: var_name.clone(),
                            value: value.clone(),
                        });
                        Sourced::from_env(default.to_string(), var_name)
                    }
                }
            }
            Err(_) => Sourced::default_value(default.to_string()),
        }
    }

    /// Get a transport protocol (ssh or winrm).
    pub fn get_protocol(&mut self, name: &str, default: Protocol) -> Sourced<Protocol> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => match value.parse::<Protocol>() {
                Ok(protocol) => Sourced::from_env(protocol, var_name),
                Err(_) => {
                    self.errors.push(EnvError::InvalidValue {
                        var: var_name.clone(),
                        expected: "ssh or winrm".to_string(),
                        value,
                    });
                    Sourced::default_value(default)
                }
            },
            Err(_) => Sourced::default_value(default),
        }
    }

    /// Get an optional string (None if not set or empty).
    pub fn get_optional_string(&mut self, name: &str) -> Sourced<Option<String>> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) if value.is_empty() => Sourced::from_env(None, var_name),
            Ok(value) => Sourced::from_env(Some(value), var_name),
            Err(_) => Sourced::default_value(None),
        }
    }
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

fn expand_home(value: &str) -> PathBuf {
    if let Some(stripped) = value.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    PathBuf::from(value)
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use crate::config::env_test_lock;
    use std::env;

    fn cleanup_env(vars: &[&str]) {
        for var in vars {
            // SAFETY: Tests are serialized via env_test_lock
            unsafe { env::remove_var(var) };
        }
    }

    fn set_env(key: &str, value: &str) {
        // SAFETY: Tests are serialized via env_test_lock
        unsafe { env::set_var(key, value) };
    }

    fn env_guard() -> std::sync::MutexGuard<'static, ()> {
        env_test_lock()
    }

    #[test]
    fn test_get_bool_true_values() {
        let _guard = env_guard();
        let vars = ["RAPPLY_TEST_BOOL_TRUE"];
        cleanup_env(&vars);

        for val in &["1", "true", "yes", "on", "TRUE", "Yes"] {
            set_env("RAPPLY_TEST_BOOL_TRUE", val);
            let mut parser = EnvParser::new();
            let result = parser.get_bool("TEST_BOOL_TRUE", false);
            assert!(result.value, "Expected true for '{}'", val);
            assert!(!parser.has_errors());
        }

        cleanup_env(&vars);
    }

    #[test]
    fn test_get_bool_invalid_uses_default() {
        let _guard = env_guard();
        let vars = ["RAPPLY_BAD_BOOL"];
        cleanup_env(&vars);

        set_env("RAPPLY_BAD_BOOL", "maybe");
        let mut parser = EnvParser::new();
        let result = parser.get_bool("BAD_BOOL", false);
        assert!(!result.value);
        assert!(parser.has_errors());

        cleanup_env(&vars);
    }

    #[test]
    fn test_get_u64_range_out_of_range() {
        let _guard = env_guard();
        let vars = ["RAPPLY_TEST_U64_OOR"];
        cleanup_env(&vars);

        set_env("RAPPLY_TEST_U64_OOR", "200");
        let mut parser = EnvParser::new();
        let result = parser.get_u64_range("TEST_U64_OOR", 10, 0, 100);
        assert_eq!(result.value, 10);
        assert!(parser.has_errors());

        cleanup_env(&vars);
    }

    #[test]
    fn test_get_log_level_invalid() {
        let _guard = env_guard();
        let vars = ["RAPPLY_TEST_LOG_LEVEL"];
        cleanup_env(&vars);

        set_env("RAPPLY_TEST_LOG_LEVEL", "verbose");
        let mut parser = EnvParser::new();
        let result = parser.get_log_level("TEST_LOG_LEVEL", "warn");
        assert!(parser.has_errors());
        assert_eq!(result.value, "warn");

        cleanup_env(&vars);
    }

    #[test]
    fn test_get_protocol() {
        let _guard = env_guard();
        let vars = ["RAPPLY_TEST_PROTOCOL"];
        cleanup_env(&vars);

        set_env("RAPPLY_TEST_PROTOCOL", "WinRM");
        let mut parser = EnvParser::new();
        assert_eq!(
            parser.get_protocol("TEST_PROTOCOL", Protocol::Ssh).value,
            Protocol::Winrm
        );

        set_env("RAPPLY_TEST_PROTOCOL", "telnet");
        let mut parser = EnvParser::new();
        assert_eq!(
            parser.get_protocol("TEST_PROTOCOL", Protocol::Ssh).value,
            Protocol::Ssh
        );
        assert_eq!(parser.errors().len(), 1);

        cleanup_env(&vars);
    }

    #[test]
    fn test_get_optional_string() {
        let _guard = env_guard();
        let vars = ["RAPPLY_TEST_OPT"];
        cleanup_env(&vars);

        let mut parser = EnvParser::new();
        let result = parser.get_optional_string("TEST_OPT");
        assert!(result.value.is_none());
        assert!(!result.is_from_env());

        set_env("RAPPLY_TEST_OPT", "");
        let mut parser = EnvParser::new();
        let result = parser.get_optional_string("TEST_OPT");
        assert!(result.value.is_none());
        assert!(result.is_from_env());

        set_env("RAPPLY_TEST_OPT", "value");
        let mut parser = EnvParser::new();
        let result = parser.get_optional_string("TEST_OPT");
        assert_eq!(result.value, Some("value".to_string()));

        cleanup_env(&vars);
    }

    #[test]
    fn test_source_tracking() {
        let _guard = env_guard();
        let vars = ["RAPPLY_TEST_SRC"];
        cleanup_env(&vars);

        let mut parser = EnvParser::new();
        let result = parser.get_string("TEST_SRC", "default");
        assert_eq!(result.source, ConfigSource::Default);
        assert!(result.env_var.is_none());

        set_env("RAPPLY_TEST_SRC", "from_env");
        let mut parser = EnvParser::new();
        let result = parser.get_string("TEST_SRC", "default");
        assert_eq!(result.source, ConfigSource::Environment);
        assert_eq!(result.env_var.as_deref(), Some("RAPPLY_TEST_SRC"));

        cleanup_env(&vars);
    }

    mod proptest_env_parsing {
        use super::*;
        use proptest::prelude::*;

        fn parse_bool_string(value: &str) -> Option<bool> {
            match value.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" | "" => Some(false),
                _ => None,
            }
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(100))]

            #[test]
            fn test_env_parser_get_bool(value in "[a-zA-Z0-9_-]{0,20}") {
                let _guard = env_test_lock();
                let var = "RAPPLY_PROPTEST_BOOL";
                cleanup_env(&[var]);

                set_env(var, &value);
                let mut parser = EnvParser::new();
                let result = parser.get_bool("PROPTEST_BOOL", false);
                prop_assert!(result.value == parse_bool_string(&value).unwrap_or(false));
                prop_assert_eq!(parser.has_errors(), parse_bool_string(&value).is_none());

                cleanup_env(&[var]);
            }

            #[test]
            fn test_env_parser_get_u64_range(value in "[-0-9a-zA-Z.]{0,30}") {
                let _guard = env_test_lock();
                let var = "RAPPLY_PROPTEST_U64";
                cleanup_env(&[var]);

                set_env(var, &value);
                let mut parser = EnvParser::new();
                let result = parser.get_u64_range("PROPTEST_U64", 30, 1, 600);

                match value.parse::<u64>().ok() {
                    Some(n) if (1..=600).contains(&n) => prop_assert_eq!(result.value, n),
                    _ => prop_assert_eq!(result.value, 30),
                }

                cleanup_env(&[var]);
            }
        }
    }
}
