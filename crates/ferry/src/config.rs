//! Interpreter configuration.

use serde::{Deserialize, Serialize};

/// Settings applied when an interpreter is created.
///
/// Deserializable from any serde format; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Source URL reported in stack traces for evaluated code.
    /// Default: `"<eval>"`
    pub source_url: String,

    /// Line number of the first line of evaluated code.
    /// Default: 1
    pub starting_line: i32,

    /// Parse before running so syntax errors are reported separately from
    /// exceptions thrown at run time.
    /// Default: true
    pub check_syntax: bool,

    /// Class name the engine reports for host functions.
    /// Default: `"HostFunction"`
    pub host_function_class: String,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            source_url: "<eval>".into(),
            starting_line: 1,
            check_syntax: true,
            host_function_class: "HostFunction".into(),
        }
    }
}

impl InterpreterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = url.into();
        self
    }

    pub fn with_starting_line(mut self, line: i32) -> Self {
        self.starting_line = line;
        self
    }

    pub fn with_check_syntax(mut self, check: bool) -> Self {
        self.check_syntax = check;
        self
    }

    pub fn with_host_function_class(mut self, name: impl Into<String>) -> Self {
        self.host_function_class = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = InterpreterConfig::default();
        assert_eq!(config.source_url, "<eval>");
        assert_eq!(config.starting_line, 1);
        assert!(config.check_syntax);
        assert_eq!(config.host_function_class, "HostFunction");
    }

    #[test]
    fn builder() {
        let config = InterpreterConfig::new()
            .with_source_url("main.js")
            .with_starting_line(10)
            .with_check_syntax(false);
        assert_eq!(config.source_url, "main.js");
        assert_eq!(config.starting_line, 10);
        assert!(!config.check_syntax);
    }

    #[test]
    fn partial_deserialize_keeps_defaults() {
        let config: InterpreterConfig =
            serde_json::from_str(r#"{"source_url": "script.js"}"#).unwrap();
        assert_eq!(config.source_url, "script.js");
        assert_eq!(config.starting_line, 1);
        assert!(config.check_syntax);
    }
}
