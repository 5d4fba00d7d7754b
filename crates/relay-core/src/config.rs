//! Configuration loaded from `relay.yml`.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration.
//!
//! ```yaml
//! server:
//!   host: 0.0.0.0
//!   user_port: 5000
//!   admin_port: 5001
//! task:
//!   program: python3
//!   args: [main.py]
//! input:
//!   wait_bound_ms: 15000
//!   settle_delay_ms: 500
//!   fallback: "N"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::launcher::ProcessLauncher;
use crate::runner::InputPolicy;

/// Errors produced while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub task: TaskConfig,
    pub input: InputConfig,
}

/// Listener addresses for the user and admin apps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub user_port: u16,
    pub admin_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            user_port: 5000,
            admin_port: 5001,
        }
    }
}

/// The child program started for every account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    pub program: String,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["main.py".to_string()],
            working_dir: None,
        }
    }
}

impl TaskConfig {
    pub fn launcher(&self) -> ProcessLauncher {
        let launcher = ProcessLauncher::new(&self.program).with_args(self.args.iter().cloned());
        match &self.working_dir {
            Some(dir) => launcher.with_working_dir(dir),
            None => launcher,
        }
    }
}

/// Input request handling, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub wait_bound_ms: u64,
    pub settle_delay_ms: u64,
    pub fallback: String,
    pub honor_advisory_timeout: bool,
}

impl Default for InputConfig {
    fn default() -> Self {
        let policy = InputPolicy::default();
        Self {
            wait_bound_ms: policy.wait_bound.as_millis() as u64,
            settle_delay_ms: policy.settle_delay.as_millis() as u64,
            fallback: policy.fallback,
            honor_advisory_timeout: policy.honor_advisory_timeout,
        }
    }
}

impl InputConfig {
    pub fn policy(&self) -> InputPolicy {
        InputPolicy {
            wait_bound: Duration::from_millis(self.wait_bound_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            fallback: self.fallback.clone(),
            honor_advisory_timeout: self.honor_advisory_timeout,
        }
    }
}

impl RelayConfig {
    /// Read and parse a YAML file. Does not validate.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_yaml(&content)
    }

    pub fn parse_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let server = &self.server;
        if server.user_port == 0 || server.admin_port == 0 {
            return Err(ConfigError::Invalid("ports must be non-zero".to_string()));
        }
        if server.user_port == server.admin_port {
            return Err(ConfigError::Invalid(format!(
                "user_port and admin_port must differ (both {})",
                server.user_port
            )));
        }
        if self.task.program.trim().is_empty() {
            return Err(ConfigError::Invalid("task.program is empty".to_string()));
        }
        if self.input.fallback.contains(['\n', '\r']) {
            return Err(ConfigError::Invalid(
                "input.fallback must be a single line".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.user_port, 5000);
        assert_eq!(config.server.admin_port, 5001);
        assert_eq!(config.task.program, "python3");
        assert_eq!(config.task.args, ["main.py"]);
        assert_eq!(config.input.policy(), InputPolicy::default());
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() {
        let yaml = r#"
server:
  user_port: 8080
input:
  wait_bound_ms: 20000
  honor_advisory_timeout: true
"#;
        let config = RelayConfig::parse_yaml(yaml).unwrap();
        assert_eq!(config.server.user_port, 8080);
        assert_eq!(config.server.admin_port, 5001);
        assert_eq!(config.input.fallback, "N");

        let policy = config.input.policy();
        assert_eq!(policy.wait_bound, Duration::from_secs(20));
        assert!(policy.honor_advisory_timeout);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(RelayConfig::parse_yaml("").unwrap(), RelayConfig::default());
    }

    #[test]
    fn test_parse_error() {
        let err = RelayConfig::parse_yaml("server: [not, a, map]").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validate_rejects_same_ports() {
        let mut config = RelayConfig::default();
        config.server.admin_port = config.server.user_port;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_multiline_fallback() {
        let mut config = RelayConfig::default();
        config.input.fallback = "N\nY".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_empty_program() {
        let mut config = RelayConfig::default();
        config.task.program = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "task:\n  program: /usr/bin/env\n  args: [python3, bot.py]").unwrap();

        let config = RelayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.task.program, "/usr/bin/env");
        assert_eq!(config.task.args, ["python3", "bot.py"]);
        assert_eq!(config.task.launcher().program(), "/usr/bin/env");
    }

    #[test]
    fn test_demo_config_is_valid() {
        let config = RelayConfig::parse_yaml(include_str!("../../../demos/relay.yml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.task.args, ["demos/ask_task.py"]);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = RelayConfig::from_file(dir.path().join("missing.yml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
