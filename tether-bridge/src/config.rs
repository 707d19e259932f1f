//! Configuration parsing for the bridge.

use crate::channel::{CommandTemplate, Quoting};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_COMMAND_TEMPLATE: &str = "call tether#receive({payload})";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Command template has no {{payload}} placeholder: {0}")]
    InvalidTemplate(String),
}

/// What happens to the remaining handlers of a message when one fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerFailurePolicy {
    /// Skip the remaining handlers for that message only
    #[default]
    Abort,
    /// Log the failure and keep delivering to the other handlers
    Continue,
}

/// Bridge configuration, usually loaded from `tether.yml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub command: CommandConfig,

    #[serde(default)]
    pub handler_failure: HandlerFailurePolicy,

    /// Default deadline for correlated requests; `0` waits forever
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandConfig {
    #[serde(default = "default_template")]
    pub template: String,

    #[serde(default)]
    pub quoting: Quoting,
}

fn default_template() -> String {
    String::from(DEFAULT_COMMAND_TEMPLATE)
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            template: default_template(),
            quoting: Quoting::default(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            command: CommandConfig::default(),
            handler_failure: HandlerFailurePolicy::default(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl BridgeConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = serde_yaml::from_str(text)?;
        config.command_template()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    pub fn command_template(&self) -> Result<CommandTemplate, ConfigError> {
        CommandTemplate::new(self.command.template.clone(), self.command.quoting)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        match self.request_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn with_handler_failure(mut self, policy: HandlerFailurePolicy) -> Self {
        self.handler_failure = policy;
        self
    }

    pub fn with_command(mut self, template: impl Into<String>, quoting: Quoting) -> Self {
        self.command = CommandConfig {
            template: template.into(),
            quoting,
        };
        self
    }

    pub fn with_request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = ms;
        self
    }
}
