//! Host command channel seam
//!
//! The only way out of this process is a single textual command executed by
//! the other runtime. Each outbound message is rendered into one such command
//! by a [`CommandTemplate`], which embeds the escaped JSON text in a
//! host-specific invocation string.

use crate::config::ConfigError;
use crate::error::ChannelError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_types::Message;

/// Placeholder replaced by the quoted JSON payload
pub const PAYLOAD_PLACEHOLDER: &str = "{payload}";

/// One-directional command executor belonging to the other runtime
///
/// A call is an at-most-once attempt. Success or failure of the call itself is
/// the only acknowledgement the bridge ever gets.
#[async_trait]
pub trait HostChannel: Send + Sync {
    async fn execute(&self, command: &str) -> Result<Value, ChannelError>;
}

/// How the JSON text is escaped before insertion into the template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quoting {
    /// Single-quoted literal, `'` doubled
    #[default]
    Single,
    /// Double-quoted string with backslash escapes
    Double,
    /// Inserted verbatim
    Raw,
}

impl Quoting {
    pub fn quote(&self, text: &str) -> String {
        match self {
            Quoting::Single => format!("'{}'", text.replace('\'', "''")),
            Quoting::Double => {
                let mut out = String::with_capacity(text.len() + 2);
                out.push('"');
                for ch in text.chars() {
                    match ch {
                        '\\' => out.push_str("\\\\"),
                        '"' => out.push_str("\\\""),
                        '\n' => out.push_str("\\n"),
                        '\r' => out.push_str("\\r"),
                        c => out.push(c),
                    }
                }
                out.push('"');
                out
            }
            Quoting::Raw => text.to_string(),
        }
    }
}

/// Renders serialized messages into host invocation strings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    template: String,
    quoting: Quoting,
}

impl CommandTemplate {
    pub fn new(template: impl Into<String>, quoting: Quoting) -> Result<Self, ConfigError> {
        let template = template.into();
        if !template.contains(PAYLOAD_PLACEHOLDER) {
            return Err(ConfigError::InvalidTemplate(template));
        }
        Ok(Self { template, quoting })
    }

    /// Template that passes the JSON text through untouched
    pub fn raw() -> Self {
        Self {
            template: PAYLOAD_PLACEHOLDER.to_string(),
            quoting: Quoting::Raw,
        }
    }

    pub fn render(&self, json: &str) -> String {
        self.template
            .replacen(PAYLOAD_PLACEHOLDER, &self.quoting.quote(json), 1)
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn quoting(&self) -> Quoting {
        self.quoting
    }
}

impl Default for CommandTemplate {
    fn default() -> Self {
        Self {
            template: crate::config::DEFAULT_COMMAND_TEMPLATE.to_string(),
            quoting: Quoting::Single,
        }
    }
}

/// In-memory channel that records every command it is asked to run
///
/// Useful for headless embedding and tests. It can be switched into a failing
/// mode to simulate a broken host.
#[derive(Debug, Default)]
pub struct RecordingChannel {
    commands: Mutex<Vec<String>>,
    failure: Mutex<Option<String>>,
    response: Mutex<Value>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following call fail with `message`
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.lock() = Some(message.into());
    }

    pub fn recover(&self) {
        *self.failure.lock() = None;
    }

    /// Value returned by successful calls
    pub fn respond_with(&self, value: Value) {
        *self.response.lock() = value;
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    /// Decode recorded commands back into messages
    ///
    /// Only meaningful when the bridge renders with [`CommandTemplate::raw`];
    /// commands that are not bare JSON are skipped.
    pub fn messages(&self) -> Vec<Message> {
        self.commands
            .lock()
            .iter()
            .filter_map(|cmd| Message::from_json(cmd).ok())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.commands.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.lock().is_empty()
    }

    pub fn clear(&self) {
        self.commands.lock().clear();
    }
}

#[async_trait]
impl HostChannel for RecordingChannel {
    async fn execute(&self, command: &str) -> Result<Value, ChannelError> {
        if let Some(message) = self.failure.lock().clone() {
            return Err(ChannelError::new(message));
        }
        self.commands.lock().push(command.to_string());
        Ok(self.response.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_quoting_doubles_quotes() {
        assert_eq!(Quoting::Single.quote(r#"{"a":"it's"}"#), r#"'{"a":"it''s"}'"#);
    }

    #[test]
    fn test_double_quoting_escapes() {
        assert_eq!(
            Quoting::Double.quote(r#"{"a":"b\n"}"#),
            r#""{\"a\":\"b\\n\"}""#
        );
    }

    #[test]
    fn test_default_template_render() {
        let template = CommandTemplate::default();
        assert_eq!(
            template.render(r#"{"id":"x"}"#),
            r#"call tether#receive('{"id":"x"}')"#
        );
    }

    #[test]
    fn test_template_requires_placeholder() {
        let err = CommandTemplate::new("call nothing()", Quoting::Raw).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTemplate(_)));
    }

    #[test]
    fn test_render_does_not_rescan_payload() {
        let template = CommandTemplate::new("x({payload}, {payload})", Quoting::Raw).unwrap();
        assert_eq!(template.render("{payload}"), "x({payload}, {payload})");
    }

    #[tokio::test]
    async fn test_recording_channel_failure_mode() {
        let channel = RecordingChannel::new();
        channel.respond_with(json!(1));
        assert_eq!(channel.execute("a").await.unwrap(), json!(1));

        channel.fail_with("host gone");
        let err = channel.execute("b").await.unwrap_err();
        assert_eq!(err.message, "host gone");
        assert_eq!(channel.commands(), vec!["a".to_string()]);

        channel.recover();
        assert!(channel.execute("c").await.is_ok());
        assert_eq!(channel.len(), 2);
    }
}
