//! Runtime evaluation subject
//!
//! A `Context` is the simulated chat state rules are evaluated against:
//! the character card fields that injections write into, and the chat
//! history that conditions read from. Actions and patches mutate it in
//! place during a single pass.
//!
//! Writable addresses are dot-paths:
//!
//! - `character.personality`, `character.scenario`, `character.example_dialogs`
//! - `character.memory.<key>`
//! - any other path lands in the free-form `extra` object (e.g. `inject.pre`)

use crate::error::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Separator placed between appended text fragments
pub const APPEND_SEPARATOR: &str = "\n\n";

/// The evaluation subject
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Context {
    #[serde(default)]
    pub character: Character,

    #[serde(default)]
    pub chat: Chat,

    /// Free-form output slots addressed by dot-paths outside `character`/`chat`
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

/// Character card fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Character {
    #[serde(default)]
    pub personality: String,

    #[serde(default)]
    pub scenario: String,

    #[serde(default)]
    pub example_dialogs: String,

    /// Persistent key/value memory (numbers and strings)
    #[serde(default)]
    pub memory: Map<String, Value>,
}

/// Chat state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Chat {
    /// Most recent messages, oldest first
    #[serde(default)]
    pub last_messages: Vec<Message>,

    #[serde(default)]
    pub chat_metadata: ChatMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Message {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ChatMetadata {
    #[serde(default)]
    pub public_message_count: u64,
}

/// How a text write combines with the existing value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum WriteOp {
    Set,
    #[default]
    Append,
}

impl std::fmt::Display for WriteOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteOp::Set => write!(f, "set"),
            WriteOp::Append => write!(f, "append"),
        }
    }
}

/// Append `value` to `base`, separated by a blank line.
///
/// Appending an empty value leaves `base` untouched.
pub fn append_text(base: &str, value: &str) -> String {
    if value.is_empty() {
        base.to_string()
    } else if base.is_empty() {
        value.to_string()
    } else {
        format!("{}{}{}", base, APPEND_SEPARATOR, value)
    }
}

fn combine(op: WriteOp, base: &str, value: &str) -> String {
    match op {
        WriteOp::Set => value.to_string(),
        WriteOp::Append => append_text(base, value),
    }
}

impl Context {
    /// Build a context whose chat history is the given messages
    pub fn with_messages<I, S>(messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let last_messages: Vec<Message> = messages
            .into_iter()
            .map(|m| Message { message: m.into() })
            .collect();
        let count = last_messages.len() as u64;
        Context {
            chat: Chat {
                last_messages,
                chat_metadata: ChatMetadata {
                    public_message_count: count,
                },
            },
            ..Default::default()
        }
    }

    /// Parse context from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize context to JSON string
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Text of the most recent message
    pub fn last_message(&self) -> Option<&str> {
        self.chat.last_messages.last().map(|m| m.message.as_str())
    }

    /// All message texts, oldest first
    pub fn history(&self) -> Vec<&str> {
        self.chat
            .last_messages
            .iter()
            .map(|m| m.message.as_str())
            .collect()
    }

    pub fn message_count(&self) -> u64 {
        self.chat.chat_metadata.public_message_count
    }

    /// Read the text stored at a dot-path, if any
    pub fn read_path(&self, path: &str) -> Option<String> {
        match path {
            "character.personality" => Some(self.character.personality.clone()),
            "character.scenario" => Some(self.character.scenario.clone()),
            "character.example_dialogs" => Some(self.character.example_dialogs.clone()),
            _ => {
                if let Some(key) = path.strip_prefix("character.memory.") {
                    return self.character.memory.get(key).map(value_text);
                }
                let mut segments = path.split('.');
                let first = segments.next()?;
                let mut current = self.extra.get(first)?;
                for segment in segments {
                    current = current.as_object()?.get(segment)?;
                }
                Some(value_text(current))
            }
        }
    }

    /// Write text at a dot-path, either replacing or appending
    pub fn write_path(&mut self, path: &str, op: WriteOp, value: &str) -> Result<()> {
        match path {
            "character.personality" => {
                self.character.personality = combine(op, &self.character.personality, value);
                Ok(())
            }
            "character.scenario" => {
                self.character.scenario = combine(op, &self.character.scenario, value);
                Ok(())
            }
            "character.example_dialogs" => {
                self.character.example_dialogs =
                    combine(op, &self.character.example_dialogs, value);
                Ok(())
            }
            _ => {
                if let Some(key) = path.strip_prefix("character.memory.") {
                    if key.is_empty() {
                        return Err(Error::Write("empty memory key".into()));
                    }
                    let base = self
                        .character
                        .memory
                        .get(key)
                        .map(value_text)
                        .unwrap_or_default();
                    self.character
                        .memory
                        .insert(key.to_string(), Value::String(combine(op, &base, value)));
                    return Ok(());
                }
                if path.starts_with("character.") || path.starts_with("chat.") || path == "chat" {
                    return Err(Error::Write(format!("path is not writable: {}", path)));
                }
                write_extra(&mut self.extra, path, op, value)
            }
        }
    }
}

fn write_extra(root: &mut Map<String, Value>, path: &str, op: WriteOp, value: &str) -> Result<()> {
    let segments = crate::effects::path_segments(path)?;
    let (leaf, parents) = match segments.split_last() {
        Some(split) => split,
        None => return Err(Error::Write("empty path".into())),
    };

    let mut current = root;
    for segment in parents {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        current = match entry {
            Value::Object(map) => map,
            _ => {
                return Err(Error::Write(format!(
                    "segment '{}' of {} is not an object",
                    segment, path
                )))
            }
        };
    }

    let base = match current.get(*leaf) {
        Some(Value::Object(_)) => {
            return Err(Error::Write(format!("{} addresses an object", path)));
        }
        Some(v) => value_text(v),
        None => String::new(),
    };
    current.insert(leaf.to_string(), Value::String(combine(op, &base, value)));
    Ok(())
}

/// Render a JSON value as plain text (strings unquoted)
pub fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_text() {
        assert_eq!(append_text("", "a"), "a");
        assert_eq!(append_text("a", "b"), "a\n\nb");
        assert_eq!(append_text("a", ""), "a");
    }

    #[test]
    fn test_write_character_fields() {
        let mut ctx = Context::default();
        ctx.write_path("character.personality", WriteOp::Append, "kind")
            .unwrap();
        ctx.write_path("character.personality", WriteOp::Append, "brave")
            .unwrap();
        assert_eq!(ctx.character.personality, "kind\n\nbrave");

        ctx.write_path("character.personality", WriteOp::Set, "calm")
            .unwrap();
        assert_eq!(ctx.character.personality, "calm");
    }

    #[test]
    fn test_write_extra_creates_objects() {
        let mut ctx = Context::default();
        ctx.write_path("inject.pre", WriteOp::Append, "combo").unwrap();
        assert_eq!(ctx.read_path("inject.pre").as_deref(), Some("combo"));

        let err = ctx.write_path("inject.pre.deeper", WriteOp::Set, "x");
        assert!(err.is_err());
    }

    #[test]
    fn test_write_memory() {
        let mut ctx = Context::default();
        ctx.write_path("character.memory.mood", WriteOp::Set, "happy")
            .unwrap();
        assert_eq!(ctx.read_path("character.memory.mood").as_deref(), Some("happy"));
    }

    #[test]
    fn test_chat_not_writable() {
        let mut ctx = Context::default();
        assert!(ctx
            .write_path("chat.last_messages", WriteOp::Set, "x")
            .is_err());
        assert!(ctx.write_path("character.name", WriteOp::Set, "x").is_err());
    }

    #[test]
    fn test_parse_minimal_json() {
        let ctx =
            Context::from_json(r#"{"chat":{"last_messages":[{"message":"hi"}]}}"#).unwrap();
        assert_eq!(ctx.last_message(), Some("hi"));
        assert_eq!(ctx.message_count(), 0);
        assert!(ctx.extra.is_empty());
    }
}
