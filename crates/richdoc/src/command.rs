use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::UpdateContext;
use crate::error::UpdateError;
use crate::key::NodeKey;

pub const INSERT_TEXT_COMMAND: &str = "insert-text";
pub const INSERT_PARAGRAPH_COMMAND: &str = "insert-paragraph";
pub const INSERT_LINE_BREAK_COMMAND: &str = "insert-line-break";
pub const DELETE_CHARACTER_BACKWARD_COMMAND: &str = "delete-character-backward";
pub const DELETE_CHARACTER_FORWARD_COMMAND: &str = "delete-character-forward";
pub const ARROW_UP_COMMAND: &str = "arrow-up";
pub const ARROW_DOWN_COMMAND: &str = "arrow-down";
pub const ARROW_LEFT_COMMAND: &str = "arrow-left";
pub const ARROW_RIGHT_COMMAND: &str = "arrow-right";
pub const INSERT_COLLAPSIBLE_COMMAND: &str = "insert-collapsible";
pub const TOGGLE_COLLAPSIBLE_COMMAND: &str = "toggle-collapsible";
pub const INSERT_EQUATION_COMMAND: &str = "insert-equation";
pub const INSERT_IMAGE_COMMAND: &str = "insert-image";

pub const BACKSPACE_COMMAND: &str = DELETE_CHARACTER_BACKWARD_COMMAND;
pub const DELETE_COMMAND: &str = DELETE_CHARACTER_FORWARD_COMMAND;

#[derive(Debug, Clone)]
pub struct CommandError {
    message: String,
}

impl CommandError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CommandError {}

impl From<UpdateError> for CommandError {
    fn from(value: UpdateError) -> Self {
        CommandError::new(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandPriority {
    Editor,
    Low,
    Normal,
    High,
    Critical,
}

pub type CommandHandler =
    Arc<dyn Fn(&mut UpdateContext<'_>, Option<&Value>) -> Result<bool, CommandError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandHandle {
    command: String,
    id: u64,
}

impl CommandHandle {
    pub fn command(&self) -> &str {
        &self.command
    }
}

#[derive(Clone)]
struct Registration {
    id: u64,
    priority: CommandPriority,
    handler: CommandHandler,
}

/// Priority-ordered handler lists, one per command id.
///
/// Each editor owns its dispatcher, so registrations never leak between
/// editor instances.
#[derive(Default, Clone)]
pub struct CommandDispatcher {
    commands: HashMap<String, Vec<Registration>>,
    next_id: u64,
}

impl CommandDispatcher {
    pub fn register(
        &mut self,
        command: impl Into<String>,
        priority: CommandPriority,
        handler: impl Fn(&mut UpdateContext<'_>, Option<&Value>) -> Result<bool, CommandError>
        + Send
        + Sync
        + 'static,
    ) -> CommandHandle {
        self.register_arc(command.into(), priority, Arc::new(handler))
    }

    pub(crate) fn register_arc(
        &mut self,
        command: String,
        priority: CommandPriority,
        handler: CommandHandler,
    ) -> CommandHandle {
        self.next_id += 1;
        let id = self.next_id;
        let list = self.commands.entry(command.clone()).or_default();
        // Higher priority first; equal priorities keep registration order.
        let at = list
            .iter()
            .position(|r| r.priority < priority)
            .unwrap_or(list.len());
        list.insert(
            at,
            Registration {
                id,
                priority,
                handler,
            },
        );
        CommandHandle { command, id }
    }

    pub fn unregister(&mut self, handle: CommandHandle) -> bool {
        let Some(list) = self.commands.get_mut(&handle.command) else {
            return false;
        };
        let before = list.len();
        list.retain(|r| r.id != handle.id);
        before != list.len()
    }

    pub fn has_handlers(&self, command: &str) -> bool {
        self.commands.get(command).is_some_and(|l| !l.is_empty())
    }

    pub fn handler_count(&self, command: &str) -> usize {
        self.commands.get(command).map(Vec::len).unwrap_or(0)
    }

    /// Runs handlers from highest to lowest priority until one reports the
    /// command as handled.
    ///
    /// A handler that fails has its changes rolled back, selection included,
    /// and the next handler gets a chance.
    pub(crate) fn dispatch(
        &self,
        cx: &mut UpdateContext<'_>,
        command: &str,
        payload: Option<&Value>,
    ) -> bool {
        let handlers: Vec<CommandHandler> = self
            .commands
            .get(command)
            .map(|list| list.iter().map(|r| r.handler.clone()).collect())
            .unwrap_or_default();
        if handlers.is_empty() {
            debug!(command, "no handlers registered");
            return false;
        }

        for handler in handlers {
            let checkpoint = cx.checkpoint();
            match handler(cx, payload) {
                Ok(true) => return true,
                Ok(false) => {}
                Err(err) => {
                    warn!(command, error = %err, "command handler failed; changes rolled back");
                    cx.restore(checkpoint);
                }
            }
        }
        false
    }
}

pub fn decode_payload<T>(payload: Option<&Value>) -> Result<T, CommandError>
where
    T: DeserializeOwned + Default,
{
    match payload {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|err| CommandError::new(format!("Invalid command payload: {err}"))),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertEquationPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline: Option<bool>,
    #[serde(default)]
    pub show_modal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_key_to_update: Option<NodeKey>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertImagePayload {
    pub src: String,
    #[serde(default)]
    pub alt_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default)]
    pub show_caption: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleCollapsiblePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<NodeKey>,
}
