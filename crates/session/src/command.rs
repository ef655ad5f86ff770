use serde::{Deserialize, Serialize};

use gaitwatch_protocol::InboundEvent;

/// Explicit operator actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum OperatorCommand {
    RegisterDevice { device_id: String },
    UnregisterDevice { device_id: String },
    /// Keep (or stop keeping) a device's record through transport churn.
    SetExpected { device_id: String, expected: bool },
    StartCollection { device_id: String },
    StopCollection { device_id: String },
    /// Empty one device's buffer.
    ClearDevice { device_id: String },
    /// Reset every buffer before a new collection session.
    ClearAll,
    ResizeDevice { device_id: String, capacity: usize },
}

impl OperatorCommand {
    /// The device the command targets; `None` for session-wide commands.
    pub fn device_id(&self) -> Option<&str> {
        match self {
            OperatorCommand::RegisterDevice { device_id }
            | OperatorCommand::UnregisterDevice { device_id }
            | OperatorCommand::SetExpected { device_id, .. }
            | OperatorCommand::StartCollection { device_id }
            | OperatorCommand::StopCollection { device_id }
            | OperatorCommand::ClearDevice { device_id }
            | OperatorCommand::ResizeDevice { device_id, .. } => Some(device_id),
            OperatorCommand::ClearAll => None,
        }
    }
}

/// One item on the session's input queue.
///
/// On the wire, events carry a `"type"` tag and commands a `"command"` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SessionInput {
    Event(InboundEvent),
    Command(OperatorCommand),
}

impl SessionInput {
    pub fn device_id(&self) -> Option<&str> {
        match self {
            SessionInput::Event(event) => event.device_id(),
            SessionInput::Command(command) => command.device_id(),
        }
    }
}

impl From<InboundEvent> for SessionInput {
    fn from(event: InboundEvent) -> Self {
        SessionInput::Event(event)
    }
}

impl From<OperatorCommand> for SessionInput {
    fn from(command: OperatorCommand) -> Self {
        SessionInput::Command(command)
    }
}
