use crate::action::Action;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// DeviceCommand
// ---------------------------------------------------------------------------

/// The fixed command vocabulary the device understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceCommand {
    Say,
    ShowImage,
    Move,
    ShowUrl,
    ClearFragment,
    ClearImage,
    Auth,
}

// ---------------------------------------------------------------------------
// CommandPayload
// ---------------------------------------------------------------------------

/// Wire object sent to the device for any command. `id` mirrors the
/// command's identifier so acknowledgements can be correlated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandPayload {
    pub command: DeviceCommand,
    pub content: String,
    pub name: String,
    pub delay: u32,
    pub id: Uuid,
}

impl CommandPayload {
    /// Payload-less control command (`clear_fragment` / `clear_image`) with
    /// a fresh correlation id.
    pub fn control(command: DeviceCommand) -> Self {
        Self {
            command,
            content: String::new(),
            name: String::new(),
            delay: 0,
            id: Uuid::new_v4(),
        }
    }

    /// Authentication prompt carrying the pairing code.
    pub fn auth(code: &str) -> Self {
        Self {
            command: DeviceCommand::Auth,
            content: code.to_string(),
            name: String::new(),
            delay: 0,
            id: Uuid::new_v4(),
        }
    }
}

/// URL-safe base64 so special characters survive transport of paths/URLs.
fn encode_text(text: &str) -> String {
    URL_SAFE.encode(text.as_bytes())
}

impl Action {
    /// Build the device payload for a single action. Composites have no
    /// payload of their own; their children are sent individually.
    pub fn command_payload(&self) -> Option<CommandPayload> {
        match self {
            Action::Utterance(i) => Some(CommandPayload {
                command: DeviceCommand::Say,
                content: encode_text(&i.file_path),
                name: i.phrase.clone(),
                delay: i.delay,
                id: i.id,
            }),
            Action::Image(i) => Some(CommandPayload {
                command: DeviceCommand::ShowImage,
                content: STANDARD.encode(&i.data),
                name: i.name.clone(),
                delay: i.delay,
                id: i.id,
            }),
            Action::Motion(i) => Some(CommandPayload {
                command: DeviceCommand::Move,
                content: String::new(),
                name: i.name.clone(),
                delay: i.delay,
                id: i.id,
            }),
            Action::Url(i) => Some(CommandPayload {
                command: DeviceCommand::ShowUrl,
                content: encode_text(&i.url),
                name: i.name.clone(),
                delay: i.delay,
                id: i.id,
            }),
            Action::Composite(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Acknowledgements
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Success,
    Error,
}

/// A device acknowledgement: exactly one of `action_success`/`action_error`
/// mapped to the finished command's id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub id: Uuid,
    pub outcome: AckOutcome,
}

/// Extract an acknowledgement from an inbound device message, if it carries
/// one. Any other message shape yields `None` (forward-compatible no-op).
pub fn parse_ack(value: &serde_json::Value) -> Option<Ack> {
    for (key, outcome) in [
        ("action_success", AckOutcome::Success),
        ("action_error", AckOutcome::Error),
    ] {
        if let Some(raw) = value.get(key).and_then(|v| v.as_str()) {
            if let Ok(id) = Uuid::parse_str(raw) {
                return Some(Ack { id, outcome });
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
