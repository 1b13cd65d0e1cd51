//! Conversation data model.
//!
//! Field names serialize in camelCase because the same JSON is read by the
//! web clients and written to the transcript store.

use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;

/// Who authored a transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Actor role sent to the assistant with every turn
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum UserType {
    #[default]
    Client,
    ServiceProvider,
}

/// Action tags the assistant is known to emit.
///
/// Messages keep the raw tag string; this enum is the parsed view used by the
/// stage table and the interaction surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Action {
    DetectIntent,
    SetSource,
    ShowItems,
    ConfirmItems,
    SetDeliveryDate,
    SelectProject,
    #[strum(to_string = "set_supplier_mode", serialize = "supplier_mode_selection")]
    SetSupplierMode,
    FinalConfirm,
    RequestItems,
    Message,
}

impl Action {
    /// Progress stage reached when the assistant emits this action
    pub fn stage(self) -> Option<u8> {
        match self {
            Action::DetectIntent => Some(1),
            Action::SetSource => Some(2),
            Action::ShowItems => Some(3),
            Action::ConfirmItems => Some(4),
            Action::SetDeliveryDate => Some(5),
            Action::SelectProject => Some(6),
            Action::SetSupplierMode => Some(7),
            Action::FinalConfirm => Some(8),
            Action::RequestItems => Some(9),
            Action::Message => None,
        }
    }

    /// Parse a raw tag; unknown tags yield `None`
    pub fn parse(tag: &str) -> Option<Self> {
        Action::from_str(tag.trim()).ok()
    }
}

/// Tag used when the assistant reply carries no usable action
pub const FALLBACK_ACTION: &str = "message";

/// A material the assistant offers for selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialItem {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
    #[serde(default)]
    pub selected: bool,
    #[serde(default = "default_quantity")]
    pub desired_quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

/// A delivery location belonging to the customer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Audio,
}

/// Media reference shown next to a user message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    pub url: String,
}

/// Uploaded or recorded media waiting to be sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePayload {
    pub file_name: String,
    pub mime: String,
    pub bytes: Bytes,
}

impl FilePayload {
    pub fn new(file_name: impl Into<String>, mime: impl Into<String>, bytes: Bytes) -> Self {
        Self {
            file_name: file_name.into(),
            mime: mime.into(),
            bytes,
        }
    }

    /// Audio for `audio/*` content types, image for everything else
    pub fn attachment_kind(&self) -> AttachmentKind {
        match self.mime.parse::<mime::Mime>() {
            Ok(m) if m.type_() == mime::AUDIO => AttachmentKind::Audio,
            _ => AttachmentKind::Image,
        }
    }

    pub fn attachment(&self) -> Attachment {
        Attachment {
            kind: self.attachment_kind(),
            url: self.file_name.clone(),
        }
    }
}

/// What a resend replays
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResendPayload {
    pub text: String,
    pub file: Option<FilePayload>,
}

/// One transcript entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub action: String,
    #[serde(default)]
    pub items: Vec<MaterialItem>,
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub selected_items: Vec<MaterialItem>,
    #[serde(default)]
    pub user_selected_items: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_date: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub can_resend: bool,
    #[serde(skip)]
    pub resend_payload: Option<ResendPayload>,
}

/// Time-ordered unique message id
pub fn new_message_id() -> String {
    Uuid::now_v7().to_string()
}

impl Message {
    /// A freshly sent user turn; it is the resendable one until the next send
    pub fn user(text: impl Into<String>, file: Option<FilePayload>) -> Self {
        let text = text.into();
        let attachments = file.iter().map(FilePayload::attachment).collect();

        Self {
            id: new_message_id(),
            role: MessageRole::User,
            content: text.clone(),
            action: FALLBACK_ACTION.to_string(),
            items: Vec::new(),
            projects: Vec::new(),
            selected_items: Vec::new(),
            user_selected_items: false,
            delivery_date: None,
            attachments,
            can_resend: true,
            resend_payload: Some(ResendPayload { text, file }),
        }
    }

    /// Plain assistant text with the fallback action
    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            role: MessageRole::Assistant,
            content: content.into(),
            action: FALLBACK_ACTION.to_string(),
            items: Vec::new(),
            projects: Vec::new(),
            selected_items: Vec::new(),
            user_selected_items: false,
            delivery_date: None,
            attachments: Vec::new(),
            can_resend: false,
            resend_payload: None,
        }
    }

    /// The parsed action, `None` for unknown tags
    pub fn known_action(&self) -> Option<Action> {
        Action::parse(&self.action)
    }

    pub fn is_user(&self) -> bool {
        self.role == MessageRole::User
    }
}

/// Reduced projection written to the transcript store.
///
/// Field order is fixed so that persisting a restored transcript produces the
/// same bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedMessage {
    pub id: String,
    pub role: MessageRole,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub items: Vec<MaterialItem>,
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default = "fallback_action")]
    pub action: String,
    #[serde(default)]
    pub selected_items: Vec<MaterialItem>,
    #[serde(default)]
    pub user_selected_items: bool,
}

fn fallback_action() -> String {
    FALLBACK_ACTION.to_string()
}

impl From<&Message> for PersistedMessage {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            role: message.role,
            content: message.content.clone(),
            items: message.items.clone(),
            projects: message.projects.clone(),
            action: message.action.clone(),
            selected_items: message.selected_items.clone(),
            user_selected_items: message.user_selected_items,
        }
    }
}

impl From<PersistedMessage> for Message {
    fn from(persisted: PersistedMessage) -> Self {
        Self {
            id: persisted.id,
            role: persisted.role,
            content: persisted.content,
            action: persisted.action,
            items: persisted.items,
            projects: persisted.projects,
            selected_items: persisted.selected_items,
            user_selected_items: persisted.user_selected_items,
            delivery_date: None,
            attachments: Vec::new(),
            can_resend: false,
            resend_payload: None,
        }
    }
}
