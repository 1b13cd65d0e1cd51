//! Conversation progress as a pure reducer.

use serde::{Deserialize, Serialize};

use super::models::{Action, MaterialItem, Project};
use super::surface::SupplierMode;

/// Stage shown before the assistant has classified the request
pub const INITIAL_STAGE: u8 = 1;

/// Stage reached once the request has been submitted
pub const FINAL_STAGE: u8 = 9;

/// Snapshot of where the request conversation stands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    pub stage: u8,
    pub current_action: Option<String>,
    pub selected_items: Vec<MaterialItem>,
    pub delivery_date: Option<String>,
    pub project_data: Option<Project>,
    pub supplier_mode: Option<SupplierMode>,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self {
            stage: INITIAL_STAGE,
            current_action: None,
            selected_items: Vec::new(),
            delivery_date: None,
            project_data: None,
            supplier_mode: None,
        }
    }
}

impl ConversationState {
    pub fn is_submitted(&self) -> bool {
        self.stage == FINAL_STAGE
    }
}

/// Inputs to [`reduce`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationEvent {
    /// A normalized assistant reply arrived
    AssistantReplied {
        action: String,
        delivery_date: Option<String>,
    },
    /// The user confirmed a set of items
    ItemsSubmitted(Vec<MaterialItem>),
    /// The user picked a delivery project
    ProjectChosen(Project),
    /// The user picked how suppliers are sourced
    SupplierModeChosen(SupplierMode),
    /// The conversation was cleared
    Cleared,
}

/// Compute the next state; never mutates its input
pub fn reduce(state: &ConversationState, event: ConversationEvent) -> ConversationState {
    match event {
        ConversationEvent::AssistantReplied {
            action,
            delivery_date,
        } => {
            let stage = Action::parse(&action)
                .and_then(Action::stage)
                .unwrap_or(state.stage);

            ConversationState {
                stage,
                current_action: Some(action),
                delivery_date: delivery_date.or_else(|| state.delivery_date.clone()),
                ..state.clone()
            }
        }
        ConversationEvent::ItemsSubmitted(items) => ConversationState {
            selected_items: items,
            ..state.clone()
        },
        ConversationEvent::ProjectChosen(project) => ConversationState {
            project_data: Some(project),
            ..state.clone()
        },
        ConversationEvent::SupplierModeChosen(mode) => ConversationState {
            supplier_mode: Some(mode),
            ..state.clone()
        },
        ConversationEvent::Cleared => ConversationState::default(),
    }
}
