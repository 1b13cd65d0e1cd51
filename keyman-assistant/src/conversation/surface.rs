//! Interaction surface contract.
//!
//! Which affordance each assistant action calls for, the follow-up texts
//! those affordances send back, and the item-picker transforms. Rendering is
//! left to the client.

use serde::{Deserialize, Serialize};

use super::models::{Action, MaterialItem, Message, Project};

/// Text sent by generic yes/no quick actions and the final confirmation
pub const PROCEED_TEXT: &str = "Yes, proceed";

/// Text sent when the user rejects the final summary
pub const MODIFY_TEXT: &str = "No, let me change that";

/// What the client should offer under an assistant message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Affordance {
    /// Per-item toggles, quantity steppers and an "add N items" button
    ItemPicker,
    /// Project list with a "view all" overlay
    ProjectPicker,
    /// The two supplier sourcing choices
    SupplierModeChooser,
    /// Submit or modify
    FinalConfirm,
    /// Request submitted; nothing to send
    Informational,
    /// Generic "Yes, proceed"
    QuickAction,
    /// Plain text only
    None,
}

impl Affordance {
    pub fn for_action(tag: &str) -> Self {
        match Action::parse(tag) {
            Some(Action::ShowItems) => Affordance::ItemPicker,
            Some(Action::SelectProject) => Affordance::ProjectPicker,
            Some(Action::SetSupplierMode) => Affordance::SupplierModeChooser,
            Some(Action::FinalConfirm) => Affordance::FinalConfirm,
            Some(Action::RequestItems) => Affordance::Informational,
            Some(
                Action::DetectIntent
                | Action::SetSource
                | Action::ConfirmItems
                | Action::SetDeliveryDate,
            ) => Affordance::QuickAction,
            Some(Action::Message) | None => Affordance::None,
        }
    }
}

/// How suppliers should be approached for the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupplierMode {
    MultipleSuppliers,
    SpecificKsNumber,
}

impl SupplierMode {
    pub fn prompt(self) -> &'static str {
        match self {
            SupplierMode::MultipleSuppliers => "Request quotes from multiple suppliers",
            SupplierMode::SpecificKsNumber => "I have a specific KS number to use",
        }
    }
}

pub fn confirmation_text(proceed: bool) -> &'static str {
    if proceed { PROCEED_TEXT } else { MODIFY_TEXT }
}

pub fn project_choice_text(project: &Project) -> String {
    format!("I want to deliver to: {} ({})", project.name, project.address)
}

/// `Selected items: A (Qty: 1), B (Qty: 3)`, or `None` when nothing is selected
pub fn selection_summary(items: &[MaterialItem]) -> Option<String> {
    if items.is_empty() {
        return None;
    }

    let parts: Vec<String> = items
        .iter()
        .map(|item| format!("{} (Qty: {})", item.name, item.desired_quantity))
        .collect();

    Some(format!("Selected items: {}", parts.join(", ")))
}

/// Flip one item's selection; `false` when the index is out of range
pub fn toggle_item(message: &mut Message, index: usize) -> bool {
    let Some(item) = message.items.get_mut(index) else {
        return false;
    };
    item.selected = !item.selected;
    refresh_selected(message);
    true
}

/// Change one item's quantity by `delta`, never going below 1
pub fn adjust_quantity(message: &mut Message, index: usize, delta: i64) -> bool {
    let Some(item) = message.items.get_mut(index) else {
        return false;
    };
    let next = i64::from(item.desired_quantity)
        .saturating_add(delta)
        .clamp(1, i64::from(u32::MAX));
    item.desired_quantity = u32::try_from(next).unwrap_or(u32::MAX);
    refresh_selected(message);
    true
}

/// Recompute `selected_items` from `items`
pub fn refresh_selected(message: &mut Message) {
    message.selected_items = message
        .items
        .iter()
        .filter(|item| item.selected)
        .cloned()
        .collect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::models::Message;

    fn item(name: &str) -> MaterialItem {
        MaterialItem {
            name: name.to_string(),
            description: String::new(),
            photo: None,
            selected: false,
            desired_quantity: 1,
        }
    }

    fn picker(names: &[&str]) -> Message {
        let mut msg = Message::assistant_text("Pick your materials");
        msg.action = "show_items".to_string();
        msg.items = names.iter().map(|n| item(n)).collect();
        msg
    }

    #[test]
    fn test_affordance_table() {
        assert_eq!(Affordance::for_action("show_items"), Affordance::ItemPicker);
        assert_eq!(
            Affordance::for_action("select_project"),
            Affordance::ProjectPicker
        );
        assert_eq!(
            Affordance::for_action("supplier_mode_selection"),
            Affordance::SupplierModeChooser
        );
        assert_eq!(
            Affordance::for_action("final_confirm"),
            Affordance::FinalConfirm
        );
        assert_eq!(
            Affordance::for_action("request_items"),
            Affordance::Informational
        );
        for tag in ["detect_intent", "set_source", "set_delivery_date"] {
            assert_eq!(Affordance::for_action(tag), Affordance::QuickAction);
        }
        assert_eq!(Affordance::for_action("message"), Affordance::None);
        assert_eq!(Affordance::for_action("unheard_of"), Affordance::None);
    }

    #[test]
    fn test_fixed_texts() {
        assert_eq!(
            SupplierMode::MultipleSuppliers.prompt(),
            "Request quotes from multiple suppliers"
        );
        assert_eq!(
            SupplierMode::SpecificKsNumber.prompt(),
            "I have a specific KS number to use"
        );
        assert_eq!(confirmation_text(true), "Yes, proceed");
        assert_eq!(confirmation_text(false), "No, let me change that");

        let project = Project {
            id: "p1".to_string(),
            name: "Villa".to_string(),
            address: "Kilimani, Nairobi".to_string(),
            description: None,
            image: None,
            status: None,
        };
        assert_eq!(
            project_choice_text(&project),
            "I want to deliver to: Villa (Kilimani, Nairobi)"
        );
    }

    #[test]
    fn test_select_two_of_three() {
        let mut msg = picker(&["ItemA", "ItemB", "ItemC"]);
        assert!(toggle_item(&mut msg, 0));
        assert!(toggle_item(&mut msg, 1));

        assert_eq!(msg.selected_items.len(), 2);
        assert_eq!(
            selection_summary(&msg.selected_items).as_deref(),
            Some("Selected items: ItemA (Qty: 1), ItemB (Qty: 1)")
        );

        // Toggling again deselects
        assert!(toggle_item(&mut msg, 1));
        assert_eq!(msg.selected_items.len(), 1);
        assert!(!toggle_item(&mut msg, 9));
    }

    #[test]
    fn test_quantity_never_below_one() {
        let mut msg = picker(&["Cement"]);
        toggle_item(&mut msg, 0);

        for delta in [-1, -1, 3, -10, 1, -1, -1, 2] {
            assert!(adjust_quantity(&mut msg, 0, delta));
            assert!(msg.items[0].desired_quantity >= 1);
        }
        assert_eq!(msg.items[0].desired_quantity, 3);
        assert_eq!(msg.selected_items[0].desired_quantity, 3);
        assert!(!adjust_quantity(&mut msg, 4, 1));
    }

    #[test]
    fn test_decrement_at_one_is_noop() {
        let mut msg = picker(&["Sand"]);
        adjust_quantity(&mut msg, 0, -1);
        assert_eq!(msg.items[0].desired_quantity, 1);
    }

    #[test]
    fn test_extreme_deltas_saturate() {
        let mut msg = picker(&["Cement"]);
        msg.items[0].desired_quantity = 2;

        assert!(adjust_quantity(&mut msg, 0, i64::MAX));
        assert_eq!(msg.items[0].desired_quantity, u32::MAX);

        assert!(adjust_quantity(&mut msg, 0, 1));
        assert_eq!(msg.items[0].desired_quantity, u32::MAX);

        assert!(adjust_quantity(&mut msg, 0, i64::MIN));
        assert_eq!(msg.items[0].desired_quantity, 1);
    }

    #[test]
    fn test_empty_selection_sends_nothing() {
        assert_eq!(selection_summary(&[]), None);
    }
}
