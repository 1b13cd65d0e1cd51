//! Assistant-driven request conversations.
//!
//! A conversation forwards user turns to the request webhook, normalizes the
//! replies, tracks the 1-9 request stage and keeps the transcript in the
//! key-value store.

mod composer;
mod engine;
mod markup;
mod models;
mod normalizer;
mod persistence;
mod state;
mod surface;

pub use engine::{
    ConversationEngine, ConversationObserver, EngineSnapshot, SendOutcome, SessionIdentity,
    SkipReason,
};
pub use markup::{SafeHtml, render_safe};
pub use models::{Attachment, FilePayload, Message, Project, UserType};
pub use normalizer::RawResponse;
pub use persistence::TRANSCRIPT_KEY_PREFIX;
pub use state::ConversationState;
pub use surface::{Affordance, SupplierMode};

#[cfg(test)]
pub use models::MaterialItem;
#[cfg(test)]
pub use normalizer::normalize;
