//! Documents: position-addressed storage plus the id → pre map that keeps node
//! identity stable across structural updates.

mod document;
mod id_pre;

pub use document::{Document, SharedDocument};
pub use id_pre::IdPreMap;
