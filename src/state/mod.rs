//! Session state read from the agent-maintained `_overview.md`.

mod document;
mod extract;

pub use document::{OVERVIEW_FILE, SessionDocument, StateSource};
pub use extract::{NOTE_TAG, RECOVERY_WINDOW, StructuredState, extract, recover_from_log};
