//! Control signal module for Shepherd.
//!
//! After every invocation the agent writes a single JSON object to
//! `_signal.json` in the session directory:
//!
//! - `{"status":"continue","phase":"implementation"}` - keep going
//! - `{"status":"done","phase":"done","summary":"..."}` - task finished
//! - `{"status":"blocked","phase":"...","reason":"...","needs":"clarification"}` - halt
//! - `{"status":"waiting","phase":"...","for":"qa_answers"}` - pause for a human
//!
//! Signals are consumed exactly once: the store clears the file before the
//! next attempt.

mod store;
mod types;

pub use store::{SIGNAL_FILE, SignalRead, SignalStore, validate};
pub use types::{BlockedNeed, RawSignal, Signal, SignalStatus, WaitingFor};
