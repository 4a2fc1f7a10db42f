//! The supervisory loop.
//!
//! Each iteration reads the overview, invokes the phase's agent under the
//! timeout and retry policy, validates the signal it leaves behind and either
//! loops or halts as waiting, blocked or done.

mod engine;
mod state;

pub use engine::{Orchestrator, OrchestratorSettings};
pub use state::{ControlState, Outcome};
