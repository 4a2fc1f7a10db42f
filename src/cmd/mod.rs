//! CLI command implementations.
//!
//! | Module    | Commands handled     |
//! |-----------|----------------------|
//! | `run`     | `Run`                |
//! | `session` | `Status`, `History`  |
//! | `phase`   | `Phases`             |

pub mod phase;
pub mod run;
pub mod session;

pub use phase::cmd_phases;
pub use run::{RunOptions, cmd_run};
pub use session::{cmd_history, cmd_status};
