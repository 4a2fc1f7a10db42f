pub mod config;
pub mod errors;
pub mod history;
pub mod logging;
pub mod notify;
pub mod orchestrator;
pub mod phase;
pub mod retry;
pub mod runner;
pub mod session;
pub mod signals;
pub mod state;
pub mod stream;
