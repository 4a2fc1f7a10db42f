//! Signal file access.
//!
//! The store owns `_signal.json` inside a session directory. It is cleared
//! before every attempt so a stale signal from a previous iteration can never
//! be mistaken for a fresh one.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::types::{RawSignal, Signal};
use crate::errors::SignalError;

pub const SIGNAL_FILE: &str = "_signal.json";

/// What was found in the signal file after the agent exited.
#[derive(Debug, Clone)]
pub struct SignalRead {
    /// The payload as written, for history. `None` when nothing was written.
    pub payload: Option<serde_json::Value>,
    pub result: Result<Signal, String>,
}

pub struct SignalStore {
    path: PathBuf,
}

impl SignalStore {
    pub fn new(session_dir: &Path) -> Self {
        Self {
            path: session_dir.join(SIGNAL_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the signal file ahead of an invocation.
    ///
    /// Returns the previous contents when there were any worth logging.
    pub fn clear(&self) -> Result<Option<String>, SignalError> {
        let previous = match fs::read_to_string(&self.path) {
            Ok(content) => {
                let content = content.trim().to_string();
                (!content.is_empty() && content != "{}").then_some(content)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(SignalError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        fs::remove_file(&self.path).map_err(|source| SignalError::Io {
            path: self.path.clone(),
            source,
        })?;

        Ok(previous)
    }

    /// Read and validate the signal.
    ///
    /// A missing file, an empty file and an empty object all mean the agent did
    /// not write a signal.
    pub fn read(&self) -> Result<Signal, SignalError> {
        self.read_raw()?
            .result
            .map_err(SignalError::Validation)
    }

    /// Read the signal while keeping the raw payload, so invalid signals can
    /// still be historized.
    pub fn read_raw(&self) -> Result<SignalRead, SignalError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SignalError::Missing {
                    path: self.path.clone(),
                });
            }
            Err(source) => {
                return Err(SignalError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let content = content.trim();
        if content.is_empty() {
            return Err(SignalError::Missing {
                path: self.path.clone(),
            });
        }

        let value: serde_json::Value = match serde_json::from_str(content) {
            Ok(value) => value,
            Err(e) => {
                return Ok(SignalRead {
                    payload: Some(serde_json::Value::String(content.to_string())),
                    result: Err(format!("malformed JSON: {}", e)),
                });
            }
        };

        if value.as_object().is_some_and(|o| o.is_empty()) {
            return Err(SignalError::Missing {
                path: self.path.clone(),
            });
        }

        let result = serde_json::from_value::<RawSignal>(value.clone())
            .map_err(|e| format!("signal is not an object of string fields: {}", e))
            .and_then(Signal::try_from);

        Ok(SignalRead {
            payload: Some(value),
            result,
        })
    }
}

/// Exposed for callers that only hold a decoded payload.
pub fn validate(signal: &RawSignal) -> bool {
    signal.validate()
}
