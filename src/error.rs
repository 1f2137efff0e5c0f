//SPDX-License-Identifier: MPL-2.0
use std::fmt::Display;

use crate::bridge::BridgeError;
use crate::registry::EntityId;

/// Which binding-layer capability failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum BackendErrorKind {
    Connect,
    Window,
    Context,
    Attach,
    Swap,
}

/**
A failure reported by the native binding layer.

The message is whatever the binding layer had to say; it is not interpreted here.
*/
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    kind: BackendErrorKind,
    message: String,
}

impl Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} failed: {}", self.kind, self.message)
    }
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        BackendError {
            kind,
            message: message.into(),
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Connect, message)
    }
    pub fn window(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Window, message)
    }
    pub fn context(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Context, message)
    }

    pub fn kind(&self) -> BackendErrorKind {
        self.kind
    }
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(thiserror::Error, Debug)]
pub enum HostError {
    /// The native connection could not be established.  Nothing depending on it can run.
    #[error("backend initialization failed: {0}")]
    Fatal(BackendError),
    #[error("could not spawn the owner thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("native window could not be created: {0}")]
    WindowCreation(BackendError),
    #[error("rendering context could not be created: {0}")]
    ContextCreation(BackendError),
    #[error("renderer panicked during initialization: {0}")]
    RendererPanicked(String),
    #[error("shutdown has been requested")]
    ShuttingDown,
    #[error("no live window with id {0}")]
    UnknownWindow(EntityId),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_display_names_the_capability() {
        let e = BackendError::context("no GLES3");
        assert_eq!(e.to_string(), "Context failed: no GLES3");
        assert_eq!(e.kind(), BackendErrorKind::Context);
    }

    #[test]
    fn bridge_errors_convert() {
        let e: HostError = BridgeError::Closed.into();
        assert!(matches!(e, HostError::Bridge(BridgeError::Closed)));
    }
}
