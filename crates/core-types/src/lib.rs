//! Shared primitives for the pagelens workspace.
//!
//! Identifiers here mirror what the DevTools protocol hands back: targets,
//! sessions and frames are wire-native strings, backend node ids are the
//! integers DOM/AX payloads correlate on. Snapshot ids are local and only
//! need to be unique within one process.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Identifier of a protocol-addressable browsing context (page, iframe, worker).
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TargetId(pub String);

/// Identifier of a protocol session scoped to one target.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

/// Frame identifier as reported by `Page.getFrameTree`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct FrameId(pub String);

/// Stable-within-session DOM node identifier, the correlation key between
/// extracted text and clickable elements.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct BackendNodeId(pub u64);

/// Identifier of one built DOM tree snapshot.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct SnapshotId(pub Uuid);

impl SnapshotId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for BackendNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// High-level error categories surfaced across the workspace.
///
/// Depth-cap truncation during frame walks is deliberately absent: the
/// recursion guard is a normal result, not an error.
#[derive(Clone, Debug, Error, Eq, PartialEq, Serialize, Deserialize)]
pub enum CoreErrorKind {
    #[error("protocol call timed out")]
    ProtocolTimeout,
    #[error("browser process launch failed")]
    ProcessLaunchFailure,
    #[error("frame data unavailable")]
    FrameUnavailable,
    #[error("extracted data failed schema validation")]
    SchemaValidation,
    #[error("cdp i/o failure")]
    CdpIo,
    #[error("internal error")]
    Internal,
}

/// Enriched error passed between crates: a category plus an optional
/// human-readable hint and structured payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoreError {
    pub kind: CoreErrorKind,
    pub hint: Option<String>,
    pub retriable: bool,
    pub data: Option<serde_json::Value>,
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(hint) = &self.hint {
            write!(f, ": {}", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for CoreError {}

impl CoreError {
    pub fn new(kind: CoreErrorKind) -> Self {
        Self {
            kind,
            hint: None,
            retriable: false,
            data: None,
        }
    }

    pub fn timeout(hint: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::ProtocolTimeout).with_hint(hint)
    }

    pub fn launch(hint: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::ProcessLaunchFailure).with_hint(hint)
    }

    pub fn internal(hint: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::Internal).with_hint(hint)
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn retriable(mut self, flag: bool) -> Self {
        self.retriable = flag;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Fatal errors abort the caller's request; everything else degrades
    /// to a partial/best-effort result.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            CoreErrorKind::ProtocolTimeout
                | CoreErrorKind::ProcessLaunchFailure
                | CoreErrorKind::CdpIo
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_hint() {
        let err = CoreError::new(CoreErrorKind::CdpIo).with_hint("connection closed");
        assert_eq!(err.to_string(), "cdp i/o failure: connection closed");
    }

    #[test]
    fn frame_unavailable_is_not_fatal() {
        assert!(!CoreError::new(CoreErrorKind::FrameUnavailable).is_fatal());
        assert!(CoreError::timeout("x").is_fatal());
    }
}
