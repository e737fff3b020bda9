//! The patch envelope: the one JSON object a model turn is allowed to carry,
//! and the safety predicate that every repo-relative path must satisfy.
//!
//! Validation is pure and deterministic — no I/O happens here. [`validate`]
//! either returns a fully-typed [`PatchPayload`] (one variant per `op`, so
//! downstream matches are exhaustive) or a [`ValidationError`] the
//! orchestrator can turn into a retry prompt.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::RunError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchStatus {
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileMode {
    Mode644,
    Mode755,
}

impl FileMode {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "644" | "0644" => Some(Self::Mode644),
            "755" | "0755" => Some(Self::Mode755),
            _ => None,
        }
    }

    pub fn canonical(&self) -> &'static str {
        match self {
            FileMode::Mode644 => "644",
            FileMode::Mode755 => "755",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchContent {
    Text(String),
    Binary(Vec<u8>),
}

/// One atomic, validated change. Exactly one variant per `op`, so adding an
/// operation is a compile-time-checked change everywhere this is matched.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchPayload {
    Create {
        file: String,
        content: PatchContent,
        status: PatchStatus,
    },
    Update {
        file: String,
        content: PatchContent,
        status: PatchStatus,
    },
    Delete {
        file: String,
        status: PatchStatus,
    },
    Rename {
        file: String,
        target: String,
        status: PatchStatus,
    },
    Chmod {
        file: String,
        mode: FileMode,
        status: PatchStatus,
    },
}

impl PatchPayload {
    pub fn status(&self) -> PatchStatus {
        match self {
            PatchPayload::Create { status, .. }
            | PatchPayload::Update { status, .. }
            | PatchPayload::Delete { status, .. }
            | PatchPayload::Rename { status, .. }
            | PatchPayload::Chmod { status, .. } => *status,
        }
    }

    /// The path this payload primarily names, for commit messages and caps bookkeeping.
    pub fn primary_path(&self) -> &str {
        match self {
            PatchPayload::Create { file, .. }
            | PatchPayload::Update { file, .. }
            | PatchPayload::Delete { file, .. }
            | PatchPayload::Rename { file, .. }
            | PatchPayload::Chmod { file, .. } => file,
        }
    }

    pub fn op_name(&self) -> &'static str {
        match self {
            PatchPayload::Create { .. } => "create",
            PatchPayload::Update { .. } => "update",
            PatchPayload::Delete { .. } => "delete",
            PatchPayload::Rename { .. } => "rename",
            PatchPayload::Chmod { .. } => "chmod",
        }
    }

    /// Every repo-relative path this payload touches (for staging/commit scoping).
    pub fn touched_paths(&self) -> Vec<&str> {
        match self {
            PatchPayload::Rename { file, target, .. } => vec![file.as_str(), target.as_str()],
            other => vec![other.primary_path()],
        }
    }

    /// Serializes back to the canonical wire envelope. Exists so that
    /// `parse(serialize(p)) == p` holds for every valid payload.
    pub fn to_envelope(&self) -> RawEnvelope {
        let status = match self.status() {
            PatchStatus::InProgress => "in_progress",
            PatchStatus::Completed => "completed",
        }
        .to_string();

        match self {
            PatchPayload::Create { file, content, .. }
            | PatchPayload::Update { file, content, .. } => {
                let (body, body_b64) = match content {
                    PatchContent::Text(text) => (Some(text.clone()), None),
                    PatchContent::Binary(bytes) => (
                        None,
                        Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
                    ),
                };
                RawEnvelope {
                    op: self.op_name().to_string(),
                    file: Some(file.clone()),
                    body,
                    body_b64,
                    target: None,
                    mode: None,
                    status,
                }
            }
            PatchPayload::Delete { file, .. } => RawEnvelope {
                op: "delete".to_string(),
                file: Some(file.clone()),
                body: None,
                body_b64: None,
                target: None,
                mode: None,
                status,
            },
            PatchPayload::Rename { file, target, .. } => RawEnvelope {
                op: "rename".to_string(),
                file: Some(file.clone()),
                body: None,
                body_b64: None,
                target: Some(target.clone()),
                mode: None,
                status,
            },
            PatchPayload::Chmod { file, mode, .. } => RawEnvelope {
                op: "chmod".to_string(),
                file: Some(file.clone()),
                body: None,
                body_b64: None,
                target: None,
                mode: Some(mode.canonical().to_string()),
                status,
            },
        }
    }
}

/// The wire shape, before op-specific validation. Unknown keys are rejected
/// by `deny_unknown_fields` per the spec's "unknown keys are rejected" rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawEnvelope {
    pub op: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub body_b64: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    pub status: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("malformed patch envelope: {0}")]
    MalformedEnvelope(String),
    #[error("schema violation: {0}")]
    SchemaViolation(String),
    #[error("unsafe path: {0}")]
    UnsafePath(String),
    #[error("forbidden mode: {0}")]
    ForbiddenMode(String),
    #[error("missing content: {0}")]
    MissingContent(String),
}

impl From<ValidationError> for RunError {
    fn from(value: ValidationError) -> Self {
        match value {
            ValidationError::MalformedEnvelope(m) => RunError::MalformedEnvelope(m),
            ValidationError::SchemaViolation(m) => RunError::SchemaViolation(m),
            ValidationError::UnsafePath(m) => RunError::UnsafePath(m),
            ValidationError::ForbiddenMode(m) => RunError::ForbiddenMode(m),
            ValidationError::MissingContent(m) => RunError::MissingContent(m),
        }
    }
}

/// The single place path acceptance is decided: non-empty, repo-relative,
/// POSIX, no `..` segment, no backslash, first segment isn't `.git`, and the
/// path normalizes to itself (no redundant `.`/`//` components to dodge the
/// other checks).
pub fn is_safe_path(p: &str) -> bool {
    if p.is_empty() || p.starts_with('/') || p.contains('\\') {
        return false;
    }

    let segments: Vec<&str> = p.split('/').collect();
    if segments.iter().any(|seg| *seg == "..") {
        return false;
    }
    if segments.first() == Some(&".git") {
        return false;
    }

    let normalized = segments
        .iter()
        .filter(|seg| !seg.is_empty() && **seg != ".")
        .cloned()
        .collect::<Vec<_>>()
        .join("/");

    normalized == p
}

fn require_path(raw: &Option<String>, label: &str) -> Result<String, ValidationError> {
    let path = raw
        .clone()
        .ok_or_else(|| ValidationError::SchemaViolation(format!("missing `{label}`")))?;
    if !is_safe_path(&path) {
        return Err(ValidationError::UnsafePath(path));
    }
    Ok(path)
}

fn parse_status(raw: &str) -> Result<PatchStatus, ValidationError> {
    match raw {
        "in_progress" => Ok(PatchStatus::InProgress),
        "completed" => Ok(PatchStatus::Completed),
        other => Err(ValidationError::SchemaViolation(format!(
            "unknown status `{other}`"
        ))),
    }
}

fn parse_content(envelope: &RawEnvelope) -> Result<PatchContent, ValidationError> {
    match (&envelope.body, &envelope.body_b64) {
        (Some(_), Some(_)) => Err(ValidationError::SchemaViolation(
            "exactly one of `body`/`body_b64` may be present".to_string(),
        )),
        (Some(text), None) => Ok(PatchContent::Text(text.clone())),
        (None, Some(b64)) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(b64.trim())
                .map_err(|e| ValidationError::SchemaViolation(format!("invalid base64: {e}")))?;
            Ok(PatchContent::Binary(bytes))
        }
        (None, None) => Err(ValidationError::MissingContent(
            "one of `body`/`body_b64` is required".to_string(),
        )),
    }
}

/// Parses and validates exactly one JSON object. Extra prose, code fences, or
/// trailing data after the object fail with `MalformedEnvelope`; this
/// performs no I/O.
pub fn validate(raw_text: &str) -> Result<PatchPayload, ValidationError> {
    let trimmed = raw_text.trim();

    let mut de = serde_json::Deserializer::from_str(trimmed);
    let envelope: RawEnvelope = serde_path_to_error::deserialize(&mut de)
        .map_err(|e| ValidationError::MalformedEnvelope(e.to_string()))?;
    de.end()
        .map_err(|_| ValidationError::MalformedEnvelope("trailing data after JSON object".into()))?;

    let status = parse_status(&envelope.status)?;

    match envelope.op.as_str() {
        "create" => {
            let file = require_path(&envelope.file, "file")?;
            let content = parse_content(&envelope)?;
            Ok(PatchPayload::Create {
                file,
                content,
                status,
            })
        }
        "update" => {
            let file = require_path(&envelope.file, "file")?;
            let content = parse_content(&envelope)?;
            Ok(PatchPayload::Update {
                file,
                content,
                status,
            })
        }
        "delete" => {
            let file = require_path(&envelope.file, "file")?;
            Ok(PatchPayload::Delete { file, status })
        }
        "rename" => {
            let file = require_path(&envelope.file, "file")?;
            let target = require_path(&envelope.target, "target")?;
            Ok(PatchPayload::Rename {
                file,
                target,
                status,
            })
        }
        "chmod" => {
            let file = require_path(&envelope.file, "file")?;
            let raw_mode = envelope
                .mode
                .as_deref()
                .ok_or_else(|| ValidationError::SchemaViolation("missing `mode`".to_string()))?;
            let mode = FileMode::parse(raw_mode)
                .ok_or_else(|| ValidationError::ForbiddenMode(raw_mode.to_string()))?;
            Ok(PatchPayload::Chmod { file, mode, status })
        }
        other => Err(ValidationError::SchemaViolation(format!(
            "unknown op `{other}`"
        ))),
    }
}
