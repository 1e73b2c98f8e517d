//! Checkpoint record types
//!
//! [`NewCheckpoint`] is what a writer hands to `save_resume`; every field is
//! defaultable so that a record with a missing mandatory field can be built and
//! rejected by validation. [`Checkpoint`] is a stored row as returned by reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ResumeError, Result};

/// Schema-less structured payload (input, output, space snapshot, metadata)
pub type Payload = serde_json::Map<String, Value>;

/// Outcome that caused a checkpoint to be written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeStatus {
    Failed,
    Interrupted,
}

impl ResumeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Failed => "failed",
            Self::Interrupted => "interrupted",
        }
    }

    /// Parse from string representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "failed" => Some(Self::Failed),
            "interrupted" => Some(Self::Interrupted),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResumeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Kind of execution step a checkpoint was taken at
///
/// Deployments may define further kinds; they round-trip through `Other`.
/// Equality follows the stored string, so `Other("llm")` equals `Llm`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StepType {
    Input,
    HookCreate,
    Llm,
    Tool,
    HookNext,
    Delegate,
    Other(String),
}

impl StepType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Input => "input",
            Self::HookCreate => "hook_create",
            Self::Llm => "llm",
            Self::Tool => "tool",
            Self::HookNext => "hook_next",
            Self::Delegate => "delegate",
            Self::Other(kind) => kind,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "input" => Self::Input,
            "hook_create" => Self::HookCreate,
            "llm" => Self::Llm,
            "tool" => Self::Tool,
            "hook_next" => Self::HookNext,
            "delegate" => Self::Delegate,
            other => Self::Other(other.to_string()),
        }
    }

    fn is_blank(&self) -> bool {
        self.as_str().trim().is_empty()
    }
}

impl PartialEq for StepType {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for StepType {}

impl std::hash::Hash for StepType {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl From<String> for StepType {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<&str> for StepType {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<StepType> for String {
    fn from(value: StepType) -> Self {
        match value {
            StepType::Other(kind) => kind,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// A checkpoint about to be written
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewCheckpoint {
    /// Generated when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_id: Option<String>,
    pub chat_id: String,
    pub request_id: String,
    pub assistant_id: String,
    pub stack_id: String,
    /// `None` (or empty) for the root frame
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_parent_id: Option<String>,
    pub stack_depth: u32,
    #[serde(rename = "type")]
    pub step_type: Option<StepType>,
    pub status: Option<ResumeStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub space_snapshot: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub sequence: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Payload>,
}

impl NewCheckpoint {
    /// Root-frame checkpoint with every mandatory field set
    pub fn new(
        chat_id: impl Into<String>,
        request_id: impl Into<String>,
        assistant_id: impl Into<String>,
        stack_id: impl Into<String>,
        step_type: StepType,
        status: ResumeStatus,
    ) -> Self {
        Self {
            chat_id: chat_id.into(),
            request_id: request_id.into(),
            assistant_id: assistant_id.into(),
            stack_id: stack_id.into(),
            step_type: Some(step_type),
            status: Some(status),
            ..Self::default()
        }
    }

    /// Place this checkpoint in a delegated frame
    pub fn with_parent(mut self, stack_parent_id: impl Into<String>, stack_depth: u32) -> Self {
        self.stack_parent_id = Some(stack_parent_id.into());
        self.stack_depth = stack_depth;
        self
    }

    pub fn with_sequence(mut self, sequence: i64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_input(mut self, input: Payload) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_output(mut self, output: Payload) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_space_snapshot(mut self, snapshot: Payload) -> Self {
        self.space_snapshot = Some(snapshot);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Payload) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Parent frame id, treating an empty string as "root"
    pub fn parent_id(&self) -> Option<&str> {
        self.stack_parent_id.as_deref().filter(|p| !p.is_empty())
    }

    /// Check mandatory fields; `index` is the record's position in its batch
    pub(crate) fn validate(&self, index: usize) -> Result<()> {
        let required = [
            ("chat_id", self.chat_id.as_str()),
            ("request_id", self.request_id.as_str()),
            ("assistant_id", self.assistant_id.as_str()),
            ("stack_id", self.stack_id.as_str()),
        ];
        for (field, value) in required {
            if value.is_empty() {
                return Err(ResumeError::required_in_batch(field, index));
            }
        }

        if self.step_type.as_ref().is_none_or(StepType::is_blank) {
            return Err(ResumeError::required_in_batch("type", index));
        }
        if self.status.is_none() {
            return Err(ResumeError::required_in_batch("status", index));
        }

        if self.parent_id() == Some(self.stack_id.as_str()) {
            return Err(ResumeError::invalid(format!(
                "record {index}: stack {} names itself as parent",
                self.stack_id
            )));
        }

        Ok(())
    }
}

/// A stored checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub resume_id: String,
    pub chat_id: String,
    pub request_id: String,
    pub assistant_id: String,
    pub stack_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_parent_id: Option<String>,
    pub stack_depth: u32,
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub status: ResumeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub space_snapshot: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub sequence: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Payload>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Whether this checkpoint belongs to a root frame
    pub fn is_root(&self) -> bool {
        self.stack_parent_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn complete() -> NewCheckpoint {
        NewCheckpoint::new(
            "chat-1",
            "req-1",
            "assistant-1",
            "stack-1",
            StepType::Llm,
            ResumeStatus::Interrupted,
        )
        .with_sequence(1)
    }

    #[test]
    fn test_complete_record_validates() {
        assert!(complete().validate(0).is_ok());
    }

    #[test]
    fn test_each_mandatory_field_is_reported() {
        let mut missing_chat = complete();
        missing_chat.chat_id.clear();
        let mut missing_request = complete();
        missing_request.request_id.clear();
        let mut missing_assistant = complete();
        missing_assistant.assistant_id.clear();
        let mut missing_stack = complete();
        missing_stack.stack_id.clear();
        let mut missing_type = complete();
        missing_type.step_type = None;
        let mut blank_type = complete();
        blank_type.step_type = Some(StepType::Other(String::new()));
        let mut missing_status = complete();
        missing_status.status = None;

        let cases = vec![
            ("chat_id", missing_chat),
            ("request_id", missing_request),
            ("assistant_id", missing_assistant),
            ("stack_id", missing_stack),
            ("type", missing_type),
            ("type", blank_type),
            ("status", missing_status),
        ];

        for (expected, record) in cases {
            match record.validate(3) {
                Err(ResumeError::MissingField { field, index }) => {
                    assert_eq!(field, expected);
                    assert_eq!(index, Some(3));
                }
                other => panic!("expected missing {expected}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_self_parent_is_invalid() {
        let record = complete().with_parent("stack-1", 1);
        let err = record.validate(0).expect_err("self parent");
        assert_eq!(err.category(), crate::ErrorCategory::Validation);
    }

    #[test]
    fn test_empty_parent_means_root() {
        let record = NewCheckpoint {
            stack_parent_id: Some(String::new()),
            ..complete()
        };
        assert_eq!(record.parent_id(), None);
    }

    #[test]
    fn test_step_type_round_trips_custom_kinds() {
        assert_eq!(StepType::parse("hook_next"), StepType::HookNext);
        assert_eq!(
            StepType::parse("retrieval"),
            StepType::Other("retrieval".to_string())
        );
        assert_eq!(String::from(StepType::Delegate), "delegate");
        assert_eq!(StepType::Other("llm".to_string()), StepType::Llm);
        assert_ne!(StepType::Other("retrieval".to_string()), StepType::Tool);
        assert_eq!(ResumeStatus::parse("failed"), Some(ResumeStatus::Failed));
        assert_eq!(ResumeStatus::parse("done"), None);
    }

    #[test]
    fn test_new_checkpoint_deserializes_with_wire_names() {
        let record: NewCheckpoint = serde_json::from_value(json!({
            "chat_id": "chat-1",
            "request_id": "req-1",
            "assistant_id": "assistant-1",
            "stack_id": "sub",
            "stack_parent_id": "main",
            "stack_depth": 1,
            "type": "delegate",
            "status": "failed",
            "space_snapshot": {"task": "analyze"},
            "sequence": 7
        }))
        .expect("deserialize");

        assert_eq!(record.step_type, Some(StepType::Delegate));
        assert_eq!(record.status, Some(ResumeStatus::Failed));
        assert_eq!(record.parent_id(), Some("main"));
        assert_eq!(
            record.space_snapshot.as_ref().and_then(|s| s.get("task")),
            Some(&json!("analyze"))
        );
        assert!(record.validate(0).is_ok());
    }

    #[test]
    fn test_missing_status_in_json_fails_validation() {
        let record: NewCheckpoint = serde_json::from_value(json!({
            "chat_id": "chat-1",
            "request_id": "req-1",
            "assistant_id": "assistant-1",
            "stack_id": "main",
            "type": "llm"
        }))
        .expect("deserialize");

        assert!(matches!(
            record.validate(0),
            Err(ResumeError::MissingField { field: "status", .. })
        ));
    }
}
