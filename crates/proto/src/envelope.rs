//! Uniform result wrapper returned by every tool invocation.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Validation problems keyed by parameter name, in detection order.
///
/// Unknown argument keys are reported under the synthetic `_unknown` key.
pub type ValidationErrors = IndexMap<String, Vec<String>>;

/// Bucket name used for argument keys absent from the schema.
pub const UNKNOWN_PARAMS_KEY: &str = "_unknown";

/// Why an invocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeErrorKind {
    /// The tool is disabled; nothing was counted or executed.
    Disabled,
    /// Arguments did not satisfy the schema; see `details`.
    Validation,
    /// The entrypoint raised a fault; see `exception`.
    Execution,
    /// No tool is registered under the requested name.
    NotFound,
}

/// Identity of the call that produced an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeMetadata {
    pub tool: String,
    pub version: String,
    /// `"{tool}_{call_count}"`, strictly increasing per tool.
    pub call_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Snapshot of the tool's runtime counters after the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeStatus {
    pub call_count: u64,
    pub error_count: u64,
    pub enabled: bool,
}

/// Kind and message of a fault raised by a tool entrypoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

/// `{success, result|error, metadata, status, details?, exception?}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<EnvelopeErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EnvelopeMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<EnvelopeStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<ValidationErrors>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<FaultInfo>,
}

impl ResultEnvelope {
    /// Creates a success envelope.
    pub fn success(result: Value, metadata: EnvelopeMetadata, status: EnvelopeStatus) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            error_kind: None,
            metadata: Some(metadata),
            status: Some(status),
            details: None,
            exception: None,
        }
    }

    /// Creates a failure envelope produced by a tool contract.
    pub fn failure(
        kind: EnvelopeErrorKind,
        error: impl Into<String>,
        metadata: EnvelopeMetadata,
        status: EnvelopeStatus,
    ) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
            error_kind: Some(kind),
            metadata: Some(metadata),
            status: Some(status),
            details: None,
            exception: None,
        }
    }

    /// Creates the envelope returned when dispatching to an unknown name.
    pub fn not_found(name: &str) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(format!("Tool '{name}' not found")),
            error_kind: Some(EnvelopeErrorKind::NotFound),
            metadata: None,
            status: None,
            details: None,
            exception: None,
        }
    }

    /// Attaches per-parameter validation errors.
    pub fn with_details(mut self, details: ValidationErrors) -> Self {
        self.details = Some(details);
        self
    }

    /// Attaches the kind and message of a caught fault.
    pub fn with_exception(mut self, kind: impl Into<String>, message: impl Into<String>) -> Self {
        self.exception = Some(FaultInfo {
            kind: kind.into(),
            message: message.into(),
        });
        self
    }

    /// Returns `true` for success envelopes.
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Serializes the envelope as the content of a tool-role message.
    pub fn to_message_content(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({"success": false, "error": format!("unserializable result: {e}")})
                .to_string()
        })
    }
}
