//! Provider response envelope.

use serde::{Deserialize, Serialize};

/// JSON body every backend endpoint answers with:
/// `{ "success": bool, "data": ..., "message": "..." }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Envelope {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
        }
    }

    /// Message to surface for a rejection, falling back to `default`.
    pub fn message_or(&self, default: impl Into<String>) -> String {
        self.message.clone().unwrap_or_else(|| default.into())
    }
}
