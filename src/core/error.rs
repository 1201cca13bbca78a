/// Tool Error Taxonomy
///
/// Every failure a client can observe from a tool call is one of these
/// variants. The message is what the client sees; the category is a stable
/// machine-readable tag carried alongside it.

use serde_json::{Value, json};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    /// The referenced bucket or object does not exist.
    #[error("{0}")]
    NotFound(String),
    /// The caller's credentials lack the required grant.
    #[error("{0}")]
    PermissionDenied(String),
    /// A create call collided with an existing resource.
    #[error("{0}")]
    AlreadyExists(String),
    /// Malformed input: bad parameter shape, unknown parameter, missing local file.
    #[error("{0}")]
    InvalidArgument(String),
    /// The resource is in a state that prevents the operation (non-empty
    /// bucket, no signing key).
    #[error("{0}")]
    FailedPrecondition(String),
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Tool already registered: {0}")]
    DuplicateTool(String),
    /// Any backend failure not otherwise categorized.
    #[error("{0}")]
    Unclassified(String),
}

impl ToolError {
    pub fn category(&self) -> &'static str {
        match self {
            ToolError::NotFound(_) => "not_found",
            ToolError::PermissionDenied(_) => "permission_denied",
            ToolError::AlreadyExists(_) => "already_exists",
            ToolError::InvalidArgument(_) => "invalid_argument",
            ToolError::FailedPrecondition(_) => "failed_precondition",
            ToolError::UnknownTool(_) => "unknown_tool",
            ToolError::DuplicateTool(_) => "duplicate_tool",
            ToolError::Unclassified(_) => "unclassified",
        }
    }

    /// Same category, different client-facing message.
    pub fn with_message(self, message: String) -> Self {
        match self {
            ToolError::NotFound(_) => ToolError::NotFound(message),
            ToolError::PermissionDenied(_) => ToolError::PermissionDenied(message),
            ToolError::AlreadyExists(_) => ToolError::AlreadyExists(message),
            ToolError::InvalidArgument(_) => ToolError::InvalidArgument(message),
            ToolError::FailedPrecondition(_) => ToolError::FailedPrecondition(message),
            ToolError::UnknownTool(_) => ToolError::UnknownTool(message),
            ToolError::DuplicateTool(_) => ToolError::DuplicateTool(message),
            ToolError::Unclassified(_) => ToolError::Unclassified(message),
        }
    }

    /// Normalized error payload returned to clients.
    pub fn to_payload(&self) -> Value {
        json!({
            "ok": false,
            "error": self.category(),
            "message": self.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_category_and_message() {
        let err = ToolError::NotFound("Bucket 'b' not found.".to_string());
        assert_eq!(
            err.to_payload(),
            json!({"ok": false, "error": "not_found", "message": "Bucket 'b' not found."})
        );
    }

    #[test]
    fn registry_errors_name_the_tool() {
        assert_eq!(ToolError::UnknownTool("nope".into()).to_string(), "Unknown tool: nope");
        assert_eq!(ToolError::DuplicateTool("greet".into()).category(), "duplicate_tool");
    }

    #[test]
    fn with_message_keeps_category() {
        let err = ToolError::PermissionDenied("denied".into()).with_message("copied, then denied".into());
        assert_eq!(err.category(), "permission_denied");
        assert_eq!(err.to_string(), "copied, then denied");
    }
}
